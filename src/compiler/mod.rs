//! Statement, function, and callable compilation
//!
//! `compile_proc` and `compile_macro` drive the full pipeline: function
//! compilation to block IR, then native code generation. Macros additionally
//! have their signature pinned to index-in, index-out.

mod function;
mod statement;

pub use function::{
    compile_function, BlockDef, CompiledFunction, FunctionDef, ParamDef,
};
pub use statement::{compile_statement, PendingTerminator, StatementContext};

use log::info;

use crate::error::{CResult, CompileError};
use crate::jit::{CompiledCode, JitBackend};
use crate::node::NodeArena;
use crate::resolve::Resolver;
use crate::types::{TypeInfo, TypeKind};

/// A compiled compile-time callable with signature index -> index
#[derive(Debug)]
pub struct MacroFn {
    pub name: String,
    pub code: CompiledCode,
}

/// A compiled callable with a declared signature
#[derive(Debug)]
pub struct ProcFn {
    pub name: String,
    pub param_types: Vec<TypeInfo>,
    pub ret_type: TypeInfo,
    pub code: CompiledCode,
}

/// Compile a proc. Compile-time-only instructions in the body are fatal.
pub fn compile_proc<R: Resolver>(
    arena: &NodeArena,
    resolver: &R,
    def: &FunctionDef,
) -> CResult<ProcFn> {
    let compiled = compile_function(arena, resolver, def, false)?;
    let code = JitBackend::new()?.compile(&compiled.ir)?;
    info!("compiled proc '{}'", def.name);
    Ok(ProcFn {
        name: def.name.clone(),
        param_types: compiled.param_types,
        ret_type: compiled.ret_type,
        code,
    })
}

/// Compile a macro. The signature must be exactly `(int 64) -> (int 64)`:
/// the macro receives the index of its argument list and returns the index
/// of its replacement.
pub fn compile_macro<R: Resolver>(
    arena: &NodeArena,
    resolver: &R,
    def: &FunctionDef,
) -> CResult<MacroFn> {
    let compiled = compile_function(arena, resolver, def, true)?;

    let index = TypeKind::Int(64);
    let ok = compiled.param_types.len() == 1
        && compiled.param_types[0].kind == index
        && compiled.ret_type.kind == index;
    if !ok {
        return Err(CompileError::InvalidMacroSignature {
            message: format!(
                "expected ((int 64)) -> (int 64), got ({}) -> {}",
                compiled
                    .param_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
                compiled.ret_type
            ),
            span: def.span,
        });
    }

    let code = JitBackend::new()?.compile(&compiled.ir)?;
    info!(
        "compiled macro '{}' using {:?}",
        def.name, compiled.ir.reflective
    );
    Ok(MacroFn {
        name: def.name.clone(),
        code,
    })
}
