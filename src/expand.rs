//! Macro expansion
//!
//! Serializes a call's arguments into an indexed table, runs the compiled
//! macro against it, and materializes the returned index back into the
//! arena. Any fault the macro raised surfaces here as a compile error at the
//! call site.

use log::debug;
use rustc_hash::FxHashMap;

use crate::compiler::MacroFn;
use crate::error::{CResult, CompileError};
use crate::indexed::{index_node, to_node, IndexedTable, MacroFault};
use crate::jit::runtime::{install, take, MacroContext};
use crate::node::{NodeArena, NodeId};
use crate::span::Span;

/// Index of the argument list, by convention the first entry
const ARGS_INDEX: u64 = 1;

/// Run `mac` against `args`, returning the replacement node.
///
/// The table and fault state are scoped to this call; a previously installed
/// context (a macro expanding during another expansion) is restored on the
/// way out.
pub fn expand_macro(
    arena: &mut NodeArena,
    mac: &MacroFn,
    args: &[NodeId],
    call_span: Option<Span>,
) -> CResult<NodeId> {
    let arg_list = arena.list(args.to_vec());
    let mut table = IndexedTable::new();
    let mut memo = FxHashMap::default();
    let root = index_node(arena, &mut table, &mut memo, arg_list);
    debug_assert_eq!(root as u64, ARGS_INDEX);

    let previous = install(MacroContext::new(table));
    // The callee only sees table indices; faults come back through the
    // context, not through unwinding.
    let returned = unsafe { mac.code.call1(ARGS_INDEX) };
    let ctx = take();
    if let Some(prev) = previous {
        install(prev);
    }
    let ctx = ctx.ok_or_else(|| CompileError::backend("macro context missing after call"))?;
    debug!("macro '{}' returned index {}", mac.name, returned);

    if let Some(fault) = ctx.fault {
        return Err(CompileError::macro_fault(fault, call_span));
    }
    if returned == 0 {
        return Err(CompileError::macro_fault(MacroFault::AbsentIndex, call_span));
    }

    let mut memo = FxHashMap::default();
    to_node(&ctx.table, arena, &mut memo, returned)
        .map_err(|fault| CompileError::macro_fault(fault, call_span))
}
