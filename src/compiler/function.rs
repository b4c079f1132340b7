//! Function compiler
//!
//! Runs as a small state machine: signature, then each block in order, then
//! deferred-edge resolution. Branch targets and phi incomings may name blocks
//! that do not exist yet when their statement compiles, so the block phase
//! only accumulates worklists; the fix-up phase patches the IR once every
//! block has a label.

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{CResult, CompileError};
use crate::ir::{Block, FunctionIr, Label, Op, ReflectOp, SpannedOp, SpannedTerminator, Terminator, Ty, ValueId};
use crate::node::{NodeArena, NodeId};
use crate::resolve::Resolver;
use crate::span::Span;
use crate::types::{compile_type, TypeInfo};

use super::statement::{compile_statement, machine_ty, PendingTerminator, StatementContext};

/// One function parameter: a name and a type expression
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub ty: NodeId,
    pub span: Option<Span>,
}

/// One source block: a name and its statement nodes in order
#[derive(Debug, Clone)]
pub struct BlockDef {
    pub name: String,
    pub statements: Vec<NodeId>,
    pub span: Option<Span>,
}

/// A function ready to compile. `blocks[0]` is the entry block.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<ParamDef>,
    pub ret: NodeId,
    pub blocks: Vec<BlockDef>,
    pub span: Option<Span>,
}

/// Compiled body plus the source-level signature types
#[derive(Debug)]
pub struct CompiledFunction {
    pub ir: FunctionIr,
    pub param_types: Vec<TypeInfo>,
    pub ret_type: TypeInfo,
}

struct DeferredBranch {
    block: usize,
    target: String,
    span: Option<Span>,
}

struct DeferredCondBranch {
    block: usize,
    then_target: String,
    else_target: String,
    span: Option<Span>,
}

struct DeferredPhi {
    block: usize,
    op: usize,
    ty: Ty,
    incomings: Vec<(String, String)>,
    span: Option<Span>,
}

#[derive(Default)]
struct DeferredEdges {
    branches: Vec<DeferredBranch>,
    cond_branches: Vec<DeferredCondBranch>,
    phis: Vec<DeferredPhi>,
}

/// Compile `def` into linked basic-block IR.
///
/// `allow_reflective` is false for procs: a compile-time-only instruction in
/// a proc body is fatal at the statement that uses it.
pub fn compile_function<R: Resolver>(
    arena: &NodeArena,
    resolver: &R,
    def: &FunctionDef,
    allow_reflective: bool,
) -> CResult<CompiledFunction> {
    let mut fc = FunctionCompiler {
        arena,
        resolver,
        allow_reflective,
        ret_type: TypeInfo::int(64, def.ret),
        param_types: Vec::new(),
        value_types: Vec::new(),
        blocks: Vec::new(),
        block_locals: Vec::new(),
        current: 0,
        function_scope: FxHashMap::default(),
        value_names: FxHashSet::default(),
        block_names: FxHashMap::default(),
        deferred: DeferredEdges::default(),
        reflective: FxHashSet::default(),
    };
    fc.compile_signature(def)?;
    fc.compile_blocks(def)?;
    fc.resolve_deferred_edges()?;
    fc.finish(def)
}

struct FunctionCompiler<'a, R: Resolver> {
    arena: &'a NodeArena,
    resolver: &'a R,
    allow_reflective: bool,
    ret_type: TypeInfo,
    param_types: Vec<TypeInfo>,
    value_types: Vec<Ty>,
    blocks: Vec<Block>,
    block_locals: Vec<FxHashMap<String, (ValueId, TypeInfo)>>,
    current: usize,
    /// Parameters, then entry-block locals once the entry block is done
    function_scope: FxHashMap<String, (ValueId, TypeInfo)>,
    /// Every bound name in the function, for flat uniqueness
    value_names: FxHashSet<String>,
    block_names: FxHashMap<String, Label>,
    deferred: DeferredEdges,
    reflective: FxHashSet<&'static str>,
}

impl<R: Resolver> FunctionCompiler<'_, R> {
    fn compile_signature(&mut self, def: &FunctionDef) -> CResult<()> {
        self.ret_type = compile_type(self.arena, self.resolver, def.ret)?;
        machine_ty(&self.ret_type, def.span)?;

        for (i, param) in def.params.iter().enumerate() {
            let ty = compile_type(self.arena, self.resolver, param.ty)?;
            let mty = machine_ty(&ty, param.span)?;
            if !self.value_names.insert(param.name.clone()) {
                return Err(CompileError::duplicate("parameter", param.name.clone(), param.span));
            }
            let value = ValueId(i as u32);
            self.value_types.push(mty);
            self.function_scope.insert(param.name.clone(), (value, ty.clone()));
            self.param_types.push(ty);
        }
        Ok(())
    }

    fn compile_blocks(&mut self, def: &FunctionDef) -> CResult<()> {
        if def.blocks.is_empty() {
            return Err(CompileError::shape("at least one block", "none", def.span));
        }
        let arena = self.arena;
        let resolver = self.resolver;

        for (i, bdef) in def.blocks.iter().enumerate() {
            let label = Label(i as u32);
            if self.block_names.insert(bdef.name.clone(), label).is_some() {
                return Err(CompileError::duplicate("block", bdef.name.clone(), bdef.span));
            }
            self.blocks.push(Block::new(label, bdef.name.clone()));
            self.block_locals.push(FxHashMap::default());
            self.current = i;

            for &stmt in &bdef.statements {
                compile_statement(arena, resolver, self, stmt)?;
            }
            if self.blocks[i].terminator.is_none() {
                return Err(CompileError::terminator(
                    bdef.name.clone(),
                    "no terminator at end of block",
                    bdef.span,
                ));
            }
            if i == 0 {
                // Entry locals join the parameters in the function scope
                for (name, value) in self.block_locals[0].clone() {
                    self.function_scope.insert(name, value);
                }
            }
        }
        Ok(())
    }

    fn resolve_deferred_edges(&mut self) -> CResult<()> {
        let deferred = std::mem::take(&mut self.deferred);
        debug!(
            "resolving {} branches, {} cond branches, {} phis",
            deferred.branches.len(),
            deferred.cond_branches.len(),
            deferred.phis.len()
        );

        for d in &deferred.branches {
            let label = self.branch_target(&d.target, d.span)?;
            match &mut self.blocks[d.block].terminator {
                Some(SpannedTerminator { terminator: Terminator::Jump { target }, .. }) => {
                    *target = label
                }
                _ => unreachable!("deferred branch site is not a jump"),
            }
        }
        for d in &deferred.cond_branches {
            let then_label = self.branch_target(&d.then_target, d.span)?;
            let else_label = self.branch_target(&d.else_target, d.span)?;
            match &mut self.blocks[d.block].terminator {
                Some(SpannedTerminator {
                    terminator: Terminator::CondBranch { then_target, else_target, .. },
                    ..
                }) => {
                    *then_target = then_label;
                    *else_target = else_label;
                }
                _ => unreachable!("deferred cond branch site is not a cond branch"),
            }
        }

        let preds = self.predecessors();
        for d in &deferred.phis {
            let incomings = self.resolve_phi(d, &preds)?;
            match &mut self.blocks[d.block].ops[d.op].op {
                Op::Phi { incomings: slot, .. } => *slot = incomings,
                _ => unreachable!("deferred phi site is not a phi"),
            }
        }
        Ok(())
    }

    /// A branch target: known, and never the entry block
    fn branch_target(&self, name: &str, span: Option<Span>) -> CResult<Label> {
        let label = self.block_label(name, span)?;
        if label == Label(0) {
            return Err(CompileError::BranchToEntry {
                name: name.to_string(),
                span,
            });
        }
        Ok(label)
    }

    fn block_label(&self, name: &str, span: Option<Span>) -> CResult<Label> {
        self.block_names.get(name).copied().ok_or_else(|| CompileError::UnknownBlock {
            name: name.to_string(),
            span,
        })
    }

    /// Control-flow predecessors per block, derived from resolved terminators
    fn predecessors(&self) -> FxHashMap<Label, Vec<Label>> {
        let mut preds: FxHashMap<Label, Vec<Label>> = FxHashMap::default();
        let mut seen: FxHashSet<(Label, Label)> = FxHashSet::default();
        let edge = |seen: &mut FxHashSet<(Label, Label)>,
                        preds: &mut FxHashMap<Label, Vec<Label>>,
                        from: Label,
                        to: Label| {
            if seen.insert((from, to)) {
                preds.entry(to).or_default().push(from);
            }
        };
        for block in &self.blocks {
            if let Some(term) = &block.terminator {
                match term.terminator {
                    Terminator::Return { .. } => {}
                    Terminator::Jump { target } => {
                        edge(&mut seen, &mut preds, block.label, target)
                    }
                    Terminator::CondBranch { then_target, else_target, .. } => {
                        edge(&mut seen, &mut preds, block.label, then_target);
                        edge(&mut seen, &mut preds, block.label, else_target);
                    }
                }
            }
        }
        preds
    }

    fn resolve_phi(
        &self,
        d: &DeferredPhi,
        preds: &FxHashMap<Label, Vec<Label>>,
    ) -> CResult<Vec<(Label, ValueId)>> {
        let block_name = &self.blocks[d.block].name;
        let block_label = self.blocks[d.block].label;
        let empty = Vec::new();
        let block_preds = preds.get(&block_label).unwrap_or(&empty);

        let mut resolved = Vec::with_capacity(d.incomings.len());
        let mut covered: FxHashSet<Label> = FxHashSet::default();
        for (var, pred_name) in &d.incomings {
            let pred = self.block_label(pred_name, d.span)?;
            if !block_preds.contains(&pred) {
                return Err(CompileError::phi(
                    block_name,
                    format!("block '{}' is not a predecessor", pred_name),
                    d.span,
                ));
            }
            if !covered.insert(pred) {
                return Err(CompileError::phi(
                    block_name,
                    format!("duplicate incoming for predecessor '{}'", pred_name),
                    d.span,
                ));
            }
            let (value, _) = self.block_locals[pred.0 as usize]
                .get(var)
                .or_else(|| self.function_scope.get(var))
                .ok_or_else(|| CompileError::undefined(var.clone(), d.span))?;
            let got = self.value_types[value.0 as usize];
            if got != d.ty {
                return Err(CompileError::phi(
                    block_name,
                    format!(
                        "incoming '{}' is {}, phi is {}",
                        var,
                        ty_name(got),
                        ty_name(d.ty)
                    ),
                    d.span,
                ));
            }
            resolved.push((pred, *value));
        }
        for pred in block_preds {
            if !covered.contains(pred) {
                return Err(CompileError::phi(
                    block_name,
                    format!(
                        "no incoming for predecessor '{}'",
                        self.blocks[pred.0 as usize].name
                    ),
                    d.span,
                ));
            }
        }
        Ok(resolved)
    }

    fn finish(self, def: &FunctionDef) -> CResult<CompiledFunction> {
        let params = self
            .param_types
            .iter()
            .map(|t| machine_ty(t, def.span))
            .collect::<CResult<Vec<_>>>()?;
        let ret = machine_ty(&self.ret_type, def.span)?;
        debug!(
            "compiled '{}': {} blocks, {} values",
            def.name,
            self.blocks.len(),
            self.value_types.len()
        );
        Ok(CompiledFunction {
            ir: FunctionIr {
                name: def.name.clone(),
                params,
                ret,
                blocks: self.blocks,
                value_types: self.value_types,
                reflective: self.reflective,
            },
            param_types: self.param_types,
            ret_type: self.ret_type,
        })
    }

    fn current_block(&mut self) -> &mut Block {
        &mut self.blocks[self.current]
    }

    fn check_open(&mut self, span: Option<Span>) -> CResult<()> {
        if self.blocks[self.current].terminator.is_some() {
            return Err(CompileError::terminator(
                self.blocks[self.current].name.clone(),
                "statement after terminator",
                span,
            ));
        }
        Ok(())
    }
}

impl<R: Resolver> StatementContext for FunctionCompiler<'_, R> {
    fn define_variable(
        &mut self,
        name: &str,
        _node: NodeId,
        value: ValueId,
        ty: TypeInfo,
        span: Option<Span>,
    ) -> CResult<()> {
        // Flat uniqueness across parameters and every block's variables
        if !self.value_names.insert(name.to_string()) {
            return Err(CompileError::duplicate("variable", name, span));
        }
        self.block_locals[self.current].insert(name.to_string(), (value, ty));
        Ok(())
    }

    fn lookup_variable(&self, name: &str) -> Option<(ValueId, TypeInfo)> {
        self.block_locals[self.current]
            .get(name)
            .or_else(|| self.function_scope.get(name))
            .cloned()
    }

    fn fresh_value(&mut self, ty: Ty) -> ValueId {
        let v = ValueId(self.value_types.len() as u32);
        self.value_types.push(ty);
        v
    }

    fn add_instruction(&mut self, op: Op, span: Option<Span>) -> CResult<()> {
        self.check_open(span)?;
        self.current_block().ops.push(SpannedOp { op, span });
        Ok(())
    }

    fn add_terminator(&mut self, term: PendingTerminator, span: Option<Span>) -> CResult<()> {
        self.check_open(span)?;
        let block = self.current;
        let terminator = match term {
            PendingTerminator::Return { value } => Terminator::Return { value },
            PendingTerminator::Branch { target } => {
                self.deferred.branches.push(DeferredBranch { block, target, span });
                Terminator::Jump { target: Label::PENDING }
            }
            PendingTerminator::CondBranch { cond, then_target, else_target } => {
                self.deferred.cond_branches.push(DeferredCondBranch {
                    block,
                    then_target,
                    else_target,
                    span,
                });
                Terminator::CondBranch {
                    cond,
                    then_target: Label::PENDING,
                    else_target: Label::PENDING,
                }
            }
        };
        self.current_block().terminator = Some(SpannedTerminator { terminator, span });
        Ok(())
    }

    fn add_phi(
        &mut self,
        dst: ValueId,
        ty: Ty,
        incomings: Vec<(String, String)>,
        span: Option<Span>,
    ) -> CResult<()> {
        self.check_open(span)?;
        let block = self.current;
        let op = self.blocks[block].ops.len();
        self.deferred.phis.push(DeferredPhi { block, op, ty, incomings, span });
        self.blocks[block].ops.push(SpannedOp {
            op: Op::Phi { dst, ty, incomings: Vec::new() },
            span,
        });
        Ok(())
    }

    fn note_reflective(&mut self, op: ReflectOp, span: Option<Span>) -> CResult<()> {
        if !self.allow_reflective {
            return Err(CompileError::CompileTimeOnly {
                name: op.name().to_string(),
                span,
            });
        }
        self.reflective.insert(op.name());
        Ok(())
    }

    fn function_return_type(&self) -> &TypeInfo {
        &self.ret_type
    }
}

fn ty_name(ty: Ty) -> String {
    match ty {
        Ty::Int(w) => format!("(int {})", w),
        Ty::Ptr => "(ptr)".to_string(),
    }
}
