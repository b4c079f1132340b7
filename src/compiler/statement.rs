//! Statement compiler
//!
//! Compiles one statement, `[let NAME] constructor args...`, into a typed
//! operation or terminator. The constructor is either a bare identifier
//! (`branch`, `list_create`) or a list carrying constructor arguments such as
//! the operand type (`(add (int 64))`, `(cmp eq (int 64))`). Block wiring is
//! not done here: branch targets and phi incomings are handed to the
//! surrounding context by name and resolved after every block exists.

use smallvec::SmallVec;

use crate::error::{CResult, CompileError};
use crate::ir::{BinOp, CmpKind, Op, ReflectOp, Ty, ValueId};
use crate::node::{NodeArena, NodeId, NodeKind};
use crate::resolve::Resolver;
use crate::span::Span;
use crate::types::{compile_type, TypeInfo, TypeKind};

/// A block-ending instruction with targets still held by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTerminator {
    Return {
        value: ValueId,
    },
    Branch {
        target: String,
    },
    CondBranch {
        cond: ValueId,
        then_target: String,
        else_target: String,
    },
}

/// Collaborator surface the statement compiler works against. The function
/// compiler implements this per block under compilation.
pub trait StatementContext {
    /// Bind `name` to a value. Fails on any duplicate within the function.
    fn define_variable(
        &mut self,
        name: &str,
        node: NodeId,
        value: ValueId,
        ty: TypeInfo,
        span: Option<Span>,
    ) -> CResult<()>;

    /// Current-block locals first, then the function scope
    fn lookup_variable(&self, name: &str) -> Option<(ValueId, TypeInfo)>;

    /// Allocate the next SSA value of the given machine type
    fn fresh_value(&mut self, ty: Ty) -> ValueId;

    fn add_instruction(&mut self, op: Op, span: Option<Span>) -> CResult<()>;

    fn add_terminator(&mut self, term: PendingTerminator, span: Option<Span>) -> CResult<()>;

    /// Record a phi whose incomings are `(variable, block)` name pairs
    fn add_phi(
        &mut self,
        dst: ValueId,
        ty: Ty,
        incomings: Vec<(String, String)>,
        span: Option<Span>,
    ) -> CResult<()>;

    /// Record use of a compile-time-only instruction
    fn note_reflective(&mut self, op: ReflectOp, span: Option<Span>) -> CResult<()>;

    fn function_return_type(&self) -> &TypeInfo;
}

/// Lower a [`TypeInfo`] to a machine value type. Signatures have no value
/// representation and are rejected here.
pub(crate) fn machine_ty(ty: &TypeInfo, span: Option<Span>) -> CResult<Ty> {
    match &ty.kind {
        TypeKind::Int(w) => Ok(Ty::Int(*w)),
        TypeKind::Ptr => Ok(Ty::Ptr),
        TypeKind::Signature { .. } => Err(CompileError::shape(
            "value type",
            format!("{}", ty),
            span,
        )),
    }
}

/// Compile one statement against `ctx`.
pub fn compile_statement<R: Resolver, C: StatementContext>(
    arena: &NodeArena,
    resolver: &R,
    ctx: &mut C,
    stmt: NodeId,
) -> CResult<()> {
    let span = arena.span(stmt);
    let resolved = resolver.resolve(arena, stmt)?;
    let NodeKind::List(children) = arena.kind(resolved) else {
        return Err(CompileError::shape(
            "statement list",
            arena.kind(resolved).kind_name(),
            span,
        ));
    };

    // Optional `let NAME` prefix. The binder name is never resolved.
    let (binding, rest) = match children.first() {
        Some(&head) if is_named(arena, head, "let") => {
            let Some(&name_node) = children.get(1) else {
                return Err(CompileError::shape("binding name after let", "nothing", span));
            };
            let NodeKind::Reference { name, .. } = arena.kind(name_node) else {
                return Err(CompileError::shape(
                    "binding name after let",
                    arena.kind(name_node).kind_name(),
                    arena.span(name_node).or(span),
                ));
            };
            (Some((name.clone(), name_node)), &children[2..])
        }
        _ => (None, &children[..]),
    };

    let Some((&ctor_node, args)) = rest.split_first() else {
        return Err(CompileError::shape("instruction constructor", "nothing", span));
    };

    let (name, ctor_args) = parse_constructor(arena, resolver, ctor_node)?;
    let result = compile_instruction(arena, resolver, ctx, &name, ctor_node, ctor_args, args, span)?;

    match (binding, result) {
        (Some((name, node)), Some((value, ty))) => {
            ctx.define_variable(&name, node, value, ty, span)
        }
        (None, None) => Ok(()),
        (Some((name, _)), None) => Err(CompileError::binding(
            format!("cannot bind '{}': instruction produces no value", name),
            span,
        )),
        (None, Some(_)) => Err(CompileError::binding(
            "instruction result must be bound with let".to_string(),
            span,
        )),
    }
}

fn is_named(arena: &NodeArena, node: NodeId, name: &str) -> bool {
    matches!(arena.kind(node), NodeKind::Reference { name: n, .. } if n == name)
}

/// Split a constructor into its identifier and constructor arguments
fn parse_constructor<'a, R: Resolver>(
    arena: &'a NodeArena,
    resolver: &R,
    node: NodeId,
) -> CResult<(String, &'a [NodeId])> {
    let resolved = resolver.resolve(arena, node)?;
    match arena.kind(resolved) {
        NodeKind::Reference { name, .. } => Ok((name.clone(), &[])),
        NodeKind::List(children) => {
            let Some((&head, ctor_args)) = children.split_first() else {
                return Err(CompileError::shape(
                    "instruction constructor",
                    "empty list",
                    arena.span(resolved),
                ));
            };
            let head = resolver.resolve(arena, head)?;
            match arena.kind(head) {
                NodeKind::Reference { name, .. } => Ok((name.clone(), ctor_args)),
                other => Err(CompileError::shape(
                    "instruction identifier",
                    other.kind_name(),
                    arena.span(head).or_else(|| arena.span(resolved)),
                )),
            }
        }
        other => Err(CompileError::shape(
            "instruction constructor",
            other.kind_name(),
            arena.span(node),
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_instruction<R: Resolver, C: StatementContext>(
    arena: &NodeArena,
    resolver: &R,
    ctx: &mut C,
    name: &str,
    ctor_node: NodeId,
    ctor_args: &[NodeId],
    args: &[NodeId],
    span: Option<Span>,
) -> CResult<Option<(ValueId, TypeInfo)>> {
    if let Some(op) = BinOp::from_name(name) {
        let ty = one_type_arg(arena, resolver, name, ctor_args, span)?;
        if !ty.is_int() {
            return Err(CompileError::type_mismatch("integer type", format!("{}", ty), span));
        }
        check_arity(name, 2, args.len(), span)?;
        let mty = machine_ty(&ty, span)?;
        let lhs = compile_operand(arena, resolver, ctx, args[0], &ty)?;
        let rhs = compile_operand(arena, resolver, ctx, args[1], &ty)?;
        let dst = ctx.fresh_value(mty);
        ctx.add_instruction(Op::Bin { dst, op, ty: mty, lhs, rhs }, span)?;
        return Ok(Some((dst, ty)));
    }

    if let Some(op) = ReflectOp::from_name(name) {
        return compile_reflective(arena, resolver, ctx, op, ctor_node, ctor_args, args, span);
    }

    match name {
        "cmp" => {
            if ctor_args.len() != 2 {
                return Err(CompileError::arity("cmp constructor", 2, ctor_args.len(), span));
            }
            let kind_node = resolver.resolve(arena, ctor_args[0])?;
            let kind = match arena.kind(kind_node) {
                NodeKind::Reference { name, .. } => CmpKind::from_name(name).ok_or_else(|| {
                    CompileError::shape(
                        "comparison kind (eq ne lt le gt ge)",
                        name.clone(),
                        arena.span(kind_node).or(span),
                    )
                })?,
                other => {
                    return Err(CompileError::shape(
                        "comparison kind",
                        other.kind_name(),
                        arena.span(kind_node).or(span),
                    ))
                }
            };
            let ty = compile_type(arena, resolver, ctor_args[1])?;
            if !ty.is_int() {
                return Err(CompileError::type_mismatch("integer type", format!("{}", ty), span));
            }
            check_arity("cmp", 2, args.len(), span)?;
            let mty = machine_ty(&ty, span)?;
            let lhs = compile_operand(arena, resolver, ctx, args[0], &ty)?;
            let rhs = compile_operand(arena, resolver, ctx, args[1], &ty)?;
            let dst = ctx.fresh_value(Ty::BOOL);
            ctx.add_instruction(Op::Cmp { dst, kind, ty: mty, lhs, rhs }, span)?;
            Ok(Some((dst, TypeInfo::int(1, ctor_node))))
        }

        "alloc" => {
            let ty = one_type_arg(arena, resolver, "alloc", ctor_args, span)?;
            check_arity("alloc", 0, args.len(), span)?;
            let mty = machine_ty(&ty, span)?;
            let dst = ctx.fresh_value(Ty::Ptr);
            ctx.add_instruction(Op::Alloc { dst, ty: mty }, span)?;
            Ok(Some((dst, TypeInfo::ptr(ctor_node))))
        }

        "store" => {
            let ty = one_type_arg(arena, resolver, "store", ctor_args, span)?;
            check_arity("store", 2, args.len(), span)?;
            let mty = machine_ty(&ty, span)?;
            let value = compile_operand(arena, resolver, ctx, args[0], &ty)?;
            let ptr_ty = TypeInfo::ptr(ctor_node);
            let ptr = compile_operand(arena, resolver, ctx, args[1], &ptr_ty)?;
            ctx.add_instruction(Op::Store { ty: mty, value, ptr }, span)?;
            Ok(None)
        }

        "load" => {
            let ty = one_type_arg(arena, resolver, "load", ctor_args, span)?;
            check_arity("load", 1, args.len(), span)?;
            let mty = machine_ty(&ty, span)?;
            let ptr_ty = TypeInfo::ptr(ctor_node);
            let ptr = compile_operand(arena, resolver, ctx, args[0], &ptr_ty)?;
            let dst = ctx.fresh_value(mty);
            ctx.add_instruction(Op::Load { dst, ty: mty, ptr }, span)?;
            Ok(Some((dst, ty)))
        }

        "branch" => {
            no_ctor_args("branch", ctor_args, span)?;
            check_arity("branch", 1, args.len(), span)?;
            let target = block_name(arena, args[0], span)?;
            ctx.add_terminator(PendingTerminator::Branch { target }, span)?;
            Ok(None)
        }

        "cond_branch" => {
            no_ctor_args("cond_branch", ctor_args, span)?;
            check_arity("cond_branch", 3, args.len(), span)?;
            let bool_ty = TypeInfo::int(1, ctor_node);
            let cond = compile_operand(arena, resolver, ctx, args[0], &bool_ty)?;
            let then_target = block_name(arena, args[1], span)?;
            let else_target = block_name(arena, args[2], span)?;
            ctx.add_terminator(
                PendingTerminator::CondBranch { cond, then_target, else_target },
                span,
            )?;
            Ok(None)
        }

        "phi" => {
            let ty = one_type_arg(arena, resolver, "phi", ctor_args, span)?;
            if args.is_empty() {
                return Err(CompileError::arity("phi", 1, 0, span));
            }
            let mty = machine_ty(&ty, span)?;
            let mut incomings = Vec::with_capacity(args.len());
            for &arg in args {
                let pair = resolver.resolve(arena, arg)?;
                let NodeKind::List(items) = arena.kind(pair) else {
                    return Err(CompileError::shape(
                        "phi incoming (variable block) pair",
                        arena.kind(pair).kind_name(),
                        arena.span(arg).or(span),
                    ));
                };
                if items.len() != 2 {
                    return Err(CompileError::arity(
                        "phi incoming pair",
                        2,
                        items.len(),
                        arena.span(arg).or(span),
                    ));
                }
                let var = block_name(arena, items[0], span)?;
                let block = block_name(arena, items[1], span)?;
                incomings.push((var, block));
            }
            let dst = ctx.fresh_value(mty);
            ctx.add_phi(dst, mty, incomings, span)?;
            Ok(Some((dst, ty)))
        }

        "return" => {
            let ty = one_type_arg(arena, resolver, "return", ctor_args, span)?;
            check_arity("return", 1, args.len(), span)?;
            let expected = ctx.function_return_type().clone();
            if ty != expected {
                return Err(CompileError::type_mismatch(
                    format!("{}", expected),
                    format!("{}", ty),
                    span,
                ));
            }
            let value = compile_operand(arena, resolver, ctx, args[0], &ty)?;
            ctx.add_terminator(PendingTerminator::Return { value }, span)?;
            Ok(None)
        }

        "call" => Err(CompileError::ReservedInstruction {
            name: "call".to_string(),
            span,
        }),

        _ => Err(CompileError::UnknownInstruction {
            name: name.to_string(),
            span,
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_reflective<R: Resolver, C: StatementContext>(
    arena: &NodeArena,
    resolver: &R,
    ctx: &mut C,
    op: ReflectOp,
    ctor_node: NodeId,
    ctor_args: &[NodeId],
    args: &[NodeId],
    span: Option<Span>,
) -> CResult<Option<(ValueId, TypeInfo)>> {
    no_ctor_args(op.name(), ctor_args, span)?;
    check_arity(op.name(), op.arity(), args.len(), span)?;
    ctx.note_reflective(op, span)?;

    let mut values = SmallVec::new();
    for &arg in args {
        // Every reflective operand is an index or byte, both (int 64)
        let index_ty = TypeInfo::int(64, arg);
        values.push(compile_operand(arena, resolver, ctx, arg, &index_ty)?);
    }
    let result = match op.result() {
        Some(ty) => {
            let dst = ctx.fresh_value(ty);
            ctx.add_instruction(Op::Reflect { dst: Some(dst), op, args: values }, span)?;
            let info = match ty {
                Ty::Int(w) => TypeInfo::int(w, ctor_node),
                Ty::Ptr => TypeInfo::ptr(ctor_node),
            };
            Some((dst, info))
        }
        None => {
            ctx.add_instruction(Op::Reflect { dst: None, op, args: values }, span)?;
            None
        }
    };
    Ok(result)
}

/// Compile one argument expression to a value of exactly `expected` type.
/// References must already be bound; literals must parse into the type.
fn compile_operand<R: Resolver, C: StatementContext>(
    arena: &NodeArena,
    resolver: &R,
    ctx: &mut C,
    node: NodeId,
    expected: &TypeInfo,
) -> CResult<ValueId> {
    let span = arena.span(node);
    match arena.kind(node) {
        NodeKind::Reference { name, .. } => {
            let (value, ty) = ctx
                .lookup_variable(name)
                .ok_or_else(|| CompileError::undefined(name.clone(), span))?;
            if &ty != expected {
                return Err(CompileError::type_mismatch(
                    format!("{}", expected),
                    format!("{}", ty),
                    span,
                ));
            }
            Ok(value)
        }
        NodeKind::Literal(bytes) => {
            let TypeKind::Int(width) = expected.kind else {
                return Err(CompileError::type_mismatch(
                    format!("{}", expected),
                    "literal",
                    span,
                ));
            };
            let text = String::from_utf8_lossy(bytes).into_owned();
            let bits = parse_int_literal(&text, width, span)?;
            let mty = Ty::Int(width);
            let dst = ctx.fresh_value(mty);
            ctx.add_instruction(Op::Const { dst, ty: mty, bits }, span)?;
            Ok(dst)
        }
        other => {
            // A linked reference may point at a value-producing node later;
            // today only direct references and literals are operands.
            let resolved = resolver.resolve(arena, node)?;
            if resolved != node {
                return compile_operand(arena, resolver, ctx, resolved, expected);
            }
            Err(CompileError::shape("operand", other.kind_name(), span))
        }
    }
}

/// Parse a base-10 integer literal into width-masked bits. Strict: optional
/// leading '-', digits only, no trailing characters, and the value must lie
/// in [-(2^(w-1)), 2^w - 1]. Violations are fatal, never truncated.
pub(crate) fn parse_int_literal(text: &str, width: u16, span: Option<Span>) -> CResult<u64> {
    let body = text.strip_prefix('-').unwrap_or(text);
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CompileError::bad_literal(
            text,
            "not a base-10 integer",
            span,
        ));
    }
    let value: i128 = text
        .parse()
        .map_err(|_| CompileError::bad_literal(text, "does not fit in 128 bits", span))?;

    // For widths above 127 the i128 parse above already bounds the value
    // inside [-(2^(w-1)), 2^w - 1].
    if width <= 127 {
        let min = -(1i128 << (width - 1));
        let max = (1u128 << width) - 1;
        let in_range = if value < 0 {
            value >= min
        } else {
            (value as u128) <= max
        };
        if !in_range {
            return Err(CompileError::bad_literal(
                text,
                format!("out of range for (int {})", width),
                span,
            ));
        }
    }

    // The constant payload holds 64 bits. Wide types admit larger values,
    // but those cannot be encoded and are rejected rather than truncated.
    if width > 64 {
        let fits = if value < 0 {
            value >= i64::MIN as i128
        } else {
            value <= u64::MAX as i128
        };
        if !fits {
            return Err(CompileError::bad_literal(
                text,
                "exceeds the 64-bit constant encoding",
                span,
            ));
        }
    }

    let bits = value as u64;
    Ok(if width < 64 {
        bits & ((1u64 << width) - 1)
    } else {
        bits
    })
}

fn one_type_arg<R: Resolver>(
    arena: &NodeArena,
    resolver: &R,
    what: &str,
    ctor_args: &[NodeId],
    span: Option<Span>,
) -> CResult<TypeInfo> {
    if ctor_args.len() != 1 {
        return Err(CompileError::arity(
            format!("{} constructor", what),
            1,
            ctor_args.len(),
            span,
        ));
    }
    compile_type(arena, resolver, ctor_args[0])
}

fn no_ctor_args(what: &str, ctor_args: &[NodeId], span: Option<Span>) -> CResult<()> {
    if ctor_args.is_empty() {
        Ok(())
    } else {
        Err(CompileError::arity(
            format!("{} constructor", what),
            0,
            ctor_args.len(),
            span,
        ))
    }
}

fn check_arity(what: &str, expected: usize, got: usize, span: Option<Span>) -> CResult<()> {
    if expected == got {
        Ok(())
    } else {
        Err(CompileError::arity(what, expected, got, span))
    }
}

/// A name used as a block or variable reference inside a control instruction
fn block_name(arena: &NodeArena, node: NodeId, span: Option<Span>) -> CResult<String> {
    match arena.kind(node) {
        NodeKind::Reference { name, .. } => Ok(name.clone()),
        other => Err(CompileError::shape(
            "name",
            other.kind_name(),
            arena.span(node).or(span),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::LinkResolver;
    use rustc_hash::FxHashMap;

    /// Records everything the statement compiler emits
    struct Recorder {
        vars: FxHashMap<String, (ValueId, TypeInfo)>,
        value_types: Vec<Ty>,
        ops: Vec<Op>,
        terminators: Vec<PendingTerminator>,
        phis: Vec<(ValueId, Ty, Vec<(String, String)>)>,
        reflective: Vec<ReflectOp>,
        ret: TypeInfo,
    }

    impl Recorder {
        fn new() -> Self {
            Recorder {
                vars: FxHashMap::default(),
                value_types: Vec::new(),
                ops: Vec::new(),
                terminators: Vec::new(),
                phis: Vec::new(),
                reflective: Vec::new(),
                ret: TypeInfo::int(64, NodeId(0)),
            }
        }

        fn with_var(mut self, name: &str, width: u16) -> Self {
            let v = ValueId(self.value_types.len() as u32);
            self.value_types.push(Ty::Int(width));
            self.vars
                .insert(name.to_string(), (v, TypeInfo::int(width, NodeId(0))));
            self
        }
    }

    impl StatementContext for Recorder {
        fn define_variable(
            &mut self,
            name: &str,
            _node: NodeId,
            value: ValueId,
            ty: TypeInfo,
            span: Option<Span>,
        ) -> CResult<()> {
            if self.vars.contains_key(name) {
                return Err(CompileError::duplicate("variable", name, span));
            }
            self.vars.insert(name.to_string(), (value, ty));
            Ok(())
        }

        fn lookup_variable(&self, name: &str) -> Option<(ValueId, TypeInfo)> {
            self.vars.get(name).cloned()
        }

        fn fresh_value(&mut self, ty: Ty) -> ValueId {
            let v = ValueId(self.value_types.len() as u32);
            self.value_types.push(ty);
            v
        }

        fn add_instruction(&mut self, op: Op, _span: Option<Span>) -> CResult<()> {
            self.ops.push(op);
            Ok(())
        }

        fn add_terminator(&mut self, term: PendingTerminator, _span: Option<Span>) -> CResult<()> {
            self.terminators.push(term);
            Ok(())
        }

        fn add_phi(
            &mut self,
            dst: ValueId,
            ty: Ty,
            incomings: Vec<(String, String)>,
            _span: Option<Span>,
        ) -> CResult<()> {
            self.phis.push((dst, ty, incomings));
            Ok(())
        }

        fn note_reflective(&mut self, op: ReflectOp, _span: Option<Span>) -> CResult<()> {
            self.reflective.push(op);
            Ok(())
        }

        fn function_return_type(&self) -> &TypeInfo {
            &self.ret
        }
    }

    fn int_ty(arena: &mut NodeArena, width: &str) -> NodeId {
        let head = arena.reference("int");
        let w = arena.literal(width.as_bytes().to_vec());
        arena.list(vec![head, w])
    }

    /// `[let NAME] (op (int W)) a b`
    fn bin_stmt(
        arena: &mut NodeArena,
        bind: Option<&str>,
        op: &str,
        width: &str,
        a: &str,
        b: &str,
    ) -> NodeId {
        let head = arena.reference(op);
        let ty = int_ty(arena, width);
        let ctor = arena.list(vec![head, ty]);
        let ra = arena.reference(a);
        let rb = arena.reference(b);
        let mut children = Vec::new();
        if let Some(name) = bind {
            let kw = arena.reference("let");
            let n = arena.reference(name);
            children.push(kw);
            children.push(n);
        }
        children.extend([ctor, ra, rb]);
        arena.list(children)
    }

    #[test]
    fn test_add_binds_result() {
        let mut arena = NodeArena::new();
        let stmt = bin_stmt(&mut arena, Some("x"), "add", "64", "a", "b");
        let mut ctx = Recorder::new().with_var("a", 64).with_var("b", 64);
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();

        let (x, ty) = ctx.lookup_variable("x").expect("x bound");
        assert_eq!(ty.kind, TypeKind::Int(64));
        assert!(matches!(
            ctx.ops.as_slice(),
            [Op::Bin { dst, op: BinOp::Add, ty: Ty::Int(64), .. }] if *dst == x
        ));
    }

    #[test]
    fn test_operand_width_mismatch() {
        let mut arena = NodeArena::new();
        let stmt = bin_stmt(&mut arena, Some("x"), "add", "64", "a", "b");
        let mut ctx = Recorder::new().with_var("a", 32).with_var("b", 64);
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));
    }

    #[test]
    fn test_result_requires_let() {
        let mut arena = NodeArena::new();
        let stmt = bin_stmt(&mut arena, None, "add", "64", "a", "b");
        let mut ctx = Recorder::new().with_var("a", 64).with_var("b", 64);
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::Binding { .. }));
    }

    #[test]
    fn test_let_on_void_instruction() {
        // let x (store (int 64)) v p
        let mut arena = NodeArena::new();
        let kw = arena.reference("let");
        let name = arena.reference("x");
        let head = arena.reference("store");
        let ty = int_ty(&mut arena, "64");
        let ctor = arena.list(vec![head, ty]);
        let v = arena.reference("v");
        let p = arena.reference("p");
        let stmt = arena.list(vec![kw, name, ctor, v, p]);

        let mut ctx = Recorder::new().with_var("v", 64);
        let pv = ctx.fresh_value(Ty::Ptr);
        ctx.vars
            .insert("p".to_string(), (pv, TypeInfo::ptr(NodeId(0))));
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::Binding { .. }));
    }

    #[test]
    fn test_literal_operand() {
        let mut arena = NodeArena::new();
        let head = arena.reference("add");
        let ty = int_ty(&mut arena, "8");
        let ctor = arena.list(vec![head, ty]);
        let a = arena.reference("a");
        let lit = arena.literal(b"-1".to_vec());
        let kw = arena.reference("let");
        let name = arena.reference("x");
        let stmt = arena.list(vec![kw, name, ctor, a, lit]);

        let mut ctx = Recorder::new().with_var("a", 8);
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        // The literal materializes as a masked constant before the add
        assert!(matches!(
            ctx.ops[0],
            Op::Const { ty: Ty::Int(8), bits: 0xff, .. }
        ));
    }

    #[test]
    fn test_literal_out_of_range() {
        for text in ["256", "-129", "12x", "", "0x10"] {
            let mut arena = NodeArena::new();
            let head = arena.reference("add");
            let ty = int_ty(&mut arena, "8");
            let ctor = arena.list(vec![head, ty]);
            let a = arena.reference("a");
            let lit = arena.literal(text.as_bytes().to_vec());
            let kw = arena.reference("let");
            let name = arena.reference("x");
            let stmt = arena.list(vec![kw, name, ctor, a, lit]);

            let mut ctx = Recorder::new().with_var("a", 8);
            let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
            assert!(
                matches!(err, CompileError::BadLiteral { .. }),
                "literal {:?} gave {:?}",
                text,
                err
            );
        }
    }

    #[test]
    fn test_cmp_produces_bool() {
        let mut arena = NodeArena::new();
        let head = arena.reference("cmp");
        let kind = arena.reference("lt");
        let ty = int_ty(&mut arena, "64");
        let ctor = arena.list(vec![head, kind, ty]);
        let a = arena.reference("a");
        let b = arena.reference("b");
        let kw = arena.reference("let");
        let name = arena.reference("c");
        let stmt = arena.list(vec![kw, name, ctor, a, b]);

        let mut ctx = Recorder::new().with_var("a", 64).with_var("b", 64);
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        let (_, ty) = ctx.lookup_variable("c").unwrap();
        assert!(ty.is_bool());
    }

    #[test]
    fn test_cond_branch_requires_bool() {
        let mut arena = NodeArena::new();
        let head = arena.reference("cond_branch");
        let c = arena.reference("c");
        let t = arena.reference("yes");
        let e = arena.reference("no");
        let stmt = arena.list(vec![head, c, t, e]);

        let mut ctx = Recorder::new().with_var("c", 64);
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::TypeMismatch { .. }));

        let mut ctx = Recorder::new().with_var("c", 1);
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        assert_eq!(
            ctx.terminators,
            vec![PendingTerminator::CondBranch {
                cond: ValueId(0),
                then_target: "yes".to_string(),
                else_target: "no".to_string(),
            }]
        );
    }

    #[test]
    fn test_phi_records_named_incomings() {
        let mut arena = NodeArena::new();
        let head = arena.reference("phi");
        let ty = int_ty(&mut arena, "64");
        let ctor = arena.list(vec![head, ty]);
        let y = arena.reference("y");
        let b2 = arena.reference("b2");
        let p1 = arena.list(vec![y, b2]);
        let z = arena.reference("z");
        let b3 = arena.reference("b3");
        let p2 = arena.list(vec![z, b3]);
        let kw = arena.reference("let");
        let name = arena.reference("m");
        let stmt = arena.list(vec![kw, name, ctor, p1, p2]);

        let mut ctx = Recorder::new();
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        assert_eq!(ctx.phis.len(), 1);
        let (_, ty, incomings) = &ctx.phis[0];
        assert_eq!(*ty, Ty::Int(64));
        assert_eq!(
            incomings,
            &vec![
                ("y".to_string(), "b2".to_string()),
                ("z".to_string(), "b3".to_string())
            ]
        );
    }

    #[test]
    fn test_call_is_reserved() {
        let mut arena = NodeArena::new();
        let head = arena.reference("call");
        let f = arena.reference("f");
        let stmt = arena.list(vec![head, f]);
        let mut ctx = Recorder::new();
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::ReservedInstruction { .. }));
    }

    #[test]
    fn test_unknown_instruction() {
        let mut arena = NodeArena::new();
        let head = arena.reference("frobnicate");
        let stmt = arena.list(vec![head]);
        let mut ctx = Recorder::new();
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::UnknownInstruction { .. }));
    }

    #[test]
    fn test_reflective_is_noted() {
        let mut arena = NodeArena::new();
        let head = arena.reference("list_create");
        let kw = arena.reference("let");
        let name = arena.reference("l");
        let stmt = arena.list(vec![kw, name, head]);

        let mut ctx = Recorder::new();
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        assert_eq!(ctx.reflective, vec![ReflectOp::ListCreate]);
        let (_, ty) = ctx.lookup_variable("l").unwrap();
        assert_eq!(ty.kind, TypeKind::Int(64));
    }

    #[test]
    fn test_reflective_push_is_void() {
        // (list_push) l i  -- two (int 64) operands, no result
        let mut arena = NodeArena::new();
        let head = arena.reference("list_push");
        let l = arena.reference("l");
        let i = arena.reference("i");
        let stmt = arena.list(vec![head, l, i]);

        let mut ctx = Recorder::new().with_var("l", 64).with_var("i", 64);
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        assert!(matches!(
            ctx.ops.as_slice(),
            [Op::Reflect { dst: None, op: ReflectOp::ListPush, .. }]
        ));
    }

    #[test]
    fn test_parse_int_literal_bounds() {
        assert_eq!(parse_int_literal("255", 8, None).unwrap(), 255);
        assert_eq!(parse_int_literal("-128", 8, None).unwrap(), 0x80);
        assert_eq!(parse_int_literal("1", 1, None).unwrap(), 1);
        assert_eq!(
            parse_int_literal("-1", 64, None).unwrap(),
            u64::MAX
        );
        assert!(parse_int_literal("2", 1, None).is_err());
        assert!(parse_int_literal("-2", 1, None).is_err());
        assert!(parse_int_literal("18446744073709551616", 64, None).is_err());
    }

    #[test]
    fn test_parse_int_literal_wide_widths() {
        // In range for the type but too wide for the constant payload
        assert!(parse_int_literal("18446744073709551616", 70, None).is_err());
        assert!(parse_int_literal("18446744073709551616", 128, None).is_err());
        assert!(parse_int_literal("-9223372036854775809", 128, None).is_err());
        // 64-bit-representable values still parse at wide widths
        assert_eq!(
            parse_int_literal("18446744073709551615", 128, None).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_wide_literal_rejected_not_truncated() {
        // let x (add (int 128)) a 18446744073709551616
        let mut arena = NodeArena::new();
        let head = arena.reference("add");
        let ty = int_ty(&mut arena, "128");
        let ctor = arena.list(vec![head, ty]);
        let a = arena.reference("a");
        let lit = arena.literal(b"18446744073709551616".to_vec());
        let kw = arena.reference("let");
        let name = arena.reference("x");
        let stmt = arena.list(vec![kw, name, ctor, a, lit]);

        let mut ctx = Recorder::new().with_var("a", 128);
        let err = compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap_err();
        assert!(matches!(err, CompileError::BadLiteral { .. }));
        assert!(ctx.ops.is_empty(), "no constant reached the IR");
    }

    #[test]
    fn test_reflective_result_origin() {
        // let l list_create  -- the result type points at the constructor
        let mut arena = NodeArena::new();
        let head = arena.reference("list_create");
        let kw = arena.reference("let");
        let name = arena.reference("l");
        let stmt = arena.list(vec![kw, name, head]);

        let mut ctx = Recorder::new();
        compile_statement(&arena, &LinkResolver, &mut ctx, stmt).unwrap();
        let (_, ty) = ctx.lookup_variable("l").unwrap();
        assert_eq!(ty.origin, head);
    }
}
