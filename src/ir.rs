//! Typed basic-block IR
//!
//! The function compiler lowers statements into this form; the JIT backend
//! consumes it. Values are in SSA form (each `ValueId` assigned exactly once);
//! branch targets and phi incomings are patched by the function compiler's
//! deferred-edge pass before a `FunctionIr` is handed to the backend.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::span::Span;

/// SSA value handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Basic block label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl Label {
    /// Placeholder for a branch target still awaiting edge resolution
    pub const PENDING: Label = Label(u32::MAX);
}

/// Machine value type. Signatures never appear in value positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Int(u16),
    Ptr,
}

impl Ty {
    pub const BOOL: Ty = Ty::Int(1);
    pub const INDEX: Ty = Ty::Int(64);
}

/// Arithmetic operations (wrapping two's-complement, signed division)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Sdiv,
}

impl BinOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "add" => Some(BinOp::Add),
            "sub" => Some(BinOp::Sub),
            "mul" => Some(BinOp::Mul),
            "sdiv" => Some(BinOp::Sdiv),
            _ => None,
        }
    }
}

/// Comparison kinds, signed semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(CmpKind::Eq),
            "ne" => Some(CmpKind::Ne),
            "lt" => Some(CmpKind::Lt),
            "le" => Some(CmpKind::Le),
            "gt" => Some(CmpKind::Gt),
            "ge" => Some(CmpKind::Ge),
            _ => None,
        }
    }
}

/// Compile-time-only reflective operations over the indexed symbol table.
/// These lower to host API calls during macro execution and are rejected in
/// proc bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectOp {
    IsId,
    IsLit,
    IsRef,
    IsList,
    IsMacro,
    LitCreate,
    LitSize,
    LitGet,
    LitSet,
    LitPush,
    LitPop,
    ListCreate,
    ListSize,
    ListGet,
    ListSet,
    ListPush,
    ListPop,
}

impl ReflectOp {
    pub fn from_name(name: &str) -> Option<Self> {
        use ReflectOp::*;
        match name {
            "is_id" => Some(IsId),
            "is_lit" => Some(IsLit),
            "is_ref" => Some(IsRef),
            "is_list" => Some(IsList),
            "is_macro" => Some(IsMacro),
            "lit_create" => Some(LitCreate),
            "lit_size" => Some(LitSize),
            "lit_get" => Some(LitGet),
            "lit_set" => Some(LitSet),
            "lit_push" => Some(LitPush),
            "lit_pop" => Some(LitPop),
            "list_create" => Some(ListCreate),
            "list_size" => Some(ListSize),
            "list_get" => Some(ListGet),
            "list_set" => Some(ListSet),
            "list_push" => Some(ListPush),
            "list_pop" => Some(ListPop),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        use ReflectOp::*;
        match self {
            IsId => "is_id",
            IsLit => "is_lit",
            IsRef => "is_ref",
            IsList => "is_list",
            IsMacro => "is_macro",
            LitCreate => "lit_create",
            LitSize => "lit_size",
            LitGet => "lit_get",
            LitSet => "lit_set",
            LitPush => "lit_push",
            LitPop => "lit_pop",
            ListCreate => "list_create",
            ListSize => "list_size",
            ListGet => "list_get",
            ListSet => "list_set",
            ListPush => "list_push",
            ListPop => "list_pop",
        }
    }

    /// Number of value operands (all of type `(int 64)`)
    pub fn arity(self) -> usize {
        use ReflectOp::*;
        match self {
            LitCreate | ListCreate => 0,
            IsId | IsLit | IsRef | IsList | IsMacro | LitSize | LitPop | ListSize | ListPop => 1,
            LitGet | LitPush | ListGet | ListPush => 2,
            LitSet | ListSet => 3,
        }
    }

    /// Result type, or None for the void mutators
    pub fn result(self) -> Option<Ty> {
        use ReflectOp::*;
        match self {
            IsId | IsLit | IsRef | IsList | IsMacro => Some(Ty::BOOL),
            LitCreate | LitSize | LitGet | LitPop | ListCreate | ListSize | ListGet | ListPop => {
                Some(Ty::INDEX)
            }
            LitSet | LitPush | ListSet | ListPush => None,
        }
    }
}

/// One typed operation
#[derive(Debug, Clone)]
pub enum Op {
    /// Integer constant, bits already masked to the width
    Const { dst: ValueId, ty: Ty, bits: u64 },
    /// Arithmetic; operands and result share `ty`
    Bin {
        dst: ValueId,
        op: BinOp,
        ty: Ty,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Signed comparison; result is bool
    Cmp {
        dst: ValueId,
        kind: CmpKind,
        ty: Ty,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Stack allocation of one `ty`; dst is a pointer
    Alloc { dst: ValueId, ty: Ty },
    /// Load a `ty` through a pointer
    Load { dst: ValueId, ty: Ty, ptr: ValueId },
    /// Store a `ty` through a pointer
    Store { ty: Ty, value: ValueId, ptr: ValueId },
    /// Select a value per control-flow predecessor. Incomings are empty when
    /// emitted and filled by the deferred-edge pass.
    Phi {
        dst: ValueId,
        ty: Ty,
        incomings: Vec<(Label, ValueId)>,
    },
    /// Reflective host call (macro bodies only)
    Reflect {
        dst: Option<ValueId>,
        op: ReflectOp,
        args: SmallVec<[ValueId; 3]>,
    },
}

impl Op {
    pub fn dst(&self) -> Option<ValueId> {
        match self {
            Op::Const { dst, .. }
            | Op::Bin { dst, .. }
            | Op::Cmp { dst, .. }
            | Op::Alloc { dst, .. }
            | Op::Load { dst, .. }
            | Op::Phi { dst, .. } => Some(*dst),
            Op::Store { .. } => None,
            Op::Reflect { dst, .. } => *dst,
        }
    }
}

/// How control leaves a block. Branch targets start as [`Label::PENDING`]
/// and are patched once every block exists.
#[derive(Debug, Clone)]
pub enum Terminator {
    Return {
        value: ValueId,
    },
    Jump {
        target: Label,
    },
    CondBranch {
        cond: ValueId,
        then_target: Label,
        else_target: Label,
    },
}

/// An operation with its source location
#[derive(Debug, Clone)]
pub struct SpannedOp {
    pub op: Op,
    pub span: Option<Span>,
}

#[derive(Debug, Clone)]
pub struct SpannedTerminator {
    pub terminator: Terminator,
    pub span: Option<Span>,
}

/// A basic block: straight-line ops ending in exactly one terminator
#[derive(Debug, Clone)]
pub struct Block {
    pub label: Label,
    pub name: String,
    pub ops: Vec<SpannedOp>,
    pub terminator: Option<SpannedTerminator>,
}

impl Block {
    pub fn new(label: Label, name: impl Into<String>) -> Self {
        Block {
            label,
            name: name.into(),
            ops: Vec::new(),
            terminator: None,
        }
    }
}

/// A compiled function body ready for the code-generation backend.
/// `blocks[0]` is the entry block.
#[derive(Debug, Clone)]
pub struct FunctionIr {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub blocks: Vec<Block>,
    /// Type of every `ValueId`, indexed by its id
    pub value_types: Vec<Ty>,
    /// Names of compile-time-only instructions this body used
    pub reflective: FxHashSet<&'static str>,
}

impl FunctionIr {
    pub fn value_ty(&self, v: ValueId) -> Ty {
        self.value_types[v.0 as usize]
    }
}
