//! Type compiler
//!
//! Resolves type-constructor expressions to concrete machine types. The
//! vocabulary is `int(width)`, `ptr()`, and
//! `function_signature(arg-type-list, return-type)`. A bare identifier is a
//! 0-ary constructor application.

use std::fmt;

use crate::error::{CResult, CompileError};
use crate::node::{NodeArena, NodeId, NodeKind};
use crate::resolve::Resolver;
use crate::span::Span;

pub const MAX_BIT_WIDTH: u16 = 1024;

/// A resolved type plus the node it came from (diagnostics only)
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub kind: TypeKind,
    /// Originating type expression; never inspected after construction
    pub origin: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    /// Two's-complement integer of the given bit width
    Int(u16),
    /// Opaque pointer (pointer-to-byte, reinterpreted at use sites)
    Ptr,
    /// Function signature owning its component types
    Signature {
        params: Vec<TypeInfo>,
        ret: Box<TypeInfo>,
    },
}

// Signatures compare structurally through TypeInfo, so TypeKind's derived
// PartialEq needs TypeInfo equality to ignore `origin`.
impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for TypeInfo {}

impl TypeInfo {
    pub fn int(width: u16, origin: NodeId) -> Self {
        TypeInfo {
            kind: TypeKind::Int(width),
            origin,
        }
    }

    pub fn ptr(origin: NodeId) -> Self {
        TypeInfo {
            kind: TypeKind::Ptr,
            origin,
        }
    }

    /// The boolean type: a 1-bit integer
    pub fn is_bool(&self) -> bool {
        self.kind == TypeKind::Int(1)
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind, TypeKind::Int(_))
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Int(w) => write!(f, "(int {})", w),
            TypeKind::Ptr => write!(f, "(ptr)"),
            TypeKind::Signature { params, ret } => {
                write!(f, "(function_signature (")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") {})", ret)
            }
        }
    }
}

/// Compile a type expression to a [`TypeInfo`].
///
/// The head identifier is passed through the resolver before matching, so a
/// reference linked to `int` elsewhere still names the constructor.
pub fn compile_type<R: Resolver>(
    arena: &NodeArena,
    resolver: &R,
    expr: NodeId,
) -> CResult<TypeInfo> {
    let resolved = resolver.resolve(arena, expr)?;
    match arena.kind(resolved) {
        NodeKind::Reference { name, .. } => {
            apply_constructor(arena, resolver, expr, name.clone(), &[])
        }
        NodeKind::List(children) => {
            let Some((&head, args)) = children.split_first() else {
                return Err(CompileError::shape(
                    "type constructor",
                    "empty list",
                    arena.span(resolved),
                ));
            };
            let head = resolver.resolve(arena, head)?;
            let name = match arena.kind(head) {
                NodeKind::Reference { name, .. } => name.clone(),
                other => {
                    return Err(CompileError::shape(
                        "constructor identifier",
                        other.kind_name(),
                        arena.span(head).or_else(|| arena.span(resolved)),
                    ))
                }
            };
            apply_constructor(arena, resolver, expr, name, args)
        }
        other => Err(CompileError::shape(
            "type expression",
            other.kind_name(),
            arena.span(expr),
        )),
    }
}

fn apply_constructor<R: Resolver>(
    arena: &NodeArena,
    resolver: &R,
    origin: NodeId,
    name: String,
    args: &[NodeId],
) -> CResult<TypeInfo> {
    let span = arena.span(origin);
    match name.as_str() {
        "int" => {
            if args.len() != 1 {
                return Err(CompileError::arity("int", 1, args.len(), span));
            }
            let width = compile_bit_width(arena, args[0])?;
            Ok(TypeInfo::int(width, origin))
        }
        "ptr" => {
            if !args.is_empty() {
                return Err(CompileError::arity("ptr", 0, args.len(), span));
            }
            Ok(TypeInfo::ptr(origin))
        }
        "function_signature" => {
            if args.len() != 2 {
                return Err(CompileError::arity("function_signature", 2, args.len(), span));
            }
            let params_node = resolver.resolve(arena, args[0])?;
            let NodeKind::List(param_exprs) = arena.kind(params_node) else {
                return Err(CompileError::shape(
                    "argument type list",
                    arena.kind(params_node).kind_name(),
                    arena.span(args[0]),
                ));
            };
            let params = param_exprs
                .iter()
                .map(|&p| compile_type(arena, resolver, p))
                .collect::<CResult<Vec<_>>>()?;
            let ret = compile_type(arena, resolver, args[1])?;
            Ok(TypeInfo {
                kind: TypeKind::Signature {
                    params,
                    ret: Box::new(ret),
                },
                origin,
            })
        }
        _ => Err(CompileError::UnknownConstructor { name, span }),
    }
}

/// Parse an `int` width argument: a plain positive base-10 literal in
/// 1..=1024. Anything else is fatal, never clamped.
fn compile_bit_width(arena: &NodeArena, node: NodeId) -> CResult<u16> {
    let span = arena.span(node);
    let NodeKind::Literal(bytes) = arena.kind(node) else {
        return Err(CompileError::shape(
            "width literal",
            arena.kind(node).kind_name(),
            span,
        ));
    };
    let text = String::from_utf8_lossy(bytes).into_owned();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CompileError::BadBitWidth { text, span });
    }
    match text.parse::<u32>() {
        Ok(w) if (1..=MAX_BIT_WIDTH as u32).contains(&w) => Ok(w as u16),
        _ => Err(CompileError::BadBitWidth { text, span }),
    }
}
