//! Reference resolution boundary
//!
//! The compiler core never walks scopes itself: before a head-position
//! identifier is treated as a type constructor or instruction keyword it is
//! handed to a [`Resolver`]. The surrounding toolchain supplies the real
//! scoped lookup; [`LinkResolver`] is the in-crate implementation that simply
//! follows reference links already present in the arena.

use crate::error::{CResult, CompileError};
use crate::node::{NodeArena, NodeId, NodeKind};

pub trait Resolver {
    /// Resolve `node` to the node it denotes, or an undefined-reference error.
    fn resolve(&self, arena: &NodeArena, node: NodeId) -> CResult<NodeId>;
}

/// Follows `Reference` targets to a fixpoint. A reference without a target
/// resolves to itself: builtin constructor and instruction names are plain
/// unlinked references matched by identifier.
#[derive(Debug, Default)]
pub struct LinkResolver;

impl Resolver for LinkResolver {
    fn resolve(&self, arena: &NodeArena, node: NodeId) -> CResult<NodeId> {
        let mut current = node;
        // Bounded by arena size; a longer chain means a reference cycle,
        // which scoped lookup never produces.
        for _ in 0..=arena.len() {
            match arena.kind(current) {
                NodeKind::Reference {
                    target: Some(t), ..
                } => current = *t,
                _ => return Ok(current),
            }
        }
        let name = match arena.kind(node) {
            NodeKind::Reference { name, .. } => name.clone(),
            _ => String::new(),
        };
        Err(CompileError::undefined(name, arena.span(node)))
    }
}
