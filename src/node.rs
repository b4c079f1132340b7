//! Symbol graph: the node tree/graph data model
//!
//! An arena owns every node it creates. References and lists hold non-owning
//! `NodeId` links back into the arena, so shared substructure is cheap and a
//! reference may alias any other node. List containment must stay acyclic;
//! indexing for macro execution (see `indexed`) is only defined for acyclic
//! graphs.

use std::fmt;
use std::rc::Rc;

use crate::compiler::{MacroFn, ProcFn};
use crate::span::Span;

/// Non-owning handle to a node in a [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One AST element
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Option<Span>,
}

/// Node payload, one variant per element kind
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Opaque numeric identity
    Id(u64),
    /// Owned byte buffer
    Literal(Vec<u8>),
    /// Named node, optionally linked to another node
    Reference { name: String, target: Option<NodeId> },
    /// Ordered children
    List(Vec<NodeId>),
    /// Compile-time callable
    Macro(Rc<MacroFn>),
    /// Callable at both compile- and run-time
    Proc(Rc<ProcFn>),
}

impl NodeKind {
    /// Short kind name for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Id(_) => "id",
            NodeKind::Literal(_) => "literal",
            NodeKind::Reference { .. } => "reference",
            NodeKind::List(_) => "list",
            NodeKind::Macro(_) => "macro",
            NodeKind::Proc(_) => "proc",
        }
    }
}

/// Arena owning a set of nodes
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        NodeArena::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, kind: NodeKind, span: Option<Span>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { kind, span });
        id
    }

    pub fn id(&mut self, value: u64) -> NodeId {
        self.push(NodeKind::Id(value), None)
    }

    pub fn literal(&mut self, bytes: impl Into<Vec<u8>>) -> NodeId {
        self.push(NodeKind::Literal(bytes.into()), None)
    }

    pub fn reference(&mut self, name: impl Into<String>) -> NodeId {
        self.push(
            NodeKind::Reference {
                name: name.into(),
                target: None,
            },
            None,
        )
    }

    pub fn reference_to(&mut self, name: impl Into<String>, target: NodeId) -> NodeId {
        self.push(
            NodeKind::Reference {
                name: name.into(),
                target: Some(target),
            },
            None,
        )
    }

    pub fn list(&mut self, children: Vec<NodeId>) -> NodeId {
        self.push(NodeKind::List(children), None)
    }

    pub fn macro_node(&mut self, mac: Rc<MacroFn>) -> NodeId {
        self.push(NodeKind::Macro(mac), None)
    }

    pub fn proc_node(&mut self, proc: Rc<ProcFn>) -> NodeId {
        self.push(NodeKind::Proc(proc), None)
    }

    /// Allocate a node with an explicit span
    pub fn with_span(&mut self, id: NodeId, span: Span) -> NodeId {
        self.nodes[id.index()].span = Some(span);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn span(&self, id: NodeId) -> Option<Span> {
        self.nodes[id.index()].span
    }

    /// Move every node of `other` into this arena, never copying buffers.
    ///
    /// Returns the id offset: a node known as `NodeId(i)` in `other` is
    /// `NodeId(i + base)` here. Internal links are rewritten by the offset.
    pub fn merge(&mut self, other: NodeArena) -> u32 {
        let base = self.nodes.len() as u32;
        for mut node in other.nodes {
            match &mut node.kind {
                NodeKind::Reference {
                    target: Some(t), ..
                } => t.0 += base,
                NodeKind::List(children) => {
                    for c in children.iter_mut() {
                        c.0 += base;
                    }
                }
                _ => {}
            }
            self.nodes.push(node);
        }
        base
    }

    /// Deep structural equality. Spans are ignored; macros and procs compare
    /// by callable identity. Defined for acyclic graphs.
    pub fn structural_eq(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        match (self.kind(a), self.kind(b)) {
            (NodeKind::Id(x), NodeKind::Id(y)) => x == y,
            (NodeKind::Literal(x), NodeKind::Literal(y)) => x == y,
            (
                NodeKind::Reference {
                    name: na,
                    target: ta,
                },
                NodeKind::Reference {
                    name: nb,
                    target: tb,
                },
            ) => {
                na == nb
                    && match (ta, tb) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.structural_eq(*x, *y),
                        _ => false,
                    }
            }
            (NodeKind::List(xs), NodeKind::List(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys.iter())
                        .all(|(x, y)| self.structural_eq(*x, *y))
            }
            (NodeKind::Macro(x), NodeKind::Macro(y)) => Rc::ptr_eq(x, y),
            (NodeKind::Proc(x), NodeKind::Proc(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Render a node as an s-expression-ish string for diagnostics
    pub fn display(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(&mut out, id).expect("write to String");
        out
    }

    fn write_node(&self, out: &mut String, id: NodeId) -> fmt::Result {
        use fmt::Write;
        match self.kind(id) {
            NodeKind::Id(v) => write!(out, "#{}", v),
            NodeKind::Literal(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => write!(out, "{:?}", s),
                Err(_) => write!(out, "lit[{} bytes]", bytes.len()),
            },
            NodeKind::Reference { name, .. } => write!(out, "{}", name),
            NodeKind::List(children) => {
                write!(out, "(")?;
                for (i, c) in children.iter().enumerate() {
                    if i > 0 {
                        write!(out, " ")?;
                    }
                    self.write_node(out, *c)?;
                }
                write!(out, ")")
            }
            NodeKind::Macro(m) => write!(out, "macro<{}>", m.name),
            NodeKind::Proc(p) => write!(out, "proc<{}>", p.name),
        }
    }
}
