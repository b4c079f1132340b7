//! Indexed symbol table: flat, pointer-free serialization of a symbol tree
//!
//! JIT-compiled macro code cannot safely hold arena pointers, so each macro
//! call gets a flat, append-only, 1-based table and addresses the caller's
//! tree through bounds-checked integer indices. Index 0 means "absent". The
//! table is built once per call, confined to the executing thread, and
//! discarded when the call returns.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::node::{NodeArena, NodeId, NodeKind};

/// One table entry. Literals own deep copies of their buffers so the callee
/// can mutate in place without aliasing caller storage. Macro and proc nodes
/// are opaque to the callee and keep their arena handle so deindexing can
/// restore the original node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedEntry {
    Id(u64),
    Lit(Vec<u8>),
    Ref { name: String, target: u32 },
    List(Vec<u32>),
    Macro(NodeId),
    Proc(NodeId),
}

impl IndexedEntry {
    pub fn kind_name(&self) -> &'static str {
        match self {
            IndexedEntry::Id(_) => "id",
            IndexedEntry::Lit(_) => "literal",
            IndexedEntry::Ref { .. } => "reference",
            IndexedEntry::List(_) => "list",
            IndexedEntry::Macro(_) => "macro",
            IndexedEntry::Proc(_) => "proc",
        }
    }
}

/// A fault signalled by a reflective operation. Aborts the in-flight macro
/// call and is reported as a compile error at the macro's call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroFault {
    /// Operation on index 0
    AbsentIndex,
    /// Index past the end of the table
    OutOfRange { index: u64, len: usize },
    /// Entry exists but has the wrong kind for the operation
    WrongKind {
        index: u32,
        expected: &'static str,
        found: &'static str,
    },
    /// Pop from an empty literal or list
    PopOnEmpty { index: u32 },
    /// Element position past the end of a literal or list
    PositionOutOfRange { index: u32, pos: u64, len: usize },
    /// Reflective operation outside any macro execution
    NoContext,
}

impl fmt::Display for MacroFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroFault::AbsentIndex => write!(f, "operation on absent index 0"),
            MacroFault::OutOfRange { index, len } => {
                write!(f, "index {} out of range for table of {}", index, len)
            }
            MacroFault::WrongKind {
                index,
                expected,
                found,
            } => write!(
                f,
                "index {} holds a {}, operation needs a {}",
                index, found, expected
            ),
            MacroFault::PopOnEmpty { index } => write!(f, "pop on empty entry at index {}", index),
            MacroFault::PositionOutOfRange { index, pos, len } => write!(
                f,
                "position {} out of range for entry of {} at index {}",
                pos, len, index
            ),
            MacroFault::NoContext => write!(f, "reflective operation outside macro execution"),
        }
    }
}

/// Append-only, 1-based entry table
#[derive(Debug, Default)]
pub struct IndexedTable {
    entries: Vec<IndexedEntry>,
}

impl IndexedTable {
    pub fn new() -> Self {
        IndexedTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, returning its 1-based index
    pub fn push(&mut self, entry: IndexedEntry) -> u32 {
        self.entries.push(entry);
        self.entries.len() as u32
    }

    /// Bounds-checked access. `idx` comes straight from generated code, so
    /// the full u64 range must be handled.
    pub fn get(&self, idx: u64) -> Result<&IndexedEntry, MacroFault> {
        self.slot(idx).map(|i| &self.entries[i])
    }

    pub fn get_mut(&mut self, idx: u64) -> Result<&mut IndexedEntry, MacroFault> {
        let i = self.slot(idx)?;
        Ok(&mut self.entries[i])
    }

    fn slot(&self, idx: u64) -> Result<usize, MacroFault> {
        if idx == 0 {
            return Err(MacroFault::AbsentIndex);
        }
        if idx > self.entries.len() as u64 {
            return Err(MacroFault::OutOfRange {
                index: idx,
                len: self.entries.len(),
            });
        }
        Ok((idx - 1) as usize)
    }
}

/// Serialize `node` into `table`, returning its 1-based index.
///
/// Pre-order: a composite node's slot is reserved (and memoized) before its
/// children are indexed, then patched once they finish, so indices stay
/// stable and contiguous and shared substructure indexes exactly once.
/// Defined for acyclic graphs only.
pub fn index_node(
    arena: &NodeArena,
    table: &mut IndexedTable,
    memo: &mut FxHashMap<NodeId, u32>,
    node: NodeId,
) -> u32 {
    if let Some(&idx) = memo.get(&node) {
        return idx;
    }
    match arena.kind(node) {
        NodeKind::Id(v) => {
            let idx = table.push(IndexedEntry::Id(*v));
            memo.insert(node, idx);
            idx
        }
        NodeKind::Literal(bytes) => {
            let idx = table.push(IndexedEntry::Lit(bytes.clone()));
            memo.insert(node, idx);
            idx
        }
        NodeKind::Reference { name, target } => {
            let idx = table.push(IndexedEntry::Ref {
                name: name.clone(),
                target: 0,
            });
            memo.insert(node, idx);
            let target = target.map(|t| index_node(arena, table, memo, t)).unwrap_or(0);
            match table.get_mut(idx as u64) {
                Ok(IndexedEntry::Ref { target: slot, .. }) => *slot = target,
                _ => unreachable!("reserved reference slot"),
            }
            idx
        }
        NodeKind::List(children) => {
            let children = children.clone();
            let idx = table.push(IndexedEntry::List(Vec::new()));
            memo.insert(node, idx);
            let indexed: Vec<u32> = children
                .iter()
                .map(|&c| index_node(arena, table, memo, c))
                .collect();
            match table.get_mut(idx as u64) {
                Ok(IndexedEntry::List(slot)) => *slot = indexed,
                _ => unreachable!("reserved list slot"),
            }
            idx
        }
        NodeKind::Macro(_) => {
            let idx = table.push(IndexedEntry::Macro(node));
            memo.insert(node, idx);
            idx
        }
        NodeKind::Proc(_) => {
            let idx = table.push(IndexedEntry::Proc(node));
            memo.insert(node, idx);
            idx
        }
    }
}

/// Materialize the entry at `idx` back into the arena.
///
/// Reference targets and list children are memoized per index, so shared
/// substructure is not duplicated. Index 0 is a fault, as is anything out of
/// range: the callee controls the returned index.
pub fn to_node(
    table: &IndexedTable,
    arena: &mut NodeArena,
    memo: &mut FxHashMap<u32, NodeId>,
    idx: u64,
) -> Result<NodeId, MacroFault> {
    let entry = table.get(idx)?.clone();
    let idx = idx as u32;
    if let Some(&node) = memo.get(&idx) {
        return Ok(node);
    }
    match entry {
        IndexedEntry::Id(v) => {
            let node = arena.id(v);
            memo.insert(idx, node);
            Ok(node)
        }
        IndexedEntry::Lit(bytes) => {
            let node = arena.literal(bytes);
            memo.insert(idx, node);
            Ok(node)
        }
        IndexedEntry::Ref { name, target } => {
            let node = arena.reference(name);
            memo.insert(idx, node);
            if target != 0 {
                let t = to_node(table, arena, memo, target as u64)?;
                if let NodeKind::Reference { target: slot, .. } = &mut arena.get_mut(node).kind {
                    *slot = Some(t);
                }
            }
            Ok(node)
        }
        IndexedEntry::List(children) => {
            let node = arena.list(Vec::new());
            memo.insert(idx, node);
            let mut out = Vec::with_capacity(children.len());
            for c in children {
                out.push(to_node(table, arena, memo, c as u64)?);
            }
            if let NodeKind::List(slot) = &mut arena.get_mut(node).kind {
                *slot = out;
            }
            Ok(node)
        }
        IndexedEntry::Macro(node) | IndexedEntry::Proc(node) => {
            memo.insert(idx, node);
            Ok(node)
        }
    }
}
