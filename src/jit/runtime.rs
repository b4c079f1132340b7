//! Host API for reflective instructions
//!
//! JIT-compiled macro bodies call these functions to inspect and rewrite the
//! indexed symbol table of the in-flight call. All functions use the C
//! calling convention and exchange raw `u64` values (indices, sizes, bytes,
//! 0/1 booleans).
//!
//! The table lives in a call-scoped thread-local context; a faulting
//! operation records the first fault, returns 0, and generated code checks
//! `sable_rt_has_fault` after every call to bail out of the macro. The fault
//! is then reported at the macro call site — never as a host crash.

use std::cell::RefCell;

use crate::indexed::{IndexedEntry, IndexedTable, MacroFault};

/// Per-call execution state, confined to the calling thread
#[derive(Debug)]
pub struct MacroContext {
    pub table: IndexedTable,
    pub fault: Option<MacroFault>,
}

impl MacroContext {
    pub fn new(table: IndexedTable) -> Self {
        MacroContext { table, fault: None }
    }
}

thread_local! {
    static MACRO_CTX: RefCell<Option<MacroContext>> = const { RefCell::new(None) };
}

/// Install the context for a macro call. Any previous context is returned so
/// a (compile-time) nested expansion restores it afterwards.
pub fn install(ctx: MacroContext) -> Option<MacroContext> {
    MACRO_CTX.with(|slot| slot.borrow_mut().replace(ctx))
}

/// Remove and return the current context
pub fn take() -> Option<MacroContext> {
    MACRO_CTX.with(|slot| slot.borrow_mut().take())
}

/// Run `f` against the installed context; without one, every reflective
/// operation is a fault and yields 0.
fn with_ctx(f: impl FnOnce(&mut MacroContext) -> u64) -> u64 {
    MACRO_CTX.with(|slot| match slot.borrow_mut().as_mut() {
        Some(ctx) => f(ctx),
        None => 0,
    })
}

/// Record the first fault; later faults in the same call are side effects of
/// the first and are dropped.
fn fault(ctx: &mut MacroContext, f: MacroFault) -> u64 {
    if ctx.fault.is_none() {
        ctx.fault = Some(f);
    }
    0
}

fn predicate(idx: u64, pred: impl Fn(&IndexedEntry) -> bool) -> u64 {
    with_ctx(|ctx| match ctx.table.get(idx) {
        Ok(entry) => pred(entry) as u64,
        Err(f) => fault(ctx, f),
    })
}

// === Kind predicates ===

#[no_mangle]
pub extern "C" fn sable_rt_is_id(idx: u64) -> u64 {
    predicate(idx, |e| matches!(e, IndexedEntry::Id(_)))
}

#[no_mangle]
pub extern "C" fn sable_rt_is_lit(idx: u64) -> u64 {
    predicate(idx, |e| matches!(e, IndexedEntry::Lit(_)))
}

#[no_mangle]
pub extern "C" fn sable_rt_is_ref(idx: u64) -> u64 {
    predicate(idx, |e| matches!(e, IndexedEntry::Ref { .. }))
}

#[no_mangle]
pub extern "C" fn sable_rt_is_list(idx: u64) -> u64 {
    predicate(idx, |e| matches!(e, IndexedEntry::List(_)))
}

#[no_mangle]
pub extern "C" fn sable_rt_is_macro(idx: u64) -> u64 {
    predicate(idx, |e| matches!(e, IndexedEntry::Macro(_)))
}

// === Literal operations ===

fn lit_entry<'a>(
    table: &'a mut IndexedTable,
    idx: u64,
) -> Result<&'a mut Vec<u8>, MacroFault> {
    match table.get_mut(idx)? {
        IndexedEntry::Lit(bytes) => Ok(bytes),
        other => Err(MacroFault::WrongKind {
            index: idx as u32,
            expected: "literal",
            found: other.kind_name(),
        }),
    }
}

#[no_mangle]
pub extern "C" fn sable_rt_lit_create() -> u64 {
    with_ctx(|ctx| ctx.table.push(IndexedEntry::Lit(Vec::new())) as u64)
}

#[no_mangle]
pub extern "C" fn sable_rt_lit_size(idx: u64) -> u64 {
    with_ctx(|ctx| match lit_entry(&mut ctx.table, idx) {
        Ok(bytes) => bytes.len() as u64,
        Err(f) => fault(ctx, f),
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_lit_get(idx: u64, pos: u64) -> u64 {
    with_ctx(|ctx| match lit_entry(&mut ctx.table, idx) {
        Ok(bytes) => match bytes.get(pos as usize) {
            Some(&b) => b as u64,
            None => {
                let len = bytes.len();
                fault(
                    ctx,
                    MacroFault::PositionOutOfRange {
                        index: idx as u32,
                        pos,
                        len,
                    },
                )
            }
        },
        Err(f) => fault(ctx, f),
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_lit_set(idx: u64, pos: u64, value: u64) -> u64 {
    with_ctx(|ctx| match lit_entry(&mut ctx.table, idx) {
        Ok(bytes) => match bytes.get_mut(pos as usize) {
            Some(b) => {
                *b = value as u8;
                0
            }
            None => {
                let len = bytes.len();
                fault(
                    ctx,
                    MacroFault::PositionOutOfRange {
                        index: idx as u32,
                        pos,
                        len,
                    },
                )
            }
        },
        Err(f) => fault(ctx, f),
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_lit_push(idx: u64, value: u64) -> u64 {
    with_ctx(|ctx| match lit_entry(&mut ctx.table, idx) {
        Ok(bytes) => {
            bytes.push(value as u8);
            0
        }
        Err(f) => fault(ctx, f),
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_lit_pop(idx: u64) -> u64 {
    with_ctx(|ctx| match lit_entry(&mut ctx.table, idx) {
        Ok(bytes) => match bytes.pop() {
            Some(b) => b as u64,
            None => fault(ctx, MacroFault::PopOnEmpty { index: idx as u32 }),
        },
        Err(f) => fault(ctx, f),
    })
}

// === List operations ===

fn list_entry<'a>(
    table: &'a mut IndexedTable,
    idx: u64,
) -> Result<&'a mut Vec<u32>, MacroFault> {
    match table.get_mut(idx)? {
        IndexedEntry::List(children) => Ok(children),
        other => Err(MacroFault::WrongKind {
            index: idx as u32,
            expected: "list",
            found: other.kind_name(),
        }),
    }
}

/// A child index stored into a list must name an existing entry
fn check_child(table: &IndexedTable, child: u64) -> Result<u32, MacroFault> {
    table.get(child)?;
    Ok(child as u32)
}

#[no_mangle]
pub extern "C" fn sable_rt_list_create() -> u64 {
    with_ctx(|ctx| ctx.table.push(IndexedEntry::List(Vec::new())) as u64)
}

#[no_mangle]
pub extern "C" fn sable_rt_list_size(idx: u64) -> u64 {
    with_ctx(|ctx| match list_entry(&mut ctx.table, idx) {
        Ok(children) => children.len() as u64,
        Err(f) => fault(ctx, f),
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_list_get(idx: u64, pos: u64) -> u64 {
    with_ctx(|ctx| match list_entry(&mut ctx.table, idx) {
        Ok(children) => match children.get(pos as usize) {
            Some(&c) => c as u64,
            None => {
                let len = children.len();
                fault(
                    ctx,
                    MacroFault::PositionOutOfRange {
                        index: idx as u32,
                        pos,
                        len,
                    },
                )
            }
        },
        Err(f) => fault(ctx, f),
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_list_set(idx: u64, pos: u64, child: u64) -> u64 {
    with_ctx(|ctx| {
        let child = match check_child(&ctx.table, child) {
            Ok(c) => c,
            Err(f) => return fault(ctx, f),
        };
        match list_entry(&mut ctx.table, idx) {
            Ok(children) => match children.get_mut(pos as usize) {
                Some(slot) => {
                    *slot = child;
                    0
                }
                None => {
                    let len = children.len();
                    fault(
                        ctx,
                        MacroFault::PositionOutOfRange {
                            index: idx as u32,
                            pos,
                            len,
                        },
                    )
                }
            },
            Err(f) => fault(ctx, f),
        }
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_list_push(idx: u64, child: u64) -> u64 {
    with_ctx(|ctx| {
        let child = match check_child(&ctx.table, child) {
            Ok(c) => c,
            Err(f) => return fault(ctx, f),
        };
        match list_entry(&mut ctx.table, idx) {
            Ok(children) => {
                children.push(child);
                0
            }
            Err(f) => fault(ctx, f),
        }
    })
}

#[no_mangle]
pub extern "C" fn sable_rt_list_pop(idx: u64) -> u64 {
    with_ctx(|ctx| match list_entry(&mut ctx.table, idx) {
        Ok(children) => match children.pop() {
            Some(c) => c as u64,
            None => fault(ctx, MacroFault::PopOnEmpty { index: idx as u32 }),
        },
        Err(f) => fault(ctx, f),
    })
}

// === Fault check ===

/// Checked by generated code after every reflective call
#[no_mangle]
pub extern "C" fn sable_rt_has_fault() -> u64 {
    MACRO_CTX.with(|slot| match slot.borrow().as_ref() {
        Some(ctx) => ctx.fault.is_some() as u64,
        None => 1,
    })
}
