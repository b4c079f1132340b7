//! Finalized native code wrapper

use std::sync::Arc;

/// Wrapper to make JITModule Send + Sync.
///
/// # Safety
/// Once finalized, the module only holds immutable executable code; nothing
/// mutates it afterwards.
struct ModuleHolder(#[allow(dead_code)] cranelift_jit::JITModule);

unsafe impl Send for ModuleHolder {}
unsafe impl Sync for ModuleHolder {}

/// Compiled native code for one function.
///
/// Holds the function pointer and keeps the finalized JIT module alive so the
/// code is not freed while still callable.
pub struct CompiledCode {
    fn_ptr: *const u8,
    _module: Arc<ModuleHolder>,
}

// Safety: the pointer targets immutable code kept alive by the Arc.
unsafe impl Send for CompiledCode {}
unsafe impl Sync for CompiledCode {}

impl CompiledCode {
    pub(crate) fn new(fn_ptr: *const u8, module: cranelift_jit::JITModule) -> Self {
        CompiledCode {
            fn_ptr,
            _module: Arc::new(ModuleHolder(module)),
        }
    }

    pub fn fn_ptr(&self) -> *const u8 {
        self.fn_ptr
    }

    /// Call a ()-argument function returning a 64-bit integer.
    ///
    /// # Safety
    /// The function must have been compiled with the matching all-(int 64)
    /// signature; values are raw two's-complement bits.
    pub unsafe fn call0(&self) -> u64 {
        let f: unsafe extern "C" fn() -> u64 = std::mem::transmute(self.fn_ptr);
        f()
    }

    /// # Safety
    /// See [`CompiledCode::call0`].
    pub unsafe fn call1(&self, a: u64) -> u64 {
        let f: unsafe extern "C" fn(u64) -> u64 = std::mem::transmute(self.fn_ptr);
        f(a)
    }

    /// # Safety
    /// See [`CompiledCode::call0`].
    pub unsafe fn call2(&self, a: u64, b: u64) -> u64 {
        let f: unsafe extern "C" fn(u64, u64) -> u64 = std::mem::transmute(self.fn_ptr);
        f(a, b)
    }

    /// # Safety
    /// See [`CompiledCode::call0`].
    pub unsafe fn call3(&self, a: u64, b: u64, c: u64) -> u64 {
        let f: unsafe extern "C" fn(u64, u64, u64) -> u64 = std::mem::transmute(self.fn_ptr);
        f(a, b, c)
    }
}

impl std::fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCode")
            .field("fn_ptr", &self.fn_ptr)
            .finish()
    }
}
