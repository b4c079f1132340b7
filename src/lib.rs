//! # Sable - A typed, macro-capable IR compiler
//!
//! Sable compiles a Lisp-like intermediate language into typed,
//! basic-block-structured native code, and lets *compile-time macros*,
//! themselves compiled to native code, inspect and rewrite the program's own
//! syntax tree.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sable::{compile_proc, BlockDef, FunctionDef, LinkResolver, NodeArena, ParamDef};
//!
//! let mut arena = NodeArena::new();
//! // (let r (add (int 64)) a b) (return (int 64) r)
//! # let int64 = {
//! #     let head = arena.reference("int");
//! #     let w = arena.literal(b"64".to_vec());
//! #     arena.list(vec![head, w])
//! # };
//! # let statements = vec![];
//! let def = FunctionDef {
//!     name: "sum".to_string(),
//!     params: vec![ParamDef { name: "a".to_string(), ty: int64, span: None }],
//!     ret: int64,
//!     blocks: vec![BlockDef { name: "entry".to_string(), statements, span: None }],
//!     span: None,
//! };
//! let proc = compile_proc(&arena, &LinkResolver, &def).unwrap();
//! let out = unsafe { proc.code.call1(5) };
//! ```
//!
//! ## Architecture
//!
//! Compilation runs through several stages:
//!
//! 1. **Symbol graph** - arena-owned node tree handed over by a parser
//! 2. **Type and statement compilers** - constructor expressions to typed
//!    operations
//! 3. **Function compiler** - blocks to a control-flow graph, with branch
//!    targets and phi incomings resolved in a deferred fix-up pass
//! 4. **JIT backend** - Cranelift translation to a native callable
//!
//! Macros compile like any function with the fixed signature
//! `(int 64) -> (int 64)`, then execute against a flat, bounds-checked index
//! table standing in for the caller's tree. See [`expand::expand_macro`].

pub mod compiler;
pub mod error;
pub mod expand;
pub mod indexed;
pub mod ir;
pub mod jit;
pub mod node;
pub mod resolve;
pub mod span;
pub mod types;

pub use compiler::{
    compile_function, compile_macro, compile_proc, BlockDef, CompiledFunction, FunctionDef,
    MacroFn, ParamDef, ProcFn,
};
pub use error::{CResult, CompileError};
pub use expand::expand_macro;
pub use node::{NodeArena, NodeId, NodeKind};
pub use resolve::{LinkResolver, Resolver};
pub use span::Span;
pub use types::{compile_type, TypeInfo, TypeKind};
