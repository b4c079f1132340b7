//! Shared builders for integration tests: node-level function definitions
//! without going through a textual parser.
#![allow(dead_code)]

use sable::{BlockDef, FunctionDef, NodeArena, NodeId, ParamDef};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn int_ty(arena: &mut NodeArena, width: &str) -> NodeId {
    let head = arena.reference("int");
    let w = arena.literal(width.as_bytes().to_vec());
    arena.list(vec![head, w])
}

pub fn param(arena: &mut NodeArena, name: &str, width: &str) -> ParamDef {
    ParamDef {
        name: name.to_string(),
        ty: int_ty(arena, width),
        span: None,
    }
}

pub fn block(name: &str, statements: Vec<NodeId>) -> BlockDef {
    BlockDef {
        name: name.to_string(),
        statements,
        span: None,
    }
}

/// Builds `[let NAME] (head ctor-args...) args...`. A `ctor` part written
/// `"int W"` becomes a type argument; args starting with a digit or '-' are
/// literals, everything else is a reference.
pub fn stmt(arena: &mut NodeArena, bind: Option<&str>, ctor: &[&str], args: &[&str]) -> NodeId {
    let ctor_node = match ctor {
        [single] => arena.reference(*single),
        [head, rest @ ..] => {
            let mut children = vec![arena.reference(*head)];
            for part in rest {
                if let Some(width) = part.strip_prefix("int ") {
                    children.push(int_ty(arena, width));
                } else {
                    children.push(arena.reference(*part));
                }
            }
            arena.list(children)
        }
        [] => panic!("empty constructor"),
    };
    let mut children = Vec::new();
    if let Some(name) = bind {
        let kw = arena.reference("let");
        let n = arena.reference(name);
        children.push(kw);
        children.push(n);
    }
    children.push(ctor_node);
    for arg in args {
        let node = if arg.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            arena.literal(arg.as_bytes().to_vec())
        } else {
            arena.reference(*arg)
        };
        children.push(node);
    }
    arena.list(children)
}

pub fn phi_stmt(
    arena: &mut NodeArena,
    bind: &str,
    width: &str,
    pairs: &[(&str, &str)],
) -> NodeId {
    let head = arena.reference("phi");
    let ty = int_ty(arena, width);
    let ctor = arena.list(vec![head, ty]);
    let kw = arena.reference("let");
    let name = arena.reference(bind);
    let mut children = vec![kw, name, ctor];
    for (var, blk) in pairs {
        let v = arena.reference(*var);
        let b = arena.reference(*blk);
        let pair = arena.list(vec![v, b]);
        children.push(pair);
    }
    arena.list(children)
}

/// A function over `(int 64)` parameters
pub fn function(
    arena: &mut NodeArena,
    name: &str,
    params: &[&str],
    blocks: Vec<BlockDef>,
) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|p| param(arena, p, "64")).collect(),
        ret: int_ty(arena, "64"),
        blocks,
        span: None,
    }
}
