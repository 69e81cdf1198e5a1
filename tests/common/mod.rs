//! Shared fixtures for the kernel-extraction integration tests.

#![allow(dead_code)]

use tik::ir::{BlockId, Context, FuncId, InstKind, ModuleId};
use tik::metadata::set_block_id;

/// A fresh context with one input module. Logging goes to the test harness.
pub fn new_input() -> (Context, ModuleId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut ctx = Context::new();
    let m = ctx.add_module("input");
    (ctx, m)
}

/// Appends a block tagged with the given `BlockID`.
pub fn tagged_block(ctx: &mut Context, f: FuncId, id: i64) -> BlockId {
    let b = ctx.append_block(f, format!("b{id}"));
    set_block_id(ctx, b, id);
    b
}

/// Every terminator edge of `f` stays inside `f`.
pub fn assert_closed(ctx: &Context, f: FuncId) {
    for &b in ctx.function(f).blocks() {
        for s in ctx.successors(b) {
            assert_eq!(
                ctx.block_func(s),
                f,
                "edge from {b:?} escapes the kernel function"
            );
        }
    }
}

/// The terminator of `b`, asserted to exist.
pub fn terminator_kind(ctx: &Context, b: BlockId) -> InstKind {
    let t = ctx.terminator(b).expect("block has no terminator");
    ctx.inst(t).kind.clone()
}
