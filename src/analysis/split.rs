//! Call-boundary normalization.
//!
//! Before a region is cloned, every block containing a call to a function
//! with a body is split immediately after the call, so the call ends its
//! block and the continuation lives in a fresh block reached by an
//! unconditional branch. The inliner's phi fan-in and return dispatch rely
//! on exactly this shape.

use rustc_hash::FxHashSet;

use crate::ir::{BlockId, Callee, Context, InstKind};
use crate::metadata::{block_id, set_block_id};

/// Splits every block of the region after each non-terminator call to a
/// non-empty function. New tail blocks inherit the original's `BlockID`,
/// join the region and are re-scanned until a fixed point.
pub fn split_blocks(ctx: &mut Context, blocks: &mut FxHashSet<BlockId>) {
    let mut worklist: Vec<BlockId> = blocks.iter().copied().collect();
    worklist.sort_unstable();

    while let Some(b) = worklist.pop() {
        let insts = ctx.block(b).insts().to_vec();
        for (idx, &i) in insts.iter().enumerate() {
            let callee = match &ctx.inst(i).kind {
                InstKind::Call {
                    callee: Callee::Direct(f),
                    ..
                } => *f,
                _ => continue,
            };
            if ctx.function(callee).is_declaration() || idx + 1 >= insts.len() {
                continue;
            }
            let tail = ctx.split_block(b, insts[idx + 1]);
            if let Some(id) = block_id(ctx, b) {
                set_block_id(ctx, tail, id);
            }
            blocks.insert(tail);
            worklist.push(tail);
            // Everything after the call moved to the tail; this block is done.
            break;
        }
    }
}
