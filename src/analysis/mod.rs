//! Structural analyses over a selected block region.
//!
//! Given the set `S` of blocks belonging to a kernel, these passes compute
//! the facts the builder consumes: a clean call boundary for inlining
//! ([`split_blocks`]), the entrances and enumerated exits, the
//! loop-condition heads, the body/termination partition ([`RegionFacts`]),
//! and the ordered sequence of outside-defined values the region consumes
//! ([`external_values`]).

mod externals;
mod region;
mod split;

pub use externals::external_values;
pub use region::{analyze_region, RegionFacts};
pub use split::split_blocks;

use crate::ir::{BlockId, Context};

/// Returns the region's blocks sorted by handle, the deterministic
/// iteration order used by every fact-deriving pass.
#[must_use]
pub fn sorted_region(blocks: &rustc_hash::FxHashSet<BlockId>) -> Vec<BlockId> {
    let mut v: Vec<BlockId> = blocks.iter().copied().collect();
    v.sort_unstable();
    v
}

/// Collects the live blocks of `module` whose [`crate::metadata::BLOCK_ID`]
/// tag appears in `ids`.
#[must_use]
pub fn blocks_with_ids(
    ctx: &Context,
    module: crate::ir::ModuleId,
    ids: &[i64],
) -> rustc_hash::FxHashSet<BlockId> {
    let mut out = rustc_hash::FxHashSet::default();
    for &f in ctx.module_functions(module) {
        for &b in ctx.function(f).blocks() {
            if let Some(id) = crate::metadata::block_id(ctx, b) {
                if ids.contains(&id) {
                    out.insert(b);
                }
            }
        }
    }
    out
}
