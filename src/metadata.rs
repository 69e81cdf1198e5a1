//! The metadata vocabulary: block indexing and synthetic markers.
//!
//! Basic blocks of the input module carry a stable integer id under
//! [`BLOCK_ID`], assigned by an upstream annotation pass. The extraction
//! passes read that id to map the external kernel description onto live
//! blocks and propagate it across block splits.
//!
//! Entities the transformation synthesizes are tagged so downstream tooling
//! can tell them apart from original code:
//!
//! - [`TIK_SYNTHETIC`] marks generator-emitted stores and casts
//! - [`TIK_METADATA`] marks the first instruction of each classified block
//! - [`KERNEL_CALL`] marks calls into nested kernel functions
//! - [`KERNEL_NAME`] names synthesized top-level entities

use crate::ir::{BlockId, Context, MetaValue};

/// Metadata key carrying the per-block integer id.
pub const BLOCK_ID: &str = "BlockID";

/// Metadata key naming synthesized top-level entities.
pub const KERNEL_NAME: &str = "KernelName";

/// Metadata key marking calls into nested kernel functions.
pub const KERNEL_CALL: &str = "KernelCall";

/// Metadata key marking generator-emitted instructions.
pub const TIK_SYNTHETIC: &str = "TikSynthetic";

/// Metadata key marking the first instruction of classified blocks.
pub const TIK_METADATA: &str = "TikMetadata";

/// Metadata key for debug locations, stripped from synthesized kernels.
pub const DEBUG_LOC: &str = "dbg";

/// Marker for instructions emitted by the transformation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TikSynthetic {
    /// A store seeding or refreshing a promoted global.
    Store = 0,
    /// A pointer cast bridging a memory-selector call.
    Cast = 1,
}

impl TikSynthetic {
    /// The metadata payload for this marker.
    #[must_use]
    pub fn as_meta(self) -> MetaValue {
        MetaValue::Int(self as i64)
    }
}

/// Partition tag attached to the first instruction of classified blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TikMetadata {
    /// The block belongs to the kernel body.
    Body = 0,
    /// The block belongs to the terminating tail.
    Termination = 1,
    /// The block is a loop-condition head.
    Conditional = 2,
}

impl TikMetadata {
    /// The metadata payload for this tag.
    #[must_use]
    pub fn as_meta(self) -> MetaValue {
        MetaValue::Int(self as i64)
    }
}

/// Reads the block id of `b`, if the annotation pass assigned one.
#[must_use]
pub fn block_id(ctx: &Context, b: BlockId) -> Option<i64> {
    ctx.block_meta(b, BLOCK_ID).and_then(MetaValue::as_int)
}

/// Writes the block id of `b`.
pub fn set_block_id(ctx: &mut Context, b: BlockId, id: i64) {
    ctx.set_block_meta(b, BLOCK_ID, MetaValue::Int(id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Signature, Type};

    #[test]
    fn block_ids_roundtrip() {
        let mut ctx = Context::new();
        let m = ctx.add_module("m");
        let f = ctx.add_function(m, "f", Signature::new(vec![], Type::Void));
        let b = ctx.append_block(f, "b");
        assert_eq!(block_id(&ctx, b), None);
        set_block_id(&mut ctx, b, 42);
        assert_eq!(block_id(&ctx, b), Some(42));
    }

    #[test]
    fn marker_payloads() {
        assert_eq!(TikSynthetic::Cast.as_meta(), MetaValue::Int(1));
        assert_eq!(TikMetadata::Conditional.as_meta(), MetaValue::Int(2));
    }
}
