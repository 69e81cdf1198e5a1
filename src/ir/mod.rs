//! The IR facade: an arena-backed, typed, SSA intermediate representation.
//!
//! This module is the substrate the kernel extractor operates on. It models a
//! deliberately small slice of a classic SSA IR - modules, functions, basic
//! blocks, instructions, values, types and string-keyed metadata - and exposes
//! exactly the surgery the extraction passes need: block cloning and
//! splitting, successor rewiring, use scanning, operand remapping and textual
//! dumps.
//!
//! # Architecture
//!
//! All entities live in flat arenas on a [`Context`] and are addressed by
//! `u32` handle newtypes ([`ModuleId`], [`FuncId`], [`GlobalId`], [`BlockId`],
//! [`InstId`]). Handles are context-unique, so maps that relate entities of
//! the source module to entities of the output module are plain keyed tables
//! and never reciprocal pointers. A [`Value`] is a small tagged union over
//! instruction results, function arguments, globals, functions and constants.
//!
//! # Key Components
//!
//! - [`Context`] - owns every module and all of their entities
//! - [`InstKind`] - the instruction vocabulary, including all terminators
//! - [`Value`] / [`Constant`] - operand representation, `Eq + Hash` keyed
//! - [`ValueMap`] - the value/block rewrite table used by cloning and remap
//! - [`FunctionPrinter`] - LLVM-flavored textual dumps for descriptors

mod display;
mod handle;
mod inst;
mod module;
mod types;
mod value;

pub use display::FunctionPrinter;
pub use handle::{BlockId, FuncId, GlobalId, InstId, ModuleId};
pub use inst::{BinOp, Callee, CastOp, CmpPred, InstKind, Instruction};
pub use module::{
    BasicBlock, Context, Function, GlobalVar, Linkage, Module, ValueMap,
};
pub use types::{Signature, Type};
pub use value::{Constant, Value};

use rustc_hash::FxHashMap;

/// A single metadata payload attached under a string key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    /// Integer payload (block ids, synthetic markers, partition tags).
    Int(i64),
    /// String payload (kernel names).
    Str(String),
}

impl MetaValue {
    /// Returns the integer payload, if this is an [`MetaValue::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            MetaValue::Str(_) => None,
        }
    }

    /// Returns the string payload, if this is a [`MetaValue::Str`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Int(_) => None,
            MetaValue::Str(s) => Some(s),
        }
    }
}

/// String-keyed metadata attached to instructions, blocks, functions and
/// globals.
pub type MetadataMap = FxHashMap<String, MetaValue>;
