// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

//! # tik
//!
//! A compiler-analysis library that lifts user-identified subgraphs of a
//! typed SSA IR module into self-contained callable units ("kernels") with a
//! well-defined entry/exit protocol and an abstract memory interface.
//!
//! The input is a compiled IR module plus, per kernel, the list of basic
//! blocks belonging to it (by their `BlockID` metadata). The output is one
//! synthesized function per kernel - structurally equivalent to the original
//! blocks but freed from their surrounding context - accompanied by two
//! memory-selector helpers and the promoted globals they share.
//!
//! # Architecture
//!
//! The library is organized into three layers that build on each other:
//!
//! - **IR Facade** ([`crate::ir`]): an arena-backed SSA IR exposing exactly
//!   the surgery the transformation needs - block cloning and splitting,
//!   successor rewiring, use scanning, operand remapping, textual dumps.
//! - **Analysis Layer** ([`crate::analysis`]): region structure (entrances,
//!   enumerated exits, loop-condition heads, the body/termination
//!   partition), call-boundary normalization and external-value
//!   classification.
//! - **Build Layer** ([`crate::build`]): the kernel builder itself -
//!   signature construction, per-block cloning with nested-kernel call
//!   protocol, callee inlining, the memory rewrite, and the finishing
//!   passes that wire Init, Exit and the metadata vocabulary.
//!
//! # Key Components
//!
//! - [`crate::build::BuildContext`] - run-scoped state; owns the output module
//! - [`crate::build::Kernel`] - a synthesized kernel and its maps
//! - [`crate::metadata`] - the `BlockID`/`TikSynthetic`/`TikMetadata` vocabulary
//! - [`crate::Error`] and [`crate::Result`] - error handling
//!
//! # Usage
//!
//! ```rust
//! use tik::prelude::*;
//!
//! // Normally the source module arrives through an external IR loader; a
//! // tiny module is assembled by hand here.
//! let mut ctx = Context::new();
//! let m = ctx.add_module("input");
//! let f = ctx.add_function(m, "f", Signature::new(vec![], Type::Void));
//! let entry = ctx.append_block(f, "entry");
//! let body = ctx.append_block(f, "body");
//! let done = ctx.append_block(f, "done");
//! tik::metadata::set_block_id(&mut ctx, body, 1);
//! ctx.push(entry, InstKind::Br { dest: body });
//! ctx.push(body, InstKind::Br { dest: done });
//! ctx.push(done, InstKind::Ret { value: None });
//!
//! let mut build = BuildContext::new(ctx);
//! let id = build.build_kernel(m, &[1], "example");
//! assert!(build.kernel(id).valid);
//! ```
//!
//! # Error Handling
//!
//! Construction of a kernel runs under a fault guard: every failure kind in
//! [`Error`] is fatal to the offending kernel and recoverable for the run.
//! The driver logs the reason, detaches the partial entities from the output
//! module and leaves the kernel with `valid == false`.
//!
//! # Out of Scope
//!
//! Parsing and serializing IR, the command-line entry point, the kernel-list
//! JSON loader, hash fingerprinting, block-id annotation and C-header
//! emission are external collaborators; this crate exposes the interfaces
//! they attach to.

pub mod analysis;
pub mod build;
mod error;
pub mod ir;
pub mod metadata;

/// Convenient re-exports of the most commonly used types.
///
/// # Usage Examples
///
/// ```rust,no_run
/// use tik::prelude::*;
///
/// let ctx = Context::new();
/// let mut build = BuildContext::new(ctx);
/// # let _ = &mut build;
/// ```
pub mod prelude {
    pub use crate::build::{BuildContext, Kernel, KernelDescriptor, KernelId};
    pub use crate::ir::{
        BasicBlock, BinOp, BlockId, Callee, CastOp, CmpPred, Constant, Context, FuncId,
        Function, FunctionPrinter, GlobalId, GlobalVar, InstId, InstKind, Instruction, Linkage,
        MetaValue, Module, ModuleId, Signature, Type, Value, ValueMap,
    };
    pub use crate::{Error, Result};
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
