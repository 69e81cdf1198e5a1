//! Kernel synthesis: the builder, its run-scoped context and the phases.
//!
//! A [`BuildContext`] owns the IR [`Context`] for the whole run, the output
//! module all synthesized entities land in, the set of reserved kernel
//! names and the registry relating block ids and synthesized functions to
//! their kernels - the state nested-kernel composition depends on. Kernels
//! are built one at a time; [`BuildContext::build_all`] orders a batch so
//! that every nested kernel is built before the kernels that enclose it.
//!
//! # Key Components
//!
//! - [`BuildContext`] - run-scoped state, the only mutator of the output
//! - [`Kernel`] - the synthesized entity and its maps
//! - [`KernelDescriptor`] - the per-kernel JSON summary

mod clone;
mod finalize;
mod inline;
mod kernel;
mod memory;

pub use inline::InlinedCallee;
pub use kernel::{Kernel, KernelDescriptor};

use log::error;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{Context, FuncId, ModuleId};
use crate::{Error, Result};

/// Identifies a kernel within a [`BuildContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(usize);

impl KernelId {
    /// The raw index into [`BuildContext::kernels`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Run-scoped build state.
///
/// All synthesized kernels share one output module; construction is
/// serialized through `&mut self`, and the block-id and function registries
/// let a parent kernel recognize blocks that belong to an already-built
/// child.
pub struct BuildContext {
    /// The IR arena holding the source module and the output module.
    pub ir: Context,
    tik: ModuleId,
    reserved: FxHashSet<String>,
    next_uid: u64,
    kernels: Vec<Kernel>,
    by_block: FxHashMap<i64, usize>,
    by_fn: FxHashMap<FuncId, usize>,
}

impl BuildContext {
    /// Wraps an IR context and creates the output module inside it.
    #[must_use]
    pub fn new(mut ir: Context) -> Self {
        let tik = ir.add_module("tik");
        Self {
            ir,
            tik,
            reserved: FxHashSet::default(),
            next_uid: 0,
            kernels: Vec::new(),
            by_block: FxHashMap::default(),
            by_fn: FxHashMap::default(),
        }
    }

    /// The output module all synthesized entities are placed in.
    #[must_use]
    pub fn output_module(&self) -> ModuleId {
        self.tik
    }

    /// All kernels built so far, valid or not, in build order.
    #[must_use]
    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Returns a kernel by id.
    #[must_use]
    pub fn kernel(&self, id: KernelId) -> &Kernel {
        &self.kernels[id.0]
    }

    pub(crate) fn kernel_owning_block_id(&self, block_id: i64) -> Option<&Kernel> {
        self.by_block.get(&block_id).map(|&i| &self.kernels[i])
    }

    pub(crate) fn kernel_of_function(&self, f: FuncId) -> Option<&Kernel> {
        self.by_fn.get(&f).map(|&i| &self.kernels[i])
    }

    /// Resolves the requested kernel name: empty names draw from a counter,
    /// a leading digit gets a `K` prefix, and collisions are fatal.
    fn reserve_name(&mut self, requested: &str) -> Result<String> {
        let name = if requested.is_empty() {
            let n = format!("Kernel_{}", self.next_uid);
            self.next_uid += 1;
            n
        } else if requested.starts_with(|c: char| c.is_ascii_digit()) {
            format!("K{requested}")
        } else {
            requested.to_string()
        };
        if !self.reserved.insert(name.clone()) {
            return Err(Error::DuplicateName(name));
        }
        Ok(name)
    }

    /// Builds one kernel from the blocks of `source` tagged with `block_ids`.
    ///
    /// Construction runs under a fault guard: on any failure the error is
    /// logged, partially built entities are detached from the output module
    /// and the returned kernel is left invalid. The run can continue.
    pub fn build_kernel(&mut self, source: ModuleId, block_ids: &[i64], name: &str) -> KernelId {
        let reserved = match self.reserve_name(name) {
            Ok(n) => n,
            Err(e) => {
                error!("kernel build failed: {e}");
                return self.push_invalid(name.to_string());
            }
        };
        match kernel::build(self, source, block_ids, &reserved) {
            Ok(kernel) => {
                let id = KernelId(self.kernels.len());
                if let Some(f) = kernel.function {
                    self.by_fn.insert(f, id.0);
                }
                for &bid in block_ids {
                    self.by_block.insert(bid, id.0);
                }
                self.kernels.push(kernel);
                id
            }
            Err(e) => {
                error!("kernel '{reserved}' build failed: {e}");
                self.push_invalid(reserved)
            }
        }
    }

    fn push_invalid(&mut self, name: String) -> KernelId {
        let id = KernelId(self.kernels.len());
        self.kernels.push(Kernel::invalid(name));
        id
    }

    /// Builds a batch of kernels, children before parents.
    ///
    /// Nesting implies block-set inclusion, so ordering by ascending block
    /// count guarantees every nested kernel's function exists when an
    /// enclosing kernel clones the containing blocks.
    pub fn build_all(
        &mut self,
        source: ModuleId,
        specs: &[(String, Vec<i64>)],
    ) -> Vec<KernelId> {
        let mut order: Vec<usize> = (0..specs.len()).collect();
        order.sort_by_key(|&i| specs[i].1.len());

        let mut out = vec![KernelId(0); specs.len()];
        for i in order {
            let (name, ids) = &specs[i];
            out[i] = self.build_kernel(source, ids, name);
        }
        out
    }
}
