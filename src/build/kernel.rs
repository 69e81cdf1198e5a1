//! The kernel entity and the build orchestration.
//!
//! A kernel is built in a fixed phase sequence over a working [`Synth`]
//! state: region screening and splitting, structural analysis, signature
//! construction, per-block cloning, callee inlining, global copying, the
//! remap/repipe fixups, signature export, memory rewriting, the Init/Exit
//! protocol and finally metadata application. Any failing phase unwinds
//! through `Result`, and the caller detaches everything the partial build
//! attached to the output module.

use std::collections::BTreeMap;

use log::warn;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::analysis::{
    analyze_region, blocks_with_ids, external_values, sorted_region, split_blocks, RegionFacts,
};
use crate::build::{BuildContext, InlinedCallee};
use crate::ir::{
    BlockId, Callee, Context, FuncId, FunctionPrinter, GlobalId, InstKind, ModuleId, Signature,
    Type, Value, ValueMap,
};
use crate::metadata::block_id;
use crate::{Error, Result};

/// A synthesized kernel: the lifted region as a self-contained function
/// plus the maps that relate it back to the original module.
///
/// Entity fields are `None` on kernels whose construction failed; check
/// [`Kernel::valid`] before consuming them.
#[derive(Debug, Default)]
pub struct Kernel {
    /// The unique kernel name.
    pub name: String,
    /// The synthesized function `i8(i8, T1, ..., Tn)`.
    pub function: Option<FuncId>,
    /// The entry block holding seed stores and the entrance switch.
    pub init: Option<BlockId>,
    /// The exit block returning the exit-id phi.
    pub exit: Option<BlockId>,
    /// The block returning the `-2` sentinel for invalid entrance ids.
    pub exception: Option<BlockId>,
    /// The `(i64) -> i64` read selector.
    pub memory_read: Option<FuncId>,
    /// The `(i64) -> i64` write selector.
    pub memory_write: Option<FuncId>,
    /// Cloned blocks forming the loop body.
    pub body: FxHashSet<BlockId>,
    /// Cloned blocks forming the terminating tail.
    pub termination: FxHashSet<BlockId>,
    /// Cloned loop-condition heads.
    pub conditional: FxHashSet<BlockId>,
    /// Original-module blocks reachable from outside the region; position
    /// is the entrance id.
    pub entrances: Vec<BlockId>,
    /// Exit-producing block to exit id.
    pub exit_map: BTreeMap<BlockId, i64>,
    /// The same map keyed by the producers' original-module blocks, used
    /// when an enclosing kernel re-keys a simultaneous exit.
    pub(crate) region_exit_map: BTreeMap<BlockId, i64>,
    /// Exit id to the original-module block it targets.
    pub exit_target: BTreeMap<i64, BlockId>,
    /// Outside-defined values consumed by the region; position fixes the
    /// argument layout.
    pub external_values: Vec<Value>,
    /// Original value to rewritten value.
    pub vmap: ValueMap,
    /// Synthesized argument index to the external value it replaces.
    pub argument_map: FxHashMap<u32, Value>,
    /// Promoted pointer value to the module global holding it.
    pub global_map: FxHashMap<Value, GlobalId>,
    /// Read-selector index to global.
    pub load_map: BTreeMap<i64, GlobalId>,
    /// Write-selector index to global.
    pub store_map: BTreeMap<i64, GlobalId>,
    /// Callees inlined into the kernel function.
    pub inlined: Vec<InlinedCallee>,
    /// Set when construction ran to completion.
    pub valid: bool,
}

impl Kernel {
    pub(crate) fn invalid(name: String) -> Self {
        Kernel {
            name,
            ..Kernel::default()
        }
    }

    /// Renders the per-kernel JSON descriptor.
    #[must_use]
    pub fn descriptor(&self, ctx: &Context) -> KernelDescriptor {
        let mut d = KernelDescriptor::default();
        let Some(function) = self.function else {
            return d;
        };
        let printer = FunctionPrinter::new(ctx, function);
        let params = ctx.function(function).sig().params.len();
        d.inputs = (0..params).map(|i| printer.argument(i as u32)).collect();
        d.init = self.init.map(|b| printer.block_lines(b));
        d.exit = self.exit.map(|b| printer.block_lines(b));
        d.memory_read = self.memory_read.map(|f| dump_function(ctx, f));
        d.memory_write = self.memory_write.map(|f| dump_function(ctx, f));

        let dump_set = |set: &FxHashSet<BlockId>| -> Vec<Vec<String>> {
            let mut blocks: Vec<BlockId> = set.iter().copied().collect();
            blocks.sort_unstable();
            blocks.iter().map(|&b| printer.block_lines(b)).collect()
        };
        d.body = dump_set(&self.body);
        d.termination = dump_set(&self.termination);
        d.conditional = dump_set(&self.conditional);
        d
    }
}

fn dump_function(ctx: &Context, f: FuncId) -> Vec<String> {
    let printer = FunctionPrinter::new(ctx, f);
    ctx.function(f)
        .blocks()
        .iter()
        .flat_map(|&b| printer.block_lines(b))
        .collect()
}

/// The JSON summary emitted per successful kernel. Sections are omitted
/// when empty.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KernelDescriptor {
    /// String dump of each formal argument.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    /// The Init block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init: Option<Vec<String>>,
    /// The Exit block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<Vec<String>>,
    /// The read selector body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_read: Option<Vec<String>>,
    /// The write selector body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_write: Option<Vec<String>>,
    /// Body blocks, one dump per block.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<Vec<String>>,
    /// Termination blocks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub termination: Vec<Vec<String>>,
    /// Conditional blocks.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditional: Vec<Vec<String>>,
}

impl KernelDescriptor {
    /// Serializes the descriptor into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Working state of one kernel build, alive from signature construction to
/// the final metadata pass.
pub(crate) struct Synth {
    pub(crate) tik: ModuleId,
    pub(crate) name: String,
    pub(crate) blocks: FxHashSet<BlockId>,
    pub(crate) facts: RegionFacts,
    pub(crate) external_values: Vec<Value>,
    pub(crate) vmap: ValueMap,
    pub(crate) argument_map: FxHashMap<u32, Value>,
    pub(crate) global_map: FxHashMap<Value, GlobalId>,
    pub(crate) load_map: BTreeMap<i64, GlobalId>,
    pub(crate) store_map: BTreeMap<i64, GlobalId>,
    pub(crate) function: FuncId,
    pub(crate) init: BlockId,
    pub(crate) exit: BlockId,
    pub(crate) exception: BlockId,
    pub(crate) memory_read: FuncId,
    pub(crate) memory_write: FuncId,
    pub(crate) inlined: Vec<InlinedCallee>,
    /// Double-exit target to its bridge block, shared across intermediate
    /// blocks so each target is bridged once.
    pub(crate) bridged: FxHashMap<BlockId, BlockId>,
}

/// Builds one kernel. Called with a reserved, unique name.
pub(crate) fn build(
    bx: &mut BuildContext,
    source: ModuleId,
    block_ids: &[i64],
    name: &str,
) -> Result<Kernel> {
    let tik = bx.output_module();
    let mut blocks = blocks_with_ids(&bx.ir, source, block_ids);
    screen_region(&bx.ir, &blocks)?;
    split_blocks(&mut bx.ir, &mut blocks);

    let child_owned: FxHashSet<BlockId> = sorted_region(&blocks)
        .into_iter()
        .filter(|&b| {
            block_id(&bx.ir, b)
                .is_some_and(|id| bx.kernel_owning_block_id(id).is_some())
        })
        .collect();

    let facts = analyze_region(&bx.ir, name, &blocks, &child_owned)?;

    let mut vmap = ValueMap::default();
    let child_externals: FxHashMap<FuncId, Vec<Value>> = bx
        .kernels()
        .iter()
        .filter_map(|k| k.function.map(|f| (f, k.external_values.clone())))
        .collect();
    let externals = external_values(
        &bx.ir,
        &sorted_region(&blocks),
        &blocks,
        &child_externals,
        &vmap,
    );

    // Signature: i8 entrance selector plus one argument per external value.
    let mut params = vec![Type::Int(8)];
    for ev in &externals {
        params.push(bx.ir.value_type(ev));
    }
    let function = bx
        .ir
        .add_function(tik, name, Signature::new(params, Type::Int(8)));

    let mut argument_map = FxHashMap::default();
    for (i, ev) in externals.iter().enumerate() {
        let arg = Value::Arg(function, (i + 1) as u32);
        vmap.values.insert(ev.clone(), arg);
        argument_map.insert((i + 1) as u32, ev.clone());
    }

    let init = bx.ir.append_block(function, "Init");
    let exit = bx.ir.append_block(function, "Exit");
    let exception = bx.ir.append_block(function, "Exception");

    let mem_sig = Signature::new(vec![Type::Int(64)], Type::Int(64));
    let memory_read = bx.ir.add_function(tik, "MemoryRead", mem_sig.clone());
    let memory_write = bx.ir.add_function(tik, "MemoryWrite", mem_sig);

    let mut syn = Synth {
        tik,
        name: name.to_string(),
        blocks,
        facts,
        external_values: externals,
        vmap,
        argument_map,
        global_map: FxHashMap::default(),
        load_map: BTreeMap::new(),
        store_map: BTreeMap::new(),
        function,
        init,
        exit,
        exception,
        memory_read,
        memory_write,
        inlined: Vec::new(),
        bridged: FxHashMap::default(),
    };

    match syn.run_phases(bx) {
        Ok(()) => Ok(syn.into_kernel()),
        Err(e) => {
            syn.cleanup(&mut bx.ir);
            Err(e)
        }
    }
}

/// Rejects regions the transformation does not support before anything is
/// mutated: recursion into the containing function and invoke edges.
fn screen_region(ctx: &Context, blocks: &FxHashSet<BlockId>) -> Result<()> {
    for &b in blocks {
        for &i in ctx.block(b).insts() {
            match &ctx.inst(i).kind {
                InstKind::Invoke { .. } => return Err(Error::InvokeUnsupported),
                InstKind::Call {
                    callee: Callee::Direct(f),
                    ..
                } if *f == ctx.block_func(b) => {
                    return Err(Error::RecursionUnsupported);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

impl Synth {
    fn run_phases(&mut self, bx: &mut BuildContext) -> Result<()> {
        self.clone_region(bx)?;
        self.inline_callees(bx)?;
        self.copy_globals(&mut bx.ir);
        self.remap(&mut bx.ir);
        self.repipe(&mut bx.ir);
        self.export_signatures(&mut bx.ir);
        self.build_memory(&mut bx.ir)?;
        self.seed_memory(&mut bx.ir)?;
        self.build_init(&mut bx.ir)?;
        self.build_exit(&mut bx.ir)?;
        self.remap_nested_kernels(bx)?;
        self.apply_metadata(&mut bx.ir);
        Ok(())
    }

    /// Detaches everything this build attached to the output module.
    fn cleanup(&self, ctx: &mut Context) {
        ctx.remove_function(self.function);
        ctx.remove_function(self.memory_read);
        ctx.remove_function(self.memory_write);
        for &g in self.global_map.values() {
            ctx.remove_global(g);
        }
    }

    fn into_kernel(self) -> Kernel {
        // Exit producers were recorded on original blocks; publish the map
        // keyed by their images in the kernel function. Bridge blocks
        // already live there.
        let exit_map = self
            .facts
            .exit_map
            .iter()
            .map(|(&b, &e)| (self.vmap.block(b).unwrap_or(b), e))
            .collect();
        Kernel {
            name: self.name,
            function: Some(self.function),
            init: Some(self.init),
            exit: Some(self.exit),
            exception: Some(self.exception),
            memory_read: Some(self.memory_read),
            memory_write: Some(self.memory_write),
            body: self.facts.body,
            termination: self.facts.termination,
            conditional: self.facts.conditional,
            entrances: self.facts.entrances,
            exit_map,
            region_exit_map: self.facts.exit_map,
            exit_target: self.facts.exit_target,
            external_values: self.external_values,
            vmap: self.vmap,
            argument_map: self.argument_map,
            global_map: self.global_map,
            load_map: self.load_map,
            store_map: self.store_map,
            inlined: self.inlined,
            valid: true,
        }
    }

    /// Tags partitioned blocks, names the synthesized entities and strips
    /// debug information. Failures here degrade to warnings; an annotated
    /// kernel is preferable but an unannotated one is still usable.
    fn apply_metadata(&mut self, ctx: &mut Context) {
        use crate::metadata::{TikMetadata, DEBUG_LOC, KERNEL_NAME, TIK_METADATA};
        use crate::ir::MetaValue;

        let blocks = ctx.function(self.function).blocks().to_vec();
        let mut dbg_intrinsics = Vec::new();
        for &b in &blocks {
            for &i in &ctx.block(b).insts().to_vec() {
                ctx.remove_inst_meta(i, DEBUG_LOC);
                if let InstKind::Call {
                    callee: Callee::Direct(f),
                    ..
                } = &ctx.inst(i).kind
                {
                    if ctx.function(*f).name.starts_with("llvm.dbg") {
                        dbg_intrinsics.push(i);
                    }
                }
            }
        }
        for i in dbg_intrinsics {
            ctx.erase_inst(i);
        }

        let name_meta = MetaValue::Str(self.name.clone());
        ctx.set_func_meta(self.function, KERNEL_NAME, name_meta.clone());
        ctx.set_func_meta(self.memory_read, KERNEL_NAME, name_meta.clone());
        ctx.set_func_meta(self.memory_write, KERNEL_NAME, name_meta.clone());
        for &g in self.global_map.values() {
            ctx.set_global_meta(g, KERNEL_NAME, name_meta.clone());
        }

        let tag = |ctx: &mut Context, set: &FxHashSet<BlockId>, tag: TikMetadata| {
            for &b in set {
                match ctx.first_non_phi(b) {
                    Some(i) => ctx.set_inst_meta(i, TIK_METADATA, tag.as_meta()),
                    None => warn!(
                        "kernel '{}': cannot tag empty block with {tag:?}",
                        self.name
                    ),
                }
            }
        };
        tag(ctx, &self.facts.body, TikMetadata::Body);
        tag(ctx, &self.facts.termination, TikMetadata::Termination);
        // Conditional blocks sit inside the body; tagging them last lets the
        // more specific tag win.
        tag(ctx, &self.facts.conditional, TikMetadata::Conditional);
    }
}
