//! The abstract memory interface.
//!
//! Every pointer a load or store in the kernel function touches is promoted
//! to a module global, and the accesses themselves are routed through two
//! synthesized selector functions: `MemoryRead` and `MemoryWrite` take an
//! `i64` index and return the current pointer as an `i64`, folded out of a
//! chain of `select`s over the promoted globals. Loads and stores become
//! `call` + `inttoptr` + `load`/`store` triples, and Init seeds each
//! argument-backed global so the selectors always observe live pointers.

use log::warn;
use rustc_hash::FxHashMap;

use crate::ir::{
    Callee, CastOp, CmpPred, Constant, Context, FuncId, GlobalVar, InstId, InstKind, Type, Value,
};
use crate::metadata::{TikSynthetic, TIK_SYNTHETIC};
use crate::{Error, Result};

use super::kernel::Synth;

impl Synth {
    /// Builds the selector functions and rewrites every load and store in
    /// the kernel function to go through them.
    pub(crate) fn build_memory(&mut self, ctx: &mut Context) -> Result<()> {
        let mut load_values: Vec<Value> = Vec::new();
        let mut store_values: Vec<Value> = Vec::new();
        for &b in &ctx.function(self.function).blocks().to_vec() {
            for &i in ctx.block(b).insts() {
                if already_rewritten(ctx, i) {
                    continue;
                }
                match &ctx.inst(i).kind {
                    InstKind::Load { ptr, .. } => {
                        if !load_values.contains(ptr) {
                            load_values.push(ptr.clone());
                        }
                    }
                    InstKind::Store { ptr, .. } => {
                        if !store_values.contains(ptr) {
                            store_values.push(ptr.clone());
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut load_index = FxHashMap::default();
        let mut store_index = FxHashMap::default();
        self.build_selector(ctx, self.memory_read, &load_values, true, &mut load_index);
        self.build_selector(ctx, self.memory_write, &store_values, false, &mut store_index);
        self.rewrite_accesses(ctx, &mut load_index, &mut store_index)
    }

    /// Emits one selector body: per promoted pointer, load the global,
    /// convert to `i64`, and fold into a `select` chain keyed on the index
    /// argument.
    fn build_selector(
        &mut self,
        ctx: &mut Context,
        selector: FuncId,
        pointers: &[Value],
        reads: bool,
        index: &mut FxHashMap<Value, i64>,
    ) {
        let entry = ctx.append_block(selector, "entry");
        let mut prior: Option<Value> = None;

        for (i, ptr) in pointers.iter().enumerate() {
            let i = i as i64;
            let pty = ctx.value_type(ptr);
            let g = match self.global_map.get(ptr) {
                Some(&g) => g,
                None => {
                    // The selectors and the kernel function share these
                    // pointers, so they live at module scope.
                    let g = ctx.add_global(
                        self.tik,
                        GlobalVar::new("", pty.clone(), Some(Constant::Null(pty.clone()))),
                    );
                    self.global_map.insert(ptr.clone(), g);
                    g
                }
            };
            self.vmap.values.insert(ptr.clone(), Value::Global(g));
            if reads {
                self.load_map.insert(i, g);
            } else {
                self.store_map.insert(i, g);
            }
            index.insert(ptr.clone(), i);

            let loaded = ctx.push(
                entry,
                InstKind::Load {
                    ty: pty,
                    ptr: Value::Global(g),
                },
            );
            let converted = ctx.push(
                entry,
                InstKind::Cast {
                    op: CastOp::PtrToInt,
                    value: Value::Inst(loaded),
                    to: Type::Int(64),
                },
            );
            prior = Some(match prior {
                None => Value::Inst(converted),
                Some(prev) => {
                    let cmp = ctx.push(
                        entry,
                        InstKind::Icmp {
                            pred: CmpPred::Eq,
                            lhs: Value::Arg(selector, 0),
                            rhs: Value::i64(i),
                        },
                    );
                    let sel = ctx.push(
                        entry,
                        InstKind::Select {
                            cond: Value::Inst(cmp),
                            on_true: Value::Inst(converted),
                            on_false: prev,
                        },
                    );
                    Value::Inst(sel)
                }
            });
        }

        let result = match prior {
            Some(v) => v,
            None => {
                if reads {
                    warn!("kernel '{}': empty kernel read encountered", self.name);
                } else {
                    warn!("kernel '{}': empty kernel write encountered", self.name);
                }
                Value::i64(0)
            }
        };
        ctx.push(entry, InstKind::Ret { value: Some(result) });
    }

    fn rewrite_accesses(
        &mut self,
        ctx: &mut Context,
        load_index: &mut FxHashMap<Value, i64>,
        store_index: &mut FxHashMap<Value, i64>,
    ) -> Result<()> {
        let mut doomed: Vec<InstId> = Vec::new();
        for &b in &ctx.function(self.function).blocks().to_vec() {
            for &i in &ctx.block(b).insts().to_vec() {
                if already_rewritten(ctx, i) {
                    continue;
                }
                match ctx.inst(i).kind.clone() {
                    InstKind::Load { ty, ptr } => {
                        let idx = *load_index
                            .get(&ptr)
                            .ok_or(Error::UnmappedPointer("load"))?;
                        let pty = ctx.value_type(&ptr);
                        let call = ctx.insert_before(
                            i,
                            InstKind::Call {
                                callee: Callee::Direct(self.memory_read),
                                args: vec![Value::i64(idx)],
                            },
                        );
                        let cast = self.selector_cast(ctx, i, call, pty);
                        let replacement = ctx.insert_before(
                            i,
                            InstKind::Load {
                                ty,
                                ptr: Value::Inst(cast),
                            },
                        );
                        ctx.replace_all_uses_in_func(
                            self.function,
                            &Value::Inst(i),
                            &Value::Inst(replacement),
                        );
                        // The erased load may itself be a promoted pointer;
                        // its bookkeeping follows the replacement.
                        transfer_key(load_index, i, replacement);
                        transfer_key(store_index, i, replacement);
                        if let Some(g) = self.global_map.remove(&Value::Inst(i)) {
                            self.global_map.insert(Value::Inst(replacement), g);
                        }
                        self.vmap
                            .retarget(&Value::Inst(i), &Value::Inst(replacement));
                        doomed.push(i);
                    }
                    InstKind::Store { value, ptr } => {
                        let idx = *store_index
                            .get(&ptr)
                            .ok_or(Error::UnmappedPointer("store"))?;
                        let pty = ctx.value_type(&ptr);
                        let call = ctx.insert_before(
                            i,
                            InstKind::Call {
                                callee: Callee::Direct(self.memory_write),
                                args: vec![Value::i64(idx)],
                            },
                        );
                        let cast = self.selector_cast(ctx, i, call, pty);
                        ctx.insert_before(
                            i,
                            InstKind::Store {
                                value,
                                ptr: Value::Inst(cast),
                            },
                        );
                        doomed.push(i);
                    }
                    _ => {}
                }
            }
        }
        for i in doomed {
            ctx.erase_inst(i);
        }
        Ok(())
    }

    fn selector_cast(
        &self,
        ctx: &mut Context,
        before: InstId,
        call: InstId,
        ptr_ty: Type,
    ) -> InstId {
        let cast = ctx.insert_before(
            before,
            InstKind::Cast {
                op: CastOp::IntToPtr,
                value: Value::Inst(call),
                to: ptr_ty,
            },
        );
        ctx.set_inst_meta(cast, TIK_SYNTHETIC, TikSynthetic::Cast.as_meta());
        cast
    }

    /// Seeds the promoted globals: argument-backed pointers are stored in
    /// Init, and every global backed by an in-kernel instruction receives a
    /// trailing store right after that instruction so the global always
    /// holds the latest value.
    pub(crate) fn seed_memory(&mut self, ctx: &mut Context) -> Result<()> {
        let mut covered: rustc_hash::FxHashSet<crate::ir::GlobalId> = Default::default();
        for (i, ev) in self.external_values.iter().enumerate() {
            let mapped = self
                .vmap
                .value(ev)
                .cloned()
                .ok_or_else(|| Error::Internal("external value missing from vmap".into()))?;
            if let Some(&g) = self.global_map.get(&mapped) {
                covered.insert(g);
                let store = ctx.push(
                    self.init,
                    InstKind::Store {
                        value: Value::Arg(self.function, (i + 1) as u32),
                        ptr: Value::Global(g),
                    },
                );
                ctx.set_inst_meta(store, TIK_SYNTHETIC, TikSynthetic::Store.as_meta());
            }
        }

        for &b in &ctx.function(self.function).blocks().to_vec() {
            for &i in &ctx.block(b).insts().to_vec() {
                let Some(&g) = self.global_map.get(&Value::Inst(i)) else {
                    continue;
                };
                if covered.contains(&g) {
                    continue;
                }
                if matches!(ctx.inst(i).kind, InstKind::Invoke { .. }) {
                    return Err(Error::InvokeUnsupported);
                }
                if ctx.inst(i).kind.is_terminator() {
                    continue;
                }
                let store = ctx.insert_after(
                    i,
                    InstKind::Store {
                        value: Value::Inst(i),
                        ptr: Value::Global(g),
                    },
                );
                ctx.set_inst_meta(store, TIK_SYNTHETIC, TikSynthetic::Store.as_meta());
            }
        }
        Ok(())
    }
}

fn transfer_key(map: &mut FxHashMap<Value, i64>, from: InstId, to: InstId) {
    if let Some(v) = map.remove(&Value::Inst(from)) {
        map.insert(Value::Inst(to), v);
    }
}

/// An access is already routed through the selectors when its pointer is a
/// generator-emitted cast, or when the access itself is a seeding store.
/// Skipping them keeps the rewrite idempotent.
fn already_rewritten(ctx: &Context, i: InstId) -> bool {
    if ctx.inst_meta(i, TIK_SYNTHETIC).is_some() {
        return true;
    }
    let ptr = match &ctx.inst(i).kind {
        InstKind::Load { ptr, .. } | InstKind::Store { ptr, .. } => ptr,
        _ => return false,
    };
    matches!(ptr, Value::Inst(p)
        if matches!(ctx.inst(*p).kind, InstKind::Cast { op: CastOp::IntToPtr, .. })
            && ctx.inst_meta(*p, TIK_SYNTHETIC).is_some())
}
