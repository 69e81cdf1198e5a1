//! Per-block cloning into the kernel function.
//!
//! Plain region blocks are cloned and their phi predecessors from outside
//! the region rewired to Init. Blocks owned by an already-built nested
//! kernel are not cloned; instead, one intermediate block per entrance of
//! the child calls the child's function and switches on its exit id. An
//! exit that simultaneously leaves both kernels is routed through a bridge
//! block that inherits the outer exit id.

use log::warn;

use crate::build::BuildContext;
use crate::ir::{BlockId, Callee, InstKind, MetaValue, Value};
use crate::metadata::{block_id, KERNEL_CALL};
use crate::{Error, Result};

use super::kernel::Synth;

impl Synth {
    pub(crate) fn clone_region(&mut self, bx: &mut BuildContext) -> Result<()> {
        let sorted = crate::analysis::sorted_region(&self.blocks);
        for b in sorted {
            // Snapshot what the nested-kernel protocol needs; the kernel
            // itself stays untouched.
            let child = block_id(&bx.ir, b)
                .and_then(|id| bx.kernel_owning_block_id(id))
                .filter(|k| k.valid)
                .map(|k| {
                    (
                        k.function,
                        k.entrances.clone(),
                        k.exit_target.clone(),
                        k.region_exit_map.clone(),
                    )
                });
            match child {
                Some((c_fn, c_entrances, c_exit_target, c_exit_map)) => {
                    let c_fn = c_fn
                        .ok_or_else(|| Error::Internal("valid kernel without function".into()))?;
                    if c_entrances.contains(&b) {
                        self.emit_intermediates(
                            bx,
                            b,
                            c_fn,
                            &c_entrances,
                            &c_exit_target,
                            &c_exit_map,
                        )?;
                    } else {
                        // Interior child block: it lives inside the child's
                        // function and leaves no clone here.
                        self.facts.conditional.remove(&b);
                        self.facts.body.remove(&b);
                        self.facts.termination.remove(&b);
                    }
                }
                None => self.clone_plain_block(bx, b)?,
            }
        }
        Ok(())
    }

    fn clone_plain_block(&mut self, bx: &mut BuildContext, b: BlockId) -> Result<()> {
        let cb = bx.ir.clone_block(b, self.function, &mut self.vmap);

        if self.facts.conditional.remove(&b) {
            self.facts.conditional.insert(cb);
        }
        if self.facts.body.remove(&b) {
            self.facts.body.insert(cb);
        } else if self.facts.termination.remove(&b) {
            self.facts.termination.insert(cb);
        } else {
            return Err(Error::Internal(
                "cloned block not in body or termination".into(),
            ));
        }

        // Phi edges from outside the region now flow in through Init.
        let mut rescheduled = 0;
        for p in bx.ir.phis(cb) {
            if let InstKind::Phi { incoming, .. } = &mut bx.ir.inst_mut(p).kind {
                for (_, pred) in incoming {
                    if !self.blocks.contains(pred) {
                        *pred = self.init;
                        rescheduled += 1;
                    }
                }
            }
        }
        if rescheduled > 1 {
            warn!(
                "kernel '{}': rescheduled more than one phi predecessor",
                self.name
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_intermediates(
        &mut self,
        bx: &mut BuildContext,
        b: BlockId,
        c_fn: crate::ir::FuncId,
        c_entrances: &[BlockId],
        c_exit_target: &std::collections::BTreeMap<i64, BlockId>,
        c_exit_map: &std::collections::BTreeMap<BlockId, i64>,
    ) -> Result<()> {
        let in_body = self.facts.body.contains(&b);
        let in_term = self.facts.termination.contains(&b);
        if !in_body && !in_term {
            return Err(Error::Internal(
                "nested entrance not in body or termination".into(),
            ));
        }

        let n_params = bx.ir.function(c_fn).sig().params.len();
        for (ent_idx, _) in c_entrances.iter().enumerate() {
            let inter = bx.ir.append_block(self.function, "");

            // Forward the child's own formals for now; the nested-argument
            // remap resolves them against this kernel at the end.
            let mut args = vec![Value::i8(ent_idx as i64)];
            for j in 1..n_params {
                args.push(Value::Arg(c_fn, j as u32));
            }
            let call = bx.ir.push(
                inter,
                InstKind::Call {
                    callee: Callee::Direct(c_fn),
                    args,
                },
            );
            bx.ir.set_inst_meta(call, KERNEL_CALL, MetaValue::Int(1));

            let sw = bx.ir.push(
                inter,
                InstKind::Switch {
                    value: Value::Inst(call),
                    default: self.exception,
                    cases: Vec::new(),
                },
            );
            for (&eid, &target) in c_exit_target {
                if self.blocks.contains(&target) {
                    // Still inside this kernel; the remap pass swaps the
                    // original block for its clone.
                    bx.ir.switch_add_case(sw, eid, target);
                } else {
                    let bridge = self.bridge_double_exit(bx, eid, target, c_exit_map)?;
                    bx.ir.switch_add_case(sw, eid, bridge);
                }
            }

            self.vmap.blocks.insert(b, inter);
            if in_body {
                self.facts.body.insert(inter);
            } else {
                self.facts.termination.insert(inter);
            }
        }
        self.facts.body.remove(&b);
        self.facts.termination.remove(&b);
        self.facts.conditional.remove(&b);
        Ok(())
    }

    /// An exit of the child that also leaves this kernel: route it through
    /// a one-block bridge to Exit, and re-key this kernel's exit map so the
    /// bridge inherits the exit id of the unique child block producing it.
    fn bridge_double_exit(
        &mut self,
        bx: &mut BuildContext,
        child_exit_id: i64,
        target: BlockId,
        c_exit_map: &std::collections::BTreeMap<BlockId, i64>,
    ) -> Result<BlockId> {
        let producers: Vec<BlockId> = c_exit_map
            .iter()
            .filter(|&(_, &e)| e == child_exit_id)
            .map(|(&b, _)| b)
            .collect();
        let &[producer] = producers.as_slice() else {
            return Err(Error::AmbiguousDoubleExit);
        };

        // The producer's exit entry moves onto the bridge; when the target
        // was already bridged the entry just folds away.
        let outer_id = self.facts.exit_map.remove(&producer);
        if let Some(&bridge) = self.bridged.get(&target) {
            return Ok(bridge);
        }

        let bridge = bx.ir.append_block(self.function, "");
        bx.ir.push(bridge, InstKind::Br { dest: self.exit });

        let outer_id = outer_id.ok_or_else(|| {
            Error::Internal("double exit producer missing from exit map".into())
        })?;
        self.facts.exit_map.insert(bridge, outer_id);
        self.bridged.insert(target, bridge);
        Ok(bridge)
    }
}
