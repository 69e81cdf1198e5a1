//! Callee inlining with shared bodies and switch-back dispatch.
//!
//! Every call remaining in the kernel function that targets a function with
//! a body is folded into the kernel. A callee is cloned once; its entrance
//! block carries an `i8` phi selecting the call site plus one phi per
//! formal argument, and a shared return block rebuilds the return value and
//! dispatches back to each site's continuation through a switch. Additional
//! call sites to an already-inlined callee only extend the phis and the
//! dispatch.

use crate::build::BuildContext;
use crate::ir::{BlockId, Callee, Context, FuncId, InstId, InstKind, Type, Value};
use crate::metadata::KERNEL_CALL;
use crate::{Error, Result};

use super::kernel::Synth;

/// Record of one callee folded into a kernel function.
#[derive(Debug)]
pub struct InlinedCallee {
    /// The original callee.
    pub callee: FuncId,
    /// The shared entrance block holding the fan-in phis.
    pub entrance: BlockId,
    /// The `i8` phi selecting the originating call site.
    pub branch_phi: InstId,
    /// One phi per formal argument of the callee.
    pub arg_phis: Vec<InstId>,
    /// The phi merging return values; `None` for void callees.
    pub return_phi: Option<InstId>,
    /// The switch dispatching back to the call sites' continuations.
    pub dispatch: InstId,
    next_index: i64,
}

impl Synth {
    pub(crate) fn inline_callees(&mut self, bx: &mut BuildContext) -> Result<()> {
        // Inlined bodies can themselves contain calls, so iterate to a
        // fixed point; every processed site erases its call instruction.
        loop {
            let pending = self.collect_inlinable(&bx.ir)?;
            if pending.is_empty() {
                return Ok(());
            }
            for ci in pending {
                if bx.ir.inst_block(ci).is_none() {
                    continue;
                }
                self.inline_site(&mut bx.ir, ci)?;
            }
        }
    }

    fn collect_inlinable(&self, ctx: &Context) -> Result<Vec<InstId>> {
        let mut out = Vec::new();
        for &b in ctx.function(self.function).blocks() {
            for &i in ctx.block(b).insts() {
                let InstKind::Call { callee, .. } = &ctx.inst(i).kind else {
                    continue;
                };
                if ctx.inst_meta(i, KERNEL_CALL).is_some() {
                    continue;
                }
                match callee {
                    Callee::Indirect(_) => {
                        return Err(Error::UnsupportedCall("indirect call".into()))
                    }
                    Callee::Direct(f) => {
                        if !ctx.function(*f).is_declaration() {
                            out.push(i);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn inline_site(&mut self, ctx: &mut Context, ci: InstId) -> Result<()> {
        let cb = ctx
            .inst_block(ci)
            .ok_or_else(|| Error::Internal("inline site already erased".into()))?;
        let (callee, actuals) = match &ctx.inst(ci).kind {
            InstKind::Call {
                callee: Callee::Direct(f),
                args,
            } => (*f, args.clone()),
            InstKind::Call { .. } => {
                return Err(Error::UnsupportedCall("indirect call".into()))
            }
            _ => return Err(Error::Internal("inline site is not a call".into())),
        };

        let site = match self.inlined.iter().position(|s| s.callee == callee) {
            Some(idx) => idx,
            None => self.clone_callee(ctx, callee)?,
        };

        // Per-site wiring: select this site in the branch phi, feed the
        // argument phis with this site's actuals, dispatch back to the
        // post-call continuation.
        let index = self.inlined[site].next_index;
        self.inlined[site].next_index += 1;
        let branch_phi = self.inlined[site].branch_phi;
        let entrance = self.inlined[site].entrance;
        let dispatch = self.inlined[site].dispatch;
        let return_phi = self.inlined[site].return_phi;
        let arg_phis = self.inlined[site].arg_phis.clone();

        ctx.phi_add_incoming(branch_phi, Value::i8(index), cb);
        for (j, &phi) in arg_phis.iter().enumerate() {
            let actual = actuals
                .get(j)
                .cloned()
                .ok_or_else(|| Error::Internal("call site arity mismatch".into()))?;
            ctx.phi_add_incoming(phi, actual, cb);
        }

        let term = ctx
            .terminator(cb)
            .ok_or(Error::UnimplementedTerminator)?;
        let continuation = match ctx.inst(term).kind {
            InstKind::Br { dest } => dest,
            _ => return Err(Error::UnimplementedTerminator),
        };
        ctx.switch_add_case(dispatch, index, continuation);
        ctx.inst_mut(term).kind = InstKind::Br { dest: entrance };

        if let Some(rp) = return_phi {
            ctx.replace_all_uses_in_func(self.function, &Value::Inst(ci), &Value::Inst(rp));
            // Keep the rewrite table tracking the replacement, the way a
            // value-handle-based map would.
            self.vmap.retarget(&Value::Inst(ci), &Value::Inst(rp));
        }
        ctx.erase_inst(ci);
        Ok(())
    }

    /// Clones the callee body into the kernel function and builds the
    /// shared entrance and return blocks. Returns the new site index.
    fn clone_callee(&mut self, ctx: &mut Context, callee: FuncId) -> Result<usize> {
        let callee_blocks = ctx.function(callee).blocks().to_vec();
        for &fb in &callee_blocks {
            for &i in ctx.block(fb).insts() {
                if matches!(ctx.inst(i).kind, InstKind::Invoke { .. }) {
                    return Err(Error::InvokeUnsupported);
                }
            }
        }

        let entrance = ctx.append_block(self.function, "");
        self.facts.body.insert(entrance);
        let branch_phi = ctx.push(
            entrance,
            InstKind::Phi {
                ty: Type::Int(8),
                incoming: Vec::new(),
            },
        );
        let params = ctx.function(callee).sig().params.clone();
        let mut arg_phis = Vec::with_capacity(params.len());
        for (j, pty) in params.iter().enumerate() {
            let phi = ctx.push(
                entrance,
                InstKind::Phi {
                    ty: pty.clone(),
                    incoming: Vec::new(),
                },
            );
            self.vmap
                .values
                .insert(Value::Arg(callee, j as u32), Value::Inst(phi));
            arg_phis.push(phi);
        }

        let mut cloned_set: rustc_hash::FxHashSet<BlockId> = rustc_hash::FxHashSet::default();
        for &fb in &callee_blocks {
            let cloned = ctx.clone_block(fb, self.function, &mut self.vmap);
            cloned_set.insert(cloned);
        }
        // Calls inside the cloned body need the same clean boundary as
        // region calls before they are folded in on a later round.
        crate::analysis::split_blocks(ctx, &mut cloned_set);

        let entry_clone = self
            .vmap
            .block(*callee_blocks.first().ok_or_else(|| {
                Error::Internal("inlining a declaration".into())
            })?)
            .ok_or_else(|| Error::Internal("callee entry not cloned".into()))?;
        ctx.push(entrance, InstKind::Br { dest: entry_clone });

        // Collect the cloned returns into a shared return block.
        let return_block = ctx.append_block(self.function, "");
        self.facts.body.insert(return_block);
        let ret_ty = ctx.function(callee).sig().ret.clone();
        let mut incoming = Vec::new();
        let mut sorted_clones: Vec<BlockId> = cloned_set.into_iter().collect();
        sorted_clones.sort_unstable();
        for cloned in sorted_clones {
            let Some(t) = ctx.terminator(cloned) else {
                continue;
            };
            if let InstKind::Ret { value } = ctx.inst(t).kind.clone() {
                if !ret_ty.is_void() {
                    let v = value.ok_or_else(|| {
                        Error::Internal("non-void callee returns nothing".into())
                    })?;
                    incoming.push((v, cloned));
                }
                ctx.erase_inst(t);
                ctx.push(cloned, InstKind::Br { dest: return_block });
            }
        }

        let return_phi = if ret_ty.is_void() {
            None
        } else {
            if incoming.is_empty() {
                return Err(Error::MissingReturnInTree);
            }
            Some(ctx.push(
                return_block,
                InstKind::Phi {
                    ty: ret_ty,
                    incoming,
                },
            ))
        };
        let dispatch = ctx.push(
            return_block,
            InstKind::Switch {
                value: Value::Inst(branch_phi),
                default: self.exception,
                cases: Vec::new(),
            },
        );

        self.inlined.push(InlinedCallee {
            callee,
            entrance,
            branch_phi,
            arg_phis,
            return_phi,
            dispatch,
            next_index: 0,
        });
        Ok(self.inlined.len() - 1)
    }
}
