//! The finishing passes: value remapping, edge repiping, signature export,
//! the entry/exit protocol and nested-kernel argument resolution.

use log::warn;

use crate::build::BuildContext;
use crate::ir::{
    Callee, Context, GlobalVar, InstId, InstKind, Type, Value,
};
use crate::{Error, Result};

use super::kernel::Synth;

impl Synth {
    /// Clones module globals referenced by the kernel function but living
    /// in another module into the output module, preserving initializer,
    /// linkage, address space and thread-local mode.
    pub(crate) fn copy_globals(&mut self, ctx: &mut Context) {
        for &b in &ctx.function(self.function).blocks().to_vec() {
            for &i in &ctx.block(b).insts().to_vec() {
                for op in ctx.inst(i).kind.operands() {
                    match op {
                        Value::Global(g) => {
                            if ctx.global_module(g) == self.tik {
                                continue;
                            }
                            if self.vmap.values.contains_key(&Value::Global(g)) {
                                continue;
                            }
                            let src = ctx.global(g);
                            let mut copy =
                                GlobalVar::new(src.name.clone(), src.ty.clone(), src.init.clone());
                            copy.is_const = src.is_const;
                            copy.linkage = src.linkage;
                            copy.thread_local = src.thread_local;
                            copy.addr_space = src.addr_space;
                            let ng = ctx.add_global(self.tik, copy);
                            self.vmap
                                .values
                                .insert(Value::Global(g), Value::Global(ng));
                        }
                        Value::Func(_) => {
                            warn!(
                                "kernel '{}': non-variable global reference left in place",
                                self.name
                            );
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Rewrites every instruction of the kernel function through the value
    /// map: cloned operands to their clones, externals to arguments, copied
    /// globals to their copies, and block references to the cloned blocks.
    pub(crate) fn remap(&mut self, ctx: &mut Context) {
        for &b in &ctx.function(self.function).blocks().to_vec() {
            for &i in &ctx.block(b).insts().to_vec() {
                ctx.remap_inst(i, &self.vmap);
            }
        }
    }

    /// Rewrites any terminator edge that still leaves the kernel function
    /// to target Exit. Region returns collapse onto Exit the same way, so
    /// the function has a single well-typed return path.
    pub(crate) fn repipe(&mut self, ctx: &mut Context) {
        for &b in &ctx.function(self.function).blocks().to_vec() {
            let Some(t) = ctx.terminator(b) else {
                continue;
            };
            if matches!(ctx.inst(t).kind, InstKind::Ret { .. })
                && b != self.exit
                && b != self.exception
            {
                ctx.inst_mut(t).kind = InstKind::Br { dest: self.exit };
                continue;
            }
            for s in ctx.inst(t).kind.successors() {
                if ctx.block_func(s) != self.function {
                    ctx.replace_successor(b, s, self.exit);
                }
            }
        }
    }

    /// Retargets calls to functions of other modules onto declarations in
    /// the output module, preserving attributes.
    pub(crate) fn export_signatures(&mut self, ctx: &mut Context) {
        for &b in &ctx.function(self.function).blocks().to_vec() {
            for &i in &ctx.block(b).insts().to_vec() {
                let callee = match &ctx.inst(i).kind {
                    InstKind::Call {
                        callee: Callee::Direct(f),
                        ..
                    } => *f,
                    _ => continue,
                };
                if ctx.func_module(callee) == self.tik {
                    continue;
                }
                let name = ctx.function(callee).name.clone();
                let sig = ctx.function(callee).sig().clone();
                let attrs = ctx.function(callee).attributes().to_vec();
                let decl = ctx.get_or_insert_function(self.tik, &name, sig);
                ctx.function_mut(decl).set_attributes(attrs);
                if let InstKind::Call { callee, .. } = &mut ctx.inst_mut(i).kind {
                    *callee = Callee::Direct(decl);
                }
            }
        }
    }

    /// Emits the entrance switch: `switch arg0, Exception, { i -> clone of
    /// entrance i }`.
    pub(crate) fn build_init(&mut self, ctx: &mut Context) -> Result<()> {
        let mut cases = Vec::with_capacity(self.facts.entrances.len());
        for (i, &ent) in self.facts.entrances.iter().enumerate() {
            let dest = self
                .vmap
                .block(ent)
                .ok_or_else(|| Error::Internal("entrance has no clone".into()))?;
            cases.push((i as i64, dest));
        }
        ctx.push(
            self.init,
            InstKind::Switch {
                value: Value::Arg(self.function, 0),
                default: self.exception,
                cases,
            },
        );
        Ok(())
    }

    /// Emits the exit phi over the recorded exit ids and the `-2` sentinel
    /// return in Exception.
    pub(crate) fn build_exit(&mut self, ctx: &mut Context) -> Result<()> {
        let mut incoming = Vec::with_capacity(self.facts.exit_map.len());
        for (&producer, &eid) in &self.facts.exit_map {
            let from = if ctx.block_module(producer) == self.tik {
                producer
            } else {
                self.vmap
                    .block(producer)
                    .ok_or_else(|| Error::Internal("exit producer has no clone".into()))?
            };
            incoming.push((Value::i8(eid), from));
        }
        let phi = ctx.push(
            self.exit,
            InstKind::Phi {
                ty: Type::Int(8),
                incoming,
            },
        );
        ctx.push(
            self.exit,
            InstKind::Ret {
                value: Some(Value::Inst(phi)),
            },
        );
        ctx.push(
            self.exception,
            InstKind::Ret {
                value: Some(Value::i8(-2)),
            },
        );
        Ok(())
    }

    /// Resolves the placeholder arguments of nested-kernel calls: each
    /// child formal maps back through the child's argument map to an
    /// original value, which must correspond to a value in this kernel's
    /// rewrite table or to one of its own arguments.
    pub(crate) fn remap_nested_kernels(&mut self, bx: &mut BuildContext) -> Result<()> {
        let mut kernel_calls: Vec<(InstId, crate::ir::FuncId)> = Vec::new();
        for &b in &bx.ir.function(self.function).blocks().to_vec() {
            for &i in bx.ir.block(b).insts() {
                if let InstKind::Call {
                    callee: Callee::Direct(f),
                    ..
                } = &bx.ir.inst(i).kind
                {
                    if bx.kernel_of_function(*f).is_some() {
                        kernel_calls.push((i, *f));
                    }
                }
            }
        }

        for (call, child_fn) in kernel_calls {
            let child_args = bx
                .kernel_of_function(child_fn)
                .map(|k| k.argument_map.clone())
                .unwrap_or_default();
            let actuals = match &bx.ir.inst(call).kind {
                InstKind::Call { args, .. } => args.clone(),
                _ => continue,
            };
            let mut resolved = actuals.clone();
            for (slot, op) in actuals.iter().enumerate() {
                match op {
                    Value::Arg(af, j) if *af == child_fn => {
                        let original = child_args
                            .get(j)
                            .ok_or(Error::DanglingNestedArg)?;
                        resolved[slot] = self.resolve_against_self(original)?;
                    }
                    Value::Arg(..) => return Err(Error::DanglingNestedArg),
                    Value::Const(_) => {}
                    _ => return Err(Error::UnexpectedArgKind),
                }
            }
            if let InstKind::Call { args, .. } = &mut bx.ir.inst_mut(call).kind {
                *args = resolved;
            }
        }
        Ok(())
    }

    fn resolve_against_self(&self, original: &Value) -> Result<Value> {
        if let Some(v) = self.vmap.value(original) {
            return Ok(v.clone());
        }
        for (&idx, v) in &self.argument_map {
            if v == original {
                return Ok(Value::Arg(self.function, idx));
            }
        }
        Err(Error::DanglingNestedArg)
    }
}
