//! Textual dumps of functions, blocks and instructions.
//!
//! The per-kernel JSON descriptor carries string renderings of the
//! synthesized entities. The format follows the familiar assembly-style
//! conventions: instruction results are numbered `%N` per function, arguments
//! print as `%argN`, globals as `@name`, and constants carry their type.

use rustc_hash::FxHashMap;
use std::fmt::Write;

use crate::ir::handle::{BlockId, FuncId, InstId};
use crate::ir::inst::{Callee, InstKind};
use crate::ir::module::Context;
use crate::ir::value::{Constant, Value};

/// Renders the entities of one function as text.
///
/// Numbering is assigned once at construction, walking blocks in layout
/// order, so repeated dumps of the same function are stable.
pub struct FunctionPrinter<'a> {
    ctx: &'a Context,
    func: FuncId,
    inst_names: FxHashMap<InstId, String>,
    block_labels: FxHashMap<BlockId, String>,
}

impl<'a> FunctionPrinter<'a> {
    /// Builds a printer for `func`.
    #[must_use]
    pub fn new(ctx: &'a Context, func: FuncId) -> Self {
        let mut inst_names = FxHashMap::default();
        let mut block_labels = FxHashMap::default();
        let mut used = FxHashMap::<String, usize>::default();
        let mut counter = 0usize;

        for &b in ctx.function(func).blocks() {
            let base = ctx.block(b).name.clone();
            let label = if base.is_empty() {
                format!("bb{}", block_labels.len())
            } else {
                base
            };
            let seen = used.entry(label.clone()).or_insert(0);
            *seen += 1;
            let label = if *seen == 1 {
                label
            } else {
                format!("{label}.{}", *seen - 1)
            };
            block_labels.insert(b, label);

            for &i in ctx.block(b).insts() {
                if !ctx.inst_type(i).is_void() {
                    inst_names.insert(i, format!("%{counter}"));
                    counter += 1;
                }
            }
        }

        Self {
            ctx,
            func,
            inst_names,
            block_labels,
        }
    }

    /// The label of a block.
    #[must_use]
    pub fn label(&self, b: BlockId) -> String {
        self.block_labels
            .get(&b)
            .cloned()
            .unwrap_or_else(|| format!("bb?{}", b.index()))
    }

    fn name_of(&self, i: InstId) -> String {
        self.inst_names
            .get(&i)
            .cloned()
            .unwrap_or_else(|| format!("%?{}", i.index()))
    }

    /// Renders a value without its type.
    #[must_use]
    pub fn value(&self, v: &Value) -> String {
        match v {
            Value::Inst(i) => self.name_of(*i),
            Value::Arg(_, idx) => format!("%arg{idx}"),
            Value::Global(g) => format!("@{}", self.ctx.global(*g).name),
            Value::Func(f) => format!("@{}", self.ctx.function(*f).name),
            Value::Const(c) => match c {
                Constant::Int { value, .. } => format!("{value}"),
                Constant::Float { bits, .. } => format!("0x{bits:X}"),
                Constant::Null(_) => "null".to_string(),
                Constant::Undef(_) => "undef".to_string(),
            },
        }
    }

    /// Renders a value prefixed with its type, e.g. `i64 %3`.
    #[must_use]
    pub fn typed_value(&self, v: &Value) -> String {
        format!("{} {}", self.ctx.value_type(v), self.value(v))
    }

    /// Renders a formal argument of the printed function, e.g. `i8 %arg0`.
    #[must_use]
    pub fn argument(&self, index: u32) -> String {
        let ty = &self.ctx.function(self.func).sig().params[index as usize];
        format!("{ty} %arg{index}")
    }

    /// Renders one instruction as a single line.
    #[must_use]
    pub fn inst_line(&self, i: InstId) -> String {
        let ctx = self.ctx;
        let mut s = String::new();
        if !ctx.inst_type(i).is_void() {
            let _ = write!(s, "{} = ", self.name_of(i));
        }
        match &ctx.inst(i).kind {
            InstKind::Phi { ty, incoming } => {
                let _ = write!(s, "phi {ty} ");
                for (n, (v, b)) in incoming.iter().enumerate() {
                    if n > 0 {
                        s.push_str(", ");
                    }
                    let _ = write!(s, "[ {}, %{} ]", self.value(v), self.label(*b));
                }
            }
            InstKind::Binary { op, lhs, rhs } => {
                let _ = write!(
                    s,
                    "{} {} {}, {}",
                    op.mnemonic(),
                    ctx.value_type(lhs),
                    self.value(lhs),
                    self.value(rhs)
                );
            }
            InstKind::Icmp { pred, lhs, rhs } => {
                let _ = write!(
                    s,
                    "icmp {} {} {}, {}",
                    pred.mnemonic(),
                    ctx.value_type(lhs),
                    self.value(lhs),
                    self.value(rhs)
                );
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let _ = write!(
                    s,
                    "select {}, {}, {}",
                    self.typed_value(cond),
                    self.typed_value(on_true),
                    self.typed_value(on_false)
                );
            }
            InstKind::Cast { op, value, to } => {
                let _ = write!(
                    s,
                    "{} {} to {to}",
                    op.mnemonic(),
                    self.typed_value(value)
                );
            }
            InstKind::Gep { base, indices, .. } => {
                let _ = write!(s, "getelementptr {}", self.typed_value(base));
                for idx in indices {
                    let _ = write!(s, ", {}", self.typed_value(idx));
                }
            }
            InstKind::Load { ty, ptr } => {
                let _ = write!(s, "load {ty}, {}", self.typed_value(ptr));
            }
            InstKind::Store { value, ptr } => {
                let _ = write!(
                    s,
                    "store {}, {}",
                    self.typed_value(value),
                    self.typed_value(ptr)
                );
            }
            InstKind::Call { callee, args } => {
                let _ = write!(s, "call {}", self.callee(callee));
                self.render_args(&mut s, args);
            }
            InstKind::Invoke {
                callee,
                args,
                normal,
                unwind,
            } => {
                let _ = write!(s, "invoke {}", self.callee(callee));
                self.render_args(&mut s, args);
                let _ = write!(
                    s,
                    " to label %{} unwind label %{}",
                    self.label(*normal),
                    self.label(*unwind)
                );
            }
            InstKind::Br { dest } => {
                let _ = write!(s, "br label %{}", self.label(*dest));
            }
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            } => {
                let _ = write!(
                    s,
                    "br {}, label %{}, label %{}",
                    self.typed_value(cond),
                    self.label(*then_dest),
                    self.label(*else_dest)
                );
            }
            InstKind::Switch {
                value,
                default,
                cases,
            } => {
                let _ = write!(
                    s,
                    "switch {}, label %{} [",
                    self.typed_value(value),
                    self.label(*default)
                );
                for (cv, b) in cases {
                    let _ = write!(
                        s,
                        " {} {cv}, label %{}",
                        self.ctx.value_type(value),
                        self.label(*b)
                    );
                }
                s.push_str(" ]");
            }
            InstKind::Ret { value: Some(v) } => {
                let _ = write!(s, "ret {}", self.typed_value(v));
            }
            InstKind::Ret { value: None } => s.push_str("ret void"),
            InstKind::Unreachable => s.push_str("unreachable"),
        }
        s
    }

    fn callee(&self, callee: &Callee) -> String {
        match callee {
            Callee::Direct(f) => format!(
                "{} @{}",
                self.ctx.function(*f).sig().ret,
                self.ctx.function(*f).name
            ),
            Callee::Indirect(v) => self.typed_value(v),
        }
    }

    fn render_args(&self, s: &mut String, args: &[Value]) {
        s.push('(');
        for (n, a) in args.iter().enumerate() {
            if n > 0 {
                s.push_str(", ");
            }
            s.push_str(&self.typed_value(a));
        }
        s.push(')');
    }

    /// Renders every instruction of a block, one string per instruction.
    #[must_use]
    pub fn block_lines(&self, b: BlockId) -> Vec<String> {
        self.ctx
            .block(b)
            .insts()
            .iter()
            .map(|&i| self.inst_line(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Signature, Type};

    #[test]
    fn renders_basic_instructions() {
        let mut ctx = Context::new();
        let m = ctx.add_module("m");
        let f = ctx.add_function(
            m,
            "f",
            Signature::new(vec![Type::Int(64)], Type::Int(64)),
        );
        let entry = ctx.append_block(f, "entry");
        let add = ctx.push(
            entry,
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Arg(f, 0),
                rhs: Value::i64(1),
            },
        );
        ctx.push(
            entry,
            InstKind::Ret {
                value: Some(Value::Inst(add)),
            },
        );

        let p = FunctionPrinter::new(&ctx, f);
        let lines = p.block_lines(entry);
        assert_eq!(lines[0], "%0 = add i64 %arg0, 1");
        assert_eq!(lines[1], "ret i64 %0");
    }

    #[test]
    fn labels_and_branches() {
        let mut ctx = Context::new();
        let m = ctx.add_module("m");
        let f = ctx.add_function(m, "f", Signature::new(vec![], Type::Void));
        let a = ctx.append_block(f, "Init");
        let b = ctx.append_block(f, "");
        ctx.push(a, InstKind::Br { dest: b });
        ctx.push(b, InstKind::Ret { value: None });

        let p = FunctionPrinter::new(&ctx, f);
        assert_eq!(p.inst_line(ctx.block(a).insts()[0]), "br label %bb1");
        assert_eq!(p.label(a), "Init");
    }
}
