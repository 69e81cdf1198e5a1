//! External-value classification.
//!
//! An external value is defined outside the region but used inside it:
//! instruction results whose defining block lies outside, and arguments of
//! the functions the region was carved from. Their order of first use fixes
//! the argument layout of the synthesized kernel function.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::{BlockId, Callee, Context, FuncId, InstKind, Value, ValueMap};

/// Collects the region's external values in deterministic first-use order.
///
/// `child_externals` maps an already-built nested kernel's function to its
/// own external values; when a call to such a function is seen, the child's
/// externals without a rewrite entry in `vmap` are pulled into the parent's
/// sequence so the parent can forward them.
#[must_use]
pub fn external_values(
    ctx: &Context,
    sorted: &[BlockId],
    blocks: &FxHashSet<BlockId>,
    child_externals: &FxHashMap<FuncId, Vec<Value>>,
    vmap: &ValueMap,
) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();

    for &b in sorted {
        for &i in ctx.block(b).insts() {
            let kind = &ctx.inst(i).kind;
            let child_callee = match kind {
                InstKind::Call {
                    callee: Callee::Direct(f),
                    ..
                } if child_externals.contains_key(f) => Some(*f),
                _ => None,
            };
            for op in kind.operands() {
                match &op {
                    Value::Inst(def) => {
                        let outside = ctx
                            .inst_block(*def)
                            .is_some_and(|db| !blocks.contains(&db));
                        if outside && !out.contains(&op) {
                            out.push(op.clone());
                        }
                    }
                    Value::Arg(..) => {
                        if let Some(f) = child_callee {
                            for ext in &child_externals[&f] {
                                if vmap.value(ext).is_none() && !out.contains(ext) {
                                    out.push(ext.clone());
                                }
                            }
                        } else if !out.contains(&op) {
                            out.push(op.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Signature, Type};

    #[test]
    fn finds_outside_defs_and_arguments_in_order() {
        let mut ctx = Context::new();
        let m = ctx.add_module("m");
        let f = ctx.add_function(
            m,
            "f",
            Signature::new(vec![Type::Int(64), Type::Int(32)], Type::Void),
        );
        let pre = ctx.append_block(f, "pre");
        let b = ctx.append_block(f, "b");
        let outside_def = ctx.push(
            pre,
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Arg(f, 0),
                rhs: Value::i64(1),
            },
        );
        ctx.push(pre, InstKind::Br { dest: b });
        // Uses: the outside def, arg1, and the outside def again.
        let u1 = ctx.push(
            b,
            InstKind::Binary {
                op: BinOp::Mul,
                lhs: Value::Inst(outside_def),
                rhs: Value::int(Type::Int(64), 2),
            },
        );
        ctx.push(
            b,
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Arg(f, 1),
                rhs: Value::int(Type::Int(32), 3),
            },
        );
        ctx.push(
            b,
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::Inst(outside_def),
                rhs: Value::Inst(u1),
            },
        );
        ctx.push(b, InstKind::Ret { value: None });

        let blocks: FxHashSet<BlockId> = [b].into_iter().collect();
        let ext = external_values(
            &ctx,
            &[b],
            &blocks,
            &FxHashMap::default(),
            &ValueMap::default(),
        );
        assert_eq!(
            ext,
            vec![Value::Inst(outside_def), Value::Arg(f, 1)]
        );
    }

    #[test]
    fn region_without_externals_is_empty() {
        let mut ctx = Context::new();
        let m = ctx.add_module("m");
        let f = ctx.add_function(m, "f", Signature::new(vec![], Type::Void));
        let b = ctx.append_block(f, "b");
        let c = ctx.push(
            b,
            InstKind::Binary {
                op: BinOp::Add,
                lhs: Value::i64(1),
                rhs: Value::i64(2),
            },
        );
        ctx.push(
            b,
            InstKind::Binary {
                op: BinOp::Mul,
                lhs: Value::Inst(c),
                rhs: Value::i64(3),
            },
        );
        ctx.push(b, InstKind::Ret { value: None });

        let blocks: FxHashSet<BlockId> = [b].into_iter().collect();
        let ext = external_values(
            &ctx,
            &[b],
            &blocks,
            &FxHashMap::default(),
            &ValueMap::default(),
        );
        assert!(ext.is_empty());
    }
}
