//! Region structure: entrances, exits, conditionals and the partition.
//!
//! The facts derived here drive the whole synthesis. Entrances become the
//! cases of the Init switch, exits are enumerated into the `i8` exit-id
//! space returned by the kernel function, loop-condition heads seed the
//! body walk, and the body/termination partition is recorded as metadata on
//! the cloned blocks.

use std::collections::{BTreeMap, VecDeque};

use log::warn;
use rustc_hash::FxHashSet;

use crate::ir::{BlockId, Context, InstKind};
use crate::{Error, Result};

/// The structural facts of a block region.
///
/// `entrances`, the `exit_map` keys and the partition sets all refer to
/// blocks of the input module; the builder swaps partition members for
/// their clones as it copies them.
#[derive(Debug, Default)]
pub struct RegionFacts {
    /// Blocks reachable from outside the region, in deterministic order.
    /// Position is the entrance id.
    pub entrances: Vec<BlockId>,
    /// Producer block to exit id. Total over blocks with outside successors.
    pub exit_map: BTreeMap<BlockId, i64>,
    /// Exit id to the outside block it targets.
    pub exit_target: BTreeMap<i64, BlockId>,
    /// Loop-condition heads.
    pub conditional: FxHashSet<BlockId>,
    /// Blocks of the loop body.
    pub body: FxHashSet<BlockId>,
    /// Everything in the region that is not body.
    pub termination: FxHashSet<BlockId>,
}

/// Computes all facts for the region `blocks`.
///
/// `child_owned` holds region blocks that belong to already-built nested
/// kernels; they are excluded from entrance detection because the nested
/// kernel's own entry protocol covers them.
///
/// # Errors
///
/// [`Error::NoEntrance`] when nothing outside reaches the region and
/// [`Error::NoExit`] when nothing leaves it.
pub fn analyze_region(
    ctx: &Context,
    name: &str,
    blocks: &FxHashSet<BlockId>,
    child_owned: &FxHashSet<BlockId>,
) -> Result<RegionFacts> {
    let sorted = super::sorted_region(blocks);
    let mut facts = RegionFacts::default();
    find_entrances(ctx, name, &sorted, blocks, child_owned, &mut facts)?;
    find_exits(ctx, name, &sorted, blocks, &mut facts)?;
    classify(ctx, &sorted, blocks, &mut facts);
    Ok(facts)
}

fn find_entrances(
    ctx: &Context,
    name: &str,
    sorted: &[BlockId],
    blocks: &FxHashSet<BlockId>,
    child_owned: &FxHashSet<BlockId>,
    facts: &mut RegionFacts,
) -> Result<()> {
    for &b in sorted {
        if child_owned.contains(&b) {
            continue;
        }
        let mut entrance = ctx
            .predecessors(b)
            .iter()
            .any(|p| !blocks.contains(p));
        if !entrance {
            // The entry block of a function is reachable through any call of
            // that function from outside the region.
            let f = ctx.block_func(b);
            if ctx.entry_block(f) == Some(b) {
                entrance = ctx.func_users(f).iter().any(|&u| {
                    ctx.inst_block(u).is_some_and(|ub| !blocks.contains(&ub))
                });
            }
        }
        if entrance {
            facts.entrances.push(b);
        }
    }
    if facts.entrances.is_empty() {
        return Err(Error::NoEntrance(name.to_string()));
    }
    Ok(())
}

fn find_exits(
    ctx: &Context,
    name: &str,
    sorted: &[BlockId],
    blocks: &FxHashSet<BlockId>,
    facts: &mut RegionFacts,
) -> Result<()> {
    let mut next_id = 0i64;
    let mut target_ids: rustc_hash::FxHashMap<BlockId, i64> = Default::default();
    let mut id_of = |target: BlockId, exit_target: &mut BTreeMap<i64, BlockId>| -> i64 {
        *target_ids.entry(target).or_insert_with(|| {
            let id = next_id;
            next_id += 1;
            exit_target.insert(id, target);
            id
        })
    };

    for &b in sorted {
        for suc in ctx.successors(b) {
            if !blocks.contains(&suc) {
                let id = id_of(suc, &mut facts.exit_target);
                facts.exit_map.insert(b, id);
            }
        }
        // A return leaves the region through every call site of the
        // containing function that lies outside it.
        let is_ret = ctx
            .terminator(b)
            .is_some_and(|t| matches!(ctx.inst(t).kind, InstKind::Ret { .. }));
        if is_ret {
            let f = ctx.block_func(b);
            for u in ctx.func_users(f) {
                if let Some(ub) = ctx.inst_block(u) {
                    if !blocks.contains(&ub) {
                        let id = id_of(ub, &mut facts.exit_target);
                        facts.exit_map.insert(b, id);
                    }
                }
            }
        }
    }

    if facts.exit_target.is_empty() {
        return Err(Error::NoExit(name.to_string()));
    }
    if facts.exit_target.len() > 1 {
        warn!("kernel '{name}' has multiple exits; downstream consumers may mishandle the emitted module");
    }
    Ok(())
}

/// Probes one successor branch of a candidate conditional: a BFS confined
/// to the region plus the first step outside, reporting whether any path
/// reaches the candidate again and whether any path leaves the region or
/// hits a terminal block.
fn probe(
    ctx: &Context,
    blocks: &FxHashSet<BlockId>,
    cond: BlockId,
    start: BlockId,
) -> (bool, bool) {
    // A self edge is the purest recursion: the path ends at the candidate.
    if start == cond {
        return (true, false);
    }
    let mut recurses = false;
    let mut exit = !blocks.contains(&start);

    let mut checked: FxHashSet<BlockId> = [start, cond].into_iter().collect();
    let mut queue: VecDeque<BlockId> = VecDeque::from([start]);
    while let Some(p) = queue.pop_front() {
        let sucs = ctx.successors(p);
        if sucs.is_empty() {
            exit = true;
        }
        for s in sucs {
            if s == cond {
                recurses = true;
            }
            if !blocks.contains(&s) {
                exit = true;
            } else if checked.insert(s) {
                queue.push_back(s);
            }
        }
    }
    (recurses, exit)
}

fn classify(
    ctx: &Context,
    sorted: &[BlockId],
    blocks: &FxHashSet<BlockId>,
    facts: &mut RegionFacts,
) {
    let mut recurse_seeds: Vec<BlockId> = Vec::new();

    for &cand in sorted {
        let sucs = ctx.successors(cand);
        if sucs.len() <= 1 {
            continue;
        }
        let mut seeds = Vec::new();
        let mut any_recurse = false;
        let mut any_exit = false;
        let mut ambiguous = false;
        for suc in sucs {
            let (recurses, exit) = probe(ctx, blocks, cand, suc);
            if recurses && exit {
                // A branch that both loops and leaves makes the candidate
                // unusable as a condition head.
                ambiguous = true;
                break;
            }
            if recurses {
                any_recurse = true;
                seeds.push(suc);
            }
            if exit {
                any_exit = true;
            }
        }
        if !ambiguous && any_recurse && any_exit {
            facts.conditional.insert(cand);
            recurse_seeds.extend(seeds);
        }
    }

    // Body walk: flood from the recursing successors, never crossing into a
    // condition head, never leaving the region.
    let mut visited: FxHashSet<BlockId> = facts.conditional.clone();
    let mut queue: VecDeque<BlockId> = VecDeque::new();
    for &seed in &recurse_seeds {
        if visited.insert(seed) || facts.conditional.contains(&seed) {
            queue.push_back(seed);
        }
    }
    while let Some(b) = queue.pop_front() {
        if blocks.contains(&b) {
            facts.body.insert(b);
        }
        for suc in ctx.successors(b) {
            if blocks.contains(&suc)
                && !facts.conditional.contains(&suc)
                && visited.insert(suc)
            {
                queue.push_back(suc);
            }
        }
    }
    // Condition heads steer the loop, so they belong to the body.
    facts.body.extend(facts.conditional.iter().copied());

    for &b in sorted {
        if !facts.body.contains(&b) {
            facts.termination.insert(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Callee, FuncId, Signature, Type, Value};
    use crate::metadata::set_block_id;

    struct Fixture {
        ctx: Context,
        func: FuncId,
    }

    fn fixture() -> Fixture {
        let mut ctx = Context::new();
        let m = ctx.add_module("m");
        let func = ctx.add_function(m, "f", Signature::new(vec![], Type::Void));
        Fixture { ctx, func }
    }

    fn block(fx: &mut Fixture, id: i64) -> BlockId {
        let b = fx.ctx.append_block(fx.func, format!("b{id}"));
        set_block_id(&mut fx.ctx, b, id);
        b
    }

    /// Linear region 1 -> 2 -> 3, with 3 branching to an outside block 4.
    #[test]
    fn linear_region_has_one_entrance_and_exit() {
        let mut fx = fixture();
        let b1 = block(&mut fx, 1);
        let b2 = block(&mut fx, 2);
        let b3 = block(&mut fx, 3);
        let b4 = block(&mut fx, 4);
        fx.ctx.push(b1, InstKind::Br { dest: b2 });
        fx.ctx.push(b2, InstKind::Br { dest: b3 });
        fx.ctx.push(b3, InstKind::Br { dest: b4 });
        fx.ctx.push(b4, InstKind::Ret { value: None });

        // An outside caller makes b1 an entrance through the function-entry
        // rule.
        let m = fx.ctx.func_module(fx.func);
        let caller = fx
            .ctx
            .add_function(m, "caller", Signature::new(vec![], Type::Void));
        let cb = fx.ctx.append_block(caller, "cb");
        fx.ctx.push(
            cb,
            InstKind::Call {
                callee: Callee::Direct(fx.func),
                args: vec![],
            },
        );
        fx.ctx.push(cb, InstKind::Ret { value: None });

        let blocks: FxHashSet<BlockId> = [b1, b2, b3].into_iter().collect();
        let facts =
            analyze_region(&fx.ctx, "k", &blocks, &FxHashSet::default()).unwrap();

        assert_eq!(facts.entrances, vec![b1]);
        assert_eq!(facts.exit_target.get(&0), Some(&b4));
        assert_eq!(facts.exit_map.get(&b3), Some(&0));
        assert_eq!(facts.exit_map.len(), 1);
        // No loop structure: everything is termination.
        assert!(facts.conditional.is_empty());
        assert_eq!(facts.termination.len(), 3);
    }

    /// Region {1, 2} where 2 loops on itself and exits to outside block 9.
    #[test]
    fn self_loop_is_conditional_and_body() {
        let mut fx = fixture();
        let b1 = block(&mut fx, 1);
        let b2 = block(&mut fx, 2);
        let b9 = block(&mut fx, 9);
        fx.ctx.push(b1, InstKind::Br { dest: b2 });
        fx.ctx.push(
            b2,
            InstKind::CondBr {
                cond: Value::int(Type::Int(1), 1),
                then_dest: b2,
                else_dest: b9,
            },
        );
        fx.ctx.push(b9, InstKind::Ret { value: None });

        // b1 needs an outside predecessor to be an entrance.
        let pre = fx.ctx.append_block(fx.func, "pre");
        fx.ctx.push(pre, InstKind::Br { dest: b1 });

        let blocks: FxHashSet<BlockId> = [b1, b2].into_iter().collect();
        let facts =
            analyze_region(&fx.ctx, "k", &blocks, &FxHashSet::default()).unwrap();

        assert!(facts.conditional.contains(&b2));
        assert!(facts.body.contains(&b2));
        assert!(facts.termination.contains(&b1));
        assert!(!facts.termination.contains(&b2));
    }

    /// An ambiguous successor (loops and exits on the same path) disqualifies
    /// the candidate.
    #[test]
    fn ambiguous_successor_disqualifies() {
        let mut fx = fixture();
        let b1 = block(&mut fx, 1);
        let b2 = block(&mut fx, 2);
        let b3 = block(&mut fx, 3);
        let out = block(&mut fx, 9);
        // 1 branches to 2 and 3. 2 goes back to 1; 3 goes back to 1 or out.
        fx.ctx.push(
            b1,
            InstKind::CondBr {
                cond: Value::int(Type::Int(1), 1),
                then_dest: b2,
                else_dest: b3,
            },
        );
        fx.ctx.push(b2, InstKind::Br { dest: b1 });
        fx.ctx.push(
            b3,
            InstKind::CondBr {
                cond: Value::int(Type::Int(1), 1),
                then_dest: b1,
                else_dest: out,
            },
        );
        fx.ctx.push(out, InstKind::Ret { value: None });
        let pre = fx.ctx.append_block(fx.func, "pre");
        fx.ctx.push(pre, InstKind::Br { dest: b1 });

        let blocks: FxHashSet<BlockId> = [b1, b2, b3].into_iter().collect();
        let facts =
            analyze_region(&fx.ctx, "k", &blocks, &FxHashSet::default()).unwrap();

        // Seen from b1, the path through b3 both returns to b1 and leaves
        // the region, so b1 is disqualified. b3's own successors are pure:
        // one recurses (via b1), one exits.
        assert!(!facts.conditional.contains(&b1));
        assert!(facts.conditional.contains(&b3));
    }

    #[test]
    fn empty_exit_errors() {
        let mut fx = fixture();
        let b1 = block(&mut fx, 1);
        fx.ctx.push(b1, InstKind::Br { dest: b1 });
        let pre = fx.ctx.append_block(fx.func, "pre");
        fx.ctx.push(pre, InstKind::Br { dest: b1 });

        let blocks: FxHashSet<BlockId> = [b1].into_iter().collect();
        let err = analyze_region(&fx.ctx, "k", &blocks, &FxHashSet::default())
            .unwrap_err();
        assert!(matches!(err, Error::NoExit(_)));
    }

    #[test]
    fn unreachable_region_errors() {
        let mut fx = fixture();
        let b1 = block(&mut fx, 1);
        let b2 = block(&mut fx, 2);
        fx.ctx.push(b1, InstKind::Br { dest: b2 });
        fx.ctx.push(b2, InstKind::Ret { value: None });

        // b1 is the function entry, has no predecessors and the function
        // has no callers: nothing outside can reach the region.
        let blocks: FxHashSet<BlockId> = [b1].into_iter().collect();
        let err = analyze_region(&fx.ctx, "k", &blocks, &FxHashSet::default())
            .unwrap_err();
        assert!(matches!(err, Error::NoEntrance(_)));
    }

    /// Re-running the analysis over the same region is stable.
    #[test]
    fn partition_is_idempotent() {
        let mut fx = fixture();
        let b1 = block(&mut fx, 1);
        let b2 = block(&mut fx, 2);
        let b3 = block(&mut fx, 3);
        let out = block(&mut fx, 9);
        fx.ctx.push(b1, InstKind::Br { dest: b2 });
        fx.ctx.push(
            b2,
            InstKind::CondBr {
                cond: Value::int(Type::Int(1), 1),
                then_dest: b3,
                else_dest: out,
            },
        );
        fx.ctx.push(b3, InstKind::Br { dest: b2 });
        fx.ctx.push(out, InstKind::Ret { value: None });
        let pre = fx.ctx.append_block(fx.func, "pre");
        fx.ctx.push(pre, InstKind::Br { dest: b1 });

        let blocks: FxHashSet<BlockId> = [b1, b2, b3].into_iter().collect();
        let a = analyze_region(&fx.ctx, "k", &blocks, &FxHashSet::default()).unwrap();
        let b = analyze_region(&fx.ctx, "k2", &blocks, &FxHashSet::default()).unwrap();

        assert_eq!(a.conditional, b.conditional);
        assert_eq!(a.body, b.body);
        assert_eq!(a.termination, b.termination);
        assert!(a.conditional.contains(&b2));
        assert!(a.body.contains(&b3));
        assert!(a.termination.contains(&b1));
        // Partition invariant: disjoint, conditionals inside the body.
        assert!(a.body.is_disjoint(&a.termination));
        assert!(a.conditional.is_subset(&a.body));
    }
}
