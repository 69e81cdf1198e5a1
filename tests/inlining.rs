//! Inlining of non-kernel callees: block splitting at the call boundary,
//! the shared entrance phis, return collection and switch-back dispatch.

mod common;

use common::{assert_closed, new_input, tagged_block, terminator_kind};
use tik::build::BuildContext;
use tik::ir::{BinOp, Callee, InstKind, Signature, Type, Value};

/// A region block calls a helper with a body: the block splits after the
/// call and the helper is folded into the kernel with phi fan-in and a
/// return dispatch.
#[test]
fn helper_call_is_split_and_inlined() {
    let (mut ctx, m) = new_input();
    let helper = ctx.add_function(
        m,
        "helper",
        Signature::new(vec![Type::Int(64)], Type::Int(64)),
    );
    let h_entry = ctx.append_block(helper, "entry");
    let h_add = ctx.push(
        h_entry,
        InstKind::Binary {
            op: BinOp::Add,
            lhs: Value::Arg(helper, 0),
            rhs: Value::i64(5),
        },
    );
    ctx.push(
        h_entry,
        InstKind::Ret {
            value: Some(Value::Inst(h_add)),
        },
    );

    let f = ctx.add_function(
        m,
        "main",
        Signature::new(vec![Type::Int(64)], Type::Void),
    );
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(&mut ctx, f, 1);
    let b9 = tagged_block(&mut ctx, f, 9);
    ctx.push(pre, InstKind::Br { dest: b1 });
    let call = ctx.push(
        b1,
        InstKind::Call {
            callee: Callee::Direct(helper),
            args: vec![Value::Arg(f, 0)],
        },
    );
    let use_of_call = ctx.push(
        b1,
        InstKind::Binary {
            op: BinOp::Add,
            lhs: Value::Inst(call),
            rhs: Value::i64(1),
        },
    );
    let _ = use_of_call;
    ctx.push(b1, InstKind::Br { dest: b9 });
    ctx.push(b9, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let id = build.build_kernel(m, &[1], "inliner");
    let k = build.kernel(id);
    assert!(k.valid);
    let kf = k.function.unwrap();

    // The callee was inlined exactly once.
    assert_eq!(k.inlined.len(), 1);
    let site = &k.inlined[0];
    assert_eq!(site.callee, helper);

    // Entrance: branch phi, one argument phi, branch into the cloned body.
    let ent_insts = build.ir.block(site.entrance).insts().to_vec();
    assert_eq!(ent_insts.len(), 3);
    match &build.ir.inst(site.branch_phi).kind {
        InstKind::Phi { ty, incoming } => {
            assert_eq!(*ty, Type::Int(8));
            assert_eq!(incoming.len(), 1);
            assert_eq!(incoming[0].0, Value::i8(0));
        }
        other => panic!("branch phi is {other:?}"),
    }
    assert_eq!(site.arg_phis.len(), 1);
    match &build.ir.inst(site.arg_phis[0]).kind {
        InstKind::Phi { ty, incoming } => {
            assert_eq!(*ty, Type::Int(64));
            // The call site's actual, remapped to the kernel argument.
            assert_eq!(incoming[0].0, Value::Arg(kf, 1));
        }
        other => panic!("argument phi is {other:?}"),
    }

    // The cloned helper body consumes the argument phi.
    let h_clone = k.vmap.block(h_entry).expect("helper entry cloned");
    let cloned_add = build.ir.block(h_clone).insts()[0];
    match &build.ir.inst(cloned_add).kind {
        InstKind::Binary { lhs, rhs, .. } => {
            assert_eq!(*lhs, Value::Inst(site.arg_phis[0]));
            assert_eq!(*rhs, Value::i64(5));
        }
        other => panic!("cloned helper body starts with {other:?}"),
    }
    // Its return was replaced by a branch to the shared return block.
    match terminator_kind(&build.ir, h_clone) {
        InstKind::Br { .. } => {}
        other => panic!("cloned helper body ends with {other:?}"),
    }

    // Return block: value phi over the cloned returns, then the dispatch.
    let rp = site.return_phi.expect("helper returns a value");
    match &build.ir.inst(rp).kind {
        InstKind::Phi { incoming, .. } => {
            assert_eq!(incoming.len(), 1);
            assert_eq!(incoming[0].0, Value::Inst(cloned_add));
            assert_eq!(incoming[0].1, h_clone);
        }
        other => panic!("return phi is {other:?}"),
    }
    match &build.ir.inst(site.dispatch).kind {
        InstKind::Switch {
            value,
            default,
            cases,
        } => {
            assert_eq!(*value, Value::Inst(site.branch_phi));
            assert_eq!(*default, k.exception.unwrap());
            assert_eq!(cases.len(), 1);
            assert_eq!(cases[0].0, 0);
        }
        other => panic!("dispatch is {other:?}"),
    }

    // The split tail uses the return phi where the call result used to be,
    // and the dispatch returns into it.
    let tail = match &build.ir.inst(site.dispatch).kind {
        InstKind::Switch { cases, .. } => cases[0].1,
        _ => unreachable!(),
    };
    let tail_first = build.ir.block(tail).insts()[0];
    match &build.ir.inst(tail_first).kind {
        InstKind::Binary { lhs, .. } => assert_eq!(*lhs, Value::Inst(rp)),
        other => panic!("continuation starts with {other:?}"),
    }

    // The call-site block branches into the entrance; no call remains.
    let c1 = k.vmap.block(b1).unwrap();
    match terminator_kind(&build.ir, c1) {
        InstKind::Br { dest } => assert_eq!(dest, site.entrance),
        other => panic!("call-site clone ends with {other:?}"),
    }
    for &b in build.ir.function(kf).blocks() {
        for &i in build.ir.block(b).insts() {
            if let InstKind::Call {
                callee: Callee::Direct(cf),
                ..
            } = &build.ir.inst(i).kind
            {
                // Only the memory selectors remain as call targets.
                assert!(
                    *cf == k.memory_read.unwrap() || *cf == k.memory_write.unwrap(),
                    "unexpected call target {:?}",
                    build.ir.function(*cf).name
                );
            }
        }
    }

    assert_closed(&build.ir, kf);
}

/// Two call sites to the same helper share one inlined body; the branch
/// phi and the dispatch grow one entry per site.
#[test]
fn repeated_callee_shares_one_body() {
    let (mut ctx, m) = new_input();
    let helper = ctx.add_function(m, "helper", Signature::new(vec![], Type::Void));
    let h_entry = ctx.append_block(helper, "entry");
    ctx.push(h_entry, InstKind::Ret { value: None });

    let f = ctx.add_function(m, "main", Signature::new(vec![], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(&mut ctx, f, 1);
    let b2 = tagged_block(&mut ctx, f, 2);
    let b9 = tagged_block(&mut ctx, f, 9);
    ctx.push(pre, InstKind::Br { dest: b1 });
    ctx.push(
        b1,
        InstKind::Call {
            callee: Callee::Direct(helper),
            args: vec![],
        },
    );
    ctx.push(b1, InstKind::Br { dest: b2 });
    ctx.push(
        b2,
        InstKind::Call {
            callee: Callee::Direct(helper),
            args: vec![],
        },
    );
    ctx.push(b2, InstKind::Br { dest: b9 });
    ctx.push(b9, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let id = build.build_kernel(m, &[1, 2], "twice");
    let k = build.kernel(id);
    assert!(k.valid);

    assert_eq!(k.inlined.len(), 1);
    let site = &k.inlined[0];
    assert!(site.return_phi.is_none());
    match &build.ir.inst(site.branch_phi).kind {
        InstKind::Phi { incoming, .. } => {
            let selectors: Vec<_> = incoming.iter().map(|(v, _)| v.clone()).collect();
            assert_eq!(selectors, vec![Value::i8(0), Value::i8(1)]);
        }
        other => panic!("branch phi is {other:?}"),
    }
    match &build.ir.inst(site.dispatch).kind {
        InstKind::Switch { cases, .. } => assert_eq!(cases.len(), 2),
        other => panic!("dispatch is {other:?}"),
    }

    assert_closed(&build.ir, k.function.unwrap());
}
