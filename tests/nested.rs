//! Nested-kernel composition: intermediate call blocks, the exit switch,
//! argument forwarding and double-exit bridging.

mod common;

use common::{assert_closed, new_input, tagged_block, terminator_kind};
use tik::build::BuildContext;
use tik::ir::{BinOp, Callee, InstKind, Signature, Type, Value};
use tik::metadata::KERNEL_CALL;

/// Kernel A owns blocks {10, 11}; kernel B owns {20, 21, 10, 11}. B sees
/// A's blocks through the registry and calls A's function instead of
/// cloning them.
#[test]
fn parent_calls_child_through_intermediate_block() {
    let (mut ctx, m) = new_input();
    let f = ctx.add_function(
        m,
        "main",
        Signature::new(vec![Type::Int(64)], Type::Void),
    );
    let pre = ctx.append_block(f, "pre");
    let b20 = tagged_block(&mut ctx, f, 20);
    let b10 = tagged_block(&mut ctx, f, 10);
    let b11 = tagged_block(&mut ctx, f, 11);
    let b21 = tagged_block(&mut ctx, f, 21);
    let b30 = tagged_block(&mut ctx, f, 30);
    ctx.push(pre, InstKind::Br { dest: b20 });
    ctx.push(b20, InstKind::Br { dest: b10 });
    ctx.push(
        b10,
        InstKind::Binary {
            op: BinOp::Add,
            lhs: Value::Arg(f, 0),
            rhs: Value::i64(1),
        },
    );
    ctx.push(b10, InstKind::Br { dest: b11 });
    ctx.push(b11, InstKind::Br { dest: b21 });
    ctx.push(b21, InstKind::Br { dest: b30 });
    ctx.push(b30, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let specs = vec![
        ("B".to_string(), vec![20, 21, 10, 11]),
        ("A".to_string(), vec![10, 11]),
    ];
    let ids = build.build_all(m, &specs);
    let (b_id, a_id) = (ids[0], ids[1]);

    let a = build.kernel(a_id);
    assert!(a.valid);
    assert_eq!(a.entrances, vec![b10]);
    assert_eq!(a.exit_target.get(&0), Some(&b21));
    // The add makes the function argument external to A.
    assert_eq!(a.external_values, vec![Value::Arg(f, 0)]);
    let a_fn = a.function.unwrap();

    let b = build.kernel(b_id);
    assert!(b.valid);
    let b_fn = b.function.unwrap();

    // A's entrance maps to an intermediate block, its interior to nothing.
    let inter = b.vmap.block(b10).expect("entrance has an intermediate");
    assert!(b.vmap.block(b11).is_none());

    let inter_insts = build.ir.block(inter).insts().to_vec();
    assert_eq!(inter_insts.len(), 2);
    let call = inter_insts[0];
    assert!(build.ir.inst_meta(call, KERNEL_CALL).is_some());
    match &build.ir.inst(call).kind {
        InstKind::Call {
            callee: Callee::Direct(cf),
            args,
        } => {
            assert_eq!(*cf, a_fn);
            // Entrance id plus the forwarded external, resolved against B.
            assert_eq!(args.as_slice(), &[Value::i8(0), Value::Arg(b_fn, 1)]);
        }
        other => panic!("intermediate starts with {other:?}"),
    }

    // The switch dispatches A's sole exit to the clone of block 21.
    match &build.ir.inst(inter_insts[1]).kind {
        InstKind::Switch {
            value,
            default,
            cases,
        } => {
            assert_eq!(*value, Value::Inst(call));
            assert_eq!(*default, b.exception.unwrap());
            assert_eq!(cases.as_slice(), &[(0, b.vmap.block(b21).unwrap())]);
        }
        other => panic!("intermediate ends with {other:?}"),
    }

    // The clone of block 20 now branches into the intermediate.
    let c20 = b.vmap.block(b20).unwrap();
    match terminator_kind(&build.ir, c20) {
        InstKind::Br { dest } => assert_eq!(dest, inter),
        other => panic!("clone of b20 ends with {other:?}"),
    }

    assert_closed(&build.ir, b_fn);
}

/// An exit that leaves child and parent at once is routed over a bridge
/// block that inherits the parent's exit id for the producing child block.
#[test]
fn double_exit_bridges_to_exit() {
    let (mut ctx, m) = new_input();
    let f = ctx.add_function(m, "main", Signature::new(vec![], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b20 = tagged_block(&mut ctx, f, 20);
    let b10 = tagged_block(&mut ctx, f, 10);
    let b11 = tagged_block(&mut ctx, f, 11);
    let b30 = tagged_block(&mut ctx, f, 30);
    ctx.push(pre, InstKind::Br { dest: b20 });
    ctx.push(b20, InstKind::Br { dest: b10 });
    ctx.push(b10, InstKind::Br { dest: b11 });
    ctx.push(b11, InstKind::Br { dest: b30 });
    ctx.push(b30, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let specs = vec![
        ("inner".to_string(), vec![10, 11]),
        ("outer".to_string(), vec![20, 10, 11]),
    ];
    let ids = build.build_all(m, &specs);
    let inner = build.kernel(ids[0]);
    let outer = build.kernel(ids[1]);
    assert!(inner.valid);
    assert!(outer.valid);

    // The sole exit of the outer kernel is produced by the bridge now.
    assert_eq!(outer.exit_map.len(), 1);
    let (&bridge, &eid) = outer.exit_map.iter().next().unwrap();
    assert_eq!(eid, 0);
    match terminator_kind(&build.ir, bridge) {
        InstKind::Br { dest } => assert_eq!(dest, outer.exit.unwrap()),
        other => panic!("bridge ends with {other:?}"),
    }

    // The intermediate switch routes the child's exit over the bridge.
    let inter = outer.vmap.block(b10).unwrap();
    let sw = build.ir.terminator(inter).unwrap();
    match &build.ir.inst(sw).kind {
        InstKind::Switch { cases, .. } => {
            assert_eq!(cases.as_slice(), &[(0, bridge)]);
        }
        other => panic!("intermediate ends with {other:?}"),
    }

    // The exit phi's sole incoming comes from the bridge.
    let exit_insts = build.ir.block(outer.exit.unwrap()).insts().to_vec();
    match &build.ir.inst(exit_insts[0]).kind {
        InstKind::Phi { incoming, .. } => {
            assert_eq!(incoming.as_slice(), &[(Value::i8(0), bridge)]);
        }
        other => panic!("Exit starts with {other:?}"),
    }

    assert_closed(&build.ir, outer.function.unwrap());
}

/// `build_all` orders by block-set size, so listing the parent first still
/// builds the child first.
#[test]
fn batch_build_orders_children_first() {
    let (mut ctx, m) = new_input();
    let f = ctx.add_function(m, "main", Signature::new(vec![], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(&mut ctx, f, 1);
    let b2 = tagged_block(&mut ctx, f, 2);
    let b3 = tagged_block(&mut ctx, f, 3);
    ctx.push(pre, InstKind::Br { dest: b1 });
    ctx.push(b1, InstKind::Br { dest: b2 });
    ctx.push(b2, InstKind::Br { dest: b3 });
    ctx.push(b3, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let specs = vec![
        ("parent".to_string(), vec![1, 2]),
        ("child".to_string(), vec![2]),
    ];
    let ids = build.build_all(m, &specs);
    let parent = build.kernel(ids[0]);
    let child = build.kernel(ids[1]);
    assert!(child.valid);
    assert!(parent.valid);

    // The parent composed the child rather than cloning block 2.
    let inter = parent.vmap.block(b2).unwrap();
    let call = build.ir.block(inter).insts()[0];
    assert!(build.ir.inst_meta(call, KERNEL_CALL).is_some());
}
