//! Failure handling: unsupported input is fatal to the offending kernel,
//! the partial build is detached, and the run continues.

mod common;

use common::{new_input, tagged_block};
use tik::build::BuildContext;
use tik::ir::{Callee, InstKind, Signature, Type, Value};

fn linear_region(
    ctx: &mut tik::ir::Context,
    m: tik::ir::ModuleId,
    name: &str,
    ids: (i64, i64),
) -> tik::ir::FuncId {
    let f = ctx.add_function(m, name, Signature::new(vec![], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(ctx, f, ids.0);
    let b9 = tagged_block(ctx, f, ids.1);
    ctx.push(pre, InstKind::Br { dest: b1 });
    ctx.push(b1, InstKind::Br { dest: b9 });
    ctx.push(b9, InstKind::Ret { value: None });
    f
}

/// A region containing an invoke fails the build; the next kernel of the
/// run is unaffected.
#[test]
fn invoke_invalidates_kernel_but_not_run() {
    let (mut ctx, m) = new_input();
    let handler_target = ctx.add_function(m, "may_throw", Signature::new(vec![], Type::Void));
    let f = ctx.add_function(m, "main", Signature::new(vec![], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(&mut ctx, f, 1);
    let ok = tagged_block(&mut ctx, f, 2);
    let bad = tagged_block(&mut ctx, f, 3);
    ctx.push(pre, InstKind::Br { dest: b1 });
    ctx.push(
        b1,
        InstKind::Invoke {
            callee: Callee::Direct(handler_target),
            args: vec![],
            normal: ok,
            unwind: bad,
        },
    );
    ctx.push(ok, InstKind::Ret { value: None });
    ctx.push(bad, InstKind::Ret { value: None });
    linear_region(&mut ctx, m, "other", (10, 11));

    let mut build = BuildContext::new(ctx);
    let invalid = build.build_kernel(m, &[1], "throws");
    let valid = build.build_kernel(m, &[10], "clean");

    assert!(!build.kernel(invalid).valid);
    assert!(build.kernel(invalid).function.is_none());
    assert!(build.kernel(valid).valid);

    // Nothing of the failed kernel is attached to the output module.
    let tik_module = build.output_module();
    for &f in build.ir.module_functions(tik_module) {
        let name = &build.ir.function(f).name;
        assert!(
            !name.contains("throws"),
            "partial entity '{name}' left in output module"
        );
    }
}

/// A recursive call inside the region is rejected.
#[test]
fn recursion_is_rejected() {
    let (mut ctx, m) = new_input();
    let f = ctx.add_function(m, "main", Signature::new(vec![], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(&mut ctx, f, 1);
    let b9 = tagged_block(&mut ctx, f, 9);
    ctx.push(pre, InstKind::Br { dest: b1 });
    ctx.push(
        b1,
        InstKind::Call {
            callee: Callee::Direct(f),
            args: vec![],
        },
    );
    ctx.push(b1, InstKind::Br { dest: b9 });
    ctx.push(b9, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let id = build.build_kernel(m, &[1], "recur");
    assert!(!build.kernel(id).valid);
}

/// Indirect calls cannot be inlined or exported.
#[test]
fn indirect_calls_are_rejected() {
    let (mut ctx, m) = new_input();
    let fn_ptr_ty = Type::Void.ptr_to();
    let f = ctx.add_function(m, "main", Signature::new(vec![fn_ptr_ty], Type::Void));
    let pre = ctx.append_block(f, "pre");
    let b1 = tagged_block(&mut ctx, f, 1);
    let b9 = tagged_block(&mut ctx, f, 9);
    ctx.push(pre, InstKind::Br { dest: b1 });
    ctx.push(
        b1,
        InstKind::Call {
            callee: Callee::Indirect(Value::Arg(f, 0)),
            args: vec![],
        },
    );
    ctx.push(b1, InstKind::Br { dest: b9 });
    ctx.push(b9, InstKind::Ret { value: None });

    let mut build = BuildContext::new(ctx);
    let id = build.build_kernel(m, &[1], "indirect");
    assert!(!build.kernel(id).valid);
}

/// Kernel names are unique per run; a digit-leading name gets a prefix and
/// empty names draw from a counter.
#[test]
fn name_rules() {
    let (mut ctx, m) = new_input();
    linear_region(&mut ctx, m, "f1", (1, 2));
    linear_region(&mut ctx, m, "f2", (10, 11));
    linear_region(&mut ctx, m, "f3", (20, 21));
    linear_region(&mut ctx, m, "f4", (30, 31));

    let mut build = BuildContext::new(ctx);
    let a = build.build_kernel(m, &[1], "dup");
    let b = build.build_kernel(m, &[10], "dup");
    let c = build.build_kernel(m, &[20], "9lives");
    let d = build.build_kernel(m, &[30], "");

    assert!(build.kernel(a).valid);
    assert!(!build.kernel(b).valid, "duplicate name must fail");
    assert_eq!(build.kernel(c).name, "K9lives");
    assert!(build.kernel(c).valid);
    assert_eq!(build.kernel(d).name, "Kernel_0");
    assert!(build.kernel(d).valid);
}
