//! Normalization passes, exercised directly through the pass API.

use weft::ir::expr::{Expr, ExprKind, Function, Var};
use weft::ir::module::Module;
use weft::ir::tensor::NdArray;
use weft::ir::types::{DType, Type};
use weft::pass::{anf, inline_primitives, is_closure, normalize};

fn tensor(shape: &[i64]) -> Type {
    Type::tensor(DType::F32, shape)
}

/// True if every argument position in the expression holds an atom.
fn check_anf(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Var(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Constant(_)
        | ExprKind::Constructor(_) => true,
        ExprKind::Tuple(fields) => fields.iter().all(|f| f.is_atomic()),
        ExprKind::TupleGetItem { tuple, .. } => tuple.is_atomic(),
        ExprKind::Let { value, body, .. } => check_anf(value) && check_anf(body),
        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => cond.is_atomic() && check_anf(true_branch) && check_anf(false_branch),
        ExprKind::Call { op, args } => {
            let op_ok = match &op.kind {
                ExprKind::Function(f) => f.is_primitive,
                _ => op.is_atomic(),
            };
            op_ok && args.iter().all(|a| a.is_atomic())
        }
        ExprKind::Function(f) => f.is_primitive || check_anf(&f.body),
        ExprKind::Match { scrutinee } => scrutinee.is_atomic(),
    }
}

#[test]
fn test_anf_names_nested_call_arguments() {
    // f(x) -> (x.0, (x.1, x.0))  — the inner tuple must be let-bound.
    let x = Var::new(0, "x", Type::Tuple(vec![tensor(&[1]), tensor(&[1])]));
    let inner = Expr::tuple(vec![
        Expr::tuple_get(Expr::var(x.clone()), 1),
        Expr::tuple_get(Expr::var(x.clone()), 0),
    ]);
    let body = Expr::tuple(vec![Expr::tuple_get(Expr::var(x.clone()), 0), inner]);
    let ret_ty = body.ty.clone();
    let mut module = Module::new("m");
    module
        .add_global("f", Function::new(vec![x], body, ret_ty))
        .expect("should add global");

    anf::run(&mut module).expect("anf should succeed");

    let func = module.global("f").expect("should find 'f'");
    assert!(check_anf(&func.body), "not in ANF: {}", func.body);
    // The outer expression is now a Let chain ending in a tuple of vars.
    assert!(
        matches!(func.body.kind, ExprKind::Let { .. }),
        "expected a let chain: {}",
        func.body
    );
}

#[test]
fn test_anf_keeps_if_branch_bindings_local() {
    // if c then (x, x) else x — branch-local work stays in the branch.
    let c = Var::new(0, "c", Type::scalar(DType::Bool));
    let x = Var::new(1, "x", tensor(&[1]));
    let body = Expr::if_(
        Expr::var(c.clone()),
        Expr::tuple(vec![Expr::var(x.clone()), Expr::var(x.clone())]),
        Expr::var(x.clone()),
    );
    let ret_ty = body.ty.clone();
    let mut module = Module::new("m");
    module
        .add_global("f", Function::new(vec![c, x], body, ret_ty))
        .expect("should add global");

    anf::run(&mut module).expect("anf should succeed");

    let func = module.global("f").expect("should find 'f'");
    // The If stays at the top: the branches were normalized in place.
    assert!(
        matches!(func.body.kind, ExprKind::If { .. }),
        "expected If at the top: {}",
        func.body
    );
    assert!(check_anf(&func.body));
}

#[test]
fn test_inline_primitives_rewrites_call_sites() {
    let t_ty = tensor(&[4]);
    let p = Var::new(10, "p", t_ty.clone());
    let mut module = Module::new("m");
    module
        .add_global(
            "relu",
            Function::primitive(vec![p.clone()], Expr::var(p), t_ty.clone()),
        )
        .expect("should add primitive");

    let x = Var::new(0, "x", t_ty.clone());
    let fn_ty = Type::Fn {
        params: vec![t_ty.clone()],
        ret: Box::new(t_ty.clone()),
    };
    let body = Expr::call(Expr::global("relu", fn_ty), vec![Expr::var(x.clone())], t_ty.clone());
    module
        .add_global("f", Function::new(vec![x], body, t_ty))
        .expect("should add global");

    inline_primitives::run(&mut module).expect("inline should succeed");

    // The primitive global is gone; the call site holds the function.
    assert!(module.global("relu").is_none());
    let func = module.global("f").expect("should find 'f'");
    let ExprKind::Call { op, .. } = &func.body.kind else {
        panic!("expected a call: {}", func.body);
    };
    let ExprKind::Function(inlined) = &op.kind else {
        panic!("callee should be the inlined primitive: {}", op);
    };
    assert!(inlined.is_primitive);
}

#[test]
fn test_inline_primitives_rejects_dangling_global() {
    let t_ty = tensor(&[4]);
    let x = Var::new(0, "x", t_ty.clone());
    let fn_ty = Type::Fn {
        params: vec![t_ty.clone()],
        ret: Box::new(t_ty.clone()),
    };
    let body = Expr::call(Expr::global("nope", fn_ty), vec![Expr::var(x.clone())], t_ty.clone());
    let mut module = Module::new("m");
    module
        .add_global("f", Function::new(vec![x], body, t_ty))
        .expect("should add global");

    let err = inline_primitives::run(&mut module);
    assert!(err.is_err(), "dangling @nope should be rejected");
}

#[test]
fn test_full_pipeline_produces_closure_shapes_only() {
    // fn outer(y) -> let f = |z| (z, y); f(y)
    let y = Var::new(0, "y", tensor(&[2]));
    let z = Var::new(1, "z", tensor(&[2]));
    let pair = Expr::tuple(vec![Expr::var(z.clone()), Expr::var(y.clone())]);
    let pair_ty = pair.ty.clone();
    let lambda = Function::new(vec![z], pair, pair_ty.clone());
    let f = Var::new(2, "f", lambda.fn_type());
    let body = Expr::let_(
        f.clone(),
        Expr::function(lambda),
        Expr::call(Expr::var(f), vec![Expr::var(y.clone())], pair_ty.clone()),
    );
    let mut module = Module::new("m");
    module
        .add_global("outer", Function::new(vec![y], body, pair_ty))
        .expect("should add global");

    normalize(&mut module).expect("should normalize");

    assert_eq!(module.globals().len(), 2);
    let lifted = module.global("lifted0").expect("should lift the lambda");
    assert!(is_closure(lifted), "lifted global should be closure-shaped");
    assert_eq!(lifted.params.len(), 1, "captures exactly y");
    assert_eq!(lifted.params[0].name, "y");

    // No nested non-primitive functions remain anywhere.
    for global in module.globals() {
        let body = if is_closure(&global.func) {
            match &global.func.body.kind {
                ExprKind::Function(inner) => &inner.body,
                _ => unreachable!(),
            }
        } else {
            &global.func.body
        };
        assert!(
            no_nested_functions(body),
            "nested function survives in '{}': {}",
            global.name,
            body
        );
    }
}

fn no_nested_functions(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Function(f) => f.is_primitive,
        ExprKind::Var(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Constant(_)
        | ExprKind::Constructor(_) => true,
        ExprKind::Tuple(fields) => fields.iter().all(no_nested_functions),
        ExprKind::TupleGetItem { tuple, .. } => no_nested_functions(tuple),
        ExprKind::Let { value, body, .. } => {
            no_nested_functions(value) && no_nested_functions(body)
        }
        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => {
            no_nested_functions(cond)
                && no_nested_functions(true_branch)
                && no_nested_functions(false_branch)
        }
        ExprKind::Call { op, args } => {
            no_nested_functions(op) && args.iter().all(no_nested_functions)
        }
        ExprKind::Match { scrutinee } => no_nested_functions(scrutinee),
    }
}

#[test]
fn test_anf_let_binds_constant_operands_only_when_compound() {
    // Constants are atoms: if they already sit in argument position, no
    // fresh bindings are introduced.
    let x = Var::new(0, "x", tensor(&[2]));
    let body = Expr::tuple(vec![
        Expr::var(x.clone()),
        Expr::constant(NdArray::from_f32s(&[1.0, 2.0])),
    ]);
    let ret_ty = body.ty.clone();
    let mut module = Module::new("m");
    module
        .add_global("f", Function::new(vec![x], body, ret_ty))
        .expect("should add global");

    anf::run(&mut module).expect("anf should succeed");
    let func = module.global("f").expect("should find 'f'");
    assert!(
        matches!(func.body.kind, ExprKind::Tuple(_)),
        "no let should be introduced: {}",
        func.body
    );
}
