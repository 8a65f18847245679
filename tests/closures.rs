//! Closure-shaped globals: register layout, arity, `AllocClosure` at call
//! sites, and lambda lifting end to end.

use weft::compiler::compile_module;
use weft::engine::{BackendRegistry, CompileEngine, LoweredFunc, Target};
use weft::ir::expr::{Expr, Function, Var};
use weft::ir::module::Module;
use weft::ir::types::{DType, Type};
use weft::vm::exec::Executable;
use weft::vm::instr::{Instruction, Reg};

struct NullEngine;

impl CompileEngine for NullEngine {
    fn lower(&mut self, _func: &Function, _target: &Target) -> Result<Vec<LoweredFunc>, String> {
        Err("no kernels expected in this test".to_owned())
    }
}

fn compile(module: Module) -> Executable {
    let mut engine = NullEngine;
    let backends = BackendRegistry::new();
    compile_module(module, &mut engine, &backends, Target::default()).expect("should compile")
}

fn tensor(shape: &[i64]) -> Type {
    Type::tensor(DType::F32, shape)
}

/// A closure-shaped global: outer params `[c]` (captured), inner `[x]`,
/// inner body returns the captured variable.
fn closure_global() -> (Function, Type) {
    let c = Var::new(10, "c", tensor(&[3]));
    let x = Var::new(11, "x", tensor(&[3]));
    let inner = Function::new(vec![x], Expr::var(c.clone()), tensor(&[3]));
    let inner_ty = inner.fn_type();
    let outer = Function::new(vec![c], Expr::function(inner), inner_ty.clone());
    let outer_ty = outer.fn_type();
    (outer, outer_ty)
}

#[test]
fn test_closure_register_layout_inner_then_outer() {
    let (outer, _) = closure_global();
    let mut module = Module::new("m");
    module.add_global("g", outer).expect("should add global");

    let exec = compile(module);
    let func = exec.function("g").expect("should find 'g'");
    // Registers: r0 = x (inner), r1 = c (outer). The body returns c.
    assert_eq!(func.arity, 2);
    assert_eq!(func.num_registers, 2);
    assert_eq!(func.instructions, vec![Instruction::Ret { result: Reg(1) }]);
}

#[test]
fn test_call_to_closure_global_allocates_closure() {
    let (outer, outer_ty) = closure_global();
    let inner_ty = match &outer_ty {
        Type::Fn { ret, .. } => (**ret).clone(),
        _ => panic!("closure global should have a function type"),
    };
    let mut module = Module::new("m");
    module.add_global("g", outer).expect("should add global");

    let a = Var::new(0, "a", tensor(&[3]));
    let body = Expr::call(
        Expr::global("g", outer_ty),
        vec![Expr::var(a.clone())],
        inner_ty.clone(),
    );
    module
        .add_global("h", Function::new(vec![a], body, inner_ty))
        .expect("should add global");

    let exec = compile(module);
    let func = exec.function("h").expect("should find 'h'");
    let g_idx = exec.global_map["g"];
    assert_eq!(
        func.instructions,
        vec![
            Instruction::AllocClosure {
                func: g_idx,
                captured: vec![Reg(0)],
                dst: Reg(1),
            },
            Instruction::Ret { result: Reg(1) },
        ]
    );
}

#[test]
fn test_lambda_is_lifted_and_invoked_through_register() {
    // fn outer(y) -> let f = |z| y; f(y)
    let y = Var::new(0, "y", tensor(&[2]));
    let z = Var::new(1, "z", tensor(&[2]));
    let lambda = Function::new(vec![z], Expr::var(y.clone()), tensor(&[2]));
    let lambda_ty = lambda.fn_type();
    let f = Var::new(2, "f", lambda_ty.clone());
    let body = Expr::let_(
        f.clone(),
        Expr::function(lambda),
        Expr::call(Expr::var(f), vec![Expr::var(y.clone())], tensor(&[2])),
    );
    let mut module = Module::new("m");
    module
        .add_global("outer", Function::new(vec![y], body, tensor(&[2])))
        .expect("should add global");

    let exec = compile(module);

    // The lambda became a closure-shaped global capturing y.
    assert_eq!(exec.functions.len(), 2);
    let lifted = exec
        .function("lifted0")
        .expect("lambda should be lifted to 'lifted0'");
    assert_eq!(lifted.arity, 2, "inner param + one capture");
    // Inner z is r0, captured y is r1; the body returns the capture.
    assert_eq!(lifted.instructions, vec![Instruction::Ret { result: Reg(1) }]);

    let outer = exec.function("outer").expect("should find 'outer'");
    let lifted_idx = exec.global_map["lifted0"];
    assert_eq!(
        outer.instructions,
        vec![
            Instruction::AllocClosure {
                func: lifted_idx,
                captured: vec![Reg(0)],
                dst: Reg(1),
            },
            Instruction::InvokeClosure {
                closure: Reg(1),
                args: vec![Reg(0)],
                dst: Reg(2),
            },
            Instruction::Ret { result: Reg(2) },
        ]
    );
}

#[test]
fn test_capture_free_lambda_still_lifts_to_closure_shape() {
    // fn outer(y) -> let f = |z| z; f(y)
    let y = Var::new(0, "y", tensor(&[2]));
    let z = Var::new(1, "z", tensor(&[2]));
    let lambda = Function::new(vec![z.clone()], Expr::var(z), tensor(&[2]));
    let lambda_ty = lambda.fn_type();
    let f = Var::new(2, "f", lambda_ty);
    let body = Expr::let_(
        f.clone(),
        Expr::function(lambda),
        Expr::call(Expr::var(f), vec![Expr::var(y.clone())], tensor(&[2])),
    );
    let mut module = Module::new("m");
    module
        .add_global("outer", Function::new(vec![y], body, tensor(&[2])))
        .expect("should add global");

    let exec = compile(module);
    let lifted = exec.function("lifted0").expect("should lift the lambda");
    assert_eq!(lifted.arity, 1, "one inner param, no captures");

    let outer = exec.function("outer").expect("should find 'outer'");
    assert!(
        outer.instructions.iter().any(|i| matches!(
            i,
            Instruction::AllocClosure { captured, .. } if captured.is_empty()
        )),
        "capture-free lambda should still allocate a closure: {:?}",
        outer.instructions
    );
}

#[test]
fn test_call_to_plain_global_uses_invoke() {
    let x = Var::new(0, "x", tensor(&[2]));
    let mut module = Module::new("m");
    module
        .add_global(
            "id",
            Function::new(vec![x.clone()], Expr::var(x), tensor(&[2])),
        )
        .expect("should add global");

    let a = Var::new(1, "a", tensor(&[2]));
    let id_ty = Type::Fn {
        params: vec![tensor(&[2])],
        ret: Box::new(tensor(&[2])),
    };
    let body = Expr::call(Expr::global("id", id_ty), vec![Expr::var(a.clone())], tensor(&[2]));
    module
        .add_global("caller", Function::new(vec![a], body, tensor(&[2])))
        .expect("should add global");

    let exec = compile(module);
    let func = exec.function("caller").expect("should find 'caller'");
    let id_idx = exec.global_map["id"];
    assert_eq!(
        func.instructions,
        vec![
            Instruction::Invoke {
                func: id_idx,
                args: vec![Reg(0)],
                dst: Reg(1),
            },
            Instruction::Ret { result: Reg(1) },
        ]
    );
}
