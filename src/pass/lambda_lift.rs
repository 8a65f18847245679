//! Lambda lifting.
//!
//! Promotes every nested non-primitive `Function` to a module-level
//! global in closure shape: the outer function's parameters are the
//! lambda's free variables (in first-occurrence order), its body is the
//! original function. The use site becomes a call to the lifted global
//! with the free variables as arguments, which the emitter lowers to
//! `AllocClosure`. Capture-free lambdas get the same shape with an empty
//! capture list.
//!
//! Globals that are already closure-shaped are descended into, not
//! re-lifted.

use crate::error::PassError;
use crate::ir::expr::{free_vars, Expr, ExprKind, Function};
use crate::ir::module::Module;

/// True iff `func`'s body is itself a function.
///
/// This is the post-lambda-lifting shape of a function that closes over
/// free variables: the outer parameters are the captured variables, the
/// inner parameters are the call arguments.
pub fn is_closure(func: &Function) -> bool {
    matches!(func.body.kind, ExprKind::Function(_))
}

/// Lifts every nested non-primitive function to a closure-shaped global.
pub fn run(module: &mut Module) -> Result<(), PassError> {
    let mut namer = Namer::new(module);
    let mut lifted = Vec::new();

    for global in &mut module.globals {
        let func = &mut global.func;
        if func.is_primitive {
            continue;
        }
        if is_closure(func) {
            if let ExprKind::Function(inner) = &mut func.body.kind {
                lift_expr(&mut inner.body, &mut lifted, &mut namer);
            }
        } else {
            lift_expr(&mut func.body, &mut lifted, &mut namer);
        }
    }

    for (name, func) in lifted {
        // Names come from `Namer`, which avoids collisions, so this
        // cannot fail on a well-formed module.
        module
            .add_global(name.clone(), func)
            .map_err(|_| PassError::UnknownGlobal { name })?;
    }
    Ok(())
}

fn lift_expr(expr: &mut Expr, lifted: &mut Vec<(String, Function)>, namer: &mut Namer) {
    match &mut expr.kind {
        ExprKind::Function(func) if !func.is_primitive => {
            // Bottom-up: inner lambdas first, so the free-variable set of
            // this one is computed over already-lifted code.
            lift_expr(&mut func.body, lifted, namer);

            let captured = free_vars(func);
            let inner = func.clone();
            let inner_ty = inner.fn_type();
            let outer = Function::new(
                captured.clone(),
                Expr::function(inner),
                inner_ty.clone(),
            );
            let outer_ty = outer.fn_type();
            let name = namer.fresh();
            lifted.push((name.clone(), outer));

            let args = captured.into_iter().map(Expr::var).collect();
            expr.ty = inner_ty;
            expr.kind = ExprKind::Call {
                op: Box::new(Expr::global(name, outer_ty)),
                args,
            };
        }
        ExprKind::Function(_) => {} // primitive: opaque, never lifted
        ExprKind::Var(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Constant(_)
        | ExprKind::Constructor(_) => {}
        ExprKind::Tuple(fields) => {
            for f in fields {
                lift_expr(f, lifted, namer);
            }
        }
        ExprKind::TupleGetItem { tuple, .. } => lift_expr(tuple, lifted, namer),
        ExprKind::Let { value, body, .. } => {
            lift_expr(value, lifted, namer);
            lift_expr(body, lifted, namer);
        }
        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => {
            lift_expr(cond, lifted, namer);
            lift_expr(true_branch, lifted, namer);
            lift_expr(false_branch, lifted, namer);
        }
        ExprKind::Call { op, args } => {
            lift_expr(op, lifted, namer);
            for a in args {
                lift_expr(a, lifted, namer);
            }
        }
        ExprKind::Match { scrutinee } => lift_expr(scrutinee, lifted, namer),
    }
}

/// Generates `lifted{n}` global names, skipping any already taken.
struct Namer {
    taken: std::collections::HashSet<String>,
    next: usize,
}

impl Namer {
    fn new(module: &Module) -> Namer {
        Namer {
            taken: module.globals.iter().map(|g| g.name.clone()).collect(),
            next: 0,
        }
    }

    fn fresh(&mut self) -> String {
        loop {
            let name = format!("lifted{}", self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}
