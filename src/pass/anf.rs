//! A-normal form.
//!
//! After this pass every argument of `Call`, `If`, `Tuple`, and
//! `TupleGetItem` is a `Var` or `Constant` (globals and constructors also
//! count as atoms); every intermediate result is named by a `Let`. The
//! emitter relies on this to decide where registers are allocated.
//!
//! `If` branches are normalized in their own scope: bindings introduced
//! inside a branch stay inside the branch.

use std::mem;

use crate::error::PassError;
use crate::ir::expr::{Expr, ExprKind, Var, VarGen};
use crate::ir::module::Module;

/// Rewrites every global's body into A-normal form.
pub fn run(module: &mut Module) -> Result<(), PassError> {
    let mut gen = module.var_gen();
    for global in &mut module.globals {
        let body = take_expr(&mut global.func.body);
        *global.func.body = normalize_tail(body, &mut gen);
    }
    Ok(())
}

/// Replaces `slot` with a placeholder and returns the old expression.
fn take_expr(slot: &mut Expr) -> Expr {
    mem::replace(
        slot,
        Expr {
            ty: crate::ir::types::Type::Tuple(Vec::new()),
            kind: ExprKind::Tuple(Vec::new()),
        },
    )
}

/// Normalizes an expression in tail position: bindings hoisted out of it
/// are wrapped back around the result as a `Let` chain.
fn normalize_tail(expr: Expr, gen: &mut VarGen) -> Expr {
    let mut binds = Vec::new();
    let simple = normalize(expr, gen, &mut binds);
    wrap_lets(binds, simple)
}

/// Normalizes `expr` into a "simple" expression: an atom, or a single
/// compound whose operands are all atoms. `Let` chains encountered on the
/// way are flattened into `binds`.
fn normalize(expr: Expr, gen: &mut VarGen, binds: &mut Vec<(Var, Expr)>) -> Expr {
    let Expr { ty, kind } = expr;
    match kind {
        ExprKind::Var(_)
        | ExprKind::GlobalVar(_)
        | ExprKind::Constant(_)
        | ExprKind::Constructor(_) => Expr { ty, kind },

        ExprKind::Function(mut func) => {
            // Primitive bodies are opaque kernels; only real lambdas are
            // normalized inside.
            if !func.is_primitive {
                let body = take_expr(&mut func.body);
                *func.body = normalize_tail(body, gen);
            }
            Expr {
                ty,
                kind: ExprKind::Function(func),
            }
        }

        ExprKind::Let { var, value, body } => {
            let value = normalize(*value, gen, binds);
            binds.push((var, value));
            normalize(*body, gen, binds)
        }

        ExprKind::Tuple(fields) => {
            let fields = fields
                .into_iter()
                .map(|f| atomize(f, gen, binds))
                .collect();
            Expr {
                ty,
                kind: ExprKind::Tuple(fields),
            }
        }

        ExprKind::TupleGetItem { tuple, index } => {
            let tuple = atomize(*tuple, gen, binds);
            Expr {
                ty,
                kind: ExprKind::TupleGetItem {
                    tuple: Box::new(tuple),
                    index,
                },
            }
        }

        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => {
            let cond = atomize(*cond, gen, binds);
            Expr {
                ty,
                kind: ExprKind::If {
                    cond: Box::new(cond),
                    true_branch: Box::new(normalize_tail(*true_branch, gen)),
                    false_branch: Box::new(normalize_tail(*false_branch, gen)),
                },
            }
        }

        ExprKind::Call { op, args } => {
            // Primitive callees stay in callee position; anything else
            // that is not already an atom is named like an argument.
            let prim_callee = matches!(&op.kind, ExprKind::Function(f) if f.is_primitive);
            let op = if prim_callee || op.is_atomic() {
                *op
            } else {
                atomize(*op, gen, binds)
            };
            let args = args
                .into_iter()
                .map(|a| atomize(a, gen, binds))
                .collect();
            Expr {
                ty,
                kind: ExprKind::Call {
                    op: Box::new(op),
                    args,
                },
            }
        }

        ExprKind::Match { scrutinee } => {
            let scrutinee = atomize(*scrutinee, gen, binds);
            Expr {
                ty,
                kind: ExprKind::Match {
                    scrutinee: Box::new(scrutinee),
                },
            }
        }
    }
}

/// Normalizes `expr` and, if the result is not an atom, binds it to a
/// fresh variable so the caller can refer to it by name.
fn atomize(expr: Expr, gen: &mut VarGen, binds: &mut Vec<(Var, Expr)>) -> Expr {
    let simple = normalize(expr, gen, binds);
    if simple.is_atomic() {
        return simple;
    }
    let var = gen.fresh(simple.ty.clone());
    binds.push((var.clone(), simple));
    Expr::var(var)
}

fn wrap_lets(binds: Vec<(Var, Expr)>, body: Expr) -> Expr {
    binds
        .into_iter()
        .rev()
        .fold(body, |acc, (var, value)| Expr::let_(var, value, acc))
}
