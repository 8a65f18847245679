//! Primitive inlining.
//!
//! Substitutes every `GlobalVar` whose definition is a primitive
//! `Function` with that function expression, so primitive calls appear as
//! `Call(Function, …)` at the site and the emitter can apply the packed
//! calling convention without a module lookup. The now-unreferenced
//! primitive globals are dropped from the module afterwards, leaving the
//! global index space to the bytecode functions.

use std::collections::HashMap;

use crate::error::PassError;
use crate::ir::expr::{Expr, ExprKind, Function};
use crate::ir::module::Module;

/// Inlines every reference to a primitive global, then drops the
/// primitive globals from the module.
pub fn run(module: &mut Module) -> Result<(), PassError> {
    let prims: HashMap<String, Function> = module
        .globals
        .iter()
        .filter(|g| g.func.is_primitive)
        .map(|g| (g.name.clone(), g.func.clone()))
        .collect();

    for global in &mut module.globals {
        if global.func.is_primitive {
            continue;
        }
        substitute(&mut global.func.body, &prims, &module.global_index)?;
    }

    if !prims.is_empty() {
        module.retain_globals(|g| !g.func.is_primitive);
    }
    Ok(())
}

fn substitute(
    expr: &mut Expr,
    prims: &HashMap<String, Function>,
    known: &HashMap<String, crate::ir::module::GlobalId>,
) -> Result<(), PassError> {
    if let ExprKind::GlobalVar(name) = &expr.kind {
        if let Some(func) = prims.get(name) {
            expr.ty = func.fn_type();
            expr.kind = ExprKind::Function(func.clone());
        } else if !known.contains_key(name) {
            return Err(PassError::UnknownGlobal { name: name.clone() });
        }
        return Ok(());
    }

    match &mut expr.kind {
        ExprKind::Var(_) | ExprKind::Constant(_) | ExprKind::Constructor(_) => Ok(()),
        ExprKind::GlobalVar(_) => unreachable!("handled above"),
        ExprKind::Tuple(fields) => {
            for f in fields {
                substitute(f, prims, known)?;
            }
            Ok(())
        }
        ExprKind::TupleGetItem { tuple, .. } => substitute(tuple, prims, known),
        ExprKind::Let { value, body, .. } => {
            substitute(value, prims, known)?;
            substitute(body, prims, known)
        }
        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => {
            substitute(cond, prims, known)?;
            substitute(true_branch, prims, known)?;
            substitute(false_branch, prims, known)
        }
        ExprKind::Call { op, args } => {
            substitute(op, prims, known)?;
            for a in args {
                substitute(a, prims, known)?;
            }
            Ok(())
        }
        ExprKind::Function(func) => {
            if func.is_primitive {
                return Ok(()); // opaque kernel body
            }
            substitute(&mut func.body, prims, known)
        }
        ExprKind::Match { scrutinee } => substitute(scrutinee, prims, known),
    }
}
