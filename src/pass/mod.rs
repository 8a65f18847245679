//! Normalization: the transforms that establish the flat form the
//! bytecode emitter assumes.
//!
//! Each pass is a module exposing `run(&mut Module) -> Result<(), PassError>`
//! and mutates the module in place. Passes are deterministic: the same
//! input module always produces the same output. [`normalize`] chains them
//! in a fixed order; the emitter's preconditions never change, so there is
//! no configurable pipeline.

pub mod anf;
pub mod inline_primitives;
pub mod lambda_lift;

pub use lambda_lift::is_closure;

use crate::error::PassError;
use crate::ir::module::Module;

/// The fixed normalization sequence. Primitive inlining runs before and
/// after lifting, so primitive calls sit in `Call(Function, …)` form
/// wherever the emitter can reach them.
const STAGES: [(&str, fn(&mut Module) -> Result<(), PassError>); 4] = [
    ("anf", anf::run),
    ("inline-primitives", inline_primitives::run),
    ("lambda-lift", lambda_lift::run),
    ("inline-primitives", inline_primitives::run),
];

/// Establishes A-normal form, inlines primitive calls to their sites, and
/// lifts every nested non-primitive function to a closure-shaped global.
///
/// Aborts at the first failing stage; the module state is then
/// unspecified.
pub fn normalize(module: &mut Module) -> Result<(), PassError> {
    for (name, stage) in STAGES {
        log::debug!("normalize: running {}", name);
        stage(module)?;
    }
    Ok(())
}
