//! Interfaces to the external kernel toolchain.
//!
//! The compiler never generates machine code for primitive functions
//! itself: it hands each one to a [`CompileEngine`], collects the returned
//! [`LoweredFunc`] handles, and at the end of a module compilation asks a
//! registered [`KernelBackend`] to build them into a [`RuntimeModule`]
//! from which callable [`PackedFunc`]s are resolved by name.

use std::collections::HashMap;
use std::fmt;

use crate::ir::expr::Function;
use crate::vm::exec::PackedFunc;

/// The code-generation target for kernel lowering. One target is assumed
/// per compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub name: String,
}

impl Target {
    pub fn new(name: impl Into<String>) -> Target {
        Target { name: name.into() }
    }
}

impl Default for Target {
    fn default() -> Target {
        Target::new("llvm")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A handle to an externally lowered kernel.
///
/// Identity is by equality: the compiler interns handles, so an engine
/// that memoizes must return equal handles for equal inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoweredFunc {
    pub name: String,
}

impl LoweredFunc {
    pub fn new(name: impl Into<String>) -> LoweredFunc {
        LoweredFunc { name: name.into() }
    }
}

/// Lowers primitive functions to kernel object code.
///
/// The engine may memoize across calls. The compiler requires exactly one
/// entry in the returned bundle; multi-target lowering is rejected.
pub trait CompileEngine {
    fn lower(&mut self, func: &Function, target: &Target) -> Result<Vec<LoweredFunc>, String>;
}

/// A built bundle of kernels, exposing each by name.
pub trait RuntimeModule {
    fn get_function(&self, name: &str) -> Option<PackedFunc>;
}

/// Builds a list of lowered kernels into a runtime module.
pub trait KernelBackend {
    fn build(
        &self,
        funcs: &[LoweredFunc],
        target: &Target,
    ) -> Result<Box<dyn RuntimeModule>, String>;
}

/// The fixed registry name the module compiler looks up to build kernels.
pub const BUILD_OP: &str = "vm.backend.build";

/// Maps operation names to kernel backends.
///
/// The module compiler resolves [`BUILD_OP`] here; a missing entry is a
/// `LoweringFailure` (only reached when the module actually lowered
/// kernels).
#[derive(Default)]
pub struct BackendRegistry {
    builders: HashMap<String, Box<dyn KernelBackend>>,
}

impl BackendRegistry {
    pub fn new() -> BackendRegistry {
        BackendRegistry {
            builders: HashMap::new(),
        }
    }

    pub fn register(&mut self, op: impl Into<String>, backend: impl KernelBackend + 'static) {
        self.builders.insert(op.into(), Box::new(backend));
    }

    pub fn get(&self, op: &str) -> Option<&dyn KernelBackend> {
        self.builders.get(op).map(|b| b.as_ref())
    }
}
