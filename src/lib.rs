//! weft: a bytecode compiler from a typed functional tensor IR to a
//! register-based virtual machine.
//!
//! Pipeline:
//!
//! ```text
//! Module → normalize → {global index map, constant pool}
//!        → per-function emission → Executable
//! ```
//!
//! Normalization stages (in order):
//! 1. `pass::anf`               — A-normal form: every intermediate is named
//! 2. `pass::inline_primitives` — primitive calls become `Call(Function, …)`
//! 3. `pass::lambda_lift`       — nested functions become closure-shaped globals
//! 4. `pass::inline_primitives` — re-run after lifting
//!
//! The emitter walks each normalized global and produces a linear
//! instruction stream over dense virtual registers. Primitive functions
//! are opaque: they are handed to an external [`engine::CompileEngine`]
//! and invoked from bytecode through the packed calling convention
//! (flattened inputs first, pre-allocated outputs last).

pub mod compiler;
pub mod emit;
pub mod engine;
pub mod error;
pub mod ir;
pub mod pass;
pub mod pool;
pub mod vm;

pub use compiler::{compile_module, CompilerContext};
pub use error::Error;
