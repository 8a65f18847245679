use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ir::tensor::NdArray;
use crate::vm::instr::{FuncIdx, Instruction};

/// A compiled VM function: a linear instruction stream over a dense
/// register frame.
///
/// For closure-shaped sources, `arity` counts the inner (call) parameters
/// plus the outer (captured) parameters; registers `0..arity` hold them in
/// that order.
#[derive(Debug, Clone)]
pub struct VmFunction {
    pub name: String,
    pub arity: usize,
    pub instructions: Vec<Instruction>,
    pub num_registers: usize,
}

impl fmt::Display for VmFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "fn {}(arity={}, regs={}):",
            self.name, self.arity, self.num_registers
        )?;
        for (pc, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "  {:>3}: {}", pc, instr)?;
        }
        Ok(())
    }
}

/// A callable kernel handle resolved from the runtime module.
///
/// The callable receives a flat buffer of tensors: flattened inputs first,
/// caller-pre-allocated outputs last, matching `InvokePacked`'s argument
/// order.
#[derive(Clone)]
pub struct PackedFunc {
    name: String,
    func: Arc<dyn Fn(&mut [NdArray]) + Send + Sync>,
}

impl PackedFunc {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&mut [NdArray]) + Send + Sync + 'static,
    ) -> PackedFunc {
        PackedFunc {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, buffer: &mut [NdArray]) {
        (self.func)(buffer)
    }
}

impl fmt::Debug for PackedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackedFunc({})", self.name)
    }
}

/// The compiler's output: everything the VM needs to run a module.
///
/// Once constructed, the image owns all transferred data; the compiler
/// context it came from is consumed.
#[derive(Debug, Default)]
pub struct Executable {
    /// Dense array of VM functions, indexed by `FuncIdx`.
    pub functions: Vec<VmFunction>,
    /// Dense constant pool: literal tensors and precomputed shape tensors
    /// in one shared index space.
    pub constants: Vec<NdArray>,
    /// Dense array of kernel handles, indexed by `InvokePacked`'s op index.
    pub packed_funcs: Vec<PackedFunc>,
    /// Host lookup: global function name → function-table index.
    pub global_map: HashMap<String, FuncIdx>,
}

impl Executable {
    /// Looks up a compiled function by its global name.
    pub fn function(&self, name: &str) -> Option<&VmFunction> {
        let idx = self.global_map.get(name)?;
        self.functions.get(idx.0 as usize)
    }

    /// A deterministic text listing of every compiled function.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for func in &self.functions {
            out.push_str(&func.to_string());
            out.push('\n');
        }
        out
    }
}
