//! Module compilation driver.
//!
//! `compile_module` runs the normalization pipeline, lays out the
//! constant pool, assigns global function indices, compiles every global
//! to bytecode, and asks the registered kernel backend to build the
//! lowered kernels, assembling the final [`Executable`].

use std::collections::HashMap;

use crate::emit::FuncCompiler;
use crate::engine::{BackendRegistry, CompileEngine, LoweredFunc, Target, BUILD_OP};
use crate::error::{CompileError, Error};
use crate::ir::expr::{Constructor, ExprKind, Function};
use crate::ir::module::Module;
use crate::ir::tensor::NdArray;
use crate::pass::{is_closure, normalize};
use crate::pool::{layout_constant_pool, ConstMap, ConstTensorShapeMap};
use crate::vm::exec::{Executable, VmFunction};
use crate::vm::instr::{FuncIdx, Instruction, PackedIdx};

/// Shared state for one module compilation.
///
/// Owned by `compile_module` and mutated by one function compiler at a
/// time; consumed into the [`Executable`] when compilation finishes.
pub struct CompilerContext<'e> {
    /// The normalized module under compilation (read-only from here on).
    pub module: Module,
    /// Global function name → dense index in the VM function table.
    pub global_map: HashMap<String, FuncIdx>,
    /// Literal constant → constant-pool index.
    pub const_map: ConstMap,
    /// Result tensor type → (pool index, precomputed shape tensor).
    pub const_tensor_shape_map: ConstTensorShapeMap,
    /// Kernels lowered so far, in op-index order.
    pub lowered_funcs: Vec<LoweredFunc>,
    /// Interning table: lowered kernel → its dense op index.
    pub seen_funcs: HashMap<LoweredFunc, PackedIdx>,
    /// Declared ADT constructors by runtime tag.
    pub tag_index_map: HashMap<u32, Constructor>,
    pub(crate) engine: &'e mut dyn CompileEngine,
    pub target: Target,
}

impl<'e> CompilerContext<'e> {
    fn new(module: Module, engine: &'e mut dyn CompileEngine, target: Target) -> CompilerContext<'e> {
        let mut global_map = HashMap::new();
        for (i, global) in module.globals().iter().enumerate() {
            global_map.insert(global.name.clone(), FuncIdx(i as u32));
        }

        let (const_map, const_tensor_shape_map) = layout_constant_pool(&module);

        let tag_index_map = module
            .all_constructors()
            .map(|c| (c.tag, c.clone()))
            .collect();

        CompilerContext {
            module,
            global_map,
            const_map,
            const_tensor_shape_map,
            lowered_funcs: Vec::new(),
            seen_funcs: HashMap::new(),
            tag_index_map,
            engine,
            target,
        }
    }

    /// The constant pool as a dense array: `const_map` and
    /// `const_tensor_shape_map` entries packed by index.
    fn layout_constants(&self) -> Vec<NdArray> {
        let mut entries: Vec<(u32, NdArray)> = self
            .const_map
            .iter()
            .map(|(tensor, idx)| (idx.0, tensor.clone()))
            .chain(
                self.const_tensor_shape_map
                    .values()
                    .map(|(idx, tensor)| (idx.0, tensor.clone())),
            )
            .collect();
        entries.sort_by_key(|(idx, _)| *idx);
        debug_assert!(entries.iter().enumerate().all(|(i, (idx, _))| i == *idx as usize));
        entries.into_iter().map(|(_, tensor)| tensor).collect()
    }
}

/// Compiles one global function to a VM function record.
fn compile_func(
    ctx: &mut CompilerContext<'_>,
    name: &str,
    func: &Function,
) -> Result<VmFunction, CompileError> {
    log::debug!("compile_func: @{}", name);
    let mut compiler = FuncCompiler::new(ctx);
    compiler.compile(func)?;
    // Return the last evaluated expression.
    let result = compiler.last_register;
    compiler.emit(Instruction::Ret { result })?;

    let arity = if is_closure(func) {
        let ExprKind::Function(inner) = &func.body.kind else {
            unreachable!("is_closure guarantees a function body");
        };
        func.params.len() + inner.params.len()
    } else {
        func.params.len()
    };

    Ok(VmFunction {
        name: name.to_owned(),
        arity,
        instructions: compiler.instructions,
        num_registers: compiler.registers_num as usize,
    })
}

/// Compiles `module` into an [`Executable`] for `target`.
///
/// `engine` lowers primitive kernels as they are encountered; when any
/// were lowered, the backend registered under [`BUILD_OP`] in `backends`
/// builds them and each is resolved by name into the image's
/// `packed_funcs` table.
pub fn compile_module(
    mut module: Module,
    engine: &mut dyn CompileEngine,
    backends: &BackendRegistry,
    target: Target,
) -> Result<Executable, Error> {
    normalize(&mut module)?;

    let mut ctx = CompilerContext::new(module, engine, target);
    let constants = ctx.layout_constants();

    let globals: Vec<(String, Function)> = ctx
        .module
        .globals()
        .iter()
        .map(|g| (g.name.clone(), g.func.clone()))
        .collect();

    let mut functions = Vec::with_capacity(globals.len());
    for (name, func) in &globals {
        functions.push(compile_func(&mut ctx, name, func)?);
    }

    let mut packed_funcs = Vec::with_capacity(ctx.lowered_funcs.len());
    if !ctx.lowered_funcs.is_empty() {
        let backend = backends.get(BUILD_OP).ok_or_else(|| {
            Error::Compile(CompileError::LoweringFailure {
                detail: format!("kernel backend '{}' is not registered", BUILD_OP),
            })
        })?;
        let runtime = backend
            .build(&ctx.lowered_funcs, &ctx.target)
            .map_err(|detail| Error::Compile(CompileError::LoweringFailure { detail }))?;
        for lowered in &ctx.lowered_funcs {
            let packed = runtime.get_function(&lowered.name).ok_or_else(|| {
                Error::Compile(CompileError::LoweringFailure {
                    detail: format!("runtime module does not export '{}'", lowered.name),
                })
            })?;
            packed_funcs.push(packed);
        }
    }

    Ok(Executable {
        functions,
        constants,
        packed_funcs,
        global_map: ctx.global_map,
    })
}
