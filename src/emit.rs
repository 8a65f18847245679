//! Per-function bytecode emission.
//!
//! [`FuncCompiler`] walks a normalized function body and appends
//! register-machine instructions to a flat buffer. Each visited
//! expression leaves the register holding its result in `last_register`
//! so the enclosing construct can chain. Registers are allocated by a
//! monotonic counter and never reused; jump targets are patched in place
//! after both branches of an `If` are emitted.

use std::collections::HashMap;

use crate::compiler::CompilerContext;
use crate::error::CompileError;
use crate::ir::expr::{Expr, ExprKind, Function, VarId};
use crate::ir::types::{DType, Type};
use crate::pass::is_closure;
use crate::vm::instr::{Instruction, PackedIdx, Reg};

pub struct FuncCompiler<'a, 'e> {
    pub(crate) instructions: Vec<Instruction>,
    var_register_map: HashMap<VarId, Reg>,
    pub(crate) last_register: Reg,
    /// Total number of virtual registers allocated so far.
    pub(crate) registers_num: u32,
    ctx: &'a mut CompilerContext<'e>,
}

impl<'a, 'e> FuncCompiler<'a, 'e> {
    pub fn new(ctx: &'a mut CompilerContext<'e>) -> FuncCompiler<'a, 'e> {
        FuncCompiler {
            instructions: Vec::new(),
            var_register_map: HashMap::new(),
            last_register: Reg(0),
            registers_num: 0,
            ctx,
        }
    }

    fn new_register(&mut self) -> Reg {
        let reg = Reg(self.registers_num);
        self.registers_num += 1;
        reg
    }

    /// Appends an instruction, tracking the destination register of
    /// value-producing opcodes in `last_register`.
    pub(crate) fn emit(&mut self, instr: Instruction) -> Result<(), CompileError> {
        log::debug!("emit: {}", instr);
        let opcode = instr.opcode() as u8;
        if opcode >= 100 {
            return Err(CompileError::UnknownOpcode { opcode });
        }
        match &instr {
            Instruction::Move { dst, .. }
            | Instruction::Invoke { dst, .. }
            | Instruction::InvokeClosure { dst, .. }
            | Instruction::AllocTensor { dst, .. }
            | Instruction::AllocDatatype { dst, .. }
            | Instruction::AllocClosure { dst, .. }
            | Instruction::GetField { dst, .. }
            | Instruction::Select { dst, .. }
            | Instruction::LoadConst { dst, .. } => self.last_register = *dst,
            Instruction::InvokePacked { args, .. } => {
                // The final packed argument is the last output tensor.
                if let Some(&last) = args.last() {
                    self.last_register = last;
                }
            }
            Instruction::Ret { .. } | Instruction::If { .. } | Instruction::Goto { .. } => {}
        }
        self.instructions.push(instr);
        Ok(())
    }

    /// Compiles a function body, registering parameters first.
    ///
    /// For a closure-shaped function the inner (call) parameters take
    /// registers `0..m` and the outer (captured) parameters `m..m+k`,
    /// matching the VM's closure-invocation convention of arguments first,
    /// captured environment after.
    pub fn compile(&mut self, func: &Function) -> Result<(), CompileError> {
        if is_closure(func) {
            let ExprKind::Function(inner) = &func.body.kind else {
                unreachable!("is_closure guarantees a function body");
            };
            for param in inner.params.iter().chain(&func.params) {
                let reg = self.new_register();
                self.var_register_map.insert(param.id, reg);
            }
            return self.visit(&inner.body);
        }

        for (i, param) in func.params.iter().enumerate() {
            let reg = self.new_register();
            debug_assert_eq!(reg.0 as usize, i);
            self.var_register_map.insert(param.id, reg);
        }
        self.visit(&func.body)
    }

    fn visit(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Constant(value) => {
                let idx = self
                    .ctx
                    .const_map
                    .get(value)
                    .copied()
                    .ok_or_else(|| CompileError::MissingConstant {
                        expr: expr.to_string(),
                    })?;
                let dst = self.new_register();
                self.emit(Instruction::LoadConst { idx, dst })
            }

            ExprKind::Var(var) => {
                let reg = self.var_register_map.get(&var.id).copied().ok_or_else(|| {
                    CompileError::UnboundVariable {
                        name: var.name.clone(),
                    }
                })?;
                self.last_register = reg;
                Ok(())
            }

            ExprKind::Tuple(fields) => {
                let mut field_regs = Vec::with_capacity(fields.len());
                for field in fields {
                    self.visit(field)?;
                    field_regs.push(self.last_register);
                }
                let dst = self.new_register();
                self.emit(Instruction::AllocDatatype {
                    tag: 0,
                    fields: field_regs,
                    dst,
                })
            }

            ExprKind::TupleGetItem { tuple, index } => {
                self.visit(tuple)?;
                let object = self.last_register;
                let dst = self.new_register();
                self.emit(Instruction::GetField {
                    object,
                    index: *index,
                    dst,
                })
            }

            ExprKind::Let { var, value, body } => {
                self.visit(value)?;
                self.var_register_map.insert(var.id, self.last_register);
                self.visit(body)
            }

            ExprKind::If {
                cond,
                true_branch,
                false_branch,
            } => self.visit_if(cond, true_branch, false_branch),

            ExprKind::Call { op, args } => self.visit_call(expr, op, args),

            ExprKind::Function(func) => {
                if !func.is_primitive {
                    return Err(CompileError::UnsupportedConstruct {
                        detail: "local function should have been removed by lambda lifting"
                            .to_owned(),
                        expr: expr.to_string(),
                    });
                }
                // A primitive outside call position emits nothing; its
                // only supported use is as a callee.
                Ok(())
            }

            ExprKind::GlobalVar(_) => Err(CompileError::UnsupportedConstruct {
                detail: "loading a global into a register is not supported".to_owned(),
                expr: expr.to_string(),
            }),

            ExprKind::Constructor(_) => Err(CompileError::UnsupportedConstruct {
                detail: "constructor used outside call position".to_owned(),
                expr: expr.to_string(),
            }),

            ExprKind::Match { .. } => Err(CompileError::UnsupportedConstruct {
                detail: "match lowering is not supported".to_owned(),
                expr: expr.to_string(),
            }),
        }
    }

    /// Both branches are emitted unconditionally and a value-level
    /// `Select` picks the surviving register; the patched `true_offset`
    /// of 1 falls through into the true branch. This mirrors the
    /// reference lowering rather than short-circuit control flow (see
    /// DESIGN.md).
    fn visit_if(
        &mut self,
        cond: &Expr,
        true_branch: &Expr,
        false_branch: &Expr,
    ) -> Result<(), CompileError> {
        self.visit(cond)?;
        let cond_register = self.last_register;

        let after_cond = self.instructions.len();
        self.emit(Instruction::If {
            cond: cond_register,
            true_offset: 0,
            false_offset: 0,
        })?;

        self.visit(true_branch)?;
        let true_register = self.last_register;
        self.emit(Instruction::Goto { offset: 0 })?;
        let after_true = self.instructions.len();

        self.visit(false_branch)?;
        let false_register = self.last_register;
        let after_false = self.instructions.len();

        // Patch the If with the branch offsets, then the Goto that jumps
        // over the false branch.
        if let Instruction::If {
            true_offset,
            false_offset,
            ..
        } = &mut self.instructions[after_cond]
        {
            *true_offset = 1;
            *false_offset = (after_true - after_cond) as i32;
        } else {
            unreachable!("patch target is not an If");
        }
        if let Instruction::Goto { offset } = &mut self.instructions[after_true - 1] {
            *offset = (after_false - after_true) as i32 + 1;
        } else {
            unreachable!("patch target is not a Goto");
        }

        let dst = self.new_register();
        self.emit(Instruction::Select {
            cond: cond_register,
            true_reg: true_register,
            false_reg: false_register,
            dst,
        })
    }

    fn visit_call(&mut self, call: &Expr, op: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        let mut args_registers = Vec::with_capacity(args.len());
        for arg in args {
            self.visit(arg)?;
            args_registers.push(self.last_register);
        }

        match &op.kind {
            ExprKind::Function(func) => {
                if !func.is_primitive {
                    return Err(CompileError::UnsupportedConstruct {
                        detail: "calling a non-primitive inline function".to_owned(),
                        expr: call.to_string(),
                    });
                }
                self.emit_invoke_primitive(call, func, &args_registers)
            }

            ExprKind::GlobalVar(name) => {
                let func_idx = self.ctx.global_map.get(name).copied().ok_or_else(|| {
                    CompileError::MissingGlobal { name: name.clone() }
                })?;
                let callee = self
                    .ctx
                    .module
                    .global(name)
                    .ok_or_else(|| CompileError::MissingGlobal { name: name.clone() })?;
                log::debug!("call: @{} resolves to function index {}", name, func_idx.0);
                if is_closure(callee) {
                    let dst = self.new_register();
                    self.emit(Instruction::AllocClosure {
                        func: func_idx,
                        captured: args_registers,
                        dst,
                    })
                } else {
                    let dst = self.new_register();
                    self.emit(Instruction::Invoke {
                        func: func_idx,
                        args: args_registers,
                        dst,
                    })
                }
            }

            ExprKind::Constructor(ctor) => {
                if let Some(declared) = self.ctx.tag_index_map.get(&ctor.tag) {
                    if declared.arity != args_registers.len() {
                        return Err(CompileError::UnsupportedConstruct {
                            detail: format!(
                                "constructor {}#{} expects {} fields, call provides {}",
                                declared.adt,
                                ctor.tag,
                                declared.arity,
                                args_registers.len()
                            ),
                            expr: call.to_string(),
                        });
                    }
                }
                let dst = self.new_register();
                self.emit(Instruction::AllocDatatype {
                    tag: ctor.tag,
                    fields: args_registers,
                    dst,
                })
            }

            ExprKind::Var(_) => {
                // The variable must hold a closure.
                self.visit(op)?;
                let closure = self.last_register;
                let dst = self.new_register();
                self.emit(Instruction::InvokeClosure {
                    closure,
                    args: args_registers,
                    dst,
                })
            }

            _ => Err(CompileError::UnsupportedConstruct {
                detail: "unsupported callee".to_owned(),
                expr: call.to_string(),
            }),
        }
    }

    /// Emits `LoadConst(shape)` for the precomputed shape tensor of `ty`
    /// and returns the pending `AllocTensor` with its destination.
    fn alloc_tensor_from_type(
        &mut self,
        dtype: DType,
        ty: &Type,
    ) -> Result<(Instruction, Reg), CompileError> {
        let shape_idx = self
            .ctx
            .const_tensor_shape_map
            .get(ty)
            .map(|(idx, _)| *idx)
            .ok_or_else(|| CompileError::MissingConstant {
                expr: ty.to_string(),
            })?;
        let shape_dst = self.new_register();
        self.emit(Instruction::LoadConst {
            idx: shape_idx,
            dst: shape_dst,
        })?;
        let dst = self.new_register();
        Ok((
            Instruction::AllocTensor {
                shape: shape_dst,
                dtype,
                dst,
            },
            dst,
        ))
    }

    /// The packed calling convention: flatten tensor and one-level tuple
    /// parameters into a flat register list, pre-allocate one output
    /// tensor per result tensor, lower the kernel through the engine, and
    /// emit `InvokePacked` with inputs first and outputs last.
    fn emit_invoke_primitive(
        &mut self,
        call: &Expr,
        func: &Function,
        args_registers: &[Reg],
    ) -> Result<(), CompileError> {
        if func.params.len() != args_registers.len() {
            return Err(CompileError::UnsupportedConstruct {
                detail: format!(
                    "primitive expects {} arguments, call provides {}",
                    func.params.len(),
                    args_registers.len()
                ),
                expr: call.to_string(),
            });
        }

        let mut packed_args = Vec::new();
        let mut arity = 0usize;
        for (param, &reg) in func.params.iter().zip(args_registers) {
            match &param.ty {
                Type::Tensor { .. } => {
                    packed_args.push(reg);
                    arity += 1;
                }
                Type::Tuple(fields) => {
                    for (f, field_ty) in fields.iter().enumerate() {
                        if !field_ty.is_tensor() {
                            return Err(CompileError::UnsupportedConstruct {
                                detail: format!(
                                    "only non-nested tuples of tensors are supported, found {}",
                                    field_ty
                                ),
                                expr: call.to_string(),
                            });
                        }
                        let dst = self.new_register();
                        self.emit(Instruction::GetField {
                            object: reg,
                            index: f,
                            dst,
                        })?;
                        packed_args.push(dst);
                    }
                    arity += fields.len();
                }
                other => {
                    return Err(CompileError::UnsupportedConstruct {
                        detail: format!("unsupported parameter type {}", other),
                        expr: call.to_string(),
                    });
                }
            }
        }

        // Output allocations go after the flattened inputs: the LoadConst
        // for each shape is emitted while building, the AllocTensors as a
        // batch below.
        let mut allocs = Vec::new();
        let ret_ty = &call.ty;
        let output_count = match ret_ty {
            Type::Tensor { dtype, .. } => {
                allocs.push(self.alloc_tensor_from_type(*dtype, ret_ty)?);
                1
            }
            Type::Tuple(fields) => {
                for field in fields {
                    let Type::Tensor { dtype, .. } = field else {
                        return Err(CompileError::UnsupportedConstruct {
                            detail: format!("unsupported return field type {}", field),
                            expr: call.to_string(),
                        });
                    };
                    allocs.push(self.alloc_tensor_from_type(*dtype, field)?);
                }
                fields.len()
            }
            other => {
                return Err(CompileError::UnsupportedConstruct {
                    detail: format!("unsupported primitive return type {}", other),
                    expr: call.to_string(),
                });
            }
        };
        arity += output_count;

        let mut output_regs = Vec::with_capacity(output_count);
        for (alloc, dst) in allocs {
            self.emit(alloc)?;
            packed_args.push(dst);
            output_regs.push(dst);
        }

        let lowered = self
            .ctx
            .engine
            .lower(func, &self.ctx.target)
            .map_err(|detail| CompileError::LoweringFailure { detail })?;
        if lowered.len() != 1 {
            return Err(CompileError::LoweringFailure {
                detail: format!(
                    "expected exactly one lowered function, engine produced {}",
                    lowered.len()
                ),
            });
        }
        let handle = lowered.into_iter().next().ok_or_else(|| {
            CompileError::LoweringFailure {
                detail: "engine produced an empty bundle".to_owned(),
            }
        })?;

        let op_index = match self.ctx.seen_funcs.get(&handle) {
            Some(&idx) => idx,
            None => {
                let idx = PackedIdx(self.ctx.lowered_funcs.len() as u32);
                self.ctx.lowered_funcs.push(handle.clone());
                self.ctx.seen_funcs.insert(handle, idx);
                idx
            }
        };
        log::debug!(
            "invoke_packed: op_index={} arity={} outputs={}",
            op_index.0,
            arity,
            output_count
        );

        self.emit(Instruction::InvokePacked {
            op: op_index,
            arity,
            output_count,
            args: packed_args,
        })?;

        // A tuple return is re-aggregated so downstream code consumes a
        // single value; a single tensor return stays in its output
        // register.
        if output_count > 1 {
            let dst = self.new_register();
            self.emit(Instruction::AllocDatatype {
                tag: 0,
                fields: output_regs,
                dst,
            })?;
        }
        Ok(())
    }
}
