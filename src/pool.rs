//! Constant pool layout.
//!
//! One walk over the normalized module collects every literal constant and
//! every statically known result-tensor shape arising at primitive call
//! sites, assigning each a dense index. Constants and shape tensors share
//! a single index space; the two maps together partition `0..n`.
//!
//! Precomputing shape tensors here is what lets the emitter feed
//! `AllocTensor` a `LoadConst` shape operand instead of building a shape
//! tensor on every invocation.

use std::collections::{HashMap, HashSet};

use crate::ir::expr::{Expr, ExprKind, Function};
use crate::ir::module::Module;
use crate::ir::tensor::NdArray;
use crate::ir::types::Type;
use crate::vm::instr::ConstIdx;

/// Map from literal constant to its pool index.
pub type ConstMap = HashMap<NdArray, ConstIdx>;

/// Map from result tensor type to its pool index and precomputed 1-D
/// `i64` shape tensor.
pub type ConstTensorShapeMap = HashMap<Type, (ConstIdx, NdArray)>;

/// Lays out the constant pool for `module`.
///
/// Indices are assigned in order of first observation, walking globals in
/// module iteration order and chasing `GlobalVar` references at most once.
pub fn layout_constant_pool(module: &Module) -> (ConstMap, ConstTensorShapeMap) {
    let mut pool = ConstantPool {
        module,
        visited: HashSet::new(),
        const_map: HashMap::new(),
        shape_map: HashMap::new(),
        index: 0,
    };
    for global in module.globals() {
        pool.visit_global(&global.name);
    }
    (pool.const_map, pool.shape_map)
}

struct ConstantPool<'m> {
    module: &'m Module,
    visited: HashSet<String>,
    const_map: ConstMap,
    shape_map: ConstTensorShapeMap,
    index: u32,
}

impl ConstantPool<'_> {
    fn next_index(&mut self) -> ConstIdx {
        let idx = ConstIdx(self.index);
        self.index += 1;
        idx
    }

    fn visit_global(&mut self, name: &str) {
        if !self.visited.insert(name.to_owned()) {
            return;
        }
        if let Some(func) = self.module.global(name) {
            self.visit_function(func);
        }
    }

    fn visit_function(&mut self, func: &Function) {
        self.visit(&func.body);
    }

    fn visit(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Constant(value) => {
                if !self.const_map.contains_key(value) {
                    let idx = self.next_index();
                    self.const_map.insert(value.clone(), idx);
                }
            }
            ExprKind::GlobalVar(name) => self.visit_global(name),
            ExprKind::Var(_) | ExprKind::Constructor(_) => {}
            ExprKind::Tuple(fields) => {
                for f in fields {
                    self.visit(f);
                }
            }
            ExprKind::TupleGetItem { tuple, .. } => self.visit(tuple),
            ExprKind::Let { value, body, .. } => {
                self.visit(value);
                self.visit(body);
            }
            ExprKind::If {
                cond,
                true_branch,
                false_branch,
            } => {
                self.visit(cond);
                self.visit(true_branch);
                self.visit(false_branch);
            }
            ExprKind::Call { op, args } => {
                for a in args {
                    self.visit(a);
                }
                // The callee itself is not traversed: constants inside a
                // primitive body belong to the kernel compiler. What we
                // collect here is the call's result shape, one level of
                // tuple deep; non-tensor fields are left for the emitter
                // to reject.
                if matches!(op.kind, ExprKind::Function(_)) {
                    match &expr.ty {
                        Type::Tensor { .. } => self.add_shape(&expr.ty),
                        Type::Tuple(fields) => {
                            for field in fields {
                                if field.is_tensor() {
                                    self.add_shape(field);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            ExprKind::Function(func) => self.visit_function(func),
            ExprKind::Match { scrutinee } => self.visit(scrutinee),
        }
    }

    fn add_shape(&mut self, ty: &Type) {
        if self.shape_map.contains_key(ty) {
            return;
        }
        let Type::Tensor { shape, .. } = ty else {
            return;
        };
        let tensor = NdArray::from_i64s(shape);
        let idx = self.next_index();
        self.shape_map.insert(ty.clone(), (idx, tensor));
    }
}
