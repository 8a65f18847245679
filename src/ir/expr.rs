use std::collections::HashSet;
use std::fmt;

use crate::ir::tensor::NdArray;
use crate::ir::types::Type;

/// An opaque, index-based identity for a local variable.
///
/// Invariant: `VarId`s are unique within a `Module`. Binding maps
/// (`Let` scopes, register assignment) key on the id, not the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A named, typed local binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub id: VarId,
    pub name: String,
    pub ty: Type,
}

impl Var {
    pub fn new(id: u32, name: impl Into<String>, ty: Type) -> Var {
        Var {
            id: VarId(id),
            name: name.into(),
            ty,
        }
    }
}

/// Allocates fresh `Var`s with ids above everything already in a module.
/// Used by the normalization passes when they introduce bindings.
pub struct VarGen {
    next: u32,
}

impl VarGen {
    pub fn new(start: u32) -> VarGen {
        VarGen { next: start }
    }

    pub fn fresh(&mut self, ty: Type) -> Var {
        let id = self.next;
        self.next += 1;
        Var::new(id, format!("t{}", id), ty)
    }
}

/// An algebraic-data-type constructor.
///
/// `tag` is the runtime tag the VM stores in the allocated datatype object;
/// `arity` is the number of payload fields the constructor takes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constructor {
    pub tag: u32,
    pub arity: usize,
    pub adt: String,
}

/// A source-IR function.
///
/// `is_primitive` marks opaque leaf kernels: their bodies are lowered by
/// the external compile engine, never walked by the bytecode emitter.
/// After lambda lifting, non-primitive `Function` values appear only as
/// module globals or as the body of a closure-shaped global.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    pub params: Vec<Var>,
    pub body: Box<Expr>,
    pub ret_ty: Type,
    pub is_primitive: bool,
}

impl Function {
    pub fn new(params: Vec<Var>, body: Expr, ret_ty: Type) -> Function {
        Function {
            params,
            body: Box::new(body),
            ret_ty,
            is_primitive: false,
        }
    }

    pub fn primitive(params: Vec<Var>, body: Expr, ret_ty: Type) -> Function {
        Function {
            params,
            body: Box::new(body),
            ret_ty,
            is_primitive: true,
        }
    }

    /// The `Type::Fn` signature of this function.
    pub fn fn_type(&self) -> Type {
        Type::Fn {
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            ret: Box::new(self.ret_ty.clone()),
        }
    }
}

/// A typed source-IR expression. Every node carries its checked type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expr {
    pub ty: Type,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExprKind {
    /// A local binding reference.
    Var(Var),
    /// A top-level function reference.
    GlobalVar(String),
    /// A literal tensor.
    Constant(NdArray),
    Tuple(Vec<Expr>),
    TupleGetItem { tuple: Box<Expr>, index: usize },
    Let { var: Var, value: Box<Expr>, body: Box<Expr> },
    If { cond: Box<Expr>, true_branch: Box<Expr>, false_branch: Box<Expr> },
    Call { op: Box<Expr>, args: Vec<Expr> },
    Function(Function),
    Constructor(Constructor),
    /// Pattern match. Arms are not modeled: the construct is representable
    /// so the emitter can reject it with a diagnostic.
    Match { scrutinee: Box<Expr> },
}

impl Expr {
    pub fn var(v: Var) -> Expr {
        Expr {
            ty: v.ty.clone(),
            kind: ExprKind::Var(v),
        }
    }

    pub fn global(name: impl Into<String>, ty: Type) -> Expr {
        Expr {
            ty,
            kind: ExprKind::GlobalVar(name.into()),
        }
    }

    pub fn constant(value: NdArray) -> Expr {
        Expr {
            ty: Type::Tensor {
                dtype: value.dtype(),
                shape: value.shape().to_vec(),
            },
            kind: ExprKind::Constant(value),
        }
    }

    pub fn tuple(fields: Vec<Expr>) -> Expr {
        Expr {
            ty: Type::Tuple(fields.iter().map(|f| f.ty.clone()).collect()),
            kind: ExprKind::Tuple(fields),
        }
    }

    /// Projects field `index` out of a tuple-typed expression.
    pub fn tuple_get(tuple: Expr, index: usize) -> Expr {
        let ty = match &tuple.ty {
            Type::Tuple(fields) => fields[index].clone(),
            other => other.clone(),
        };
        Expr {
            ty,
            kind: ExprKind::TupleGetItem {
                tuple: Box::new(tuple),
                index,
            },
        }
    }

    pub fn let_(var: Var, value: Expr, body: Expr) -> Expr {
        Expr {
            ty: body.ty.clone(),
            kind: ExprKind::Let {
                var,
                value: Box::new(value),
                body: Box::new(body),
            },
        }
    }

    pub fn if_(cond: Expr, true_branch: Expr, false_branch: Expr) -> Expr {
        Expr {
            ty: true_branch.ty.clone(),
            kind: ExprKind::If {
                cond: Box::new(cond),
                true_branch: Box::new(true_branch),
                false_branch: Box::new(false_branch),
            },
        }
    }

    /// A call with an explicit result type.
    ///
    /// The result type is the call's `checked_type`; for primitive callees
    /// it also drives output allocation and the shape-constant pool.
    pub fn call(op: Expr, args: Vec<Expr>, ty: Type) -> Expr {
        Expr {
            ty,
            kind: ExprKind::Call {
                op: Box::new(op),
                args,
            },
        }
    }

    pub fn function(func: Function) -> Expr {
        Expr {
            ty: func.fn_type(),
            kind: ExprKind::Function(func),
        }
    }

    pub fn constructor(ctor: Constructor) -> Expr {
        Expr {
            ty: Type::Adt(ctor.adt.clone()),
            kind: ExprKind::Constructor(ctor),
        }
    }

    /// True for expressions that A-normal form leaves in argument position.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Var(_)
                | ExprKind::Constant(_)
                | ExprKind::GlobalVar(_)
                | ExprKind::Constructor(_)
        )
    }
}

/// The free variables of `func`, in first-occurrence order.
///
/// The order is load-bearing: lambda lifting turns this list into the
/// captured-parameter list of the lifted global, and the emitter assigns
/// capture registers in the same order.
pub fn free_vars(func: &Function) -> Vec<Var> {
    let mut bound: HashSet<VarId> = func.params.iter().map(|p| p.id).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    collect_free(&func.body, &mut bound, &mut seen, &mut out);
    out
}

fn collect_free(
    expr: &Expr,
    bound: &mut HashSet<VarId>,
    seen: &mut HashSet<VarId>,
    out: &mut Vec<Var>,
) {
    match &expr.kind {
        ExprKind::Var(v) => {
            if !bound.contains(&v.id) && seen.insert(v.id) {
                out.push(v.clone());
            }
        }
        ExprKind::GlobalVar(_) | ExprKind::Constant(_) | ExprKind::Constructor(_) => {}
        ExprKind::Tuple(fields) => {
            for f in fields {
                collect_free(f, bound, seen, out);
            }
        }
        ExprKind::TupleGetItem { tuple, .. } => collect_free(tuple, bound, seen, out),
        ExprKind::Let { var, value, body } => {
            collect_free(value, bound, seen, out);
            let newly = bound.insert(var.id);
            collect_free(body, bound, seen, out);
            if newly {
                bound.remove(&var.id);
            }
        }
        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => {
            collect_free(cond, bound, seen, out);
            collect_free(true_branch, bound, seen, out);
            collect_free(false_branch, bound, seen, out);
        }
        ExprKind::Call { op, args } => {
            collect_free(op, bound, seen, out);
            for a in args {
                collect_free(a, bound, seen, out);
            }
        }
        ExprKind::Function(f) => {
            let newly: Vec<VarId> = f
                .params
                .iter()
                .filter(|p| bound.insert(p.id))
                .map(|p| p.id)
                .collect();
            collect_free(&f.body, bound, seen, out);
            for id in newly {
                bound.remove(&id);
            }
        }
        ExprKind::Match { scrutinee } => collect_free(scrutinee, bound, seen, out),
    }
}

/// The largest `VarId` appearing anywhere in `func` (0 if none).
pub fn max_var_id(func: &Function) -> u32 {
    let mut max = 0;
    for p in &func.params {
        max = max.max(p.id.0);
    }
    walk_max(&func.body, &mut max);
    max
}

fn walk_max(expr: &Expr, max: &mut u32) {
    match &expr.kind {
        ExprKind::Var(v) => *max = (*max).max(v.id.0),
        ExprKind::GlobalVar(_) | ExprKind::Constant(_) | ExprKind::Constructor(_) => {}
        ExprKind::Tuple(fields) => {
            for f in fields {
                walk_max(f, max);
            }
        }
        ExprKind::TupleGetItem { tuple, .. } => walk_max(tuple, max),
        ExprKind::Let { var, value, body } => {
            *max = (*max).max(var.id.0);
            walk_max(value, max);
            walk_max(body, max);
        }
        ExprKind::If {
            cond,
            true_branch,
            false_branch,
        } => {
            walk_max(cond, max);
            walk_max(true_branch, max);
            walk_max(false_branch, max);
        }
        ExprKind::Call { op, args } => {
            walk_max(op, max);
            for a in args {
                walk_max(a, max);
            }
        }
        ExprKind::Function(f) => {
            for p in &f.params {
                *max = (*max).max(p.id.0);
            }
            walk_max(&f.body, max);
        }
        ExprKind::Match { scrutinee } => walk_max(scrutinee, max),
    }
}

// ---------------------------------------------------------------------------
// Text rendering (diagnostics)
// ---------------------------------------------------------------------------

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Var(v) => write!(f, "%{}", v.name),
            ExprKind::GlobalVar(name) => write!(f, "@{}", name),
            ExprKind::Constant(nd) => write!(f, "{}", nd),
            ExprKind::Tuple(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, ")")
            }
            ExprKind::TupleGetItem { tuple, index } => write!(f, "{}.{}", tuple, index),
            ExprKind::Let { var, value, body } => {
                write!(f, "let %{} = {}; {}", var.name, value, body)
            }
            ExprKind::If {
                cond,
                true_branch,
                false_branch,
            } => write!(f, "if {} {{ {} }} else {{ {} }}", cond, true_branch, false_branch),
            ExprKind::Call { op, args } => {
                write!(f, "{}(", op)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::Function(func) => write!(f, "{}", func),
            ExprKind::Constructor(ctor) => write!(f, "{}#{}", ctor.adt, ctor.tag),
            ExprKind::Match { scrutinee } => write!(f, "match {}", scrutinee),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_primitive {
            write!(f, "prim ")?;
        }
        write!(f, "fn(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{}: {}", p.name, p.ty)?;
        }
        write!(f, ") -> {} {{ {} }}", self.ret_ty, self.body)
    }
}
