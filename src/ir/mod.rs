pub mod expr;
pub mod module;
pub mod tensor;
pub mod types;

pub use expr::{free_vars, Constructor, Expr, ExprKind, Function, Var, VarGen, VarId};
pub use module::{GlobalDef, GlobalId, Module};
pub use tensor::NdArray;
pub use types::{DType, Type};
