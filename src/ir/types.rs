use std::fmt;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    I8,
    I32,
    I64,
    U8,
    U32,
    U64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::Bool | DType::I8 | DType::U8 => 1,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::Bool => "bool",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(s)
    }
}

/// A checked source-IR type.
///
/// Equality and hashing are structural: two `Tensor` types with the same
/// dtype and the same dimension list are the same type. The constant pool
/// and the shape map rely on this to deduplicate entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// A tensor with a fully static shape.
    Tensor { dtype: DType, shape: Vec<i64> },
    /// An ordered product of types.
    Tuple(Vec<Type>),
    /// A function type. Inspected at call sites, never emitted directly.
    Fn { params: Vec<Type>, ret: Box<Type> },
    /// An algebraic data type, referenced by name.
    Adt(String),
}

impl Type {
    pub fn tensor(dtype: DType, shape: &[i64]) -> Type {
        Type::Tensor { dtype, shape: shape.to_vec() }
    }

    /// A rank-0 tensor, used for scalar-typed IR values.
    pub fn scalar(dtype: DType) -> Type {
        Type::Tensor { dtype, shape: Vec::new() }
    }

    pub fn is_tensor(&self) -> bool {
        matches!(self, Type::Tensor { .. })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Tensor { dtype, shape } => {
                let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
                write!(f, "tensor<{},[{}]>", dtype, dims.join("x"))
            }
            Type::Tuple(fields) => {
                write!(f, "(")?;
                for (i, ty) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ty)?;
                }
                write!(f, ")")
            }
            Type::Fn { params, ret } => {
                write!(f, "fn(")?;
                for (i, ty) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ty)?;
                }
                write!(f, ") -> {}", ret)
            }
            Type::Adt(name) => f.write_str(name),
        }
    }
}
