use std::fmt;

use crate::ir::types::DType;

/// A host-side literal tensor: flat row-major bytes plus a shape.
///
/// This is the payload of `Constant` expressions and of the constant pool,
/// including the 1-D `i64` shape tensors the pool precomputes for
/// `AllocTensor`. Equality and hashing are structural (dtype, shape, and
/// raw bytes), which is what lets the pool share one index between
/// structurally equal constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NdArray {
    dtype: DType,
    shape: Vec<i64>,
    data: Vec<u8>,
}

impl NdArray {
    /// Builds a tensor from raw row-major bytes.
    ///
    /// Returns `Err` if the byte length does not match the shape.
    pub fn from_bytes(dtype: DType, shape: Vec<i64>, data: Vec<u8>) -> Result<NdArray, String> {
        let elems: i64 = shape.iter().product();
        let expected = elems as usize * dtype.size_of();
        if data.len() != expected {
            return Err(format!(
                "tensor data is {} bytes, shape requires {}",
                data.len(),
                expected
            ));
        }
        Ok(NdArray { dtype, shape, data })
    }

    /// A rank-0 `f32` tensor holding one value.
    pub fn scalar_f32(value: f32) -> NdArray {
        NdArray {
            dtype: DType::F32,
            shape: Vec::new(),
            data: value.to_le_bytes().to_vec(),
        }
    }

    /// A rank-0 `bool` tensor holding one value.
    pub fn scalar_bool(value: bool) -> NdArray {
        NdArray {
            dtype: DType::Bool,
            shape: Vec::new(),
            data: vec![value as u8],
        }
    }

    /// A rank-1 `f32` tensor from a slice of values.
    pub fn from_f32s(values: &[f32]) -> NdArray {
        NdArray {
            dtype: DType::F32,
            shape: vec![values.len() as i64],
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// A rank-1 `i64` tensor from a slice of values.
    ///
    /// This is the representation of precomputed shape tensors: the pool
    /// stores one of these per distinct result tensor type.
    pub fn from_i64s(values: &[i64]) -> NdArray {
        NdArray {
            dtype: DType::I64,
            shape: vec![values.len() as i64],
            data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product::<i64>() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the elements of an `i64` tensor.
    ///
    /// Returns `None` for any other dtype.
    pub fn i64_values(&self) -> Option<Vec<i64>> {
        if self.dtype != DType::I64 {
            return None;
        }
        Some(
            self.data
                .chunks_exact(8)
                .map(|c| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(c);
                    i64::from_le_bytes(buf)
                })
                .collect(),
        )
    }
}

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "tensor<{},[{}]>", self.dtype, dims.join("x"))
    }
}
