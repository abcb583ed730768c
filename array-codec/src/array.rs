//! Shape-checked numeric arrays backed by raw bytes.

use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};

use crate::dtype::{DType, Element};
use crate::error::CodecError;

/// A dense, row-major array stored as the raw bytes of its elements.
///
/// The byte buffer always holds exactly `product(shape) * item_size` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericArray {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

impl NumericArray {
    /// Builds an array, rejecting buffers whose length does not fit the shape.
    pub fn new(shape: Vec<usize>, dtype: DType, data: Vec<u8>) -> Result<Self, CodecError> {
        let expected = shape
            .iter()
            .try_fold(dtype.item_size(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| CodecError::InvalidField {
                field: "shape",
                reason: format!("{shape:?} overflows the addressable size"),
            })?;

        if data.len() != expected {
            return Err(CodecError::LengthMismatch {
                shape,
                dtype: dtype.descr().to_string(),
                expected,
                actual: data.len(),
            });
        }

        Ok(Self { shape, dtype, data })
    }

    /// Copies an ndarray into native byte order, in logical (row-major) order.
    pub fn from_ndarray<T, S, D>(array: &ArrayBase<S, D>) -> Self
    where
        T: Element,
        S: Data<Elem = T>,
        D: Dimension,
    {
        let mut data = Vec::with_capacity(array.len() * T::SIZE);
        for value in array {
            value.write_native(&mut data);
        }
        Self {
            shape: array.shape().to_vec(),
            dtype: DType::native::<T>(),
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    /// Raw element bytes, exactly as received.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interprets the bytes as `T`, honouring the declared byte order.
    pub fn to_ndarray<T: Element>(&self) -> Result<ArrayD<T>, CodecError> {
        if !self.dtype.matches::<T>() {
            return Err(CodecError::DTypeMismatch {
                requested: DType::native::<T>().descr().to_string(),
                actual: self.dtype.descr().to_string(),
            });
        }

        let order = self.dtype.order();
        let values: Vec<T> = self
            .data
            .chunks_exact(T::SIZE)
            .map(|chunk| T::read(chunk, order))
            .collect();

        ArrayD::from_shape_vec(IxDyn(&self.shape), values).map_err(|e| CodecError::InvalidField {
            field: "shape",
            reason: e.to_string(),
        })
    }
}
