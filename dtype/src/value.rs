//! Typed literal values.

use std::sync::Arc;

use snafu::ensure;

use crate::error::{ByteLengthSnafu, InvalidVectorWidthSnafu, Result, ValueMismatchSnafu};
use crate::{DType, ScalarType, StructType, VECTOR_WIDTHS};

/// A literal of some [`DType`].
///
/// Used for kernel source literals (identities, fill values, counting-iterator starts) and
/// for scalar kernel arguments, where [`Value::to_bytes`] yields the argument payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Vector { scalar: ScalarType, lanes: Vec<Value> },
    Struct { ty: Arc<StructType>, fields: Vec<Value> },
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

impl_from_primitive! {
    bool => Bool,
    i8 => Int8, u8 => UInt8, i16 => Int16, u16 => UInt16,
    i32 => Int32, u32 => UInt32, i64 => Int64, u64 => UInt64,
    f32 => Float32, f64 => Float64,
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Self::Vector { scalar, lanes } => DType::Vector { scalar: *scalar, count: lanes.len() },
            Self::Struct { ty, .. } => DType::Struct(Arc::clone(ty)),
            _ => DType::Scalar(self.scalar_type().unwrap_or(ScalarType::Bool)),
        }
    }

    /// Scalar type of a scalar value, `None` for vectors and structs.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        Some(match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Int8(_) => ScalarType::Int8,
            Self::UInt8(_) => ScalarType::UInt8,
            Self::Int16(_) => ScalarType::Int16,
            Self::UInt16(_) => ScalarType::UInt16,
            Self::Int32(_) => ScalarType::Int32,
            Self::UInt32(_) => ScalarType::UInt32,
            Self::Int64(_) => ScalarType::Int64,
            Self::UInt64(_) => ScalarType::UInt64,
            Self::Float32(_) => ScalarType::Float32,
            Self::Float64(_) => ScalarType::Float64,
            Self::Vector { .. } | Self::Struct { .. } => return None,
        })
    }

    pub fn vector(lanes: Vec<Value>) -> Result<Self> {
        let Some(scalar) = lanes.first().and_then(Value::scalar_type) else {
            return ValueMismatchSnafu { expected: "scalar lanes", actual: format!("{lanes:?}") }.fail();
        };
        ensure!(
            !scalar.is_bool() && VECTOR_WIDTHS.contains(&lanes.len()),
            InvalidVectorWidthSnafu { scalar, count: lanes.len() }
        );
        for lane in &lanes {
            ensure!(
                lane.scalar_type() == Some(scalar),
                ValueMismatchSnafu { expected: scalar.name(), actual: lane.dtype().name() }
            );
        }
        Ok(Self::Vector { scalar, lanes })
    }

    pub fn structure(dtype: &DType, fields: Vec<Value>) -> Result<Self> {
        let DType::Struct(ty) = dtype else {
            return ValueMismatchSnafu { expected: "struct type", actual: dtype.name() }.fail();
        };
        ensure!(
            ty.fields().len() == fields.len(),
            ValueMismatchSnafu {
                expected: format!("{} fields", ty.fields().len()),
                actual: format!("{} fields", fields.len())
            }
        );
        for (field, value) in ty.fields().iter().zip(&fields) {
            ensure!(
                field.dtype == value.dtype(),
                ValueMismatchSnafu { expected: field.dtype.name(), actual: value.dtype().name() }
            );
        }
        Ok(Self::Struct { ty: Arc::clone(ty), fields })
    }

    /// Build a value of `dtype` by applying `lane` to every scalar position.
    pub fn splat(dtype: &DType, lane: impl Fn(ScalarType) -> Value) -> Self {
        Self::splat_dyn(dtype, &lane)
    }

    fn splat_dyn(dtype: &DType, lane: &dyn Fn(ScalarType) -> Value) -> Self {
        match dtype {
            DType::Scalar(s) => lane(*s),
            DType::Vector { scalar, count } => Self::Vector { scalar: *scalar, lanes: vec![lane(*scalar); *count] },
            DType::Struct(ty) => Self::Struct {
                ty: Arc::clone(ty),
                fields: ty.fields().iter().map(|f| Self::splat_dyn(&f.dtype, lane)).collect(),
            },
        }
    }

    pub fn zero(dtype: &DType) -> Self {
        Self::splat(dtype, Self::zero_of)
    }

    pub fn zero_of(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => Self::Bool(false),
            ScalarType::Int8 => Self::Int8(0),
            ScalarType::UInt8 => Self::UInt8(0),
            ScalarType::Int16 => Self::Int16(0),
            ScalarType::UInt16 => Self::UInt16(0),
            ScalarType::Int32 => Self::Int32(0),
            ScalarType::UInt32 => Self::UInt32(0),
            ScalarType::Int64 => Self::Int64(0),
            ScalarType::UInt64 => Self::UInt64(0),
            ScalarType::Float32 => Self::Float32(0.0),
            ScalarType::Float64 => Self::Float64(0.0),
        }
    }

    pub fn one_of(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => Self::Bool(true),
            ScalarType::Int8 => Self::Int8(1),
            ScalarType::UInt8 => Self::UInt8(1),
            ScalarType::Int16 => Self::Int16(1),
            ScalarType::UInt16 => Self::UInt16(1),
            ScalarType::Int32 => Self::Int32(1),
            ScalarType::UInt32 => Self::UInt32(1),
            ScalarType::Int64 => Self::Int64(1),
            ScalarType::UInt64 => Self::UInt64(1),
            ScalarType::Float32 => Self::Float32(1.0),
            ScalarType::Float64 => Self::Float64(1.0),
        }
    }

    /// Smallest value of the type; negative infinity for floats.
    pub fn min_of(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => Self::Bool(false),
            ScalarType::Int8 => Self::Int8(i8::MIN),
            ScalarType::UInt8 => Self::UInt8(0),
            ScalarType::Int16 => Self::Int16(i16::MIN),
            ScalarType::UInt16 => Self::UInt16(0),
            ScalarType::Int32 => Self::Int32(i32::MIN),
            ScalarType::UInt32 => Self::UInt32(0),
            ScalarType::Int64 => Self::Int64(i64::MIN),
            ScalarType::UInt64 => Self::UInt64(0),
            ScalarType::Float32 => Self::Float32(f32::NEG_INFINITY),
            ScalarType::Float64 => Self::Float64(f64::NEG_INFINITY),
        }
    }

    /// Largest value of the type; positive infinity for floats.
    pub fn max_of(scalar: ScalarType) -> Self {
        match scalar {
            ScalarType::Bool => Self::Bool(true),
            ScalarType::Int8 => Self::Int8(i8::MAX),
            ScalarType::UInt8 => Self::UInt8(u8::MAX),
            ScalarType::Int16 => Self::Int16(i16::MAX),
            ScalarType::UInt16 => Self::UInt16(u16::MAX),
            ScalarType::Int32 => Self::Int32(i32::MAX),
            ScalarType::UInt32 => Self::UInt32(u32::MAX),
            ScalarType::Int64 => Self::Int64(i64::MAX),
            ScalarType::UInt64 => Self::UInt64(u64::MAX),
            ScalarType::Float32 => Self::Float32(f32::INFINITY),
            ScalarType::Float64 => Self::Float64(f64::INFINITY),
        }
    }

    /// Every bit set; `None` for floats.
    pub fn all_ones_of(scalar: ScalarType) -> Option<Self> {
        Some(match scalar {
            ScalarType::Bool => Self::Bool(true),
            ScalarType::Int8 => Self::Int8(-1),
            ScalarType::UInt8 => Self::UInt8(u8::MAX),
            ScalarType::Int16 => Self::Int16(-1),
            ScalarType::UInt16 => Self::UInt16(u16::MAX),
            ScalarType::Int32 => Self::Int32(-1),
            ScalarType::UInt32 => Self::UInt32(u32::MAX),
            ScalarType::Int64 => Self::Int64(-1),
            ScalarType::UInt64 => Self::UInt64(u64::MAX),
            ScalarType::Float32 | ScalarType::Float64 => return None,
        })
    }

    /// Native-endian bytes laid out as the value sits in device memory, padding zeroed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0; self.dtype().bytes()];
        self.write_bytes(&mut out);
        out
    }

    fn write_bytes(&self, out: &mut [u8]) {
        match self {
            Self::Bool(v) => out[0] = u8::from(*v),
            Self::Int8(v) => out[..1].copy_from_slice(&v.to_ne_bytes()),
            Self::UInt8(v) => out[0] = *v,
            Self::Int16(v) => out[..2].copy_from_slice(&v.to_ne_bytes()),
            Self::UInt16(v) => out[..2].copy_from_slice(&v.to_ne_bytes()),
            Self::Int32(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            Self::UInt32(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            Self::Int64(v) => out[..8].copy_from_slice(&v.to_ne_bytes()),
            Self::UInt64(v) => out[..8].copy_from_slice(&v.to_ne_bytes()),
            Self::Float32(v) => out[..4].copy_from_slice(&v.to_ne_bytes()),
            Self::Float64(v) => out[..8].copy_from_slice(&v.to_ne_bytes()),
            Self::Vector { scalar, lanes } => {
                for (lane, chunk) in lanes.iter().zip(out.chunks_mut(scalar.bytes())) {
                    lane.write_bytes(chunk);
                }
            }
            Self::Struct { ty, fields } => {
                for ((field, offset), value) in ty.fields().iter().zip(&ty.layout().offsets).zip(fields) {
                    value.write_bytes(&mut out[*offset..*offset + field.dtype.bytes()]);
                }
            }
        }
    }

    /// Inverse of [`Value::to_bytes`].
    pub fn from_bytes(dtype: &DType, bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() == dtype.bytes(),
            ByteLengthSnafu { dtype: dtype.name(), expected: dtype.bytes(), actual: bytes.len() }
        );
        Ok(Self::read_bytes(dtype, bytes))
    }

    fn read_bytes(dtype: &DType, bytes: &[u8]) -> Self {
        match dtype {
            DType::Scalar(s) => Self::read_scalar(*s, bytes),
            DType::Vector { scalar, .. } => Self::Vector {
                scalar: *scalar,
                lanes: bytes.chunks(scalar.bytes()).map(|chunk| Self::read_scalar(*scalar, chunk)).collect(),
            },
            DType::Struct(ty) => Self::Struct {
                ty: Arc::clone(ty),
                fields: ty
                    .fields()
                    .iter()
                    .zip(&ty.layout().offsets)
                    .map(|(field, offset)| Self::read_bytes(&field.dtype, &bytes[*offset..*offset + field.dtype.bytes()]))
                    .collect(),
            },
        }
    }

    fn read_scalar(scalar: ScalarType, bytes: &[u8]) -> Self {
        match scalar {
            ScalarType::Bool => Self::Bool(bytes[0] != 0),
            ScalarType::Int8 => Self::Int8(i8::from_ne_bytes(array(bytes))),
            ScalarType::UInt8 => Self::UInt8(bytes[0]),
            ScalarType::Int16 => Self::Int16(i16::from_ne_bytes(array(bytes))),
            ScalarType::UInt16 => Self::UInt16(u16::from_ne_bytes(array(bytes))),
            ScalarType::Int32 => Self::Int32(i32::from_ne_bytes(array(bytes))),
            ScalarType::UInt32 => Self::UInt32(u32::from_ne_bytes(array(bytes))),
            ScalarType::Int64 => Self::Int64(i64::from_ne_bytes(array(bytes))),
            ScalarType::UInt64 => Self::UInt64(u64::from_ne_bytes(array(bytes))),
            ScalarType::Float32 => Self::Float32(f32::from_ne_bytes(array(bytes))),
            ScalarType::Float64 => Self::Float64(f64::from_ne_bytes(array(bytes))),
        }
    }
}
