//! Element types understood by generated kernels.
//!
//! [`ScalarType`] and [`DType`] describe what lives in device memory, [`Value`] is a typed
//! literal that can be rendered into kernel source or passed as a kernel argument, and
//! [`TypeRegistry`] owns the layouts of composite (struct) types so that source builders
//! look a layout up instead of deriving it from host types.

use std::sync::Arc;

pub mod error;
pub mod ext;
pub mod structs;
pub mod value;


pub use error::{Error, Result};
pub use ext::Element;
pub use structs::{Field, StructLayout, StructType, TypeRegistry};
pub use value::Value;

/// Scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::Display)]
pub enum ScalarType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl ScalarType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn bit_width(&self) -> usize {
        self.bytes() * 8
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Unsigned integer type of the same width.
    ///
    /// Radix sort reads every key through this type; `Bool` has none.
    pub const fn unsigned_counterpart(&self) -> Option<ScalarType> {
        match self {
            Self::Bool => None,
            Self::Int8 | Self::UInt8 => Some(Self::UInt8),
            Self::Int16 | Self::UInt16 => Some(Self::UInt16),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(Self::UInt32),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(Self::UInt64),
        }
    }

    /// Kernel-language spelling, also used in cache keys and synthesized struct names.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "char",
            Self::UInt8 => "uchar",
            Self::Int16 => "short",
            Self::UInt16 => "ushort",
            Self::Int32 => "int",
            Self::UInt32 => "uint",
            Self::Int64 => "long",
            Self::UInt64 => "ulong",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }
}

/// Vector widths the kernel languages agree on.
pub const VECTOR_WIDTHS: [usize; 4] = [2, 4, 8, 16];

/// Element type: a scalar, a short vector of scalars, or a registered struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    Scalar(ScalarType),
    Vector { scalar: ScalarType, count: usize },
    Struct(Arc<StructType>),
}

impl From<ScalarType> for DType {
    fn from(scalar: ScalarType) -> Self {
        Self::Scalar(scalar)
    }
}

impl DType {
    /// Build a vector type, rejecting widths and lane types the kernel languages lack.
    pub fn vector(scalar: ScalarType, count: usize) -> Result<Self> {
        snafu::ensure!(
            !scalar.is_bool() && VECTOR_WIDTHS.contains(&count),
            error::InvalidVectorWidthSnafu { scalar, count }
        );
        Ok(Self::Vector { scalar, count })
    }

    pub fn bytes(&self) -> usize {
        match self {
            Self::Scalar(s) => s.bytes(),
            Self::Vector { scalar, count } => scalar.bytes() * count,
            Self::Struct(ty) => ty.layout().size,
        }
    }

    /// Required alignment in device memory.
    pub fn align(&self) -> usize {
        match self {
            Self::Scalar(s) => s.bytes(),
            Self::Vector { scalar, count } => scalar.bytes() * count,
            Self::Struct(ty) => ty.layout().align,
        }
    }

    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// Lane type for scalars and vectors.
    pub fn base(&self) -> Option<ScalarType> {
        match self {
            Self::Scalar(s) => Some(*s),
            Self::Vector { scalar, .. } => Some(*scalar),
            Self::Struct(_) => None,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Vector { count, .. } => *count,
            _ => 1,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(_))
    }

    pub fn is_float(&self) -> bool {
        self.base().is_some_and(|s| s.is_float())
    }

    pub fn is_int(&self) -> bool {
        self.base().is_some_and(|s| s.is_int())
    }

    /// Whether any lane or field is `double`.
    pub fn uses_double(&self) -> bool {
        match self {
            Self::Scalar(s) | Self::Vector { scalar: s, .. } => *s == ScalarType::Float64,
            Self::Struct(ty) => ty.fields().iter().any(|f| f.dtype.uses_double()),
        }
    }

    /// Kernel-language name: `int`, `uint16`, or the struct's registered name.
    pub fn name(&self) -> String {
        match self {
            Self::Scalar(s) => s.name().to_string(),
            Self::Vector { scalar, count } => format!("{}{}", scalar.name(), count),
            Self::Struct(ty) => ty.name().to_string(),
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

#[allow(non_upper_case_globals)]
impl DType {
    pub const Bool: Self = Self::Scalar(ScalarType::Bool);
    pub const Int8: Self = Self::Scalar(ScalarType::Int8);
    pub const UInt8: Self = Self::Scalar(ScalarType::UInt8);
    pub const Int16: Self = Self::Scalar(ScalarType::Int16);
    pub const UInt16: Self = Self::Scalar(ScalarType::UInt16);
    pub const Int32: Self = Self::Scalar(ScalarType::Int32);
    pub const UInt32: Self = Self::Scalar(ScalarType::UInt32);
    pub const Int64: Self = Self::Scalar(ScalarType::Int64);
    pub const UInt64: Self = Self::Scalar(ScalarType::UInt64);
    pub const Float32: Self = Self::Scalar(ScalarType::Float32);
    pub const Float64: Self = Self::Scalar(ScalarType::Float64);
}
