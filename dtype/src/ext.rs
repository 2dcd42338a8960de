use crate::error::{ByteLengthSnafu, Result, ValueMismatchSnafu};
use crate::{DType, Value};

/// Host type that can live in device memory.
///
/// Primitive numeric types are covered here. A `#[repr(C)]` host struct implements it by
/// deriving `bytemuck::Pod` and returning a descriptor registered in
/// [`TypeRegistry`](crate::TypeRegistry) from [`Element::dtype`]:
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
/// struct Sample { id: u32, weight: f32 }
///
/// impl Element for Sample {
///     fn dtype() -> DType {
///         TypeRegistry::global().pair(&DType::UInt32, &DType::Float32).unwrap()
///     }
/// }
/// ```
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    fn dtype() -> DType;

    fn to_value(self) -> Result<Value> {
        Value::from_bytes(&Self::dtype(), bytemuck::bytes_of(&self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        let dtype = Self::dtype();
        snafu::ensure!(value.dtype() == dtype, ValueMismatchSnafu { expected: dtype.name(), actual: value.dtype().name() });
        let bytes = value.to_bytes();
        snafu::ensure!(
            bytes.len() == std::mem::size_of::<Self>(),
            ByteLengthSnafu { dtype: dtype.name(), expected: std::mem::size_of::<Self>(), actual: bytes.len() }
        );
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(impl Element for $ty {
            fn dtype() -> DType {
                $dtype
            }
        })*
    };
}

impl_element! {
    i8 => DType::Int8, i16 => DType::Int16, i32 => DType::Int32, i64 => DType::Int64,
    u8 => DType::UInt8, u16 => DType::UInt16, u32 => DType::UInt32, u64 => DType::UInt64,
    f32 => DType::Float32, f64 => DType::Float64,
}
