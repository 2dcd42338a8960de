//! Binary operators for reduce and scan.
//!
//! Builtin operators render as inline expressions and can be evaluated on the host, which lets
//! a reduction finish its last few partials without another launch. Custom operators are a
//! [`FunctionDef`] emitted into the program plus what the engines need to know about it.

use kiln_codegen::{FunctionDef, KernelSource};
use kiln_dtype::{DType, ScalarType, Value};

use crate::error::{Result, UnsupportedOperatorSnafu};

/// A user-supplied operator `T f(T a, T b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomOp {
    pub function: FunctionDef,
    pub identity: Option<Value>,
    pub commutative: bool,
}

impl CustomOp {
    /// Non-commutative, without identity, until told otherwise.
    pub fn new(function: FunctionDef) -> Self {
        Self { function, identity: None, commutative: false }
    }

    pub fn with_identity(mut self, identity: impl Into<Value>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Plus,
    Multiplies,
    Min,
    Max,
    BitAnd,
    BitOr,
    BitXor,
    Custom(CustomOp),
}

impl From<CustomOp> for BinaryOp {
    fn from(op: CustomOp) -> Self {
        Self::Custom(op)
    }
}

impl BinaryOp {
    pub fn name(&self) -> &str {
        match self {
            Self::Plus => "plus",
            Self::Multiplies => "multiplies",
            Self::Min => "min",
            Self::Max => "max",
            Self::BitAnd => "bit_and",
            Self::BitOr => "bit_or",
            Self::BitXor => "bit_xor",
            Self::Custom(op) => &op.function.name,
        }
    }

    pub fn is_commutative(&self) -> bool {
        match self {
            Self::Custom(op) => op.commutative,
            _ => true,
        }
    }

    /// Whether [`BinaryOp::eval`] computes what the device computes.
    pub fn is_host_evaluable(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    /// Neutral element for `dtype`, when the operator has one.
    pub fn identity(&self, dtype: &DType) -> Option<Value> {
        let lanes = dtype.base().filter(|s| !s.is_bool());
        match self {
            Self::Plus => lanes.map(|_| Value::zero(dtype)),
            Self::Multiplies => lanes.map(|_| Value::splat(dtype, Value::one_of)),
            Self::Min => lanes.filter(|_| dtype.is_scalar()).map(Value::max_of),
            Self::Max => lanes.filter(|_| dtype.is_scalar()).map(Value::min_of),
            Self::BitAnd => {
                let scalar = lanes.filter(ScalarType::is_int)?;
                let ones = Value::all_ones_of(scalar)?;
                Some(Value::splat(dtype, |_| ones.clone()))
            }
            Self::BitOr | Self::BitXor => lanes.filter(ScalarType::is_int).map(|_| Value::zero(dtype)),
            Self::Custom(op) => op.identity.clone().filter(|v| v.dtype() == *dtype),
        }
    }

    /// Check the operator can combine two `dtype` values in a kernel.
    pub fn check(&self, dtype: &DType) -> Result<()> {
        let supported = match self {
            Self::Plus | Self::Multiplies => dtype.base().is_some_and(|s| !s.is_bool()),
            Self::Min | Self::Max => dtype.scalar().is_some_and(|s| !s.is_bool()),
            Self::BitAnd | Self::BitOr | Self::BitXor => dtype.is_int(),
            Self::Custom(op) => op.function.returns == *dtype,
        };
        snafu::ensure!(supported, UnsupportedOperatorSnafu { op: self.name(), dtype: dtype.name() });
        Ok(())
    }

    /// Kernel expression combining `a` and `b`, declaring the custom function if needed.
    pub fn apply(&self, k: &mut KernelSource, a: &str, b: &str) -> String {
        match self {
            Self::Plus => format!("(({a}) + ({b}))"),
            Self::Multiplies => format!("(({a}) * ({b}))"),
            Self::Min => format!("(({b}) < ({a}) ? ({b}) : ({a}))"),
            Self::Max => format!("(({a}) < ({b}) ? ({b}) : ({a}))"),
            Self::BitAnd => format!("(({a}) & ({b}))"),
            Self::BitOr => format!("(({a}) | ({b}))"),
            Self::BitXor => format!("(({a}) ^ ({b}))"),
            Self::Custom(op) => call_user_function(k, &op.function, &format!("{a}, {b}")),
        }
    }

    /// Host evaluation matching the generated expression; `None` for custom operators and
    /// for types the operator does not cover.
    ///
    /// Integer arithmetic wraps, as the generated code does.
    pub fn eval(&self, a: &Value, b: &Value) -> Option<Value> {
        macro_rules! int {
            ($variant:ident, $a:expr, $b:expr) => {
                Value::$variant(match self {
                    Self::Plus => $a.wrapping_add($b),
                    Self::Multiplies => $a.wrapping_mul($b),
                    Self::Min => if $b < $a { $b } else { $a },
                    Self::Max => if $a < $b { $b } else { $a },
                    Self::BitAnd => $a & $b,
                    Self::BitOr => $a | $b,
                    Self::BitXor => $a ^ $b,
                    Self::Custom(_) => return None,
                })
            };
        }
        macro_rules! float {
            ($variant:ident, $a:expr, $b:expr) => {
                Value::$variant(match self {
                    Self::Plus => $a + $b,
                    Self::Multiplies => $a * $b,
                    Self::Min => if $b < $a { $b } else { $a },
                    Self::Max => if $a < $b { $b } else { $a },
                    _ => return None,
                })
            };
        }

        Some(match (a, b) {
            (Value::Int8(a), Value::Int8(b)) => int!(Int8, *a, *b),
            (Value::UInt8(a), Value::UInt8(b)) => int!(UInt8, *a, *b),
            (Value::Int16(a), Value::Int16(b)) => int!(Int16, *a, *b),
            (Value::UInt16(a), Value::UInt16(b)) => int!(UInt16, *a, *b),
            (Value::Int32(a), Value::Int32(b)) => int!(Int32, *a, *b),
            (Value::UInt32(a), Value::UInt32(b)) => int!(UInt32, *a, *b),
            (Value::Int64(a), Value::Int64(b)) => int!(Int64, *a, *b),
            (Value::UInt64(a), Value::UInt64(b)) => int!(UInt64, *a, *b),
            (Value::Float32(a), Value::Float32(b)) => float!(Float32, *a, *b),
            (Value::Float64(a), Value::Float64(b)) => float!(Float64, *a, *b),
            (Value::Vector { scalar, lanes: a }, Value::Vector { lanes: b, .. })
                if a.len() == b.len() && !matches!(self, Self::Min | Self::Max) =>
            {
                let lanes = a.iter().zip(b).map(|(a, b)| self.eval(a, b)).collect::<Option<Vec<_>>>()?;
                Value::Vector { scalar: *scalar, lanes }
            }
            _ => return None,
        })
    }
}

/// Emit `func` under a reserved prefix and return a call with `args`.
///
/// Generated kernels declare plain locals (`acc`, `first`, `x`, ...); a user function emitted
/// under its own name would be shadowed by any of them.
pub(crate) fn call_user_function(k: &mut KernelSource, func: &FunctionDef, args: &str) -> String {
    let emitted = FunctionDef { name: format!("kiln_user_{}", func.name), ..func.clone() };
    k.add_function(&emitted);
    format!("{}({args})", emitted.name)
}
