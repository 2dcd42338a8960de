//! Type names and exact literal rendering per dialect.

use kiln_device::Dialect;
use kiln_dtype::{DType, ScalarType, Value};

/// Scalar spelling in `dialect`.
///
/// Host C spells `Int8` as `schar`, since plain `char` has implementation-defined sign.
pub fn scalar_name(scalar: ScalarType, dialect: Dialect) -> &'static str {
    match (scalar, dialect) {
        (ScalarType::Int8, Dialect::HostC) => "schar",
        _ => scalar.name(),
    }
}

pub fn type_name(dtype: &DType, dialect: Dialect) -> String {
    match dtype {
        DType::Scalar(s) => scalar_name(*s, dialect).to_string(),
        DType::Vector { scalar, count } => format!("{}{count}", scalar_name(*scalar, dialect)),
        DType::Struct(ty) => ty.name().to_string(),
    }
}

/// `typedef` for a host vector type, using the GCC `vector_size` extension.
pub fn host_vector_typedef(scalar: ScalarType, count: usize) -> String {
    let lane = scalar_name(scalar, Dialect::HostC);
    format!("typedef {lane} {lane}{count} __attribute__((vector_size({})));", scalar.bytes() * count)
}

/// Render `value` as a literal that the device compiler reads back bit-exactly in its own type.
pub fn render_literal(value: &Value, dialect: Dialect) -> String {
    match value {
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Int8(v) => narrow_int(*v as i64, ScalarType::Int8, dialect),
        Value::UInt8(v) => narrow_int(*v as i64, ScalarType::UInt8, dialect),
        Value::Int16(v) => narrow_int(*v as i64, ScalarType::Int16, dialect),
        Value::UInt16(v) => narrow_int(*v as i64, ScalarType::UInt16, dialect),
        Value::Int32(v) if *v == i32::MIN => format!("(-{}-1)", i32::MAX),
        Value::Int32(v) => signed(*v as i64, ""),
        Value::UInt32(v) => format!("{v}u"),
        Value::Int64(v) if *v == i64::MIN => format!("(-{}L-1L)", i64::MAX),
        Value::Int64(v) => signed(*v, "L"),
        Value::UInt64(v) => format!("{v}UL"),
        Value::Float32(v) => float32(*v, dialect),
        Value::Float64(v) => float64(*v, dialect),
        Value::Vector { scalar, lanes } => {
            let name = format!("{}{}", scalar_name(*scalar, dialect), lanes.len());
            let lanes = join(lanes, dialect);
            match dialect {
                Dialect::OpenCl => format!("(({name})({lanes}))"),
                Dialect::HostC => format!("(({name}){{{lanes}}})"),
            }
        }
        Value::Struct { ty, fields } => format!("(({}){{{}}})", ty.name(), join(fields, dialect)),
    }
}

fn join(values: &[Value], dialect: Dialect) -> String {
    values.iter().map(|v| render_literal(v, dialect)).collect::<Vec<_>>().join(", ")
}

fn signed(v: i64, suffix: &str) -> String {
    if v < 0 { format!("({v}{suffix})") } else { format!("{v}{suffix}") }
}

fn narrow_int(v: i64, scalar: ScalarType, dialect: Dialect) -> String {
    format!("(({}){v})", scalar_name(scalar, dialect))
}

fn float32(v: f32, dialect: Dialect) -> String {
    if v.is_nan() {
        return match dialect {
            Dialect::OpenCl => "NAN".into(),
            Dialect::HostC => "__builtin_nanf(\"\")".into(),
        };
    }
    if v.is_infinite() {
        let inf = match dialect {
            Dialect::OpenCl => "INFINITY",
            Dialect::HostC => "__builtin_inff()",
        };
        return if v < 0.0 { format!("(-{inf})") } else { inf.into() };
    }
    // `Debug` prints the shortest string that parses back to the same value.
    let text = format!("{v:?}f");
    if v.is_sign_negative() { format!("({text})") } else { text }
}

fn float64(v: f64, dialect: Dialect) -> String {
    if v.is_nan() {
        return match dialect {
            Dialect::OpenCl => "((double)NAN)".into(),
            Dialect::HostC => "__builtin_nan(\"\")".into(),
        };
    }
    if v.is_infinite() {
        let inf = match dialect {
            Dialect::OpenCl => "((double)INFINITY)",
            Dialect::HostC => "__builtin_inf()",
        };
        return if v < 0.0 { format!("(-{inf})") } else { inf.into() };
    }
    let text = format!("{v:?}");
    if v.is_sign_negative() { format!("({text})") } else { text }
}
