use kiln_device::Dialect;
use kiln_dtype::{DType, Field, ScalarType, StructType, TypeRegistry, Value};
use test_case::test_case;

use crate::types::{render_literal, type_name};

#[test_case(Value::from(1.5f32), "1.5f" ; "float")]
#[test_case(Value::from(0.1f32), "0.1f" ; "float shortest")]
#[test_case(Value::from(-2.0f32), "(-2.0f)" ; "negative float")]
#[test_case(Value::from(1e-7f32), "1e-7f" ; "float exponent")]
#[test_case(Value::from(0.1f64), "0.1" ; "double")]
#[test_case(Value::from(7i32), "7" ; "int")]
#[test_case(Value::from(-7i32), "(-7)" ; "negative int")]
#[test_case(Value::from(i32::MIN), "(-2147483647-1)" ; "int min")]
#[test_case(Value::from(7u32), "7u" ; "uint")]
#[test_case(Value::from(7i64), "7L" ; "long")]
#[test_case(Value::from(i64::MIN), "(-9223372036854775807L-1L)" ; "long min")]
#[test_case(Value::from(u64::MAX), "18446744073709551615UL" ; "ulong max")]
#[test_case(Value::from(3u8), "((uchar)3)" ; "uchar")]
#[test_case(Value::from(-3i16), "((short)-3)" ; "short")]
#[test_case(Value::from(true), "true" ; "bool")]
fn test_scalar_literals(value: Value, expected: &str) {
    assert_eq!(render_literal(&value, Dialect::OpenCl), expected);
}

#[test]
fn test_special_floats_per_dialect() {
    assert_eq!(render_literal(&Value::from(f32::NAN), Dialect::OpenCl), "NAN");
    assert_eq!(render_literal(&Value::from(f32::NEG_INFINITY), Dialect::OpenCl), "(-INFINITY)");
    assert_eq!(render_literal(&Value::from(f32::NAN), Dialect::HostC), "__builtin_nanf(\"\")");
    assert_eq!(render_literal(&Value::from(f32::INFINITY), Dialect::HostC), "__builtin_inff()");
    assert_eq!(render_literal(&Value::from(f64::INFINITY), Dialect::HostC), "__builtin_inf()");
}

#[test]
fn test_vector_literal_per_dialect() {
    let value = Value::vector(vec![1u32.into(), 2u32.into(), 3u32.into(), 4u32.into()]).unwrap();
    assert_eq!(render_literal(&value, Dialect::OpenCl), "((uint4)(1u, 2u, 3u, 4u))");
    assert_eq!(render_literal(&value, Dialect::HostC), "((uint4){1u, 2u, 3u, 4u})");
}

#[test]
fn test_struct_compound_literal() {
    let pair = TypeRegistry::global().pair(&DType::Int32, &DType::Float32).unwrap();
    let value = Value::structure(&pair, vec![3i32.into(), 0.5f32.into()]).unwrap();
    assert_eq!(render_literal(&value, Dialect::OpenCl), "((pair_int_float){3, 0.5f})");
}

#[test]
fn test_host_spells_signed_char() {
    assert_eq!(type_name(&DType::Int8, Dialect::HostC), "schar");
    assert_eq!(type_name(&DType::Int8, Dialect::OpenCl), "char");
    assert_eq!(type_name(&DType::vector(ScalarType::Int8, 4).unwrap(), Dialect::HostC), "schar4");
    assert_eq!(render_literal(&Value::from(-1i8), Dialect::HostC), "((schar)-1)");
}

#[test]
fn test_struct_name_is_type_name() {
    let ty = StructType::new("span", vec![Field::new("lo", DType::UInt64), Field::new("hi", DType::UInt64)]).unwrap();
    let dtype = TypeRegistry::new().register(ty).unwrap();
    assert_eq!(type_name(&dtype, Dialect::HostC), "span");
}
