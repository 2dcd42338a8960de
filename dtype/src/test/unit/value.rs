use crate::*;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Sample {
    id: u32,
    weight: f32,
}

impl Element for Sample {
    fn dtype() -> DType {
        TypeRegistry::global().pair(&DType::UInt32, &DType::Float32).unwrap()
    }
}

#[test]
fn primitive_element_round_trip() {
    let value = (-7i32).to_value().unwrap();
    assert_eq!(value, Value::Int32(-7));
    assert_eq!(i32::from_value(&value).unwrap(), -7);
    assert!(u32::from_value(&value).is_err());
}

#[test]
fn struct_element_round_trip() {
    let sample = Sample { id: 3, weight: 0.5 };
    let value = sample.to_value().unwrap();
    let Value::Struct { fields, .. } = &value else { panic!("expected struct value") };
    assert_eq!(fields, &[Value::UInt32(3), Value::Float32(0.5)]);
    assert_eq!(Sample::from_value(&value).unwrap(), sample);
}

#[test]
fn struct_bytes_zero_padding() {
    let registry = TypeRegistry::new();
    let dtype = registry.pair(&DType::UInt8, &DType::Int32).unwrap();
    let value = Value::structure(&dtype, vec![Value::UInt8(0xff), Value::Int32(1)]).unwrap();
    let bytes = value.to_bytes();
    assert_eq!(bytes.len(), 8);
    assert_eq!(&bytes[..4], &[0xff, 0, 0, 0]);
    assert_eq!(Value::from_bytes(&dtype, &bytes).unwrap(), value);
}

#[test]
fn structure_checks_field_types() {
    let registry = TypeRegistry::new();
    let dtype = registry.pair(&DType::Int32, &DType::Float32).unwrap();
    assert!(Value::structure(&dtype, vec![Value::Int32(1)]).is_err());
    assert!(Value::structure(&dtype, vec![Value::Int32(1), Value::Int32(2)]).is_err());
    assert!(Value::structure(&DType::Int32, vec![]).is_err());
}

#[test]
fn vector_values() {
    let v = Value::vector(vec![Value::UInt32(1), Value::UInt32(2)]).unwrap();
    assert_eq!(v.dtype(), DType::vector(ScalarType::UInt32, 2).unwrap());
    assert_eq!(v.to_bytes(), [1u32.to_ne_bytes(), 2u32.to_ne_bytes()].concat());
    assert!(Value::vector(vec![Value::UInt32(1), Value::Int32(2)]).is_err());
    assert!(Value::vector(vec![Value::UInt32(1); 3]).is_err());
}

#[test]
fn zero_of_vector_is_splat() {
    let dtype = DType::vector(ScalarType::UInt32, 16).unwrap();
    let Value::Vector { lanes, .. } = Value::zero(&dtype) else { panic!("expected vector") };
    assert_eq!(lanes, vec![Value::UInt32(0); 16]);
}

#[test]
fn from_bytes_checks_length() {
    assert!(matches!(Value::from_bytes(&DType::Int64, &[0; 4]), Err(Error::ByteLength { .. })));
}
