use std::sync::Arc;

use test_case::test_case;

use crate::*;

#[test_case(&[DType::Int32, DType::Float32], &[0, 4], 8, 4; "int float")]
#[test_case(&[DType::UInt8, DType::Int32], &[0, 4], 8, 4; "char padding")]
#[test_case(&[DType::Int32, DType::Float64], &[0, 8], 16, 8; "double alignment")]
#[test_case(&[DType::Float64, DType::UInt8], &[0, 8], 16, 8; "tail padding")]
#[test_case(&[DType::UInt16, DType::UInt16, DType::UInt8], &[0, 2, 4], 6, 2; "packed shorts")]
fn c_layout(fields: &[DType], offsets: &[usize], size: usize, align: usize) {
    let fields = fields.iter().enumerate().map(|(i, d)| Field::new(format!("f{i}"), d.clone())).collect();
    let ty = StructType::new("probe", fields).unwrap();
    assert_eq!(ty.layout().offsets, offsets);
    assert_eq!(ty.layout().size, size);
    assert_eq!(ty.layout().align, align);
}

#[test]
fn vector_field_aligns_to_its_size() {
    let uint4 = DType::vector(ScalarType::UInt32, 4).unwrap();
    let ty = StructType::new("with_vec", vec![Field::new("tag", DType::UInt8), Field::new("v", uint4)]).unwrap();
    assert_eq!(ty.layout().offsets, [0, 16]);
    assert_eq!(ty.layout().size, 32);
}

#[test]
fn nested_struct_layout() {
    let registry = TypeRegistry::new();
    let inner = registry.pair(&DType::UInt8, &DType::Int16).unwrap();
    let outer = registry.pair(&inner, &DType::Float64).unwrap();
    assert_eq!(inner.bytes(), 4);
    assert_eq!(outer.bytes(), 16);
    assert_eq!(outer.name(), "pair_pair_uchar_short_double");
}

#[test]
fn struct_rejects_bad_definitions() {
    assert!(StructType::new("1bad", vec![Field::new("a", DType::Int32)]).is_err());
    assert!(StructType::new("empty", vec![]).is_err());
    assert!(StructType::new("dup", vec![Field::new("a", DType::Int32), Field::new("a", DType::Int32)]).is_err());
    assert!(StructType::new("flag", vec![Field::new("a", DType::Bool)]).is_err());
}

#[test]
fn registry_is_idempotent() {
    let registry = TypeRegistry::new();
    let a = registry.pair(&DType::Int32, &DType::Float32).unwrap();
    let b = registry.pair(&DType::Int32, &DType::Float32).unwrap();
    let (DType::Struct(a), DType::Struct(b)) = (&a, &b) else { panic!("pair is a struct") };
    assert!(Arc::ptr_eq(a, b));
    assert_eq!(registry.get("pair_int_float").unwrap().bytes(), 8);
}

#[test]
fn registry_rejects_conflicting_layout() {
    let registry = TypeRegistry::new();
    registry.register(StructType::new("point", vec![Field::new("x", DType::Int32)]).unwrap()).unwrap();
    let conflicting = StructType::new("point", vec![Field::new("x", DType::Float32)]).unwrap();
    assert!(matches!(registry.register(conflicting), Err(Error::ConflictingStruct { .. })));
}

#[test]
fn tuple_names_and_fields() {
    let registry = TypeRegistry::new();
    let dtype = registry.tuple(&[DType::Int32, DType::Int32, DType::Float32]).unwrap();
    let DType::Struct(ty) = &dtype else { panic!("tuple is a struct") };
    assert_eq!(ty.name(), "tuple_int_int_float");
    assert_eq!(ty.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>(), ["v0", "v1", "v2"]);
}

#[test_case(ScalarType::Int8, 2, true)]
#[test_case(ScalarType::UInt32, 16, true)]
#[test_case(ScalarType::Float32, 3, false)]
#[test_case(ScalarType::Bool, 4, false)]
fn vector_widths(scalar: ScalarType, count: usize, ok: bool) {
    assert_eq!(DType::vector(scalar, count).is_ok(), ok);
}

#[test]
fn unsigned_counterparts() {
    assert_eq!(ScalarType::Float32.unsigned_counterpart(), Some(ScalarType::UInt32));
    assert_eq!(ScalarType::Int64.unsigned_counterpart(), Some(ScalarType::UInt64));
    assert_eq!(ScalarType::Int8.unsigned_counterpart(), Some(ScalarType::UInt8));
    assert_eq!(ScalarType::Bool.unsigned_counterpart(), None);
}
