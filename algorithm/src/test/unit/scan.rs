use kiln_codegen::FunctionDef;
use kiln_dtype::{DType, ScalarType, Value};
use test_case::test_case;

use crate::error::Error;
use crate::test::{RUNTIME, queue, upload};
use crate::{BinaryOp, BufferIter, CustomOp, DeviceIter, DeviceVec, ScanKind, exclusive_scan, inclusive_scan, scan};

fn host_inclusive(data: &[i32]) -> Vec<i32> {
    data.iter()
        .scan(0i32, |acc, &x| {
            *acc = acc.wrapping_add(x);
            Some(*acc)
        })
        .collect()
}

#[test]
fn test_small_scans() {
    let q = queue();
    let data = upload(&[1i32, 2, 1, 2, 3]);
    let out = DeviceVec::<i32>::with_len(&q, 5).unwrap();

    exclusive_scan(&RUNTIME, &q, &data.device_iter(), 5, &out.iter(), 0i32, &BinaryOp::Plus).unwrap();
    assert_eq!(out.to_vec().unwrap(), vec![0, 1, 3, 4, 6]);

    inclusive_scan(&RUNTIME, &q, &data.device_iter(), 5, &out.iter(), &BinaryOp::Plus).unwrap();
    assert_eq!(out.to_vec().unwrap(), vec![1, 3, 4, 6, 9]);
}

#[test]
fn test_exclusive_scan_with_init() {
    let q = queue();
    let data = upload(&[1i32, 2, 3]);
    let out = DeviceVec::<i32>::with_len(&q, 3).unwrap();
    exclusive_scan(&RUNTIME, &q, &data.device_iter(), 3, &out.iter(), 10i32, &BinaryOp::Plus).unwrap();
    assert_eq!(out.to_vec().unwrap(), vec![10, 11, 13]);
}

#[test_case(255 ; "one partial block")]
#[test_case(256 ; "one full block")]
#[test_case(257 ; "two blocks")]
#[test_case(70_000 ; "recursive block sums")]
fn test_multi_block_inclusive(n: usize) {
    let q = queue();
    let data: Vec<i32> = (0..n as i32).map(|i| i % 7 - 3).collect();
    let input = upload(&data);
    let out = DeviceVec::<i32>::with_len(&q, n).unwrap();
    inclusive_scan(&RUNTIME, &q, &input.device_iter(), n, &out.iter(), &BinaryOp::Plus).unwrap();
    assert_eq!(out.to_vec().unwrap(), host_inclusive(&data));
}

#[test]
fn test_multi_block_exclusive() {
    let q = queue();
    let n = 1000;
    let data: Vec<i32> = (0..n as i32).collect();
    let input = upload(&data);
    let out = DeviceVec::<i32>::with_len(&q, n).unwrap();
    exclusive_scan(&RUNTIME, &q, &input.device_iter(), n, &out.iter(), 5i32, &BinaryOp::Plus).unwrap();

    let mut expected = vec![5];
    expected.extend(host_inclusive(&data[..n - 1]).into_iter().map(|v| v + 5));
    assert_eq!(out.to_vec().unwrap(), expected);
}

#[test]
fn test_in_place() {
    let q = queue();
    let data: Vec<i32> = (1..=600).collect();
    let vec = upload(&data);
    inclusive_scan(&RUNTIME, &q, &vec.device_iter(), data.len(), &vec.iter(), &BinaryOp::Plus).unwrap();
    assert_eq!(vec.to_vec().unwrap(), host_inclusive(&data));

    let vec = upload(&[3i32, 1, 4, 1, 5]);
    exclusive_scan(&RUNTIME, &q, &vec.device_iter(), 5, &vec.iter(), 0i32, &BinaryOp::Plus).unwrap();
    assert_eq!(vec.to_vec().unwrap(), vec![0, 3, 4, 8, 9]);
}

#[test]
fn test_in_place_through_transform() {
    let q = queue();
    let data: Vec<i32> = (0..600).map(|i| i * 3 + 1).collect();
    let vec = upload(&data);
    let twice = FunctionDef::new("twice", DType::Int32, vec![("v".into(), DType::Int32)], "return v * 2;");
    let input = vec.device_iter().transform(twice);
    assert!(input.aliases(vec.iter().buffer()));

    exclusive_scan(&RUNTIME, &q, &input, data.len(), &vec.iter(), 0i32, &BinaryOp::Plus).unwrap();
    let doubled: Vec<i32> = data.iter().map(|v| v * 2).collect();
    let mut expected = vec![0];
    expected.extend(host_inclusive(&doubled[..data.len() - 1]));
    assert_eq!(vec.to_vec().unwrap(), expected);
}

#[test]
fn test_max_scan_of_counting_input() {
    let q = queue();
    let out = DeviceVec::<u32>::with_len(&q, 4).unwrap();
    inclusive_scan(&RUNTIME, &q, &DeviceIter::counting(2u32), 4, &out.iter(), &BinaryOp::Max).unwrap();
    assert_eq!(out.to_vec().unwrap(), vec![2, 3, 4, 5]);
}

#[test]
fn test_converts_input_to_output_type() {
    let q = queue();
    let data = upload(&[200u8, 200, 200]);
    let out = DeviceVec::<u32>::with_len(&q, 3).unwrap();
    inclusive_scan(&RUNTIME, &q, &data.device_iter(), 3, &out.iter(), &BinaryOp::Plus).unwrap();
    assert_eq!(out.to_vec().unwrap(), vec![200, 400, 600]);
}

#[test]
fn test_vector_elements() {
    let q = queue();
    let uint2 = DType::vector(ScalarType::UInt32, 2).unwrap();
    let data: Vec<u32> = vec![1, 10, 2, 20, 3, 30];
    let input = BufferIter::new(q.upload(&data).unwrap(), uint2.clone());
    let out = BufferIter::new(q.allocate(data.len() * 4).unwrap(), uint2.clone());

    let init = Value::zero(&uint2);
    scan(&RUNTIME, &q, &DeviceIter::Buffer(input), 3, &out, &ScanKind::Exclusive { init }, &BinaryOp::Plus).unwrap();
    let result: Vec<u32> = q.read_vec(out.buffer(), 0, 6).unwrap();
    assert_eq!(result, vec![0, 0, 1, 10, 3, 30]);
}

#[test]
fn test_missing_identity() {
    let q = queue();
    let data = upload(&[1i32, 2]);
    let out = DeviceVec::<i32>::with_len(&q, 2).unwrap();
    let op = BinaryOp::from(CustomOp::new(FunctionDef::binary("first", DType::Int32, "a")));
    let err = inclusive_scan(&RUNTIME, &q, &data.device_iter(), 2, &out.iter(), &op).unwrap_err();
    assert!(matches!(err, Error::MissingIdentity { .. }));
}

#[test]
fn test_empty_scan_is_noop() {
    let q = queue();
    let data = upload(&[9i32]);
    let out = upload(&[7i32]);
    let event = inclusive_scan(&RUNTIME, &q, &data.device_iter(), 0, &out.iter(), &BinaryOp::Plus).unwrap();
    assert!(event.is_complete());
    assert_eq!(out.to_vec().unwrap(), vec![7]);
}
