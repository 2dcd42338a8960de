use kiln_codegen::FunctionDef;
use kiln_device::WaitList;
use kiln_dtype::{DType, Value};
use test_case::test_case;

use crate::copy::copy_kernel_gpu;
use crate::error::Error;
use crate::test::{RUNTIME, queue, upload};
use crate::{
    BufferIter, CopyPlan, DeviceIter, DeviceVec, Destination, HostStrided, HostStridedMut, Source, copy, copy_async,
    fill, iota,
};

fn plan_of<'a, 'b>(src: impl Into<Source<'a>>, dst: impl Into<Destination<'b>>, count: usize) -> CopyPlan {
    crate::copy::plan(&src.into(), &dst.into(), count)
}

#[test]
fn test_plans() {
    let device = upload(&[0i32; 8]);
    let bytes = upload(&[0u8; 8]);
    let host = [0i32; 8];
    let mut out = [0i32; 8];

    assert_eq!(plan_of(&host[..], &mut out[..], 0), CopyPlan::Empty);
    assert_eq!(plan_of(&host[..], &mut out[..], 8), CopyPlan::HostToHost);
    assert_eq!(plan_of(&host[..], &device, 8), CopyPlan::Upload { gather: false, staged: false });
    assert_eq!(plan_of(HostStrided::new(&host, 2), &device, 4), CopyPlan::Upload { gather: true, staged: false });
    assert_eq!(plan_of(&host[..], &bytes, 8), CopyPlan::Upload { gather: false, staged: true });
    assert_eq!(plan_of(&device, &mut out[..], 8), CopyPlan::Download { scatter: false, staged: false });
    let strided = HostStridedMut::new(&mut out, 2);
    assert_eq!(plan_of(&device, strided, 4), CopyPlan::Download { scatter: true, staged: false });
    assert_eq!(plan_of(&device, &device, 8), CopyPlan::BufferCopy);
    assert_eq!(plan_of(&device, &bytes, 8), CopyPlan::Kernel);
    assert_eq!(plan_of(DeviceIter::counting(0i32), &device, 8), CopyPlan::Kernel);
}

#[test]
fn test_host_device_round_trip() {
    let q = queue();
    let data: Vec<i32> = (0..1000).collect();
    let device = DeviceVec::<i32>::with_len(&q, data.len()).unwrap();
    copy(&RUNTIME, &q, &data, data.len(), &device).unwrap();

    let mut back = vec![0i32; data.len()];
    copy(&RUNTIME, &q, &device, data.len(), &mut back).unwrap();
    assert_eq!(back, data);
}

#[test]
fn test_host_to_host() {
    let q = queue();
    let data = [1.5f32, 2.5, 3.5];
    let mut out = [0f32; 3];
    copy(&RUNTIME, &q, &data[..], 3, &mut out[..]).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_host_to_host_requires_same_type() {
    let q = queue();
    let data = [1i32, 2, 3];
    let mut out = [0i64; 3];
    let err = copy(&RUNTIME, &q, &data[..], 3, &mut out[..]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}

#[test]
fn test_strided_host_ranges() {
    let q = queue();
    let data: Vec<u16> = (0..12).collect();
    let device = DeviceVec::<u16>::with_len(&q, 4).unwrap();
    copy(&RUNTIME, &q, HostStrided::new(&data, 3), 4, &device).unwrap();
    assert_eq!(device.to_vec().unwrap(), vec![0, 3, 6, 9]);

    let mut out = vec![0u16; 8];
    copy(&RUNTIME, &q, &device, 4, HostStridedMut::new(&mut out, 2)).unwrap();
    assert_eq!(out, vec![0, 0, 3, 0, 6, 0, 9, 0]);
}

#[test]
fn test_strided_device_source() {
    let q = queue();
    let data: Vec<i32> = (0..10).collect();
    let device = upload(&data);
    let mut out = vec![0i32; 5];
    copy(&RUNTIME, &q, DeviceIter::strided(device.iter(), 2), 5, &mut out).unwrap();
    assert_eq!(out, vec![0, 2, 4, 6, 8]);
}

#[test]
fn test_buffer_copy_with_offsets() {
    let q = queue();
    let src = upload(&[1i64, 2, 3, 4, 5]);
    let dst = upload(&[0i64; 5]);
    copy(&RUNTIME, &q, src.iter().at(1), 3, dst.iter().at(2)).unwrap();
    assert_eq!(dst.to_vec().unwrap(), vec![0, 0, 2, 3, 4]);
}

#[test_case(DType::Int32, DType::Float32 ; "int to float")]
#[test_case(DType::Float64, DType::Int16 ; "double to short")]
#[test_case(DType::UInt8, DType::UInt64 ; "widening")]
fn test_device_conversion(from: DType, to: DType) {
    let q = queue();
    let values = [0u8, 1, 2, 3, 100];
    let src_bytes: Vec<u8> = values.iter().flat_map(|&v| encode(v, &from)).collect();
    let src = BufferIter::new(q.allocate(src_bytes.len()).unwrap(), from.clone());
    q.write(src.buffer(), 0, &src_bytes).unwrap();
    let dst = BufferIter::new(q.allocate(values.len() * to.bytes()).unwrap(), to.clone());

    copy(&RUNTIME, &q, src, values.len(), dst.clone()).unwrap();
    let bytes = q.read(dst.buffer(), 0, values.len() * to.bytes()).unwrap();
    let expected: Vec<u8> = values.iter().flat_map(|&v| encode(v, &to)).collect();
    assert_eq!(bytes, expected);
}

/// Native bytes of `v` as `dtype`.
fn encode(v: u8, dtype: &DType) -> Vec<u8> {
    let value = if *dtype == DType::Float32 {
        Value::Float32(v as f32)
    } else if *dtype == DType::Float64 {
        Value::Float64(v as f64)
    } else if *dtype == DType::Int16 {
        Value::Int16(v as i16)
    } else if *dtype == DType::Int32 {
        Value::Int32(v as i32)
    } else if *dtype == DType::UInt64 {
        Value::UInt64(v as u64)
    } else {
        Value::UInt8(v)
    };
    value.to_bytes()
}

#[test]
fn test_fill_and_iota() {
    let q = queue();
    let device = DeviceVec::<u32>::with_len(&q, 300).unwrap();
    fill(&RUNTIME, &q, &device, 300, 7u32).unwrap();
    assert!(device.to_vec().unwrap().iter().all(|&v| v == 7));

    iota(&RUNTIME, &q, &device, 300, 10u32).unwrap();
    assert_eq!(device.to_vec().unwrap(), (10..310).collect::<Vec<_>>());

    let mut host = vec![0i8; 4];
    iota(&RUNTIME, &q, &mut host, 4, -2i8).unwrap();
    assert_eq!(host, vec![-2, -1, 0, 1]);
}

#[test]
fn test_transform_source() {
    let q = queue();
    let data = upload(&[1i32, 2, 3, 4]);
    let square = FunctionDef::new("square", DType::Int32, vec![("x".into(), DType::Int32)], "return x * x;");
    let mut out = vec![0i32; 4];
    copy(&RUNTIME, &q, data.device_iter().transform(square), 4, &mut out).unwrap();
    assert_eq!(out, vec![1, 4, 9, 16]);
}

#[test]
fn test_gpu_kernel_variant() {
    let q = queue();
    let data: Vec<u32> = (0..2000).collect();
    let src = upload(&data);
    let dst = DeviceVec::<u32>::with_len(&q, data.len()).unwrap();
    let event = copy_kernel_gpu(&RUNTIME, &q, &src.device_iter(), data.len(), &dst.device_iter(), &WaitList::new())
        .unwrap();
    event.wait().unwrap();
    assert_eq!(dst.to_vec().unwrap(), data);
}

#[test]
fn test_computed_destination_is_rejected() {
    let q = queue();
    let data = [1i32, 2];
    let err = copy(&RUNTIME, &q, &data[..], 2, DeviceIter::counting(0i32)).unwrap_err();
    assert!(matches!(err, Error::NotWritable { .. }));
}

#[test]
fn test_short_destination_is_rejected() {
    let q = queue();
    let data = [1i32, 2, 3];
    let mut out = [0i32; 2];
    let err = copy(&RUNTIME, &q, &data[..], 3, &mut out[..]).unwrap_err();
    assert!(matches!(err, Error::LengthMismatch { expected: 3, actual: 2 }));
}

#[test]
fn test_zero_length_copy_submits_nothing() {
    let q = queue();
    let data: [i32; 0] = [];
    let mut out: [i32; 0] = [];
    let future = copy_async(&RUNTIME, &q, &data[..], 0, &mut out[..]).unwrap();
    assert!(future.event().is_complete());
    future.wait().unwrap();
}

#[test]
fn test_async_download_fills_host_on_wait() {
    let q = queue();
    let device = upload(&[4u64, 5, 6]);
    let mut out = vec![0u64; 6];
    let future = copy_async(&RUNTIME, &q, &device, 3, HostStridedMut::new(&mut out, 2)).unwrap();
    future.wait().unwrap();
    assert_eq!(out, vec![4, 0, 5, 0, 6, 0]);
}
