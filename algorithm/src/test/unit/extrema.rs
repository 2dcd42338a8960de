use kiln_dtype::DType;
use kiln_runtime::RuntimeConfig;

use crate::error::Error;
use crate::test::{RUNTIME, isolated_runtime, queue, upload};
use crate::{BufferIter, DeviceIter, DeviceVec, max_element, min_element};

#[test]
fn test_small_input_scans_serially() {
    let q = queue();
    let data = upload(&[5i32, 1, 9, 17, 13]);
    assert_eq!(min_element(&RUNTIME, &q, &data.device_iter(), 5).unwrap(), Some(1));
    assert_eq!(max_element(&RUNTIME, &q, &data.device_iter(), 5).unwrap(), Some(3));
}

#[test]
fn test_empty_input() {
    let q = queue();
    let data = upload(&[5i32]);
    assert_eq!(min_element(&RUNTIME, &q, &data.device_iter(), 0).unwrap(), None);
}

#[test]
fn test_large_input_uses_groups() {
    let q = queue();
    let n = 100_000;
    let mut data: Vec<f32> = (0..n).map(|i| ((i * 7919) % 10_007) as f32).collect();
    data[77_777] = -5.0;
    data[12_345] = 1.0e9;
    let device = upload(&data);
    assert_eq!(min_element(&RUNTIME, &q, &device.device_iter(), n).unwrap(), Some(77_777));
    assert_eq!(max_element(&RUNTIME, &q, &device.device_iter(), n).unwrap(), Some(12_345));
}

#[test]
fn test_ties_resolve_to_first_index() {
    let q = queue();
    let n = 50_000;
    let mut data = vec![3u64; n];
    for i in [40_000, 20_000, 30_000] {
        data[i] = 1;
    }
    let device = upload(&data);
    assert_eq!(min_element(&RUNTIME, &q, &device.device_iter(), n).unwrap(), Some(20_000));
    assert_eq!(max_element(&RUNTIME, &q, &device.device_iter(), n).unwrap(), Some(0));
}

#[test]
fn test_small_work_groups() {
    let rt = isolated_runtime(RuntimeConfig::builder().disk_cache(false).build());
    let q = rt.default_queue().unwrap();
    rt.parameters().set(q.info(), "extrema", "wgsize", 16);
    rt.parameters().set(q.info(), "extrema", "wgpcu", 2);

    let data: Vec<i16> = (0..3000).map(|i| ((i * 37) % 1009) as i16 - 500).collect();
    let device = DeviceVec::from_slice(&q, &data).unwrap();
    let expected = data.iter().enumerate().min_by_key(|&(i, v)| (*v, i)).map(|(i, _)| i);
    assert_eq!(min_element(&rt, &q, &device.device_iter(), data.len()).unwrap(), expected);
}

#[test]
fn test_counting_input() {
    let q = queue();
    let counting = DeviceIter::counting(10i32);
    assert_eq!(max_element(&RUNTIME, &q, &counting, 1000).unwrap(), Some(999));
    assert_eq!(min_element(&RUNTIME, &q, &counting, 1000).unwrap(), Some(0));
}

#[test]
fn test_rejects_non_scalar() {
    let q = queue();
    let pairs = BufferIter::new(q.allocate(16).unwrap(), DType::vector(kiln_dtype::ScalarType::Int32, 2).unwrap());
    let err = min_element(&RUNTIME, &q, &DeviceIter::Buffer(pairs), 2).unwrap_err();
    assert!(matches!(err, Error::UnsupportedKeyType { .. }));
}
