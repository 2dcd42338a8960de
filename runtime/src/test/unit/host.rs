use std::sync::atomic::{AtomicUsize, Ordering};

use kiln_codegen::AddressSpace;
use kiln_device::{DeviceKind, Dialect, ErrorClass, KernelArg, NdRange, WaitList};
use kiln_dtype::{DType, Value};

use crate::test::{RUNTIME, fill_source, init_tracing, queue};
use crate::{ComputeRuntime, MetaKernel, RuntimeConfig};

#[test]
fn test_host_device_info() {
    let device = RUNTIME.device().unwrap();
    assert_eq!(device.dialect, Dialect::HostC);
    assert_eq!(device.info.kind, DeviceKind::Cpu);
    assert_eq!(device.info.max_work_group_size, 256);
    assert_eq!(device.info.local_mem_size, 64 * 1024);
    assert!(device.info.subgroup_size.is_none());
    assert!(device.identity().starts_with("host/kiln host/"));
}

#[test]
fn test_saxpy() {
    let queue = queue();
    let x = queue.upload(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let y = queue.upload(&[10.0f32, 20.0, 30.0, 40.0]).unwrap();

    let mut k = MetaKernel::for_device("saxpy", queue.device());
    let xs = k.buffer_identifier(&x, &DType::Float32, AddressSpace::Global);
    let ys = k.buffer_identifier(&y, &DType::Float32, AddressSpace::Global);
    let a = k.add_set_arg("a", Value::Float32(0.5));
    k.emit_raw(format!("const uint i = get_global_id(0);\n{ys}[i] = {a} * {xs}[i] + {ys}[i];\n"));
    k.exec(&RUNTIME, &queue, &NdRange::new_1d(4, None), &WaitList::new()).unwrap().wait().unwrap();

    assert_eq!(queue.read_vec::<f32>(&y, 0, 4).unwrap(), [10.5, 21.0, 31.5, 42.0]);
}

#[test]
fn test_work_group_barrier_and_local_memory() {
    let queue = queue();
    let input: Vec<i32> = (0..256).collect();
    let data = queue.upload(&input).unwrap();

    let mut k = MetaKernel::for_device("reverse_groups", queue.device());
    let d = k.buffer_identifier(&data, &DType::Int32, AddressSpace::Global);
    let scratch = k.add_local("scratch", &DType::Int32, 64);
    k.emit_raw(format!(
        "const uint lid = get_local_id(0);\n\
         const uint n = get_local_size(0);\n\
         const uint base = get_group_id(0) * n;\n\
         {scratch}[lid] = {d}[base + lid];\n\
         barrier(CLK_LOCAL_MEM_FENCE);\n\
         {d}[base + lid] = {scratch}[n - 1 - lid];\n"
    ));
    k.exec(&RUNTIME, &queue, &NdRange::new_1d(256, 64), &WaitList::new()).unwrap().wait().unwrap();

    let expected: Vec<i32> = input.chunks(64).flat_map(|c| c.iter().rev().copied()).collect();
    assert_eq!(queue.read_vec::<i32>(&data, 0, 256).unwrap(), expected);
}

#[test]
fn test_two_dimensional_ids() {
    let queue = queue();
    let out = queue.allocate(6 * 4 * 4).unwrap();

    let mut k = MetaKernel::for_device("ids_2d", queue.device());
    let o = k.buffer_identifier(&out, &DType::UInt32, AddressSpace::Global);
    k.emit_raw(format!(
        "const uint x = get_global_id(0);\nconst uint y = get_global_id(1);\n\
         {o}[y * get_global_size(0) + x] = y * 100 + x + get_work_dim() * 10000;\n"
    ));
    k.exec(&RUNTIME, &queue, &NdRange::new_2d([6, 4], Some([2, 2])), &WaitList::new()).unwrap().wait().unwrap();

    let ids = queue.read_vec::<u32>(&out, 0, 24).unwrap();
    assert_eq!(ids[0], 20000);
    assert_eq!(ids[5], 20005);
    assert_eq!(ids[6 * 3 + 2], 20302);
}

#[test]
fn test_scalar_and_constant_arguments() {
    let queue = queue();
    let out = queue.allocate(3 * 8).unwrap();

    let mut k = MetaKernel::for_device("mixed_args", queue.device());
    let o = k.buffer_identifier(&out, &DType::Float64, AddressSpace::Global);
    let table = k.add_host_constant("table", &DType::Float64, bytemuck::cast_slice(&[1.5f64, 2.5, 3.5]).to_vec());
    let scale = k.add_set_arg("scale", Value::Float64(2.0));
    let shift = k.add_set_arg("shift", Value::UInt64(1 << 40));
    k.emit_raw(format!("const uint i = get_global_id(0);\n{o}[i] = {table}[i] * {scale} + ({shift} >> 40);\n"));
    k.exec(&RUNTIME, &queue, &NdRange::new_1d(3, None), &WaitList::new()).unwrap().wait().unwrap();

    assert_eq!(queue.read_vec::<f64>(&out, 0, 3).unwrap(), [4.0, 6.0, 8.0]);
}

#[test]
fn test_cross_queue_wait_list() {
    let device = RUNTIME.device().unwrap();
    let producer = device.create_queue().unwrap();
    let consumer = device.create_queue().unwrap();
    let out = producer.allocate(1024 * 4).unwrap();

    let mut kernel =
        RUNTIME.kernel(&device, "test:fill_sevens", "fill_sevens", "", || Ok(fill_source("fill_sevens", 7))).unwrap();
    kernel.set_arg(0, KernelArg::Buffer(out.clone())).unwrap();
    let done = producer.enqueue_kernel(&kernel, &NdRange::new_1d(1024, None), &WaitList::new()).unwrap();

    let read = consumer.enqueue_read(&out, 0, 1024 * 4, &done.into()).unwrap();
    let values: Vec<i32> = read.wait().unwrap().chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
    assert!(values.iter().all(|&v| v == 7));
}

#[test]
fn test_build_error_carries_log_and_is_not_cached() {
    init_tracing();
    let rt = ComputeRuntime::new(RuntimeConfig::builder().disk_cache(false).build());
    let device = rt.device().unwrap();
    let calls = AtomicUsize::new(0);
    let broken = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok("__kernel void broken( {\n".to_string())
    };

    let err = rt.program(&device, "test:broken", "", broken).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Build);
    assert!(!err.build_log().unwrap_or_default().is_empty());

    assert!(rt.program(&device, "test:broken", "", broken).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(rt.programs().is_empty());
    assert_eq!(rt.programs().stats().builds, 2);
}

#[test]
fn test_unknown_entry() {
    let device = RUNTIME.device().unwrap();
    let err = RUNTIME
        .kernel(&device, "test:fill_sevens", "no_such_entry", "", || Ok(fill_source("fill_sevens", 7)))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Launch);
}

#[test]
fn test_local_memory_limit_is_synchronous() {
    let queue = queue();
    let out = queue.allocate(4).unwrap();

    let mut k = MetaKernel::for_device("too_much_local", queue.device());
    let o = k.buffer_identifier(&out, &DType::Int32, AddressSpace::Global);
    let scratch = k.add_local("scratch", &DType::Int32, 32 * 1024);
    k.emit_raw(format!("{scratch}[0] = 1;\n{o}[0] = {scratch}[0];\n"));
    let err = k.exec(&RUNTIME, &queue, &NdRange::new_1d(1, 1), &WaitList::new()).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Launch);
}
