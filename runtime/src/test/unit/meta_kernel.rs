use kiln_codegen::AddressSpace;
use kiln_device::{Dialect, NdRange, WaitList};
use kiln_dtype::{DType, Value};

use crate::test::{RUNTIME, queue};
use crate::{Error, MetaKernel};

#[test]
fn test_buffer_identifiers_dedup_by_memory_and_space() {
    let queue = queue();
    let a = queue.allocate(64).unwrap();
    let b = queue.allocate(64).unwrap();

    let mut k = MetaKernel::new("dedup", Dialect::HostC);
    let first = k.buffer_identifier(&a, &DType::Int32, AddressSpace::Global);
    let again = k.buffer_identifier(&a.clone(), &DType::Int32, AddressSpace::Global);
    let other = k.buffer_identifier(&b, &DType::Int32, AddressSpace::Global);
    let constant = k.buffer_identifier(&a, &DType::Int32, AddressSpace::Constant);
    let bytes = k.buffer_identifier(&a, &DType::UInt8, AddressSpace::Global);

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_ne!(first, constant);
    assert_ne!(first, bytes);
    assert_eq!(k.params().len(), 4);
    assert!(k.params()[2].is_const);
    assert_eq!(k.params()[3].dtype, DType::UInt8);
}

#[test]
fn test_same_buffer_under_two_element_types() {
    let queue = queue();
    let out = queue.upload(&[0u32; 2]).unwrap();

    let mut k = MetaKernel::for_device("byte_view", queue.device());
    let words = k.buffer_identifier(&out, &DType::UInt32, AddressSpace::Global);
    let bytes = k.buffer_identifier(&out, &DType::UInt8, AddressSpace::Global);
    k.emit_raw(format!("{bytes}[4] = 7;\n{words}[0] = 9;\n"));
    k.exec(&RUNTIME, &queue, &NdRange::task(), &WaitList::new()).unwrap().wait().unwrap();

    let mut expected = [0u8; 8];
    expected[..4].copy_from_slice(&9u32.to_ne_bytes());
    expected[4] = 7;
    assert_eq!(queue.read(&out, 0, 8).unwrap(), expected);
}

#[test]
fn test_unbound_argument_is_reported() {
    let mut k = MetaKernel::new("unbound", Dialect::HostC);
    k.add_set_arg("bound", Value::Int32(1));
    k.add_arg(kiln_codegen::Param::value("missing", DType::Int32));
    k.emit_raw("(void)bound; (void)missing;\n");

    let device = RUNTIME.device().unwrap();
    match k.compile(&RUNTIME, &device) {
        Err(Error::UnboundArgument { name }) => assert_eq!(name, "missing"),
        other => panic!("expected an unbound argument error, got {other:?}"),
    }
}

#[test]
fn test_cache_key_tracks_source_and_options() {
    let build = |body: &str, options: &str| {
        let mut k = MetaKernel::new("keyed", Dialect::HostC);
        k.add_set_arg("x", Value::UInt32(0));
        k.emit_raw(body);
        k.set_options(options);
        k.cache_key()
    };

    let key = build("(void)x;\n", "");
    assert!(key.starts_with("meta:keyed:"));
    assert_eq!(key, build("(void)x;\n", ""));
    assert_ne!(key, build("(void)x; (void)x;\n", ""));
    assert_ne!(key, build("(void)x;\n", "-O3"));
}

#[test]
fn test_identical_drafts_share_a_program() {
    let queue = queue();
    let run = |value: u32| {
        let out = queue.allocate(4).unwrap();
        let mut k = MetaKernel::for_device("store_value", queue.device());
        let o = k.buffer_identifier(&out, &DType::UInt32, AddressSpace::Global);
        let v = k.add_set_arg("v", Value::UInt32(value));
        k.emit_raw(format!("{o}[0] = {v};\n"));
        k.exec(&RUNTIME, &queue, &NdRange::task(), &WaitList::new()).unwrap().wait().unwrap();
        queue.read_vec::<u32>(&out, 0, 1).unwrap()[0]
    };

    let before = RUNTIME.programs().stats();
    assert_eq!(run(11), 11);
    assert_eq!(run(42), 42);
    let after = RUNTIME.programs().stats();
    assert!(after.hits > before.hits);
}
