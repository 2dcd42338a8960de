use kiln_device::Dialect;
use kiln_dtype::{DType, ScalarType, TypeRegistry, Value};

use crate::{Error, FunctionDef, KernelSource, Param, ProgramSource, Var};

fn position(text: &str, needle: &str) -> usize {
    text.find(needle).unwrap_or_else(|| panic!("missing {needle:?} in:\n{text}"))
}

#[test]
fn test_declare_argument_returns_positions() {
    let mut k = KernelSource::new("k", Dialect::OpenCl);
    assert_eq!(k.declare_argument(Param::global("input", DType::Float32).read_only()), 0);
    assert_eq!(k.declare_argument(Param::value("count", DType::UInt32)), 1);
    assert_eq!(k.declare_argument(Param::local("scratch", DType::Float32)), 2);

    let text = k.serialize();
    assert!(text.contains(
        "__kernel void k(__global const float* input, uint count, __local float* scratch)"
    ));
}

#[test]
fn test_emit_chains_into_body() {
    let mut k = KernelSource::new("k", Dialect::OpenCl);
    let x = Var::new("x", DType::Float32);
    k.emit_raw("out[0] = ").emit_identifier(&x).emit_raw(" * ").emit_literal(&Value::from(2.0f32)).emit_raw(";\n");
    assert_eq!(k.body(), "out[0] = x * 2.0f;\n");
}

#[test]
fn test_struct_declaration_is_injected_once() {
    let pair = TypeRegistry::global().pair(&DType::Int32, &DType::Float32).unwrap();
    let mut k = KernelSource::new("k", Dialect::OpenCl);
    k.inject_type_declaration(&pair);
    k.emit_literal(&Value::zero(&pair));
    k.declare_argument(Param::global("out", pair.clone()));

    let text = k.serialize();
    assert_eq!(text.matches("typedef struct {").count(), 1);
    assert!(text.contains("    int first;\n    float second;\n} pair_int_float;"));
    assert!(k.has_declaration("pair_int_float"));
}

#[test]
fn test_nested_struct_declares_fields_first() {
    let registry = TypeRegistry::new();
    let inner = registry.pair(&DType::UInt32, &DType::UInt32).unwrap();
    let outer = registry.pair(&inner, &DType::Float32).unwrap();

    let mut k = KernelSource::new("k", Dialect::OpenCl);
    k.inject_type_declaration(&outer);
    let text = k.serialize();
    assert!(position(&text, "} pair_uint_uint;") < position(&text, "} pair_pair_uint_uint_float;"));
}

#[test]
fn test_double_enables_fp64_under_opencl_only() {
    let mut cl = KernelSource::new("k", Dialect::OpenCl);
    cl.declare_argument(Param::global("x", DType::Float64));
    assert!(cl.serialize().starts_with("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n"));

    let mut host = KernelSource::new("k", Dialect::HostC);
    host.declare_argument(Param::global("x", DType::Float64));
    assert!(!host.serialize().contains("#pragma"));
}

#[test]
fn test_host_vectors_are_typedefs() {
    let uint16 = DType::vector(ScalarType::UInt32, 16).unwrap();
    let mut k = KernelSource::new("k", Dialect::HostC);
    k.type_name(&uint16);
    k.type_name(&uint16);
    let text = k.serialize();
    assert_eq!(text.matches("typedef uint uint16 __attribute__((vector_size(64)));").count(), 1);

    let mut cl = KernelSource::new("k", Dialect::OpenCl);
    cl.type_name(&uint16);
    assert!(!cl.serialize().contains("typedef"));
}

#[test]
fn test_functions_dedup_by_name() {
    let plus = FunctionDef::binary("op_plus", DType::Int32, "a + b");
    let mut k = KernelSource::new("k", Dialect::OpenCl);
    k.add_function(&plus).add_function(&plus);
    k.add_function(&FunctionDef::binary("op_plus", DType::Int32, "a - b"));

    let text = k.serialize();
    assert_eq!(text.matches("op_plus(").count(), 1);
    assert!(text.contains("inline int op_plus(int a, int b)\n{\n    return a + b;\n}"));
}

#[test]
fn test_header_order() {
    let pair = TypeRegistry::global().pair(&DType::Float64, &DType::Int32).unwrap();
    let mut k = KernelSource::new("k", Dialect::OpenCl);
    k.add_function(&FunctionDef::binary("combine", pair.clone(), "a"));
    k.declare_argument(Param::global("out", pair));
    k.emit_raw("out[0] = combine(out[0], out[1]);");

    let text = k.serialize();
    let pragma = position(&text, "#pragma");
    let types = position(&text, "typedef struct");
    let helper = position(&text, "inline pair_double_int combine");
    let entry = position(&text, "__kernel void k");
    assert!(pragma < types && types < helper && helper < entry);
}

#[test]
fn test_host_program_exports_signature_tables() {
    let mut k = KernelSource::new("saxpy", Dialect::HostC);
    k.declare_argument(Param::global("y", DType::Float32));
    k.declare_argument(Param::global("x", DType::Float32).read_only());
    k.declare_argument(Param::value("a", DType::Float32));
    k.declare_argument(Param::value("n", DType::UInt64));
    k.emit_raw("size_t i = get_global_id(0);\nif (i < n) y[i] += a * x[i];\n");

    let text = k.serialize();
    assert!(position(&text, "#include <math.h>") < position(&text, "__kernel void saxpy"));
    assert!(text.contains("void kiln_entry_saxpy(void** args)"));
    assert!(text.contains("saxpy((float*)args[0], (const float*)args[1], *(const float*)args[2], *(const ulong*)args[3]);"));
    assert!(text.contains("const unsigned long kiln_arity_saxpy = 4;"));
    assert!(text.contains("const unsigned long kiln_sizes_saxpy[] = {0, 0, 4, 8};"));
}

#[test]
fn test_host_zero_argument_table_is_not_empty() {
    let k = KernelSource::new("noop", Dialect::HostC);
    let text = k.serialize();
    assert!(text.contains("kiln_arity_noop = 0;"));
    assert!(text.contains("kiln_sizes_noop[] = {0};"));
}

#[test]
fn test_program_merges_shared_declarations() {
    let pair = TypeRegistry::global().pair(&DType::UInt32, &DType::Float32).unwrap();
    let mut program = ProgramSource::new(Dialect::OpenCl);
    for name in ["count", "scatter"] {
        let mut k = KernelSource::new(name, Dialect::OpenCl);
        k.declare_argument(Param::global("data", pair.clone()));
        program.add_kernel(k).unwrap();
    }

    let text = program.serialize();
    assert_eq!(text.matches("} pair_uint_float;").count(), 1);
    assert_eq!(program.entry_names().collect::<Vec<_>>(), ["count", "scatter"]);
    assert!(position(&text, "__kernel void count") < position(&text, "__kernel void scatter"));
}

#[test]
fn test_program_rejects_duplicates_and_mixed_dialects() {
    let mut program = ProgramSource::new(Dialect::OpenCl);
    program.add_kernel(KernelSource::new("a", Dialect::OpenCl)).unwrap();

    let err = program.add_kernel(KernelSource::new("a", Dialect::OpenCl)).unwrap_err();
    assert!(matches!(err, Error::DuplicateEntry { .. }));
    let err = program.add_kernel(KernelSource::new("b", Dialect::HostC)).unwrap_err();
    assert!(matches!(err, Error::DialectMismatch { .. }));
}

#[test]
fn test_identical_drafts_serialize_identically() {
    let build = || {
        let mut k = KernelSource::new("k", Dialect::HostC);
        k.declare_argument(Param::global("out", DType::Int64));
        k.emit_raw("out[0] = ").emit_literal(&Value::from(i64::MIN)).emit_raw(";");
        k.serialize()
    };
    assert_eq!(build(), build());
}
