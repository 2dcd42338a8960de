//! Host C prelude and entry trampolines.
//!
//! Host C kernels are OpenCL C kernels compiled by the system C compiler. The prelude maps the
//! OpenCL address-space qualifiers away and implements the work-item builtins on top of a
//! per-thread [`ITEM_STRUCT`] descriptor that the host runtime binds before calling an entry.
//!
//! For every entry point `name` the serialized unit also exports:
//!
//! - `void kiln_entry_name(void** args)`: calls `name` with `args[i]` pointing at argument `i`
//!   (the pointer itself for pointer parameters, the value's storage otherwise);
//! - `kiln_arity_name`: the parameter count;
//! - `kiln_sizes_name[]`: per-parameter value size, `0` for pointer parameters.

use std::fmt::Write;

use kiln_device::Dialect;

use crate::source::Param;
use crate::types::type_name;

/// Symbol the host runtime calls on each worker thread to bind its work-item descriptor.
pub const BIND_ITEM_SYMBOL: &str = "kiln_bind_item";

pub const ENTRY_PREFIX: &str = "kiln_entry_";
pub const ARITY_PREFIX: &str = "kiln_arity_";
pub const SIZES_PREFIX: &str = "kiln_sizes_";

/// Layout shared with the host runtime's `#[repr(C)]` work-item descriptor.
pub const ITEM_STRUCT: &str = "\
typedef struct kiln_item {
    size_t global_id[3];
    size_t local_id[3];
    size_t group_id[3];
    size_t global_size[3];
    size_t local_size[3];
    size_t num_groups[3];
    unsigned int work_dim;
    void (*sync)(void*);
    void* sync_ctx;
} kiln_item;";

pub fn host_prelude() -> String {
    format!(
        r#"#include <math.h>
#include <stdbool.h>
#include <stddef.h>
#include <stdint.h>

typedef signed char schar;
typedef unsigned char uchar;
typedef unsigned short ushort;
typedef unsigned int uint;
typedef unsigned long ulong;

{ITEM_STRUCT}

static _Thread_local const kiln_item* kiln_current;

void {BIND_ITEM_SYMBOL}(const kiln_item* item) {{ kiln_current = item; }}

#define __kernel
#define __global
#define __local
#define __constant
#define __private

#define get_work_dim() (kiln_current->work_dim)
#define get_global_id(d) (kiln_current->global_id[(d)])
#define get_local_id(d) (kiln_current->local_id[(d)])
#define get_group_id(d) (kiln_current->group_id[(d)])
#define get_global_size(d) (kiln_current->global_size[(d)])
#define get_local_size(d) (kiln_current->local_size[(d)])
#define get_num_groups(d) (kiln_current->num_groups[(d)])

#define CLK_LOCAL_MEM_FENCE 1
#define CLK_GLOBAL_MEM_FENCE 2
#define barrier(flags) (kiln_current->sync(kiln_current->sync_ctx))

#define atomic_inc(p) __atomic_fetch_add((p), 1, __ATOMIC_SEQ_CST)
#define atomic_add(p, v) __atomic_fetch_add((p), (v), __ATOMIC_SEQ_CST)

#define min(a, b) ((a) < (b) ? (a) : (b))
#define max(a, b) ((a) > (b) ? (a) : (b))
"#
    )
}

/// Trampoline and signature tables for one host C entry point.
pub fn host_entry_exports(name: &str, params: &[Param]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "void {ENTRY_PREFIX}{name}(void** args)\n{{");
    let call = params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let ty = type_name(&p.dtype, Dialect::HostC);
            let qualifier = if p.is_const { "const " } else { "" };
            if p.is_pointer() { format!("({qualifier}{ty}*)args[{i}]") } else { format!("*(const {ty}*)args[{i}]") }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "    {name}({call});\n}}");

    let sizes = params.iter().map(|p| if p.is_pointer() { 0 } else { p.dtype.bytes() }).collect::<Vec<_>>();
    let _ = writeln!(out, "const unsigned long {ARITY_PREFIX}{name} = {};", sizes.len());
    // ISO C has no empty arrays; the arity says how many entries are real.
    let table = if sizes.is_empty() {
        "0".to_string()
    } else {
        sizes.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
    };
    let _ = writeln!(out, "const unsigned long {SIZES_PREFIX}{name}[] = {{{table}}};");
    out
}
