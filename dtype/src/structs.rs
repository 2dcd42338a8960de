//! Composite element types.
//!
//! A struct is registered once in a [`TypeRegistry`]; its layout follows C rules (every field
//! at a multiple of its own alignment, total size rounded up to the largest alignment), which
//! is what both the OpenCL C and host C compilers produce for the emitted `typedef struct`.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use snafu::ensure;

use crate::error::{ConflictingStructSnafu, InvalidStructSnafu, Result};
use crate::{DType, ScalarType};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self { name: name.into(), dtype }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructLayout {
    /// Byte offset of each field, in declaration order.
    pub offsets: Vec<usize>,
    pub size: usize,
    pub align: usize,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct StructType {
    name: String,
    fields: Vec<Field>,
    layout: StructLayout,
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl StructType {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self> {
        let name = name.into();
        ensure!(is_identifier(&name), InvalidStructSnafu { name, reason: "name is not an identifier" });
        ensure!(!fields.is_empty(), InvalidStructSnafu { name, reason: "no fields" });

        for (i, field) in fields.iter().enumerate() {
            ensure!(
                is_identifier(&field.name),
                InvalidStructSnafu { name: &name, reason: format!("field {:?} is not an identifier", field.name) }
            );
            ensure!(
                !fields[..i].iter().any(|f| f.name == field.name),
                InvalidStructSnafu { name: &name, reason: format!("duplicate field {}", field.name) }
            );
            ensure!(
                field.dtype.base() != Some(ScalarType::Bool),
                InvalidStructSnafu { name: &name, reason: format!("field {} is bool, which has no device layout", field.name) }
            );
        }

        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;
        for field in &fields {
            let field_align = field.dtype.align();
            offset = round_up(offset, field_align);
            offsets.push(offset);
            offset += field.dtype.bytes();
            align = align.max(field_align);
        }
        let layout = StructLayout { offsets, size: round_up(offset, align), align };

        Ok(Self { name, fields, layout })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn layout(&self) -> &StructLayout {
        &self.layout
    }
}

/// Registry of struct descriptors, keyed by name.
///
/// Registration is idempotent for an identical field list; reusing a name for a different
/// layout is rejected so that a name always denotes one declaration in generated source.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<StructType>>>,
}

static GLOBAL: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::new);

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`Element`](crate::Element) impls of host structs.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    pub fn register(&self, ty: StructType) -> Result<DType> {
        if let Some(existing) = self.types.read().get(ty.name()) {
            ensure!(existing.fields == ty.fields, ConflictingStructSnafu { name: ty.name() });
            return Ok(DType::Struct(Arc::clone(existing)));
        }

        let mut types = self.types.write();
        if let Some(existing) = types.get(ty.name()) {
            ensure!(existing.fields == ty.fields, ConflictingStructSnafu { name: ty.name() });
            return Ok(DType::Struct(Arc::clone(existing)));
        }
        let ty = Arc::new(ty);
        types.insert(ty.name.clone(), Arc::clone(&ty));
        Ok(DType::Struct(ty))
    }

    pub fn get(&self, name: &str) -> Option<DType> {
        self.types.read().get(name).map(|ty| DType::Struct(Arc::clone(ty)))
    }

    /// `pair_{first}_{second}` with fields `first` and `second`.
    pub fn pair(&self, first: &DType, second: &DType) -> Result<DType> {
        let name = format!("pair_{}_{}", first.name(), second.name());
        self.register(StructType::new(
            name,
            vec![Field::new("first", first.clone()), Field::new("second", second.clone())],
        )?)
    }

    /// `tuple_{a}_{b}_...` with fields `v0`, `v1`, ...
    pub fn tuple(&self, elements: &[DType]) -> Result<DType> {
        let mut name = String::from("tuple");
        for dtype in elements {
            name.push('_');
            name.push_str(&dtype.name());
        }
        let fields = elements.iter().enumerate().map(|(i, dtype)| Field::new(format!("v{i}"), dtype.clone())).collect();
        self.register(StructType::new(name, fields)?)
    }
}
