use kiln_device::Dialect;
use kiln_dtype::DType;

use crate::types::type_name;

/// A helper function emitted ahead of the entry points that call it.
///
/// Programs keep the first definition seen for a name, so two helpers must not share a name
/// unless their text is identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub returns: DType,
    pub params: Vec<(String, DType)>,
    /// Statements between the braces.
    pub body: String,
}

impl FunctionDef {
    pub fn new(name: impl Into<String>, returns: DType, params: Vec<(String, DType)>, body: impl Into<String>) -> Self {
        Self { name: name.into(), returns, params, body: body.into() }
    }

    /// Two-argument function `T name(T a, T b) { return expr; }`.
    pub fn binary(name: impl Into<String>, dtype: DType, expr: impl AsRef<str>) -> Self {
        let params = vec![("a".to_string(), dtype.clone()), ("b".to_string(), dtype.clone())];
        Self::new(name, dtype, params, format!("return {};", expr.as_ref()))
    }

    /// Every type the signature mentions.
    pub fn types(&self) -> impl Iterator<Item = &DType> {
        std::iter::once(&self.returns).chain(self.params.iter().map(|(_, dtype)| dtype))
    }

    pub fn render(&self, dialect: Dialect) -> String {
        let storage = match dialect {
            Dialect::OpenCl => "inline",
            Dialect::HostC => "static inline",
        };
        let params = self
            .params
            .iter()
            .map(|(name, dtype)| format!("{} {name}", type_name(dtype, dialect)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{storage} {} {}({params})\n{{\n    {}\n}}", type_name(&self.returns, dialect), self.name, self.body.trim())
    }
}
