use once_cell::sync::Lazy;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFamily {
    Text,
    Keyword,
    Numeric,
    Date,
    Boolean,
    Binary,
    Range,
    Geo,
    Vector,
    Object,
    Special,
}

impl std::fmt::Display for FieldFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldFamily::Text => "text",
            FieldFamily::Keyword => "keyword",
            FieldFamily::Numeric => "numeric",
            FieldFamily::Date => "date",
            FieldFamily::Boolean => "boolean",
            FieldFamily::Binary => "binary",
            FieldFamily::Range => "range",
            FieldFamily::Geo => "geo",
            FieldFamily::Vector => "vector",
            FieldFamily::Object => "object",
            FieldFamily::Special => "special",
        };
        f.write_str(s)
    }
}

/// What the reconciler needs to know about a mapping field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTypeDescriptor {
    pub name: &'static str,
    pub family: FieldFamily,
    /// Container types hold sub-fields under `properties`.
    pub container: bool,
}

const fn leaf(name: &'static str, family: FieldFamily) -> FieldTypeDescriptor {
    FieldTypeDescriptor {
        name,
        family,
        container: false,
    }
}

const fn container(name: &'static str) -> FieldTypeDescriptor {
    FieldTypeDescriptor {
        name,
        family: FieldFamily::Object,
        container: true,
    }
}

const DESCRIPTORS: &[FieldTypeDescriptor] = &[
    leaf("text", FieldFamily::Text),
    leaf("match_only_text", FieldFamily::Text),
    leaf("search_as_you_type", FieldFamily::Text),
    leaf("completion", FieldFamily::Text),
    leaf("keyword", FieldFamily::Keyword),
    leaf("constant_keyword", FieldFamily::Keyword),
    leaf("wildcard", FieldFamily::Keyword),
    leaf("long", FieldFamily::Numeric),
    leaf("integer", FieldFamily::Numeric),
    leaf("short", FieldFamily::Numeric),
    leaf("byte", FieldFamily::Numeric),
    leaf("double", FieldFamily::Numeric),
    leaf("float", FieldFamily::Numeric),
    leaf("half_float", FieldFamily::Numeric),
    leaf("scaled_float", FieldFamily::Numeric),
    leaf("unsigned_long", FieldFamily::Numeric),
    leaf("date", FieldFamily::Date),
    leaf("date_nanos", FieldFamily::Date),
    leaf("boolean", FieldFamily::Boolean),
    leaf("binary", FieldFamily::Binary),
    leaf("integer_range", FieldFamily::Range),
    leaf("long_range", FieldFamily::Range),
    leaf("float_range", FieldFamily::Range),
    leaf("double_range", FieldFamily::Range),
    leaf("date_range", FieldFamily::Range),
    leaf("ip_range", FieldFamily::Range),
    leaf("geo_point", FieldFamily::Geo),
    leaf("geo_shape", FieldFamily::Geo),
    leaf("knn_vector", FieldFamily::Vector),
    leaf("dense_vector", FieldFamily::Vector),
    leaf("ip", FieldFamily::Special),
    leaf("alias", FieldFamily::Special),
    leaf("join", FieldFamily::Special),
    leaf("percolator", FieldFamily::Special),
    leaf("flat_object", FieldFamily::Object),
    leaf("flattened", FieldFamily::Object),
    container("object"),
    container("nested"),
];

static REGISTRY: Lazy<HashMap<&'static str, FieldTypeDescriptor>> =
    Lazy::new(|| DESCRIPTORS.iter().map(|d| (d.name, *d)).collect());

/// Look up a field type by its mapping name. Unknown (plugin) types return `None`.
pub fn lookup(name: &str) -> Option<&'static FieldTypeDescriptor> {
    REGISTRY.get(name)
}

pub fn is_container(name: &str) -> bool {
    lookup(name).is_some_and(|d| d.container)
}

/// Human-readable `type (family)` label; unknown types are shown verbatim.
pub fn describe(name: &str) -> String {
    match lookup(name) {
        Some(d) => format!("{} ({})", d.name, d.family),
        None => name.to_string(),
    }
}
