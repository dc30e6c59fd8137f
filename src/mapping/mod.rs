//! Mapping comparison between a desired index body and the live index.
//!
//! Field types are immutable once an index has them: the diff reports any
//! type change as a conflict and only ever proposes additive changes.

pub mod field_types;

use serde_json::{Map, Value};

/// A field whose desired type differs from the live one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConflict {
    /// Dotted path, e.g. `user.address.city`.
    pub path: String,
    pub live_type: String,
    pub desired_type: String,
}

impl std::fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "field '{}' cannot change type from {} to {}",
            self.path,
            field_types::describe(&self.live_type),
            field_types::describe(&self.desired_type)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingDiff {
    /// `properties` tree holding only what must be added.
    pub additions: Map<String, Value>,
    pub conflicts: Vec<FieldConflict>,
}

impl MappingDiff {
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.conflicts.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Body for `PUT /{index}/_mapping`.
    pub fn delta(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "properties".to_string(),
            Value::Object(self.additions.clone()),
        );
        Value::Object(body)
    }

    pub fn conflict_detail(&self) -> String {
        self.conflicts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Declared type of a field definition. A definition without `type` is an
/// object (possibly with `properties`).
pub fn field_type(definition: &Value) -> &str {
    definition
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("object")
}

/// Top-level `properties` of a mapping. Mappings returned by older engines
/// wrap them in a single document type (`{"_doc": {"properties": ..}}`).
pub fn properties_of(mapping: &Map<String, Value>) -> Map<String, Value> {
    if let Some(props) = mapping.get("properties").and_then(Value::as_object) {
        return props.clone();
    }
    if mapping.len() == 1 {
        if let Some(props) = mapping
            .values()
            .next()
            .and_then(|v| v.get("properties"))
            .and_then(Value::as_object)
        {
            return props.clone();
        }
    }
    Map::new()
}

pub fn diff_mappings(desired: &Map<String, Value>, live: &Map<String, Value>) -> MappingDiff {
    diff_properties(&properties_of(desired), &properties_of(live))
}

/// Compare two `properties` trees. Sub-fields of containers and multi-fields
/// (`fields`) are compared recursively.
pub fn diff_properties(desired: &Map<String, Value>, live: &Map<String, Value>) -> MappingDiff {
    let mut diff = MappingDiff::default();
    diff_into(desired, live, "", &mut diff.additions, &mut diff.conflicts);
    diff
}

fn diff_into(
    desired: &Map<String, Value>,
    live: &Map<String, Value>,
    prefix: &str,
    additions: &mut Map<String, Value>,
    conflicts: &mut Vec<FieldConflict>,
) {
    for (name, want) in desired {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        let Some(have) = live.get(name) else {
            additions.insert(name.clone(), want.clone());
            continue;
        };

        let (want_type, have_type) = (field_type(want), field_type(have));
        if want_type != have_type {
            conflicts.push(FieldConflict {
                path,
                live_type: have_type.to_string(),
                desired_type: want_type.to_string(),
            });
            continue;
        }

        if field_types::is_container(want_type) {
            let mut nested = Map::new();
            diff_into(
                &sub_map(want, "properties"),
                &sub_map(have, "properties"),
                &path,
                &mut nested,
                conflicts,
            );
            if !nested.is_empty() {
                let mut entry = Map::new();
                if let Some(t) = want.get("type") {
                    entry.insert("type".to_string(), t.clone());
                }
                entry.insert("properties".to_string(), Value::Object(nested));
                additions.insert(name.clone(), Value::Object(entry));
            }
            continue;
        }

        let want_fields = sub_map(want, "fields");
        if !want_fields.is_empty() {
            let mut nested = Map::new();
            diff_into(
                &want_fields,
                &sub_map(have, "fields"),
                &path,
                &mut nested,
                conflicts,
            );
            // New multi-fields are sent with the parent's full definition so
            // the engine does not see its other parameters reset.
            if !nested.is_empty() {
                additions.insert(name.clone(), want.clone());
            }
        }
    }
}

fn sub_map(definition: &Value, key: &str) -> Map<String, Value> {
    definition
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Apply `additions` (as produced by [`diff_properties`]) onto `target`.
pub fn merge_properties(target: &mut Map<String, Value>, additions: &Map<String, Value>) {
    for (name, add) in additions {
        if let (Some(Value::Object(existing)), Value::Object(add_obj)) = (target.get_mut(name), add)
        {
            for (key, val) in add_obj {
                let nested = matches!(key.as_str(), "properties" | "fields")
                    && val.is_object()
                    && existing.get(key).is_some_and(Value::is_object);
                if nested {
                    if let (Some(Value::Object(inner)), Value::Object(add_inner)) =
                        (existing.get_mut(key), val)
                    {
                        merge_properties(inner, add_inner);
                    }
                } else {
                    existing.insert(key.clone(), val.clone());
                }
            }
            continue;
        }
        target.insert(name.clone(), add.clone());
    }
}
