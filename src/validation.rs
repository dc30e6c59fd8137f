//! Input checks that run before any network call.

use serde_json::{Map, Value};
use url::Url;

use crate::error::{ProvisionError, Result};
use crate::types::{IndexBody, IndexSpec, ResourceProperties};

const MAX_INDEX_NAME_BYTES: usize = 255;
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ',', '#', ' ', ':'];
const BODY_KEYS: &[&str] = &["mappings", "settings", "aliases"];

/// Index naming rules shared by OpenSearch and Elasticsearch.
pub fn validate_index_name(name: &str) -> Result<()> {
    let invalid = |why: &str| Err(ProvisionError::Validation(format!("indexName '{name}' {why}")));

    if name.is_empty() {
        return Err(ProvisionError::Validation("indexName is required".into()));
    }
    if name.len() > MAX_INDEX_NAME_BYTES {
        return invalid("is longer than 255 bytes");
    }
    if name == "." || name == ".." {
        return invalid("is reserved");
    }
    if name.starts_with(&['_', '-', '+'][..]) {
        return invalid("must not start with '_', '-' or '+'");
    }
    if name.chars().any(|c| c.is_uppercase()) {
        return invalid("must be lowercase");
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return invalid(format!("must not contain '{c}'").as_str());
    }
    Ok(())
}

/// Canonical form of a cluster address: scheme defaults to `https`, trailing
/// slashes are dropped. Two spellings of one endpoint normalize identically.
pub fn normalize_endpoint(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::Validation(
            "endpointAddress is required".into(),
        ));
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| {
        ProvisionError::Validation(format!("endpointAddress '{raw}' is not a valid address: {e}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProvisionError::Validation(format!(
            "endpointAddress '{raw}' must use http or https"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProvisionError::Validation(format!(
            "endpointAddress '{raw}' has no host"
        )));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ProvisionError::Validation(format!(
            "endpointAddress '{raw}' must not carry a query or fragment"
        )));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Accepts the body as an object or as a string holding one; deployment
/// systems commonly stringify nested properties.
pub fn parse_body(raw: &Value) -> Result<IndexBody> {
    let object = match raw {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(ProvisionError::Validation(
                    "body must be a JSON object".into(),
                ))
            }
            Err(e) => {
                return Err(ProvisionError::Validation(format!(
                    "body is not valid JSON: {e}"
                )))
            }
        },
        Value::Null => return Err(ProvisionError::Validation("body is required".into())),
        _ => {
            return Err(ProvisionError::Validation(
                "body must be a JSON object".into(),
            ))
        }
    };

    if let Some(key) = object.keys().find(|k| !BODY_KEYS.contains(&k.as_str())) {
        return Err(ProvisionError::Validation(format!(
            "body has unsupported key '{key}' (expected mappings, settings, aliases)"
        )));
    }

    let section = |key: &str| -> Result<Map<String, Value>> {
        match object.get(key) {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(ProvisionError::Validation(format!(
                "body.{key} must be an object"
            ))),
        }
    };

    let body = IndexBody {
        mappings: section("mappings")?,
        settings: section("settings")?,
        aliases: section("aliases")?,
    };
    validate_mappings(&body.mappings)?;
    Ok(body)
}

fn validate_mappings(mappings: &Map<String, Value>) -> Result<()> {
    match mappings.get("properties") {
        None => Ok(()),
        Some(Value::Object(props)) => validate_properties(props, ""),
        Some(_) => Err(ProvisionError::Validation(
            "body.mappings.properties must be an object".into(),
        )),
    }
}

fn validate_properties(props: &Map<String, Value>, prefix: &str) -> Result<()> {
    for (name, definition) in props {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        if name.is_empty() {
            return Err(ProvisionError::Validation(format!(
                "empty field name under '{prefix}'"
            )));
        }
        let Value::Object(def) = definition else {
            return Err(ProvisionError::Validation(format!(
                "mapping for field '{path}' must be an object"
            )));
        };
        if let Some(t) = def.get("type") {
            if !t.is_string() {
                return Err(ProvisionError::Validation(format!(
                    "type of field '{path}' must be a string"
                )));
            }
        }
        match def.get("properties") {
            None => {}
            Some(Value::Object(nested)) => validate_properties(nested, &path)?,
            Some(_) => {
                return Err(ProvisionError::Validation(format!(
                    "properties of field '{path}' must be an object"
                )))
            }
        }
    }
    Ok(())
}

/// Build a validated [`IndexSpec`] from event properties.
pub fn spec_from_properties(props: &ResourceProperties) -> Result<IndexSpec> {
    validate_index_name(&props.index_name)?;
    let endpoint = normalize_endpoint(&props.endpoint_address)?;
    let body = parse_body(&props.body)?;
    Ok(IndexSpec::new(props.index_name.clone(), body, endpoint))
}

/// Re-check an [`IndexSpec`] built by a library caller rather than from properties.
pub fn validate_spec(spec: &IndexSpec) -> Result<()> {
    validate_index_name(&spec.name)?;
    let normalized = normalize_endpoint(&spec.endpoint)?;
    if normalized != spec.endpoint {
        return Err(ProvisionError::Validation(format!(
            "endpoint '{}' is not normalized (expected '{normalized}')",
            spec.endpoint
        )));
    }
    validate_mappings(&spec.body.mappings)
}
