// JSON helpers: sample-based type inference, field extraction and row
// encoding.

use crate::api::middleware::AppError;
use crate::models::{MappingField, ScalarType, TableField, Value};

/// Best-effort type of one JSON sample value
pub fn infer_type(value: &serde_json::Value) -> ScalarType {
    match value {
        serde_json::Value::Bool(_) => ScalarType::Boolean,
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => ScalarType::BigInt,
        serde_json::Value::Number(_) => ScalarType::Double,
        serde_json::Value::String(_) => ScalarType::Varchar,
        _ => ScalarType::Object,
    }
}

/// Fields of a sampled JSON object, sorted by key. With a `prefix` the
/// external names are `<prefix>.<key>`.
pub fn infer_fields(sample: &serde_json::Value, prefix: Option<&str>) -> Result<Vec<MappingField>, AppError> {
    let object = sample.as_object().ok_or_else(|| {
        AppError::Resolution(format!("Expected a JSON object sample, found: {}", sample))
    })?;
    let mut fields: Vec<MappingField> = object
        .iter()
        .map(|(key, value)| {
            let field = MappingField::new(key.clone(), infer_type(value));
            match prefix {
                Some(prefix) => field.with_external_name(format!("{}.{}", prefix, key)),
                None => field,
            }
        })
        .collect();
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(fields)
}

/// Parse one sample line
pub fn parse_sample(line: &str, source: &str) -> Result<serde_json::Value, AppError> {
    serde_json::from_str(line.trim()).map_err(|e| {
        AppError::Resolution(format!("Invalid JSON sample in '{}': {}", source, e))
    })
}

/// Read one attribute; a dotted path descends into nested objects and
/// `None` reads the whole document
pub fn extract(document: &serde_json::Value, path: Option<&str>) -> Value {
    let Some(path) = path else {
        return Value::from_json(document.clone());
    };
    path.split('.')
        .try_fold(document, |node, segment| node.get(segment))
        .cloned()
        .map(Value::from_json)
        .unwrap_or(Value::Null)
}

/// Encode values as a JSON object keyed by field path. A dotted path nests
/// objects; a field without a path stands for the whole object.
pub fn to_object<'a>(fields: impl IntoIterator<Item = (&'a TableField, &'a Value)>) -> serde_json::Value {
    let mut object = serde_json::Map::new();
    for (field, value) in fields {
        match field.path.path() {
            Some(path) => insert_path(&mut object, path, value.to_json()),
            None => return value.to_json(),
        }
    }
    serde_json::Value::Object(object)
}

/// The first field written to a path wins
fn insert_path(object: &mut serde_json::Map<String, serde_json::Value>, path: &str, value: serde_json::Value) {
    match path.split_once('.') {
        None => {
            object.entry(path.to_string()).or_insert(value);
        }
        Some((head, rest)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryPath;
    use serde_json::json;

    #[test]
    fn test_infer_fields_from_sample() {
        let sample = json!({"id": 1, "price": 2.5, "name": "a", "ok": true, "tags": [], "note": null});
        let fields = infer_fields(&sample, None).unwrap();
        let types: Vec<(&str, ScalarType)> =
            fields.iter().map(|f| (f.name.as_str(), f.scalar_type)).collect();

        assert_eq!(
            types,
            vec![
                ("id", ScalarType::BigInt),
                ("name", ScalarType::Varchar),
                ("note", ScalarType::Object),
                ("ok", ScalarType::Boolean),
                ("price", ScalarType::Double),
                ("tags", ScalarType::Object),
            ]
        );
    }

    #[test]
    fn test_prefixed_external_names() {
        let fields = infer_fields(&json!({"id": 1}), Some("__key")).unwrap();
        assert_eq!(fields[0].external_name.as_deref(), Some("__key.id"));
        assert!(infer_fields(&json!([1, 2]), None).is_err());
    }

    #[test]
    fn test_extract_and_encode() {
        let document = json!({"id": 3, "name": "x"});
        assert_eq!(extract(&document, Some("id")), Value::BigInt(3));
        assert_eq!(extract(&document, Some("missing")), Value::Null);

        let fields = vec![
            TableField::new("id", ScalarType::Integer, QueryPath::new(false, Some("id".into()))),
            TableField::new("label", ScalarType::Varchar, QueryPath::new(false, Some("name".into()))),
        ];
        let values = vec![Value::Integer(3), Value::Varchar("x".into())];
        assert_eq!(to_object(fields.iter().zip(values.iter())), document);
    }

    #[test]
    fn test_nested_paths() {
        let document = json!({"id": 1, "address": {"city": "Oslo", "zip": null}});
        assert_eq!(extract(&document, Some("address.city")), Value::Varchar("Oslo".into()));
        assert_eq!(extract(&document, Some("address.zip")), Value::Null);
        assert_eq!(extract(&document, Some("address.street")), Value::Null);
        assert_eq!(extract(&document, Some("id.city")), Value::Null);

        let fields = vec![
            TableField::new("id", ScalarType::BigInt, QueryPath::new(false, Some("id".into()))),
            TableField::new("city", ScalarType::Varchar, QueryPath::new(false, Some("address.city".into()))),
            TableField::new("zip", ScalarType::Varchar, QueryPath::new(false, Some("address.zip".into()))),
        ];
        let values = vec![Value::BigInt(1), Value::Varchar("Oslo".into()), Value::Null];
        assert_eq!(to_object(fields.iter().zip(values.iter())), document);
    }
}
