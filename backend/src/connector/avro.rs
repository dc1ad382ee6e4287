// Avro helpers: generated write schemas, embedded-schema field inference and
// value conversion in both directions.

use apache_avro::types::Value as AvroValue;
use apache_avro::Schema;
use dashmap::DashMap;
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;

use crate::api::middleware::AppError;
use crate::models::{MappingField, ScalarType, TableField, TypeFamily, Value};

/// Parsed schemas keyed by their JSON text
static SCHEMA_CACHE: Lazy<DashMap<String, Arc<Schema>>> = Lazy::new(DashMap::new);

/// Generate the write schema for a field list.
///
/// Every field becomes a nullable union with a `null` default so that partial
/// records stay readable:
///
/// | type family                  | Avro type               |
/// |------------------------------|-------------------------|
/// | BOOLEAN                      | `["null", "boolean"]`   |
/// | TINYINT, SMALLINT, INTEGER   | `["null", "int"]`       |
/// | BIGINT                       | `["null", "long"]`      |
/// | REAL                         | `["null", "float"]`     |
/// | DOUBLE                       | `["null", "double"]`    |
/// | anything else                | `["null", "string"]`    |
///
/// A dotted field path becomes a nullable nested record.
pub fn write_schema(fields: &[TableField]) -> String {
    let tree = group(fields.iter().map(|field| (field_path(field), field.scalar_type)));
    json!({
        "type": "record",
        "name": "sql",
        "namespace": "jet",
        "fields": schema_fields(&tree, "sql"),
    })
    .to_string()
}

fn schema_fields(entries: &[(String, Node<ScalarType>)], parent: &str) -> Vec<serde_json::Value> {
    entries
        .iter()
        .map(|(name, node)| {
            let branch = match node {
                Node::Leaf(scalar_type) => json!(avro_type_name(*scalar_type)),
                Node::Record(children) => {
                    let record_name = format!("{}_{}", parent, name);
                    json!({
                        "type": "record",
                        "name": record_name,
                        "fields": schema_fields(children, &record_name),
                    })
                }
            };
            json!({
                "name": name,
                "type": ["null", branch],
                "default": null,
            })
        })
        .collect()
}

fn field_path(field: &TableField) -> String {
    field.path.path().unwrap_or(&field.name).to_string()
}

/// Fields grouped by path segment, in first-seen order
enum Node<T> {
    Leaf(T),
    Record(Vec<(String, Node<T>)>),
}

fn group<T>(items: impl IntoIterator<Item = (String, T)>) -> Vec<(String, Node<T>)> {
    let mut entries = Vec::new();
    for (path, leaf) in items {
        insert_path(&mut entries, &path, leaf);
    }
    entries
}

/// The first field written to a path wins
fn insert_path<T>(entries: &mut Vec<(String, Node<T>)>, path: &str, leaf: T) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let existing = entries.iter().position(|(name, _)| name == head);
    match (rest, existing) {
        (None, None) => entries.push((head.to_string(), Node::Leaf(leaf))),
        (Some(rest), None) => {
            let mut children = Vec::new();
            insert_path(&mut children, rest, leaf);
            entries.push((head.to_string(), Node::Record(children)));
        }
        (Some(rest), Some(index)) => {
            if let Node::Record(children) = &mut entries[index].1 {
                insert_path(children, rest, leaf);
            }
        }
        (None, Some(_)) => {}
    }
}

fn avro_type_name(scalar_type: ScalarType) -> &'static str {
    match scalar_type.family() {
        TypeFamily::Boolean => "boolean",
        TypeFamily::TinyInt | TypeFamily::SmallInt | TypeFamily::Integer => "int",
        TypeFamily::BigInt => "long",
        TypeFamily::Real => "float",
        TypeFamily::Double => "double",
        _ => "string",
    }
}

/// Parse a schema, reusing an earlier parse of the same text
pub fn parse_schema(text: &str) -> Result<Arc<Schema>, AppError> {
    if let Some(schema) = SCHEMA_CACHE.get(text) {
        return Ok(schema.value().clone());
    }
    let schema = Arc::new(Schema::parse_str(text)?);
    SCHEMA_CACHE.insert(text.to_string(), schema.clone());
    tracing::debug!("Cached Avro schema (cache size: {})", SCHEMA_CACHE.len());
    Ok(schema)
}

/// Mapping fields described by an embedded record schema
pub fn fields_from_schema(schema: &Schema) -> Result<Vec<MappingField>, AppError> {
    match schema {
        Schema::Record(record) => Ok(record
            .fields
            .iter()
            .map(|field| MappingField::new(field.name.clone(), scalar_type_of(&field.schema)))
            .collect()),
        other => Err(AppError::Resolution(format!(
            "Avro schema must be a record, found {:?}",
            other
        ))),
    }
}

fn scalar_type_of(schema: &Schema) -> ScalarType {
    match schema {
        Schema::Boolean => ScalarType::Boolean,
        Schema::Int => ScalarType::Integer,
        Schema::Long => ScalarType::BigInt,
        Schema::Float => ScalarType::Real,
        Schema::Double => ScalarType::Double,
        Schema::String | Schema::Enum(_) => ScalarType::Varchar,
        Schema::Union(union) => {
            let mut branches = union
                .variants()
                .iter()
                .filter(|variant| !matches!(variant, Schema::Null));
            match (branches.next(), branches.next()) {
                (Some(only), None) => scalar_type_of(only),
                _ => ScalarType::Object,
            }
        }
        _ => ScalarType::Object,
    }
}

/// Read one field of a decoded record; a dotted path descends into nested
/// records and `None` reads the whole record
pub fn extract(record: &AvroValue, path: Option<&str>) -> Value {
    let Some(path) = path else {
        return from_avro(record);
    };
    path.split('.')
        .try_fold(record, |node, segment| field_of(node, segment))
        .map(from_avro)
        .unwrap_or(Value::Null)
}

fn field_of<'a>(value: &'a AvroValue, name: &str) -> Option<&'a AvroValue> {
    match value {
        AvroValue::Record(fields) => fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value),
        AvroValue::Map(entries) => entries.get(name),
        AvroValue::Union(_, inner) => field_of(inner, name),
        _ => None,
    }
}

pub fn from_avro(value: &AvroValue) -> Value {
    match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Boolean(*b),
        AvroValue::Int(i) => Value::Integer(*i),
        AvroValue::Long(l) => Value::BigInt(*l),
        AvroValue::Float(f) => Value::Real(*f),
        AvroValue::Double(d) => Value::Double(*d),
        AvroValue::String(s) | AvroValue::Enum(_, s) => Value::Varchar(s.clone()),
        AvroValue::Union(_, inner) => from_avro(inner),
        AvroValue::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(Duration::days(i64::from(*days))))
            .map(Value::Date)
            .unwrap_or(Value::Null),
        other => serde_json::Value::try_from(other.clone())
            .map(Value::Object)
            .unwrap_or(Value::Null),
    }
}

/// Encode one value for a nullable generated-schema field
pub fn to_avro(value: &Value, scalar_type: ScalarType) -> Result<AvroValue, AppError> {
    if value.is_null() {
        return Ok(AvroValue::Union(0, Box::new(AvroValue::Null)));
    }
    let value = scalar_type.convert(value.clone())?;
    let cannot = || {
        AppError::Validation(format!(
            "Cannot encode {} value '{}' as Avro {}",
            value.scalar_type(),
            value,
            avro_type_name(scalar_type)
        ))
    };
    let encoded = match scalar_type.family() {
        TypeFamily::Boolean => AvroValue::Boolean(value.as_bool().ok_or_else(cannot)?),
        TypeFamily::TinyInt | TypeFamily::SmallInt | TypeFamily::Integer => AvroValue::Int(
            value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(cannot)?,
        ),
        TypeFamily::BigInt => AvroValue::Long(value.as_i64().ok_or_else(cannot)?),
        TypeFamily::Real => AvroValue::Float(value.as_f64().ok_or_else(cannot)? as f32),
        TypeFamily::Double => AvroValue::Double(value.as_f64().ok_or_else(cannot)?),
        _ => AvroValue::String(value.to_string()),
    };
    Ok(AvroValue::Union(1, Box::new(encoded)))
}

/// Build a record for the schema generated from the same fields
pub fn to_record<'a>(
    fields: impl IntoIterator<Item = (&'a TableField, &'a Value)>,
) -> Result<AvroValue, AppError> {
    let tree = group(
        fields
            .into_iter()
            .map(|(field, value)| (field_path(field), (field.scalar_type, value))),
    );
    record_value(&tree)
}

fn record_value(entries: &[(String, Node<(ScalarType, &Value)>)]) -> Result<AvroValue, AppError> {
    entries
        .iter()
        .map(|(name, node)| {
            let encoded = match node {
                Node::Leaf((scalar_type, value)) => to_avro(value, *scalar_type)?,
                Node::Record(children) => AvroValue::Union(1, Box::new(record_value(children)?)),
            };
            Ok((name.clone(), encoded))
        })
        .collect::<Result<Vec<_>, AppError>>()
        .map(AvroValue::Record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueryPath;
    use apache_avro::{Reader, Writer};

    fn field(name: &str, scalar_type: ScalarType) -> TableField {
        TableField::new(name, scalar_type, QueryPath::new(false, Some(name.to_string())))
    }

    #[test]
    fn test_write_schema_type_mapping() {
        let fields = vec![
            field("flag", ScalarType::Boolean),
            field("small", ScalarType::SmallInt),
            field("id", ScalarType::BigInt),
            field("ratio", ScalarType::Real),
            field("amount", ScalarType::Double),
            field("price", ScalarType::Decimal),
            field("at", ScalarType::Timestamp),
        ];
        let schema: serde_json::Value = serde_json::from_str(&write_schema(&fields)).unwrap();

        assert_eq!(
            schema,
            json!({
                "type": "record",
                "name": "sql",
                "namespace": "jet",
                "fields": [
                    {"name": "flag", "type": ["null", "boolean"], "default": null},
                    {"name": "small", "type": ["null", "int"], "default": null},
                    {"name": "id", "type": ["null", "long"], "default": null},
                    {"name": "ratio", "type": ["null", "float"], "default": null},
                    {"name": "amount", "type": ["null", "double"], "default": null},
                    {"name": "price", "type": ["null", "string"], "default": null},
                    {"name": "at", "type": ["null", "string"], "default": null},
                ]
            })
        );
    }

    #[test]
    fn test_write_schema_is_pure() {
        let fields = vec![field("a", ScalarType::Integer), field("b", ScalarType::Varchar)];
        let first = write_schema(&fields);
        assert_eq!(first, write_schema(&fields.clone()));

        let parsed = parse_schema(&first).unwrap();
        assert!(Arc::ptr_eq(&parsed, &parse_schema(&first).unwrap()));
    }

    #[test]
    fn test_fields_from_embedded_schema() {
        let schema = Schema::parse_str(
            r#"{"type": "record", "name": "r", "fields": [
                {"name": "id", "type": "long"},
                {"name": "name", "type": ["null", "string"]},
                {"name": "ok", "type": "boolean"},
                {"name": "tags", "type": {"type": "array", "items": "string"}}
            ]}"#,
        )
        .unwrap();

        let fields = fields_from_schema(&schema).unwrap();
        assert_eq!(
            fields,
            vec![
                MappingField::new("id", ScalarType::BigInt),
                MappingField::new("name", ScalarType::Varchar),
                MappingField::new("ok", ScalarType::Boolean),
                MappingField::new("tags", ScalarType::Object),
            ]
        );
    }

    #[test]
    fn test_record_written_with_generated_schema() {
        let fields = vec![field("id", ScalarType::Integer), field("name", ScalarType::Varchar)];
        let schema = parse_schema(&write_schema(&fields)).unwrap();
        let values = vec![Value::BigInt(7), Value::Null];
        let record = to_record(fields.iter().zip(values.iter())).unwrap();

        let mut writer = Writer::new(&schema, Vec::new());
        writer.append(record).unwrap();
        let bytes = writer.into_inner().unwrap();

        let decoded: Vec<AvroValue> = Reader::new(&bytes[..]).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(decoded.len(), 1);
        assert_eq!(extract(&decoded[0], Some("id")), Value::Integer(7));
        assert_eq!(extract(&decoded[0], Some("name")), Value::Null);
        assert_eq!(extract(&decoded[0], Some("missing")), Value::Null);
    }

    #[test]
    fn test_nested_paths_written_and_read() {
        let fields = vec![
            field("id", ScalarType::BigInt),
            TableField::new("city", ScalarType::Varchar, QueryPath::new(false, Some("address.city".into()))),
            TableField::new("zip", ScalarType::Integer, QueryPath::new(false, Some("address.zip".into()))),
        ];
        let schema = parse_schema(&write_schema(&fields)).unwrap();
        let values = vec![Value::BigInt(1), Value::Varchar("Oslo".into()), Value::Integer(150)];

        let mut writer = Writer::new(&schema, Vec::new());
        writer.append(to_record(fields.iter().zip(values.iter())).unwrap()).unwrap();
        let bytes = writer.into_inner().unwrap();
        let decoded: Vec<AvroValue> = Reader::new(&bytes[..]).unwrap().map(|r| r.unwrap()).collect();

        assert_eq!(extract(&decoded[0], Some("address.city")), Value::Varchar("Oslo".into()));
        assert_eq!(extract(&decoded[0], Some("address.zip")), Value::Integer(150));
        assert_eq!(extract(&decoded[0], Some("address.street")), Value::Null);
        assert_eq!(extract(&decoded[0], Some("id.city")), Value::Null);
    }

    #[test]
    fn test_out_of_range_int_rejected() {
        let err = to_avro(&Value::BigInt(i64::MAX), ScalarType::Integer).unwrap_err();
        assert!(err.to_string().contains("Cannot convert"));
    }
}
