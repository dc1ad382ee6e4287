// Row projection shared by all read processors: extract each table field from
// the decoded record, convert it to the declared type, filter, project.

use apache_avro::types::Value as AvroValue;

use super::{avro, json};
use crate::api::middleware::AppError;
use crate::engine::Expression;
use crate::models::{Row, TableField, Value};

/// One decoded side of a record
pub enum Payload<'a> {
    Json(&'a serde_json::Value),
    Avro(&'a AvroValue),
    /// The side is not present, e.g. a topic record without a key
    Absent,
}

impl Payload<'_> {
    pub fn extract(&self, path: Option<&str>) -> Value {
        match self {
            Payload::Json(document) => json::extract(document, path),
            Payload::Avro(record) => avro::extract(record, path),
            Payload::Absent => Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowProjector {
    fields: Vec<TableField>,
    predicate: Option<Expression>,
    projection: Vec<Expression>,
}

impl RowProjector {
    pub fn new(fields: Vec<TableField>, predicate: Option<Expression>, projection: Vec<Expression>) -> Self {
        Self {
            fields,
            predicate,
            projection,
        }
    }

    pub fn fields(&self) -> &[TableField] {
        &self.fields
    }

    /// Project one record. `None` when the predicate filters it out.
    pub fn project(&self, key: &Payload<'_>, value: &Payload<'_>) -> Result<Option<Row>, AppError> {
        let row = self
            .fields
            .iter()
            .map(|field| {
                let payload = if field.is_key() { key } else { value };
                field.scalar_type.convert(payload.extract(field.path.path()))
            })
            .collect::<Result<Row, AppError>>()?;

        if let Some(predicate) = &self.predicate {
            if !predicate.is_true(&row)? {
                return Ok(None);
            }
        }
        self.projection
            .iter()
            .map(|expression| expression.eval(&row))
            .collect::<Result<Row, AppError>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BinaryOp;
    use crate::models::{QueryPath, ScalarType};
    use serde_json::json;

    #[test]
    fn test_filter_and_project() {
        let fields = vec![
            TableField::new("id", ScalarType::Integer, QueryPath::new(true, Some("id".into()))),
            TableField::new("name", ScalarType::Varchar, QueryPath::new(false, Some("name".into()))),
        ];
        let predicate = Expression::binary(
            BinaryOp::GreaterThan,
            Expression::column(0, ScalarType::Integer),
            Expression::Literal(Value::Integer(1)),
        );
        let projector = RowProjector::new(
            fields,
            Some(predicate),
            vec![Expression::column(1, ScalarType::Varchar)],
        );

        let key = json!({"id": 2});
        let value = json!({"name": "b"});
        let row = projector.project(&Payload::Json(&key), &Payload::Json(&value)).unwrap();
        assert_eq!(row, Some(vec![Value::Varchar("b".into())]));

        let key = json!({"id": 1});
        assert!(projector.project(&Payload::Json(&key), &Payload::Json(&value)).unwrap().is_none());
    }

    #[test]
    fn test_every_field_converted() {
        let fields = vec![TableField::new("n", ScalarType::Integer, QueryPath::new(false, Some("n".into())))];
        let projector = RowProjector::new(fields, None, vec![Expression::column(0, ScalarType::Integer)]);

        let value = json!({"n": 5});
        let row = projector.project(&Payload::Absent, &Payload::Json(&value)).unwrap();
        assert_eq!(row, Some(vec![Value::Integer(5)]));

        let value = json!({"n": "many"});
        assert!(projector.project(&Payload::Absent, &Payload::Json(&value)).is_err());
    }
}
