use serde::Serialize;
use std::sync::Arc;

use super::types::{ScalarType, Value};

/// Ordered values of one row
pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
}

/// Fixed, ordered `(name, type)` schema of a result
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RowMetadata {
    pub columns: Vec<ColumnMetadata>,
}

impl RowMetadata {
    pub fn new(columns: Vec<ColumnMetadata>) -> Self {
        Self { columns }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Client-visible row
#[derive(Debug, Clone)]
pub struct SqlRow {
    metadata: Arc<RowMetadata>,
    values: Row,
}

impl SqlRow {
    pub fn new(metadata: Arc<RowMetadata>, values: Row) -> Self {
        Self { metadata, values }
    }

    pub fn metadata(&self) -> &RowMetadata {
        &self.metadata
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.metadata.find_column(name).and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .metadata
            .columns
            .iter()
            .zip(self.values.iter())
            .map(|(column, value)| (column.name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_access_by_name() {
        let metadata = Arc::new(RowMetadata::new(vec![
            ColumnMetadata { name: "id".into(), scalar_type: ScalarType::Integer },
            ColumnMetadata { name: "name".into(), scalar_type: ScalarType::Varchar },
        ]));
        let row = SqlRow::new(metadata, vec![Value::Integer(1), Value::Varchar("a".into())]);

        assert_eq!(row.get_by_name("name"), Some(&Value::Varchar("a".into())));
        assert_eq!(row.get(0), Some(&Value::Integer(1)));
        assert_eq!(row.to_json(), serde_json::json!({"id": 1, "name": "a"}));
    }
}
