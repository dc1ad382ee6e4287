use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::field::MappingField;

/// Connector options, kept sorted by key
pub type MappingOptions = BTreeMap<String, String>;

/// Catalog entry describing an external source as a typed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub name: String,
    pub connector_type: String,
    pub fields: Vec<MappingField>,
    pub options: MappingOptions,
}

impl Mapping {
    pub fn new(
        name: impl Into<String>,
        connector_type: impl Into<String>,
        fields: Vec<MappingField>,
        options: MappingOptions,
    ) -> Self {
        Self {
            name: name.into(),
            connector_type: connector_type.into(),
            fields,
            options,
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// A persisted mapping with bookkeeping timestamps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMapping {
    #[serde(flatten)]
    pub mapping: Mapping,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
