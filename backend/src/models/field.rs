use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::ScalarType;
use crate::api::middleware::AppError;

/// External name of the whole key object
pub const KEY: &str = "__key";
/// External name of the whole value object
pub const VALUE: &str = "this";

/// Address of a column inside the key or value part of a record.
/// `path == None` addresses the whole object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryPath {
    is_key: bool,
    path: Option<String>,
}

impl QueryPath {
    pub const KEY_PATH: QueryPath = QueryPath { is_key: true, path: None };
    pub const VALUE_PATH: QueryPath = QueryPath { is_key: false, path: None };

    pub fn new(is_key: bool, path: Option<String>) -> Self {
        Self { is_key, path }
    }

    /// Parse an external name: `__key`, `__key.<path>`, `this`, `this.<path>` or `<path>`
    pub fn parse(external_name: &str) -> Result<Self, AppError> {
        let name = external_name.trim();
        let (is_key, rest) = if name == KEY {
            (true, None)
        } else if let Some(rest) = name.strip_prefix("__key.") {
            (true, Some(rest))
        } else if name == VALUE {
            (false, None)
        } else if let Some(rest) = name.strip_prefix("this.") {
            (false, Some(rest))
        } else {
            (false, Some(name))
        };

        match rest {
            Some(path) if path.is_empty() => Err(AppError::Validation(format!(
                "Invalid external name '{}'",
                external_name
            ))),
            Some(path) => Ok(Self::new(is_key, Some(path.to_string()))),
            None => Ok(Self::new(is_key, None)),
        }
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn is_top(&self) -> bool {
        self.path.is_none()
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.is_key { KEY } else { VALUE };
        match &self.path {
            Some(path) => write!(f, "{}.{}", prefix, path),
            None => f.write_str(prefix),
        }
    }
}

/// A column as declared by the user or inferred by sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingField {
    pub name: String,
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
    #[serde(rename = "externalName", skip_serializing_if = "Option::is_none", default)]
    pub external_name: Option<String>,
}

impl MappingField {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar_type,
            external_name: None,
        }
    }

    pub fn with_external_name(mut self, external_name: impl Into<String>) -> Self {
        self.external_name = Some(external_name.into());
        self
    }

    /// External name, or the column name when none was given
    pub fn external_name_or_name(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.name)
    }
}

/// A resolved column of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableField {
    pub name: String,
    #[serde(rename = "type")]
    pub scalar_type: ScalarType,
    pub path: QueryPath,
}

impl TableField {
    pub fn new(name: impl Into<String>, scalar_type: ScalarType, path: QueryPath) -> Self {
        Self {
            name: name.into(),
            scalar_type,
            path,
        }
    }

    pub fn is_key(&self) -> bool {
        self.path.is_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paths() {
        assert_eq!(QueryPath::parse("__key").unwrap(), QueryPath::KEY_PATH);
        assert_eq!(QueryPath::parse("this").unwrap(), QueryPath::VALUE_PATH);

        let p = QueryPath::parse("__key.id").unwrap();
        assert!(p.is_key());
        assert_eq!(p.path(), Some("id"));

        let p = QueryPath::parse("this.address.city").unwrap();
        assert!(!p.is_key());
        assert_eq!(p.path(), Some("address.city"));

        let p = QueryPath::parse("price").unwrap();
        assert!(!p.is_key());
        assert_eq!(p.path(), Some("price"));
    }

    #[test]
    fn test_empty_path_after_prefix_is_rejected() {
        let err = QueryPath::parse("__key.").unwrap_err();
        assert!(err.to_string().contains("Invalid external name '__key.'"));
        assert!(QueryPath::parse("this.").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let p = QueryPath::new(true, Some("id".into()));
        assert_eq!(p.to_string(), "__key.id");
        assert_eq!(QueryPath::parse(&p.to_string()).unwrap(), p);
    }

    #[test]
    fn test_mapping_field_json_shape() {
        let field = MappingField::new("b", ScalarType::Integer).with_external_name("b");
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["type"], "INTEGER");
        assert_eq!(json["externalName"], "b");
    }
}
