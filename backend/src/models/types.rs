// Scalar Type Model
//
// SQL column types, their dispatch families and the runtime values that flow
// through rows.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::api::middleware::AppError;

/// SQL column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "TINYINT")]
    TinyInt,
    #[serde(rename = "SMALLINT")]
    SmallInt,
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "BIGINT")]
    BigInt,
    #[serde(rename = "DECIMAL")]
    Decimal,
    #[serde(rename = "REAL")]
    Real,
    #[serde(rename = "DOUBLE")]
    Double,
    #[serde(rename = "VARCHAR")]
    Varchar,
    #[serde(rename = "CHAR")]
    Char,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "TIME")]
    Time,
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
    #[serde(rename = "TIMESTAMP WITH TIME ZONE")]
    TimestampWithTimeZone,
    #[serde(rename = "OBJECT")]
    Object,
    #[serde(rename = "NULL")]
    Null,
}

/// Dispatch family of a [`ScalarType`]. `CHAR` shares the `VARCHAR` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Real,
    Double,
    Varchar,
    Date,
    Time,
    Timestamp,
    TimestampWithTimeZone,
    Object,
    Null,
}

impl ScalarType {
    pub fn family(&self) -> TypeFamily {
        match self {
            ScalarType::Boolean => TypeFamily::Boolean,
            ScalarType::TinyInt => TypeFamily::TinyInt,
            ScalarType::SmallInt => TypeFamily::SmallInt,
            ScalarType::Integer => TypeFamily::Integer,
            ScalarType::BigInt => TypeFamily::BigInt,
            ScalarType::Decimal => TypeFamily::Decimal,
            ScalarType::Real => TypeFamily::Real,
            ScalarType::Double => TypeFamily::Double,
            ScalarType::Varchar | ScalarType::Char => TypeFamily::Varchar,
            ScalarType::Date => TypeFamily::Date,
            ScalarType::Time => TypeFamily::Time,
            ScalarType::Timestamp => TypeFamily::Timestamp,
            ScalarType::TimestampWithTimeZone => TypeFamily::TimestampWithTimeZone,
            ScalarType::Object => TypeFamily::Object,
            ScalarType::Null => TypeFamily::Null,
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::TinyInt => "TINYINT",
            ScalarType::SmallInt => "SMALLINT",
            ScalarType::Integer => "INTEGER",
            ScalarType::BigInt => "BIGINT",
            ScalarType::Decimal => "DECIMAL",
            ScalarType::Real => "REAL",
            ScalarType::Double => "DOUBLE",
            ScalarType::Varchar => "VARCHAR",
            ScalarType::Char => "CHAR",
            ScalarType::Date => "DATE",
            ScalarType::Time => "TIME",
            ScalarType::Timestamp => "TIMESTAMP",
            ScalarType::TimestampWithTimeZone => "TIMESTAMP WITH TIME ZONE",
            ScalarType::Object => "OBJECT",
            ScalarType::Null => "NULL",
        }
    }

    /// Resolve a type name as written in SQL. Length/precision arguments in
    /// parentheses are ignored.
    pub fn from_sql_name(name: &str) -> Option<ScalarType> {
        let normalized = normalize_type_name(name);
        let scalar = match normalized.as_str() {
            "BOOLEAN" | "BOOL" => ScalarType::Boolean,
            "TINYINT" => ScalarType::TinyInt,
            "SMALLINT" => ScalarType::SmallInt,
            "INT" | "INTEGER" => ScalarType::Integer,
            "BIGINT" => ScalarType::BigInt,
            "DECIMAL" | "DEC" | "NUMERIC" => ScalarType::Decimal,
            "REAL" => ScalarType::Real,
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" => ScalarType::Double,
            "VARCHAR" | "CHARACTER VARYING" | "CHAR VARYING" | "TEXT" | "STRING" => {
                ScalarType::Varchar
            }
            "CHAR" | "CHARACTER" => ScalarType::Char,
            "DATE" => ScalarType::Date,
            "TIME" | "TIME WITHOUT TIME ZONE" => ScalarType::Time,
            "TIMESTAMP" | "TIMESTAMP WITHOUT TIME ZONE" => ScalarType::Timestamp,
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => ScalarType::TimestampWithTimeZone,
            "OBJECT" => ScalarType::Object,
            _ => return None,
        };
        Some(scalar)
    }

    /// Map a parsed SQL data type onto the supported scalar types
    pub fn from_data_type(data_type: &sqlparser::ast::DataType) -> Option<ScalarType> {
        Self::from_sql_name(&data_type.to_string())
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.family(),
            TypeFamily::TinyInt
                | TypeFamily::SmallInt
                | TypeFamily::Integer
                | TypeFamily::BigInt
                | TypeFamily::Decimal
                | TypeFamily::Real
                | TypeFamily::Double
        )
    }

    pub fn is_integral(&self) -> bool {
        matches!(
            self.family(),
            TypeFamily::TinyInt | TypeFamily::SmallInt | TypeFamily::Integer | TypeFamily::BigInt
        )
    }

    /// Normalize a value to this type. Every extracted value goes through here.
    pub fn convert(&self, value: Value) -> Result<Value, AppError> {
        let value = match value {
            Value::Null => return Ok(Value::Null),
            Value::Object(json) if self.family() != TypeFamily::Object => Value::from_json(json),
            other => other,
        };
        if value.is_null() {
            return Ok(Value::Null);
        }

        let converted = match self.family() {
            TypeFamily::Boolean => match &value {
                Value::Boolean(b) => Some(Value::Boolean(*b)),
                Value::Varchar(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Some(Value::Boolean(true)),
                    "false" => Some(Value::Boolean(false)),
                    _ => None,
                },
                _ => None,
            },
            TypeFamily::TinyInt => value.as_i64().and_then(|v| i8::try_from(v).ok()).map(Value::TinyInt),
            TypeFamily::SmallInt => value.as_i64().and_then(|v| i16::try_from(v).ok()).map(Value::SmallInt),
            TypeFamily::Integer => value.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::Integer),
            TypeFamily::BigInt => value.as_i64().map(Value::BigInt),
            TypeFamily::Decimal => value.as_decimal().map(Value::Decimal),
            TypeFamily::Real => value.as_f64().map(|v| Value::Real(v as f32)),
            TypeFamily::Double => value.as_f64().map(Value::Double),
            TypeFamily::Varchar => Some(Value::Varchar(value.to_string())),
            TypeFamily::Date => match &value {
                Value::Date(d) => Some(Value::Date(*d)),
                Value::Timestamp(ts) => Some(Value::Date(ts.date())),
                Value::TimestampTz(ts) => Some(Value::Date(ts.naive_local().date())),
                Value::Varchar(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok().map(Value::Date),
                _ => None,
            },
            TypeFamily::Time => match &value {
                Value::Time(t) => Some(Value::Time(*t)),
                Value::Timestamp(ts) => Some(Value::Time(ts.time())),
                Value::TimestampTz(ts) => Some(Value::Time(ts.naive_local().time())),
                Value::Varchar(s) => parse_time(s.trim()).map(Value::Time),
                _ => None,
            },
            TypeFamily::Timestamp => match &value {
                Value::Timestamp(ts) => Some(Value::Timestamp(*ts)),
                Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp),
                Value::TimestampTz(ts) => Some(Value::Timestamp(ts.naive_local())),
                Value::Varchar(s) => parse_timestamp(s.trim()).map(Value::Timestamp),
                _ => None,
            },
            TypeFamily::TimestampWithTimeZone => match &value {
                Value::TimestampTz(ts) => Some(Value::TimestampTz(*ts)),
                Value::Timestamp(ts) => Some(Value::TimestampTz(Utc.from_utc_datetime(ts).fixed_offset())),
                Value::Date(d) => d
                    .and_hms_opt(0, 0, 0)
                    .map(|ts| Value::TimestampTz(Utc.from_utc_datetime(&ts).fixed_offset())),
                Value::Varchar(s) => DateTime::parse_from_rfc3339(s.trim()).ok().map(Value::TimestampTz),
                _ => None,
            },
            TypeFamily::Object => Some(Value::Object(value.to_json())),
            TypeFamily::Null => None,
        };

        converted.ok_or_else(|| {
            AppError::Validation(format!(
                "Cannot convert {} value '{}' to {}",
                value.scalar_type().sql_name(),
                value,
                self.sql_name()
            ))
        })
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

fn normalize_type_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c.to_ascii_uppercase()),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// A single SQL value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Decimal(Decimal),
    Real(f32),
    Double(f64),
    Varchar(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Object(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null) || matches!(self, Value::Object(serde_json::Value::Null))
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Value::Null => ScalarType::Null,
            Value::Boolean(_) => ScalarType::Boolean,
            Value::TinyInt(_) => ScalarType::TinyInt,
            Value::SmallInt(_) => ScalarType::SmallInt,
            Value::Integer(_) => ScalarType::Integer,
            Value::BigInt(_) => ScalarType::BigInt,
            Value::Decimal(_) => ScalarType::Decimal,
            Value::Real(_) => ScalarType::Real,
            Value::Double(_) => ScalarType::Double,
            Value::Varchar(_) => ScalarType::Varchar,
            Value::Date(_) => ScalarType::Date,
            Value::Time(_) => ScalarType::Time,
            Value::Timestamp(_) => ScalarType::Timestamp,
            Value::TimestampTz(_) => ScalarType::TimestampWithTimeZone,
            Value::Object(_) => ScalarType::Object,
        }
    }

    /// Integral view; fractions are truncated
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(*v as i64),
            Value::SmallInt(v) => Some(*v as i64),
            Value::Integer(v) => Some(*v as i64),
            Value::BigInt(v) => Some(*v),
            Value::Decimal(d) => d.trunc().to_i64(),
            Value::Real(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Double(f) if f.is_finite() => Some(f.trunc() as i64),
            Value::Varchar(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::TinyInt(v) => Some(*v as f64),
            Value::SmallInt(v) => Some(*v as f64),
            Value::Integer(v) => Some(*v as f64),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(d) => d.to_f64(),
            Value::Real(f) => Some(*f as f64),
            Value::Double(f) => Some(*f),
            Value::Varchar(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::TinyInt(v) => Some(Decimal::from(*v)),
            Value::SmallInt(v) => Some(Decimal::from(*v)),
            Value::Integer(v) => Some(Decimal::from(*v)),
            Value::BigInt(v) => Some(Decimal::from(*v)),
            Value::Decimal(d) => Some(*d),
            Value::Real(f) => Decimal::from_f32(*f),
            Value::Double(f) => Decimal::from_f64(*f),
            Value::Varchar(s) => Decimal::from_str(s.trim()).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a value from a JSON scalar. Objects and arrays stay opaque.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::BigInt(i)
                } else {
                    n.as_f64().map(Value::Double).unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Varchar(s),
            other => Value::Object(other),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => json!(b),
            Value::TinyInt(v) => json!(v),
            Value::SmallInt(v) => json!(v),
            Value::Integer(v) => json!(v),
            Value::BigInt(v) => json!(v),
            Value::Decimal(d) => d
                .to_f64()
                .filter(|_| d.scale() > 0)
                .map(|f| json!(f))
                .or_else(|| d.to_i64().map(|i| json!(i)))
                .unwrap_or_else(|| json!(d.to_string())),
            Value::Real(f) => json!(f),
            Value::Double(f) => json!(f),
            Value::Object(v) => v.clone(),
            other => json!(other.to_string()),
        }
    }

    /// SQL comparison; `None` when either side is NULL or the types are not comparable
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        let (lt, rt) = (self.scalar_type(), other.scalar_type());
        if lt.is_numeric() && rt.is_numeric() {
            if lt.is_integral() && rt.is_integral() {
                return Some(self.as_i64()?.cmp(&other.as_i64()?));
            }
            if matches!(lt.family(), TypeFamily::Real | TypeFamily::Double)
                || matches!(rt.family(), TypeFamily::Real | TypeFamily::Double)
            {
                return self.as_f64()?.partial_cmp(&other.as_f64()?);
            }
            return Some(self.as_decimal()?.cmp(&other.as_decimal()?));
        }
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::TimestampTz(a), Value::TimestampTz(b)) => Some(a.cmp(b)),
            // Mixed temporal/character comparisons go through the typed side
            (left, Value::Varchar(_)) if !matches!(left, Value::Object(_)) => {
                let right = lt.convert(other.clone()).ok()?;
                left.compare(&right)
            }
            (Value::Varchar(_), right) if !matches!(right, Value::Object(_)) => {
                let left = rt.convert(self.clone()).ok()?;
                left.compare(right)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(v) => write!(f, "{}", v),
            Value::SmallInt(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Real(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Varchar(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::TimestampTz(ts) => write!(f, "{}", ts.to_rfc3339()),
            Value::Object(v) => match v {
                serde_json::Value::String(s) => f.write_str(s),
                other => write!(f, "{}", other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(ScalarType::from_sql_name("int"), Some(ScalarType::Integer));
        assert_eq!(ScalarType::from_sql_name("VARCHAR(20)"), Some(ScalarType::Varchar));
        assert_eq!(ScalarType::from_sql_name("decimal(10, 2)"), Some(ScalarType::Decimal));
        assert_eq!(
            ScalarType::from_sql_name("TIMESTAMP(3) WITH TIME ZONE"),
            Some(ScalarType::TimestampWithTimeZone)
        );
        assert_eq!(ScalarType::from_sql_name("GEOMETRY"), None);
    }

    #[test]
    fn test_char_belongs_to_varchar_family() {
        assert_eq!(ScalarType::Char.family(), TypeFamily::Varchar);
        assert_eq!(ScalarType::Varchar.family(), TypeFamily::Varchar);
        assert_ne!(ScalarType::Integer.family(), ScalarType::BigInt.family());
    }

    #[test]
    fn test_serde_uses_sql_names() {
        let json = serde_json::to_string(&ScalarType::TimestampWithTimeZone).unwrap();
        assert_eq!(json, "\"TIMESTAMP WITH TIME ZONE\"");
        let parsed: ScalarType = serde_json::from_str("\"BIGINT\"").unwrap();
        assert_eq!(parsed, ScalarType::BigInt);
    }

    #[test]
    fn test_numeric_conversion_with_range_check() {
        assert_eq!(ScalarType::Integer.convert(Value::BigInt(42)).unwrap(), Value::Integer(42));
        assert_eq!(ScalarType::TinyInt.convert(Value::Varchar("7".into())).unwrap(), Value::TinyInt(7));
        assert!(ScalarType::TinyInt.convert(Value::BigInt(1000)).is_err());
        assert_eq!(ScalarType::Double.convert(Value::Integer(2)).unwrap(), Value::Double(2.0));
        assert_eq!(
            ScalarType::Decimal.convert(Value::Varchar("1.25".into())).unwrap(),
            Value::Decimal(Decimal::from_str("1.25").unwrap())
        );
    }

    #[test]
    fn test_json_values_convert_to_declared_type() {
        let v = ScalarType::Integer.convert(Value::Object(serde_json::json!(5))).unwrap();
        assert_eq!(v, Value::Integer(5));
        let v = ScalarType::Varchar.convert(Value::Object(serde_json::json!("x"))).unwrap();
        assert_eq!(v, Value::Varchar("x".into()));
        let v = ScalarType::Boolean.convert(Value::Object(serde_json::Value::Null)).unwrap();
        assert_eq!(v, Value::Null);
    }

    #[test]
    fn test_temporal_conversion() {
        let d = ScalarType::Date.convert(Value::Varchar("2021-03-04".into())).unwrap();
        assert_eq!(d, Value::Date(NaiveDate::from_ymd_opt(2021, 3, 4).unwrap()));
        let ts = ScalarType::Timestamp.convert(Value::Varchar("2021-03-04 10:11:12".into())).unwrap();
        assert_eq!(ts.to_string(), "2021-03-04T10:11:12");
        assert!(ScalarType::Date.convert(Value::Boolean(true)).is_err());
    }

    #[test]
    fn test_compare_across_numeric_types() {
        assert_eq!(Value::Integer(3).compare(&Value::BigInt(3)), Some(Ordering::Equal));
        assert_eq!(Value::Integer(3).compare(&Value::Double(3.5)), Some(Ordering::Less));
        assert_eq!(Value::Null.compare(&Value::Integer(1)), None);
        assert_eq!(
            Value::Varchar("b".into()).compare(&Value::Varchar("a".into())),
            Some(Ordering::Greater)
        );
    }
}
