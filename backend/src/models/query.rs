use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::api::middleware::AppError;

/// Correlates one query execution with its result stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryId {
    pub member_id: Uuid,
    pub local_id: Uuid,
}

impl QueryId {
    pub fn new(member_id: Uuid) -> Self {
        Self {
            member_id,
            local_id: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.member_id, self.local_id)
    }
}

impl FromStr for QueryId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Validation(format!("Invalid query id: {}", s));
        let (member, local) = s.split_once('.').ok_or_else(invalid)?;
        Ok(Self {
            member_id: Uuid::parse_str(member).map_err(|_| invalid())?,
            local_id: Uuid::parse_str(local).map_err(|_| invalid())?,
        })
    }
}

/// Request body for `POST /api/sql`
#[derive(Debug, Deserialize)]
pub struct SqlRequest {
    pub sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_id_text_form() {
        let id = QueryId::new(Uuid::new_v4());
        let parsed: QueryId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-an-id".parse::<QueryId>().is_err());
    }

    #[test]
    fn test_query_ids_are_unique_per_member() {
        let member = Uuid::new_v4();
        assert_ne!(QueryId::new(member), QueryId::new(member));
    }
}
