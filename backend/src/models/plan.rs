// Execution Plan Model
//
// One variant per statement kind. Plans are fully resolved: name lookups,
// option parsing and type resolution happen before a plan is built.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::mapping::Mapping;
use super::query::QueryId;
use super::row::RowMetadata;
use crate::api::middleware::AppError;
use crate::engine::Dag;

#[derive(Debug, Clone)]
pub enum Plan {
    CreateMapping {
        mapping: Mapping,
        replace: bool,
        if_not_exists: bool,
    },
    DropMapping {
        name: String,
        if_exists: bool,
    },
    CreateJob {
        dag: Dag,
        job_config: JobConfig,
        if_not_exists: bool,
    },
    AlterJob {
        job_name: String,
        operation: AlterJobOperation,
    },
    DropJob {
        job_name: String,
        if_exists: bool,
        with_snapshot_name: Option<String>,
    },
    CreateSnapshot {
        job_name: String,
        snapshot_name: String,
    },
    DropSnapshot {
        snapshot_name: String,
        if_exists: bool,
    },
    Execution(ExecutionPlan),
}

/// Plan of a SELECT or INSERT statement
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub dag: Dag,
    pub query_id: QueryId,
    pub row_metadata: Arc<RowMetadata>,
    pub is_insert: bool,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterJobOperation {
    Suspend,
    Resume,
    Restart,
}

impl fmt::Display for AlterJobOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlterJobOperation::Suspend => f.write_str("SUSPEND"),
            AlterJobOperation::Resume => f.write_str("RESUME"),
            AlterJobOperation::Restart => f.write_str("RESTART"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessingGuarantee {
    #[default]
    None,
    AtLeastOnce,
    ExactlyOnce,
}

/// Job submission options set through `CREATE JOB ... OPTIONS (...)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub name: Option<String>,
    pub processing_guarantee: ProcessingGuarantee,
    pub snapshot_interval_millis: u64,
    pub auto_scaling: bool,
    pub split_brain_protection_enabled: bool,
    pub metrics_enabled: bool,
    pub store_metrics_after_job_completion: bool,
    pub initial_snapshot_name: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            name: None,
            processing_guarantee: ProcessingGuarantee::None,
            snapshot_interval_millis: 10_000,
            auto_scaling: true,
            split_brain_protection_enabled: false,
            metrics_enabled: true,
            store_metrics_after_job_completion: false,
            initial_snapshot_name: None,
        }
    }
}

impl JobConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Apply one `'key' = 'value'` job option
    pub fn set_option(&mut self, key: &str, value: &str) -> Result<(), AppError> {
        match key {
            "processingGuarantee" => {
                self.processing_guarantee = match value {
                    "exactlyOnce" => ProcessingGuarantee::ExactlyOnce,
                    "atLeastOnce" => ProcessingGuarantee::AtLeastOnce,
                    "none" => ProcessingGuarantee::None,
                    _ => return Err(unsupported_value(key, value)),
                }
            }
            "snapshotIntervalMillis" => {
                self.snapshot_interval_millis = value.parse().map_err(|_| {
                    AppError::Validation(format!("Incorrect number for {}: {}", key, value))
                })?
            }
            "autoScaling" => self.auto_scaling = parse_bool(key, value)?,
            "splitBrainProtectionEnabled" => {
                self.split_brain_protection_enabled = parse_bool(key, value)?
            }
            "metricsEnabled" => self.metrics_enabled = parse_bool(key, value)?,
            "storeMetricsAfterJobCompletion" => {
                self.store_metrics_after_job_completion = parse_bool(key, value)?
            }
            "initialSnapshotName" => self.initial_snapshot_name = Some(value.to_string()),
            _ => return Err(AppError::Validation(format!("Unknown job option: {}", key))),
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, AppError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(unsupported_value(key, value)),
    }
}

fn unsupported_value(key: &str, value: &str) -> AppError {
    AppError::Validation(format!("Unsupported value for {}: {}", key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_options() {
        let mut config = JobConfig::named("j");
        config.set_option("processingGuarantee", "exactlyOnce").unwrap();
        config.set_option("snapshotIntervalMillis", "500").unwrap();
        config.set_option("autoScaling", "false").unwrap();
        config.set_option("initialSnapshotName", "s1").unwrap();

        assert_eq!(config.processing_guarantee, ProcessingGuarantee::ExactlyOnce);
        assert_eq!(config.snapshot_interval_millis, 500);
        assert!(!config.auto_scaling);
        assert_eq!(config.initial_snapshot_name.as_deref(), Some("s1"));
    }

    #[test]
    fn test_invalid_job_options() {
        let mut config = JobConfig::default();
        let err = config.set_option("processingGuarantee", "twice").unwrap_err();
        assert!(err.to_string().contains("Unsupported value for processingGuarantee: twice"));

        let err = config.set_option("snapshotIntervalMillis", "soon").unwrap_err();
        assert!(err.to_string().contains("Incorrect number for snapshotIntervalMillis: soon"));

        let err = config.set_option("parallelism", "4").unwrap_err();
        assert!(err.to_string().contains("Unknown job option: parallelism"));
    }
}
