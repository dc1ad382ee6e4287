// Job Engine
//
// A job is a linear pipeline: one source processor feeding one sink
// processor. The engine traits are what the plan executor talks to;
// `LocalJobEngine` runs each job as a tokio task on this node.

pub mod expression;
pub mod local;
pub mod store;

pub use expression::{BinaryOp, Expression, IsTest, ScalarFunction};
pub use local::LocalJobEngine;
pub use store::{MapEntry, MapStore, TopicRecord, TopicStore};

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::bridge::{QueryResultProducer, QueryResultRegistry};
use crate::connector::{ReadProcessorSupplier, WriteProcessorSupplier};
use crate::models::{JobConfig, QueryId, Row};

/// Error message of a job that ended because it was cancelled
pub const JOB_CANCELLED: &str = "Job cancelled";

/// Longest time a running job keeps written rows buffered in its sink
pub const SINK_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Execution graph submitted to the engine
#[derive(Debug, Clone)]
pub struct Dag {
    pub source: SourceSpec,
    pub sink: SinkSpec,
}

impl Dag {
    pub fn new(source: SourceSpec, sink: SinkSpec) -> Self {
        Self { source, sink }
    }

    /// True when the source never reports completion
    pub fn is_unbounded(&self) -> bool {
        match &self.source {
            SourceSpec::Values { .. } => false,
            SourceSpec::Table(supplier) => supplier.is_unbounded(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourceSpec {
    /// Constant rows computed at planning time
    Values { rows: Vec<Row> },
    Table(ReadProcessorSupplier),
}

impl SourceSpec {
    pub fn open(&self, context: &EngineContext) -> Result<Box<dyn SourceProcessor>, AppError> {
        match self {
            SourceSpec::Values { rows } => Ok(Box::new(ValuesSource {
                rows: rows.clone().into_iter(),
            })),
            SourceSpec::Table(supplier) => supplier.open(context),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SinkSpec {
    /// Rows go to the result producer registered under the query id
    QueryResult { query_id: QueryId },
    Table(WriteProcessorSupplier),
}

impl SinkSpec {
    pub fn open(&self, context: &EngineContext) -> Result<Box<dyn SinkProcessor>, AppError> {
        match self {
            SinkSpec::QueryResult { query_id } => {
                let producer = context.results.get(query_id).ok_or_else(|| {
                    AppError::IllegalState(format!("No result registered for query {}", query_id))
                })?;
                Ok(Box::new(QueryResultSink {
                    query_id: *query_id,
                    producer,
                    results: context.results.clone(),
                }))
            }
            SinkSpec::Table(supplier) => supplier.open(context),
        }
    }
}

pub enum SourcePoll {
    Row(Row),
    /// Nothing available right now; poll again later
    Idle,
    Done,
}

pub trait SourceProcessor: Send {
    fn poll(&mut self) -> Result<SourcePoll, AppError>;
}

#[async_trait]
pub trait SinkProcessor: Send {
    async fn write(&mut self, row: Row) -> Result<(), AppError>;

    /// Make every row written so far durable. Called before a snapshot is
    /// recorded and periodically while the job runs.
    async fn flush(&mut self) -> Result<(), AppError> {
        Ok(())
    }

    /// Called exactly once with the outcome of the job
    async fn complete(&mut self, outcome: &Result<(), AppError>) -> Result<(), AppError>;

    /// A closed sink terminates its job
    fn is_closed(&self) -> bool {
        false
    }
}

struct ValuesSource {
    rows: std::vec::IntoIter<Row>,
}

impl SourceProcessor for ValuesSource {
    fn poll(&mut self) -> Result<SourcePoll, AppError> {
        Ok(match self.rows.next() {
            Some(row) => SourcePoll::Row(row),
            None => SourcePoll::Done,
        })
    }
}

struct QueryResultSink {
    query_id: QueryId,
    producer: Arc<QueryResultProducer>,
    results: Arc<QueryResultRegistry>,
}

#[async_trait]
impl SinkProcessor for QueryResultSink {
    async fn write(&mut self, row: Row) -> Result<(), AppError> {
        self.producer.push(row).await
    }

    async fn complete(&mut self, outcome: &Result<(), AppError>) -> Result<(), AppError> {
        match outcome {
            Ok(()) => self.producer.done(),
            Err(error) => self.producer.on_error(error.clone()),
        }
        self.results.remove(&self.query_id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.producer.is_closed()
    }
}

/// Node-wide resources shared by all jobs
#[derive(Clone)]
pub struct EngineContext {
    pub member_id: Uuid,
    pub maps: Arc<MapStore>,
    pub topics: Arc<TopicStore>,
    pub results: Arc<QueryResultRegistry>,
    /// Back-off while an unbounded source has nothing to emit
    pub idle_poll: Duration,
}

impl EngineContext {
    pub fn new(member_id: Uuid, idle_poll: Duration) -> Self {
        Self {
            member_id,
            maps: Arc::new(MapStore::new()),
            topics: Arc::new(TopicStore::new()),
            results: Arc::new(QueryResultRegistry::new()),
            idle_poll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    NotRunning,
    Starting,
    Running,
    Suspended,
    Completing,
    Failed,
    Completed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::NotRunning => "NOT_RUNNING",
            JobStatus::Starting => "STARTING",
            JobStatus::Running => "RUNNING",
            JobStatus::Suspended => "SUSPENDED",
            JobStatus::Completing => "COMPLETING",
            JobStatus::Failed => "FAILED",
            JobStatus::Completed => "COMPLETED",
        };
        f.write_str(name)
    }
}

/// Job submission and lookup
pub trait JobEngine: Send + Sync {
    /// Start a job. A named job fails if an active job has the same name.
    fn submit(&self, dag: Dag, config: JobConfig) -> Result<Arc<dyn Job>, AppError>;

    /// Start a job unless an active job with the same name exists, in which
    /// case that job is returned
    fn submit_if_absent(&self, dag: Dag, config: JobConfig) -> Result<Arc<dyn Job>, AppError>;

    /// Latest job submitted under `name`
    fn get_job(&self, name: &str) -> Option<Arc<dyn Job>>;

    fn get_snapshot(&self, name: &str) -> Option<Arc<dyn JobStateSnapshot>>;
}

/// Control handle of a submitted job
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> Uuid;
    fn name(&self) -> Option<String>;
    fn status(&self) -> JobStatus;
    fn suspend(&self) -> Result<(), AppError>;
    fn resume(&self) -> Result<(), AppError>;
    fn restart(&self) -> Result<(), AppError>;
    fn cancel(&self) -> Result<(), AppError>;

    /// Export a named snapshot while the job keeps running
    async fn export_snapshot(&self, name: &str) -> Result<Arc<dyn JobStateSnapshot>, AppError>;

    /// Export a named snapshot and cancel in one step
    async fn cancel_and_export_snapshot(&self, name: &str) -> Result<Arc<dyn JobStateSnapshot>, AppError>;

    /// Wait for the job to terminate
    async fn join(&self) -> Result<(), AppError>;
}

/// Durable named capture of a job's progress
pub trait JobStateSnapshot: Send + Sync {
    fn name(&self) -> &str;
    fn job_name(&self) -> &str;
    fn processed_rows(&self) -> u64;
    fn destroy(&self);
}
