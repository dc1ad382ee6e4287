use crate::api::middleware::AppError;
use crate::bridge::{QueryResultProducer, QueryResultRegistry, RowsResult, SqlResult};
use crate::engine::{Job, JobEngine, JOB_CANCELLED};
use crate::models::{AlterJobOperation, ExecutionPlan, JobConfig, Plan};
use crate::services::MappingCatalog;
use std::sync::Arc;
use uuid::Uuid;

/// Update count reported when a count is not meaningful
pub const NO_UPDATE_COUNT: i64 = -1;

/// Plan executor: one branch per plan variant, dispatching to the catalog or
/// the job engine
pub struct PlanExecutor {
    catalog: Arc<MappingCatalog>,
    engine: Arc<dyn JobEngine>,
    results: Arc<QueryResultRegistry>,
    member_id: Uuid,
    result_buffer_capacity: usize,
}

impl PlanExecutor {
    pub fn new(
        catalog: Arc<MappingCatalog>,
        engine: Arc<dyn JobEngine>,
        results: Arc<QueryResultRegistry>,
        member_id: Uuid,
        result_buffer_capacity: usize,
    ) -> Self {
        Self {
            catalog,
            engine,
            results,
            member_id,
            result_buffer_capacity,
        }
    }

    pub async fn execute(&self, plan: Plan) -> Result<SqlResult, AppError> {
        match plan {
            Plan::CreateMapping {
                mapping,
                replace,
                if_not_exists,
            } => {
                self.catalog.create_mapping(&mapping, replace, if_not_exists).await?;
                Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT))
            }
            Plan::DropMapping { name, if_exists } => {
                self.catalog.remove_mapping(&name, if_exists).await?;
                Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT))
            }
            Plan::CreateJob {
                dag,
                job_config,
                if_not_exists,
            } => {
                let job = if if_not_exists {
                    self.engine.submit_if_absent(dag, job_config)?
                } else {
                    self.engine.submit(dag, job_config)?
                };
                tracing::info!("Job {} ({}) submitted", job.name().unwrap_or_default(), job.id());
                Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT))
            }
            Plan::AlterJob { job_name, operation } => {
                let job = self.existing_job(&job_name)?;
                match operation {
                    AlterJobOperation::Suspend => job.suspend()?,
                    AlterJobOperation::Resume => job.resume()?,
                    AlterJobOperation::Restart => job.restart()?,
                }
                tracing::info!("Requested {} of job {}", operation, job_name);
                Ok(SqlResult::UpdateCount(0))
            }
            Plan::DropJob {
                job_name,
                if_exists,
                with_snapshot_name,
            } => {
                let not_found = || {
                    AppError::NotFound(format!("Job doesn't exist or already terminated: {}", job_name))
                };
                let job = self
                    .engine
                    .get_job(&job_name)
                    .filter(|job| !job.status().is_terminal());
                let Some(job) = job else {
                    if if_exists {
                        return Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT));
                    }
                    return Err(not_found());
                };
                let requested = match &with_snapshot_name {
                    Some(snapshot_name) => job.cancel_and_export_snapshot(snapshot_name).await.map(|_| ()),
                    None => job.cancel(),
                };
                match requested {
                    Ok(()) => {}
                    // Terminated after the status check
                    Err(AppError::IllegalState(_)) if if_exists => {
                        return Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT))
                    }
                    Err(AppError::IllegalState(_)) => return Err(not_found()),
                    Err(error) => return Err(error),
                }
                match &with_snapshot_name {
                    Some(snapshot_name) => {
                        tracing::info!("Exported snapshot {} and cancelled job {}", snapshot_name, job_name)
                    }
                    None => tracing::info!("Cancelled job {}", job_name),
                }

                match job.join().await {
                    Ok(()) => {}
                    Err(error) if is_cancellation(&error) => {}
                    Err(error) => tracing::warn!("Job {} failed while being dropped: {}", job_name, error),
                }
                Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT))
            }
            Plan::CreateSnapshot {
                job_name,
                snapshot_name,
            } => {
                let job = self.existing_job(&job_name)?;
                job.export_snapshot(&snapshot_name).await?;
                Ok(SqlResult::UpdateCount(0))
            }
            Plan::DropSnapshot {
                snapshot_name,
                if_exists,
            } => {
                match self.engine.get_snapshot(&snapshot_name) {
                    Some(snapshot) => snapshot.destroy(),
                    None if if_exists => {}
                    None => {
                        return Err(AppError::NotFound(format!(
                            "The snapshot doesn't exist: {}",
                            snapshot_name
                        )))
                    }
                }
                Ok(SqlResult::UpdateCount(0))
            }
            Plan::Execution(execution) if execution.is_insert => self.execute_insert(execution).await,
            Plan::Execution(execution) => self.execute_query(execution),
        }
    }

    fn existing_job(&self, job_name: &str) -> Result<Arc<dyn Job>, AppError> {
        self.engine
            .get_job(job_name)
            .ok_or_else(|| AppError::NotFound(format!("The job '{}' doesn't exist", job_name)))
    }

    /// A streaming INSERT never ends on its own, so it runs as a named job
    /// that `DROP JOB` can cancel
    async fn execute_insert(&self, execution: ExecutionPlan) -> Result<SqlResult, AppError> {
        if execution.is_streaming {
            let name = streaming_insert_job_name(&execution);
            self.engine.submit(execution.dag, JobConfig::named(name.clone()))?;
            tracing::info!("Streaming INSERT running as job {}", name);
            return Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT));
        }
        let job = self.engine.submit(execution.dag, JobConfig::default())?;
        job.join().await?;
        Ok(SqlResult::UpdateCount(NO_UPDATE_COUNT))
    }

    fn execute_query(&self, execution: ExecutionPlan) -> Result<SqlResult, AppError> {
        let query_id = execution.query_id;
        let producer = Arc::new(QueryResultProducer::new(self.member_id, self.result_buffer_capacity));
        self.results.register(query_id, producer.clone())?;

        if let Err(error) = self.engine.submit(execution.dag, JobConfig::default()) {
            self.results.remove(&query_id);
            return Err(error);
        }
        tracing::debug!("Query {} started (streaming: {})", query_id, execution.is_streaming);
        Ok(SqlResult::Rows(RowsResult::new(query_id, execution.row_metadata, producer)))
    }
}

fn streaming_insert_job_name(execution: &ExecutionPlan) -> String {
    format!("insert_{}", execution.query_id.local_id.simple())
}

fn is_cancellation(error: &AppError) -> bool {
    matches!(error, AppError::Execution { message, .. } if message == JOB_CANCELLED)
}
