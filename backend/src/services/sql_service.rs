// SQL Service
//
// Entry point for one SQL statement: parse, validate, plan, execute. Row
// results stay open between requests and are drained page by page.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::bridge::{HasNextImmediately, QueryResultIterator, RowsResult, SqlResult};
use crate::connector::ConnectorRegistry;
use crate::engine::{JobEngine, LocalJobEngine};
use crate::models::{ColumnMetadata, QueryId, StoredMapping};
use crate::parse::parse_statement;
use crate::planner::Planner;
use crate::services::{MappingCatalog, PlanExecutor};
use crate::validation::SqlValidator;

/// Response to one executed statement
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SqlResponse {
    UpdateCount {
        #[serde(rename = "updateCount")]
        update_count: i64,
    },
    Rows {
        #[serde(rename = "queryId")]
        query_id: String,
        columns: Vec<ColumnMetadata>,
    },
}

/// One page of rows from an open result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowPage {
    pub query_id: String,
    pub rows: Vec<serde_json::Value>,
    /// No more rows will follow; the result has been released
    pub done: bool,
}

struct OpenResult {
    result: RowsResult,
    iterator: Mutex<QueryResultIterator>,
    last_access: std::sync::Mutex<Instant>,
}

impl OpenResult {
    fn touch(&self) {
        if let Ok(mut last_access) = self.last_access.lock() {
            *last_access = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .map(|last_access| last_access.elapsed())
            .unwrap_or_default()
    }
}

pub struct SqlService {
    catalog: Arc<MappingCatalog>,
    planner: Planner,
    executor: PlanExecutor,
    member_id: Uuid,
    open_results: DashMap<QueryId, Arc<OpenResult>>,
}

impl SqlService {
    pub fn new(catalog: Arc<MappingCatalog>, engine: Arc<LocalJobEngine>, result_buffer_capacity: usize) -> Self {
        let context = engine.context().clone();
        let connectors = Arc::new(ConnectorRegistry::with_defaults(context.maps.clone()));
        let planner = Planner::new(catalog.clone(), connectors, context.member_id);
        let engine: Arc<dyn JobEngine> = engine;
        let executor = PlanExecutor::new(
            catalog.clone(),
            engine,
            context.results.clone(),
            context.member_id,
            result_buffer_capacity,
        );
        Self {
            catalog,
            planner,
            executor,
            member_id: context.member_id,
            open_results: DashMap::new(),
        }
    }

    pub async fn execute(&self, sql: &str) -> Result<SqlResponse, AppError> {
        let parsed = parse_statement(sql)?;
        SqlValidator::validate(&parsed)?;
        let kind = parsed.statement.kind_name();
        let plan = self.planner.plan(parsed.statement).await?;
        tracing::debug!("Executing {} plan", kind);

        match self.executor.execute(plan).await? {
            SqlResult::UpdateCount(update_count) => Ok(SqlResponse::UpdateCount { update_count }),
            SqlResult::Rows(result) => {
                let iterator = result.iterator()?;
                let query_id = result.query_id();
                let columns = result.row_metadata().columns.clone();
                self.open_results.insert(
                    query_id,
                    Arc::new(OpenResult {
                        result,
                        iterator: Mutex::new(iterator),
                        last_access: std::sync::Mutex::new(Instant::now()),
                    }),
                );
                Ok(SqlResponse::Rows {
                    query_id: query_id.to_string(),
                    columns,
                })
            }
        }
    }

    /// Fetch up to `max_rows` rows, waiting at most `wait` for the first one.
    /// A finished or failed result is released.
    pub async fn fetch(&self, query_id: QueryId, max_rows: usize, wait: Duration) -> Result<RowPage, AppError> {
        let open = self
            .open_results
            .get(&query_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("Query not found: {}", query_id)))?;
        open.touch();

        let mut rows = Vec::new();
        let mut done = false;
        let outcome = {
            let mut iterator = open.iterator.lock().await;
            let mut poll = iterator.wait_next(wait).await;
            loop {
                match poll {
                    Ok(HasNextImmediately::Yes) => {
                        if let Some(row) = iterator.take_ready() {
                            rows.push(row.to_json());
                        }
                        if rows.len() >= max_rows {
                            break Ok(());
                        }
                    }
                    Ok(HasNextImmediately::Retry) => break Ok(()),
                    Ok(HasNextImmediately::Done) => {
                        done = true;
                        break Ok(());
                    }
                    Err(error) => break Err(error),
                }
                poll = iterator.has_next_immediately();
            }
        };

        open.touch();
        if done || outcome.is_err() {
            self.open_results.remove(&query_id);
        }
        outcome?;
        Ok(RowPage {
            query_id: query_id.to_string(),
            rows,
            done,
        })
    }

    /// Close an open result; its query job is cancelled
    pub fn close(&self, query_id: QueryId) -> Result<(), AppError> {
        let (_, open) = self
            .open_results
            .remove(&query_id)
            .ok_or_else(|| AppError::NotFound(format!("Query not found: {}", query_id)))?;
        open.result.close_on_error(AppError::Execution {
            member_id: self.member_id,
            message: "Query cancelled by user".to_string(),
        });
        tracing::info!("Closed query {}", query_id);
        Ok(())
    }

    /// Close every open result nobody fetched from for `idle_timeout`.
    /// Returns how many were closed.
    pub fn close_idle_results(&self, idle_timeout: Duration) -> usize {
        let expired: Vec<QueryId> = self
            .open_results
            .iter()
            .filter(|entry| entry.value().idle_for() >= idle_timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut closed = 0;
        for query_id in expired {
            let Some((_, open)) = self
                .open_results
                .remove_if(&query_id, |_, open| open.idle_for() >= idle_timeout)
            else {
                continue;
            };
            open.result.close_on_error(AppError::Execution {
                member_id: self.member_id,
                message: format!("Query was idle for more than {} ms", idle_timeout.as_millis()),
            });
            tracing::warn!("Closed idle query {}", query_id);
            closed += 1;
        }
        closed
    }

    /// Periodically close idle results until the service is dropped
    pub fn spawn_idle_result_reaper(self: &Arc<Self>, idle_timeout: Duration) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        let period = (idle_timeout / 4).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.close_idle_results(idle_timeout);
            }
        })
    }

    pub fn open_result_count(&self) -> usize {
        self.open_results.len()
    }

    pub async fn list_mappings(&self) -> Result<Vec<StoredMapping>, AppError> {
        self.catalog.list_mappings().await
    }

    pub async fn get_mapping(&self, name: &str) -> Result<StoredMapping, AppError> {
        self.catalog
            .get_mapping(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Mapping does not exist: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineContext, JobStateSnapshot};
    use crate::storage::SqliteStorage;
    use serde_json::json;

    fn service(rt: &tokio::runtime::Runtime) -> SqlService {
        service_with_engine(rt).0
    }

    fn service_with_engine(rt: &tokio::runtime::Runtime) -> (SqlService, Arc<LocalJobEngine>) {
        let storage = rt.block_on(async { SqliteStorage::new(":memory:").await.unwrap() });
        let catalog = Arc::new(MappingCatalog::new(Arc::new(storage)));
        let context = EngineContext::new(Uuid::new_v4(), Duration::from_millis(5));
        let engine = Arc::new(LocalJobEngine::new(context));
        (SqlService::new(catalog, engine.clone(), 16), engine)
    }

    fn query_id(response: SqlResponse) -> QueryId {
        match response {
            SqlResponse::Rows { query_id, .. } => query_id.parse().unwrap(),
            other => panic!("expected rows, got {:?}", other),
        }
    }

    /// Wait until every query job has released its result
    async fn query_jobs_finished(engine: &LocalJobEngine) -> bool {
        for _ in 0..200 {
            if engine.context().results.is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn avro_record_count(dir: &std::path::Path) -> usize {
        crate::connector::file::list_files(dir, "*.avro")
            .unwrap()
            .into_iter()
            .map(|file| {
                let reader = std::io::BufReader::new(std::fs::File::open(file).unwrap());
                apache_avro::Reader::new(reader).unwrap().count()
            })
            .sum()
    }

    fn update_count(response: SqlResponse) -> i64 {
        match response {
            SqlResponse::UpdateCount { update_count } => update_count,
            other => panic!("expected an update count, got {:?}", other),
        }
    }

    async fn drain(service: &SqlService, query_id: &str) -> Vec<serde_json::Value> {
        let query_id: QueryId = query_id.parse().unwrap();
        let mut rows = Vec::new();
        loop {
            let page = service.fetch(query_id, 2, Duration::from_secs(5)).await.unwrap();
            rows.extend(page.rows);
            if page.done {
                return rows;
            }
        }
    }

    const USERS: &str = "CREATE MAPPING users (id BIGINT EXTERNAL NAME \"__key.id\", name VARCHAR) TYPE imap";
    const TOPIC_USERS: &str = "CREATE MAPPING topic_users (id BIGINT EXTERNAL NAME \"__key.id\", name VARCHAR) TYPE kafka OPTIONS ('topic'='users', 'keyFormat'='json', 'valueFormat'='json')";

    #[test]
    fn test_create_mapping_twice() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt);

        assert_eq!(update_count(rt.block_on(service.execute(USERS)).unwrap()), -1);
        let err = rt.block_on(service.execute(USERS)).unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));

        let sql = USERS.replace("CREATE MAPPING", "CREATE MAPPING IF NOT EXISTS");
        assert_eq!(update_count(rt.block_on(service.execute(&sql)).unwrap()), -1);
        assert_eq!(rt.block_on(service.list_mappings()).unwrap().len(), 1);
    }

    #[test]
    fn test_unsupported_feature_is_rejected_before_planning() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt);

        let err = rt.block_on(service.execute("SELECT * FROM missing LIMIT 1")).unwrap_err();
        match err {
            AppError::Unsupported { message, .. } => assert_eq!(message, "`LIMIT` is not supported"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_insert_then_select_map() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt);

        rt.block_on(async {
            service.execute(USERS).await.unwrap();
            let count = update_count(
                service
                    .execute("INSERT INTO users VALUES (1, 'alice'), (2, 'bob')")
                    .await
                    .unwrap(),
            );
            assert_eq!(count, -1);

            let query_id = match service.execute("SELECT name FROM users WHERE id = 2").await.unwrap() {
                SqlResponse::Rows { query_id, columns } => {
                    assert_eq!(columns.len(), 1);
                    assert_eq!(columns[0].name, "name");
                    query_id
                }
                other => panic!("expected rows, got {:?}", other),
            };
            let rows = drain(&service, &query_id).await;
            assert_eq!(rows, vec![json!({ "name": "bob" })]);
        });
        assert_eq!(service.open_result_count(), 0);
    }

    #[test]
    fn test_fetch_unknown_and_closed_query() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt);

        rt.block_on(async {
            let query_id = match service.execute("SELECT 1").await.unwrap() {
                SqlResponse::Rows { query_id, .. } => query_id.parse::<QueryId>().unwrap(),
                other => panic!("expected rows, got {:?}", other),
            };
            service.close(query_id).unwrap();
            let err = service.fetch(query_id, 10, Duration::from_millis(10)).await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));
            assert!(service.close(query_id).is_err());
        });
    }

    #[test]
    fn test_job_lifecycle_statements() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let service = service(&rt);

        rt.block_on(async {
            service.execute(USERS).await.unwrap();
            service
                .execute("CREATE MAPPING topic_users (id BIGINT EXTERNAL NAME \"__key.id\", name VARCHAR) TYPE kafka OPTIONS ('topic'='users', 'keyFormat'='json', 'valueFormat'='json')")
                .await
                .unwrap();

            let err = service.execute("ALTER JOB mirror SUSPEND").await.unwrap_err();
            assert!(err.to_string().contains("The job 'mirror' doesn't exist"));

            service
                .execute("CREATE JOB mirror AS INSERT INTO users SELECT id, name FROM topic_users")
                .await
                .unwrap();
            assert_eq!(update_count(service.execute("ALTER JOB mirror SUSPEND").await.unwrap()), 0);
            assert_eq!(update_count(service.execute("ALTER JOB mirror RESUME").await.unwrap()), 0);
            assert_eq!(
                update_count(service.execute("CREATE SNAPSHOT first_state FOR JOB mirror").await.unwrap()),
                0
            );

            assert_eq!(
                update_count(service.execute("DROP JOB mirror WITH SNAPSHOT last_state").await.unwrap()),
                -1
            );
            let err = service.execute("DROP JOB mirror").await.unwrap_err();
            assert!(err.to_string().contains("Job doesn't exist or already terminated: mirror"));
            assert_eq!(update_count(service.execute("DROP JOB IF EXISTS mirror").await.unwrap()), -1);

            assert_eq!(update_count(service.execute("DROP SNAPSHOT last_state").await.unwrap()), 0);
            assert!(service.execute("DROP SNAPSHOT last_state").await.is_err());
            assert_eq!(update_count(service.execute("DROP SNAPSHOT IF EXISTS last_state").await.unwrap()), 0);

            assert_eq!(update_count(service.execute("DROP MAPPING IF EXISTS nope").await.unwrap()), -1);
        });
    }

    #[test]
    fn test_close_streaming_query_stops_its_job() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (service, engine) = service_with_engine(&rt);

        rt.block_on(async {
            service.execute(TOPIC_USERS).await.unwrap();
            service
                .execute("INSERT INTO topic_users VALUES (1, 'alice')")
                .await
                .unwrap();

            let query_id = query_id(service.execute("SELECT name FROM topic_users").await.unwrap());
            let page = service.fetch(query_id, 10, Duration::from_secs(5)).await.unwrap();
            assert_eq!(page.rows, vec![json!({ "name": "alice" })]);
            assert!(!page.done);
            assert_eq!(engine.context().results.len(), 1);

            service.close(query_id).unwrap();
            assert!(query_jobs_finished(&engine).await);
            let err = service.fetch(query_id, 10, Duration::from_millis(10)).await.unwrap_err();
            assert!(matches!(err, AppError::NotFound(_)));
        });
        assert_eq!(service.open_result_count(), 0);
    }

    #[test]
    fn test_idle_results_are_closed() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (service, engine) = service_with_engine(&rt);

        rt.block_on(async {
            service.execute(TOPIC_USERS).await.unwrap();
            let query_id = query_id(service.execute("SELECT * FROM topic_users").await.unwrap());

            assert_eq!(service.close_idle_results(Duration::from_secs(60)), 0);
            assert_eq!(service.open_result_count(), 1);

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert_eq!(service.close_idle_results(Duration::from_millis(10)), 1);
            assert_eq!(service.open_result_count(), 0);
            assert!(query_jobs_finished(&engine).await);
            assert!(service.fetch(query_id, 1, Duration::from_millis(10)).await.is_err());
        });
    }

    #[test]
    fn test_idle_result_reaper() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (service, engine) = service_with_engine(&rt);
        let service = Arc::new(service);

        rt.block_on(async {
            service.execute(TOPIC_USERS).await.unwrap();
            service.execute("SELECT * FROM topic_users").await.unwrap();
            let reaper = service.spawn_idle_result_reaper(Duration::from_millis(50));

            let mut open = service.open_result_count();
            for _ in 0..100 {
                if open == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                open = service.open_result_count();
            }
            assert_eq!(open, 0);
            assert!(query_jobs_finished(&engine).await);
            reaper.abort();
        });
    }

    #[test]
    fn test_streaming_insert_runs_as_named_job() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (service, engine) = service_with_engine(&rt);

        rt.block_on(async {
            service.execute(USERS).await.unwrap();
            service.execute(TOPIC_USERS).await.unwrap();
            service
                .execute("INSERT INTO users SELECT id, name FROM topic_users")
                .await
                .unwrap();

            let names = engine.job_names();
            assert_eq!(names.len(), 1);
            assert!(names[0].starts_with("insert_"));

            let drop = format!("DROP JOB {}", names[0]);
            assert_eq!(update_count(service.execute(&drop).await.unwrap()), -1);
            let drop_if_exists = format!("DROP JOB IF EXISTS {}", names[0]);
            assert_eq!(update_count(service.execute(&drop_if_exists).await.unwrap()), -1);
        });
    }

    #[test]
    fn test_streaming_avro_sink_keeps_snapshotted_rows() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (service, engine) = service_with_engine(&rt);
        let dir = tempfile::tempdir().unwrap();

        rt.block_on(async {
            service.execute(TOPIC_USERS).await.unwrap();
            service
                .execute(&format!(
                    "CREATE MAPPING archive (id BIGINT, name VARCHAR) TYPE file OPTIONS ('format'='avro', 'path'='{}')",
                    dir.path().display()
                ))
                .await
                .unwrap();
            service
                .execute("INSERT INTO topic_users VALUES (1, 'alice'), (2, 'bob'), (3, 'carol')")
                .await
                .unwrap();
            service
                .execute("CREATE JOB archiver AS INSERT INTO archive SELECT id, name FROM topic_users")
                .await
                .unwrap();

            let mut processed = 0;
            for _ in 0..200 {
                service
                    .execute("CREATE SNAPSHOT progress FOR JOB archiver")
                    .await
                    .unwrap();
                processed = engine.get_snapshot("progress").unwrap().processed_rows();
                if processed == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(processed, 3);
            // The job is still running; a snapshot flushes what it counts
            assert_eq!(avro_record_count(dir.path()), 3);

            service
                .execute("DROP JOB archiver WITH SNAPSHOT final_state")
                .await
                .unwrap();
            assert_eq!(engine.get_snapshot("final_state").unwrap().processed_rows(), 3);
            assert_eq!(avro_record_count(dir.path()), 3);
        });
    }
}
