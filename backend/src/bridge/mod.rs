// Query Result Bridge
//
// Rows produced by a running job are handed to a synchronous consumer through
// a bounded channel. The producer side is async and awaits free capacity; the
// consumer side blocks or polls. Closing the result releases a blocked
// producer.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::models::{QueryId, Row, RowMetadata, SqlRow};

fn lock_poisoned<T>(_: T) -> AppError {
    AppError::Internal("Query result lock poisoned".to_string())
}

fn closed_error() -> AppError {
    AppError::IllegalState("Query result closed".to_string())
}

/// Producer half of a query result
pub struct QueryResultProducer {
    member_id: Uuid,
    sender: Mutex<Option<mpsc::Sender<Row>>>,
    receiver: Mutex<Option<mpsc::Receiver<Row>>>,
    error: Mutex<Option<AppError>>,
    closed: watch::Sender<bool>,
}

impl QueryResultProducer {
    pub fn new(member_id: Uuid, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (closed, _) = watch::channel(false);
        Self {
            member_id,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            error: Mutex::new(None),
            closed,
        }
    }

    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    /// Deliver one row, waiting for buffer space. Fails once the result is
    /// closed or already completed.
    pub async fn push(&self, row: Row) -> Result<(), AppError> {
        let sender = self.sender.lock().map_err(lock_poisoned)?.clone();
        let sender = sender.ok_or_else(|| {
            AppError::IllegalState("Query result already completed".to_string())
        })?;

        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(closed_error());
        }

        tokio::select! {
            sent = sender.send(row) => sent.map_err(|_| closed_error()),
            _ = async { let _ = closed.wait_for(|c| *c).await; } => Err(closed_error()),
        }
    }

    /// Signal that no more rows will be pushed
    pub fn done(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
    }

    /// Record a failure; the consumer sees it after the buffered rows
    pub fn on_error(&self, error: AppError) {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.done();
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn take_receiver(&self) -> Result<Option<mpsc::Receiver<Row>>, AppError> {
        Ok(self.receiver.lock().map_err(lock_poisoned)?.take())
    }

    fn take_error(&self) -> Option<AppError> {
        self.error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Outcome of a non-blocking poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HasNextImmediately {
    /// A row is ready
    Yes,
    /// Nothing buffered yet, more may follow
    Retry,
    /// The result is exhausted
    Done,
}

/// Consumer half of a query result
pub struct QueryResultIterator {
    producer: Arc<QueryResultProducer>,
    receiver: mpsc::Receiver<Row>,
    metadata: Arc<RowMetadata>,
    peeked: Option<Row>,
    finished: bool,
}

impl QueryResultIterator {
    /// Block until a row is available or the result ends.
    ///
    /// Parks the calling thread, so it must not run on an async worker
    /// thread; tokio panics if it does. Async callers use `wait_next` and
    /// `has_next_immediately`, or move the iteration into
    /// `tokio::task::spawn_blocking`.
    pub fn has_next(&mut self) -> Result<bool, AppError> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }
        match self.receiver.blocking_recv() {
            Some(row) => {
                self.peeked = Some(row);
                Ok(true)
            }
            None => self.finish().map(|_| false),
        }
    }

    pub fn has_next_immediately(&mut self) -> Result<HasNextImmediately, AppError> {
        if self.peeked.is_some() {
            return Ok(HasNextImmediately::Yes);
        }
        if self.finished {
            return Ok(HasNextImmediately::Done);
        }
        match self.receiver.try_recv() {
            Ok(row) => {
                self.peeked = Some(row);
                Ok(HasNextImmediately::Yes)
            }
            Err(TryRecvError::Empty) => Ok(HasNextImmediately::Retry),
            Err(TryRecvError::Disconnected) => {
                self.finish().map(|_| HasNextImmediately::Done)
            }
        }
    }

    /// Async variant of `has_next` bounded by `wait`
    pub async fn wait_next(&mut self, wait: Duration) -> Result<HasNextImmediately, AppError> {
        if self.peeked.is_some() {
            return Ok(HasNextImmediately::Yes);
        }
        if self.finished {
            return Ok(HasNextImmediately::Done);
        }
        match tokio::time::timeout(wait, self.receiver.recv()).await {
            Ok(Some(row)) => {
                self.peeked = Some(row);
                Ok(HasNextImmediately::Yes)
            }
            Ok(None) => self.finish().map(|_| HasNextImmediately::Done),
            Err(_) => Ok(HasNextImmediately::Retry),
        }
    }

    /// Take the row made ready by a previous poll
    pub fn take_ready(&mut self) -> Option<SqlRow> {
        self.peeked
            .take()
            .map(|values| SqlRow::new(self.metadata.clone(), values))
    }

    pub fn row_metadata(&self) -> &Arc<RowMetadata> {
        &self.metadata
    }

    fn finish(&mut self) -> Result<(), AppError> {
        self.finished = true;
        match self.producer.take_error() {
            Some(error) => Err(error.into_public(self.producer.member_id())),
            None => Ok(()),
        }
    }
}

/// Blocking iteration; the same thread restrictions as `has_next` apply
impl Iterator for QueryResultIterator {
    type Item = Result<SqlRow, AppError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => self.take_ready().map(Ok),
            Ok(false) => None,
            Err(error) => Some(Err(error)),
        }
    }
}

impl Drop for QueryResultIterator {
    fn drop(&mut self) {
        self.producer.close();
    }
}

/// Row set returned to a client
pub struct RowsResult {
    query_id: QueryId,
    metadata: Arc<RowMetadata>,
    producer: Arc<QueryResultProducer>,
    iterator_requested: AtomicBool,
}

impl RowsResult {
    pub fn new(query_id: QueryId, metadata: Arc<RowMetadata>, producer: Arc<QueryResultProducer>) -> Self {
        Self {
            query_id,
            metadata,
            producer,
            iterator_requested: AtomicBool::new(false),
        }
    }

    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn row_metadata(&self) -> &Arc<RowMetadata> {
        &self.metadata
    }

    pub fn iterator(&self) -> Result<QueryResultIterator, AppError> {
        if self.iterator_requested.swap(true, Ordering::SeqCst) {
            return Err(AppError::IllegalState(
                "Iterator can be requested only once".to_string(),
            ));
        }
        let receiver = self.producer.take_receiver()?.ok_or_else(|| {
            AppError::IllegalState("Iterator can be requested only once".to_string())
        })?;
        Ok(QueryResultIterator {
            producer: self.producer.clone(),
            receiver,
            metadata: self.metadata.clone(),
            peeked: None,
            finished: false,
        })
    }

    pub fn update_count(&self) -> Result<i64, AppError> {
        Err(AppError::IllegalState(
            "This result contains rows, not an update count".to_string(),
        ))
    }

    pub fn close(&self) {
        self.producer.close();
    }

    /// Fail the producer and close the result
    pub fn close_on_error(&self, error: AppError) {
        self.producer.on_error(error);
        self.close();
    }
}

/// Result of one SQL statement
pub enum SqlResult {
    UpdateCount(i64),
    Rows(RowsResult),
}

impl SqlResult {
    pub fn is_row_set(&self) -> bool {
        matches!(self, SqlResult::Rows(_))
    }

    pub fn update_count(&self) -> Result<i64, AppError> {
        match self {
            SqlResult::UpdateCount(count) => Ok(*count),
            SqlResult::Rows(rows) => rows.update_count(),
        }
    }
}

impl std::fmt::Debug for SqlResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlResult::UpdateCount(count) => f.debug_tuple("UpdateCount").field(count).finish(),
            SqlResult::Rows(rows) => f.debug_tuple("Rows").field(&rows.query_id).finish(),
        }
    }
}

/// Producers of in-flight queries, looked up by the job sinks
#[derive(Default)]
pub struct QueryResultRegistry {
    producers: DashMap<QueryId, Arc<QueryResultProducer>>,
}

impl QueryResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, query_id: QueryId, producer: Arc<QueryResultProducer>) -> Result<(), AppError> {
        match self.producers.entry(query_id) {
            Entry::Occupied(_) => Err(AppError::IllegalState(format!(
                "Result already registered for query {}",
                query_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(producer);
                Ok(())
            }
        }
    }

    pub fn get(&self, query_id: &QueryId) -> Option<Arc<QueryResultProducer>> {
        self.producers.get(query_id).map(|p| p.value().clone())
    }

    pub fn remove(&self, query_id: &QueryId) -> Option<Arc<QueryResultProducer>> {
        self.producers.remove(query_id).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnMetadata, ScalarType, Value};
    use tokio::runtime::Runtime;

    fn rows_result(capacity: usize) -> (RowsResult, Arc<QueryResultProducer>) {
        let member = Uuid::new_v4();
        let producer = Arc::new(QueryResultProducer::new(member, capacity));
        let metadata = Arc::new(RowMetadata::new(vec![ColumnMetadata {
            name: "v".into(),
            scalar_type: ScalarType::BigInt,
        }]));
        let result = RowsResult::new(QueryId::new(member), metadata, producer.clone());
        (result, producer)
    }

    #[test]
    fn test_rows_then_end() {
        let rt = Runtime::new().unwrap();
        let (result, producer) = rows_result(2);
        let mut iterator = result.iterator().unwrap();

        let task = rt.spawn(async move {
            for i in 0..5 {
                producer.push(vec![Value::BigInt(i)]).await.unwrap();
            }
            producer.done();
        });

        let values: Vec<i64> = iterator
            .by_ref()
            .map(|row| row.unwrap().get(0).and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(!iterator.has_next().unwrap());
        rt.block_on(task).unwrap();
    }

    #[test]
    fn test_error_reported_after_rows() {
        let rt = Runtime::new().unwrap();
        let (result, producer) = rows_result(4);
        let mut iterator = result.iterator().unwrap();

        rt.block_on(async {
            producer.push(vec![Value::BigInt(1)]).await.unwrap();
            producer.on_error(AppError::Io("disk gone".into()));
        });

        assert!(iterator.next().unwrap().is_ok());
        match iterator.next() {
            Some(Err(AppError::Execution { member_id, message })) => {
                assert_eq!(member_id, producer.member_id());
                assert!(message.contains("disk gone"));
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.map(|row| row.values().to_vec()))),
        }
        assert!(iterator.next().is_none());
    }

    #[test]
    fn test_iterator_requested_once() {
        let rt = Runtime::new().unwrap();
        let (result, producer) = rows_result(4);
        let mut first = result.iterator().unwrap();

        match result.iterator() {
            Err(AppError::IllegalState(message)) => {
                assert_eq!(message, "Iterator can be requested only once")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("second iterator must be refused"),
        }

        rt.block_on(async {
            producer.push(vec![Value::BigInt(7)]).await.unwrap();
            producer.done();
        });
        let row = first.next().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::BigInt(7)));
        assert!(result.update_count().is_err());
    }

    #[test]
    fn test_blocking_iteration_on_a_blocking_thread() {
        let rt = Runtime::new().unwrap();
        let (result, producer) = rows_result(1);
        let iterator = result.iterator().unwrap();

        let values = rt.block_on(async move {
            let consumer = tokio::task::spawn_blocking(move || {
                iterator
                    .map(|row| row.unwrap().get(0).and_then(Value::as_i64).unwrap())
                    .collect::<Vec<_>>()
            });
            for i in 0..3 {
                producer.push(vec![Value::BigInt(i)]).await.unwrap();
            }
            producer.done();
            consumer.await.unwrap()
        });
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[test]
    fn test_has_next_immediately() {
        let rt = Runtime::new().unwrap();
        let (result, producer) = rows_result(4);
        let mut iterator = result.iterator().unwrap();

        assert_eq!(iterator.has_next_immediately().unwrap(), HasNextImmediately::Retry);
        rt.block_on(producer.push(vec![Value::BigInt(1)])).unwrap();
        assert_eq!(iterator.has_next_immediately().unwrap(), HasNextImmediately::Yes);
        assert!(iterator.take_ready().is_some());
        producer.done();
        assert_eq!(iterator.has_next_immediately().unwrap(), HasNextImmediately::Done);
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let rt = Runtime::new().unwrap();
        let (result, producer) = rows_result(1);
        let _iterator = result.iterator().unwrap();

        rt.block_on(async {
            producer.push(vec![Value::BigInt(1)]).await.unwrap();
            let blocked = {
                let producer = producer.clone();
                tokio::spawn(async move { producer.push(vec![Value::BigInt(2)]).await })
            };
            tokio::time::sleep(Duration::from_millis(20)).await;
            result.close();
            let outcome = blocked.await.unwrap();
            assert!(matches!(outcome, Err(AppError::IllegalState(_))));
        });
        assert!(producer.is_closed());
    }

    #[test]
    fn test_registry_rejects_duplicate_query_id() {
        let registry = QueryResultRegistry::new();
        let member = Uuid::new_v4();
        let query_id = QueryId::new(member);
        registry
            .register(query_id, Arc::new(QueryResultProducer::new(member, 1)))
            .unwrap();
        let err = registry
            .register(query_id, Arc::new(QueryResultProducer::new(member, 1)))
            .unwrap_err();
        assert!(matches!(err, AppError::IllegalState(_)));
        assert!(registry.get(&query_id).is_some());
        registry.remove(&query_id);
        assert!(registry.is_empty());
    }
}
