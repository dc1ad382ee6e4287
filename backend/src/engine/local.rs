// Local Job Engine
//
// Every job runs as one tokio task. Control requests reach the task over a
// command channel and are handled between rows, so a snapshot exported while
// cancelling reflects exactly the rows written before the cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::{
    Dag, EngineContext, Job, JobEngine, JobStateSnapshot, JobStatus, SinkProcessor, SourcePoll,
    JOB_CANCELLED, SINK_FLUSH_INTERVAL,
};
use crate::api::middleware::AppError;
use crate::models::{JobConfig, Row};

type SnapshotRegistry = DashMap<String, Arc<LocalSnapshot>>;

pub struct LocalJobEngine {
    context: EngineContext,
    jobs: DashMap<String, Arc<LocalJob>>,
    snapshots: Arc<SnapshotRegistry>,
}

impl LocalJobEngine {
    pub fn new(context: EngineContext) -> Self {
        Self {
            context,
            jobs: DashMap::new(),
            snapshots: Arc::new(DashMap::new()),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Names of all named jobs, terminated ones included, sorted
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    fn start(&self, dag: Dag, config: JobConfig) -> Result<Arc<LocalJob>, AppError> {
        let resume_offset = match &config.initial_snapshot_name {
            Some(name) => self
                .snapshots
                .get(name)
                .map(|snapshot| snapshot.processed_rows)
                .ok_or_else(|| AppError::NotFound(format!("The snapshot doesn't exist: {}", name)))?,
            None => 0,
        };

        let id = Uuid::new_v4();
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (state, state_receiver) = watch::channel(JobState {
            status: JobStatus::Starting,
            error: None,
        });
        let job = Arc::new(LocalJob {
            id,
            name: config.name.clone(),
            commands,
            state: state_receiver,
        });

        tracing::info!(
            "Starting job {} ({}), resuming after {} rows",
            config.name.as_deref().unwrap_or("anonymous"),
            id,
            resume_offset
        );

        let runner = JobRunner {
            id,
            name: config.name,
            dag,
            context: self.context.clone(),
            snapshots: self.snapshots.clone(),
            commands: command_receiver,
            commands_open: true,
            state,
            suspended: false,
            resume_offset,
        };
        tokio::spawn(runner.run());
        Ok(job)
    }

    fn submit_named(
        &self,
        name: &str,
        dag: Dag,
        config: JobConfig,
        reuse_active: bool,
    ) -> Result<Arc<dyn Job>, AppError> {
        match self.jobs.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().status().is_terminal() {
                    if reuse_active {
                        let existing: Arc<dyn Job> = occupied.get().clone();
                        return Ok(existing);
                    }
                    return Err(AppError::AlreadyExists(format!(
                        "Another active job with equal name ({}) exists",
                        name
                    )));
                }
                let job = self.start(dag, config)?;
                occupied.insert(job.clone());
                Ok(job)
            }
            Entry::Vacant(vacant) => {
                let job = self.start(dag, config)?;
                vacant.insert(job.clone());
                Ok(job)
            }
        }
    }
}

impl JobEngine for LocalJobEngine {
    fn submit(&self, dag: Dag, config: JobConfig) -> Result<Arc<dyn Job>, AppError> {
        match config.name.clone() {
            Some(name) => self.submit_named(&name, dag, config, false),
            None => Ok(self.start(dag, config)?),
        }
    }

    fn submit_if_absent(&self, dag: Dag, config: JobConfig) -> Result<Arc<dyn Job>, AppError> {
        match config.name.clone() {
            Some(name) => self.submit_named(&name, dag, config, true),
            None => Ok(self.start(dag, config)?),
        }
    }

    fn get_job(&self, name: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(name).map(|job| {
            let job: Arc<dyn Job> = job.value().clone();
            job
        })
    }

    fn get_snapshot(&self, name: &str) -> Option<Arc<dyn JobStateSnapshot>> {
        self.snapshots.get(name).map(|snapshot| {
            let snapshot: Arc<dyn JobStateSnapshot> = snapshot.value().clone();
            snapshot
        })
    }
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    error: Option<AppError>,
}

enum JobCommand {
    Suspend,
    Resume,
    Restart,
    Cancel,
    ExportSnapshot {
        name: String,
        cancel: bool,
        reply: oneshot::Sender<Arc<LocalSnapshot>>,
    },
}

struct LocalJob {
    id: Uuid,
    name: Option<String>,
    commands: mpsc::UnboundedSender<JobCommand>,
    state: watch::Receiver<JobState>,
}

impl LocalJob {
    fn send(&self, command: JobCommand) -> Result<(), AppError> {
        if self.status().is_terminal() {
            return Err(self.terminated());
        }
        self.commands.send(command).map_err(|_| self.terminated())
    }

    fn terminated(&self) -> AppError {
        AppError::IllegalState(format!("Job already terminated: {}", self.display_name()))
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    async fn request_snapshot(&self, name: &str, cancel: bool) -> Result<Arc<dyn JobStateSnapshot>, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(JobCommand::ExportSnapshot {
            name: name.to_string(),
            cancel,
            reply,
        })?;
        let snapshot: Arc<dyn JobStateSnapshot> = response.await.map_err(|_| self.terminated())?;
        Ok(snapshot)
    }
}

#[async_trait]
impl Job for LocalJob {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn status(&self) -> JobStatus {
        self.state.borrow().status
    }

    fn suspend(&self) -> Result<(), AppError> {
        self.send(JobCommand::Suspend)
    }

    fn resume(&self) -> Result<(), AppError> {
        self.send(JobCommand::Resume)
    }

    fn restart(&self) -> Result<(), AppError> {
        self.send(JobCommand::Restart)
    }

    fn cancel(&self) -> Result<(), AppError> {
        self.send(JobCommand::Cancel)
    }

    async fn export_snapshot(&self, name: &str) -> Result<Arc<dyn JobStateSnapshot>, AppError> {
        self.request_snapshot(name, false).await
    }

    async fn cancel_and_export_snapshot(&self, name: &str) -> Result<Arc<dyn JobStateSnapshot>, AppError> {
        self.request_snapshot(name, true).await
    }

    async fn join(&self) -> Result<(), AppError> {
        let mut state = self.state.clone();
        let final_state = state
            .wait_for(|s| s.status.is_terminal())
            .await
            .map_err(|_| AppError::Internal(format!("Job {} stopped reporting", self.display_name())))?
            .clone();
        match final_state.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

pub struct LocalSnapshot {
    name: String,
    job_name: String,
    processed_rows: u64,
    created_at: DateTime<Utc>,
    registry: Weak<SnapshotRegistry>,
}

impl LocalSnapshot {
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl JobStateSnapshot for LocalSnapshot {
    fn name(&self) -> &str {
        &self.name
    }

    fn job_name(&self) -> &str {
        &self.job_name
    }

    fn processed_rows(&self) -> u64 {
        self.processed_rows
    }

    fn destroy(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.name);
            tracing::info!("Destroyed snapshot {}", self.name);
        }
    }
}

enum Control {
    Proceed,
    Restart,
    Cancel,
}

enum Event {
    Written(Result<(), AppError>),
    Command(Option<JobCommand>),
    Tick,
}

struct JobRunner {
    id: Uuid,
    name: Option<String>,
    dag: Dag,
    context: EngineContext,
    snapshots: Arc<SnapshotRegistry>,
    commands: mpsc::UnboundedReceiver<JobCommand>,
    commands_open: bool,
    state: watch::Sender<JobState>,
    suspended: bool,
    resume_offset: u64,
}

impl JobRunner {
    async fn run(mut self) {
        let outcome = self.execute().await;
        let (status, error) = match outcome {
            Ok(()) => (JobStatus::Completed, None),
            Err(error) => {
                tracing::warn!("Job {} failed: {}", self.display_name(), error);
                (JobStatus::Failed, Some(error))
            }
        };
        tracing::info!("Job {} finished with status {}", self.display_name(), status);
        self.state.send_replace(JobState { status, error });
    }

    async fn execute(&mut self) -> Result<(), AppError> {
        let mut sink = self.dag.sink.open(&self.context)?;
        let result = self.pump(sink.as_mut()).await;
        let completion = sink.complete(&result).await;
        result.and(completion)
    }

    async fn pump(&mut self, sink: &mut dyn SinkProcessor) -> Result<(), AppError> {
        'restart: loop {
            let mut source = self.dag.source.open(&self.context)?;
            let mut processed: u64 = 0;
            let mut pending: Option<Row> = None;
            let mut last_flush = Instant::now();
            self.set_status(if self.suspended { JobStatus::Suspended } else { JobStatus::Running });

            loop {
                while let Some(command) = self.next_command().await {
                    match self.handle(sink, command, processed).await? {
                        Control::Proceed => {}
                        Control::Restart => {
                            tracing::info!("Restarting job {}", self.display_name());
                            continue 'restart;
                        }
                        Control::Cancel => return Err(self.cancelled()),
                    }
                }
                if sink.is_closed() {
                    return Err(self.cancelled());
                }

                let row = match pending.take() {
                    Some(row) => row,
                    None => match source.poll()? {
                        SourcePoll::Row(row) => {
                            if processed < self.resume_offset {
                                processed += 1;
                                continue;
                            }
                            row
                        }
                        SourcePoll::Idle => {
                            let idle = self.context.idle_poll;
                            let commands_open = self.commands_open;
                            let event = tokio::select! {
                                _ = tokio::time::sleep(idle) => Event::Tick,
                                command = self.commands.recv(), if commands_open => Event::Command(command),
                            };
                            match event {
                                Event::Command(command) => match self.on_command(sink, command, processed).await? {
                                    Control::Proceed => {}
                                    Control::Restart => continue 'restart,
                                    Control::Cancel => return Err(self.cancelled()),
                                },
                                _ => Self::flush_if_due(sink, &mut last_flush).await?,
                            }
                            continue;
                        }
                        SourcePoll::Done => {
                            self.set_status(JobStatus::Completing);
                            return Ok(());
                        }
                    },
                };

                let commands_open = self.commands_open;
                let event = tokio::select! {
                    written = sink.write(row.clone()) => Event::Written(written),
                    command = self.commands.recv(), if commands_open => Event::Command(command),
                };
                match event {
                    Event::Written(Ok(())) => {
                        processed += 1;
                        Self::flush_if_due(sink, &mut last_flush).await?;
                    }
                    Event::Written(Err(error)) => {
                        if sink.is_closed() {
                            return Err(self.cancelled());
                        }
                        return Err(error);
                    }
                    Event::Command(command) => {
                        pending = Some(row);
                        match self.on_command(sink, command, processed).await? {
                            Control::Proceed => {}
                            Control::Restart => continue 'restart,
                            Control::Cancel => return Err(self.cancelled()),
                        }
                    }
                    Event::Tick => {}
                }
            }
        }
    }

    /// Next queued command; waits while suspended
    async fn next_command(&mut self) -> Option<JobCommand> {
        if !self.commands_open {
            return None;
        }
        if self.suspended {
            let command = self.commands.recv().await;
            if command.is_none() {
                self.commands_open = false;
                self.suspended = false;
            }
            return command;
        }
        self.commands.try_recv().ok()
    }

    async fn flush_if_due(sink: &mut dyn SinkProcessor, last_flush: &mut Instant) -> Result<(), AppError> {
        if last_flush.elapsed() >= SINK_FLUSH_INTERVAL {
            sink.flush().await?;
            *last_flush = Instant::now();
        }
        Ok(())
    }

    async fn on_command(
        &mut self,
        sink: &mut dyn SinkProcessor,
        command: Option<JobCommand>,
        processed: u64,
    ) -> Result<Control, AppError> {
        match command {
            Some(command) => self.handle(sink, command, processed).await,
            None => {
                self.commands_open = false;
                Ok(Control::Proceed)
            }
        }
    }

    async fn handle(
        &mut self,
        sink: &mut dyn SinkProcessor,
        command: JobCommand,
        processed: u64,
    ) -> Result<Control, AppError> {
        let control = match command {
            JobCommand::Suspend => {
                self.suspended = true;
                self.set_status(JobStatus::Suspended);
                Control::Proceed
            }
            JobCommand::Resume => {
                self.suspended = false;
                self.set_status(JobStatus::Running);
                Control::Proceed
            }
            JobCommand::Restart => Control::Restart,
            JobCommand::Cancel => Control::Cancel,
            JobCommand::ExportSnapshot { name, cancel, reply } => {
                // Rows counted by the snapshot must be durable in the sink
                sink.flush().await?;
                let snapshot = self.export_snapshot(&name, processed);
                let _ = reply.send(snapshot);
                if cancel {
                    Control::Cancel
                } else {
                    Control::Proceed
                }
            }
        };
        Ok(control)
    }

    fn export_snapshot(&self, name: &str, processed: u64) -> Arc<LocalSnapshot> {
        let snapshot = Arc::new(LocalSnapshot {
            name: name.to_string(),
            job_name: self.display_name(),
            processed_rows: processed,
            created_at: Utc::now(),
            registry: Arc::downgrade(&self.snapshots),
        });
        self.snapshots.insert(name.to_string(), snapshot.clone());
        tracing::info!(
            "Exported snapshot {} of job {} at {} rows",
            name,
            self.display_name(),
            processed
        );
        snapshot
    }

    fn set_status(&self, status: JobStatus) {
        self.state.send_modify(|state| state.status = status);
    }

    fn cancelled(&self) -> AppError {
        AppError::Execution {
            member_id: self.context.member_id,
            message: JOB_CANCELLED.to_string(),
        }
    }

    fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}
