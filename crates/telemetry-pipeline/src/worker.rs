//! The single worker that owns the queue store.
//!
//! Every mutation of the store happens inside one spawned task that drains a
//! bounded mailbox strictly in FIFO order, finishing each command (including
//! its store and network I/O) before taking the next one.
//!
//! ```text
//! Dispatcher ──try_send──▶ ┌──────────┐     ┌────────────┐
//!                          │ mailbox  │────▶│   Worker   │──▶ QueueStore
//! flush timer ──send────▶  └──────────┘     │  (1 task)  │──▶ Flusher ──▶ Submitter
//!                                            └────────────┘
//! ```
//!
//! Scheduled flushes come from a timer task that only posts
//! `Command::Flush { force: false }` into the same mailbox. The worker
//! publishes the next due instant after every flush attempt and the timer
//! sleeps until it.

use crate::backoff::Backoff;
use crate::flush::{FlushReport, Flusher};
use crate::stats::PipelineStats;
use crate::submitter::Submitter;
use crate::{PipelineError, PipelineResult};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_config_and_utils::PipelineConfig;
use telemetry_database::{NewRecord, QueueStore, Stream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Floor for the scheduled flush interval.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// A unit of work for the worker.
#[derive(Debug)]
pub enum Command {
    /// Persist one record.
    Enqueue(NewRecord),
    /// Run a flush cycle. Non-forced flushes are skipped while a backoff
    /// window is open.
    Flush {
        force: bool,
        reply: Option<oneshot::Sender<FlushReport>>,
    },
    /// Delete every stored record for a token, in every stream.
    ClearToken { token: String },
    /// Stop after the commands already ahead of this one.
    Shutdown,
}

impl Command {
    /// Short name for logs; never includes payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Enqueue(_) => "enqueue",
            Self::Flush { .. } => "flush",
            Self::ClearToken { .. } => "clear_token",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Worker lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Terminated,
}

/// When the next scheduled flush is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub next_due: Instant,
    pub interval: Duration,
}

/// Everything a worker needs to start.
#[derive(Clone)]
pub struct WorkerSpec {
    pub db_path: PathBuf,
    pub config: Arc<PipelineConfig>,
    pub submitter: Arc<dyn Submitter>,
    pub stats: Arc<PipelineStats>,
}

/// Live binding to one running worker task.
pub struct WorkerHandle {
    sender: mpsc::Sender<Command>,
    state: watch::Receiver<WorkerState>,
    schedule: watch::Receiver<Schedule>,
    join: JoinHandle<()>,
    stats: Arc<PipelineStats>,
}

impl WorkerHandle {
    /// Spawn a worker on `runtime`. The store is opened inside the task, so
    /// this never blocks.
    ///
    /// Expects a validated config; a zero mailbox capacity or flush interval
    /// is raised to the smallest workable value rather than panicking or
    /// spinning the timer.
    pub fn spawn(runtime: &Handle, spec: WorkerSpec) -> Self {
        let (sender, receiver) = mpsc::channel(spec.config.mailbox_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);

        let interval = spec.config.flush_interval().max(MIN_FLUSH_INTERVAL);
        let (schedule_tx, schedule_rx) = watch::channel(Schedule {
            next_due: Instant::now() + interval,
            interval,
        });

        let timer = runtime.spawn(run_timer(sender.downgrade(), schedule_rx.clone()));
        let stats = spec.stats.clone();
        let worker = Worker {
            backoff: Backoff::new(interval, spec.config.max_backoff()),
            flusher: Flusher::new(spec.config.clone(), spec.submitter, spec.stats.clone()),
            config: spec.config,
            stats: spec.stats,
            state: state_tx,
            schedule: schedule_tx,
        };
        let join = runtime.spawn(worker.run(spec.db_path, receiver, timer));

        Self {
            sender,
            state: state_rx,
            schedule: schedule_rx,
            join,
            stats,
        }
    }

    pub fn sender(&self) -> &mpsc::Sender<Command> {
        &self.sender
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn schedule(&self) -> Schedule {
        *self.schedule.borrow()
    }

    /// A receiver that follows the worker's lifecycle state.
    pub fn state_watch(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Handle that can abort the worker task without owning it.
    pub fn abort_handle(&self) -> AbortHandle {
        self.join.abort_handle()
    }

    /// Whether the worker can still take commands.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed() && !self.join.is_finished() && self.state() != WorkerState::Terminated
    }

    /// Post `Shutdown` and wait for the worker to terminate.
    ///
    /// # Drain rules
    ///
    /// - Commands already in the mailbox ahead of `Shutdown` run to
    ///   completion, including any in-flight submission.
    /// - Commands that land behind `Shutdown` are dropped and counted.
    /// - `timeout` covers both posting `Shutdown` into a full mailbox and the
    ///   drain itself.
    ///
    /// # Errors
    ///
    /// - `ShutdownTimeout` if the worker is still running after `timeout`.
    ///   The task is aborted and awaited before returning, and whatever
    ///   was still in the mailbox is counted as dropped. Records the worker
    ///   had not yet deleted stay in the store.
    /// - `WorkerPanicked` if the worker task panicked.
    pub async fn shutdown(self, timeout: Duration) -> PipelineResult<()> {
        let WorkerHandle {
            sender,
            mut join,
            stats,
            ..
        } = self;

        let drained = tokio::time::timeout(timeout, async {
            // An already-closed mailbox means the worker is on its way out.
            let _ = sender.send(Command::Shutdown).await;
            (&mut join).await
        })
        .await;

        match drained {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_panic() => Err(PipelineError::WorkerPanicked(e.to_string())),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                let pending = sender.max_capacity() - sender.capacity();
                join.abort();
                // Wait for the abort to land so the store is released before
                // the caller can start another worker.
                let _ = join.await;
                if pending > 0 {
                    stats.record_dropped(pending as u64);
                }
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    pending,
                    "Worker did not drain in time, aborted"
                );
                Err(PipelineError::ShutdownTimeout(timeout))
            }
        }
    }
}

/// Posts scheduled flushes. Holds only a weak sender so it never keeps the
/// mailbox open on its own.
async fn run_timer(sender: mpsc::WeakSender<Command>, mut schedule: watch::Receiver<Schedule>) {
    loop {
        let due = schedule.borrow_and_update().next_due;
        tokio::select! {
            _ = tokio::time::sleep_until(due) => {
                let Some(sender) = sender.upgrade() else { break };
                if sender.send(Command::Flush { force: false, reply: None }).await.is_err() {
                    break;
                }
                drop(sender);
                // The worker republishes the schedule after handling the flush.
                if schedule.changed().await.is_err() {
                    break;
                }
            }
            changed = schedule.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Flush timer stopped");
}

struct Worker {
    config: Arc<PipelineConfig>,
    stats: Arc<PipelineStats>,
    flusher: Flusher,
    backoff: Backoff,
    state: watch::Sender<WorkerState>,
    schedule: watch::Sender<Schedule>,
}

impl Worker {
    async fn run(
        mut self,
        db_path: PathBuf,
        mut receiver: mpsc::Receiver<Command>,
        timer: JoinHandle<()>,
    ) {
        let store = match QueueStore::open(&db_path, self.config.max_rows_per_stream).await {
            Ok(store) => store,
            Err(e) => {
                error!(path = %db_path.display(), error = %e, "Worker could not open queue store");
                timer.abort();
                self.drain_rejected(&mut receiver);
                self.state.send_replace(WorkerState::Terminated);
                return;
            }
        };

        info!(path = %db_path.display(), "Worker started");

        while let Some(command) = receiver.recv().await {
            if *self.state.borrow() == WorkerState::Idle {
                self.state.send_replace(WorkerState::Running);
            }

            match command {
                Command::Enqueue(record) => self.enqueue(&store, record).await,
                Command::Flush { force, reply } => {
                    let report = self.flush(&store, force).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                }
                Command::ClearToken { token } => self.clear_token(&store, &token).await,
                Command::Shutdown => break,
            }
        }

        self.state.send_replace(WorkerState::Draining);
        timer.abort();
        self.drain_rejected(&mut receiver);

        if let Err(e) = store.close().await {
            warn!(error = %e, "Failed to close queue store");
        }
        self.state.send_replace(WorkerState::Terminated);
        info!("Worker terminated");
    }

    /// Close the mailbox and drop whatever is still queued in it.
    fn drain_rejected(&self, receiver: &mut mpsc::Receiver<Command>) {
        receiver.close();
        let mut dropped = 0u64;
        while let Ok(command) = receiver.try_recv() {
            debug!(command = command.kind(), "Dropping command after shutdown");
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Commands dropped after shutdown");
            self.stats.record_dropped(dropped);
        }
    }

    async fn enqueue(&mut self, store: &QueueStore, record: NewRecord) {
        let stream = record.stream;
        let token = record.token.clone();

        match store.append(record).await {
            Ok(outcome) => {
                self.stats.record_enqueued();
                if outcome.evicted > 0 {
                    warn!(stream = %stream, evicted = outcome.evicted, "Evicted oldest records");
                    self.stats.record_evicted(outcome.evicted);
                }
            }
            Err(e) => {
                self.stats.record_enqueue_failure();
                error!(
                    stream = %stream,
                    unavailable = e.is_unavailable(),
                    error = %e,
                    "Failed to persist record"
                );
                return;
            }
        }

        if self.config.flush_threshold_rows > 0 {
            self.maybe_flush_on_threshold(store, stream, &token).await;
        }
    }

    async fn maybe_flush_on_threshold(&mut self, store: &QueueStore, stream: Stream, token: &str) {
        match store.count(stream, token).await {
            Ok(count) if count >= self.config.flush_threshold_rows => {
                debug!(stream = %stream, count, "Row threshold reached, flushing");
                self.flush(store, false).await;
            }
            Ok(_) => {}
            Err(e) => warn!(stream = %stream, error = %e, "Failed to count queued records"),
        }
    }

    async fn flush(&mut self, store: &QueueStore, force: bool) -> FlushReport {
        let scheduled = *self.schedule.borrow();
        if !force && self.backoff.is_backing_off() && Instant::now() < scheduled.next_due {
            debug!(
                remaining_ms = scheduled
                    .next_due
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
                "Flush skipped inside backoff window"
            );
            // Wake the timer so it re-arms on the current deadline.
            self.schedule.send_replace(scheduled);
            return FlushReport::skipped();
        }

        let report = self.flusher.run(store, Utc::now().timestamp_millis()).await;

        if report.batches_accepted > 0 {
            self.backoff.reset();
        }
        if report.is_transient() {
            let interval = self.backoff.on_transient();
            info!(interval_ms = interval.as_millis() as u64, "Backing off scheduled flushes");
        }

        let interval = self.backoff.current();
        self.schedule.send_replace(Schedule {
            next_due: Instant::now() + interval,
            interval,
        });
        report
    }

    async fn clear_token(&self, store: &QueueStore, token: &str) {
        for stream in Stream::ALL {
            match store.delete_token(stream, token).await {
                Ok(0) => {}
                Ok(removed) => info!(stream = %stream, removed, "Cleared records for token"),
                Err(e) => error!(stream = %stream, error = %e, "Failed to clear token"),
            }
        }
    }
}
