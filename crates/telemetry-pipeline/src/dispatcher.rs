//! Caller-facing entry point.
//!
//! `Dispatcher` turns `track`/`flush`/`clear`/`shutdown` calls into worker
//! commands. It never touches storage. The worker handle is created lazily
//! on first use and recreated after shutdown; the handle lock is held only
//! while the slot is inspected or swapped, never across I/O.
//!
//! # Handle slot
//!
//! ```text
//! Empty ──first post──▶ Live ──shutdown()──▶ Stopping ──terminated/aborted──▶ Empty
//! ```
//!
//! While a worker is `Stopping`, posts are dropped and counted instead of
//! starting a second worker next to the one still draining. At most one
//! worker owns the queue file at any time.

use crate::flush::FlushReport;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::submitter::Submitter;
use crate::worker::{Command, Schedule, WorkerHandle, WorkerSpec, WorkerState};
use crate::{PipelineError, PipelineResult};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_config_and_utils::PipelineConfig;
use telemetry_database::{NewRecord, Stream};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Occupant of the dispatcher's handle slot.
enum Slot {
    Empty,
    Live(WorkerHandle),
    /// `shutdown` owns the handle and is waiting for the worker to drain.
    Stopping {
        abort: AbortHandle,
        state: watch::Receiver<WorkerState>,
    },
}

/// What `shutdown` has to do once the slot lock is released.
enum StopPlan {
    Nothing,
    Drain(WorkerHandle),
    Await(watch::Receiver<WorkerState>),
}

/// Facade over a lazily started worker.
///
/// Safe to share across threads and tasks. The rules:
///
/// - `track`, `flush` and `clear` never block. A full mailbox, or a worker
///   that is shutting down, drops the command and counts it in
///   [`StatsSnapshot::dropped_commands`].
/// - Commands posted from one caller are handled in posting order. Across
///   callers the order is whatever order they reached the mailbox in.
/// - `shutdown` drains the current worker and leaves the facade reusable:
///   the next post starts a fresh worker on the same queue file.
///
/// ```ignore
/// let dispatcher = Dispatcher::new(Handle::current(), db_path, config, submitter)?;
/// dispatcher.track(Stream::Events, r#"{"event":"open"}"#, token);
/// let report = dispatcher.flush_and_wait(true).await?;
/// dispatcher.shutdown().await?;
/// ```
pub struct Dispatcher {
    runtime: Handle,
    spec: WorkerSpec,
    slot: Mutex<Slot>,
}

impl Dispatcher {
    /// Create a dispatcher whose worker runs on `runtime` and stores its
    /// queue at `db_path`.
    ///
    /// No worker is started yet. Fails if `config` does not pass
    /// [`PipelineConfig::validate`], since a zero mailbox or flush interval
    /// would leave the worker unable to run.
    pub fn new(
        runtime: Handle,
        db_path: impl Into<PathBuf>,
        config: Arc<PipelineConfig>,
        submitter: Arc<dyn Submitter>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            runtime,
            spec: WorkerSpec {
                db_path: db_path.into(),
                config,
                submitter,
                stats: Arc::new(PipelineStats::new()),
            },
            slot: Mutex::new(Slot::Empty),
        })
    }

    /// Queue one record. Failures are logged, never returned.
    pub fn track(&self, stream: Stream, payload: impl Into<String>, token: impl Into<String>) {
        self.post(Command::Enqueue(NewRecord::new(stream, token, payload)));
    }

    /// Request a flush. `force` bypasses an open backoff window.
    pub fn flush(&self, force: bool) {
        self.post(Command::Flush { force, reply: None });
    }

    /// Drop every queued record owned by `token`.
    pub fn clear(&self, token: impl Into<String>) {
        self.post(Command::ClearToken {
            token: token.into(),
        });
    }

    /// Request a flush and wait for its report.
    ///
    /// Unlike `flush`, this waits for mailbox capacity instead of dropping.
    /// Returns `MailboxClosed` if the worker is shutting down or stops
    /// before answering.
    pub async fn flush_and_wait(&self, force: bool) -> PipelineResult<FlushReport> {
        let (reply, report) = oneshot::channel();
        let sender = self.live_sender().ok_or(PipelineError::MailboxClosed)?;
        sender
            .send(Command::Flush {
                force,
                reply: Some(reply),
            })
            .await
            .map_err(|_| PipelineError::MailboxClosed)?;
        report.await.map_err(|_| PipelineError::MailboxClosed)
    }

    /// Stop the worker and wait for it to drain.
    ///
    /// Commands already in the mailbox ahead of the shutdown request still
    /// run. Waits at most `shutdown_timeout`; past that the worker is
    /// aborted and `ShutdownTimeout` is returned. The slot is cleared only
    /// once the worker has terminated or been aborted, so posts made in
    /// the meantime are dropped rather than handed to a second worker.
    ///
    /// A call that overlaps another `shutdown` waits for the same worker
    /// and returns `Ok(())`.
    pub async fn shutdown(&self) -> PipelineResult<()> {
        let timeout = self.spec.config.shutdown_timeout();
        let plan = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Empty => StopPlan::Nothing,
                Slot::Live(handle) => {
                    *slot = Slot::Stopping {
                        abort: handle.abort_handle(),
                        state: handle.state_watch(),
                    };
                    StopPlan::Drain(handle)
                }
                Slot::Stopping { abort, state } => {
                    let waiting = state.clone();
                    *slot = Slot::Stopping { abort, state };
                    StopPlan::Await(waiting)
                }
            }
        };

        match plan {
            StopPlan::Nothing => Ok(()),
            StopPlan::Drain(handle) => {
                let _release = ReleaseSlot(&self.slot);
                handle.shutdown(timeout).await
            }
            StopPlan::Await(state) => {
                wait_terminated(state, timeout).await;
                Ok(())
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.spec.stats.snapshot()
    }

    /// State of the current worker, if one exists.
    pub fn worker_state(&self) -> Option<WorkerState> {
        match &*self.slot.lock() {
            Slot::Empty => None,
            Slot::Live(handle) => Some(handle.state()),
            Slot::Stopping { state, .. } => Some(*state.borrow()),
        }
    }

    /// Flush schedule of the live worker, if one exists.
    pub fn schedule(&self) -> Option<Schedule> {
        match &*self.slot.lock() {
            Slot::Live(handle) => Some(handle.schedule()),
            _ => None,
        }
    }

    fn post(&self, command: Command) {
        let mut command = command;
        // A worker can die between the liveness check and the send; retry
        // once against a fresh one.
        for _ in 0..2 {
            let Some(sender) = self.live_sender() else {
                debug!(command = command.kind(), "Worker shutting down, dropping command");
                self.spec.stats.record_dropped(1);
                return;
            };
            match sender.try_send(command) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    warn!(command = rejected.kind(), "Worker mailbox full, dropping command");
                    self.spec.stats.record_dropped(1);
                    return;
                }
                Err(TrySendError::Closed(rejected)) => {
                    debug!("Worker mailbox closed, restarting worker");
                    command = rejected;
                }
            }
        }
        warn!(command = command.kind(), "Worker unavailable, dropping command");
        self.spec.stats.record_dropped(1);
    }

    /// Sender of the live worker, spawning one if the slot is empty or
    /// holds a dead worker. `None` while a shutdown is in progress.
    fn live_sender(&self) -> Option<mpsc::Sender<Command>> {
        let mut slot = self.slot.lock();
        match &*slot {
            Slot::Stopping { .. } => return None,
            Slot::Live(handle) if handle.is_alive() => return Some(handle.sender().clone()),
            Slot::Live(handle) => debug!(state = ?handle.state(), "Replacing dead worker handle"),
            Slot::Empty => {}
        }

        let handle = WorkerHandle::spawn(&self.runtime, self.spec.clone());
        let sender = handle.sender().clone();
        *slot = Slot::Live(handle);
        Some(sender)
    }
}

/// Empties a `Stopping` slot when the owning `shutdown` finishes or is
/// cancelled. A cancelled shutdown aborts the worker first so no second
/// worker can start beside it.
struct ReleaseSlot<'a>(&'a Mutex<Slot>);

impl Drop for ReleaseSlot<'_> {
    fn drop(&mut self) {
        let mut slot = self.0.lock();
        if let Slot::Stopping { abort, .. } = &*slot {
            abort.abort();
            *slot = Slot::Empty;
        }
    }
}

async fn wait_terminated(mut state: watch::Receiver<WorkerState>, timeout: Duration) {
    // A dropped sender means the worker task is gone, which is just as final.
    let _ = tokio::time::timeout(
        timeout,
        state.wait_for(|state| *state == WorkerState::Terminated),
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::harness::{test_config, MockSubmitter};
    use telemetry_config_and_utils::CoreError;

    fn dispatcher_with(config: PipelineConfig) -> PipelineResult<Dispatcher> {
        let dir = tempfile::tempdir().unwrap();
        Dispatcher::new(
            Handle::current(),
            dir.path().join("queue.sqlite"),
            Arc::new(config),
            Arc::new(MockSubmitter::new()),
        )
    }

    #[tokio::test]
    async fn test_zero_mailbox_is_rejected() {
        let mut config = test_config();
        config.mailbox_capacity = 0;

        let err = dispatcher_with(config).err().unwrap();
        assert!(matches!(err, PipelineError::Config(CoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_zero_flush_interval_is_rejected() {
        let mut config = test_config();
        config.flush_interval_ms = 0;

        assert!(matches!(
            dispatcher_with(config),
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_valid_config_starts_no_worker() {
        let dispatcher = dispatcher_with(test_config()).unwrap();
        assert!(dispatcher.worker_state().is_none());
        assert!(dispatcher.schedule().is_none());
    }
}
