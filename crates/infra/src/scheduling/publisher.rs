//! Task status publishing
//!
//! Every status transition of a [`Task`](super::Task) is handed to a
//! [`Publisher`]. Publishing runs inline on the task's own unit of
//! concurrency, so implementations must not block: buffer or hand off.

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle state reported with each status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its next run
    Scheduled,
    /// A run has started
    Starting,
    /// The owning scheduler stopped
    Stopped,
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: Uuid,
    pub name: String,
    pub state: TaskState,
    pub schedule: String,
    pub running: bool,
    pub run_count: u64,
    pub last_run: Option<DateTime<Local>>,
    pub next_run: DateTime<Local>,
}

/// Receiver of task status transitions
pub trait Publisher: Send + Sync {
    fn publish(&self, status: TaskStatus);
}

impl<F> Publisher for F
where
    F: Fn(TaskStatus) + Send + Sync,
{
    fn publish(&self, status: TaskStatus) {
        self(status);
    }
}

/// Forwards snapshots over a bounded channel, dropping them when it is full
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<TaskStatus>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving half of its channel.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TaskStatus>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, status: TaskStatus) {
        match self.tx.try_send(status) {
            Ok(()) => {}
            Err(TrySendError::Full(status)) => {
                warn!(task = %status.name, state = ?status.state, "status channel full; dropping update");
            }
            Err(TrySendError::Closed(status)) => {
                debug!(task = %status.name, "status channel closed");
            }
        }
    }
}
