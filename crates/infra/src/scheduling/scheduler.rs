//! Periodic dispatcher for [`Task`]s
//!
//! A single background loop ticks at a fixed interval, collects the tasks
//! that are due, orders them by next run and spawns each run on its own
//! tokio task. Runs already in flight are not interrupted by [`Scheduler::stop`].
//!
//! # Example
//!
//! ```no_run
//! use porter_infra::scheduling::Scheduler;
//!
//! # async fn example() -> porter_infra::scheduling::SchedulerResult<()> {
//! let mut scheduler = Scheduler::new();
//! scheduler.schedule("every 30 seconds", || async {
//!     tracing::info!("refreshing");
//! })?;
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::RwLock;
use porter_domain::constants::DEFAULT_TICKER_INTERVAL_MS;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::error::{SchedulerError, SchedulerResult};
use super::publisher::{Publisher, TaskState};
use super::task::{Task, TaskJob};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

type TaskList = Arc<parking_lot::Mutex<Vec<Arc<Task>>>>;

const MIN_TICK: Duration = Duration::from_millis(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Task set plus the background dispatcher that drives it
pub struct Scheduler {
    tasks: TaskList,
    publisher: RwLock<Option<Arc<dyn Publisher>>>,
    tick_interval: Option<Duration>,
    max_dispatched: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.count())
            .field("tick_interval", &self.tick_interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(parking_lot::Mutex::new(Vec::new())),
            publisher: RwLock::new(None),
            tick_interval: None,
            max_dispatched: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Fixed dispatcher tick instead of one derived from the task periods.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Register a task.
    ///
    /// The task inherits the scheduler's publisher unless it has its own.
    ///
    /// # Errors
    /// [`SchedulerError::DuplicateTask`] when a task with the same id exists.
    pub fn add(&self, task: Task) -> SchedulerResult<Arc<Task>> {
        let task = Arc::new(task);
        {
            let mut tasks = self.tasks.lock();
            if tasks.iter().any(|t| t.id() == task.id()) {
                return Err(SchedulerError::DuplicateTask(task.id()));
            }
            if !task.has_publisher() {
                task.set_publisher(self.publisher.read().clone());
            }
            tasks.push(Arc::clone(&task));
        }

        debug!(task = %task.name(), schedule = %task.schedule(), "task added");
        task.publish(TaskState::Scheduled);
        Ok(task)
    }

    /// Parse `format`, bind it to `job` and register the task.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidSchedule`] when the phrase does not parse.
    pub fn schedule(&self, format: &str, job: impl TaskJob + 'static) -> SchedulerResult<Arc<Task>> {
        self.add(Task::new(format, job)?)
    }

    /// # Errors
    /// [`SchedulerError::TaskNotFound`] for an unknown id.
    pub fn remove(&self, id: Uuid) -> SchedulerResult<Arc<Task>> {
        let mut tasks = self.tasks.lock();
        let index = tasks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        Ok(tasks.remove(index))
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Task>> {
        self.tasks.lock().iter().find(|t| t.id() == id).cloned()
    }

    pub fn list(&self) -> Vec<Arc<Task>> {
        self.tasks.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn clear(&self) {
        self.tasks.lock().clear();
    }

    /// Install `publisher` on the scheduler and on every registered task.
    pub fn set_publisher(&self, publisher: Arc<dyn Publisher>) {
        *self.publisher.write() = Some(Arc::clone(&publisher));
        for task in self.tasks.lock().iter() {
            task.set_publisher(Some(Arc::clone(&publisher)));
        }
    }

    /// Largest number of tasks dispatched on a single tick so far.
    pub fn max_dispatched_per_tick(&self) -> usize {
        self.max_dispatched.load(Ordering::Relaxed)
    }

    /// The configured tick, else a tenth of the shortest task period, else
    /// one second.
    pub fn tick_interval(&self) -> Duration {
        let tick = self.tick_interval.unwrap_or_else(|| {
            self.tasks
                .lock()
                .iter()
                .map(|t| t.period())
                .min()
                .map(|period| period / 10)
                .unwrap_or(Duration::from_millis(DEFAULT_TICKER_INTERVAL_MS))
        });
        tick.max(MIN_TICK)
    }

    /// Start the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is already running
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        // Fresh token so a stopped scheduler can be restarted
        self.cancellation_token = CancellationToken::new();

        let tick = self.tick_interval();
        let tasks = Arc::clone(&self.tasks);
        let max_dispatched = Arc::clone(&self.max_dispatched);
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::dispatch_loop(tasks, max_dispatched, tick, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);

        let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        info!(tick_ms, tasks = self.count(), "Scheduler started");
        Ok(())
    }

    /// Stop the dispatcher and wait for its loop to exit.
    ///
    /// Every task is published as [`TaskState::Stopped`].
    ///
    /// # Errors
    ///
    /// Returns error if scheduler is not running, or the loop does not exit
    /// within five seconds
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Err(_) => return Err(SchedulerError::Timeout { duration: STOP_TIMEOUT }),
                Ok(Err(e)) => return Err(SchedulerError::TaskJoinFailed(e.to_string())),
                Ok(Ok(())) => {}
            }
        }

        for task in self.list() {
            task.publish(TaskState::Stopped);
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// Check if scheduler is running
    ///
    /// A scheduler is considered running if it has an active task handle that
    /// hasn't finished.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn dispatch_loop(
        tasks: TaskList,
        max_dispatched: Arc<AtomicUsize>,
        tick: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Dispatch loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let dispatched = Self::dispatch_due(&tasks);
                    max_dispatched.fetch_max(dispatched, Ordering::Relaxed);
                }
            }
        }
    }

    /// Spawn a run for every due task, earliest next run first.
    fn dispatch_due(tasks: &TaskList) -> usize {
        let now = Local::now();
        let due = {
            let tasks = tasks.lock();
            let mut due: Vec<Arc<Task>> =
                tasks.iter().filter(|t| t.should_run_at(now)).cloned().collect();
            due.sort_by_key(|t| t.next_run());
            due
        };

        let count = due.len();
        for task in due {
            tokio::spawn(async move {
                task.run_if_due().await;
            });
        }
        count
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("Scheduler dropped while running; cancelling dispatch loop");
            self.cancellation_token.cancel();
        }
    }
}
