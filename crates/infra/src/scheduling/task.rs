//! Scheduled task with single-flight execution

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta};
use futures::FutureExt;
use parking_lot::RwLock;
use porter_common::Schedule;
use porter_domain::constants::DEFAULT_TASK_RUN_TIMEOUT_MS;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::SchedulerResult;
use super::publisher::{Publisher, TaskState, TaskStatus};

/// Work performed on every run of a [`Task`]
///
/// Closures returning a future implement this directly; arguments are bound
/// by capturing them.
#[async_trait]
pub trait TaskJob: Send + Sync {
    async fn run(&self);
}

#[async_trait]
impl<F, Fut> TaskJob for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn run(&self) {
        self().await;
    }
}

/// A job bound to a [`Schedule`]
///
/// At most one run is in flight at a time. A run that panics is logged and
/// the task stays on its schedule.
pub struct Task {
    id: Uuid,
    name: String,
    job: Arc<dyn TaskJob>,
    schedule: RwLock<Schedule>,
    run_timeout: Duration,
    running: AtomicBool,
    slot: Mutex<()>,
    publisher: RwLock<Option<Arc<dyn Publisher>>>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &*self.schedule.read())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Parse `format` and bind it to `job`.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidSchedule`](super::SchedulerError::InvalidSchedule)
    /// when the phrase does not parse.
    pub fn new(format: &str, job: impl TaskJob + 'static) -> SchedulerResult<Self> {
        let schedule = Schedule::parse(format)?;
        Ok(Self::with_schedule(schedule, job))
    }

    pub fn with_schedule(schedule: Schedule, job: impl TaskJob + 'static) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            name: id.to_string(),
            job: Arc::new(job),
            schedule: RwLock::new(schedule),
            run_timeout: Duration::from_millis(DEFAULT_TASK_RUN_TIMEOUT_MS),
            running: AtomicBool::new(false),
            slot: Mutex::new(()),
            publisher: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// How long [`Task::run`] waits for an in-flight run to finish.
    #[must_use]
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    #[must_use]
    pub fn with_publisher(self, publisher: Arc<dyn Publisher>) -> Self {
        *self.publisher.write() = Some(publisher);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Copy of the current schedule and its bookkeeping
    pub fn schedule(&self) -> Schedule {
        self.schedule.read().clone()
    }

    pub fn next_run(&self) -> DateTime<Local> {
        self.schedule.read().next_run()
    }

    pub fn run_count(&self) -> u64 {
        self.schedule.read().run_count()
    }

    pub fn period(&self) -> Duration {
        self.schedule.read().period()
    }

    pub(crate) fn has_publisher(&self) -> bool {
        self.publisher.read().is_some()
    }

    pub fn set_publisher(&self, publisher: Option<Arc<dyn Publisher>>) {
        *self.publisher.write() = publisher;
    }

    /// `true` when no run is in flight and the next run is in the past.
    pub fn should_run(&self) -> bool {
        self.should_run_at(Local::now())
    }

    pub(crate) fn should_run_at(&self, now: DateTime<Local>) -> bool {
        !self.is_running() && self.schedule.read().is_due(now)
    }

    /// Move the next run to `after` from now.
    pub fn set_next_run(&self, after: Duration) {
        let now = Local::now();
        let next = TimeDelta::from_std(after)
            .ok()
            .and_then(|step| now.checked_add_signed(step))
            .unwrap_or(now);
        self.schedule.write().set_next_run(next);
    }

    /// Replace the schedule with a freshly parsed `format`.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidSchedule`](super::SchedulerError::InvalidSchedule);
    /// the current schedule is kept.
    pub fn update_schedule(&self, format: &str) -> SchedulerResult<()> {
        let schedule = Schedule::parse(format)?;
        *self.schedule.write() = schedule;
        info!(task = %self.name, schedule = %format, "task schedule updated");
        self.publish(TaskState::Scheduled);
        Ok(())
    }

    pub fn status(&self, state: TaskState) -> TaskStatus {
        let schedule = self.schedule.read();
        TaskStatus {
            id: self.id,
            name: self.name.clone(),
            state,
            schedule: schedule.format().to_string(),
            running: self.is_running(),
            run_count: schedule.run_count(),
            last_run: schedule.last_run(),
            next_run: schedule.next_run(),
        }
    }

    pub(crate) fn publish(&self, state: TaskState) {
        let publisher = self.publisher.read().clone();
        if let Some(publisher) = publisher {
            publisher.publish(self.status(state));
        }
    }

    /// Run the job now.
    ///
    /// Waits up to the run timeout for an in-flight run to finish. Returns
    /// `false` without running when the slot could not be acquired.
    pub async fn run(&self) -> bool {
        let Ok(_slot) = tokio::time::timeout(self.run_timeout, self.slot.lock()).await else {
            warn!(task = %self.name, "task already running");
            return false;
        };
        self.execute().await;
        true
    }

    /// Run the job only if it is still due once the slot is held.
    ///
    /// A dispatch queued behind a run that already advanced the schedule
    /// returns `false` instead of running twice.
    pub async fn run_if_due(&self) -> bool {
        let Ok(_slot) = tokio::time::timeout(self.run_timeout, self.slot.lock()).await else {
            warn!(task = %self.name, "task already running");
            return false;
        };
        if !self.schedule.read().is_due(Local::now()) {
            debug!(task = %self.name, "task no longer due");
            return false;
        }
        self.execute().await;
        true
    }

    async fn execute(&self) {
        self.schedule.write().mark_started(Local::now());
        self.running.store(true, Ordering::SeqCst);
        self.publish(TaskState::Starting);
        debug!(task = %self.name, run = self.run_count(), "task starting");

        if let Err(payload) = AssertUnwindSafe(self.job.run()).catch_unwind().await {
            error!(
                task = %self.name,
                panic = %panic_message(payload.as_ref()),
                backtrace = %Backtrace::force_capture(),
                "task panicked"
            );
        }

        self.running.store(false, Ordering::SeqCst);
        self.schedule.write().schedule_next(Local::now());
        self.publish(TaskState::Scheduled);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
