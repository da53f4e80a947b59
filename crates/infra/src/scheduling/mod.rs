//! In-process periodic task scheduling
//!
//! - [`Task`]: a job bound to a [`porter_common::Schedule`], single-flight
//! - [`Scheduler`]: task set plus the ticking dispatcher
//! - [`Publisher`]: receives task status transitions
//!
//! Lifecycle is explicit: [`Scheduler::start`] spawns the dispatcher and
//! keeps its join handle, [`Scheduler::stop`] cancels it through a
//! cancellation token and waits for the loop to exit.

pub mod error;
pub mod publisher;
pub mod scheduler;
pub mod task;

pub use error::{SchedulerError, SchedulerResult};
pub use publisher::{ChannelPublisher, Publisher, TaskState, TaskStatus};
pub use scheduler::Scheduler;
pub use task::{Task, TaskJob};
