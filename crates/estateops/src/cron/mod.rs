//! Scheduled job bookkeeping: run tracking, the executor wrapper, and the job bodies.

pub mod executor;
pub mod jobs;
pub mod model;
pub mod site;
pub mod tracker;

pub use executor::{JobExecutor, JobOutput};
pub use jobs::{JobRunner, ScheduledJob, SCHEDULED_JOBS};
pub use model::{JobRun, JobRunHandle, JobRunStatus, JobStats};
pub use tracker::{Completion, Failure, JobRunTracker};
