pub mod jobs;
pub mod registry;

pub use jobs::{JobContext, JobKind, JobOutcome, JobResult, StateStore, run_all, run_job, tick};
pub use registry::{ScheduleExpr, TaskRegistry, TaskSchedule};
