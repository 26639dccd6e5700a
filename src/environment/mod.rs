pub mod probe;

pub use probe::{EnvironmentStatus, ProbeHost, SystemHost, apply_schedule_feedback, persist, probe};
