// Formatting and calendar helpers shared by jobs and output
pub mod calendar;
pub mod date_format;
pub mod size;

pub use calendar::*;
pub use date_format::*;
pub use size::*;
