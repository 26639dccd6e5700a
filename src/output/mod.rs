// Output module
pub mod table;

pub use table::{JobReportRow, MetricRow, OutputFormat, StatusReport, TaskRow, TopDayRow, format_number};
