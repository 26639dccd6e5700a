use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::scheduler::JobResult;

/// Trait for items that can be displayed as tables or JSON
pub trait OutputFormat {
    fn to_table(&self) -> String;
    fn to_json(&self) -> Result<String, serde_json::Error>;
}

/// One labelled figure in the status overview
#[derive(Tabled, Serialize, Debug, Clone)]
pub struct MetricRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Level")]
    pub level: String,
}

#[derive(Tabled, Serialize, Debug, Clone)]
pub struct TaskRow {
    #[tabled(rename = "Task")]
    pub task: String,
    #[tabled(rename = "Schedule")]
    pub schedule: String,
    #[tabled(rename = "Enabled")]
    pub enabled: String,
    #[tabled(rename = "Last Run")]
    pub last_run: String,
    #[tabled(rename = "Due")]
    pub due: String,
}

#[derive(Tabled, Serialize, Debug, Clone)]
pub struct TopDayRow {
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Users")]
    pub users: String,
}

/// Outcome of one job as printed by `run`, `run-all` and `tick`
#[derive(Tabled, Serialize, Debug, Clone)]
pub struct JobReportRow {
    #[tabled(rename = "Job")]
    pub job: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Result")]
    pub message: String,
    #[tabled(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl JobReportRow {
    pub fn from_result(result: &JobResult) -> Self {
        match &result.outcome {
            Ok(outcome) => Self {
                job: result.job.clone(),
                status: "ok".to_string(),
                message: outcome.message.clone(),
                error_kind: None,
            },
            Err(e) => Self {
                job: result.job.clone(),
                status: "failed".to_string(),
                message: e.to_string(),
                error_kind: Some(e.kind().to_string()),
            },
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct StatusReport {
    pub site_name: String,
    pub timezone: String,
    pub metrics: Vec<MetricRow>,
    pub top_days: Vec<TopDayRow>,
    pub tasks: Vec<TaskRow>,
}

impl OutputFormat for StatusReport {
    fn to_table(&self) -> String {
        let mut output = String::new();

        let title = if self.site_name.is_empty() { "Usage status".to_string() } else { format!("Usage status: {}", self.site_name) };
        output.push_str(&format!("{} ({})\n\n", title, self.timezone));

        output.push_str(&styled(Table::new(&self.metrics)));
        output.push_str("\n\nTop daily users (lifetime)\n");
        if self.top_days.is_empty() {
            output.push_str("No daily user data recorded yet.");
        } else {
            output.push_str(&styled(Table::new(&self.top_days)));
        }

        output.push_str("\n\nScheduled tasks\n");
        output.push_str(&styled(Table::new(&self.tasks)));
        output
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl OutputFormat for Vec<JobReportRow> {
    fn to_table(&self) -> String {
        if self.is_empty() {
            return "No jobs were due.".to_string();
        }
        styled(Table::new(self))
    }

    fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn styled(mut table: Table) -> String {
    table.with(Style::rounded());
    table.to_string()
}

/// Format a number with commas for thousands separator
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let chars: Vec<char> = s.chars().collect();

    let mut result = String::new();
    for (i, ch) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*ch);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::scheduler::{JobKind, JobOutcome};

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(123), "123");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_job_report_rows() {
        let ok = JobResult {
            job: "recent-users".to_string(),
            outcome: Ok(JobOutcome { job: JobKind::RecentUsers, message: "3 users active in the last 24h".to_string() }),
        };
        let failed = JobResult {
            job: "reindex".to_string(),
            outcome: Err(JobError::UnknownJob("reindex".to_string())),
        };

        let rows = vec![JobReportRow::from_result(&ok), JobReportRow::from_result(&failed)];
        assert_eq!(rows[0].status, "ok");
        assert_eq!(rows[1].status, "failed");
        assert_eq!(rows[1].error_kind.as_deref(), Some("unknown_job"));

        let table = rows.to_table();
        assert!(table.contains("recent-users"));
        assert!(table.contains("unknown job 'reindex'"));

        let json: serde_json::Value = serde_json::from_str(&rows.to_json().unwrap()).unwrap();
        assert_eq!(json[0]["status"], "ok");
        assert!(json[0].get("error_kind").is_none());
        assert_eq!(json[1]["error_kind"], "unknown_job");
    }

    #[test]
    fn test_empty_job_list() {
        assert_eq!(Vec::<JobReportRow>::new().to_table(), "No jobs were due.");
    }

    #[test]
    fn test_status_report_table() {
        let report = StatusReport {
            site_name: "Campus".to_string(),
            timezone: "UTC".to_string(),
            metrics: vec![MetricRow { metric: "Disk usage".to_string(), value: "1.00 GB".to_string(), level: "normal".to_string() }],
            top_days: Vec::new(),
            tasks: vec![TaskRow {
                task: "notify".to_string(),
                schedule: "0 8 * * *".to_string(),
                enabled: "yes".to_string(),
                last_run: "never".to_string(),
                due: "yes".to_string(),
            }],
        };

        let table = report.to_table();
        assert!(table.contains("Usage status: Campus (UTC)"));
        assert!(table.contains("Disk usage"));
        assert!(table.contains("No daily user data recorded yet."));
        assert!(table.contains("0 8 * * *"));
    }
}
