use thiserror::Error;

/// Failure of one job, as reported at the runner boundary.
#[derive(Error, Debug)]
pub enum JobError {
    /// Reading the platform or the state store failed; the next run retries.
    #[error("{job}: query failed: {source:#}")]
    Query {
        job: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{job}: store write failed: {source:#}")]
    Store {
        job: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("{job}: panicked: {message}")]
    Panicked { job: &'static str, message: String },

    #[error("unknown job '{0}'")]
    UnknownJob(String),
}

impl JobError {
    pub fn query(job: &'static str, source: anyhow::Error) -> Self {
        JobError::Query { job, source }
    }

    pub fn store(job: &'static str, source: anyhow::Error) -> Self {
        JobError::Store { job, source }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Query { .. } => "query",
            JobError::Store { .. } => "store",
            JobError::Panicked { .. } => "panicked",
            JobError::UnknownJob(_) => "unknown_job",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context_chain() {
        let err = JobError::query("daily-users", anyhow::anyhow!("no such table").context("Failed to count logins"));
        let text = err.to_string();
        assert!(text.starts_with("daily-users: query failed"));
        assert!(text.contains("no such table"));
        assert_eq!(err.kind(), "query");
    }

    #[test]
    fn test_unknown_job() {
        assert_eq!(JobError::UnknownJob("reindex".to_string()).to_string(), "unknown job 'reindex'");
    }
}
