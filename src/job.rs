//! Job requests and launch outcomes

use serde::{Deserialize, Serialize};

use crate::Result;

/// Detail recorded when a success response carries no run identifier
pub const MISSING_RUN_ID_DETAIL: &str = "missing run identifier in success response";

/// Detail recorded for a blank job definition
pub const EMPTY_DEFINITION_DETAIL: &str = "empty job definition identifier";

/// A job definition identifier to launch
///
/// The identifier is an opaque reference into the fleet's own registry and is
/// never inspected beyond being non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobRequest {
    definition: String,
}

impl JobRequest {
    /// Wrap a job definition identifier
    pub fn new(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
        }
    }

    /// The job definition identifier
    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// True when the identifier is blank and cannot be launched
    pub fn is_empty(&self) -> bool {
        self.definition.trim().is_empty()
    }
}

impl From<&str> for JobRequest {
    fn from(definition: &str) -> Self {
        JobRequest::new(definition)
    }
}

impl From<String> for JobRequest {
    fn from(definition: String) -> Self {
        JobRequest::new(definition)
    }
}

/// Launch status of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The fleet accepted the job and assigned a run identifier
    Pending,
    /// The job was not started
    Failed,
}

/// Why a launch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected locally, no call was issued
    MalformedRequest,
    /// The fleet declined to start the job
    Rejected,
    /// Timeout, connection failure or unreachable service
    Transport,
    /// The fleet answered with something unusable
    MalformedResponse,
}

/// Result of attempting to start one job
///
/// A `Pending` outcome always carries a run identifier and a `Failed` outcome
/// always carries an error detail. The constructors are the only way to build
/// one; deserialized outcomes are checked against the same rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OutcomeRecord")]
pub struct JobLaunchOutcome {
    job_definition: String,
    run_id: Option<String>,
    status: JobStatus,
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_kind: Option<FailureKind>,
}

/// Unchecked wire form of [`JobLaunchOutcome`]
#[derive(Deserialize)]
struct OutcomeRecord {
    job_definition: String,
    run_id: Option<String>,
    status: JobStatus,
    error: Option<String>,
    #[serde(default)]
    failure_kind: Option<FailureKind>,
}

impl TryFrom<OutcomeRecord> for JobLaunchOutcome {
    type Error = String;

    fn try_from(record: OutcomeRecord) -> std::result::Result<Self, Self::Error> {
        match (record.status, record.run_id, record.error) {
            (JobStatus::Pending, Some(run_id), None) if !run_id.trim().is_empty() => {
                Ok(JobLaunchOutcome::pending(record.job_definition, run_id))
            }
            (JobStatus::Pending, _, _) => Err(format!(
                "pending outcome for {} needs a run identifier and no error",
                record.job_definition
            )),
            (JobStatus::Failed, None, Some(error)) => Ok(JobLaunchOutcome::failed(
                record.job_definition,
                record.failure_kind.unwrap_or(FailureKind::Rejected),
                error,
            )),
            (JobStatus::Failed, _, _) => Err(format!(
                "failed outcome for {} needs an error detail and no run identifier",
                record.job_definition
            )),
        }
    }
}

impl JobLaunchOutcome {
    /// Outcome of a job the fleet accepted as `run_id`
    pub fn pending(job_definition: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            job_definition: job_definition.into(),
            run_id: Some(run_id.into()),
            status: JobStatus::Pending,
            error: None,
            failure_kind: None,
        }
    }

    /// Outcome of a job that was not started
    pub fn failed(
        job_definition: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            job_definition: job_definition.into(),
            run_id: None,
            status: JobStatus::Failed,
            error: Some(detail.into()),
            failure_kind: Some(kind),
        }
    }

    /// Echo of the requested job definition
    pub fn job_definition(&self) -> &str {
        &self.job_definition
    }

    /// Run identifier assigned by the fleet, present only when pending
    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Launch status
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Error detail, present only when failed
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Failure class, present only when failed
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure_kind
    }

    /// True when the job was started
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }
}

/// Per-job outcomes of one dispatch, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResult {
    outcomes: Vec<JobLaunchOutcome>,
}

/// Counts over a [`BatchResult`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Jobs in the batch
    pub total: usize,
    /// Jobs started
    pub pending: usize,
    /// Jobs not started
    pub failed: usize,
}

impl BatchSummary {
    /// True when every job was started
    pub fn all_pending(&self) -> bool {
        self.failed == 0
    }
}

/// Envelope handed back to the invoking trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// HTTP-style status of the dispatch itself
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// JSON encoded outcome list
    pub body: String,
}

impl BatchResult {
    pub(crate) fn from_outcomes(outcomes: Vec<JobLaunchOutcome>) -> Self {
        Self { outcomes }
    }

    /// Number of outcomes, equal to the number of jobs dispatched
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcomes in input order
    pub fn outcomes(&self) -> &[JobLaunchOutcome] {
        &self.outcomes
    }

    /// Take the outcomes out of the result
    pub fn into_outcomes(self) -> Vec<JobLaunchOutcome> {
        self.outcomes
    }

    /// Iterate outcomes in input order
    pub fn iter(&self) -> std::slice::Iter<'_, JobLaunchOutcome> {
        self.outcomes.iter()
    }

    /// Outcomes that were not started, for callers that re-dispatch
    pub fn failed(&self) -> impl Iterator<Item = &JobLaunchOutcome> {
        self.outcomes.iter().filter(|o| o.status == JobStatus::Failed)
    }

    /// Outcomes of started jobs
    pub fn pending(&self) -> impl Iterator<Item = &JobLaunchOutcome> {
        self.outcomes.iter().filter(|o| o.status == JobStatus::Pending)
    }

    /// Count pending and failed outcomes
    pub fn summary(&self) -> BatchSummary {
        let pending = self.pending().count();
        BatchSummary {
            total: self.outcomes.len(),
            pending,
            failed: self.outcomes.len() - pending,
        }
    }

    /// Build the trigger response. The status code reports that the dispatch
    /// ran; per-job failures live in the body.
    pub fn to_response(&self) -> Result<DispatchResponse> {
        Ok(DispatchResponse {
            status_code: 200,
            body: serde_json::to_string(&self.outcomes)?,
        })
    }
}

impl IntoIterator for BatchResult {
    type Item = JobLaunchOutcome;
    type IntoIter = std::vec::IntoIter<JobLaunchOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchResult {
    type Item = &'a JobLaunchOutcome;
    type IntoIter = std::slice::Iter<'a, JobLaunchOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_serialization_shape() {
        let pending = JobLaunchOutcome::pending("defA", "run-1");
        assert_eq!(
            serde_json::to_value(&pending).unwrap(),
            json!({"job_definition": "defA", "run_id": "run-1", "status": "pending", "error": null})
        );

        let failed = JobLaunchOutcome::failed("defB", FailureKind::Rejected, "QuotaExceeded");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({
                "job_definition": "defB",
                "run_id": null,
                "status": "failed",
                "error": "QuotaExceeded",
                "failure_kind": "rejected"
            })
        );
    }

    #[test]
    fn test_summary_and_response() {
        let result = BatchResult::from_outcomes(vec![
            JobLaunchOutcome::pending("a", "run-1"),
            JobLaunchOutcome::failed("b", FailureKind::Transport, "connection refused"),
            JobLaunchOutcome::pending("c", "run-2"),
        ]);

        let summary = result.summary();
        assert_eq!(summary, BatchSummary { total: 3, pending: 2, failed: 1 });
        assert!(!summary.all_pending());
        assert_eq!(result.failed().map(|o| o.job_definition()).collect::<Vec<_>>(), vec!["b"]);

        let response = result.to_response().unwrap();
        assert_eq!(response.status_code, 200);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[1]["status"], "failed");

        let envelope = serde_json::to_value(&response).unwrap();
        assert_eq!(envelope["statusCode"], 200);
    }

    #[test]
    fn test_deserialized_outcomes_keep_invariant() {
        let pending: JobLaunchOutcome = serde_json::from_value(json!({
            "job_definition": "defA", "run_id": "run-1", "status": "pending", "error": null
        }))
        .unwrap();
        assert_eq!(pending, JobLaunchOutcome::pending("defA", "run-1"));

        let failed: JobLaunchOutcome = serde_json::from_value(json!({
            "job_definition": "defB", "run_id": null, "status": "failed",
            "error": "QuotaExceeded", "failure_kind": "rejected"
        }))
        .unwrap();
        assert_eq!(
            failed,
            JobLaunchOutcome::failed("defB", FailureKind::Rejected, "QuotaExceeded")
        );

        let pending_without_run = serde_json::from_value::<JobLaunchOutcome>(json!({
            "job_definition": "defA", "run_id": null, "status": "pending", "error": null
        }));
        assert!(pending_without_run.is_err());

        let failed_with_run = serde_json::from_value::<JobLaunchOutcome>(json!({
            "job_definition": "defB", "run_id": "run-2", "status": "failed", "error": "boom"
        }));
        assert!(failed_with_run.is_err());

        let batch = serde_json::from_value::<BatchResult>(json!([
            {"job_definition": "defA", "run_id": null, "status": "pending", "error": null}
        ]));
        assert!(batch.is_err());
    }

    #[test]
    fn test_blank_request() {
        assert!(JobRequest::new("   ").is_empty());
        assert!(!JobRequest::from("task-def:1").is_empty());
    }
}
