//! Fleet execution service boundary
//!
//! The dispatcher only ever talks to a fleet through [`FleetService`]. The
//! in-memory [`MemoryFleet`] backs tests and local runs; the ECS binding lives
//! behind the `ecs` feature.

mod memory;
#[cfg(feature = "ecs")]
pub mod ecs;

pub use memory::{FleetBehavior, MemoryFleet};
#[cfg(feature = "ecs")]
pub use ecs::EcsFleet;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LaunchMode, PlacementConfig, PublicIpPolicy};
use crate::job::{FailureKind, JobRequest};

/// One start-job call as sent to the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartJobRequest {
    /// Target cluster
    pub cluster: String,
    /// Capacity the job runs on
    pub launch_mode: LaunchMode,
    /// Job definition to start
    pub job_definition: String,
    /// Subnets the job is placed in
    pub subnets: Vec<String>,
    /// Security groups attached to the job
    pub security_groups: Vec<String>,
    /// Whether the job gets a public address
    pub public_ip: PublicIpPolicy,
}

impl StartJobRequest {
    /// Combine the shared placement with one job's definition
    pub fn new(placement: &PlacementConfig, job: &JobRequest) -> Self {
        Self {
            cluster: placement.cluster.clone(),
            launch_mode: placement.launch_mode,
            job_definition: job.definition().to_string(),
            subnets: placement.subnets.clone(),
            security_groups: placement.security_groups.clone(),
            public_ip: placement.public_ip,
        }
    }
}

/// What the fleet reported for an accepted call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartJobResponse {
    /// Identifier of the started run, if the fleet reported one
    pub run_id: Option<String>,
}

impl StartJobResponse {
    /// A response naming the started run
    pub fn started(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
        }
    }

    /// A success response that assigned no run
    pub fn empty() -> Self {
        Self::default()
    }

    /// Run identifier, or [`FleetError::MissingRunId`] when the response
    /// carries none.
    pub fn into_run_id(self) -> Result<String, FleetError> {
        match self.run_id {
            Some(run_id) if !run_id.trim().is_empty() => Ok(run_id),
            _ => Err(FleetError::MissingRunId),
        }
    }
}

/// Per-job failure of a start-job call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
    /// The fleet declined the job
    #[error("{}", rejection_detail(.code, .message))]
    Rejected {
        /// Service error code or failure reason
        code: String,
        /// Human readable detail, when the fleet gave one
        message: Option<String>,
    },

    /// The request could not be built from the job and placement
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The call never got an answer from the fleet
    #[error("transport failure: {0}")]
    Transport(String),

    /// No answer within the per-call timeout
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The fleet's answer could not be read
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Success answer without a run identifier
    #[error("missing run identifier in success response")]
    MissingRunId,
}

impl FleetError {
    /// Rejection carrying only a code
    pub fn rejected(code: impl Into<String>) -> Self {
        FleetError::Rejected {
            code: code.into(),
            message: None,
        }
    }

    /// Failure class recorded in the job's outcome
    pub fn category(&self) -> FailureKind {
        match self {
            FleetError::Rejected { .. } => FailureKind::Rejected,
            FleetError::InvalidRequest(_) => FailureKind::MalformedRequest,
            FleetError::Transport(_) | FleetError::Timeout(_) => FailureKind::Transport,
            FleetError::MalformedResponse(_) | FleetError::MissingRunId => {
                FailureKind::MalformedResponse
            }
        }
    }
}

fn rejection_detail(code: &str, message: &Option<String>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("{}: {}", code, message),
        _ => code.to_string(),
    }
}

/// A backend that can start a job from a definition and a placement
#[async_trait]
pub trait FleetService: Send + Sync {
    /// Issue one start-job call
    async fn start_job(&self, request: &StartJobRequest) -> Result<StartJobResponse, FleetError>;

    /// Name used in log output
    fn name(&self) -> &str {
        "fleet"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        assert_eq!(FleetError::rejected("QuotaExceeded").to_string(), "QuotaExceeded");

        let with_message = FleetError::Rejected {
            code: "InvalidParameterException".to_string(),
            message: Some("TaskDefinition not found".to_string()),
        };
        assert_eq!(
            with_message.to_string(),
            "InvalidParameterException: TaskDefinition not found"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(FleetError::rejected("x").category(), FailureKind::Rejected);
        assert_eq!(
            FleetError::Timeout(Duration::from_secs(1)).category(),
            FailureKind::Transport
        );
        assert_eq!(FleetError::MissingRunId.category(), FailureKind::MalformedResponse);
        assert_eq!(
            FleetError::InvalidRequest("x".to_string()).category(),
            FailureKind::MalformedRequest
        );
    }

    #[test]
    fn test_response_without_run_id() {
        assert_eq!(StartJobResponse::empty().into_run_id(), Err(FleetError::MissingRunId));
        assert_eq!(
            StartJobResponse::started("  ").into_run_id(),
            Err(FleetError::MissingRunId)
        );
        assert_eq!(StartJobResponse::started("run-1").into_run_id(), Ok("run-1".to_string()));
    }

    #[test]
    fn test_request_from_placement() {
        let placement = PlacementConfig::new("compute")
            .with_subnet("subnet-1")
            .with_security_group("sg-1")
            .with_public_ip(PublicIpPolicy::Disabled);
        let request = StartJobRequest::new(&placement, &JobRequest::new("train:2"));

        assert_eq!(request.cluster, "compute");
        assert_eq!(request.job_definition, "train:2");
        assert_eq!(request.launch_mode, LaunchMode::Fargate);
        assert_eq!(request.subnets, vec!["subnet-1"]);
        assert_eq!(request.public_ip, PublicIpPolicy::Disabled);
    }
}
