//! # Fleet Dispatch
//!
//! Launches a batch of independent container jobs on a fleet execution
//! service and reports every launch outcome as one aggregated result.
//!
//! ## Overview
//!
//! A dispatch takes a shared [`PlacementConfig`] (cluster, launch mode,
//! subnets, security groups, public IP policy) and an ordered list of
//! [`JobRequest`]s. Each job is started with one call to a [`FleetService`];
//! the answers come back as a [`BatchResult`] holding exactly one
//! [`JobLaunchOutcome`] per job, in input order.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use fleet_dispatch::{BatchDispatcher, JobRequest, JobStatus, MemoryFleet, PlacementConfig};
//!
//! # async fn example() -> fleet_dispatch::Result<()> {
//! let placement = PlacementConfig::new("compute-cluster")
//!     .with_subnet("subnet-0a1b2c")
//!     .with_security_group("sg-0d1e2f");
//!
//! let dispatcher = BatchDispatcher::new(Arc::new(MemoryFleet::new()));
//! let jobs = vec![JobRequest::new("train-model:3"), JobRequest::new("predict:7")];
//!
//! let result = dispatcher.dispatch(&placement, &jobs).await?;
//! assert_eq!(result.len(), jobs.len());
//!
//! for outcome in &result {
//!     if outcome.status() == JobStatus::Failed {
//!         eprintln!("{} not started: {:?}", outcome.job_definition(), outcome.error());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Features
//!
//! - **Partial-failure tolerance**: a failed launch is recorded, never propagated
//! - **Bounded fan-out**: launches run concurrently under a configurable limit
//! - **Timeouts**: every launch is bounded, a stuck call becomes a failed outcome
//! - **Cancellation**: stops issuing new launches without touching in-flight ones
//!
//! ## Modules
//!
//! - [`config`]: placement and dispatcher settings, environment loading
//! - [`job`]: requests, outcomes and the aggregated result
//! - [`fleet`]: the fleet boundary and its implementations
//! - [`dispatcher`]: the dispatch loop

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Failure of a dispatch as a whole
///
/// Per-job launch failures never show up here; they are reported inside the
/// [`BatchResult`].
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Placement or dispatcher settings are unusable, nothing was launched
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The caller cancelled the batch
    #[error("Dispatch cancelled after issuing {issued} of {total} launches")]
    Cancelled {
        /// Launches issued before cancellation
        issued: usize,
        /// Jobs in the batch
        total: usize,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Placement and dispatcher configuration
pub mod config;

/// Job requests and launch outcomes
pub mod job;

/// Fleet execution service boundary
pub mod fleet;

/// Batch dispatch loop
pub mod dispatcher;

pub use config::{ConfigError, DispatcherConfig, LaunchMode, PlacementConfig, PublicIpPolicy};
pub use dispatcher::BatchDispatcher;
pub use fleet::{FleetBehavior, FleetError, FleetService, MemoryFleet, StartJobRequest, StartJobResponse};
pub use job::{BatchResult, BatchSummary, DispatchResponse, FailureKind, JobLaunchOutcome, JobRequest, JobStatus};

#[cfg(feature = "ecs")]
pub use fleet::EcsFleet;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_conversion() {
        let err: DispatchError = ConfigError::NoSubnets.into();
        assert!(matches!(err, DispatchError::Config(ConfigError::NoSubnets)));
        assert_eq!(
            err.to_string(),
            "Configuration error: at least one subnet identifier is required"
        );
    }

    #[test]
    fn test_cancelled_display() {
        let err = DispatchError::Cancelled { issued: 2, total: 5 };
        assert_eq!(err.to_string(), "Dispatch cancelled after issuing 2 of 5 launches");
    }
}
