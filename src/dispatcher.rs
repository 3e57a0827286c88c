//! Batch Dispatcher
//!
//! Fans a batch of job launches out to the fleet and folds the answers back
//! into one [`BatchResult`]:
//! - Bounded concurrency through a semaphore
//! - Per-call timeout enforcement
//! - Per-job failure isolation, a failing launch never aborts its siblings
//! - Input order preserved through one result slot per job
//! - Cooperative cancellation that stops new launches only

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DispatcherConfig, PlacementConfig, MAX_CONCURRENCY_LIMIT};
use crate::fleet::{FleetError, FleetService, StartJobRequest};
use crate::job::{BatchResult, FailureKind, JobLaunchOutcome, JobRequest, EMPTY_DEFINITION_DETAIL};
use crate::{DispatchError, Result};

/// Result slot of one job, addressed by its input index
enum Slot {
    Ready(JobLaunchOutcome),
    Spawned {
        job_definition: String,
        handle: JoinHandle<JobLaunchOutcome>,
    },
}

/// Dispatches batches of jobs against one fleet
pub struct BatchDispatcher {
    fleet: Arc<dyn FleetService>,
    config: DispatcherConfig,
}

impl std::fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("fleet", &self.fleet.name())
            .field("config", &self.config)
            .finish()
    }
}

impl BatchDispatcher {
    /// Create a dispatcher with default settings
    pub fn new(fleet: Arc<dyn FleetService>) -> Self {
        Self {
            fleet,
            config: DispatcherConfig::default(),
        }
    }

    /// Replace all dispatcher settings
    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of launches in flight
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.config.concurrency_limit = limit.clamp(1, MAX_CONCURRENCY_LIMIT);
        self
    }

    /// Set the timeout of a single launch
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Current dispatcher settings
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Launch every job and report one outcome per job, in input order
    ///
    /// Only a structurally invalid placement fails the call itself, and it
    /// does so before any launch is issued.
    pub async fn dispatch(
        &self,
        placement: &PlacementConfig,
        jobs: &[JobRequest],
    ) -> Result<BatchResult> {
        self.dispatch_with_cancel(placement, jobs, CancellationToken::new())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), stopping as soon as `cancel` fires
    ///
    /// Once cancelled no further launch is issued and
    /// [`DispatchError::Cancelled`] is returned. Launches already in flight
    /// run to completion in the background; started jobs are not rolled back.
    #[instrument(skip_all, fields(cluster = %placement.cluster, job_count = jobs.len()))]
    pub async fn dispatch_with_cancel(
        &self,
        placement: &PlacementConfig,
        jobs: &[JobRequest],
        cancel: CancellationToken,
    ) -> Result<BatchResult> {
        placement.validate()?;
        self.config.validate()?;

        if jobs.is_empty() {
            info!("No jobs to dispatch");
            return Ok(BatchResult::default());
        }

        let batch_start = Instant::now();
        let total = jobs.len();
        info!(
            fleet = self.fleet.name(),
            concurrency_limit = self.config.concurrency_limit,
            timeout = ?self.config.call_timeout,
            "Starting batch dispatch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));
        let mut slots = Vec::with_capacity(total);
        let mut issued = 0usize;

        for (index, job) in jobs.iter().enumerate() {
            if job.is_empty() {
                warn!(job_index = index, "Skipping job with empty definition");
                slots.push(Slot::Ready(JobLaunchOutcome::failed(
                    job.definition(),
                    FailureKind::MalformedRequest,
                    EMPTY_DEFINITION_DETAIL,
                )));
                continue;
            }

            // Wait for a free slot; cancellation wins ties
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(issued, total, "Dispatch cancelled, no further launches");
                    return Err(DispatchError::Cancelled { issued, total });
                }
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|e| DispatchError::Internal(format!("launch slots unavailable: {}", e)))?,
            };

            let request = StartJobRequest::new(placement, job);
            let fleet = Arc::clone(&self.fleet);
            let timeout = self.config.call_timeout;

            debug!(job_index = index, job_definition = %job.definition(), "Issuing launch");
            let handle = tokio::spawn(async move {
                let _permit = permit;
                launch_one(fleet.as_ref(), index, request, timeout).await
            });

            slots.push(Slot::Spawned {
                job_definition: job.definition().to_string(),
                handle,
            });
            issued += 1;
        }

        let collect = join_all(slots.into_iter().enumerate().map(|(index, slot)| async move {
            match slot {
                Slot::Ready(outcome) => outcome,
                Slot::Spawned {
                    job_definition,
                    handle,
                } => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(job_index = index, job_definition = %job_definition, error = %e, "Launch task aborted");
                        JobLaunchOutcome::failed(
                            job_definition,
                            FailureKind::Transport,
                            format!("launch task aborted: {}", e),
                        )
                    }
                },
            }
        }));

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(issued, total, "Dispatch cancelled while awaiting launches");
                return Err(DispatchError::Cancelled { issued, total });
            }
            outcomes = collect => outcomes,
        };

        let result = BatchResult::from_outcomes(outcomes);
        let summary = result.summary();
        let failure_rate = summary.failed as f64 / summary.total as f64 * 100.0;

        info!(
            total = summary.total,
            pending = summary.pending,
            failed = summary.failed,
            duration_ms = batch_start.elapsed().as_millis(),
            "Batch dispatch completed"
        );

        if failure_rate > 20.0 && summary.total > 5 {
            warn!(
                failure_rate = format!("{:.2}%", failure_rate),
                failed = summary.failed,
                "High launch failure rate in batch"
            );
        }

        Ok(result)
    }
}

/// Issue one launch under `timeout` and turn the answer into an outcome
#[instrument(skip(fleet, request, timeout), fields(job_definition = %request.job_definition))]
async fn launch_one(
    fleet: &dyn FleetService,
    index: usize,
    request: StartJobRequest,
    timeout: Duration,
) -> JobLaunchOutcome {
    let start = Instant::now();

    let answer = match tokio::time::timeout(timeout, fleet.start_job(&request)).await {
        Ok(answer) => answer,
        Err(_) => Err(FleetError::Timeout(timeout)),
    };

    match answer.and_then(|response| response.into_run_id()) {
        Ok(run_id) => {
            info!(
                job_index = index,
                run_id = %run_id,
                duration_ms = start.elapsed().as_millis(),
                "Job launched"
            );
            JobLaunchOutcome::pending(request.job_definition, run_id)
        }
        Err(e) => {
            error!(
                job_index = index,
                kind = ?e.category(),
                error = %e,
                duration_ms = start.elapsed().as_millis(),
                "Job launch failed"
            );
            JobLaunchOutcome::failed(request.job_definition, e.category(), e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::MemoryFleet;

    #[test]
    fn test_dispatcher_defaults() {
        let dispatcher = BatchDispatcher::new(Arc::new(MemoryFleet::new()));
        assert_eq!(dispatcher.config().concurrency_limit, 10);
        assert_eq!(dispatcher.config().call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_dispatcher_configuration() {
        let dispatcher = BatchDispatcher::new(Arc::new(MemoryFleet::new()))
            .with_concurrency_limit(0)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(dispatcher.config().concurrency_limit, 1);
        assert_eq!(dispatcher.config().call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_oversized_concurrency_limit_is_clamped() {
        let dispatcher =
            BatchDispatcher::new(Arc::new(MemoryFleet::new())).with_concurrency_limit(usize::MAX);
        assert_eq!(dispatcher.config().concurrency_limit, MAX_CONCURRENCY_LIMIT);
    }

    #[tokio::test]
    async fn test_oversized_limit_in_config_fails_before_any_call() {
        let fleet = Arc::new(MemoryFleet::new());
        let dispatcher = BatchDispatcher::new(fleet.clone()).with_config(DispatcherConfig {
            concurrency_limit: usize::MAX,
            call_timeout: Duration::from_secs(5),
        });
        let placement = PlacementConfig::new("c")
            .with_subnet("subnet-1")
            .with_security_group("sg-1");

        let result = dispatcher.dispatch(&placement, &[JobRequest::new("def")]).await;

        assert!(matches!(
            result,
            Err(DispatchError::Config(crate::ConfigError::InvalidDispatcherSetting(_)))
        ));
        assert_eq!(fleet.call_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_is_a_config_error() {
        let fleet = Arc::new(MemoryFleet::new());
        let dispatcher = BatchDispatcher::new(fleet.clone()).with_timeout(Duration::ZERO);
        let placement = PlacementConfig::new("c")
            .with_subnet("subnet-1")
            .with_security_group("sg-1");

        let result = dispatcher.dispatch(&placement, &[JobRequest::new("def")]).await;

        assert!(matches!(result, Err(DispatchError::Config(_))));
        assert_eq!(fleet.call_count(), 0);
    }
}
