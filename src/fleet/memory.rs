//! In-memory fleet for tests and local runs
//!
//! Answers are scripted per job definition. The in-flight high-water mark is
//! tracked so tests can assert the concurrency bound.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{FleetError, FleetService, StartJobRequest, StartJobResponse};

/// Scripted reaction of a [`MemoryFleet`] to one call
#[derive(Debug, Clone)]
pub enum FleetBehavior {
    /// Start the job under a freshly generated run identifier
    Start,
    /// Start the job under the given run identifier
    StartWith(String),
    /// Answer with success but no run identifier
    StartWithoutRunId,
    /// Fail with the given error
    Fail(FleetError),
    /// Never answer
    Hang,
    /// Panic inside the call
    Panic,
}

/// In-memory fleet that records every call
///
/// Behaviours scripted per job definition are consumed in call order; once a
/// definition's script runs out, the default behaviour applies.
#[derive(Debug)]
pub struct MemoryFleet {
    scripts: Mutex<HashMap<String, VecDeque<FleetBehavior>>>,
    default_behavior: FleetBehavior,
    latency: Duration,
    latency_overrides: HashMap<String, Duration>,
    calls: Mutex<Vec<StartJobRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl MemoryFleet {
    /// A fleet that starts every job after no delay
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_behavior: FleetBehavior::Start,
            latency: Duration::ZERO,
            latency_overrides: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Queue a behaviour for the next call naming `definition`
    pub fn script(self, definition: impl Into<String>, behavior: FleetBehavior) -> Self {
        self.scripts
            .lock()
            .entry(definition.into())
            .or_default()
            .push_back(behavior);
        self
    }

    /// Behaviour for calls with no scripted answer left
    pub fn with_default(mut self, behavior: FleetBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Delay applied to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay applied to calls naming `definition`, replacing the global one
    pub fn with_latency_for(mut self, definition: impl Into<String>, latency: Duration) -> Self {
        self.latency_overrides.insert(definition.into(), latency);
        self
    }

    /// Calls received so far, in arrival order
    pub fn calls(&self) -> Vec<StartJobRequest> {
        self.calls.lock().clone()
    }

    /// Number of calls received so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Calls that ran to an answer, successful or not
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn next_behavior(&self, definition: &str) -> FleetBehavior {
        self.scripts
            .lock()
            .get_mut(definition)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_behavior.clone())
    }
}

impl Default for MemoryFleet {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FleetService for MemoryFleet {
    async fn start_job(&self, request: &StartJobRequest) -> Result<StartJobResponse, FleetError> {
        self.calls.lock().push(request.clone());
        let behavior = self.next_behavior(&request.job_definition);

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = self
            .latency_overrides
            .get(&request.job_definition)
            .copied()
            .unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        debug!(job_definition = %request.job_definition, ?behavior, "Memory fleet answering");
        let response = match behavior {
            FleetBehavior::Start => Ok(StartJobResponse::started(format!(
                "arn:fleet:{}:run/{}",
                request.cluster,
                Uuid::new_v4()
            ))),
            FleetBehavior::StartWith(run_id) => Ok(StartJobResponse::started(run_id)),
            FleetBehavior::StartWithoutRunId => Ok(StartJobResponse::empty()),
            FleetBehavior::Fail(error) => Err(error),
            FleetBehavior::Hang => std::future::pending().await,
            FleetBehavior::Panic => panic!("scripted panic for {}", request.job_definition),
        };

        self.completed.fetch_add(1, Ordering::SeqCst);
        response
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlacementConfig;
    use crate::job::JobRequest;

    fn request(definition: &str) -> StartJobRequest {
        let placement = PlacementConfig::new("test")
            .with_subnet("subnet-1")
            .with_security_group("sg-1");
        StartJobRequest::new(&placement, &JobRequest::new(definition))
    }

    #[tokio::test]
    async fn test_scripts_are_consumed_in_order() {
        let fleet = MemoryFleet::new()
            .script("def", FleetBehavior::StartWith("run-1".to_string()))
            .script("def", FleetBehavior::Fail(FleetError::rejected("QuotaExceeded")));

        let first = fleet.start_job(&request("def")).await;
        let second = fleet.start_job(&request("def")).await;
        let third = fleet.start_job(&request("def")).await;

        assert_eq!(first, Ok(StartJobResponse::started("run-1")));
        assert_eq!(second, Err(FleetError::rejected("QuotaExceeded")));
        assert!(third.unwrap().run_id.unwrap().starts_with("arn:fleet:test:run/"));
        assert_eq!(fleet.call_count(), 3);
        assert_eq!(fleet.completed(), 3);
    }

    #[tokio::test]
    async fn test_generated_run_ids_are_unique() {
        let fleet = MemoryFleet::new();
        let a = fleet.start_job(&request("def")).await.unwrap();
        let b = fleet.start_job(&request("def")).await.unwrap();
        assert_ne!(a.run_id, b.run_id);
    }

    #[tokio::test]
    async fn test_hanging_call_releases_in_flight_slot_on_drop() {
        let fleet = MemoryFleet::new().with_default(FleetBehavior::Hang);
        let result =
            tokio::time::timeout(Duration::from_millis(20), fleet.start_job(&request("def"))).await;

        assert!(result.is_err());
        assert_eq!(fleet.max_in_flight(), 1);
        assert_eq!(fleet.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(fleet.completed(), 0);
    }
}
