//! Placement and dispatcher configuration
//!
//! [`PlacementConfig`] describes where every job of a batch runs and is shared
//! read-only by all launches. [`DispatcherConfig`] holds the knobs of the
//! dispatch loop itself. Both can be built in code or loaded from the
//! environment variables used by the serverless deployment.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::job::JobRequest;

/// Cluster to launch into
pub const ENV_CLUSTER: &str = "ecs_cluster";
/// Subnet identifier(s), comma separated
pub const ENV_SUBNET: &str = "subnet";
/// Subnet variable of the single-job deployment, read when [`ENV_SUBNET`] is unset
pub const ENV_SUBNET_FALLBACK: &str = "ecs_subnet";
/// Security group identifier(s), comma separated
pub const ENV_SECURITY_GROUP: &str = "security_group";
/// Security group variable of the single-job deployment, read when
/// [`ENV_SECURITY_GROUP`] is unset
pub const ENV_SECURITY_GROUP_FALLBACK: &str = "ecs_security_group";

/// JSON array of job definition identifiers
pub const ENV_JOB_DEFINITIONS: &str = "ecs_task_arns";
/// Single job definition identifier
pub const ENV_SINGLE_JOB_DEFINITION: &str = "ecs_arn";
/// Optional launch mode override
pub const ENV_LAUNCH_TYPE: &str = "launch_type";
/// Optional public IP policy override
pub const ENV_ASSIGN_PUBLIC_IP: &str = "assign_public_ip";
/// Optional in-flight call limit
pub const ENV_CONCURRENCY: &str = "dispatch_concurrency";
/// Optional per-call timeout in seconds
pub const ENV_TIMEOUT_SECS: &str = "dispatch_timeout_secs";

/// Largest accepted in-flight call limit
pub const MAX_CONCURRENCY_LIMIT: usize = Semaphore::MAX_PERMITS;

/// Errors raised before any launch is attempted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Cluster name is blank
    #[error("cluster name must not be empty")]
    EmptyCluster,

    /// No subnet given
    #[error("at least one subnet identifier is required")]
    NoSubnets,

    /// No security group given
    #[error("at least one security group identifier is required")]
    NoSecurityGroups,

    /// Blank subnet at the given position
    #[error("subnet identifier at position {0} is empty")]
    EmptySubnet(usize),

    /// Blank security group at the given position
    #[error("security group identifier at position {0} is empty")]
    EmptySecurityGroup(usize),

    /// Required environment variable is unset or blank
    #[error("missing environment variable: {0}")]
    MissingVar(String),

    /// Environment variable present but unparseable
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name
        name: String,
        /// Parse failure
        reason: String,
    },

    /// Dispatcher setting out of range
    #[error("invalid dispatcher setting: {0}")]
    InvalidDispatcherSetting(String),
}

/// Capacity model the fleet uses to run a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchMode {
    /// Serverless, managed capacity
    #[default]
    Fargate,
    /// Self-managed instances registered with the cluster
    Ec2,
    /// Capacity registered from outside the provider
    External,
}

impl LaunchMode {
    /// Wire name used by the fleet API
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Fargate => "FARGATE",
            LaunchMode::Ec2 => "EC2",
            LaunchMode::External => "EXTERNAL",
        }
    }
}

impl FromStr for LaunchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FARGATE" => Ok(LaunchMode::Fargate),
            "EC2" => Ok(LaunchMode::Ec2),
            "EXTERNAL" => Ok(LaunchMode::External),
            other => Err(ConfigError::InvalidVar {
                name: ENV_LAUNCH_TYPE.to_string(),
                reason: format!("unknown launch type '{}'", other),
            }),
        }
    }
}

/// Whether launched jobs receive a public address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicIpPolicy {
    /// Assign a public address
    #[default]
    Enabled,
    /// Private addressing only
    Disabled,
}

impl PublicIpPolicy {
    /// Wire name used by the fleet API
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicIpPolicy::Enabled => "ENABLED",
            PublicIpPolicy::Disabled => "DISABLED",
        }
    }
}

impl FromStr for PublicIpPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enabled" | "true" | "yes" | "1" => Ok(PublicIpPolicy::Enabled),
            "disabled" | "false" | "no" | "0" => Ok(PublicIpPolicy::Disabled),
            other => Err(ConfigError::InvalidVar {
                name: ENV_ASSIGN_PUBLIC_IP.to_string(),
                reason: format!("expected ENABLED or DISABLED, got '{}'", other),
            }),
        }
    }
}

/// Network and cluster context shared by every job in one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Fleet or cluster name
    pub cluster: String,
    /// Capacity model
    #[serde(default)]
    pub launch_mode: LaunchMode,
    /// Subnets the job's network interface may be placed in
    pub subnets: Vec<String>,
    /// Security boundaries attached to the job
    pub security_groups: Vec<String>,
    /// Public address assignment
    #[serde(default)]
    pub public_ip: PublicIpPolicy,
}

impl PlacementConfig {
    /// Start a placement for `cluster` with no network attached yet
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            launch_mode: LaunchMode::default(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            public_ip: PublicIpPolicy::default(),
        }
    }

    /// Add a subnet
    pub fn with_subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnets.push(subnet.into());
        self
    }

    /// Add a security group
    pub fn with_security_group(mut self, group: impl Into<String>) -> Self {
        self.security_groups.push(group.into());
        self
    }

    /// Set the capacity model
    pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
        self.launch_mode = mode;
        self
    }

    /// Set the public address policy
    pub fn with_public_ip(mut self, policy: PublicIpPolicy) -> Self {
        self.public_ip = policy;
        self
    }

    /// Structural checks only. Identifiers are otherwise opaque and are
    /// judged by the fleet itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.trim().is_empty() {
            return Err(ConfigError::EmptyCluster);
        }
        if self.subnets.is_empty() {
            return Err(ConfigError::NoSubnets);
        }
        if self.security_groups.is_empty() {
            return Err(ConfigError::NoSecurityGroups);
        }
        if let Some(pos) = self.subnets.iter().position(|s| s.trim().is_empty()) {
            return Err(ConfigError::EmptySubnet(pos));
        }
        if let Some(pos) = self.security_groups.iter().position(|g| g.trim().is_empty()) {
            return Err(ConfigError::EmptySecurityGroup(pos));
        }
        Ok(())
    }

    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cluster = required(&lookup, ENV_CLUSTER)?;

        let mut config = PlacementConfig::new(cluster);
        config.subnets =
            split_list(&required_with_fallback(&lookup, ENV_SUBNET, ENV_SUBNET_FALLBACK)?);
        config.security_groups = split_list(&required_with_fallback(
            &lookup,
            ENV_SECURITY_GROUP,
            ENV_SECURITY_GROUP_FALLBACK,
        )?);

        if let Some(mode) = optional(&lookup, ENV_LAUNCH_TYPE) {
            config.launch_mode = mode.parse()?;
        }
        if let Some(policy) = optional(&lookup, ENV_ASSIGN_PUBLIC_IP) {
            config.public_ip = policy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Settings of the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of start-job calls in flight at once
    pub concurrency_limit: usize,
    /// Upper bound for a single start-job call
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    /// Check the limits the dispatch loop can actually honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::InvalidDispatcherSetting(
                "concurrency limit must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit > MAX_CONCURRENCY_LIMIT {
            return Err(ConfigError::InvalidDispatcherSetting(format!(
                "concurrency limit must not exceed {}",
                MAX_CONCURRENCY_LIMIT
            )));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidDispatcherSetting(
                "call timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from the process environment, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = DispatcherConfig::default();

        if let Some(raw) = optional(&lookup, ENV_CONCURRENCY) {
            let limit = parse_positive(ENV_CONCURRENCY, &raw)?;
            config.concurrency_limit = usize::try_from(limit)
                .ok()
                .filter(|limit| *limit <= MAX_CONCURRENCY_LIMIT)
                .ok_or_else(|| ConfigError::InvalidVar {
                    name: ENV_CONCURRENCY.to_string(),
                    reason: format!("must not exceed {}", MAX_CONCURRENCY_LIMIT),
                })?;
        }
        if let Some(raw) = optional(&lookup, ENV_TIMEOUT_SECS) {
            config.call_timeout = Duration::from_secs(parse_positive(ENV_TIMEOUT_SECS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Load the batch of job definitions from the process environment
pub fn load_job_requests_from_env() -> Result<Vec<JobRequest>, ConfigError> {
    load_job_requests(|name| std::env::var(name).ok())
}

/// Read `ecs_task_arns` as a JSON array, or fall back to the single
/// `ecs_arn` definition.
pub fn load_job_requests<F>(lookup: F) -> Result<Vec<JobRequest>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = optional(&lookup, ENV_JOB_DEFINITIONS) {
        let definitions: Vec<String> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidVar {
                name: ENV_JOB_DEFINITIONS.to_string(),
                reason: e.to_string(),
            })?;
        return Ok(definitions.into_iter().map(JobRequest::new).collect());
    }

    match optional(&lookup, ENV_SINGLE_JOB_DEFINITION) {
        Some(definition) => Ok(vec![JobRequest::new(definition)]),
        None => Err(ConfigError::MissingVar(ENV_JOB_DEFINITIONS.to_string())),
    }
}

fn optional<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name).ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn required_with_fallback<F>(lookup: &F, name: &str, fallback: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, name)
        .or_else(|| optional(lookup, fallback))
        .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_positive(name: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidVar {
            name: name.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidVar {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placement() -> PlacementConfig {
        PlacementConfig::new("compute")
            .with_subnet("subnet-1")
            .with_security_group("sg-1")
    }

    #[test]
    fn test_valid_placement() {
        assert_eq!(placement().validate(), Ok(()));
    }

    #[test]
    fn test_missing_network_fields() {
        let no_subnets = PlacementConfig::new("compute").with_security_group("sg-1");
        assert_eq!(no_subnets.validate(), Err(ConfigError::NoSubnets));

        let no_groups = PlacementConfig::new("compute").with_subnet("subnet-1");
        assert_eq!(no_groups.validate(), Err(ConfigError::NoSecurityGroups));

        let blank_cluster = PlacementConfig::new("  ")
            .with_subnet("subnet-1")
            .with_security_group("sg-1");
        assert_eq!(blank_cluster.validate(), Err(ConfigError::EmptyCluster));
    }

    #[test]
    fn test_empty_identifier_inside_list() {
        let config = placement().with_subnet("");
        assert_eq!(config.validate(), Err(ConfigError::EmptySubnet(1)));
    }

    #[test]
    fn test_launch_mode_parsing() {
        assert_eq!("fargate".parse::<LaunchMode>(), Ok(LaunchMode::Fargate));
        assert_eq!("EC2".parse::<LaunchMode>(), Ok(LaunchMode::Ec2));
        assert!("spot".parse::<LaunchMode>().is_err());
        assert_eq!(LaunchMode::External.as_str(), "EXTERNAL");
    }

    #[test]
    fn test_public_ip_parsing() {
        assert_eq!("ENABLED".parse::<PublicIpPolicy>(), Ok(PublicIpPolicy::Enabled));
        assert_eq!("false".parse::<PublicIpPolicy>(), Ok(PublicIpPolicy::Disabled));
        assert!("maybe".parse::<PublicIpPolicy>().is_err());
    }

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.concurrency_limit, 10);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_concurrency_limit_upper_bound() {
        let config = DispatcherConfig {
            concurrency_limit: usize::MAX,
            ..DispatcherConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDispatcherSetting(_))
        ));

        let at_bound = DispatcherConfig {
            concurrency_limit: MAX_CONCURRENCY_LIMIT,
            ..DispatcherConfig::default()
        };
        assert!(at_bound.validate().is_ok());

        let oversized: DispatcherConfig = serde_json::from_value(serde_json::json!({
            "concurrency_limit": u64::MAX,
            "call_timeout": 5
        }))
        .unwrap();
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_dispatcher_config_serde() {
        let json = serde_json::to_value(DispatcherConfig::default()).unwrap();
        assert_eq!(json["call_timeout"], 30);

        let parsed: DispatcherConfig =
            serde_json::from_str(r#"{"concurrency_limit": 4, "call_timeout": 5}"#).unwrap();
        assert_eq!(parsed.concurrency_limit, 4);
        assert_eq!(parsed.call_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list(" , ").is_empty());
    }
}
