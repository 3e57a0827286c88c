// ECS fleet binding
// Starts each job as a task through the RunTask API.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::operation::run_task::RunTaskOutput;
use aws_sdk_ecs::types::{AssignPublicIp, AwsVpcConfiguration, LaunchType, NetworkConfiguration};
use aws_sdk_ecs::Client;
use aws_types::region::Region;
use tracing::debug;

use super::{FleetError, FleetService, StartJobRequest, StartJobResponse};
use crate::config::{LaunchMode, PublicIpPolicy};

/// Fleet backed by an ECS cluster
#[derive(Debug, Clone)]
pub struct EcsFleet {
    client: Client,
}

impl EcsFleet {
    /// Wrap an already configured client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the default credential and region chain
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }

    /// Build a client pinned to `region`, optionally against a custom
    /// endpoint such as LocalStack
    pub async fn with_region(region: impl Into<String>, endpoint_url: Option<String>) -> Self {
        let mut builder =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.into()));

        if let Some(endpoint) = endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        let config = builder.load().await;
        Self::new(Client::new(&config))
    }

    fn network_configuration(
        request: &StartJobRequest,
    ) -> Result<NetworkConfiguration, FleetError> {
        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(request.subnets.clone()))
            .set_security_groups(Some(request.security_groups.clone()))
            .assign_public_ip(assign_public_ip(request.public_ip))
            .build()
            .map_err(|e| FleetError::InvalidRequest(format!("network configuration: {}", e)))?;

        Ok(NetworkConfiguration::builder()
            .awsvpc_configuration(vpc)
            .build())
    }
}

fn launch_type(mode: LaunchMode) -> LaunchType {
    match mode {
        LaunchMode::Fargate => LaunchType::Fargate,
        LaunchMode::Ec2 => LaunchType::Ec2,
        LaunchMode::External => LaunchType::External,
    }
}

fn assign_public_ip(policy: PublicIpPolicy) -> AssignPublicIp {
    match policy {
        PublicIpPolicy::Enabled => AssignPublicIp::Enabled,
        PublicIpPolicy::Disabled => AssignPublicIp::Disabled,
    }
}

/// Read the started task out of a RunTask answer
///
/// An answer with neither a task nor a failure yields an empty response,
/// which the dispatcher records as a missing run identifier.
fn run_id_from_output(output: RunTaskOutput) -> Result<StartJobResponse, FleetError> {
    if let Some(run_id) = output.tasks().first().and_then(|task| task.task_arn()) {
        return Ok(StartJobResponse::started(run_id));
    }

    // RunTask reports placement problems in-band rather than as an error
    if let Some(failure) = output.failures().first() {
        return Err(FleetError::Rejected {
            code: failure.reason().unwrap_or("UnknownFailure").to_string(),
            message: failure.detail().map(str::to_string),
        });
    }

    Ok(StartJobResponse::empty())
}

/// Map an SDK failure onto the per-job taxonomy
fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> FleetError
where
    E: std::error::Error + ProvideErrorMetadata + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::ServiceError(context) => {
            let service_error = context.err();
            FleetError::Rejected {
                code: service_error.code().unwrap_or("ServiceError").to_string(),
                message: service_error.message().map(str::to_string),
            }
        }
        SdkError::ResponseError(_) => {
            FleetError::MalformedResponse(DisplayErrorContext(&err).to_string())
        }
        _ => FleetError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl FleetService for EcsFleet {
    async fn start_job(&self, request: &StartJobRequest) -> Result<StartJobResponse, FleetError> {
        let network = Self::network_configuration(request)?;

        debug!(
            cluster = %request.cluster,
            task_definition = %request.job_definition,
            "Running task"
        );

        let output = self
            .client
            .run_task()
            .cluster(&request.cluster)
            .launch_type(launch_type(request.launch_mode))
            .task_definition(&request.job_definition)
            .network_configuration(network)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        run_id_from_output(output)
    }

    fn name(&self) -> &str {
        "ecs"
    }
}
