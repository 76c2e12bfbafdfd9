//! AWS implementations of the collaborator traits.
//!
//! - [`LambdaService`] lists, tags and invokes functions with `aws-sdk-lambda`.
//! - [`CloudWatchLogStore`] reads log streams with `aws-sdk-cloudwatchlogs`.
//! - [`load_sdk_config`] resolves region, profile and the retry policy.

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudwatchlogs::Client as CwlClient;
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{FunctionConfiguration, LogType};
use aws_sdk_lambda::Client as LambdaClient;
use std::collections::HashMap;
use std::time::Duration;

use crate::service::{InvocationService, LogStore, LogStoreError, ServiceError};
use crate::types::{FunctionDescriptor, FunctionPage, InvocationRequest, InvocationResponse};

const THROTTLING_CODE: &str = "TooManyRequestsException";
const NOT_FOUND_CODE: &str = "ResourceNotFoundException";
const DEFAULT_REGION: &str = "us-east-1";
const MAX_ATTEMPTS: u32 = 6;
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Loads the shared SDK configuration.
pub async fn load_sdk_config(region: Option<String>, profile: Option<String>) -> SdkConfig {
    let region_provider = RegionProviderChain::first_try(region.map(Region::new))
        .or_default_provider()
        .or_else(Region::new(DEFAULT_REGION));

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .retry_config(
            RetryConfig::standard()
                .with_max_attempts(MAX_ATTEMPTS)
                .with_max_backoff(MAX_BACKOFF),
        );
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }

    let config = loader.load().await;
    tracing::debug!(region = ?config.region(), "Loaded AWS config");
    config
}

/// Code and human-readable description of an SDK failure.
fn error_parts<E, R>(err: &SdkError<E, R>) -> (Option<String>, String)
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service_err) => {
            let code = service_err.code().map(str::to_string);
            let msg = format!(
                "Service error: {} ({})",
                service_err.message().unwrap_or_default(),
                code.as_deref().unwrap_or_default()
            );
            (code, msg)
        }
        None => (None, format!("SDK error: {}", DisplayErrorContext(err))),
    }
}

fn classify_service_error(code: Option<&str>, message: String) -> ServiceError {
    if code == Some(THROTTLING_CODE) {
        ServiceError::Throttled(message)
    } else {
        ServiceError::Other(message)
    }
}

fn to_service_error<E, R>(err: SdkError<E, R>) -> ServiceError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let (code, message) = error_parts(&err);
    classify_service_error(code.as_deref(), message)
}

fn classify_log_store_error(code: Option<&str>, message: String) -> LogStoreError {
    if code == Some(NOT_FOUND_CODE) {
        LogStoreError::NotFound(message)
    } else {
        LogStoreError::Other(message)
    }
}

fn descriptor_from(config: &FunctionConfiguration) -> Option<FunctionDescriptor> {
    Some(FunctionDescriptor {
        name: config.function_name()?.to_string(),
        arn: config.function_arn()?.to_string(),
        tags: HashMap::new(),
        runtime: config.runtime().map(|r| r.as_str().to_string()),
    })
}

#[derive(Clone)]
pub struct LambdaService {
    client: LambdaClient,
}

impl LambdaService {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: LambdaClient::new(config),
        }
    }
}

#[async_trait]
impl InvocationService for LambdaService {
    async fn list_functions(
        &self,
        page_token: Option<String>,
        page_size: i32,
    ) -> Result<FunctionPage, ServiceError> {
        let output = self
            .client
            .list_functions()
            .max_items(page_size)
            .set_marker(page_token)
            .send()
            .await
            .map_err(to_service_error)?;

        let functions = output
            .functions()
            .iter()
            .filter_map(|f| {
                let descriptor = descriptor_from(f);
                if descriptor.is_none() {
                    tracing::warn!(function = ?f.function_name(), "Skipping function without name or ARN");
                }
                descriptor
            })
            .collect();

        Ok(FunctionPage {
            functions,
            next_token: output.next_marker().map(str::to_string),
        })
    }

    async fn get_tags(&self, arn: &str) -> Result<HashMap<String, String>, ServiceError> {
        let output = self
            .client
            .list_tags()
            .resource(arn)
            .send()
            .await
            .map_err(to_service_error)?;
        Ok(output.tags().cloned().unwrap_or_default())
    }

    #[tracing::instrument(skip_all, fields(function = %request.target.name))]
    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, ServiceError> {
        let mut req = self
            .client
            .invoke()
            .function_name(&request.target.arn)
            .set_qualifier(request.alias.clone());
        if request.log_tail {
            req = req.log_type(LogType::Tail);
        }
        if let Some(payload) = &request.payload {
            req = req.payload(Blob::new(payload.clone()));
        }

        let output = req.send().await.map_err(to_service_error)?;
        Ok(InvocationResponse {
            status_code: output.status_code(),
            function_error: output.function_error().map(str::to_string),
            payload: output
                .payload()
                .map(|blob| blob.as_ref().to_vec())
                .unwrap_or_default(),
            log_tail: output.log_result().map(str::to_string),
        })
    }
}

#[derive(Clone)]
pub struct CloudWatchLogStore {
    client: CwlClient,
}

impl CloudWatchLogStore {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: CwlClient::new(config),
        }
    }
}

#[async_trait]
impl LogStore for CloudWatchLogStore {
    async fn read_recent_entries(
        &self,
        log_group: &str,
        log_stream: &str,
        limit: i32,
    ) -> Result<Vec<String>, LogStoreError> {
        let output = self
            .client
            .get_log_events()
            .log_group_name(log_group)
            .log_stream_name(log_stream)
            .start_from_head(false)
            .limit(limit)
            .send()
            .await
            .map_err(|err| {
                let (code, message) = error_parts(&err);
                classify_log_store_error(code.as_deref(), message)
            })?;

        Ok(output
            .events()
            .iter()
            .filter_map(|event| event.message().map(str::to_string))
            .collect())
    }
}
