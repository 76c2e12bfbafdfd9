//! Collaborator seams: the remote invocation service and the log store.
//!
//! The run never talks to AWS directly. It is handed implementations of these
//! traits, which lets tests drive it with in-memory fakes.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{FunctionPage, InvocationRequest, InvocationResponse};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// `TooManyRequestsException` or an equivalent rate/concurrency rejection.
    #[error("Too many requests: {0}")]
    Throttled(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogStoreError {
    /// The log group or stream does not exist (yet).
    #[error("Log stream not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait InvocationService: Send + Sync {
    /// Lists one page of functions. `page_token` is `None` for the first page.
    async fn list_functions(
        &self,
        page_token: Option<String>,
        page_size: i32,
    ) -> Result<FunctionPage, ServiceError>;

    async fn get_tags(&self, arn: &str) -> Result<HashMap<String, String>, ServiceError>;

    async fn invoke(&self, request: &InvocationRequest)
        -> Result<InvocationResponse, ServiceError>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Returns up to `limit` of the most recent messages of a stream,
    /// newest last.
    async fn read_recent_entries(
        &self,
        log_group: &str,
        log_stream: &str,
        limit: i32,
    ) -> Result<Vec<String>, LogStoreError>;
}
