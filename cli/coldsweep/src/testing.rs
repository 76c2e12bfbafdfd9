//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use base64::Engine;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::service::{InvocationService, LogStore, LogStoreError, ServiceError};
use crate::types::{FunctionDescriptor, FunctionPage, InvocationRequest, InvocationResponse};

pub fn descriptor(name: &str) -> FunctionDescriptor {
    FunctionDescriptor::new(name, format!("arn:aws:lambda:us-east-1:123456789012:function:{name}"))
}

/// A response whose log tail carries the given text.
pub fn response_with_logs(logs: &str) -> InvocationResponse {
    InvocationResponse {
        status_code: 200,
        log_tail: Some(base64::engine::general_purpose::STANDARD.encode(logs)),
        ..Default::default()
    }
}

pub fn cold_start_response(init_ms: f64) -> InvocationResponse {
    response_with_logs(&format!(
        "START RequestId: abc\nREPORT RequestId: abc\tDuration: 1.50 ms\tInit Duration: {init_ms} ms\n"
    ))
}

pub fn warm_start_response() -> InvocationResponse {
    response_with_logs("START RequestId: abc\nREPORT RequestId: abc\tDuration: 1.50 ms\n")
}

/// Scripted invocation service that records what it was asked to do.
pub struct FakeInvocationService {
    pages: Vec<Result<Vec<FunctionDescriptor>, ServiceError>>,
    tags: HashMap<String, HashMap<String, String>>,
    responses: HashMap<String, Result<InvocationResponse, ServiceError>>,
    default_response: InvocationResponse,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    list_calls: AtomicUsize,
    tag_calls: AtomicUsize,
    invoked: Mutex<Vec<InvocationRequest>>,
}

impl FakeInvocationService {
    pub fn new(pages: Vec<Result<Vec<FunctionDescriptor>, ServiceError>>) -> Self {
        Self {
            pages,
            tags: HashMap::new(),
            responses: HashMap::new(),
            default_response: warm_start_response(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
            invoked: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tag(mut self, name: &str, key: &str, value: &str) -> Self {
        self.tags
            .entry(descriptor(name).arn)
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_response(
        mut self,
        name: &str,
        response: Result<InvocationResponse, ServiceError>,
    ) -> Self {
        self.responses.insert(name.to_string(), response);
        self
    }

    pub fn with_default_response(mut self, response: InvocationResponse) -> Self {
        self.default_response = response;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invoked_names(&self) -> Vec<String> {
        self.invoked
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.target.name.clone())
            .collect()
    }

    pub fn invoked_requests(&self) -> Vec<InvocationRequest> {
        self.invoked.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InvocationService for FakeInvocationService {
    async fn list_functions(
        &self,
        page_token: Option<String>,
        _page_size: i32,
    ) -> Result<FunctionPage, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = page_token.as_deref().map_or(0, |t| t.parse().unwrap());
        let Some(page) = self.pages.get(index) else {
            return Ok(FunctionPage::default());
        };
        let functions = page.clone()?;
        let next_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(FunctionPage {
            functions,
            next_token,
        })
    }

    async fn get_tags(&self, arn: &str) -> Result<HashMap<String, String>, ServiceError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tags.get(arn).cloned().unwrap_or_default())
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, ServiceError> {
        self.invoked.lock().unwrap().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.responses
            .get(&request.target.name)
            .cloned()
            .unwrap_or_else(|| Ok(self.default_response.clone()))
    }
}

/// Log store that replays a script of reads, then keeps returning nothing.
pub struct FakeLogStore {
    script: Mutex<VecDeque<Result<Vec<String>, LogStoreError>>>,
    reads: AtomicUsize,
    last_target: Mutex<Option<(String, String)>>,
}

impl FakeLogStore {
    pub fn new(script: Vec<Result<Vec<String>, LogStoreError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            reads: AtomicUsize::new(0),
            last_target: Mutex::new(None),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn last_target(&self) -> Option<(String, String)> {
        self.last_target.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogStore for FakeLogStore {
    async fn read_recent_entries(
        &self,
        log_group: &str,
        log_stream: &str,
        _limit: i32,
    ) -> Result<Vec<String>, LogStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        *self.last_target.lock().unwrap() = Some((log_group.to_string(), log_stream.to_string()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
