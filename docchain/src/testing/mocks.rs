//! Stub backends and sinks for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::backend::{BackendError, GenerationBackend, GenerationRequest, GenerationResponse, Usage};
use crate::observability::{SpanHandle, SpanRecord, TraceError, TraceSink};

type Responder =
    Box<dyn Fn(&GenerationRequest) -> Result<GenerationResponse, BackendError> + Send + Sync>;

/// A backend that answers every request with a closure.
pub struct FnBackend {
    respond: Responder,
    calls: AtomicUsize,
}

impl FnBackend {
    /// Creates a backend from a full responder.
    #[must_use]
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<GenerationResponse, BackendError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a backend whose closure returns the JSON value to emit.
    #[must_use]
    pub fn json<F>(respond: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Value + Send + Sync + 'static,
    {
        Self::new(move |request| Ok(GenerationResponse::new(respond(request).to_string())))
    }

    /// Returns the number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FnBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnBackend")
            .field("calls", &self.call_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GenerationBackend for FnBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(request)
    }
}

/// A backend that replays queued responses per stage and records requests.
///
/// The last queued response for a stage repeats once the queue is down to
/// one entry. A stage with no script fails with
/// [`BackendError::InvalidResponse`].
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, BackendError>>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    /// Creates a backend with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a raw text response for `stage`.
    #[must_use]
    pub fn respond(self, stage: impl Into<String>, text: impl Into<String>) -> Self {
        self.push(stage.into(), Ok(text.into()));
        self
    }

    /// Queues a backend failure for `stage`.
    #[must_use]
    pub fn fail(self, stage: impl Into<String>, error: BackendError) -> Self {
        self.push(stage.into(), Err(error));
        self
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, stage: String, response: Result<String, BackendError>) {
        self.scripts.lock().entry(stage).or_default().push_back(response);
    }

    /// All requests received, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    /// Requests received for one stage.
    #[must_use]
    pub fn requests_for(&self, stage: &str) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.stage == stage)
            .cloned()
            .collect()
    }

    /// Total number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of calls for one stage.
    #[must_use]
    pub fn calls_for(&self, stage: &str) -> usize {
        self.requests.lock().iter().filter(|r| r.stage == stage).count()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&request.stage) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match next {
            Some(Ok(text)) => Ok(GenerationResponse::new(text)
                .with_model("scripted")
                .with_usage(Usage::new(1, 1))),
            Some(Err(err)) => Err(err),
            None => Err(BackendError::InvalidResponse(format!(
                "no scripted response for stage '{}'",
                request.stage
            ))),
        }
    }
}

/// A trace sink whose every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingTraceSink;

impl TraceSink for FailingTraceSink {
    fn begin_span(&self, _run_id: Uuid, stage: &str) -> Result<SpanHandle, TraceError> {
        Err(TraceError(format!("tracing backend rejected span for '{stage}'")))
    }

    fn end_span(&self, _handle: SpanHandle, _record: SpanRecord) -> Result<(), TraceError> {
        Err(TraceError("tracing backend unavailable".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(stage: &str) -> GenerationRequest {
        GenerationRequest {
            run_id: Uuid::new_v4(),
            stage: stage.to_string(),
            model_id: "m".to_string(),
            intent: String::new(),
            inputs: Vec::new(),
            output_contract: "C".to_string(),
            contract_descriptor: json!({}),
            max_output_tokens: 10,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_scripted_backend_queue_and_repeat() {
        let backend = ScriptedBackend::new().respond("a", "one").respond("a", "two");

        assert_eq!(backend.generate(&request("a")).await.unwrap().text, "one");
        assert_eq!(backend.generate(&request("a")).await.unwrap().text, "two");
        assert_eq!(backend.generate(&request("a")).await.unwrap().text, "two");
        assert!(backend.generate(&request("b")).await.is_err());
        assert_eq!(backend.calls_for("a"), 3);
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_fn_backend_counts_calls() {
        let backend = FnBackend::json(|req| json!({"stage": req.stage}));
        let response = backend.generate(&request("x")).await.unwrap();

        assert_eq!(response.text, r#"{"stage":"x"}"#);
        assert_eq!(backend.call_count(), 1);
    }

    #[test]
    fn test_failing_trace_sink() {
        let sink = FailingTraceSink;
        assert!(sink.begin_span(Uuid::new_v4(), "s").is_err());
        assert!(sink.end_span(SpanHandle::new(), SpanRecord::default()).is_err());
    }
}
