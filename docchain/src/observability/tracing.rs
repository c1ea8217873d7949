//! Tracing adapter for backend calls.
//!
//! Every backend call is bracketed by [`TraceSink::begin_span`] and
//! [`TraceSink::end_span`]. The engine holds only the opaque [`SpanHandle`];
//! sinks decide what a span is. Sink failures are logged by the caller and
//! never fail a run.

use crate::backend::Usage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identity of one traced backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanHandle(Uuid);

impl SpanHandle {
    /// Creates a fresh handle.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The handle's identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for SpanHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// What is reported when a span ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Raw backend output, empty when the call failed.
    pub output: String,
    /// The inputs sent with the call.
    pub input_echo: Value,
    /// Token usage, when the backend reported it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Model that served the call.
    pub model_id: String,
    /// Failure description for calls that errored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the call.
    pub duration_ms: f64,
}

impl SpanRecord {
    /// Flattens the record into span attributes.
    #[must_use]
    pub fn to_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("llm.model".to_string(), self.model_id.clone());
        attrs.insert("llm.duration_ms".to_string(), self.duration_ms.to_string());
        if let Some(usage) = self.usage {
            attrs.insert("llm.input_tokens".to_string(), usage.input_tokens.to_string());
            attrs.insert("llm.output_tokens".to_string(), usage.output_tokens.to_string());
            attrs.insert("llm.total_tokens".to_string(), usage.total().to_string());
        }
        if let Some(ref error) = self.error {
            attrs.insert("llm.error".to_string(), error.clone());
        }
        attrs
    }
}

/// A tracing backend failure.
#[derive(Debug, Clone, Error)]
#[error("trace sink error: {0}")]
pub struct TraceError(pub String);

/// Receives span lifecycle calls. Must be safe to share between runs.
pub trait TraceSink: Send + Sync {
    /// Opens a span for one backend call of `stage` in run `run_id`.
    fn begin_span(&self, run_id: Uuid, stage: &str) -> Result<SpanHandle, TraceError>;

    /// Closes a span.
    fn end_span(&self, handle: SpanHandle, record: SpanRecord) -> Result<(), TraceError>;
}

/// Discards all spans.
#[derive(Debug, Clone, Default)]
pub struct NoOpTraceSink;

impl TraceSink for NoOpTraceSink {
    fn begin_span(&self, _run_id: Uuid, _stage: &str) -> Result<SpanHandle, TraceError> {
        Ok(SpanHandle::new())
    }

    fn end_span(&self, _handle: SpanHandle, _record: SpanRecord) -> Result<(), TraceError> {
        Ok(())
    }
}

/// Writes spans to the `tracing` log.
#[derive(Debug, Clone, Default)]
pub struct LoggingTraceSink;

impl TraceSink for LoggingTraceSink {
    fn begin_span(&self, run_id: Uuid, stage: &str) -> Result<SpanHandle, TraceError> {
        let handle = SpanHandle::new();
        tracing::info!(span_id = %handle.id(), %run_id, stage, "Span started");
        Ok(handle)
    }

    fn end_span(&self, handle: SpanHandle, record: SpanRecord) -> Result<(), TraceError> {
        let attributes = record.to_attributes();
        if let Some(ref error) = record.error {
            tracing::error!(span_id = %handle.id(), error, ?attributes, "Span error");
        } else {
            tracing::info!(
                span_id = %handle.id(),
                duration_ms = record.duration_ms,
                ?attributes,
                "Span ended"
            );
        }
        Ok(())
    }
}

/// A span captured by [`CollectingTraceSink`].
#[derive(Debug, Clone)]
pub struct CollectedSpan {
    /// Span handle.
    pub handle: SpanHandle,
    /// Owning run.
    pub run_id: Uuid,
    /// Stage name.
    pub stage: String,
    /// End record, once the span is closed.
    pub record: Option<SpanRecord>,
}

/// Keeps spans in memory for inspection.
#[derive(Debug, Default)]
pub struct CollectingTraceSink {
    spans: Mutex<Vec<CollectedSpan>>,
}

impl CollectingTraceSink {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All spans seen so far, in begin order.
    #[must_use]
    pub fn spans(&self) -> Vec<CollectedSpan> {
        self.spans.lock().clone()
    }

    /// Spans for one stage.
    #[must_use]
    pub fn spans_for(&self, stage: &str) -> Vec<CollectedSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.stage == stage)
            .cloned()
            .collect()
    }

    /// Number of spans that were begun but not ended.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.spans.lock().iter().filter(|s| s.record.is_none()).count()
    }
}

impl TraceSink for CollectingTraceSink {
    fn begin_span(&self, run_id: Uuid, stage: &str) -> Result<SpanHandle, TraceError> {
        let handle = SpanHandle::new();
        self.spans.lock().push(CollectedSpan {
            handle,
            run_id,
            stage: stage.to_string(),
            record: None,
        });
        Ok(handle)
    }

    fn end_span(&self, handle: SpanHandle, record: SpanRecord) -> Result<(), TraceError> {
        let mut spans = self.spans.lock();
        let span = spans
            .iter_mut()
            .find(|s| s.handle == handle)
            .ok_or_else(|| TraceError(format!("unknown span {}", handle.id())))?;
        span.record = Some(record);
        Ok(())
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
