//! Event sinks.

use super::{EventKind, RunEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn, Level};

/// Receives run lifecycle events.
///
/// One sink may be shared by concurrent runs; events of different runs
/// interleave and are told apart by [`RunEvent::run_id`].
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers an event, possibly waiting on I/O.
    async fn emit(&self, event: RunEvent) {
        self.try_emit(event);
    }

    /// Records an event without blocking. Must never fail.
    fn try_emit(&self, event: RunEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: RunEvent) {}
}

/// Writes events to `tracing` with the run, pipeline and stage as fields.
///
/// Failure events are always logged at `warn`; the rest at the configured
/// level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Logs non-failure events at `debug` instead of `info`.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
        }
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: RunEvent) {
        let RunEvent {
            kind,
            run_id,
            pipeline,
            stage,
            data,
            ..
        } = event;
        let stage = stage.as_deref().unwrap_or("-");
        if kind.is_failure() {
            warn!(event = %kind, %run_id, %pipeline, stage, %data, "Run event");
        } else if self.level == Level::DEBUG {
            debug!(event = %kind, %run_id, %pipeline, stage, %data, "Run event");
        } else {
            info!(event = %kind, %run_id, %pipeline, stage, %data, "Run event");
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    /// Wire names of the recorded events, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind.as_str()).collect()
    }

    /// Events of one kind.
    #[must_use]
    pub fn of_kind(&self, kind: EventKind) -> Vec<RunEvent> {
        self.filtered(|e| e.kind == kind)
    }

    /// Events concerning one stage.
    #[must_use]
    pub fn for_stage(&self, stage: &str) -> Vec<RunEvent> {
        self.filtered(|e| e.stage.as_deref() == Some(stage))
    }

    fn filtered(&self, keep: impl Fn(&RunEvent) -> bool) -> Vec<RunEvent> {
        self.events.lock().iter().filter(|e| keep(e)).cloned().collect()
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: RunEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    fn event(kind: EventKind, stage: Option<&str>) -> RunEvent {
        let event = RunEvent::new(kind, Uuid::nil(), "proposal_document");
        match stage {
            Some(stage) => event.with_stage(stage),
            None => event,
        }
    }

    #[tokio::test]
    async fn test_noop_sink_accepts_events() {
        let sink = NoOpEventSink;
        sink.emit(event(EventKind::PipelineStarted, None)).await;
        sink.try_emit(event(EventKind::PipelineCompleted, None));
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_every_kind() {
        let sink = LoggingEventSink::default();
        sink.emit(event(EventKind::StageStarted, Some("job_info"))).await;
        sink.try_emit(event(EventKind::StageFailed, Some("job_info")).with_data(json!({"error": "x"})));
        LoggingEventSink::verbose().try_emit(event(EventKind::PipelineFailed, None));
        LoggingEventSink::verbose().try_emit(event(EventKind::ArtifactSuperseded, Some("revise")));
    }

    #[tokio::test]
    async fn test_collecting_sink_keeps_order() {
        let sink = CollectingEventSink::new();

        sink.emit(event(EventKind::PipelineStarted, None)).await;
        sink.try_emit(event(EventKind::StageStarted, Some("job_info")));
        sink.try_emit(
            event(EventKind::StageCompleted, Some("job_info")).with_data(json!({"attempts": 1})),
        );

        assert_eq!(
            sink.event_types(),
            vec!["pipeline.started", "stage.started", "stage.completed"]
        );
        assert_eq!(sink.events()[2].get("attempts"), Some(&json!(1)));
    }

    #[test]
    fn test_collecting_sink_filters() {
        let sink = CollectingEventSink::new();
        sink.try_emit(event(EventKind::StageStarted, Some("job_info")));
        sink.try_emit(event(EventKind::StageRetrying, Some("job_skills")));
        sink.try_emit(event(EventKind::StageRetrying, Some("job_skills")));
        sink.try_emit(event(EventKind::PipelineFailed, Some("job_skills")));

        assert_eq!(sink.of_kind(EventKind::StageRetrying).len(), 2);
        assert_eq!(sink.for_stage("job_skills").len(), 3);
        assert!(sink.of_kind(EventKind::PipelineCancelled).is_empty());
    }

    #[tokio::test]
    async fn test_collecting_sink_shared_between_tasks() {
        let sink = std::sync::Arc::new(CollectingEventSink::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                tokio::spawn(async move {
                    sink.emit(RunEvent::new(EventKind::PipelineStarted, Uuid::new_v4(), "p"))
                        .await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let runs: std::collections::HashSet<_> =
            sink.events().into_iter().map(|e| e.run_id).collect();
        assert_eq!(runs.len(), 4);
    }
}
