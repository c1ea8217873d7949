//! Observability utilities.

mod logging;
mod tracing;

pub use logging::{init_logging, LogFormat};
pub use self::tracing::{
    CollectedSpan, CollectingTraceSink, LoggingTraceSink, NoOpTraceSink, SpanHandle, SpanRecord,
    SpanTimer, TraceError, TraceSink,
};
