//! Progress stream protocol: events, sinks and SSE framing

pub mod events;
pub mod sink;
pub mod sse;

pub use events::ProgressEvent;
pub use sink::{ChannelSink, FnSink, LogSink, ProgressSink, RecordingSink, Tee};
pub use sse::{encode, SseDecoder, StreamSummary};
