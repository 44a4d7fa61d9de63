//! Server-Sent-Events framing for progress streams
//!
//! Each record is `data: <json>\n\n`. The decoder is incremental and
//! tolerant: records that fail to parse are dropped, not fatal.

use tracing::debug;

use super::events::ProgressEvent;
use crate::migration::{IdMapping, MigrationStats};

/// Frame one event
pub fn encode(event: &ProgressEvent) -> String {
    match serde_json::to_string(event) {
        Ok(json) => format!("data: {}\n\n", json),
        // Serializing these types cannot fail; fall back to an error record
        Err(e) => format!(
            "data: {{\"type\":\"error\",\"message\":\"unserializable event: {}\"}}\n\n",
            e
        ),
    }
}

/// Incremental decoder for a progress stream body
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    malformed: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the events completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ProgressEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_record_end(&self.buffer) {
            let record: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = self.parse_record(&record[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing record that was not followed by a blank line
    pub fn finish(&mut self) -> Vec<ProgressEvent> {
        let record = std::mem::take(&mut self.buffer);
        if record.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }
        self.parse_record(&record).into_iter().collect()
    }

    /// Records dropped because they could not be parsed
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    fn parse_record(&mut self, record: &[u8]) -> Option<ProgressEvent> {
        let text = match std::str::from_utf8(record) {
            Ok(text) => text,
            Err(_) => {
                self.malformed += 1;
                return None;
            }
        };

        // Multiple data lines in one record are joined with newlines
        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();
        if data.is_empty() {
            return None;
        }

        match serde_json::from_str::<ProgressEvent>(&data.join("\n")) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Skipping malformed progress record: {}", e);
                self.malformed += 1;
                None
            }
        }
    }
}

fn find_record_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// How a progress stream ended, from the consumer's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSummary {
    Completed {
        stats: MigrationStats,
        migrated_ids: Vec<u64>,
        id_mapping: IdMapping,
    },
    Failed {
        message: String,
    },
    /// Stream ended without a terminal event; treat as a failure
    Incomplete {
        last_completed: u64,
    },
}

impl StreamSummary {
    /// Classify a sequence of decoded events
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ProgressEvent>) -> Self {
        let mut last_completed = 0;
        for event in events {
            match event {
                ProgressEvent::Progress { completed, .. } => last_completed = *completed,
                ProgressEvent::Complete {
                    stats,
                    migrated_ids,
                    id_mapping,
                } => {
                    return StreamSummary::Completed {
                        stats: stats.clone(),
                        migrated_ids: migrated_ids.clone(),
                        id_mapping: id_mapping.clone(),
                    }
                }
                ProgressEvent::Error { message } => {
                    return StreamSummary::Failed {
                        message: message.clone(),
                    }
                }
                ProgressEvent::Started { .. } => {}
            }
        }
        StreamSummary::Incomplete { last_completed }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StreamSummary::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::EntityKind;

    fn started() -> ProgressEvent {
        ProgressEvent::Started {
            entity: EntityKind::Customers,
            total: 2,
            already_migrated: 0,
        }
    }

    #[test]
    fn test_encode_framing() {
        let framed = encode(&ProgressEvent::error("nope"));
        assert!(framed.starts_with("data: {"));
        assert!(framed.ends_with("}\n\n"));
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let framed = format!("{}{}", encode(&started()), encode(&ProgressEvent::error("x")));
        let bytes = framed.as_bytes();
        let (a, b) = bytes.split_at(7);

        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(a);
        assert!(events.is_empty());
        events.extend(decoder.push(b));
        events.extend(decoder.finish());

        assert_eq!(events, vec![started(), ProgressEvent::error("x")]);
    }

    #[test]
    fn test_decoder_skips_malformed_records() {
        let body = format!(
            "data: {{broken\n\n: keep-alive comment\n\n{}data: {{\"type\":\"mystery\"}}\n\n",
            encode(&started())
        );

        let mut decoder = SseDecoder::new();
        let events = decoder.push(body.as_bytes());

        assert_eq!(events, vec![started()]);
        assert_eq!(decoder.malformed(), 2);
    }

    #[test]
    fn test_decoder_accepts_crlf_and_trailing_record() {
        let body = "data: {\"type\":\"error\",\"message\":\"late\"}\r\n";
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(body.as_bytes()).is_empty());
        assert_eq!(decoder.finish(), vec![ProgressEvent::error("late")]);
    }

    #[test]
    fn test_summary_without_terminal_event_is_incomplete() {
        let events = vec![
            started(),
            ProgressEvent::Progress {
                completed: 1,
                total: 2,
                current: None,
            },
        ];
        let summary = StreamSummary::from_events(&events);
        assert_eq!(summary, StreamSummary::Incomplete { last_completed: 1 });
        assert!(!summary.is_success());
    }

    #[test]
    fn test_summary_reports_error() {
        let events = vec![started(), ProgressEvent::error("source unreachable")];
        assert_eq!(
            StreamSummary::from_events(&events),
            StreamSummary::Failed {
                message: "source unreachable".to_string()
            }
        );
    }
}
