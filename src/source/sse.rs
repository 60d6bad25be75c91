//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks, so lines (and UTF-8 sequences) may be
//! split across calls to [`SseDecoder::feed`]; only complete lines are
//! interpreted. A line longer than the decoder's limit is discarded along
//! with the event it belongs to, so a peer that never sends a newline cannot
//! grow the buffer without bound.

use tracing::warn;

// ---

/// Longest line the decoder buffers. A Firebase `put` carries the whole
/// snapshot on one `data:` line, so this is sized for large snapshots.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Debug)]
pub struct SseDecoder {
    // ---
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    /// Dropping bytes until the end of an oversized line.
    skipping_line: bool,
    /// The event being assembled lost a line and must not be dispatched.
    event_truncated: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(max_line: usize) -> Self {
        // ---
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
            skipping_line: false,
            event_truncated: false,
            event: None,
            data: Vec::new(),
        }
    }

    /// Consume a chunk and return every event it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        // ---
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            let Some(offset) = self.pending[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
            else {
                self.scanned = self.pending.len();
                if self.pending.len() > self.max_line {
                    self.drop_partial_line();
                }
                break;
            };

            let pos = self.scanned + offset;
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            self.scanned = 0;

            if self.skipping_line {
                // Tail of a line already discarded
                self.skipping_line = false;
                continue;
            }
            if pos > self.max_line {
                warn!("Discarding {} byte event-stream line", pos);
                self.event_truncated = true;
                continue;
            }

            let decoded = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line: &str = decoded.as_ref();
            let line = line.strip_suffix('\r').unwrap_or(line);

            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn drop_partial_line(&mut self) {
        // ---
        if !self.skipping_line {
            warn!(
                "Event-stream line exceeds {} bytes, discarding it and its event",
                self.max_line
            );
        }
        self.pending.clear();
        self.scanned = 0;
        self.skipping_line = true;
        self.event_truncated = true;
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        // ---
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id / retry carry nothing we use
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        // ---
        let event = self.event.take();
        if std::mem::take(&mut self.event_truncated) {
            self.data.clear();
            return None;
        }
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}
