//! Server-Sent Events (SSE) frame parser.
//!
//! Parses text from an HTTP response body into SSE events according to
//! the W3C EventSource specification. Shared by the model client (streamed
//! completions) and the MCP transports (event-stream responses).

/// A single SSE event parsed from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// The event name, defaulting to `message` as EventSource does.
    pub fn name(&self) -> &str {
        self.event_type.as_deref().unwrap_or("message")
    }
}

/// Incremental SSE parser that processes text into events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    /// A `\r` that ended the previous chunk; it may pair with a leading `\n`.
    pending_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and return any complete events.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut chunk = chunk;
        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\n');
            chunk = chunk.strip_prefix('\n').unwrap_or(chunk);
        }
        if let Some(rest) = chunk.strip_suffix('\r') {
            self.pending_cr = true;
            chunk = rest;
        }
        if chunk.contains('\r') {
            self.buffer.push_str(&chunk.replace("\r\n", "\n").replace('\r', "\n"));
        } else {
            self.buffer.push_str(chunk);
        }
        let mut events = Vec::new();

        // Process complete event blocks (separated by double newlines)
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();

            if let Some(event) = Self::parse_block(&block) {
                events.push(event);
            }
        }

        events
    }

    /// Parse whatever is left in the buffer as a final event (for bodies that
    /// end without a trailing blank line).
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.pending_cr = false;
        let block = std::mem::take(&mut self.buffer);
        Self::parse_block(&block)
    }

    /// Parse a single SSE block (lines between double newlines) into an event.
    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut event_type = None;
        let mut data_lines = Vec::new();

        for line in block.lines() {
            if line.starts_with(':') {
                // Comment line, skip
                continue;
            }

            if let Some((field, value)) = line.split_once(':') {
                // A single leading space after the colon is not part of the value
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => event_type = Some(value.to_string()),
                    "data" => data_lines.push(value.to_string()),
                    _ => {} // Ignore unknown fields
                }
            } else if line == "data" {
                // Field with no value
                data_lines.push(String::new());
            }
        }

        if data_lines.is_empty() {
            return None;
        }

        Some(SseEvent {
            event_type,
            data: data_lines.join("\n"),
        })
    }
}
