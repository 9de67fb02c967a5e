/// Server-sent event decoder for completion streams
///
/// Feeds on raw text chunks as they arrive off the wire. Events may be
/// split across reads, so lines are buffered until the blank-line event
/// boundary is seen. Comment lines (leading ':') and non-data fields are
/// ignored. The decoded sequence ends with exactly one terminal event;
/// duplicate completion notifications are discarded.
use crate::error::OrchestratorError;
use crate::types::StreamEvent;

pub struct SseDecoder {
    /// Unconsumed wire text, possibly mid-line
    buffer: String,
    /// Data lines of the event currently being assembled
    data_lines: Vec<String>,
    /// Set once a terminal event has been emitted
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            data_lines: Vec::new(),
            finished: false,
        }
    }

    /// Whether a terminal event has been emitted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consume a chunk of wire text, returning any fully decoded events
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                // Event boundary: dispatch accumulated data lines
                if !self.data_lines.is_empty() {
                    let data = self.data_lines.join("\n");
                    self.data_lines.clear();
                    self.dispatch(&data, &mut events);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines.push(data.trim_start().to_string());
            }
            // Comment lines (":keepalive") and other fields are ignored
        }

        events
    }

    /// Flush at end-of-stream: dispatch a trailing event that had data
    /// lines but no closing blank line
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.data_lines.is_empty() {
            let data = self.data_lines.join("\n");
            self.data_lines.clear();
            self.dispatch(&data, &mut events);
        }
        events
    }

    fn dispatch(&mut self, data: &str, events: &mut Vec<StreamEvent>) {
        // Everything after the terminal event is discarded, which also
        // collapses duplicate completion notifications to one
        if self.finished {
            return;
        }

        if data == "[DONE]" {
            self.finished = true;
            events.push(StreamEvent::Completed(None));
            return;
        }

        let json: serde_json::Value = match serde_json::from_str(data) {
            Ok(json) => json,
            Err(e) => {
                self.finished = true;
                events.push(StreamEvent::Error(OrchestratorError::MalformedResponse(
                    format!("bad event payload: {}", e),
                )));
                return;
            }
        };

        if let Some(error) = json.get("error") {
            let message = error["message"]
                .as_str()
                .unwrap_or("unspecified stream error")
                .to_string();
            self.finished = true;
            events.push(StreamEvent::Error(OrchestratorError::TransientServer(
                message,
            )));
            return;
        }

        if let Some(choice) = json["choices"].as_array().and_then(|a| a.first()) {
            let content = choice["delta"]["content"].as_str().unwrap_or("");
            if !content.is_empty() {
                events.push(StreamEvent::Delta(content.to_string()));
            }

            if choice["finish_reason"].as_str().is_some() {
                self.finished = true;
                events.push(StreamEvent::Completed(None));
            }
        }
    }
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}
