//! Incremental parser for `text/event-stream` bodies.

use tracking::adapter::ChannelMessage;

const DEFAULT_EVENT: &str = "message";

/// Longest line kept while waiting for its end. Longer lines are dropped
/// along with the event they belong to.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Set while the rest of an overlong line is being skipped.
    skipping: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of the body; returns every message it completed. Chunks
    /// may split lines and even UTF-8 sequences anywhere.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ChannelMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = vec![];
        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=end).collect::<Vec<_>>();
            if self.skipping {
                self.skipping = false;
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(message) = self.line(line) {
                messages.push(message);
            }
        }
        if self.buffer.len() > MAX_LINE_BYTES {
            log::warn!("dropping event with a line over {} bytes", MAX_LINE_BYTES);
            self.buffer.clear();
            self.skipping = true;
            self.event = None;
            self.data.clear();
        }
        messages
    }

    fn line(&mut self, line: &str) -> Option<ChannelMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // comment, used as keep-alive
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<ChannelMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let payload: serde_json::Value = match serde_json::from_str(&data) {
            Ok(payload) => payload,
            Err(why) => {
                log::debug!("ignoring non-JSON event data: {}", why);
                return None;
            }
        };
        match event.as_deref() {
            Some(name) if name != DEFAULT_EVENT => Some(ChannelMessage::new(name, payload)),
            // unnamed events carry their name inside: {"event": .., "payload": ..}
            _ => match serde_json::from_value::<ChannelMessage>(payload.clone()) {
                Ok(message) => Some(message),
                Err(_) => Some(ChannelMessage::new(DEFAULT_EVENT, payload)),
            },
        }
    }
}
