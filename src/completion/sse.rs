use crate::error::CompletionError;

/// One parsed server-sent event from the completions stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Payload of a `data:` line (everything after the prefix).
    Data(String),
    /// The `data: [DONE]` terminal marker.
    Done,
}

/// Incremental SSE line parser. Bytes arrive at arbitrary chunk boundaries
/// (possibly mid-codepoint), so input is buffered until a full line is
/// available.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, CompletionError> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = std::str::from_utf8(&line[..newline])
                .map_err(|e| CompletionError::Malformed(format!("invalid UTF-8 in stream: {e}")))?
                .trim_end_matches('\r');

            if let Some(event) = parse_line(line) {
                let done = event == SseEvent::Done;
                events.push(event);
                if done {
                    break;
                }
            }
        }
        Ok(events)
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    // Blank lines separate events; comment and field lines other than data
    // carry nothing we use
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(payload.to_string()))
    }
}

/// Extract the text delta from one chat-completions data payload. A payload
/// without a content delta (role announcements, finish markers) yields `None`;
/// anything that fails to parse is malformed.
pub fn parse_delta(payload: &str) -> Result<Option<String>, CompletionError> {
    let value: serde_json::Value = serde_json::from_str(payload)
        .map_err(|e| CompletionError::Malformed(format!("unparsable data payload: {e}")))?;

    let delta = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"));

    match delta {
        Some(delta) => match delta.get("content") {
            Some(serde_json::Value::String(text)) => Ok(Some(text.clone())),
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(other) => Err(CompletionError::Malformed(format!(
                "delta content is not a string: {other}"
            ))),
        },
        None => Err(CompletionError::Malformed(
            "payload has no choices[0].delta".to_string(),
        )),
    }
}
