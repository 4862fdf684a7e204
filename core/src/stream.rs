//! Incremental server-sent events decoding.
//!
//! Network reads split events at arbitrary byte offsets, so decoding keeps
//! the partial line and the fields seen so far until the next chunk arrives.

/// A complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    /// Value of the `event:` field, empty when absent
    pub event: String,
    /// `data:` lines joined with '\n'
    pub data: String,
    pub id: Option<String>,
}

/// Line-oriented SSE decoder. Each byte is examined once, and `\n`, `\r\n`
/// and bare `\r` all end a line.
#[derive(Debug, Default)]
pub struct SseBuffer {
    /// Bytes of the line being read
    line: Vec<u8>,
    /// Last byte was '\r'; a '\n' right after it ends no further line
    after_cr: bool,
    /// Fields of the event being assembled
    current: SseEvent,
    data_lines: Vec<String>,
    saw_field: bool,
    /// Bytes consumed since the last blank line
    pending: usize,
}

impl SseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by this chunk.
    /// Comment-only blocks (keep-alives) produce no event.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if std::mem::take(&mut self.after_cr) && byte == b'\n' {
                continue;
            }
            self.pending += 1;
            match byte {
                b'\r' => {
                    self.after_cr = true;
                    self.end_line(&mut events);
                }
                b'\n' => self.end_line(&mut events),
                _ => self.line.push(byte),
            }
        }
        events
    }

    /// Bytes received but not yet part of a complete event.
    pub fn pending_len(&self) -> usize {
        self.pending
    }

    fn end_line(&mut self, events: &mut Vec<SseEvent>) {
        if self.line.is_empty() {
            self.dispatch(events);
            return;
        }
        let line = std::mem::take(&mut self.line);
        let text = String::from_utf8_lossy(&line);
        if text.starts_with(':') {
            return;
        }
        let (field, value) = match text.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (text.as_ref(), ""),
        };
        match field {
            "event" => self.current.event = value.to_string(),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            _ => return,
        }
        self.saw_field = true;
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        self.pending = 0;
        let mut event = std::mem::take(&mut self.current);
        let data_lines = std::mem::take(&mut self.data_lines);
        if std::mem::take(&mut self.saw_field) {
            event.data = data_lines.join("\n");
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event_in_one_chunk() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b"event: plan_proposed\ndata: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "plan_proposed");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(buf.pending_len(), 0);
    }

    #[test]
    fn event_split_across_chunks_is_accumulated() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"event: message_ad").is_empty());
        assert!(buf.push(b"ded\ndata: hel").is_empty());
        assert!(buf.push(b"lo\n").is_empty());
        let events = buf.push(b"\nevent: x\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message_added");
        assert_eq!(events[0].data, "hello");
        assert!(buf.pending_len() > 0);
    }

    #[test]
    fn multiline_data_and_crlf() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b"data: one\r\ndata: two\r\nid: 7\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn keep_alive_comments_are_skipped() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b": keep-alive\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn byte_by_byte_feed_matches_whole_feed() {
        let raw = b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n";
        let mut whole = SseBuffer::new();
        let expected = whole.push(raw);

        let mut split = SseBuffer::new();
        let mut got = Vec::new();
        for b in raw.iter() {
            got.extend(split.push(std::slice::from_ref(b)));
        }
        assert_eq!(got, expected);
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn bare_carriage_returns_end_lines() {
        let mut buf = SseBuffer::new();
        let events = buf.push(b"event: a\rdata: 1\r\rdata: 2\r");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "a");
        assert_eq!(events[0].data, "1");
        let events = buf.push(b"\r");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "2");
        assert_eq!(events[0].event, "");
    }

    #[test]
    fn crlf_split_between_chunks_is_one_line_end() {
        let mut buf = SseBuffer::new();
        assert!(buf.push(b"data: x\r").is_empty());
        assert!(buf.push(b"\n").is_empty());
        let events = buf.push(b"\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn large_event_in_small_chunks() {
        let payload = "x".repeat(256 * 1024);
        let raw = format!("event: big\ndata: {payload}\n\n");
        let mut buf = SseBuffer::new();
        let mut got = Vec::new();
        for chunk in raw.as_bytes().chunks(7) {
            got.extend(buf.push(chunk));
        }
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data.len(), payload.len());
        assert_eq!(buf.pending_len(), 0);
    }
}
