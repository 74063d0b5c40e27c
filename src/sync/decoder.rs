//! Line framing for the push stream
//!
//! The server writes server-sent events: `data:` lines closed by a blank line.
//! Consecutive `data:` lines of one event are joined with `\n`. A bare line
//! that is not an SSE field is passed through as a message of its own. Chunks
//! from the HTTP body can split lines anywhere, including inside a multi-byte
//! UTF-8 sequence, so bytes are buffered until a newline arrives.

/// Incremental decoder turning body chunks into message payloads
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    /// `data:` lines of the event being assembled
    data: Vec<String>,
}

/// What one line contributes
enum Line {
    /// Blank line: dispatch the pending event
    Dispatch,
    Data(String),
    /// A plain, non-SSE line
    Message(String),
    Ignored,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every complete message it finished
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.feed_line(&line, &mut messages);
        }
        messages
    }

    /// Flush whatever the body ended with: an unterminated line and an event
    /// missing its closing blank line
    pub fn finish(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.feed_line(&line, &mut messages);
        }
        self.dispatch(&mut messages);
        messages
    }

    fn feed_line(&mut self, raw: &[u8], messages: &mut Vec<String>) {
        match classify(raw) {
            Line::Dispatch => self.dispatch(messages),
            Line::Data(data) => self.data.push(data),
            Line::Message(message) => messages.push(message),
            Line::Ignored => {}
        }
    }

    fn dispatch(&mut self, messages: &mut Vec<String>) {
        if self.data.is_empty() {
            return;
        }
        let joined = std::mem::take(&mut self.data).join("\n");
        if !joined.trim().is_empty() {
            messages.push(joined);
        }
    }
}

fn classify(raw: &[u8]) -> Line {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    if line.trim().is_empty() {
        return Line::Dispatch;
    }
    if line.starts_with(':') {
        return Line::Ignored;
    }
    if let Some(data) = line.strip_prefix("data:") {
        return Line::Data(data.strip_prefix(' ').unwrap_or(data).to_string());
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return Line::Ignored;
    }
    Line::Message(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_data_lines() {
        let mut decoder = LineDecoder::new();
        let messages = decoder.push(b"data: {\"a\":1}\n\ndata:{\"b\":2}\n\n");
        assert_eq!(messages, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_multi_line_data_is_joined() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: {\"a\":\ndata: 1}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), vec!["{\"a\":\n1}"]);
    }

    #[test]
    fn test_split_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: {\"na").is_empty());
        assert_eq!(decoder.push(b"me\":1}\r\n\r\n"), vec!["{\"name\":1}"]);
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut decoder = LineDecoder::new();
        let bytes = "data: \"❤️\"\n\n".as_bytes();
        let (a, b) = bytes.split_at(9);
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["\"❤️\""]);
    }

    #[test]
    fn test_ignores_comments_and_fields() {
        let mut decoder = LineDecoder::new();
        let messages = decoder.push(b": keepalive\nevent: message\nid: 7\nretry: 100\n\n");
        assert!(messages.is_empty());
    }

    #[test]
    fn test_plain_lines_pass_through() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"{\"x\":1}\n"), vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_finish_flushes_partial_line() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_finish_dispatches_unterminated_event() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"data: one\n\ndata: two\n"), vec!["one"]);
        assert_eq!(decoder.finish(), vec!["two"]);
    }
}
