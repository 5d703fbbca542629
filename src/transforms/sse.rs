//! Line framing for upstream event streams.

use bytes::BytesMut;

/// Terminal sentinel payload.
pub const DONE: &str = "[DONE]";

/// One classified upstream line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Not a `data:` line (comments, `event:` fields, blank separators).
    Other,
    /// The `[DONE]` sentinel.
    Done,
    /// Trimmed payload of a `data:` line.
    Data(&'a str),
}

pub fn classify(line: &str) -> SseLine<'_> {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Other;
    };
    match data.trim() {
        "" => SseLine::Other,
        DONE => SseLine::Done,
        payload => SseLine::Data(payload),
    }
}

/// Accumulates raw body chunks and yields complete lines.
///
/// Bytes are buffered until a newline arrives, so multi-byte characters split
/// across chunks are decoded intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        let text = String::from_utf8_lossy(&line[..pos]);
        Some(text.trim_end_matches('\r').to_string())
    }

    /// Drain whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = self.buf.split();
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("data: [DONE]"), SseLine::Done);
        assert_eq!(classify("data: {\"a\":1} "), SseLine::Data("{\"a\":1}"));
        assert_eq!(classify("data:{}"), SseLine::Data("{}"));
        assert_eq!(classify("event: message"), SseLine::Other);
        assert_eq!(classify(""), SseLine::Other);
        assert_eq!(classify("data: "), SseLine::Other);
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut lines = LineBuffer::new();
        lines.push(b"data: {\"a\"");
        assert_eq!(lines.next_line(), None);
        lines.push(b":1}\r\n\ndata: [DO");
        assert_eq!(lines.next_line().as_deref(), Some("data: {\"a\":1}"));
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert_eq!(lines.next_line(), None);
        lines.push(b"NE]");
        assert_eq!(lines.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let text = "data: héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let (a, b) = text.split_at(8);
        let mut lines = LineBuffer::new();
        lines.push(a);
        lines.push(b);
        assert_eq!(lines.next_line().as_deref(), Some("data: héllo"));
    }
}
