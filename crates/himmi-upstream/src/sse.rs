//! Minimal SSE line buffering shared by the streaming adapters.

/// Accumulates raw bytes and yields complete `data:` payloads as lines
/// arrive. Comment lines, `event:` lines, and blank separators are skipped;
/// the caller decides what `[DONE]` means.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut payloads = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line = self.buffer[..newline_pos].trim().to_string();
            self.buffer.drain(..=newline_pos);

            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data: ") {
                payloads.push(data.to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_reads() {
        let mut buf = SseLineBuffer::default();
        assert!(buf.push(b"data: {\"a\":").is_empty());
        let out = buf.push(b"1}\n\ndata: [DONE]\n\n");
        assert_eq!(out, vec![r#"{"a":1}"#.to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_skips_comments_and_events() {
        let mut buf = SseLineBuffer::default();
        let out = buf.push(b": keepalive\nevent: delta\ndata: x\n");
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[test]
    fn test_tolerates_missing_space_after_colon() {
        let mut buf = SseLineBuffer::default();
        assert_eq!(buf.push(b"data:{\"b\":2}\n"), vec![r#"{"b":2}"#.to_string()]);
    }
}
