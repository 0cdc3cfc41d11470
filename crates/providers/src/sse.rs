//! SSE framing helpers for the streaming relay.
//!
//! The relay forwards upstream bytes untouched; these helpers only observe
//! the frames passing through so the relay can tell a clean `[DONE]`
//! termination apart from a truncated stream.

/// Terminal `data:` payload of an OpenAI-style chat completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Extract complete `data:` payloads from an SSE buffer.
///
/// SSE events are delimited by a blank line. Each event block may contain
/// `event:`, `data:`, `id:`, or `retry:` lines; only `data:` lines are
/// returned. `\r\n` line endings are normalised before splitting.
///
/// The buffer is drained in-place: consumed bytes are removed and any
/// trailing partial event remains for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    if buffer.contains('\r') {
        *buffer = buffer.replace("\r\n", "\n");
    }

    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Watches a relayed byte stream for the `[DONE]` sentinel.
#[derive(Debug, Default)]
pub struct SentinelScanner {
    buffer: String,
    events: usize,
    done: bool,
}

impl SentinelScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one upstream chunk. Returns `true` once the sentinel has been seen.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.done {
            return true;
        }
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        for data in drain_data_lines(&mut self.buffer) {
            self.events += 1;
            if data == DONE_SENTINEL {
                self.done = true;
                self.buffer.clear();
                break;
            }
        }
        self.done
    }

    /// Flush a trailing event that arrived without its blank-line delimiter.
    pub fn finish(&mut self) -> bool {
        if !self.done && !self.buffer.trim().is_empty() {
            self.buffer.push_str("\n\n");
            let rest = std::mem::take(&mut self.buffer);
            return self.feed(rest.as_bytes());
        }
        self.done
    }

    pub fn saw_done(&self) -> bool {
        self.done
    }

    /// Number of `data:` events observed so far.
    pub fn events(&self) -> usize {
        self.events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: message\ndata: {\"hello\":\"world\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"hello\":\"world\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_normalises_crlf() {
        let mut buf = String::from("data: a\r\n\r\ndata: b\r\n\r\n");
        assert_eq!(drain_data_lines(&mut buf), vec!["a", "b"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn scanner_detects_done_split_across_chunks() {
        let mut scanner = SentinelScanner::new();
        assert!(!scanner.feed(b"data: {\"id\":1}\n\ndata: [DO"));
        assert!(!scanner.saw_done());
        assert!(scanner.feed(b"NE]\n\n"));
        assert_eq!(scanner.events(), 2);
    }

    #[test]
    fn scanner_flushes_undelimited_tail() {
        let mut scanner = SentinelScanner::new();
        scanner.feed(b"data: x\n\ndata: [DONE]");
        assert!(!scanner.saw_done());
        assert!(scanner.finish());
    }

    #[test]
    fn scanner_without_sentinel() {
        let mut scanner = SentinelScanner::new();
        scanner.feed(b"data: a\n\ndata: b\n\n");
        assert!(!scanner.finish());
        assert_eq!(scanner.events(), 2);
    }
}
