//! Splits a byte stream into trimmed, length-capped lines.

/// Incremental line splitter.
///
/// Bytes beyond `max_line_bytes` on a single line are discarded; the kept
/// prefix is still emitted once the line terminates. Invalid UTF-8 is
/// replaced rather than rejected.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_line_bytes: usize,
    truncated: bool,
}

/// One line produced by [`LineSplitter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitLine {
    pub text: String,
    /// The original line was longer than the cap.
    pub truncated: bool,
}

impl LineSplitter {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            truncated: false,
        }
    }

    /// Feed a chunk and collect every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SplitLine> {
        let mut out = Vec::new();
        for part in chunk.split_inclusive(|b| *b == b'\n') {
            let (body, complete) = match part.strip_suffix(b"\n") {
                Some(body) => (body, true),
                None => (part, false),
            };
            let room = self.max_line_bytes.saturating_sub(self.buf.len());
            if body.len() > room {
                self.buf.extend_from_slice(&body[..room]);
                self.truncated = true;
            } else {
                self.buf.extend_from_slice(body);
            }
            if complete {
                out.push(self.take());
            }
        }
        out
    }

    /// Emit whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Option<SplitLine> {
        if self.buf.is_empty() && !self.truncated {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> SplitLine {
        let text = String::from_utf8_lossy(&self.buf).trim().to_string();
        let line = SplitLine {
            text,
            truncated: self.truncated,
        };
        self.buf.clear();
        self.truncated = false;
        line
    }
}
