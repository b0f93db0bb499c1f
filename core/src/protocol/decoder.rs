/// Frames an unbounded byte stream into newline-delimited lines.
///
/// Reads arrive as arbitrary chunks: a chunk may carry several lines, a
/// fragment of one, or bytes that are not valid UTF-8. The decoder keeps the
/// trailing partial line buffered until the next chunk (or stream end) and
/// replaces invalid byte sequences instead of failing.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line completed by it.
    ///
    /// Lines are trimmed of the delimiter and surrounding whitespace; empty
    /// lines are dropped since the protocol never emits them meaningfully.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let raw = std::mem::replace(&mut self.buf, rest);
            let line = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Drain whatever remains after the stream closed without a final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}
