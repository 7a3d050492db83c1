//! Line framing for the command stream
//!
//! The control connection is a plain newline-delimited text protocol. TCP
//! delivers the stream in arbitrary chunks, so a partial trailing line must be
//! retained until the rest of it arrives.

/// Splits a raw byte stream into complete lines.
///
/// Framing never fails: there is no line length limit and a chunk boundary
/// may fall anywhere, including inside a multi-byte character. Bytes are kept
/// raw until a line completes; only complete lines are converted to text,
/// with invalid sequences replaced.
#[derive(Debug, Default)]
pub struct LineFramer {
    partial: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line completed by it.
    ///
    /// The line-feed terminator is stripped, as is a preceding carriage
    /// return. The trailing partial line is kept for the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}
