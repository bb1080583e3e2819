//! Newline framing for the backend stdio wire.
//!
//! The stdout pipe delivers arbitrary byte chunks; a complete message is a
//! maximal substring terminated by `\n`. Partial trailing content stays in
//! the buffer until the next chunk arrives.

/// Accumulates raw chunks and yields complete lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the pipe.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete line, without its terminator. Returns `None`
    /// once only partial content remains.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop(); // the \n itself
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Bytes currently held back as an incomplete line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"a\":1}\n");
        assert_eq!(framer.next_line().unwrap(), b"{\"a\":1}");
        assert!(framer.next_line().is_none());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"a\"");
        assert!(framer.next_line().is_none());
        assert_eq!(framer.pending_len(), 4);

        framer.push(b":1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(framer.next_line().unwrap(), b"{\"a\":1}");
        assert_eq!(framer.next_line().unwrap(), b"{\"b\":2}");
        assert!(framer.next_line().is_none());

        framer.push(b":3}\n");
        assert_eq!(framer.next_line().unwrap(), b"{\"c\":3}");
    }

    #[test]
    fn test_crlf_stripped() {
        let mut framer = LineFramer::new();
        framer.push(b"{\"a\":1}\r\n");
        assert_eq!(framer.next_line().unwrap(), b"{\"a\":1}");
    }

    #[test]
    fn test_empty_lines_yielded_empty() {
        let mut framer = LineFramer::new();
        framer.push(b"\n\n{\"a\":1}\n");
        assert_eq!(framer.next_line().unwrap(), b"");
        assert_eq!(framer.next_line().unwrap(), b"");
        assert_eq!(framer.next_line().unwrap(), b"{\"a\":1}");
    }
}
