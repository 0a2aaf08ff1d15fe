//! Newline framing for bytes read from the serial line.
//!
//! # Why a buffer is needed
//!
//! A serial read returns whatever bytes happen to be in the driver's receive
//! queue.  A single read may contain half a line, exactly one line, or several
//! lines at once.  [`LineBuffer`] accumulates bytes across reads and hands back
//! each complete line as soon as its `\n` terminator arrives.
//!
//! # Terminator handling
//!
//! Only `\n` terminates a line and only the `\n` itself is stripped.  A device
//! that sends `\r\n` produces lines ending in `\r`; the bridge passes line
//! content through untouched.
//!
//! Bytes are decoded as UTF-8.  Invalid sequences are replaced with U+FFFD
//! rather than dropping the whole line.

/// The byte that terminates a line in both directions.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Upper bound for a pending (unterminated) line.
///
/// A device that never sends `\n` would otherwise grow the buffer forever.
/// When the pending bytes reach this size they are flushed as a line.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates serial bytes and splits them into `\n`-terminated lines.
///
/// One `LineBuffer` is bound to exactly one serial connection.  When the
/// connection is recreated the buffer is recreated with it, so a partial
/// trailing line from the old connection is discarded.
///
/// # Example
///
/// ```rust
/// use rs232ws_core::LineBuffer;
///
/// let mut buf = LineBuffer::new();
/// assert!(buf.push(b"12.").is_empty());
/// assert_eq!(buf.push(b"5\n13"), vec!["12.5".to_string()]);
/// assert_eq!(buf.pending(), 2);
/// ```
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_len: usize,
}

impl LineBuffer {
    /// Creates an empty buffer with the default [`MAX_LINE_BYTES`] limit.
    pub fn new() -> Self {
        Self::with_max_len(MAX_LINE_BYTES)
    }

    /// Creates an empty buffer that force-flushes pending bytes at `max_len`.
    ///
    /// A `max_len` of zero is treated as one.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            pending: Vec::with_capacity(256),
            max_len: max_len.max(1),
        }
    }

    /// Feeds newly read bytes and returns every line they complete, in order.
    ///
    /// Returned lines never contain the terminator.  Consecutive terminators
    /// produce empty lines.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == LINE_TERMINATOR) {
            self.pending.extend_from_slice(&rest[..pos]);
            lines.push(self.take_pending());
            rest = &rest[pos + 1..];
        }

        self.pending.extend_from_slice(rest);

        while self.pending.len() >= self.max_len {
            let tail = self.pending.split_off(self.max_len);
            tracing::warn!(
                "serial line exceeded {} bytes without a terminator; flushing",
                self.max_len
            );
            lines.push(self.take_pending());
            self.pending = tail;
        }

        lines
    }

    /// Number of bytes waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Discards any partial line.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_terminated_line_is_returned_without_terminator() {
        // Arrange
        let mut buf = LineBuffer::new();

        // Act
        let lines = buf.push(b"12.5\n");

        // Assert
        assert_eq!(lines, vec!["12.5"]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_unterminated_bytes_stay_pending() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"partial").is_empty());
        assert_eq!(buf.pending(), 7);
    }

    #[test]
    fn test_line_split_across_reads_is_joined() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"tem").is_empty());
        assert!(buf.push(b"p=2").is_empty());
        assert_eq!(buf.push(b"1\n"), vec!["temp=21"]);
    }

    #[test]
    fn test_several_lines_in_one_read_are_returned_in_order() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"a\nbb\nccc\nd");
        assert_eq!(lines, vec!["a", "bb", "ccc"]);
        assert_eq!(buf.pending(), 1);
    }

    #[test]
    fn test_consecutive_terminators_yield_empty_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"\n\n"), vec!["", ""]);
    }

    #[test]
    fn test_carriage_return_is_preserved() {
        // Only `\n` is a terminator; `\r` is line content.
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"OK\r\n"), vec!["OK\r"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_dropped() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(&[b'a', 0xFF, b'b', b'\n']);
        assert_eq!(lines, vec!["a\u{FFFD}b"]);
    }

    #[test]
    fn test_overlong_line_is_flushed_at_limit() {
        // Arrange: a tiny limit so the test stays readable
        let mut buf = LineBuffer::with_max_len(4);

        // Act
        let lines = buf.push(b"abcdefghij");

        // Assert: two full chunks flushed, the remainder stays pending
        assert_eq!(lines, vec!["abcd", "efgh"]);
        assert_eq!(buf.pending(), 2);
        assert_eq!(buf.push(b"\n"), vec!["ij"]);
    }

    #[test]
    fn test_clear_discards_partial_line() {
        let mut buf = LineBuffer::new();
        buf.push(b"stale");
        buf.clear();
        assert_eq!(buf.push(b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_zero_max_len_is_clamped() {
        let mut buf = LineBuffer::with_max_len(0);
        assert_eq!(buf.push(b"ab"), vec!["a", "b"]);
    }
}
