//! Bounded capture sink for child output streams.

use std::io::{self, Write};

/// A writer that keeps at most `limit` bytes and silently drops the rest.
///
/// Every write reports the full input as accepted. Surfacing a short write
/// or an error here would reach the child as a broken pipe and change its
/// exit behavior, so the capture is a prefix, never a failure.
pub struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
}

impl BoundedWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Bytes captured so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the sink, yielding the captured prefix.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let remaining = self.limit.saturating_sub(self.buf.len());
        let take = remaining.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_everything_under_the_limit() {
        let mut sink = BoundedWriter::new(16);
        assert_eq!(sink.write(b"hello").unwrap(), 5);
        assert_eq!(sink.into_inner(), b"hello");
    }

    #[test]
    fn reports_full_acceptance_past_the_limit() {
        let mut sink = BoundedWriter::new(4);
        assert_eq!(sink.write(b"0123456789").unwrap(), 10);
        assert_eq!(sink.into_inner(), b"0123");
    }

    #[test]
    fn keeps_a_prefix_across_writes_crossing_the_boundary() {
        let mut sink = BoundedWriter::new(6);
        assert_eq!(sink.write(b"abcd").unwrap(), 4);
        assert_eq!(sink.write(b"efgh").unwrap(), 4);
        assert_eq!(sink.write(b"ijkl").unwrap(), 4);
        assert_eq!(sink.into_inner(), b"abcdef");
    }

    #[test]
    fn captured_bytes_never_exceed_the_limit() {
        let mut sink = BoundedWriter::new(100);
        for _ in 0..1000 {
            sink.write_all(b"0123456789").unwrap();
        }
        assert_eq!(sink.len(), 100);
        let captured = sink.into_inner();
        let produced: Vec<u8> = b"0123456789".repeat(1000);
        assert_eq!(&produced[..100], &captured[..]);
    }

    #[test]
    fn zero_limit_drops_all_bytes() {
        let mut sink = BoundedWriter::new(0);
        assert_eq!(sink.write(b"data").unwrap(), 4);
        assert!(sink.is_empty());
    }
}
