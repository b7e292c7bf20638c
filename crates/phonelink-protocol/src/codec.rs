//! Line-based codec for the accessory link.
//!
//! Both directions use text lines terminated with a carriage return (`\r`).
//! The receive side accumulates bytes into a fixed-capacity buffer; a line
//! that does not fit is thrown away, so a chattering or garbled peer can never
//! make the buffer grow.

use bytes::BytesMut;

use crate::descriptor::AccessoryDescriptor;

/// Line terminator used in both directions.
pub const LINE_TERMINATOR: u8 = b'\r';

/// Capacity of the receive buffer in bytes.
pub const LINE_CAPACITY: usize = 128;

/// A codec for reading accessory lines.
///
/// - Accumulates received bytes until the terminator is seen
/// - Decodes the finished line into an [`AccessoryDescriptor`]
/// - Drops malformed lines and overlong partial lines without erroring
///
/// The number of buffered bytes is always below [`LINE_CAPACITY`].
#[derive(Debug)]
pub struct LineCodec {
    /// Bytes of the line currently being received (terminator excluded).
    buffer: BytesMut,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(LINE_CAPACITY),
        }
    }

    /// Feed one received byte, returning a descriptor when a line that
    /// decodes as one has just been completed.
    ///
    /// Lines that fail to decode are logged and discarded.
    pub fn feed(&mut self, byte: u8) -> Option<AccessoryDescriptor> {
        let line = self.feed_line(byte)?;
        match AccessoryDescriptor::parse(&line) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                log::warn!("discarding accessory line {:?}: {}", line, e);
                None
            }
        }
    }

    /// Feed one received byte, returning the completed line (trimmed, never
    /// empty) when the byte is the terminator.
    ///
    /// This is the raw splitter under [`feed`](Self::feed); the accessory
    /// side of the link uses it to read host frames.
    pub fn feed_line(&mut self, byte: u8) -> Option<String> {
        if byte == LINE_TERMINATOR {
            let raw = self.buffer.split();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            return Some(line.to_string());
        }

        self.buffer.extend_from_slice(&[byte]);
        if self.buffer.len() >= LINE_CAPACITY {
            log::trace!("line buffer full without terminator, dropping {} bytes", self.buffer.len());
            self.buffer.clear();
        }
        None
    }

    /// Feed a slice of received data, returning every descriptor completed
    /// along the way.
    pub fn push(&mut self, data: &[u8]) -> Vec<AccessoryDescriptor> {
        data.iter().filter_map(|&b| self.feed(b)).collect()
    }

    /// Terminate a line for transmission.
    pub fn encode_line(line: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(LINE_TERMINATOR);
        buf
    }

    /// Get the number of buffered bytes.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCK_LINE: &[u8] = b"{\"kind\":\"dock\",\"intensity\":7,\"height\":64,\"width\":128}\r";

    #[test]
    fn test_decode_descriptor_line() {
        let mut codec = LineCodec::new();
        let descriptors = codec.push(DOCK_LINE);

        assert_eq!(descriptors.len(), 1);
        assert_eq!(
            descriptors[0],
            AccessoryDescriptor {
                kind: "dock".to_string(),
                intensity: 7,
                height: 64,
                width: 128,
            }
        );
        assert_eq!(codec.buffered_len(), 0);
    }

    #[test]
    fn test_partial_line() {
        let mut codec = LineCodec::new();
        let (head, tail) = DOCK_LINE.split_at(20);

        assert!(codec.push(head).is_empty());
        assert_eq!(codec.buffered_len(), 20);

        let descriptors = codec.push(tail);
        assert_eq!(descriptors.len(), 1);
    }

    #[test]
    fn test_malformed_line_is_dropped() {
        let mut codec = LineCodec::new();

        assert!(codec.push(b"hello accessory\r").is_empty());
        assert_eq!(codec.buffered_len(), 0);

        // The next good line still decodes.
        assert_eq!(codec.push(DOCK_LINE).len(), 1);
    }

    #[test]
    fn test_overflow_resets_and_recovers() {
        let mut codec = LineCodec::new();

        for _ in 0..LINE_CAPACITY {
            assert!(codec.feed(b'x').is_none());
            assert!(codec.buffered_len() < LINE_CAPACITY);
        }
        assert_eq!(codec.buffered_len(), 0);

        assert_eq!(codec.push(DOCK_LINE).len(), 1);
    }

    #[test]
    fn test_overflow_does_not_carry_garbage() {
        let mut codec = LineCodec::new();
        let garbage = vec![b'{'; LINE_CAPACITY + 10];

        assert!(codec.push(&garbage).is_empty());
        assert_eq!(codec.buffered_len(), 10);

        // The 10 leftover bytes corrupt the line that follows, which is dropped
        // as a whole; the one after it is clean.
        assert!(codec.push(DOCK_LINE).is_empty());
        assert_eq!(codec.push(DOCK_LINE).len(), 1);
    }

    #[test]
    fn test_trailing_newline_tolerated() {
        let mut codec = LineCodec::new();
        codec.push(b"{\"type\":\"7seg\", \"intensity\":8, \"height\":1, \"width\":8 }\n");
        let descriptors = codec.push(b"\r");

        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].kind, "7seg");
        assert_eq!(descriptors[0].intensity, 8);
    }

    #[test]
    fn test_feed_line_skips_blank_lines() {
        let mut codec = LineCodec::new();

        assert!(codec.feed_line(b'\r').is_none());
        assert!(codec.feed_line(b'\n').is_none());
        assert!(codec.feed_line(b'\r').is_none());

        let lines: Vec<String> = b"i\rI3\r".iter().filter_map(|&b| codec.feed_line(b)).collect();
        assert_eq!(lines, vec!["i".to_string(), "I3".to_string()]);
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(LineCodec::encode_line("i"), b"i\r");
    }
}
