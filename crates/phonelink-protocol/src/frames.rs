//! Frames sent from the host to the accessory.
//!
//! There are exactly three shapes, each one line terminated with `\r`:
//! - `B<percent>/<0|1>S<unread>C<missed>`: telemetry push, the middle digit
//!   is `1` when the battery is full
//! - `I<hex digit>`: set the display intensity, one nibble
//! - `i`: ask the accessory for its descriptor

use crate::codec::LineCodec;
use crate::error::{ProtocolError, ProtocolResult};
use crate::telemetry::{TelemetrySnapshot, MAX_BATTERY_PERCENT};

/// Highest display intensity the accessory understands.
pub const MAX_INTENSITY: u8 = 15;

/// A frame the host sends to the accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFrame {
    /// Telemetry push.
    Status(TelemetrySnapshot),
    /// Set display intensity. Values above [`MAX_INTENSITY`] are clamped
    /// when encoded.
    Intensity(u8),
    /// Request the accessory descriptor.
    Query,
}

/// Clamp an arbitrary intensity request into 0-15.
pub fn clamp_intensity(value: i64) -> u8 {
    value.clamp(0, MAX_INTENSITY as i64) as u8
}

/// Encode an intensity request, clamping it first.
pub fn encode_intensity(value: i64) -> Vec<u8> {
    HostFrame::intensity(value).encode()
}

impl HostFrame {
    /// Build an intensity frame from an unclamped request.
    pub fn intensity(value: i64) -> HostFrame {
        HostFrame::Intensity(clamp_intensity(value))
    }

    /// Short name of the frame shape, used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HostFrame::Status(_) => "status",
            HostFrame::Intensity(_) => "intensity",
            HostFrame::Query => "query",
        }
    }

    /// Render the frame without its terminator.
    pub fn to_line(&self) -> String {
        match self {
            HostFrame::Status(s) => format!(
                "B{}/{}S{}C{}",
                s.battery_percent.min(MAX_BATTERY_PERCENT),
                if s.battery_full { 1 } else { 0 },
                s.unread_messages,
                s.missed_calls
            ),
            HostFrame::Intensity(level) => format!("I{:x}", (*level).min(MAX_INTENSITY)),
            HostFrame::Query => "i".to_string(),
        }
    }

    /// Encode the frame for transmission, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        LineCodec::encode_line(&self.to_line())
    }

    /// Parse a frame line (without the terminator), as the accessory does.
    pub fn parse(line: &str) -> ProtocolResult<HostFrame> {
        let line = line.trim();
        if line == "i" {
            return Ok(HostFrame::Query);
        }
        if let Some(nibble) = line.strip_prefix('I') {
            if nibble.len() != 1 {
                return Err(invalid("intensity", line));
            }
            let level = u8::from_str_radix(nibble, 16).map_err(|_| invalid("intensity", line))?;
            return Ok(HostFrame::Intensity(level));
        }
        if let Some(body) = line.strip_prefix('B') {
            return parse_status(body, line).map(HostFrame::Status);
        }
        Err(ProtocolError::UnknownFrame(line.to_string()))
    }
}

impl std::fmt::Display for HostFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn invalid(field: &'static str, line: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        line: line.to_string(),
    }
}

/// Parse `<percent>/<0|1>S<unread>C<missed>`.
fn parse_status(body: &str, line: &str) -> ProtocolResult<TelemetrySnapshot> {
    let (percent, rest) = body.split_once('/').ok_or_else(|| invalid("battery percent", line))?;
    let battery_percent = percent
        .parse::<u8>()
        .ok()
        .filter(|p| *p <= MAX_BATTERY_PERCENT)
        .ok_or_else(|| invalid("battery percent", line))?;

    let (full, rest) = rest.split_once('S').ok_or_else(|| invalid("battery full flag", line))?;
    let battery_full = match full {
        "0" => false,
        "1" => true,
        _ => return Err(invalid("battery full flag", line)),
    };

    let (unread, missed) = rest.split_once('C').ok_or_else(|| invalid("unread messages", line))?;
    let unread_messages = unread.parse().map_err(|_| invalid("unread messages", line))?;
    let missed_calls = missed.parse().map_err(|_| invalid("missed calls", line))?;

    Ok(TelemetrySnapshot {
        missed_calls,
        unread_messages,
        battery_percent,
        battery_full,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_status() {
        let frame = HostFrame::Status(TelemetrySnapshot::new(1, 2, 87, false));
        assert_eq!(frame.encode(), b"B87/0S2C1\r");
    }

    #[test]
    fn test_encode_status_full_battery() {
        let frame = HostFrame::Status(TelemetrySnapshot::new(0, 12, 100, true));
        assert_eq!(frame.encode(), b"B100/1S12C0\r");
    }

    #[test]
    fn test_encode_query() {
        assert_eq!(HostFrame::Query.encode(), b"i\r");
    }

    #[test]
    fn test_encode_intensity() {
        assert_eq!(encode_intensity(0), b"I0\r");
        assert_eq!(encode_intensity(9), b"I9\r");
        assert_eq!(encode_intensity(10), b"Ia\r");
        assert_eq!(encode_intensity(15), b"If\r");
    }

    #[test]
    fn test_intensity_clamped() {
        assert_eq!(encode_intensity(20), b"If\r");
        assert_eq!(encode_intensity(20), encode_intensity(15));
        assert_eq!(encode_intensity(-3), encode_intensity(0));
        assert_eq!(encode_intensity(i64::MAX), encode_intensity(15));
        assert_eq!(encode_intensity(i64::MIN), encode_intensity(0));
    }

    #[test]
    fn test_raw_intensity_variant_clamped_on_encode() {
        assert_eq!(HostFrame::Intensity(200).encode(), b"If\r");
    }

    #[test]
    fn test_terminator_only_at_end() {
        let frames = [
            HostFrame::Status(TelemetrySnapshot::new(u32::MAX, u32::MAX, 100, true)),
            HostFrame::intensity(7),
            HostFrame::Query,
        ];
        for frame in frames {
            let bytes = frame.encode();
            let terminators = bytes.iter().filter(|&&b| b == b'\r').count();
            assert_eq!(terminators, 1, "{}", frame);
            assert_eq!(bytes.last(), Some(&b'\r'));
        }
    }

    #[test]
    fn test_parse_frames() {
        assert_eq!(HostFrame::parse("i").unwrap(), HostFrame::Query);
        assert_eq!(HostFrame::parse("Ia").unwrap(), HostFrame::Intensity(10));
        assert_eq!(HostFrame::parse("IF").unwrap(), HostFrame::Intensity(15));
        assert_eq!(
            HostFrame::parse("B87/0S2C1").unwrap(),
            HostFrame::Status(TelemetrySnapshot::new(1, 2, 87, false))
        );
    }

    #[test]
    fn test_parse_rejects_bad_frames() {
        assert!(matches!(HostFrame::parse("x"), Err(ProtocolError::UnknownFrame(_))));
        assert!(matches!(HostFrame::parse("I10"), Err(ProtocolError::InvalidField { .. })));
        assert!(matches!(HostFrame::parse("Ig"), Err(ProtocolError::InvalidField { .. })));
        assert!(matches!(
            HostFrame::parse("B101/0S2C1"),
            Err(ProtocolError::InvalidField { field: "battery percent", .. })
        ));
        assert!(matches!(
            HostFrame::parse("B87/2S2C1"),
            Err(ProtocolError::InvalidField { field: "battery full flag", .. })
        ));
        assert!(matches!(
            HostFrame::parse("B87/0S2"),
            Err(ProtocolError::InvalidField { field: "unread messages", .. })
        ));
        assert!(matches!(
            HostFrame::parse("B87/0S2C"),
            Err(ProtocolError::InvalidField { field: "missed calls", .. })
        ));
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(HostFrame::Query.kind(), "query");
        assert_eq!(HostFrame::intensity(3).kind(), "intensity");
        assert_eq!(HostFrame::Status(TelemetrySnapshot::default()).kind(), "status");
    }
}
