//! Telemetry pushed to the accessory and the send-suppression rule.

use serde::{Deserialize, Serialize};

/// Highest valid battery percentage.
pub const MAX_BATTERY_PERCENT: u8 = 100;

/// The values the accessory displays.
///
/// Snapshots are plain values: compare them with `==` and copy them freely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Number of missed calls not yet seen by the user.
    pub missed_calls: u32,
    /// Number of unread messages.
    pub unread_messages: u32,
    /// Battery charge in percent (0-100).
    pub battery_percent: u8,
    /// Whether the battery reports itself as fully charged.
    pub battery_full: bool,
}

impl TelemetrySnapshot {
    /// Create a snapshot. The battery percentage is clamped to 0-100.
    pub fn new(missed_calls: u32, unread_messages: u32, battery_percent: u8, battery_full: bool) -> Self {
        TelemetrySnapshot {
            missed_calls,
            unread_messages,
            battery_percent: battery_percent.min(MAX_BATTERY_PERCENT),
            battery_full,
        }
    }

    /// Replace the battery fields, clamping the percentage.
    pub fn set_battery(&mut self, percent: u8, full: bool) {
        self.battery_percent = percent.min(MAX_BATTERY_PERCENT);
        self.battery_full = full;
    }
}

impl std::fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "battery {}%{}, {} unread, {} missed",
            self.battery_percent,
            if self.battery_full { " (full)" } else { "" },
            self.unread_messages,
            self.missed_calls
        )
    }
}

/// Decide whether `current` is worth writing to the wire.
///
/// True when nothing has been sent on this session yet, or when any field
/// differs from the last snapshot that was written. After a successful
/// write the caller stores a copy of `current` as the new `last_sent`.
pub fn should_send(current: &TelemetrySnapshot, last_sent: Option<&TelemetrySnapshot>) -> bool {
    match last_sent {
        None => true,
        Some(last) => last != current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySnapshot {
        TelemetrySnapshot::new(1, 2, 87, false)
    }

    #[test]
    fn test_first_send_always_allowed() {
        assert!(should_send(&sample(), None));
        assert!(should_send(&TelemetrySnapshot::default(), None));
    }

    #[test]
    fn test_identical_snapshot_suppressed() {
        let a = sample();
        let copy = a;
        assert!(!should_send(&a, Some(&copy)));
    }

    #[test]
    fn test_any_field_change_sends() {
        let base = sample();
        let variants = [
            TelemetrySnapshot { missed_calls: 2, ..base },
            TelemetrySnapshot { unread_messages: 3, ..base },
            TelemetrySnapshot { battery_percent: 86, ..base },
            TelemetrySnapshot { battery_full: true, ..base },
        ];
        for changed in variants {
            assert!(should_send(&changed, Some(&base)), "{:?} should be sent", changed);
        }
    }

    #[test]
    fn test_battery_percent_clamped() {
        let mut snapshot = TelemetrySnapshot::new(0, 0, 250, true);
        assert_eq!(snapshot.battery_percent, 100);

        snapshot.set_battery(101, false);
        assert_eq!(snapshot.battery_percent, 100);
        assert!(!snapshot.battery_full);
    }

    #[test]
    fn test_display() {
        assert_eq!(sample().to_string(), "battery 87%, 2 unread, 1 missed");
    }
}
