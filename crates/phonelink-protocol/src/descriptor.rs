//! The accessory's self description.
//!
//! In reply to the `i` query the accessory sends one JSON line describing its
//! display:
//!
//! ```text
//! {"kind":"dock","intensity":7,"height":64,"width":128}\r
//! ```
//!
//! Older accessory firmware names the first key `type`; both are accepted.
//! Unknown keys are ignored.

use serde::{Deserialize, Serialize};

use crate::codec::{LineCodec, LINE_CAPACITY};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frames::MAX_INTENSITY;

/// Description of the connected accessory and its display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryDescriptor {
    /// Accessory kind, e.g. `dock` or `7seg`.
    #[serde(alias = "type")]
    pub kind: String,
    /// Current display intensity (0-15).
    pub intensity: u8,
    /// Display height in pixels (or rows of digits).
    pub height: u32,
    /// Display width in pixels (or digits).
    pub width: u32,
}

impl AccessoryDescriptor {
    /// Parse a descriptor line (without the terminator).
    pub fn parse(line: &str) -> ProtocolResult<AccessoryDescriptor> {
        let descriptor: AccessoryDescriptor = serde_json::from_str(line)?;
        if descriptor.intensity > MAX_INTENSITY {
            return Err(ProtocolError::InvalidDescriptor(format!(
                "intensity {} out of range 0-{}",
                descriptor.intensity, MAX_INTENSITY
            )));
        }
        Ok(descriptor)
    }

    /// Encode the descriptor as the accessory would send it, terminator
    /// included.
    ///
    /// Fails if the line would not fit in the receiver's line buffer.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let json = serde_json::to_string(self)
            .map_err(|e| ProtocolError::InvalidDescriptor(e.to_string()))?;
        if json.len() >= LINE_CAPACITY {
            return Err(ProtocolError::LineTooLong {
                max: LINE_CAPACITY - 1,
                actual: json.len(),
            });
        }
        Ok(LineCodec::encode_line(&json))
    }
}

impl std::fmt::Display for AccessoryDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}x{}, intensity {})",
            self.kind, self.width, self.height, self.intensity
        )
    }
}
