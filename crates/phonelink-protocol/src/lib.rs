//! PhoneLink Accessory Line Protocol
//!
//! This crate provides types and utilities for talking to a PhoneLink display
//! accessory over a serial-style byte stream (Bluetooth RFCOMM, a UART, a TCP
//! socket). The protocol is a tiny line-based text protocol: every message is
//! one line terminated with a carriage return (`\r`).
//!
//! # Protocol Overview
//!
//! - **Host frames** (host → accessory): short text commands, see [`HostFrame`]
//!   - `B<percent>/<0|1>S<unread>C<missed>`: telemetry push
//!   - `I<hex digit>`: set display intensity (0-15)
//!   - `i`: ask the accessory to describe itself
//! - **Descriptor** (accessory → host): a JSON object with `kind`, `intensity`,
//!   `height` and `width`, sent in reply to `i`, see [`AccessoryDescriptor`]
//!
//! # Example
//!
//! ```rust
//! use phonelink_protocol::{HostFrame, LineCodec, TelemetrySnapshot};
//!
//! let snapshot = TelemetrySnapshot::new(1, 2, 87, false);
//! assert_eq!(HostFrame::Status(snapshot).encode(), b"B87/0S2C1\r");
//!
//! let mut codec = LineCodec::new();
//! let descriptors = codec.push(b"{\"kind\":\"dock\",\"intensity\":7,\"height\":64,\"width\":128}\r");
//! assert_eq!(descriptors[0].kind, "dock");
//! ```

mod codec;
mod descriptor;
mod error;
mod frames;
mod telemetry;

pub use codec::*;
pub use descriptor::*;
pub use error::*;
pub use frames::*;
pub use telemetry::*;
