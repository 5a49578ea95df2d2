//! # padlink
//!
//! SysEx protocol layer between a control application and two families of
//! class-compliant MIDI hardware: a pad/knob controller with an OLED and
//! RGB pads, and a slot-based sample-playback box.
//!
//! ## Modules
//!
//! - `seven_bit` - 7-bit MIDI-safe payload transcoding
//! - `protocol` - SysEx command framing and state-response decoding
//! - `transfer` - chunked, ACK-driven sample upload/download
//! - `display` - OLED bitmap mutation and stripe diffing
//! - `leds` - pad/button LED state cache
//! - `scheduler` - emulated momentary button presses
//! - `transport` - MIDI transport seam and midir implementation
//! - `link` - per-device command surfaces and response dispatch

pub mod config;
pub mod display;
pub mod leds;
pub mod link;
pub mod midi;
pub mod monitor;
pub mod protocol;
pub mod scheduler;
pub mod seven_bit;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use display::{Frame, OledEncoder};
pub use leds::LedCache;
pub use link::{ControllerSurface, SamplerLink, StateEvent};
pub use protocol::{Message, Status};
pub use transfer::{SampleTransfer, TransferError, TransferTimeouts};
pub use transport::{MidiTransport, Transport};
