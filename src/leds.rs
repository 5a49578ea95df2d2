//! Pad and button LED state cache
//!
//! Tracks the last code sent per logical address and suppresses writes the
//! hardware has already shown. Pads carry RGB over SysEx; everything else
//! falls back to a plain Control Change on the configured channel.

use std::collections::HashMap;
use tracing::trace;

use crate::midi::MidiMessage;
use crate::protocol::{command, frame};

/// First pad note number
pub const PAD_NOTE_MIN: u8 = 54;
/// Last pad note number
pub const PAD_NOTE_MAX: u8 = 117;

/// RGB palette for the six logical pad codes
///
/// 0 off, 1 green at half brightness, 2 orange, 3 green, 4 amber, 5 cyan.
const PAD_PALETTE: [(u8, u8, u8); 6] = [
    (0x00, 0x00, 0x00),
    (0x00, 0x20, 0x00),
    (0x7F, 0x28, 0x00),
    (0x00, 0x7F, 0x00),
    (0x7F, 0x50, 0x00),
    (0x00, 0x7F, 0x7F),
];

/// Per-device LED shadow state
///
/// One instance per connected device; callers serialize access to it.
pub struct LedCache {
    device_id: u8,
    /// Output channel for non-pad addresses
    channel: u8,
    states: HashMap<u8, u8>,
}

impl LedCache {
    pub fn new(device_id: u8, channel: u8) -> Self {
        Self {
            device_id,
            channel: channel & 0x0F,
            states: HashMap::new(),
        }
    }

    /// Record `value` for `address` and return the message to send
    ///
    /// Returns `None` when the cached value already matches: the hardware
    /// is up to date and nothing goes on the wire.
    pub fn set_state(&mut self, address: u8, value: u8) -> Option<Vec<u8>> {
        let address = address & 0x7F;
        let value = value & 0x7F;

        if self.states.get(&address) == Some(&value) {
            trace!("LED {} already at {}, suppressing", address, value);
            return None;
        }

        self.states.insert(address, value);
        Some(self.message_for(address, value))
    }

    /// Forget everything sent so far, forcing a full resync
    ///
    /// Call after a reconnect; the hardware state is unknown then.
    pub fn clear(&mut self) {
        self.states.clear();
    }

    fn message_for(&self, address: u8, value: u8) -> Vec<u8> {
        if (PAD_NOTE_MIN..=PAD_NOTE_MAX).contains(&address) {
            let (r, g, b) = PAD_PALETTE[(value as usize).min(PAD_PALETTE.len() - 1)];
            // Single-pad packet: base-128 length (4), pad index, then RGB
            let body = [0, 4, address - PAD_NOTE_MIN, r, g, b];
            frame(self.device_id, command::WRITE_LED, &body)
        } else {
            MidiMessage::ControlChange {
                channel: self.channel,
                cc: address,
                value,
            }
            .encode()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_value_suppressed() {
        let mut cache = LedCache::new(0, 0);

        assert!(cache.set_state(60, 3).is_some());
        assert!(cache.set_state(60, 3).is_none());
        assert!(cache.set_state(60, 4).is_some());
    }

    #[test]
    fn test_pad_packet_layout() {
        let mut cache = LedCache::new(2, 0);

        let message = cache.set_state(57, 3).unwrap();
        // pad index 57 - 54 = 3, palette 3 = full green
        assert_eq!(
            message,
            vec![0xF0, 0x7D, 2, command::WRITE_LED, 0, 4, 3, 0x00, 0x7F, 0x00, 0xF7]
        );
    }

    #[test]
    fn test_pad_code_zero_is_off() {
        let mut cache = LedCache::new(0, 0);

        let message = cache.set_state(PAD_NOTE_MIN, 0).unwrap();
        assert_eq!(&message[7..10], &[0, 0, 0]);
    }

    #[test]
    fn test_non_pad_address_sends_control_change() {
        let mut cache = LedCache::new(0, 2);

        let message = cache.set_state(0x21, 1).unwrap();
        assert_eq!(message, vec![0xB2, 0x21, 1]);

        // Note range boundary: 53 is still a control, 54 is a pad
        let message = cache.set_state(53, 1).unwrap();
        assert_eq!(message[0], 0xB2);
        let message = cache.set_state(54, 1).unwrap();
        assert_eq!(message[0], 0xF0);
    }

    #[test]
    fn test_clear_forces_resend() {
        let mut cache = LedCache::new(0, 0);

        assert!(cache.set_state(100, 5).is_some());
        assert!(cache.set_state(100, 5).is_none());

        cache.clear();
        assert!(cache.set_state(100, 5).is_some());
    }

    #[test]
    fn test_out_of_range_code_clamps_to_last_palette_entry() {
        let mut cache = LedCache::new(0, 0);

        let message = cache.set_state(PAD_NOTE_MIN, 9).unwrap();
        assert_eq!(&message[7..10], &[0x00, 0x7F, 0x7F]);
    }
}
