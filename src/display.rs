//! OLED bitmap encoding and stripe dispatch
//!
//! The panel does not take raster-order pixels: each pixel lands in the
//! outgoing buffer through a fixed 8x7 bit permutation that mirrors the
//! panel's internal wiring. The mutated buffer is sliced into eight 147-byte
//! stripes, diffed against the previously transmitted frame, and only
//! changed stripes are emitted - unless the panel has not been written for
//! a while, in which case all eight go out again.

use std::time::{Duration, Instant};
use tracing::trace;

use crate::protocol::{command, frame};

/// Display width in pixels
pub const WIDTH: usize = 128;
/// Display height in pixels
pub const HEIGHT: usize = 64;
/// 8-pixel-high horizontal bands
pub const STRIPES: usize = 8;
/// Bytes per transmitted stripe
pub const STRIPE_BYTES: usize = 147;

/// Whole mutated buffer: eight stripe slices
const TOTAL_BYTES: usize = STRIPES * STRIPE_BYTES;
/// Stripe packet payload: 4 parameter bytes + stripe data
const PAYLOAD_LEN: usize = STRIPE_BYTES + 4;

/// Resend everything after this long without any stripe transmission
const REFRESH_INTERVAL: Duration = Duration::from_millis(3000);

/// Bit permutation for one 8-row x 7-column pixel group
///
/// `BIT_MUTATE[y % 8][x % 7]` is the destination bit slot of a pixel within
/// its 56-bit group. Must match the panel wiring exactly.
const BIT_MUTATE: [[u8; 7]; 8] = [
    [13, 19, 25, 31, 37, 43, 49],
    [0, 20, 26, 32, 38, 44, 50],
    [1, 7, 27, 33, 39, 45, 51],
    [2, 8, 14, 34, 40, 46, 52],
    [3, 9, 15, 21, 41, 47, 53],
    [4, 10, 16, 22, 28, 48, 54],
    [5, 11, 17, 23, 29, 35, 55],
    [6, 12, 18, 24, 30, 36, 42],
];

/// Monochrome 128x64 pixel buffer
///
/// The caller renders into this each pass; thresholding from color sources
/// happens upstream.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    bits: [u8; WIDTH * HEIGHT / 8],
}

impl Frame {
    pub fn new() -> Self {
        Self {
            bits: [0; WIDTH * HEIGHT / 8],
        }
    }

    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let index = y * WIDTH + x;
        if on {
            self.bits[index / 8] |= 1 << (index % 8);
        } else {
            self.bits[index / 8] &= !(1 << (index % 8));
        }
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        if x >= WIDTH || y >= HEIGHT {
            return false;
        }
        let index = y * WIDTH + x;
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn fill(&mut self, on: bool) {
        self.bits = [if on { 0xFF } else { 0x00 }; WIDTH * HEIGHT / 8];
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

/// Stripe-diffing OLED encoder for one controller device
pub struct OledEncoder {
    device_id: u8,
    /// Previously transmitted frame, per stripe
    prev: [[u8; STRIPE_BYTES]; STRIPES],
    last_sent: Option<Instant>,
    refresh_interval: Duration,
}

impl OledEncoder {
    pub fn new(device_id: u8) -> Self {
        Self::with_refresh_interval(device_id, REFRESH_INTERVAL)
    }

    pub fn with_refresh_interval(device_id: u8, refresh_interval: Duration) -> Self {
        Self {
            device_id,
            prev: [[0; STRIPE_BYTES]; STRIPES],
            last_sent: None,
            refresh_interval,
        }
    }

    /// Drop the cached frame so the next encode retransmits everything
    ///
    /// Call after a reconnect; the panel contents are unknown then.
    pub fn reset(&mut self) {
        self.prev = [[0; STRIPE_BYTES]; STRIPES];
        self.last_sent = None;
    }

    /// Encode a frame into the stripe packets that must go on the wire
    ///
    /// Returns one complete SysEx packet per stripe that changed since the
    /// last call, or all eight if nothing has been transmitted within the
    /// refresh interval (keeps the panel from sleeping out of sync).
    pub fn encode_frame(&mut self, frame: &Frame) -> Vec<Vec<u8>> {
        let mutated = mutate(frame);
        let refresh = self
            .last_sent
            .is_none_or(|at| at.elapsed() >= self.refresh_interval);

        let mut packets = Vec::new();
        for (index, stripe) in mutated.chunks_exact(STRIPE_BYTES).enumerate() {
            if refresh || stripe != self.prev[index].as_slice() {
                packets.push(self.stripe_packet(index, stripe));
                self.prev[index].copy_from_slice(stripe);
            }
        }

        if !packets.is_empty() {
            self.last_sent = Some(Instant::now());
            trace!("OLED: {} stripe(s) to send (refresh={})", packets.len(), refresh);
        }

        packets
    }

    /// Build the WRITE_OLED packet for one stripe
    ///
    /// Layout: base-128 payload length (151), band range (start = end =
    /// stripe), column range (0, 127), then the 147 mutated bytes.
    fn stripe_packet(&self, stripe: usize, data: &[u8]) -> Vec<u8> {
        let mut body = Vec::with_capacity(PAYLOAD_LEN + 2);
        body.push((PAYLOAD_LEN >> 7) as u8);
        body.push((PAYLOAD_LEN & 0x7F) as u8);
        body.push(stripe as u8);
        body.push(stripe as u8);
        body.push(0);
        body.push((WIDTH - 1) as u8);
        body.extend_from_slice(data);
        frame(self.device_id, command::WRITE_OLED, &body)
    }
}

/// Apply the bit permutation to a whole frame
///
/// The 128x64 image is unwound into a 1024x8 arrangement
/// (`xr = x + 128 * (y / 8)`), then each pixel lands at byte
/// `xr/7*8 + bit/7`, bit `bit % 7`, with `bit = BIT_MUTATE[y % 8][xr % 7]`.
fn mutate(frame: &Frame) -> [u8; TOTAL_BYTES] {
    let mut out = [0u8; TOTAL_BYTES];

    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            if frame.get(x, y) {
                let xr = x + WIDTH * (y / 8);
                let bit = BIT_MUTATE[y % 8][xr % 7] as usize;
                out[xr / 7 * 8 + bit / 7] |= 1 << (bit % 7);
            }
        }
    }

    // The buffer holds 1029 bit slots per stripe against 1024 pixels; the
    // trailing slots have no pixel of their own and track the final pixel,
    // keeping a uniform frame uniform on the wire.
    let tail_group = (WIDTH * HEIGHT / 8) / 7;
    let tail_col = WIDTH * HEIGHT / 8 - tail_group * 7;
    if frame.get(WIDTH - 1, HEIGHT - 1) {
        for col in tail_col..7 {
            for row in 0..8 {
                let bit = BIT_MUTATE[row][col] as usize;
                out[tail_group * 8 + bit / 7] |= 1 << (bit % 7);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stripe data bytes inside a packet: after F0 7D dev cmd lenHi lenLo
    /// band band col col, before the trailing F7
    fn packet_data(packet: &[u8]) -> &[u8] {
        &packet[10..10 + STRIPE_BYTES]
    }

    #[test]
    fn test_all_lit_encodes_to_7f() {
        let mut frame = Frame::new();
        frame.fill(true);

        let mut encoder = OledEncoder::new(0);
        let packets = encoder.encode_frame(&frame);

        assert_eq!(packets.len(), STRIPES);
        for packet in &packets {
            assert!(packet_data(packet).iter().all(|&b| b == 0x7F));
        }
    }

    #[test]
    fn test_all_dark_encodes_to_00() {
        let frame = Frame::new();

        let mut encoder = OledEncoder::new(0);
        let packets = encoder.encode_frame(&frame);

        assert_eq!(packets.len(), STRIPES);
        for packet in &packets {
            assert!(packet_data(packet).iter().all(|&b| b == 0x00));
        }
    }

    #[test]
    fn test_packet_layout() {
        let mut encoder = OledEncoder::new(9);
        let packets = encoder.encode_frame(&Frame::new());

        let packet = &packets[2];
        assert_eq!(packet.len(), 4 + 2 + 4 + STRIPE_BYTES + 1);
        assert_eq!(&packet[..4], &[0xF0, 0x7D, 9, command::WRITE_OLED]);
        // 151 in base-128
        assert_eq!((packet[4], packet[5]), (0x01, 0x17));
        // band range, column range
        assert_eq!(&packet[6..10], &[2, 2, 0, 127]);
        assert_eq!(*packet.last().unwrap(), 0xF7);
    }

    #[test]
    fn test_unchanged_frame_sends_nothing() {
        let mut frame = Frame::new();
        frame.set(10, 10, true);

        let mut encoder = OledEncoder::new(0);
        assert_eq!(encoder.encode_frame(&frame).len(), STRIPES);
        assert_eq!(encoder.encode_frame(&frame).len(), 0);
    }

    #[test]
    fn test_single_pixel_change_sends_one_stripe() {
        let mut frame = Frame::new();
        let mut encoder = OledEncoder::new(0);
        encoder.encode_frame(&frame);

        // y = 20 lives in stripe 2
        frame.set(5, 20, true);
        let packets = encoder.encode_frame(&frame);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0][6], 2);
    }

    #[test]
    fn test_refresh_resends_all_stripes() {
        let mut frame = Frame::new();
        frame.set(0, 0, true);

        let mut encoder = OledEncoder::with_refresh_interval(0, Duration::ZERO);
        assert_eq!(encoder.encode_frame(&frame).len(), STRIPES);
        // Nothing changed, but the interval has already elapsed
        assert_eq!(encoder.encode_frame(&frame).len(), STRIPES);
    }

    #[test]
    fn test_reset_forces_full_retransmit() {
        let mut frame = Frame::new();
        frame.set(64, 32, true);

        let mut encoder = OledEncoder::new(0);
        encoder.encode_frame(&frame);
        assert_eq!(encoder.encode_frame(&frame).len(), 0);

        encoder.reset();
        assert_eq!(encoder.encode_frame(&frame).len(), STRIPES);
    }

    #[test]
    fn test_permutation_is_bijective_within_a_group() {
        let mut seen = [false; 56];
        for row in &BIT_MUTATE {
            for &bit in row {
                assert!(!seen[bit as usize]);
                seen[bit as usize] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_first_pixel_bit_position() {
        let mut frame = Frame::new();
        frame.set(0, 0, true);

        let mut encoder = OledEncoder::new(0);
        let packets = encoder.encode_frame(&frame);

        // Pixel (0,0): bit slot 13 -> byte 1, bit 6 of stripe 0
        let data = packet_data(&packets[0]);
        assert_eq!(data[1], 1 << 6);
        assert!(data.iter().enumerate().all(|(i, &b)| i == 1 || b == 0));
    }
}
