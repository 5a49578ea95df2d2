//! Fixed-layout device state responses
//!
//! Each snapshot is rebuilt in full from a single response frame; nothing
//! here mutates a previous snapshot. Layouts are byte-exact and the parsers
//! reject anything that does not match them.

use super::{join14, split14};
use crate::midi::{MANUFACTURER_ID, SYSEX_END, SYSEX_START};

/// Sentinel byte for "no value" in slot arrays
const NONE_SENTINEL: u8 = 0x7F;

/// Total frame length of a sequencer state response
const SEQUENCER_LEN: usize = 75;
/// Total frame length of a mixer state response
const MIXER_LEN: usize = 85;
/// Total frame length of a deck state response
const DECK_LEN: usize = 61;

/// Check the common response header and terminator position
fn check_frame(data: &[u8], command: u8, len: usize) -> bool {
    data.len() >= len
        && data[0] == SYSEX_START
        && data[1] == MANUFACTURER_ID
        && data[3] == command
        && data[len - 1] == SYSEX_END
}

/// Start a fixed-length response frame
fn blank_response(device_id: u8, command: u8, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    data[0] = SYSEX_START;
    data[1] = MANUFACTURER_ID;
    data[2] = device_id & 0x7F;
    data[3] = command;
    data[len - 1] = SYSEX_END;
    data
}

/// One sequencer slot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotState {
    pub muted: bool,
    pub playing: bool,
    pub looping: bool,
    /// Scheduled to start at the next phrase boundary
    pub queued: bool,
    pub program: Option<u8>,
    pub phrase: Option<u8>,
    pub total_phrases: Option<u8>,
}

/// Snapshot of the 16-slot sequencer (command 0x63, 75 bytes)
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSnapshot {
    pub tempo_bpm: f32,
    pub slots: [SlotState; 16],
    pub active_slot: Option<u8>,
    pub swing: u8,
}

impl SequencerSnapshot {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if !check_frame(data, super::command::SEQUENCER_STATE, SEQUENCER_LEN) {
            return None;
        }

        let tempo_bpm = join14(data[4], data[5]) as f32 / 10.0;

        let mut slots = [SlotState::default(); 16];
        for (i, slot) in slots.iter_mut().enumerate() {
            let mask_byte = data[6 + i / 8];
            slot.muted = mask_byte & (1 << (i % 8)) != 0;

            let flags = data[8 + i];
            slot.playing = flags & 0x01 != 0;
            slot.looping = flags & 0x02 != 0;
            slot.queued = flags & 0x10 != 0;

            slot.program = optional(data[24 + i]);
            slot.phrase = optional(data[40 + i]);
            // Zero also means "none" here: a slot with no phrases loaded
            slot.total_phrases = match data[56 + i] {
                0 | NONE_SENTINEL => None,
                n => Some(n),
            };
        }

        Some(Self {
            tempo_bpm,
            slots,
            active_slot: optional(data[72]),
            swing: data[73],
        })
    }

    /// Build the response frame this snapshot parses from
    ///
    /// The inverse of `parse`; device emulators and tests use it.
    pub fn to_sysex(&self, device_id: u8) -> Vec<u8> {
        let mut data =
            blank_response(device_id, super::command::SEQUENCER_STATE, SEQUENCER_LEN);

        let tempo = split14((self.tempo_bpm * 10.0).round() as u16);
        data[4] = tempo[0];
        data[5] = tempo[1];

        for (i, slot) in self.slots.iter().enumerate() {
            if slot.muted {
                data[6 + i / 8] |= 1 << (i % 8);
            }

            let mut flags = 0u8;
            if slot.playing {
                flags |= 0x01;
            }
            if slot.looping {
                flags |= 0x02;
            }
            if slot.queued {
                flags |= 0x10;
            }
            data[8 + i] = flags;

            data[24 + i] = slot.program.unwrap_or(NONE_SENTINEL);
            data[40 + i] = slot.phrase.unwrap_or(NONE_SENTINEL);
            data[56 + i] = slot.total_phrases.unwrap_or(NONE_SENTINEL);
        }

        data[72] = self.active_slot.unwrap_or(NONE_SENTINEL);
        data[73] = self.swing & 0x7F;
        data
    }
}

/// One mixer channel
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelState {
    pub muted: bool,
    pub fx_enabled: bool,
    pub volume: u8,
    pub pan: u8,
}

/// Snapshot of the 32-channel program mixer (command 0x65, 85 bytes)
#[derive(Debug, Clone, PartialEq)]
pub struct MixerSnapshot {
    /// Firmware layout version; responses outside [0x20, 0x40) are rejected
    pub version: u8,
    pub master_volume: u8,
    pub master_muted: bool,
    pub master_pan: u8,
    pub channels: [ChannelState; 32],
    pub fx_send: u8,
    pub eq_low: u8,
    pub eq_mid: u8,
    pub eq_high: u8,
}

impl MixerSnapshot {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if !check_frame(data, super::command::MIXER_STATE, MIXER_LEN) {
            return None;
        }

        let version = data[4];
        if !(0x20..0x40).contains(&version) {
            return None;
        }

        let mut channels = [ChannelState::default(); 32];
        for (i, channel) in channels.iter_mut().enumerate() {
            channel.muted = data[8 + i / 8] & (1 << (i % 8)) != 0;
            channel.fx_enabled = data[12 + i / 8] & (1 << (i % 8)) != 0;
            channel.volume = data[16 + i];
            channel.pan = data[48 + i];
        }

        Some(Self {
            version,
            master_volume: data[5],
            master_muted: data[6] != 0,
            master_pan: data[7],
            channels,
            fx_send: data[80],
            eq_low: data[81],
            eq_mid: data[82],
            eq_high: data[83],
        })
    }

    /// Build the response frame this snapshot parses from
    pub fn to_sysex(&self, device_id: u8) -> Vec<u8> {
        let mut data = blank_response(device_id, super::command::MIXER_STATE, MIXER_LEN);

        data[4] = self.version;
        data[5] = self.master_volume & 0x7F;
        data[6] = self.master_muted as u8;
        data[7] = self.master_pan & 0x7F;

        for (i, channel) in self.channels.iter().enumerate() {
            if channel.muted {
                data[8 + i / 8] |= 1 << (i % 8);
            }
            if channel.fx_enabled {
                data[12 + i / 8] |= 1 << (i % 8);
            }
            data[16 + i] = channel.volume & 0x7F;
            data[48 + i] = channel.pan & 0x7F;
        }

        data[80] = self.fx_send & 0x7F;
        data[81] = self.eq_low & 0x7F;
        data[82] = self.eq_mid & 0x7F;
        data[83] = self.eq_high & 0x7F;
        data
    }
}

/// One performance deck
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Deck {
    pub playing: bool,
    pub looping: bool,
    pub synced: bool,
    pub cued: bool,
    pub pfl: bool,
    pub muted: bool,
    pub fx: [bool; 4],
    pub bpm: f32,
    pub volume: u8,
    /// Playback position in percent of track length
    pub position_pct: f32,
    pub rate: u8,
    pub duration_secs: u32,
    pub eq: [u8; 3],
}

/// Snapshot of the 4-deck performance engine (command 0x67, 61 bytes)
#[derive(Debug, Clone, PartialEq)]
pub struct DeckSnapshot {
    pub master_volume: u8,
    pub active_deck: Option<u8>,
    pub decks: [Deck; 4],
    pub crossfader: u8,
    pub headphone_mix: u8,
}

impl DeckSnapshot {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if !check_frame(data, super::command::DECK_STATE, DECK_LEN) {
            return None;
        }

        let mut decks = [Deck::default(); 4];
        for (i, deck) in decks.iter_mut().enumerate() {
            let rec = &data[6 + i * 13..6 + (i + 1) * 13];

            let flags = rec[0];
            deck.playing = flags & 0x01 != 0;
            deck.looping = flags & 0x02 != 0;
            deck.synced = flags & 0x04 != 0;
            deck.cued = flags & 0x08 != 0;
            deck.pfl = flags & 0x10 != 0;
            deck.muted = flags & 0x20 != 0;

            for (bit, fx) in deck.fx.iter_mut().enumerate() {
                *fx = rec[1] & (1 << bit) != 0;
            }

            // Fixed-point BPM: integer part 14-bit, hundredths in the third byte
            deck.bpm = join14(rec[2], rec[3]) as f32 + rec[4] as f32 / 100.0;
            deck.volume = rec[5];
            deck.position_pct = join14(rec[6], rec[7]) as f32 / 163.83;
            deck.rate = rec[8];
            deck.duration_secs = rec[9] as u32 * 10;
            deck.eq = [rec[10], rec[11], rec[12]];
        }

        Some(Self {
            master_volume: data[4],
            active_deck: optional(data[5]),
            decks,
            crossfader: data[58],
            headphone_mix: data[59],
        })
    }

    /// Build the response frame this snapshot parses from
    pub fn to_sysex(&self, device_id: u8) -> Vec<u8> {
        let mut data = blank_response(device_id, super::command::DECK_STATE, DECK_LEN);

        data[4] = self.master_volume & 0x7F;
        data[5] = self.active_deck.unwrap_or(NONE_SENTINEL);

        for (i, deck) in self.decks.iter().enumerate() {
            let rec = &mut data[6 + i * 13..6 + (i + 1) * 13];

            let mut flags = 0u8;
            if deck.playing {
                flags |= 0x01;
            }
            if deck.looping {
                flags |= 0x02;
            }
            if deck.synced {
                flags |= 0x04;
            }
            if deck.cued {
                flags |= 0x08;
            }
            if deck.pfl {
                flags |= 0x10;
            }
            if deck.muted {
                flags |= 0x20;
            }
            rec[0] = flags;

            for (bit, &fx) in deck.fx.iter().enumerate() {
                if fx {
                    rec[1] |= 1 << bit;
                }
            }

            let whole = deck.bpm.trunc() as u16;
            let frac = ((deck.bpm - deck.bpm.trunc()) * 100.0).round() as u8;
            let bpm = split14(whole);
            rec[2] = bpm[0];
            rec[3] = bpm[1];
            rec[4] = frac & 0x7F;

            rec[5] = deck.volume & 0x7F;
            let position = split14((deck.position_pct * 163.83).round() as u16);
            rec[6] = position[0];
            rec[7] = position[1];
            rec[8] = deck.rate & 0x7F;
            rec[9] = ((deck.duration_secs / 10) as u8) & 0x7F;
            rec[10] = deck.eq[0] & 0x7F;
            rec[11] = deck.eq[1] & 0x7F;
            rec[12] = deck.eq[2] & 0x7F;
        }

        data[58] = self.crossfader & 0x7F;
        data[59] = self.headphone_mix & 0x7F;
        data
    }
}

fn optional(byte: u8) -> Option<u8> {
    if byte == NONE_SENTINEL {
        None
    } else {
        Some(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command;

    fn blank_frame(cmd: u8, len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        data[0] = SYSEX_START;
        data[1] = MANUFACTURER_ID;
        data[2] = 0x01;
        data[3] = cmd;
        data[len - 1] = SYSEX_END;
        data
    }

    #[test]
    fn test_sequencer_rejects_short_buffer() {
        let data = blank_frame(command::SEQUENCER_STATE, SEQUENCER_LEN - 1);
        assert_eq!(SequencerSnapshot::parse(&data), None);
    }

    #[test]
    fn test_sequencer_rejects_wrong_command() {
        let data = blank_frame(command::MIXER_STATE, SEQUENCER_LEN);
        assert_eq!(SequencerSnapshot::parse(&data), None);
    }

    #[test]
    fn test_sequencer_decoding() {
        let mut data = blank_frame(command::SEQUENCER_STATE, SEQUENCER_LEN);
        // 125.5 BPM
        data[4] = (1255u16 >> 7) as u8;
        data[5] = (1255u16 & 0x7F) as u8;
        // slots 0 and 9 muted
        data[6] = 0b0000_0001;
        data[7] = 0b0000_0010;
        // slot 2: playing + looping, slot 3: queued
        data[8 + 2] = 0x03;
        data[8 + 3] = 0x10;
        // slot 2 program 5, others none
        for i in 0..16 {
            data[24 + i] = 0x7F;
            data[40 + i] = 0x7F;
            data[56 + i] = 0x7F;
        }
        data[24 + 2] = 5;
        data[40 + 2] = 1;
        data[56 + 2] = 4;
        data[72] = 2;
        data[73] = 55;

        let snap = SequencerSnapshot::parse(&data).unwrap();
        assert!((snap.tempo_bpm - 125.5).abs() < 1e-3);
        assert!(snap.slots[0].muted);
        assert!(snap.slots[9].muted);
        assert!(!snap.slots[1].muted);
        assert!(snap.slots[2].playing);
        assert!(snap.slots[2].looping);
        assert!(snap.slots[3].queued);
        assert_eq!(snap.slots[2].program, Some(5));
        assert_eq!(snap.slots[2].phrase, Some(1));
        assert_eq!(snap.slots[2].total_phrases, Some(4));
        assert_eq!(snap.slots[4].program, None);
        assert_eq!(snap.active_slot, Some(2));
        assert_eq!(snap.swing, 55);
    }

    #[test]
    fn test_sequencer_zero_total_phrases_is_none() {
        let mut data = blank_frame(command::SEQUENCER_STATE, SEQUENCER_LEN);
        data[56] = 0;
        data[56 + 1] = 3;
        let snap = SequencerSnapshot::parse(&data).unwrap();
        assert_eq!(snap.slots[0].total_phrases, None);
        assert_eq!(snap.slots[1].total_phrases, Some(3));
    }

    #[test]
    fn test_mixer_version_gate() {
        let mut data = blank_frame(command::MIXER_STATE, MIXER_LEN);
        data[4] = 0x1F;
        assert_eq!(MixerSnapshot::parse(&data), None);
        data[4] = 0x40;
        assert_eq!(MixerSnapshot::parse(&data), None);
        data[4] = 0x20;
        assert!(MixerSnapshot::parse(&data).is_some());
        data[4] = 0x3F;
        assert!(MixerSnapshot::parse(&data).is_some());
    }

    #[test]
    fn test_mixer_decoding() {
        let mut data = blank_frame(command::MIXER_STATE, MIXER_LEN);
        data[4] = 0x21;
        data[5] = 100;
        data[6] = 1;
        data[7] = 64;
        // channel 1 and channel 10 muted
        data[8] = 0b0000_0010;
        data[9] = 0b0000_0100;
        // channel 0 fx on
        data[12] = 0b0000_0001;
        data[16] = 90; // channel 0 volume
        data[48] = 32; // channel 0 pan
        data[80] = 20;
        data[81] = 60;
        data[82] = 64;
        data[83] = 70;

        let snap = MixerSnapshot::parse(&data).unwrap();
        assert_eq!(snap.master_volume, 100);
        assert!(snap.master_muted);
        assert!(snap.channels[1].muted);
        assert!(snap.channels[10].muted);
        assert!(!snap.channels[0].muted);
        assert!(snap.channels[0].fx_enabled);
        assert_eq!(snap.channels[0].volume, 90);
        assert_eq!(snap.channels[0].pan, 32);
        assert_eq!(snap.fx_send, 20);
        assert_eq!((snap.eq_low, snap.eq_mid, snap.eq_high), (60, 64, 70));
    }

    #[test]
    fn test_deck_rejects_short_buffer() {
        let data = blank_frame(command::DECK_STATE, DECK_LEN - 1);
        assert_eq!(DeckSnapshot::parse(&data), None);
    }

    #[test]
    fn test_deck_snapshot_round_trip() {
        let mut snap = DeckSnapshot::parse(&blank_frame(command::DECK_STATE, DECK_LEN)).unwrap();
        snap.master_volume = 90;
        snap.active_deck = Some(2);
        snap.decks[0].playing = true;
        snap.decks[0].fx = [true, false, false, true];
        snap.decks[0].bpm = 140.25;
        snap.decks[0].duration_secs = 180;
        snap.crossfader = 30;

        let parsed = DeckSnapshot::parse(&snap.to_sysex(5)).unwrap();
        assert_eq!(parsed, snap);
    }

    #[test]
    fn test_deck_decoding() {
        let mut data = blank_frame(command::DECK_STATE, DECK_LEN);
        data[4] = 110;
        data[5] = 0x7F;

        // deck 1: playing, synced, fx 2 on, 128.75 BPM, half-way position
        let base = 6 + 13;
        data[base] = 0x01 | 0x04;
        data[base + 1] = 0b0000_0010;
        data[base + 2] = (128u16 >> 7) as u8;
        data[base + 3] = (128u16 & 0x7F) as u8;
        data[base + 4] = 75;
        data[base + 5] = 99;
        data[base + 6] = (8192u16 >> 7) as u8;
        data[base + 7] = (8192u16 & 0x7F) as u8;
        data[base + 8] = 64;
        data[base + 9] = 21;
        data[base + 10] = 10;
        data[base + 11] = 20;
        data[base + 12] = 30;

        data[58] = 42;
        data[59] = 64;

        let snap = DeckSnapshot::parse(&data).unwrap();
        assert_eq!(snap.master_volume, 110);
        assert_eq!(snap.active_deck, None);

        let deck = &snap.decks[1];
        assert!(deck.playing);
        assert!(deck.synced);
        assert!(!deck.looping);
        assert_eq!(deck.fx, [false, true, false, false]);
        assert!((deck.bpm - 128.75).abs() < 1e-3);
        assert_eq!(deck.volume, 99);
        assert!((deck.position_pct - 50.0).abs() < 0.01);
        assert_eq!(deck.duration_secs, 210);
        assert_eq!(deck.eq, [10, 20, 30]);

        assert_eq!(snap.crossfader, 42);
        assert_eq!(snap.headphone_mix, 64);
    }
}
