//! SysEx command framing for both device families
//!
//! Every frame shares the layout `F0 7D <dev> <cmd> [sub] [slot] ... F7`.
//! Outgoing builders mask each field into legal 7-bit range instead of
//! validating; parsers return `None` for anything malformed or foreign, so
//! third-party traffic sharing the bus is silently ignored.

pub mod state;

use crate::midi::{MANUFACTURER_ID, SYSEX_END, SYSEX_START};

pub use state::{DeckSnapshot, MixerSnapshot, SequencerSnapshot};

/// Command bytes understood by the two device families
pub mod command {
    /// Write one OLED stripe (controller device)
    pub const WRITE_OLED: u8 = 0x0E;
    /// Write one RGB pad (controller device)
    pub const WRITE_LED: u8 = 0x0F;

    /// Upload request, phased by subcommand
    pub const UPLOAD: u8 = 0x42;
    /// Upload acknowledgment
    pub const UPLOAD_ACK: u8 = 0x43;
    pub const PLAY: u8 = 0x44;
    pub const STOP: u8 = 0x45;
    pub const MUTE: u8 = 0x46;
    pub const SOLO: u8 = 0x47;
    pub const GET_STATE: u8 = 0x48;
    pub const CLEAR_SLOT: u8 = 0x4A;
    pub const LIST_SLOTS: u8 = 0x4B;
    /// Download request, phased by subcommand
    pub const DOWNLOAD: u8 = 0x4C;
    /// Download response, phased by subcommand
    pub const DOWNLOAD_RESP: u8 = 0x4D;

    pub const GET_SEQUENCER_STATE: u8 = 0x62;
    pub const SEQUENCER_STATE: u8 = 0x63;
    pub const GET_MIXER_STATE: u8 = 0x64;
    pub const MIXER_STATE: u8 = 0x65;
    pub const GET_DECK_STATE: u8 = 0x66;
    pub const DECK_STATE: u8 = 0x67;
}

/// Transfer phase subcommands (upload and download share them)
pub const SUB_START: u8 = 0x00;
pub const SUB_CHUNK: u8 = 0x01;
pub const SUB_COMPLETE: u8 = 0x02;

/// ACK status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Accepted,
    Rejected,
    ChunkReceived,
    Other(u8),
}

impl Status {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Status::Accepted,
            0x01 => Status::Rejected,
            0x02 => Status::ChunkReceived,
            other => Status::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Status::Accepted => 0x00,
            Status::Rejected => 0x01,
            Status::ChunkReceived => 0x02,
            Status::Other(other) => other & 0x7F,
        }
    }

    /// Only an explicit reject counts as failure
    pub fn is_rejected(self) -> bool {
        self == Status::Rejected
    }
}

/// Parsed or to-be-built SysEx command
///
/// One variant per command/phase; `encode` and `parse` are the single
/// builder/parser pair for the whole table.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    UploadStart { slot: u8, program: u8, total_chunks: u16, file_size: u32 },
    UploadChunk { slot: u8, index: u16, data: Vec<u8> },
    UploadComplete { slot: u8 },
    /// `phase` echoes the request subcommand being acknowledged
    UploadAck { phase: u8, slot: u8, status: Status },

    Play { slot: u8, looped: bool },
    Stop { slot: u8 },
    Mute { slot: u8, on: bool },
    Solo { slot: u8, on: bool },
    GetState,
    ClearSlot { slot: u8 },
    ListSlots,

    DownloadStart { slot: u8 },
    DownloadGetChunk { slot: u8, index: u16 },
    DownloadComplete { slot: u8 },
    DownloadStartAck { slot: u8, status: Status, program: u8, total_chunks: u16, file_size: u32 },
    DownloadChunk { slot: u8, index: u16, data: Vec<u8> },
    DownloadCompleteAck { slot: u8, status: Status },

    GetSequencerState,
    SequencerState(SequencerSnapshot),
    GetMixerState,
    MixerState(MixerSnapshot),
    GetDeckState,
    DeckState(DeckSnapshot),
}

/// Build a full frame around a command body
///
/// Every payload byte is masked to seven bits here, so callers never have to
/// pre-validate field ranges.
pub fn frame(device_id: u8, command: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(SYSEX_START);
    out.push(MANUFACTURER_ID);
    out.push(device_id & 0x7F);
    out.push(command & 0x7F);
    out.extend(body.iter().map(|b| b & 0x7F));
    out.push(SYSEX_END);
    out
}

/// Split a 14-bit value into base-128 hi/lo bytes
pub(crate) fn split14(value: u16) -> [u8; 2] {
    [((value >> 7) & 0x7F) as u8, (value & 0x7F) as u8]
}

/// Combine base-128 hi/lo bytes into a 14-bit value
pub(crate) fn join14(hi: u8, lo: u8) -> u16 {
    (((hi & 0x7F) as u16) << 7) | ((lo & 0x7F) as u16)
}

/// Split a 28-bit value into four base-128 bytes, big-endian
fn split28(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

fn join28(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | (b & 0x7F) as u32)
}

impl Message {
    /// Encode to a complete SysEx frame addressed to `device_id`
    pub fn encode(&self, device_id: u8) -> Vec<u8> {
        // State responses carry their own fixed layout
        match self {
            Message::SequencerState(snapshot) => return snapshot.to_sysex(device_id),
            Message::MixerState(snapshot) => return snapshot.to_sysex(device_id),
            Message::DeckState(snapshot) => return snapshot.to_sysex(device_id),
            _ => {}
        }

        let (command, body): (u8, Vec<u8>) = match *self {
            Message::UploadStart { slot, program, total_chunks, file_size } => {
                let mut body = vec![SUB_START, slot & 0x0F, program];
                body.extend_from_slice(&split14(total_chunks));
                body.extend_from_slice(&split28(file_size));
                (command::UPLOAD, body)
            }
            Message::UploadChunk { slot, index, ref data } => {
                let mut body = vec![SUB_CHUNK, slot & 0x0F];
                body.extend_from_slice(&split14(index));
                body.extend_from_slice(data);
                (command::UPLOAD, body)
            }
            Message::UploadComplete { slot } => {
                (command::UPLOAD, vec![SUB_COMPLETE, slot & 0x0F])
            }
            Message::UploadAck { phase, slot, status } => {
                (command::UPLOAD_ACK, vec![phase, slot & 0x0F, status.to_byte()])
            }

            Message::Play { slot, looped } => {
                (command::PLAY, vec![slot & 0x0F, looped as u8])
            }
            Message::Stop { slot } => (command::STOP, vec![slot & 0x0F]),
            Message::Mute { slot, on } => (command::MUTE, vec![slot & 0x0F, on as u8]),
            Message::Solo { slot, on } => (command::SOLO, vec![slot & 0x0F, on as u8]),
            Message::GetState => (command::GET_STATE, Vec::new()),
            Message::ClearSlot { slot } => (command::CLEAR_SLOT, vec![slot & 0x0F]),
            Message::ListSlots => (command::LIST_SLOTS, Vec::new()),

            Message::DownloadStart { slot } => {
                (command::DOWNLOAD, vec![SUB_START, slot & 0x0F])
            }
            Message::DownloadGetChunk { slot, index } => {
                let mut body = vec![SUB_CHUNK, slot & 0x0F];
                body.extend_from_slice(&split14(index));
                (command::DOWNLOAD, body)
            }
            Message::DownloadComplete { slot } => {
                (command::DOWNLOAD, vec![SUB_COMPLETE, slot & 0x0F])
            }
            Message::DownloadStartAck { slot, status, program, total_chunks, file_size } => {
                let mut body = vec![SUB_START, slot & 0x0F, status.to_byte(), program];
                body.extend_from_slice(&split14(total_chunks));
                body.extend_from_slice(&split28(file_size));
                (command::DOWNLOAD_RESP, body)
            }
            Message::DownloadChunk { slot, index, ref data } => {
                let mut body = vec![SUB_CHUNK, slot & 0x0F];
                body.extend_from_slice(&split14(index));
                body.extend_from_slice(data);
                (command::DOWNLOAD_RESP, body)
            }
            Message::DownloadCompleteAck { slot, status } => {
                (command::DOWNLOAD_RESP, vec![SUB_COMPLETE, slot & 0x0F, status.to_byte()])
            }

            Message::GetSequencerState => (command::GET_SEQUENCER_STATE, Vec::new()),
            Message::GetMixerState => (command::GET_MIXER_STATE, Vec::new()),
            Message::GetDeckState => (command::GET_DECK_STATE, Vec::new()),
            Message::SequencerState(_) | Message::MixerState(_) | Message::DeckState(_) => {
                unreachable!("handled above")
            }
        };

        frame(device_id, command, &body)
    }

    /// Parse a complete SysEx frame into `(device_id, Message)`
    ///
    /// Returns `None` on wrong manufacturer, unknown command, bad length or
    /// missing terminator. Never panics on foreign traffic.
    pub fn parse(data: &[u8]) -> Option<(u8, Self)> {
        if data.len() < 5 {
            return None;
        }
        if data[0] != SYSEX_START || data[1] != MANUFACTURER_ID {
            return None;
        }
        if *data.last().unwrap() != SYSEX_END {
            return None;
        }

        let device_id = data[2] & 0x7F;
        let cmd = data[3];
        let body = &data[4..data.len() - 1];

        let message = match cmd {
            command::UPLOAD => Self::parse_upload(body)?,
            command::UPLOAD_ACK => {
                // ACK frames are exactly eight bytes
                if body.len() != 3 {
                    return None;
                }
                Message::UploadAck {
                    phase: body[0],
                    slot: body[1] & 0x0F,
                    status: Status::from_byte(body[2]),
                }
            }
            command::PLAY => {
                if body.len() != 2 {
                    return None;
                }
                Message::Play { slot: body[0] & 0x0F, looped: body[1] != 0 }
            }
            command::STOP => {
                if body.len() != 1 {
                    return None;
                }
                Message::Stop { slot: body[0] & 0x0F }
            }
            command::MUTE => {
                if body.len() != 2 {
                    return None;
                }
                Message::Mute { slot: body[0] & 0x0F, on: body[1] != 0 }
            }
            command::SOLO => {
                if body.len() != 2 {
                    return None;
                }
                Message::Solo { slot: body[0] & 0x0F, on: body[1] != 0 }
            }
            command::GET_STATE => Message::GetState,
            command::CLEAR_SLOT => {
                if body.len() != 1 {
                    return None;
                }
                Message::ClearSlot { slot: body[0] & 0x0F }
            }
            command::LIST_SLOTS => Message::ListSlots,
            command::DOWNLOAD => Self::parse_download(body)?,
            command::DOWNLOAD_RESP => Self::parse_download_resp(body)?,
            command::GET_SEQUENCER_STATE => Message::GetSequencerState,
            command::SEQUENCER_STATE => {
                Message::SequencerState(SequencerSnapshot::parse(data)?)
            }
            command::GET_MIXER_STATE => Message::GetMixerState,
            command::MIXER_STATE => Message::MixerState(MixerSnapshot::parse(data)?),
            command::GET_DECK_STATE => Message::GetDeckState,
            command::DECK_STATE => Message::DeckState(DeckSnapshot::parse(data)?),
            _ => return None,
        };

        Some((device_id, message))
    }

    fn parse_upload(body: &[u8]) -> Option<Self> {
        match *body.first()? {
            SUB_START => {
                if body.len() != 9 {
                    return None;
                }
                Some(Message::UploadStart {
                    slot: body[1] & 0x0F,
                    program: body[2],
                    total_chunks: join14(body[3], body[4]),
                    file_size: join28(&body[5..9]),
                })
            }
            SUB_CHUNK => {
                if body.len() < 4 {
                    return None;
                }
                Some(Message::UploadChunk {
                    slot: body[1] & 0x0F,
                    index: join14(body[2], body[3]),
                    data: body[4..].to_vec(),
                })
            }
            SUB_COMPLETE => {
                if body.len() != 2 {
                    return None;
                }
                Some(Message::UploadComplete { slot: body[1] & 0x0F })
            }
            _ => None,
        }
    }

    fn parse_download(body: &[u8]) -> Option<Self> {
        match *body.first()? {
            SUB_START => {
                if body.len() != 2 {
                    return None;
                }
                Some(Message::DownloadStart { slot: body[1] & 0x0F })
            }
            SUB_CHUNK => {
                if body.len() != 4 {
                    return None;
                }
                Some(Message::DownloadGetChunk {
                    slot: body[1] & 0x0F,
                    index: join14(body[2], body[3]),
                })
            }
            SUB_COMPLETE => {
                if body.len() != 2 {
                    return None;
                }
                Some(Message::DownloadComplete { slot: body[1] & 0x0F })
            }
            _ => None,
        }
    }

    fn parse_download_resp(body: &[u8]) -> Option<Self> {
        match *body.first()? {
            SUB_START => {
                if body.len() != 10 {
                    return None;
                }
                Some(Message::DownloadStartAck {
                    slot: body[1] & 0x0F,
                    status: Status::from_byte(body[2]),
                    program: body[3],
                    total_chunks: join14(body[4], body[5]),
                    file_size: join28(&body[6..10]),
                })
            }
            SUB_CHUNK => {
                if body.len() < 4 {
                    return None;
                }
                Some(Message::DownloadChunk {
                    slot: body[1] & 0x0F,
                    index: join14(body[2], body[3]),
                    data: body[4..].to_vec(),
                })
            }
            SUB_COMPLETE => {
                if body.len() != 3 {
                    return None;
                }
                Some(Message::DownloadCompleteAck {
                    slot: body[1] & 0x0F,
                    status: Status::from_byte(body[2]),
                })
            }
            _ => None,
        }
    }

    /// Command byte this message travels under
    pub fn command(&self) -> u8 {
        match *self {
            Message::UploadStart { .. }
            | Message::UploadChunk { .. }
            | Message::UploadComplete { .. } => command::UPLOAD,
            Message::UploadAck { .. } => command::UPLOAD_ACK,
            Message::Play { .. } => command::PLAY,
            Message::Stop { .. } => command::STOP,
            Message::Mute { .. } => command::MUTE,
            Message::Solo { .. } => command::SOLO,
            Message::GetState => command::GET_STATE,
            Message::ClearSlot { .. } => command::CLEAR_SLOT,
            Message::ListSlots => command::LIST_SLOTS,
            Message::DownloadStart { .. }
            | Message::DownloadGetChunk { .. }
            | Message::DownloadComplete { .. } => command::DOWNLOAD,
            Message::DownloadStartAck { .. }
            | Message::DownloadChunk { .. }
            | Message::DownloadCompleteAck { .. } => command::DOWNLOAD_RESP,
            Message::GetSequencerState => command::GET_SEQUENCER_STATE,
            Message::SequencerState(_) => command::SEQUENCER_STATE,
            Message::GetMixerState => command::GET_MIXER_STATE,
            Message::MixerState(_) => command::MIXER_STATE,
            Message::GetDeckState => command::GET_DECK_STATE,
            Message::DeckState(_) => command::DECK_STATE,
        }
    }
}
