//! Momentary control presses
//!
//! Some hardware functions are only reachable by pressing a button, so the
//! control application emulates one: a press is a pair of scheduled state
//! transitions (note on now, note off after the hold delay), run through
//! this scheduler rather than ad hoc timeouts at call sites.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::midi::MidiMessage;
use crate::transport::Transport;

/// How long an emulated press is held
pub const DEFAULT_HOLD: Duration = Duration::from_millis(100);

/// Scheduler for emulated button presses on one device
pub struct PressScheduler {
    transport: Arc<dyn Transport>,
    channel: u8,
    hold: Duration,
}

impl PressScheduler {
    pub fn new(transport: Arc<dyn Transport>, channel: u8) -> Self {
        Self::with_hold(transport, channel, DEFAULT_HOLD)
    }

    pub fn with_hold(transport: Arc<dyn Transport>, channel: u8, hold: Duration) -> Self {
        Self {
            transport,
            channel: channel & 0x0F,
            hold,
        }
    }

    /// Press `note` now and release it after the hold delay
    ///
    /// The release runs on its own task; the returned handle lets callers
    /// await it (tests do), but dropping it does not cancel the release.
    pub async fn tap(&self, note: u8) -> Result<JoinHandle<()>> {
        let press = MidiMessage::NoteOn {
            channel: self.channel,
            note,
            velocity: 0x7F,
        };
        self.transport.send(&press.encode()).await?;

        let transport = Arc::clone(&self.transport);
        let channel = self.channel;
        let hold = self.hold;

        Ok(tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            let release = MidiMessage::NoteOff {
                channel,
                note,
                velocity: 0,
            };
            if let Err(err) = transport.send(&release.encode()).await {
                warn!("Failed to release control {}: {:#}", note, err);
            }
        }))
    }
}
