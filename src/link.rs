//! Device links
//!
//! `SamplerLink` wraps one sample box: it owns the dispatch task that drains
//! incoming MIDI, feeds transfer acknowledgments into the transfer state
//! machine, and surfaces parsed state responses as typed events. The
//! playback and slot commands live here too.
//!
//! `ControllerSurface` wraps one pad controller: OLED drawing, LED feedback
//! and emulated button presses, all behind the same injected transport.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::display::{Frame, OledEncoder};
use crate::leds::LedCache;
use crate::protocol::{DeckSnapshot, Message, MixerSnapshot, SequencerSnapshot};
use crate::scheduler::PressScheduler;
use crate::transfer::{SampleTransfer, TransferError, TransferTimeouts};
use crate::transport::Transport;

/// Parsed device state pushed by the sample box
#[derive(Debug, Clone)]
pub enum StateEvent {
    Sequencer(SequencerSnapshot),
    Mixer(MixerSnapshot),
    Deck(DeckSnapshot),
}

/// Link to one sample box
pub struct SamplerLink {
    transport: Arc<dyn Transport>,
    device_id: u8,
    transfer: Arc<SampleTransfer>,
}

impl SamplerLink {
    pub fn new(transport: Arc<dyn Transport>, device_id: u8) -> Self {
        let transfer = Arc::new(SampleTransfer::new(Arc::clone(&transport), device_id));
        Self {
            transport,
            device_id,
            transfer,
        }
    }

    pub fn with_timeouts(
        transport: Arc<dyn Transport>,
        device_id: u8,
        timeouts: TransferTimeouts,
    ) -> Self {
        let transfer = Arc::new(SampleTransfer::with_timeouts(
            Arc::clone(&transport),
            device_id,
            timeouts,
        ));
        Self {
            transport,
            device_id,
            transfer,
        }
    }

    /// Spawn the dispatch task draining raw incoming MIDI
    ///
    /// Transfer responses go to the transfer state machine; state responses
    /// come back to the caller as `StateEvent`s. Foreign or malformed
    /// traffic on the bus is dropped without comment.
    pub fn start_dispatch(
        &self,
        mut incoming: mpsc::Receiver<Vec<u8>>,
    ) -> mpsc::Receiver<StateEvent> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let transfer = Arc::clone(&self.transfer);
        let device_id = self.device_id;

        tokio::spawn(async move {
            while let Some(raw) = incoming.recv().await {
                let Some((device, message)) = Message::parse(&raw) else {
                    continue;
                };
                if device != device_id {
                    debug!("Frame for device {} on device {}'s bus, dropping", device, device_id);
                    continue;
                }

                match message {
                    Message::SequencerState(snapshot) => {
                        let _ = event_tx.send(StateEvent::Sequencer(snapshot)).await;
                    }
                    Message::MixerState(snapshot) => {
                        let _ = event_tx.send(StateEvent::Mixer(snapshot)).await;
                    }
                    Message::DeckState(snapshot) => {
                        let _ = event_tx.send(StateEvent::Deck(snapshot)).await;
                    }
                    message @ (Message::UploadAck { .. }
                    | Message::DownloadStartAck { .. }
                    | Message::DownloadChunk { .. }
                    | Message::DownloadCompleteAck { .. }) => {
                        transfer.dispatch(message);
                    }
                    other => {
                        debug!("Unhandled command 0x{:02X}, dropping", other.command());
                    }
                }
            }
            info!("Dispatch loop ended, transport closed");
        });

        event_rx
    }

    /// Upload `data` into `slot` under `program`
    pub async fn upload(
        &self,
        slot: u8,
        program: u8,
        data: &[u8],
        progress: impl FnMut(usize, usize),
    ) -> Result<(), TransferError> {
        self.transfer.upload(slot, program, data, progress).await
    }

    /// Download the sample stored in `slot`
    pub async fn download(
        &self,
        slot: u8,
        progress: impl FnMut(usize, usize),
    ) -> Result<Vec<u8>, TransferError> {
        self.transfer.download(slot, progress).await
    }

    pub async fn play(&self, slot: u8, looped: bool) -> Result<()> {
        self.send(Message::Play { slot, looped }).await
    }

    pub async fn stop(&self, slot: u8) -> Result<()> {
        self.send(Message::Stop { slot }).await
    }

    pub async fn mute(&self, slot: u8, on: bool) -> Result<()> {
        self.send(Message::Mute { slot, on }).await
    }

    pub async fn solo(&self, slot: u8, on: bool) -> Result<()> {
        self.send(Message::Solo { slot, on }).await
    }

    pub async fn clear_slot(&self, slot: u8) -> Result<()> {
        self.send(Message::ClearSlot { slot }).await
    }

    pub async fn list_slots(&self) -> Result<()> {
        self.send(Message::ListSlots).await
    }

    pub async fn request_state(&self) -> Result<()> {
        self.send(Message::GetState).await
    }

    pub async fn request_sequencer_state(&self) -> Result<()> {
        self.send(Message::GetSequencerState).await
    }

    pub async fn request_mixer_state(&self) -> Result<()> {
        self.send(Message::GetMixerState).await
    }

    pub async fn request_deck_state(&self) -> Result<()> {
        self.send(Message::GetDeckState).await
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.transport.send(&message.encode(self.device_id)).await
    }
}

/// Link to one pad controller
pub struct ControllerSurface {
    transport: Arc<dyn Transport>,
    oled: OledEncoder,
    leds: LedCache,
    presses: PressScheduler,
}

impl ControllerSurface {
    pub fn new(transport: Arc<dyn Transport>, device_id: u8, led_channel: u8) -> Self {
        Self {
            oled: OledEncoder::new(device_id),
            leds: LedCache::new(device_id, led_channel),
            presses: PressScheduler::new(Arc::clone(&transport), led_channel),
            transport,
        }
    }

    /// Push a rendered frame to the OLED, sending only what changed
    ///
    /// Returns the number of stripes that went on the wire.
    pub async fn draw(&mut self, frame: &Frame) -> Result<usize> {
        let packets = self.oled.encode_frame(frame);
        for packet in &packets {
            self.transport.send(packet).await?;
        }
        Ok(packets.len())
    }

    /// Set a pad or button LED, suppressing redundant writes
    ///
    /// Returns whether anything was actually sent.
    pub async fn set_led(&mut self, address: u8, value: u8) -> Result<bool> {
        match self.leds.set_state(address, value) {
            Some(message) => {
                self.transport.send(&message).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Emulate a momentary button press
    pub async fn tap(&self, note: u8) -> Result<JoinHandle<()>> {
        self.presses.tap(note).await
    }

    /// Forget all cached hardware state after a reconnect
    pub fn reset(&mut self) {
        self.oled.reset();
        self.leds.clear();
    }
}

/// Wait for the next state event, bounded by `deadline`
///
/// Convenience for one-shot state queries from the CLI.
pub async fn next_event(
    events: &mut mpsc::Receiver<StateEvent>,
    deadline: Duration,
) -> Option<StateEvent> {
    tokio::time::timeout(deadline, events.recv()).await.ok().flatten()
}
