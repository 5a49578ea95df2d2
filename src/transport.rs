//! Transport seam between the protocol components and MIDI hardware
//!
//! Components never reach into global device state; each one is handed an
//! `Arc<dyn Transport>` at construction. The midir-backed implementation
//! matches ports by case-insensitive substring so OS-decorated port names
//! keep working.

use anyhow::{Context, Result};
use async_trait::async_trait;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::midi::format_hex;

/// Outgoing byte-stream to one hardware device
///
/// Implementations use interior mutability so callers can share the
/// transport behind an `Arc`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one complete MIDI message (channel voice or full SysEx frame)
    async fn send(&self, bytes: &[u8]) -> Result<()>;
}

/// List available MIDI input port names
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("Padlink-Scanner")?;

    let mut port_names = Vec::new();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// List available MIDI output port names
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("Padlink-Scanner")?;

    let mut port_names = Vec::new();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// midir-backed transport for one device
pub struct MidiTransport {
    /// MIDI output connection
    output_conn: Arc<Mutex<MidiOutputConnection>>,

    /// Input connection, held so the callback stays alive
    _input_conn: MidiInputConnection<()>,
}

impl MidiTransport {
    /// Connect to a device's input/output port pair
    ///
    /// Returns the transport plus the receiver carrying every incoming raw
    /// MIDI message from the device.
    pub fn connect(
        input_pattern: &str,
        output_pattern: &str,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        info!(
            "Connecting device - Input: '{}', Output: '{}'",
            input_pattern, output_pattern
        );

        let midi_in = MidiInput::new("Padlink-Input").context("Failed to create MIDI input")?;

        let (in_port, in_name) = Self::find_input_port(&midi_in, input_pattern)
            .ok_or_else(|| anyhow::anyhow!("Input port '{}' not found", input_pattern))?;

        info!("Connecting to input port: {}", in_name);

        let (event_tx, event_rx) = mpsc::channel::<Vec<u8>>(1000);

        let input_conn = midi_in
            .connect(
                &in_port,
                "Padlink",
                move |_timestamp, data, _| {
                    // Forward raw bytes; parsing happens on the dispatch side.
                    // Never block or panic inside the midir callback.
                    if event_tx.try_send(data.to_vec()).is_err() {
                        debug!("Dropped incoming MIDI: {}", format_hex(data));
                    }
                },
                (),
            )
            .context("Failed to connect to input port")?;

        let midi_out = MidiOutput::new("Padlink-Output").context("Failed to create MIDI output")?;

        let (out_port, out_name) = Self::find_output_port(&midi_out, output_pattern)
            .ok_or_else(|| anyhow::anyhow!("Output port '{}' not found", output_pattern))?;

        info!("Connecting to output port: {}", out_name);

        let output_conn = midi_out
            .connect(&out_port, "Padlink")
            .context("Failed to connect to output port")?;

        Ok((
            Self {
                output_conn: Arc::new(Mutex::new(output_conn)),
                _input_conn: input_conn,
            },
            event_rx,
        ))
    }

    /// Find an input port by substring match
    fn find_input_port(
        midi_in: &MidiInput,
        pattern: &str,
    ) -> Option<(midir::MidiInputPort, String)> {
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                if name.to_lowercase().contains(&pattern.to_lowercase()) {
                    debug!("Found port '{}' matching pattern '{}'", name, pattern);
                    return Some((port, name));
                }
            }
        }
        None
    }

    /// Find an output port by substring match
    fn find_output_port(
        midi_out: &MidiOutput,
        pattern: &str,
    ) -> Option<(midir::MidiOutputPort, String)> {
        for port in midi_out.ports() {
            if let Ok(name) = midi_out.port_name(&port) {
                if name.to_lowercase().contains(&pattern.to_lowercase()) {
                    debug!("Found port '{}' matching pattern '{}'", name, pattern);
                    return Some((port, name));
                }
            }
        }
        None
    }
}

#[async_trait]
impl Transport for MidiTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut conn = self
            .output_conn
            .lock()
            .map_err(|_| anyhow::anyhow!("MIDI output mutex poisoned"))?;
        conn.send(bytes).context("Failed to send MIDI message")?;
        Ok(())
    }
}

/// In-memory transport recording every sent frame, for tests
#[cfg(test)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Vec<u8>>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    /// All frames sent so far, oldest first
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}
