//! Chunked, ACK-driven sample transfer
//!
//! Upload walks a strict request/acknowledge handshake with per-phase
//! deadlines; download is push-driven behind one persistent listener and a
//! single master deadline. At most one pending handler exists per command
//! byte: registering a new await replaces the previous one, whose caller is
//! left to run into its own deadline. No abort message is sent to the device
//! when a transfer fails locally.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::{command, Message, Status, SUB_CHUNK, SUB_COMPLETE, SUB_START};
use crate::seven_bit;
use crate::transport::Transport;

/// Raw payload bytes carried per chunk (pre-encode)
pub const CHUNK_SIZE: usize = 256;

/// Transfer failure, phase-specific
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("device rejected the upload into slot {slot}")]
    StartRejected { slot: u8 },

    #[error("device rejected chunk {index} of {total}")]
    ChunkRejected { index: u16, total: u16 },

    #[error("device rejected the upload completion for slot {slot}")]
    CompleteRejected { slot: u8 },

    #[error("timed out waiting for {phase} acknowledgment")]
    AckTimeout { phase: &'static str },

    #[error("device rejected the download from slot {slot}")]
    DownloadRejected { slot: u8 },

    #[error("download did not complete within {0:?}")]
    DownloadTimeout(Duration),

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Handshake deadlines
///
/// Defaults match the device firmware; tests inject shorter ones.
#[derive(Debug, Clone, Copy)]
pub struct TransferTimeouts {
    pub start_ack: Duration,
    pub chunk_ack: Duration,
    pub complete_ack: Duration,
    /// Master deadline covering the entire download exchange
    pub download: Duration,
    /// Settle delay after the fire-and-forget slot clear
    pub clear_settle: Duration,
}

impl Default for TransferTimeouts {
    fn default() -> Self {
        Self {
            start_ack: Duration::from_millis(3000),
            chunk_ack: Duration::from_millis(2000),
            complete_ack: Duration::from_millis(3000),
            download: Duration::from_millis(30_000),
            clear_settle: Duration::from_millis(100),
        }
    }
}

/// Pending wait registered under one command byte
enum Handler {
    /// One-shot ACK await filtered on (phase, slot)
    Ack {
        phase: u8,
        slot: u8,
        tx: oneshot::Sender<Status>,
    },
    /// Persistent listener receiving every message under the command byte
    Stream(mpsc::UnboundedSender<Message>),
}

/// Handler table: one entry per command byte, newest registration wins
struct Registry {
    next_epoch: u64,
    handlers: HashMap<u8, (u64, Handler)>,
}

impl Registry {
    fn register(&mut self, cmd: u8, handler: Handler) -> u64 {
        self.next_epoch += 1;
        if self.handlers.insert(cmd, (self.next_epoch, handler)).is_some() {
            warn!("Replacing pending handler for command 0x{:02X}", cmd);
        }
        self.next_epoch
    }

    /// Remove the entry for `cmd` only if it is still the given registration
    fn remove_if_current(&mut self, cmd: u8, epoch: u64) {
        if self.handlers.get(&cmd).is_some_and(|(e, _)| *e == epoch) {
            self.handlers.remove(&cmd);
        }
    }
}

/// Removes a persistent listener on every exit path
struct ListenerGuard {
    registry: Arc<Mutex<Registry>>,
    cmd: u8,
    epoch: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap()
            .remove_if_current(self.cmd, self.epoch);
    }
}

/// Upload/download state machine for one sample device
pub struct SampleTransfer {
    transport: Arc<dyn Transport>,
    device_id: u8,
    timeouts: TransferTimeouts,
    registry: Arc<Mutex<Registry>>,
}

impl SampleTransfer {
    pub fn new(transport: Arc<dyn Transport>, device_id: u8) -> Self {
        Self::with_timeouts(transport, device_id, TransferTimeouts::default())
    }

    pub fn with_timeouts(
        transport: Arc<dyn Transport>,
        device_id: u8,
        timeouts: TransferTimeouts,
    ) -> Self {
        Self {
            transport,
            device_id,
            timeouts,
            registry: Arc::new(Mutex::new(Registry {
                next_epoch: 0,
                handlers: HashMap::new(),
            })),
        }
    }

    /// Route an incoming parsed message to the pending handler, if any
    ///
    /// Messages with no registered handler, or ACKs whose (phase, slot) does
    /// not match the awaited pair, are dropped: they are stray, late, or
    /// belong to a session this instance no longer tracks.
    pub fn dispatch(&self, message: Message) {
        let cmd = message.command();
        let mut registry = self.registry.lock().unwrap();

        let Some((epoch, handler)) = registry.handlers.remove(&cmd) else {
            debug!("No handler for command 0x{:02X}, dropping", cmd);
            return;
        };

        match handler {
            Handler::Stream(tx) => {
                // Persistent listener: keep it registered while its
                // receiving side is alive
                if tx.send(message).is_ok() {
                    registry.handlers.insert(cmd, (epoch, Handler::Stream(tx)));
                }
            }
            Handler::Ack { phase, slot, tx } => match message {
                Message::UploadAck { phase: p, slot: s, status }
                    if p == phase && s == slot =>
                {
                    let _ = tx.send(status);
                }
                other => {
                    debug!("Ignoring stray response: {:?}", other);
                    registry
                        .handlers
                        .insert(cmd, (epoch, Handler::Ack { phase, slot, tx }));
                }
            },
        }
    }

    /// Upload `data` into `slot`, assigning it to `program`
    ///
    /// `progress` is called after each acknowledged chunk with
    /// (chunks done, chunks total).
    pub async fn upload(
        &self,
        slot: u8,
        program: u8,
        data: &[u8],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<(), TransferError> {
        let total = data.len().div_ceil(CHUNK_SIZE);
        debug!(
            "Uploading {} bytes into slot {} ({} chunks)",
            data.len(),
            slot,
            total
        );

        // Fire-and-forget clear, then let the device settle
        self.send(Message::ClearSlot { slot }).await?;
        tokio::time::sleep(self.timeouts.clear_settle).await;

        let ack = self.register_ack(SUB_START, slot);
        self.send(Message::UploadStart {
            slot,
            program,
            total_chunks: total as u16,
            file_size: data.len() as u32,
        })
        .await?;
        let status = self.wait_ack(ack, self.timeouts.start_ack, "start").await?;
        if status.is_rejected() {
            return Err(TransferError::StartRejected { slot });
        }

        for (i, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
            let ack = self.register_ack(SUB_CHUNK, slot);
            self.send(Message::UploadChunk {
                slot,
                index: i as u16,
                data: seven_bit::encode(chunk),
            })
            .await?;
            let status = self.wait_ack(ack, self.timeouts.chunk_ack, "chunk").await?;
            if status.is_rejected() {
                return Err(TransferError::ChunkRejected {
                    index: i as u16,
                    total: total as u16,
                });
            }
            progress(i + 1, total);
        }

        let ack = self.register_ack(SUB_COMPLETE, slot);
        self.send(Message::UploadComplete { slot }).await?;
        let status = self
            .wait_ack(ack, self.timeouts.complete_ack, "complete")
            .await?;
        if status.is_rejected() {
            return Err(TransferError::CompleteRejected { slot });
        }

        debug!("Upload into slot {} complete", slot);
        Ok(())
    }

    /// Download the sample stored in `slot`
    ///
    /// The whole exchange runs under one master deadline; the persistent
    /// response listener is removed on every exit path.
    pub async fn download(
        &self,
        slot: u8,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Vec<u8>, TransferError> {
        let (_guard, mut stream) = self.register_stream(command::DOWNLOAD_RESP);

        let deadline = self.timeouts.download;
        match tokio::time::timeout(deadline, self.download_inner(slot, &mut stream, &mut progress))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(TransferError::DownloadTimeout(deadline)),
        }
    }

    async fn download_inner(
        &self,
        slot: u8,
        stream: &mut mpsc::UnboundedReceiver<Message>,
        progress: &mut impl FnMut(usize, usize),
    ) -> Result<Vec<u8>, TransferError> {
        self.send(Message::DownloadStart { slot }).await?;

        let (total_chunks, file_size) = loop {
            match Self::next_response(stream).await {
                Message::DownloadStartAck {
                    slot: s,
                    status,
                    program,
                    total_chunks,
                    file_size,
                } if s == slot => {
                    if status.is_rejected() {
                        return Err(TransferError::DownloadRejected { slot });
                    }
                    debug!(
                        "Downloading slot {}: program {}, {} chunks, {} bytes",
                        slot, program, total_chunks, file_size
                    );
                    break (total_chunks, file_size);
                }
                other => debug!("Ignoring unexpected response: {:?}", other.command()),
            }
        };

        let mut buffer = vec![0u8; file_size as usize];
        let mut received: u16 = 0;

        if total_chunks == 0 {
            self.send(Message::DownloadComplete { slot }).await?;
        } else {
            self.send(Message::DownloadGetChunk { slot, index: 0 }).await?;
        }

        while received < total_chunks {
            match Self::next_response(stream).await {
                Message::DownloadChunk { slot: s, index, data } if s == slot => {
                    let decoded = seven_bit::decode(&data);
                    let offset = index as usize * CHUNK_SIZE;
                    if offset < buffer.len() {
                        // The final chunk decodes with padding; clamp to the
                        // space left instead of overrunning the buffer.
                        let n = decoded.len().min(buffer.len() - offset);
                        buffer[offset..offset + n].copy_from_slice(&decoded[..n]);
                    }

                    received += 1;
                    progress(received as usize, total_chunks as usize);

                    if received < total_chunks {
                        self.send(Message::DownloadGetChunk { slot, index: received })
                            .await?;
                    } else {
                        self.send(Message::DownloadComplete { slot }).await?;
                    }
                }
                other => debug!("Ignoring unexpected response: {:?}", other.command()),
            }
        }

        loop {
            match Self::next_response(stream).await {
                Message::DownloadCompleteAck { slot: s, status } if s == slot => {
                    return if status.is_rejected() {
                        Err(TransferError::DownloadRejected { slot })
                    } else {
                        Ok(buffer)
                    };
                }
                other => debug!("Ignoring unexpected response: {:?}", other.command()),
            }
        }
    }

    /// Receive the next routed response; a replaced listener never resolves,
    /// leaving the master deadline to end the wait
    async fn next_response(stream: &mut mpsc::UnboundedReceiver<Message>) -> Message {
        match stream.recv().await {
            Some(message) => message,
            None => std::future::pending().await,
        }
    }

    fn register_ack(&self, phase: u8, slot: u8) -> (u64, oneshot::Receiver<Status>) {
        let (tx, rx) = oneshot::channel();
        let epoch = self
            .registry
            .lock()
            .unwrap()
            .register(command::UPLOAD_ACK, Handler::Ack { phase, slot, tx });
        (epoch, rx)
    }

    fn register_stream(&self, cmd: u8) -> (ListenerGuard, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let epoch = self
            .registry
            .lock()
            .unwrap()
            .register(cmd, Handler::Stream(tx));
        (
            ListenerGuard {
                registry: Arc::clone(&self.registry),
                cmd,
                epoch,
            },
            rx,
        )
    }

    async fn wait_ack(
        &self,
        (epoch, rx): (u64, oneshot::Receiver<Status>),
        deadline: Duration,
        phase: &'static str,
    ) -> Result<Status, TransferError> {
        let wait = async {
            match rx.await {
                Ok(status) => status,
                // Our registration was replaced; the await never settles and
                // the deadline below reports the failure.
                Err(_) => std::future::pending().await,
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(status) => Ok(status),
            Err(_) => {
                self.registry
                    .lock()
                    .unwrap()
                    .remove_if_current(command::UPLOAD_ACK, epoch);
                Err(TransferError::AckTimeout { phase })
            }
        }
    }

    async fn send(&self, message: Message) -> Result<(), TransferError> {
        self.transport
            .send(&message.encode(self.device_id))
            .await
            .map_err(TransferError::Transport)
    }
}
