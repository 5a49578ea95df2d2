//! Tests for the transfer state machine

use super::*;
use crate::protocol::{Message, Status};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex as StdMutex;

const DEVICE: u8 = 3;

/// Short deadlines so failure paths finish quickly
fn test_timeouts() -> TransferTimeouts {
    TransferTimeouts {
        start_ack: Duration::from_millis(300),
        chunk_ack: Duration::from_millis(300),
        complete_ack: Duration::from_millis(300),
        download: Duration::from_millis(500),
        clear_settle: Duration::from_millis(0),
    }
}

/// What the fake device answers with
enum Script {
    /// Acknowledge every request positively
    AckAll,
    /// Reject the given upload phase, acknowledge everything else
    RejectPhase(u8),
    /// Never answer anything
    Silent,
    /// Ignore the first upload START, acknowledge from the second on
    DropFirstStart,
}

/// Fake device: records outgoing frames and queues scripted replies
struct FakeDevice {
    script: Script,
    sent: StdMutex<Vec<Vec<u8>>>,
    replies: mpsc::UnboundedSender<Message>,
    /// Payload served on download
    stored: Vec<u8>,
    starts_seen: StdMutex<usize>,
}

impl FakeDevice {
    fn new(script: Script, stored: Vec<u8>) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script,
                sent: StdMutex::new(Vec::new()),
                replies: tx,
                stored,
                starts_seen: StdMutex::new(0),
            }),
            rx,
        )
    }

    /// Encoded payload length of every upload CHUNK frame sent so far
    fn chunk_payload_sizes(&self) -> Vec<usize> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|frame| match Message::parse(frame) {
                Some((_, Message::UploadChunk { data, .. })) => Some(data.len()),
                _ => None,
            })
            .collect()
    }

    fn reply(&self, message: Message) {
        let _ = self.replies.send(message);
    }
}

#[async_trait]
impl Transport for FakeDevice {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(bytes.to_vec());

        if matches!(self.script, Script::Silent) {
            return Ok(());
        }

        let (_, message) = match Message::parse(bytes) {
            Some(parsed) => parsed,
            None => return Ok(()),
        };

        match message {
            Message::UploadStart { slot, .. } => {
                let mut seen = self.starts_seen.lock().unwrap();
                *seen += 1;
                if matches!(self.script, Script::DropFirstStart) && *seen == 1 {
                    return Ok(());
                }
                let status = if matches!(self.script, Script::RejectPhase(SUB_START)) {
                    Status::Rejected
                } else {
                    Status::Accepted
                };
                self.reply(Message::UploadAck { phase: SUB_START, slot, status });
            }
            Message::UploadChunk { slot, .. } => {
                let status = if matches!(self.script, Script::RejectPhase(SUB_CHUNK)) {
                    Status::Rejected
                } else {
                    Status::ChunkReceived
                };
                self.reply(Message::UploadAck { phase: SUB_CHUNK, slot, status });
            }
            Message::UploadComplete { slot } => {
                let status = if matches!(self.script, Script::RejectPhase(SUB_COMPLETE)) {
                    Status::Rejected
                } else {
                    Status::Accepted
                };
                self.reply(Message::UploadAck { phase: SUB_COMPLETE, slot, status });
            }
            Message::DownloadStart { slot } => {
                self.reply(Message::DownloadStartAck {
                    slot,
                    status: Status::Accepted,
                    program: 7,
                    total_chunks: self.stored.len().div_ceil(CHUNK_SIZE) as u16,
                    file_size: self.stored.len() as u32,
                });
            }
            Message::DownloadGetChunk { slot, index } => {
                let start = index as usize * CHUNK_SIZE;
                let end = (start + CHUNK_SIZE).min(self.stored.len());
                self.reply(Message::DownloadChunk {
                    slot,
                    index,
                    data: seven_bit::encode(&self.stored[start..end]),
                });
            }
            Message::DownloadComplete { slot } => {
                self.reply(Message::DownloadCompleteAck { slot, status: Status::Accepted });
            }
            _ => {}
        }

        Ok(())
    }
}

/// Wire a fake device's reply queue into the transfer's dispatch entry point
fn pump_replies(transfer: Arc<SampleTransfer>, mut rx: mpsc::UnboundedReceiver<Message>) {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            transfer.dispatch(message);
        }
    });
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_upload_resolves_with_cooperative_device() {
    let (device, replies) = FakeDevice::new(Script::AckAll, Vec::new());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    let data = payload(1000);
    let mut seen = Vec::new();
    transfer
        .upload(2, 9, &data, |done, total| seen.push((done, total)))
        .await
        .unwrap();

    // 1000 bytes split as 256 + 256 + 256 + 232
    assert_eq!(device.chunk_payload_sizes().len(), 4);
    assert_eq!(seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[tokio::test]
async fn test_upload_chunk_sizes() {
    let (device, replies) = FakeDevice::new(Script::AckAll, Vec::new());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    transfer.upload(0, 0, &payload(1000), |_, _| {}).await.unwrap();

    // Raw chunks of 256, 256, 256, 232 bytes encode to ceil(n/7)*8
    let sizes = device.chunk_payload_sizes();
    assert_eq!(sizes, vec![296, 296, 296, 272]);
}

#[tokio::test]
async fn test_upload_times_out_against_silent_device() {
    let (device, replies) = FakeDevice::new(Script::Silent, Vec::new());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    let err = transfer.upload(0, 0, &payload(10), |_, _| {}).await.unwrap_err();
    assert!(matches!(err, TransferError::AckTimeout { phase: "start" }));
}

#[tokio::test]
async fn test_upload_rejected_at_start() {
    let (device, replies) = FakeDevice::new(Script::RejectPhase(SUB_START), Vec::new());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    let err = transfer.upload(5, 0, &payload(10), |_, _| {}).await.unwrap_err();
    assert!(matches!(err, TransferError::StartRejected { slot: 5 }));
}

#[tokio::test]
async fn test_upload_rejected_at_first_chunk() {
    let (device, replies) = FakeDevice::new(Script::RejectPhase(SUB_CHUNK), Vec::new());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    let err = transfer
        .upload(1, 0, &payload(600), |_, _| {})
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::ChunkRejected { index: 0, total: 3 }));

    // The remaining chunks were never sent
    assert_eq!(device.chunk_payload_sizes().len(), 1);
}

#[tokio::test]
async fn test_download_round_trip() {
    let stored = payload(1000);
    let (device, replies) = FakeDevice::new(Script::AckAll, stored.clone());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    let mut seen = Vec::new();
    let received = transfer
        .download(4, |done, total| seen.push((done, total)))
        .await
        .unwrap();

    // The final partial chunk decodes with padding and must be clamped,
    // not written past the end of the buffer.
    assert_eq!(received, stored);
    assert_eq!(seen.last(), Some(&(4, 4)));
}

#[tokio::test]
async fn test_download_times_out_against_silent_device() {
    let (device, replies) = FakeDevice::new(Script::Silent, payload(100));
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    let err = transfer.download(0, |_, _| {}).await.unwrap_err();
    assert!(matches!(err, TransferError::DownloadTimeout(_)));
}

#[tokio::test]
async fn test_new_registration_replaces_pending_handler() {
    let (device, replies) = FakeDevice::new(Script::DropFirstStart, Vec::new());
    let transfer = Arc::new(SampleTransfer::with_timeouts(
        device.clone(),
        DEVICE,
        test_timeouts(),
    ));
    pump_replies(transfer.clone(), replies);

    // First upload's START goes unanswered; its pending handler is then
    // replaced when the second upload registers for the same command byte.
    let first = {
        let transfer = transfer.clone();
        tokio::spawn(async move { transfer.upload(0, 0, &[], |_, _| {}).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    transfer.upload(0, 0, &[], |_, _| {}).await.unwrap();

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, TransferError::AckTimeout { phase: "start" }));
}
