//! Transport that records instead of delivering

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use handoff_common::codec::{self, Decoded};
use handoff_common::{PeerId, Transport, TransportCapabilities};
use parking_lot::Mutex;
use tokio::sync::watch;

/// One send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// Destination
    pub peer_id: PeerId,
    /// Payload
    pub bytes: Vec<u8>,
    /// Whether the transport reported success
    pub accepted: bool,
}

impl SentFrame {
    /// Payload as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Decoded payload, if it is a valid frame
    pub fn decoded(&self) -> Option<Decoded> {
        codec::decode(&self.bytes).ok()
    }
}

/// Records every send attempt
#[derive(Debug)]
pub struct RecordingTransport {
    frames: watch::Sender<Vec<SentFrame>>,
    deliverable: AtomicBool,
    capabilities: Mutex<TransportCapabilities>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    /// Create a transport accepting every frame
    pub fn new() -> Self {
        let (frames, _) = watch::channel(Vec::new());
        Self {
            frames,
            deliverable: AtomicBool::new(true),
            capabilities: Mutex::new(TransportCapabilities::default()),
        }
    }

    /// Create a transport advertising `capabilities`
    pub fn with_capabilities(capabilities: TransportCapabilities) -> Self {
        let transport = Self::new();
        *transport.capabilities.lock() = capabilities;
        transport
    }

    /// Whether subsequent sends are accepted
    pub fn set_deliverable(&self, deliverable: bool) {
        self.deliverable.store(deliverable, Ordering::SeqCst);
    }

    /// Every attempt so far
    pub fn sent(&self) -> Vec<SentFrame> {
        self.frames.borrow().clone()
    }

    /// Attempts whose decoded payload satisfies `predicate`
    pub fn sent_matching<F>(&self, predicate: F) -> Vec<SentFrame>
    where
        F: Fn(&Decoded) -> bool,
    {
        self.frames
            .borrow()
            .iter()
            .filter(|frame| frame.decoded().as_ref().is_some_and(&predicate))
            .cloned()
            .collect()
    }

    /// Forget recorded attempts
    pub fn clear(&self) {
        self.frames.send_modify(|frames| frames.clear());
    }

    /// Wait until the recorded attempts satisfy `predicate`
    pub async fn wait_for<F>(&self, predicate: F) -> Vec<SentFrame>
    where
        F: FnMut(&Vec<SentFrame>) -> bool,
    {
        let mut rx = self.frames.subscribe();
        let frames = match rx.wait_for(predicate).await {
            Ok(frames) => frames.clone(),
            Err(_) => self.sent(),
        };
        frames
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, peer_id: &PeerId, bytes: &[u8]) -> bool {
        let accepted = self.deliverable.load(Ordering::SeqCst);
        self.frames.send_modify(|frames| {
            frames.push(SentFrame {
                peer_id: peer_id.clone(),
                bytes: bytes.to_vec(),
                accepted,
            })
        });
        accepted
    }

    fn capabilities(&self) -> TransportCapabilities {
        *self.capabilities.lock()
    }
}
