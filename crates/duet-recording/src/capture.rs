//! Capture of the composed session stream in fixed-duration chunks.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::RecordingError;
use crate::Result;

/// One fixed-duration piece of captured media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub sequence: u64,
    pub captured_at: u64,
    pub duration_ms: u64,
    pub data: Bytes,
}

/// Platform capture capability.
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Starts capture. Chunks arrive on the returned receiver, which ends
    /// after [`CaptureDevice::stop`].
    async fn start(&self, chunk_duration: Duration) -> Result<mpsc::UnboundedReceiver<MediaChunk>>;

    /// Suspends chunk production.
    fn pause(&self);

    fn resume(&self);

    /// Stops capture and flushes the last chunk.
    fn stop(&self);
}

#[derive(Debug, Default)]
struct CaptureState {
    sender: Option<mpsc::UnboundedSender<MediaChunk>>,
    chunk_duration_ms: u64,
}

/// Capture device producing synthetic chunks.
///
/// Chunks are pushed explicitly with [`InMemoryCapture::capture`] or, when
/// created with [`InMemoryCapture::ticking`], by a timer every chunk
/// duration.
#[derive(Debug, Default)]
pub struct InMemoryCapture {
    state: Arc<Mutex<CaptureState>>,
    paused: Arc<AtomicBool>,
    next_sequence: Arc<AtomicU64>,
    unavailable: AtomicBool,
    ticking: bool,
    chunk_bytes: usize,
}

impl InMemoryCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            chunk_bytes: 1024,
            ..Default::default()
        })
    }

    /// A device that produces one chunk per chunk duration on its own.
    pub fn ticking(chunk_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            ticking: true,
            chunk_bytes,
            ..Default::default()
        })
    }

    /// Makes the next start fail, as if the device were missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    /// Emits `count` chunks unless stopped or paused. Returns how many were
    /// emitted.
    pub fn capture(&self, count: usize) -> usize {
        (0..count).filter(|_| self.emit()).count()
    }

    fn emit(&self) -> bool {
        emit_chunk(&self.state, &self.paused, &self.next_sequence, self.chunk_bytes)
    }
}

fn emit_chunk(
    state: &Mutex<CaptureState>,
    paused: &AtomicBool,
    next_sequence: &AtomicU64,
    chunk_bytes: usize,
) -> bool {
    if paused.load(Ordering::SeqCst) {
        return false;
    }
    let state = state.lock();
    let Some(sender) = &state.sender else {
        return false;
    };
    let sequence = next_sequence.fetch_add(1, Ordering::SeqCst);
    let data = Bytes::from(vec![(sequence % 251) as u8; chunk_bytes]);
    sender
        .send(MediaChunk {
            sequence,
            captured_at: duet_types::now_millis(),
            duration_ms: state.chunk_duration_ms,
            data,
        })
        .is_ok()
}

#[async_trait]
impl CaptureDevice for InMemoryCapture {
    async fn start(&self, chunk_duration: Duration) -> Result<mpsc::UnboundedReceiver<MediaChunk>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RecordingError::CaptureUnavailable(
                "no capture device".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            state.sender = Some(tx);
            state.chunk_duration_ms = chunk_duration.as_millis() as u64;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.next_sequence.store(0, Ordering::SeqCst);

        if self.ticking {
            let state = self.state.clone();
            let paused = self.paused.clone();
            let next_sequence = self.next_sequence.clone();
            let chunk_bytes = self.chunk_bytes;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(chunk_duration);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if state.lock().sender.is_none() {
                        break;
                    }
                    emit_chunk(&state, &paused, &next_sequence, chunk_bytes);
                }
            });
        }
        Ok(rx)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        // Dropping the sender ends the receiver once drained.
        self.state.lock().sender = None;
    }
}
