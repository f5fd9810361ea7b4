//! Assembly of captured chunks into one artifact, and artifact storage.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::capture::MediaChunk;
use crate::error::RecordingError;
use crate::Result;

/// Largest thumbnail, in bytes.
pub const THUMBNAIL_BYTES: usize = 256;

/// Chunks joined into one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRecording {
    pub data: Bytes,
    /// Captured time; chunks are only produced while not paused.
    pub duration_ms: u64,
    pub chunk_count: usize,
    pub thumbnail: Bytes,
    /// Offset into the recording the thumbnail was taken from.
    pub thumbnail_offset_ms: u64,
}

/// Where an artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub url: String,
    pub thumbnail_url: String,
}

/// Joins chunks in sequence order. Returns None when there are none.
///
/// The thumbnail is a frame from the chunk covering `thumbnail_fraction`
/// of the total duration.
pub fn assemble(mut chunks: Vec<MediaChunk>, thumbnail_fraction: f64) -> Option<AssembledRecording> {
    if chunks.is_empty() {
        return None;
    }
    chunks.sort_by_key(|c| c.sequence);

    let duration_ms: u64 = chunks.iter().map(|c| c.duration_ms).sum();
    let offset_ms = (duration_ms as f64 * thumbnail_fraction.clamp(0.0, 1.0)) as u64;
    let source = thumbnail_source(&chunks, offset_ms);

    let mut data = BytesMut::with_capacity(chunks.iter().map(|c| c.data.len()).sum());
    for chunk in &chunks {
        data.extend_from_slice(&chunk.data);
    }

    let frame = &chunks[source].data;
    let thumbnail = frame.slice(..frame.len().min(THUMBNAIL_BYTES));

    Some(AssembledRecording {
        data: data.freeze(),
        duration_ms,
        chunk_count: chunks.len(),
        thumbnail,
        thumbnail_offset_ms: offset_ms,
    })
}

/// Index of the chunk covering `offset_ms`.
fn thumbnail_source(chunks: &[MediaChunk], offset_ms: u64) -> usize {
    let mut elapsed = 0;
    for (index, chunk) in chunks.iter().enumerate() {
        elapsed += chunk.duration_ms;
        if offset_ms < elapsed {
            return index;
        }
    }
    chunks.len() - 1
}

/// Durable home of recording artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, recording_id: &str, data: Bytes, thumbnail: Bytes) -> Result<StoredArtifact>;
}

/// Artifact store keeping everything in memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<String, Bytes>>,
    failing: AtomicBool,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every store call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.objects.read().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn store(&self, recording_id: &str, data: Bytes, thumbnail: Bytes) -> Result<StoredArtifact> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RecordingError::Storage("store unavailable".to_string()));
        }
        let artifact = StoredArtifact {
            url: format!("memory://recordings/{}.webm", recording_id),
            thumbnail_url: format!("memory://recordings/{}.thumb", recording_id),
        };
        let mut objects = self.objects.write();
        objects.insert(artifact.url.clone(), data);
        objects.insert(artifact.thumbnail_url.clone(), thumbnail);
        Ok(artifact)
    }
}
