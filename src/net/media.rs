//! Media stream handles and camera capture
//!
//! A [`MediaStream`] is a cheap, cloneable handle onto a live sequence of
//! encoded chunks. The node logic never looks inside the chunks: it only
//! routes handles between the capture device, the transport and the UI.

use crate::assets::{CAPTURE_FACING, CAPTURE_WIDTH, STREAM_CHUNK_BACKLOG};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Constraints a Satellite asks of its camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRequest {
    pub video: bool,
    pub audio: bool,
    /// Target width in pixels
    pub width: u32,
    /// Camera facing preference, `"environment"` for the rear camera
    pub facing_mode: String,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        CaptureRequest {
            video: true,
            audio: false,
            width: CAPTURE_WIDTH,
            facing_mode: CAPTURE_FACING.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera unavailable: {0}")]
    Unavailable(String),
}

/// Settings of the track behind a stream, when known.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub facing_mode: Option<String>,
}

impl From<&CaptureRequest> for TrackSettings {
    fn from(request: &CaptureRequest) -> Self {
        TrackSettings {
            width: Some(request.width),
            facing_mode: Some(request.facing_mode.clone()),
        }
    }
}

struct StreamInner {
    id: String,
    settings: TrackSettings,
    chunks: broadcast::Sender<Bytes>,
    pushed: AtomicU64,
    ended: AtomicBool,
}

#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, settings: TrackSettings) -> Self {
        let (chunks, _) = broadcast::channel(STREAM_CHUNK_BACKLOG);
        MediaStream {
            inner: Arc::new(StreamInner {
                id: id.into(),
                settings,
                chunks,
                pushed: AtomicU64::new(0),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn settings(&self) -> &TrackSettings {
        &self.inner.settings
    }

    /// Publishes one encoded chunk to every subscriber.
    ///
    /// Returns false once the stream has ended. Chunks pushed while nobody
    /// listens are dropped.
    pub fn push(&self, chunk: Bytes) -> bool {
        if self.is_ended() {
            return false;
        }
        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        let _ = self.inner.chunks.send(chunk);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.inner.chunks.subscribe()
    }

    pub fn chunks_pushed(&self) -> u64 {
        self.inner.pushed.load(Ordering::Relaxed)
    }

    pub fn end(&self) {
        self.inner.ended.store(true, Ordering::Relaxed);
    }

    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Relaxed)
    }

    /// Both handles point at the same underlying stream.
    pub fn same_stream(&self, other: &MediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("settings", &self.inner.settings)
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Camera access, as seen by a Satellite.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self, request: &CaptureRequest) -> Result<MediaStream, CaptureError>;
}

/// Capture backed by a stream the platform layer feeds with encoded frames.
///
/// Built without a stream it models a device that is missing or refused.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapture {
    device: Option<MediaStream>,
}

impl DeviceCapture {
    pub fn new(device: MediaStream) -> Self {
        DeviceCapture {
            device: Some(device),
        }
    }

    pub fn unavailable() -> Self {
        DeviceCapture { device: None }
    }
}

#[async_trait]
impl CaptureSource for DeviceCapture {
    async fn acquire(&self, request: &CaptureRequest) -> Result<MediaStream, CaptureError> {
        if !request.video {
            return Err(CaptureError::Unavailable("a video track is required".into()));
        }
        match &self.device {
            Some(stream) if !stream.is_ended() => Ok(stream.clone()),
            Some(_) => Err(CaptureError::Unavailable("camera stream has ended".into())),
            None => Err(CaptureError::Unavailable("no camera found".into())),
        }
    }
}
