//! Output targets and their buffering policy.

use crate::errors::CameraError;
use crate::session::request::TargetId;
use crate::types::{CameraSize, FrameBuffer, PixelFormat};
use std::collections::VecDeque;

/// Preview reader depth: double buffering.
pub const PREVIEW_QUEUE_DEPTH: usize = 2;
/// Still reader depth: one JPEG at a time.
pub const STILL_QUEUE_DEPTH: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTarget {
    pub id: TargetId,
    pub size: CameraSize,
    pub format: PixelFormat,
    pub max_images: usize,
}

/// Fixed-depth frame queue that drops the oldest frame when full.
#[derive(Debug)]
pub struct ImageQueue {
    target: OutputTarget,
    frames: VecDeque<FrameBuffer>,
    last_sequence: Option<u64>,
    dropped: u64,
}

impl ImageQueue {
    fn new(target: OutputTarget) -> Self {
        Self {
            target,
            frames: VecDeque::with_capacity(target.max_images),
            last_sequence: None,
            dropped: 0,
        }
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    pub fn push(&mut self, frame: FrameBuffer) {
        if self.frames.len() >= self.target.max_images.max(1) {
            self.frames.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        self.last_sequence = Some(
            self.last_sequence
                .map_or(frame.sequence, |seq| seq.max(frame.sequence)),
        );
        self.frames.push_back(frame);
    }

    /// Take the newest frame and discard everything older.
    pub fn acquire_latest(&mut self) -> Option<FrameBuffer> {
        let latest = self.frames.pop_back();
        let skipped = self.frames.len() as u64;
        self.frames.clear();
        self.dropped = self.dropped.saturating_add(skipped);
        latest
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Highest sequence number ever pushed into this queue.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// The negotiated preview and still targets.
#[derive(Debug, Default)]
pub struct StreamConfiguration {
    preview: Option<ImageQueue>,
    still: Option<ImageQueue>,
}

impl StreamConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)create both targets. Only valid while the device is open and no
    /// capture session exists.
    pub fn configure(
        &mut self,
        photo_size: CameraSize,
        preview_size: CameraSize,
        device_open: bool,
        session_active: bool,
    ) -> Result<(), CameraError> {
        if !device_open {
            return Err(CameraError::invalid_state(
                "streams can only be configured while the device is open",
            ));
        }
        if session_active {
            return Err(CameraError::invalid_state(
                "streams cannot be reconfigured while a capture session is active",
            ));
        }
        if photo_size.is_empty() {
            return Err(CameraError::InvalidArgument(format!(
                "photo size {photo_size} is empty"
            )));
        }
        if preview_size.is_empty() {
            return Err(CameraError::InvalidArgument(format!(
                "preview size {preview_size} is empty"
            )));
        }

        self.still = Some(ImageQueue::new(OutputTarget {
            id: TargetId::StillReader,
            size: photo_size,
            format: PixelFormat::Jpeg,
            max_images: STILL_QUEUE_DEPTH,
        }));
        self.preview = Some(ImageQueue::new(OutputTarget {
            id: TargetId::PreviewReader,
            size: preview_size,
            format: PixelFormat::Yuv420,
            max_images: PREVIEW_QUEUE_DEPTH,
        }));
        log::info!(
            "Configured streams: still {} jpeg, preview {} yuv420",
            photo_size,
            preview_size
        );
        Ok(())
    }

    pub fn has_still_target(&self) -> bool {
        self.still.is_some()
    }

    pub fn photo_size(&self) -> Option<CameraSize> {
        self.still.as_ref().map(|q| q.target.size)
    }

    pub fn preview_size(&self) -> Option<CameraSize> {
        self.preview.as_ref().map(|q| q.target.size)
    }

    pub fn targets(&self) -> Vec<OutputTarget> {
        self.preview
            .iter()
            .chain(self.still.iter())
            .map(|q| q.target)
            .collect()
    }

    pub fn preview_mut(&mut self) -> Option<&mut ImageQueue> {
        self.preview.as_mut()
    }

    pub fn still_mut(&mut self) -> Option<&mut ImageQueue> {
        self.still.as_mut()
    }

    pub fn last_still_sequence(&self) -> Option<u64> {
        self.still.as_ref().and_then(ImageQueue::last_sequence)
    }

    /// Drop both targets and anything still queued in them.
    pub fn release(&mut self) {
        self.preview = None;
        self.still = None;
    }
}
