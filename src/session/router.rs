//! Frame demultiplexing and delivery.
//!
//! Preview frames are converted on a tokio task, one at a time: a frame that
//! arrives while a conversion (or its cool-down) is in flight is dropped, so
//! the hardware thread never waits on the listener. Still frames are matched
//! against the pending request and handed back with its callback so the
//! caller can invoke it outside any lock.

use crate::session::convert;
use crate::session::state_machine::{JpegCallback, PendingCaptureRequest};
use crate::session::streams::StreamConfiguration;
use crate::types::FrameBuffer;
use bytes::Bytes;
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;

pub type PreviewListener = Arc<dyn Fn(RgbImage) + Send + Sync + 'static>;

struct GateState {
    open: bool,
    listener: Option<PreviewListener>,
    delivering: usize,
}

impl GateState {
    fn ready(&self) -> bool {
        self.open && self.listener.is_some()
    }
}

thread_local! {
    static IN_LISTENER: Cell<bool> = const { Cell::new(false) };
}

/// Guards the preview listener.
///
/// The listener is cloned out under a short lock and invoked with no lock
/// held, so the hardware thread only ever reads the `ready` flag.
/// [`PreviewGate::close`] returns once every in-progress callback has
/// finished, unless it is called from inside one.
#[derive(Clone)]
pub struct PreviewGate {
    inner: Arc<(Mutex<GateState>, Condvar)>,
    ready: Arc<AtomicBool>,
}

impl Default for PreviewGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one delivery in progress; unmarks it even if the listener panics.
struct Delivery<'a> {
    gate: &'a PreviewGate,
}

impl Drop for Delivery<'_> {
    fn drop(&mut self) {
        IN_LISTENER.with(|flag| flag.set(false));
        let mut state = self.gate.lock();
        state.delivering -= 1;
        if state.delivering == 0 {
            self.gate.inner.1.notify_all();
        }
    }
}

impl PreviewGate {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(GateState {
                    open: true,
                    listener: None,
                    delivering: 0,
                }),
                Condvar::new(),
            )),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, state: &GateState) {
        self.ready.store(state.ready(), Ordering::Release);
    }

    pub fn set_listener(&self, listener: Option<PreviewListener>) {
        let mut state = self.lock();
        state.listener = listener;
        self.update(&state);
    }

    /// Lock-free: safe to poll from the hardware thread.
    pub fn has_listener(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn open(&self) {
        let mut state = self.lock();
        state.open = true;
        self.update(&state);
    }

    /// Stop deliveries, waiting for callbacks in progress to return.
    pub fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        self.update(&state);
        if IN_LISTENER.with(Cell::get) {
            log::debug!("Preview gate closed from inside the listener; not waiting");
            return;
        }
        while state.delivering > 0 {
            state = self
                .inner
                .1
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Callbacks currently running.
    pub fn in_delivery(&self) -> usize {
        self.lock().delivering
    }

    fn deliver(&self, image: RgbImage) -> bool {
        let listener = {
            let mut state = self.lock();
            if !state.open {
                return false;
            }
            let Some(listener) = state.listener.clone() else {
                return false;
            };
            state.delivering += 1;
            listener
        };
        let _delivery = Delivery { gate: self };
        IN_LISTENER.with(|flag| flag.set(true));
        listener(image);
        true
    }
}

#[derive(Debug, Default)]
struct Counters {
    previews_delivered: AtomicU64,
    previews_dropped: AtomicU64,
    conversion_failures: AtomicU64,
    stills_delivered: AtomicU64,
    stale_stills: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub previews_delivered: u64,
    pub previews_dropped: u64,
    pub conversion_failures: u64,
    pub stills_delivered: u64,
    pub stale_stills: u64,
}

pub struct FrameRouter {
    runtime: Handle,
    gate: PreviewGate,
    in_flight: Arc<AtomicBool>,
    cooldown: Duration,
    rotation: u32,
    counters: Arc<Counters>,
}

impl FrameRouter {
    pub fn new(runtime: Handle, gate: PreviewGate, cooldown: Duration) -> Self {
        Self {
            runtime,
            gate,
            in_flight: Arc::new(AtomicBool::new(false)),
            cooldown,
            rotation: 0,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn set_rotation(&mut self, degrees: u32) {
        self.rotation = degrees;
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    /// A conversion or its cool-down is still running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn wants_preview(&self) -> bool {
        self.gate.has_listener()
    }

    /// Hand a preview frame to the listener. Returns `false` if the frame was
    /// dropped.
    pub fn on_preview_frame(&self, frame: FrameBuffer) -> bool {
        if !self.gate.has_listener() {
            return false;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.previews_dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("Preview frame {} dropped: delivery in flight", frame.sequence);
            return false;
        }

        let gate = self.gate.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let cooldown = self.cooldown;
        let rotation = self.rotation;
        self.runtime.spawn(async move {
            match convert::yuv420_to_rgb(&frame) {
                Ok(rgb) => {
                    if gate.deliver(convert::rotate(rgb, rotation)) {
                        counters.previews_delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    counters.conversion_failures.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Skipping preview frame {}: {}", frame.sequence, e);
                }
            }
            tokio::time::sleep(cooldown).await;
            in_flight.store(false, Ordering::Release);
        });
        true
    }

    /// Queue a still frame on the still target and try to deliver it.
    pub fn on_still_frame(
        &self,
        frame: FrameBuffer,
        streams: &mut StreamConfiguration,
        pending: &mut Option<PendingCaptureRequest>,
    ) -> Option<(JpegCallback, Bytes)> {
        match streams.still_mut() {
            Some(queue) => queue.push(frame),
            None => {
                log::debug!("Still frame {} without a still target", frame.sequence);
                return None;
            }
        }
        self.take_still(streams, pending)
    }

    /// Match the newest still frame against `pending`.
    ///
    /// On success the pending request is consumed and its callback returned
    /// together with the JPEG bytes. Frames predating the request are
    /// discarded; with no pending request the frame stays queued.
    pub fn take_still(
        &self,
        streams: &mut StreamConfiguration,
        pending: &mut Option<PendingCaptureRequest>,
    ) -> Option<(JpegCallback, Bytes)> {
        let request = pending.as_ref()?;
        let queue = streams.still_mut()?;
        let frame = queue.acquire_latest()?;

        if !request.accepts(frame.sequence) {
            self.counters.stale_stills.fetch_add(1, Ordering::Relaxed);
            log::debug!("Discarding stale still frame {}", frame.sequence);
            return None;
        }
        let jpeg = match convert::extract_jpeg(&frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::debug!("Skipping still frame {}: {}", frame.sequence, e);
                return None;
            }
        };

        let mut request = pending.take()?;
        let callback = request.take_callback()?;
        self.counters.stills_delivered.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Delivering {} byte JPEG for capture {} after {:?}",
            jpeg.len(),
            request.id,
            request.requested_at.elapsed()
        );
        Some((callback, jpeg))
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            previews_delivered: c.previews_delivered.load(Ordering::Relaxed),
            previews_dropped: c.previews_dropped.load(Ordering::Relaxed),
            conversion_failures: c.conversion_failures.load(Ordering::Relaxed),
            stills_delivered: c.stills_delivered.load(Ordering::Relaxed),
            stale_stills: c.stale_stills.load(Ordering::Relaxed),
        }
    }
}
