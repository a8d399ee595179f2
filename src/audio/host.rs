//! The seam between backend open policies and a concrete audio host.
//!
//! Backends only ever talk to an [`AudioHost`]: the cpal-backed host in
//! production and the scripted [`super::sim::SimHost`] in tests and the
//! `--simulate` mode.

use super::device::{DeviceSelector, HostApiInfo, InputDeviceInfo, ShareMode};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

/// Everything the driver needs to open one input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub device: DeviceSelector,
    pub samplerate: u32,
    pub blocksize: u32,
    pub channels: u16,
    pub share: ShareMode,
}

impl fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device={} sr={} bs={} ch={} mode={}",
            self.device,
            self.samplerate,
            self.blocksize,
            self.channels,
            self.share.label()
        )
    }
}

type BlockFn = dyn Fn(&[f32]) + Send + Sync;
type FaultFn = dyn Fn(String) + Send + Sync;

/// Callbacks invoked from the driver's real-time thread.
///
/// `on_block` receives mono samples (multi-channel input is averaged per
/// frame) and must not block. `on_fault` reports a stream that died after it
/// was started.
#[derive(Clone)]
pub struct StreamCallbacks {
    on_block: Arc<BlockFn>,
    on_fault: Arc<FaultFn>,
}

impl StreamCallbacks {
    pub fn new<B, F>(on_block: B, on_fault: F) -> Self
    where
        B: Fn(&[f32]) + Send + Sync + 'static,
        F: Fn(String) + Send + Sync + 'static,
    {
        Self {
            on_block: Arc::new(on_block),
            on_fault: Arc::new(on_fault),
        }
    }

    /// Callbacks that discard everything, used for device probes.
    pub fn discard() -> Self {
        Self::new(|_| {}, |_| {})
    }

    pub fn block(&self, samples: &[f32]) {
        (self.on_block)(samples);
    }

    pub fn fault(&self, reason: String) {
        (self.on_fault)(reason);
    }
}

impl fmt::Debug for StreamCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCallbacks").finish_non_exhaustive()
    }
}

/// A started input stream. Dropping it closes the stream.
pub trait InputStream {
    fn stop(&mut self) -> Result<()>;
}

/// Stops and closes the wrapped stream exactly once, on whichever exit path
/// runs first.
pub struct StreamGuard {
    stream: Option<Box<dyn InputStream>>,
    label: String,
}

impl StreamGuard {
    pub fn new(stream: Box<dyn InputStream>, label: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.stop() {
                tracing::debug!(stream = %self.label, "failed to stop audio stream: {err:#}");
            }
            drop(stream);
            tracing::debug!(stream = %self.label, "audio stream closed");
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for StreamGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamGuard")
            .field("label", &self.label)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

/// Operations the open policies need from a platform audio host.
pub trait AudioHost: Send + Sync {
    fn hostapi(&self) -> HostApiInfo;

    fn input_devices(&self) -> Result<Vec<InputDeviceInfo>>;

    fn default_input_device(&self) -> Option<InputDeviceInfo>;

    fn device_info(&self, device: &DeviceSelector) -> Result<InputDeviceInfo>;

    /// Validate a request without opening anything.
    fn check_input_settings(&self, request: &StreamRequest) -> Result<()>;

    /// Open and start a stream for `request`.
    fn open_input(
        &self,
        request: &StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Box<dyn InputStream>>;
}
