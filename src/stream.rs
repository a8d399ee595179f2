//! Single entry point for opening a capture stream.

use crate::audio::{AudioDeviceMode, ShareMode, StreamCallbacks};
use crate::backend::BackendRegistry;
use crate::error::AudioError;

pub use crate::backend::{OpenParams, OpenedStream};

/// Select a backend, run an advisory preflight and open through the
/// backend's retry policy.
///
/// The preflight result is only logged: the backend policies know how to
/// recover from settings the driver rejects on the first try.
pub fn open_input(
    registry: &BackendRegistry,
    params: &OpenParams,
    backend_hint: Option<&str>,
    callbacks: StreamCallbacks,
) -> Result<OpenedStream, AudioError> {
    let backend = registry.select(None, backend_hint)?;
    let host = backend.host();

    let share = match params.mode {
        AudioDeviceMode::Exclusive => ShareMode::Exclusive,
        AudioDeviceMode::Shared | AudioDeviceMode::Auto => ShareMode::Shared,
    };
    let preflight = match host.check_input_settings(&params.request(params.device.clone(), share)) {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(backend = backend.name(), "preflight check failed: {err:#}");
            false
        }
    };

    let opened = backend.open(params, callbacks)?;
    let device_name = host
        .device_info(&opened.device)
        .map(|info| info.name)
        .unwrap_or_else(|_| "unknown".to_string());
    tracing::info!(
        api = backend.name(),
        dev = %device_name,
        idx = %opened.device,
        mode = opened.mode_label(),
        sr = opened.samplerate,
        bs = opened.blocksize,
        preflight,
        "audio_open_ok"
    );
    Ok(opened)
}
