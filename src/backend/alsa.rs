//! Linux ALSA open policy.

use super::{Attempts, Backend, OpenParams, OpenedStream};
use crate::audio::{DeviceSelector, ShareMode, StreamCallbacks};
use crate::error::AudioError;

const SMALL_BLOCKSIZE: u32 = 128;
const RETRY_BLOCKSIZE: u32 = 256;

/// Device names to try, in order, for a requested selector: a literal
/// `hw:`/`plughw:` name, the request as given, the `default` and
/// `sysdefault` PCMs, then the `plughw:` twin of a `hw:` request.
pub fn alsa_candidates(device: &DeviceSelector) -> Vec<DeviceSelector> {
    let mut out: Vec<DeviceSelector> = Vec::new();
    let mut push = |candidate: DeviceSelector| {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    let name = device.name();
    if name.is_some_and(|n| n.starts_with("hw:") || n.starts_with("plughw:")) {
        push(device.clone());
    }
    push(device.clone());
    push(DeviceSelector::Name("default".to_string()));
    push(DeviceSelector::Name("sysdefault".to_string()));
    if let Some(rest) = name.and_then(|n| n.strip_prefix("hw:")) {
        push(DeviceSelector::Name(format!("plughw:{rest}")));
    }
    out
}

/// Walk the candidates; each gets a preflight, an open and, when the open
/// failed at blocksize 128, one more preflight + open at 256.
pub(super) fn open(
    backend: &Backend,
    params: &OpenParams,
    callbacks: StreamCallbacks,
) -> Result<OpenedStream, AudioError> {
    let host = backend.host();
    let mut attempts = Attempts::new(backend.kind());

    for candidate in alsa_candidates(&params.device) {
        let mut request = params.request(candidate, ShareMode::Shared);
        if let Err(err) = host.check_input_settings(&request) {
            attempts.record(&request, None, &err);
            continue;
        }
        match host.open_input(&request, callbacks.clone()) {
            Ok(stream) => {
                tracing::debug!(device = %request.device, "ALSA opened");
                return Ok(backend.opened(stream, &request, None));
            }
            Err(err) => attempts.record(&request, None, &err),
        }
        if request.blocksize != SMALL_BLOCKSIZE {
            continue;
        }
        request.blocksize = RETRY_BLOCKSIZE;
        let retried = host
            .check_input_settings(&request)
            .and_then(|()| host.open_input(&request, callbacks.clone()));
        match retried {
            Ok(stream) => {
                tracing::debug!(device = %request.device, "ALSA opened with blocksize {RETRY_BLOCKSIZE}");
                return Ok(backend.opened(stream, &request, None));
            }
            Err(err) => attempts.record(&request, None, &err),
        }
    }

    Err(attempts.into_error())
}
