//! Windows WASAPI open policy.

use super::{Attempts, Backend, OpenParams, OpenedStream};
use crate::audio::{AudioDeviceMode, ShareMode, StreamCallbacks};
use crate::error::AudioError;

/// Blocksize that shared-mode engines commonly reject in favour of 256.
const SMALL_BLOCKSIZE: u32 = 128;
const RETRY_BLOCKSIZE: u32 = 256;

/// Exclusive first (unless the caller asked for shared), then shared at the
/// device's mix rate, retrying once with a larger block.
pub(super) fn open(
    backend: &Backend,
    params: &OpenParams,
    callbacks: StreamCallbacks,
) -> Result<OpenedStream, AudioError> {
    let host = backend.host();
    let mut attempts = Attempts::new(backend.kind());

    if params.mode != AudioDeviceMode::Shared {
        let request = params.request(params.device.clone(), ShareMode::Exclusive);
        let opened = host
            .check_input_settings(&request)
            .and_then(|()| host.open_input(&request, callbacks.clone()));
        match opened {
            Ok(stream) => {
                tracing::debug!(device = %request.device, "WASAPI exclusive mode opened");
                return Ok(backend.opened(stream, &request, Some(ShareMode::Exclusive)));
            }
            Err(err) => attempts.record(&request, Some(ShareMode::Exclusive), &err),
        }
    }
    if params.mode == AudioDeviceMode::Exclusive {
        return Err(attempts.into_error());
    }

    let mut request = params.request(params.device.clone(), ShareMode::Shared);
    match host.device_info(&params.device) {
        Ok(info) if info.default_samplerate > 0 && info.default_samplerate != request.samplerate => {
            tracing::debug!(
                requested = request.samplerate,
                mix_rate = info.default_samplerate,
                "adjusting samplerate to the shared-mode mix rate"
            );
            request.samplerate = info.default_samplerate;
        }
        Ok(_) => {}
        Err(err) => tracing::debug!("could not read device mix rate: {err:#}"),
    }

    // Shared-mode preflight is advisory; the engine may still accept the open.
    if let Err(err) = host.check_input_settings(&request) {
        tracing::debug!("WASAPI shared preflight failed: {err:#}");
    }
    match host.open_input(&request, callbacks.clone()) {
        Ok(stream) => return Ok(backend.opened(stream, &request, Some(ShareMode::Shared))),
        Err(err) => attempts.record(&request, Some(ShareMode::Shared), &err),
    }

    if request.blocksize == SMALL_BLOCKSIZE {
        request.blocksize = RETRY_BLOCKSIZE;
        tracing::debug!("retrying WASAPI shared with blocksize {RETRY_BLOCKSIZE}");
        if let Err(err) = host.check_input_settings(&request) {
            tracing::debug!("WASAPI shared preflight failed: {err:#}");
        }
        match host.open_input(&request, callbacks) {
            Ok(stream) => return Ok(backend.opened(stream, &request, Some(ShareMode::Shared))),
            Err(err) => attempts.record(&request, Some(ShareMode::Shared), &err),
        }
    }

    Err(attempts.into_error())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioHost, DeviceSelector, SimFailure, SimHost};
    use crate::backend::BackendKind;
    use std::sync::Arc;

    fn backend_with(host: Arc<SimHost>) -> Backend {
        Backend::new(BackendKind::Wasapi, host as Arc<dyn AudioHost>)
    }

    fn params(mode: AudioDeviceMode, blocksize: u32) -> OpenParams {
        OpenParams::new(DeviceSelector::Default, 44_100, blocksize, mode)
    }

    fn mic() -> SimHost {
        SimHost::new("Windows WASAPI").with_device("Mic", 2, 48_000)
    }

    #[test]
    fn auto_mode_opens_exclusive_when_available() {
        let host = Arc::new(mic());
        let opened = backend_with(host.clone())
            .open(&params(AudioDeviceMode::Auto, 256), StreamCallbacks::discard())
            .unwrap();
        assert_eq!(opened.share, Some(ShareMode::Exclusive));
        assert_eq!(opened.mode_label(), "exclusive");
        assert_eq!(opened.samplerate, 44_100);
        assert_eq!(host.opens(), 1);
    }

    #[test]
    fn falls_back_to_shared_at_mix_rate() {
        let host = Arc::new(mic().with_strict_shared_rate());
        host.fail(SimFailure::new("device busy").share(ShareMode::Exclusive));
        let opened = backend_with(host.clone())
            .open(&params(AudioDeviceMode::Auto, 256), StreamCallbacks::discard())
            .unwrap();
        assert_eq!(opened.share, Some(ShareMode::Shared));
        assert_eq!(opened.samplerate, 48_000);
        // The exclusive preflight failed, so only the shared open touched the device.
        assert_eq!(host.opens(), 1);
    }

    #[test]
    fn shared_mode_never_tries_exclusive() {
        let host = Arc::new(mic());
        let opened = backend_with(host.clone())
            .open(&params(AudioDeviceMode::Shared, 256), StreamCallbacks::discard())
            .unwrap();
        assert_eq!(opened.share, Some(ShareMode::Shared));
        assert!(host
            .open_log()
            .iter()
            .all(|request| request.share == ShareMode::Shared));
    }

    #[test]
    fn exclusive_mode_does_not_fall_back() {
        let host = Arc::new(mic());
        host.fail(SimFailure::new("device in use").share(ShareMode::Exclusive));
        let err = backend_with(host.clone())
            .open(&params(AudioDeviceMode::Exclusive, 256), StreamCallbacks::discard())
            .unwrap_err();
        match err {
            AudioError::OpenFailed { backend, attempts } => {
                assert_eq!(backend, "WASAPI");
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].mode, "exclusive");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(host.opens(), 0);
    }

    #[test]
    fn shared_retries_with_larger_block() {
        let host = Arc::new(mic());
        host.fail(SimFailure::new("device busy").share(ShareMode::Exclusive));
        host.fail(SimFailure::new("buffer size rejected").blocksize(128).open_only());
        let opened = backend_with(host.clone())
            .open(&params(AudioDeviceMode::Auto, 128), StreamCallbacks::discard())
            .unwrap();
        assert_eq!(opened.blocksize, 256);
        assert_eq!(opened.share, Some(ShareMode::Shared));
        let sizes: Vec<u32> = host.open_log().iter().map(|r| r.blocksize).collect();
        assert_eq!(sizes, vec![128, 256]);
    }

    #[test]
    fn aggregated_error_lists_every_attempt() {
        let host = Arc::new(mic());
        host.fail(SimFailure::new("access denied"));
        let err = backend_with(host)
            .open(&params(AudioDeviceMode::Auto, 128), StreamCallbacks::discard())
            .unwrap_err();
        let AudioError::OpenFailed { attempts, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        let summary: Vec<(String, u32)> = attempts
            .iter()
            .map(|a| (a.mode.clone(), a.blocksize))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("exclusive".to_string(), 128),
                ("shared".to_string(), 128),
                ("shared".to_string(), 256),
            ]
        );
        assert!(err.to_string().starts_with("WASAPI open failed; tried"));
    }
}
