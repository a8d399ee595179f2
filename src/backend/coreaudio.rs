//! macOS Core Audio open policy.

use super::{Attempts, Backend, OpenParams, OpenedStream};
use crate::audio::{ShareMode, StreamCallbacks};
use crate::error::AudioError;

const SMALL_BLOCKSIZE: u32 = 128;
const RETRY_BLOCKSIZE: u32 = 256;

/// Strict preflight (one retry at blocksize 256 when 128 is refused), then a
/// single open.
pub(super) fn open(
    backend: &Backend,
    params: &OpenParams,
    callbacks: StreamCallbacks,
) -> Result<OpenedStream, AudioError> {
    let host = backend.host();
    let mut attempts = Attempts::new(backend.kind());
    let mut request = params.request(params.device.clone(), ShareMode::Shared);

    if let Err(err) = host.check_input_settings(&request) {
        attempts.record(&request, None, &err);
        if request.blocksize != SMALL_BLOCKSIZE {
            return Err(attempts.into_error());
        }
        request.blocksize = RETRY_BLOCKSIZE;
        tracing::debug!("CoreAudio preflight failed at bs={SMALL_BLOCKSIZE}, trying bs={RETRY_BLOCKSIZE}");
        if let Err(err) = host.check_input_settings(&request) {
            attempts.record(&request, None, &err);
            return Err(attempts.into_error());
        }
    }

    match host.open_input(&request, callbacks) {
        Ok(stream) => Ok(backend.opened(stream, &request, None)),
        Err(err) => {
            attempts.record(&request, None, &err);
            Err(attempts.into_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDeviceMode, AudioHost, DeviceSelector, SimFailure, SimHost};
    use crate::backend::BackendKind;
    use std::sync::Arc;

    fn open_on(host: &Arc<SimHost>, blocksize: u32) -> Result<OpenedStream, AudioError> {
        let backend = Backend::new(BackendKind::CoreAudio, Arc::clone(host) as Arc<dyn AudioHost>);
        let params = OpenParams::new(DeviceSelector::Default, 44_100, blocksize, AudioDeviceMode::Auto);
        backend.open(&params, StreamCallbacks::discard())
    }

    fn built_in() -> Arc<SimHost> {
        Arc::new(SimHost::new("Core Audio").with_device("MacBook Pro Microphone", 1, 48_000))
    }

    #[test]
    fn opens_after_clean_preflight() {
        let host = built_in();
        let opened = open_on(&host, 256).unwrap();
        assert_eq!(opened.blocksize, 256);
        assert_eq!(opened.mode_label(), "n/a");
        assert_eq!((host.checks(), host.opens()), (1, 1));
    }

    #[test]
    fn preflight_retries_once_at_larger_block() {
        let host = built_in();
        host.fail(SimFailure::new("buffer size 128 not supported").blocksize(128));
        let opened = open_on(&host, 128).unwrap();
        assert_eq!(opened.blocksize, 256);
        assert_eq!((host.checks(), host.opens()), (2, 1));
    }

    #[test]
    fn preflight_failure_at_other_blocksizes_is_final() {
        let host = built_in();
        host.fail(SimFailure::new("invalid sample rate").check_only());
        let err = open_on(&host, 512).unwrap_err();
        assert!(matches!(&err, AudioError::OpenFailed { attempts, .. } if attempts.len() == 1));
        assert_eq!(host.opens(), 0);
    }

    #[test]
    fn open_failure_is_reported_with_settings() {
        let host = built_in();
        host.fail(SimFailure::new("hardware error").open_only());
        let err = open_on(&host, 256).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CoreAudio open failed"), "{message}");
        assert!(message.contains("sr=44100 bs=256"), "{message}");
        assert!(message.contains("hardware error"), "{message}");
    }
}
