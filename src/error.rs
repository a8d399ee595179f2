//! Error types shared by the capture layer and the edge detector.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::audio::{AudioDeviceMode, DeviceSelector};

/// One failed attempt at opening or probing a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAttempt {
    pub device: String,
    pub mode: String,
    pub samplerate: u32,
    pub blocksize: u32,
    pub error: String,
}

impl fmt::Display for OpenAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} sr={} bs={}]: {}",
            self.device, self.mode, self.samplerate, self.blocksize, self.error
        )
    }
}

/// One failed `(device, mode)` probe while resolving a working device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeFailure {
    pub device: DeviceSelector,
    pub mode: AudioDeviceMode,
    pub reason: String,
}

fn join_attempts<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "nothing attempted".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_probes(items: &[ProbeFailure]) -> String {
    if items.is_empty() {
        return "no candidate devices".to_string();
    }
    items
        .iter()
        .map(|p| format!("{} ({}): {}", p.device, p.mode, p.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures surfaced by backend selection, stream opening and sessions.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio backends available")]
    NoBackends,

    #[error("{backend} open failed; tried {}", join_attempts(.attempts))]
    OpenFailed {
        backend: &'static str,
        attempts: Vec<OpenAttempt>,
    },

    #[error("no working audio input devices found; tried {}", join_probes(.attempts))]
    NoWorkingDevice { attempts: Vec<ProbeFailure> },

    #[error("audio stream on {device} failed: {reason}")]
    StreamLost { device: String, reason: String },

    #[error("{message}")]
    Device {
        message: String,
        device: Option<DeviceSelector>,
        kind: DeviceErrorKind,
        hint: &'static str,
    },
}

impl AudioError {
    /// Wrap a raw driver message, classifying it so callers can offer a hint.
    pub fn device(message: impl Into<String>, device: Option<DeviceSelector>) -> Self {
        let message = message.into();
        let kind = DeviceErrorKind::categorize(&message);
        AudioError::Device {
            message,
            device,
            kind,
            hint: kind.recovery_hint(),
        }
    }

    /// Category of the underlying driver failure. For aggregated open
    /// failures the last attempt decides, since earlier ones were retried.
    pub fn kind(&self) -> DeviceErrorKind {
        match self {
            AudioError::OpenFailed { attempts, .. } => attempts
                .last()
                .map(|attempt| DeviceErrorKind::categorize(&attempt.error))
                .unwrap_or(DeviceErrorKind::General),
            AudioError::Device { kind, .. } => *kind,
            AudioError::NoWorkingDevice { attempts } => attempts
                .last()
                .map(|probe| DeviceErrorKind::categorize(&probe.reason))
                .unwrap_or(DeviceErrorKind::NotFound),
            AudioError::NoBackends => DeviceErrorKind::NotFound,
            AudioError::StreamLost { reason, .. } => DeviceErrorKind::categorize(reason),
        }
    }
}

/// Coarse classification of driver error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceErrorKind {
    Access,
    Format,
    NotFound,
    Hardware,
    General,
}

impl DeviceErrorKind {
    pub fn categorize(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if has(&["access denied", "permission", "being used", "busy", "exclusive"]) {
            DeviceErrorKind::Access
        } else if has(&["format", "sample rate", "samplerate", "channels", "buffer size"]) {
            DeviceErrorKind::Format
        } else if has(&["no such device", "not found", "not available", "no longer available"]) {
            DeviceErrorKind::NotFound
        } else if has(&["hardware", "driver"]) {
            DeviceErrorKind::Hardware
        } else {
            DeviceErrorKind::General
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DeviceErrorKind::Access => "access",
            DeviceErrorKind::Format => "format",
            DeviceErrorKind::NotFound => "not_found",
            DeviceErrorKind::Hardware => "hardware",
            DeviceErrorKind::General => "general",
        }
    }

    pub fn recovery_hint(self) -> &'static str {
        match self {
            DeviceErrorKind::Access => {
                "Close other applications using the device or switch to shared mode."
            }
            DeviceErrorKind::Format => {
                "Try a different sample rate or block size supported by the device."
            }
            DeviceErrorKind::NotFound => {
                "Check the switch cable is plugged in and pick another input device."
            }
            DeviceErrorKind::Hardware => "Reconnect the audio interface or reinstall its driver.",
            DeviceErrorKind::General => "Retry, or select a different input device.",
        }
    }
}

/// Input-validation failures from the edge detector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectorError {
    #[error("audio block must contain at least one sample")]
    EmptyBlock,

    #[error(
        "threshold offsets must satisfy lower < upper < 0 (got upper={upper}, lower={lower})"
    )]
    InvalidOffsets { upper: f32, lower: f32 },
}

/// Why a listening session ended without a report.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error(transparent)]
    Detector(#[from] DetectorError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("listener thread panicked")]
    Panicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_driver_messages() {
        assert_eq!(
            DeviceErrorKind::categorize("Device is being used by another application"),
            DeviceErrorKind::Access
        );
        assert_eq!(
            DeviceErrorKind::categorize("Invalid sample rate 12345"),
            DeviceErrorKind::Format
        );
        assert_eq!(
            DeviceErrorKind::categorize("input device 'X' not found"),
            DeviceErrorKind::NotFound
        );
        assert_eq!(
            DeviceErrorKind::categorize("driver crashed"),
            DeviceErrorKind::Hardware
        );
        assert_eq!(
            DeviceErrorKind::categorize("something odd"),
            DeviceErrorKind::General
        );
    }

    #[test]
    fn open_failed_lists_every_attempt() {
        let err = AudioError::OpenFailed {
            backend: "ALSA",
            attempts: vec![
                OpenAttempt {
                    device: "hw:1".into(),
                    mode: "n/a".into(),
                    samplerate: 44_100,
                    blocksize: 128,
                    error: "busy".into(),
                },
                OpenAttempt {
                    device: "default".into(),
                    mode: "n/a".into(),
                    samplerate: 44_100,
                    blocksize: 256,
                    error: "gone".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("ALSA open failed"));
        assert!(text.contains("hw:1 [n/a sr=44100 bs=128]: busy"));
        assert!(text.contains("default [n/a sr=44100 bs=256]: gone"));
        assert_eq!(err.kind(), DeviceErrorKind::General);
    }

    #[test]
    fn aggregated_kind_follows_last_attempt() {
        let attempt = |mode: &str, error: &str| OpenAttempt {
            device: "default".into(),
            mode: mode.into(),
            samplerate: 48_000,
            blocksize: 256,
            error: error.into(),
        };
        let err = AudioError::OpenFailed {
            backend: "WASAPI",
            attempts: vec![
                attempt("exclusive", "exclusive mode not allowed"),
                attempt("shared", "no such device"),
            ],
        };
        assert_eq!(err.kind(), DeviceErrorKind::NotFound);
        assert_eq!(AudioError::NoBackends.kind(), DeviceErrorKind::NotFound);
    }

    #[test]
    fn device_error_carries_hint() {
        let err = AudioError::device("permission denied", Some(DeviceSelector::Index(2)));
        match err {
            AudioError::Device { kind, hint, .. } => {
                assert_eq!(kind, DeviceErrorKind::Access);
                assert!(hint.contains("shared mode"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
