//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use crate::audio::{AudioDeviceMode, DeviceSelector};
use crate::detection::{refractory_samples, DetectorParams};
use crate::error::DetectorError;
use clap::Parser;
use std::time::Duration;

pub use defaults::{
    DEFAULT_BLOCKSIZE, DEFAULT_DEBOUNCE_MS, DEFAULT_LOG_LEVEL, DEFAULT_LOWER_OFFSET,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SAMPLERATE, DEFAULT_UPPER_OFFSET, MAX_BLOCKSIZE,
    MAX_DEBOUNCE_MS, MAX_SAMPLERATE, MIN_BLOCKSIZE, MIN_DEBOUNCE_MS, MIN_SAMPLERATE,
};

/// CLI options for `switch-listen`. Every listener setting can also come from
/// a `SWITCH_*` environment variable.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "switch-listen",
    about = "Listen for accessibility-switch presses on an audio input",
    author,
    version
)]
pub struct AppConfig {
    /// Capture sample rate (Hz)
    #[arg(long, env = "SWITCH_SAMPLERATE", default_value_t = DEFAULT_SAMPLERATE)]
    pub samplerate: u32,

    /// Samples per audio block
    #[arg(long, env = "SWITCH_BLOCKSIZE", default_value_t = DEFAULT_BLOCKSIZE)]
    pub blocksize: u32,

    /// Minimum time between two presses (milliseconds)
    #[arg(long = "debounce-ms", env = "SWITCH_DEBOUNCE_MS", default_value_t = DEFAULT_DEBOUNCE_MS)]
    pub debounce_ms: u64,

    /// Upper threshold, relative to the tracked bias
    #[arg(
        long = "upper-offset",
        env = "SWITCH_UPPER_OFFSET",
        allow_negative_numbers = true,
        default_value_t = DEFAULT_UPPER_OFFSET
    )]
    pub upper_offset: f32,

    /// Lower threshold, relative to the tracked bias
    #[arg(
        long = "lower-offset",
        env = "SWITCH_LOWER_OFFSET",
        allow_negative_numbers = true,
        default_value_t = DEFAULT_LOWER_OFFSET
    )]
    pub lower_offset: f32,

    /// Input device: index, name, or empty for the system default
    #[arg(long, env = "SWITCH_DEVICE")]
    pub device: Option<String>,

    /// Device access mode
    #[arg(
        long = "device-mode",
        env = "SWITCH_DEVICE_MODE",
        value_enum,
        default_value_t = AudioDeviceMode::Auto
    )]
    pub device_mode: AudioDeviceMode,

    /// Preferred audio backend (wasapi, alsa, coreaudio)
    #[arg(long, env = "SWITCH_BACKEND")]
    pub backend: Option<String>,

    /// Upper bound for a single device probe (milliseconds)
    #[arg(
        long = "probe-timeout-ms",
        env = "SWITCH_PROBE_TIMEOUT_MS",
        default_value_t = DEFAULT_PROBE_TIMEOUT_MS
    )]
    pub probe_timeout_ms: u64,

    /// Enable JSON trace logging to a file
    #[arg(long = "logs", env = "SWITCH_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable file logging (overrides --logs)
    #[arg(long = "no-logs", env = "SWITCH_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Console log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", env = "SWITCH_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Print the audio backends available on this machine and exit
    #[arg(long = "list-backends", default_value_t = false)]
    pub list_backends: bool,

    /// Probe the configured device, suggest an alternative if it fails, and exit
    #[arg(long = "check-device", default_value_t = false)]
    pub check_device: bool,

    /// Run against a simulated switch producing N presses instead of hardware
    #[arg(long, value_name = "PRESSES")]
    pub simulate: Option<usize>,

    /// Stop listening after this many seconds (0 = until Enter or end of input)
    #[arg(long, default_value_t = 0)]
    pub seconds: u64,

    /// Emit one JSON object per line instead of plain text
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl AppConfig {
    pub fn device_selector(&self) -> DeviceSelector {
        match self.device.as_deref() {
            Some(device) => device
                .parse()
                .unwrap_or_else(|never: std::convert::Infallible| match never {}),
            None => DeviceSelector::Default,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Settings for one listening session.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub samplerate: u32,
    pub blocksize: u32,
    pub debounce_ms: u64,
    pub upper_offset: f32,
    pub lower_offset: f32,
    pub device: DeviceSelector,
    pub mode: AudioDeviceMode,
    pub backend: Option<String>,
    pub probe_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            samplerate: DEFAULT_SAMPLERATE,
            blocksize: DEFAULT_BLOCKSIZE,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            upper_offset: DEFAULT_UPPER_OFFSET,
            lower_offset: DEFAULT_LOWER_OFFSET,
            device: DeviceSelector::Default,
            mode: AudioDeviceMode::Auto,
            backend: None,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

impl ListenerConfig {
    /// Debounce window in samples at the configured rate.
    pub fn refractory_samples(&self) -> usize {
        refractory_samples(self.debounce_ms, self.samplerate)
    }

    pub fn detector_params(&self) -> Result<DetectorParams, DetectorError> {
        DetectorParams::new(
            self.upper_offset,
            self.lower_offset,
            self.refractory_samples(),
        )
    }
}

impl From<&AppConfig> for ListenerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            samplerate: config.samplerate,
            blocksize: config.blocksize,
            debounce_ms: config.debounce_ms,
            upper_offset: config.upper_offset,
            lower_offset: config.lower_offset,
            device: config.device_selector(),
            mode: config.device_mode,
            backend: config.backend.clone(),
            probe_timeout: config.probe_timeout(),
        }
    }
}
