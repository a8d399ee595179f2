use super::defaults::{
    LOG_LEVELS, MAX_DEVICE_NAME_BYTES, MAX_LISTEN_SECONDS, MAX_PROBE_TIMEOUT_MS,
    MAX_SIMULATED_PRESSES, MIN_PROBE_TIMEOUT_MS,
};
use super::{
    AppConfig, MAX_BLOCKSIZE, MAX_DEBOUNCE_MS, MAX_SAMPLERATE, MIN_BLOCKSIZE, MIN_DEBOUNCE_MS,
    MIN_SAMPLERATE,
};
use crate::backend::BackendKind;
use anyhow::{bail, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize free-form strings.
    pub fn validate(&mut self) -> Result<()> {
        if !(MIN_SAMPLERATE..=MAX_SAMPLERATE).contains(&self.samplerate) {
            bail!(
                "--samplerate must be between {MIN_SAMPLERATE} and {MAX_SAMPLERATE} Hz, got {}",
                self.samplerate
            );
        }
        if !(MIN_BLOCKSIZE..=MAX_BLOCKSIZE).contains(&self.blocksize) {
            bail!(
                "--blocksize must be between {MIN_BLOCKSIZE} and {MAX_BLOCKSIZE}, got {}",
                self.blocksize
            );
        }
        if !(MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&self.debounce_ms) {
            bail!(
                "--debounce-ms must be between {MIN_DEBOUNCE_MS} and {MAX_DEBOUNCE_MS} ms, got {}",
                self.debounce_ms
            );
        }
        if !self.upper_offset.is_finite() || !self.lower_offset.is_finite() {
            bail!("--upper-offset and --lower-offset must be finite numbers");
        }
        if !(self.lower_offset < self.upper_offset && self.upper_offset < 0.0) {
            bail!(
                "offsets must satisfy lower < upper < 0, got upper {} and lower {}",
                self.upper_offset,
                self.lower_offset
            );
        }
        if !(MIN_PROBE_TIMEOUT_MS..=MAX_PROBE_TIMEOUT_MS).contains(&self.probe_timeout_ms) {
            bail!(
                "--probe-timeout-ms must be between {MIN_PROBE_TIMEOUT_MS} and {MAX_PROBE_TIMEOUT_MS} ms, got {}",
                self.probe_timeout_ms
            );
        }
        if self.seconds > MAX_LISTEN_SECONDS {
            bail!("--seconds must be at most {MAX_LISTEN_SECONDS}, got {}", self.seconds);
        }
        if let Some(presses) = self.simulate {
            if !(1..=MAX_SIMULATED_PRESSES).contains(&presses) {
                bail!("--simulate must be between 1 and {MAX_SIMULATED_PRESSES} presses, got {presses}");
            }
        }

        if let Some(device) = self.device.as_mut() {
            let trimmed = device.trim();
            if trimmed.len() > MAX_DEVICE_NAME_BYTES || trimmed.chars().any(char::is_control) {
                bail!("--device must be <={MAX_DEVICE_NAME_BYTES} bytes with no control characters");
            }
            *device = trimmed.to_string();
        }
        if self.device.as_deref() == Some("") {
            self.device = None;
        }

        if let Some(backend) = self.backend.as_mut() {
            let wanted = backend.trim().to_lowercase();
            if !wanted.is_empty()
                && !BackendKind::ALL
                    .iter()
                    .any(|kind| kind.name().to_lowercase().contains(&wanted))
            {
                let known: Vec<&str> = BackendKind::ALL.iter().map(|kind| kind.name()).collect();
                bail!("--backend '{backend}' is not one of {}", known.join(", "));
            }
            *backend = wanted;
        }
        if self.backend.as_deref() == Some("") {
            self.backend = None;
        }

        let level = self.log_level.trim().to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "--log-level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            );
        }
        self.log_level = level;

        Ok(())
    }
}
