//! Device identifiers and capture modes.

use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Identifies an input device: the system default, an index into the
/// host's input-device list, or a platform device name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelector {
    Default,
    Index(usize),
    Name(String),
}

impl DeviceSelector {
    pub fn name(&self) -> Option<&str> {
        match self {
            DeviceSelector::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, DeviceSelector::Default)
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Default => f.write_str("default"),
            DeviceSelector::Index(index) => write!(f, "#{index}"),
            DeviceSelector::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    /// Empty input means the system default; bare digits are an index;
    /// anything else is a device name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(DeviceSelector::Default);
        }
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = digits.parse() {
                return Ok(DeviceSelector::Index(index));
            }
        }
        Ok(DeviceSelector::Name(trimmed.to_string()))
    }
}

/// Requested access mode for a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AudioDeviceMode {
    Exclusive,
    Shared,
    Auto,
}

impl AudioDeviceMode {
    pub fn label(self) -> &'static str {
        match self {
            AudioDeviceMode::Exclusive => "exclusive",
            AudioDeviceMode::Shared => "shared",
            AudioDeviceMode::Auto => "auto",
        }
    }

    /// Modes to try for a preferred device, starting with `self`.
    pub fn fallback_order(self) -> [AudioDeviceMode; 3] {
        match self {
            AudioDeviceMode::Exclusive => [
                AudioDeviceMode::Exclusive,
                AudioDeviceMode::Shared,
                AudioDeviceMode::Auto,
            ],
            AudioDeviceMode::Shared => [
                AudioDeviceMode::Shared,
                AudioDeviceMode::Auto,
                AudioDeviceMode::Exclusive,
            ],
            AudioDeviceMode::Auto => [
                AudioDeviceMode::Auto,
                AudioDeviceMode::Shared,
                AudioDeviceMode::Exclusive,
            ],
        }
    }
}

impl fmt::Display for AudioDeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sharing mode passed down to the driver for a single open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMode {
    Exclusive,
    Shared,
}

impl ShareMode {
    pub fn label(self) -> &'static str {
        match self {
            ShareMode::Exclusive => "exclusive",
            ShareMode::Shared => "shared",
        }
    }
}

/// Host API identity, matched by backends to decide whether they apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostApiInfo {
    pub name: String,
}

impl HostApiInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One enumerated input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub hostapi: String,
    pub max_input_channels: u16,
    pub default_samplerate: u32,
}
