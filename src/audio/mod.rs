//! Audio capture plumbing shared by every backend.
//!
//! Defines device identifiers, the [`AudioHost`] seam the backend open
//! policies drive, the CPAL-backed production host and the scripted
//! [`SimHost`]. Blocks reaching the detector are always mono f32.

/// Channel count requested from every device; multi-channel input is
/// averaged per frame when a device refuses mono.
pub const CAPTURE_CHANNELS: u16 = 1;

mod cpal_host;
mod device;
mod dispatch;
mod host;
pub mod sim;

pub use cpal_host::CpalHost;
pub use device::{AudioDeviceMode, DeviceSelector, HostApiInfo, InputDeviceInfo, ShareMode};
pub use host::{AudioHost, InputStream, StreamCallbacks, StreamGuard, StreamRequest};
pub use sim::{SimFailure, SimHost, SimSignal, SwitchWaveform};
