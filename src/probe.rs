//! Advisory device checks for calibration screens. They never fail: a device
//! that will not open is reported with a reason and, on request, the
//! device/mode pair that would open instead.

use crate::audio::{AudioDeviceMode, DeviceSelector};
use crate::device_manager::{DeviceManager, WorkingDevice};
use crate::error::DeviceErrorKind;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceCheck {
    pub device: DeviceSelector,
    pub mode: AudioDeviceMode,
    pub ok: bool,
    pub reason: Option<String>,
    pub kind: Option<DeviceErrorKind>,
    pub hint: Option<&'static str>,
    pub alternative: Option<WorkingDevice>,
}

/// Whether `device` opens in `mode` with these settings.
pub fn check_device(
    manager: &DeviceManager,
    device: &DeviceSelector,
    samplerate: u32,
    blocksize: u32,
    mode: AudioDeviceMode,
) -> DeviceCheck {
    let result = manager.test_device(device, samplerate, blocksize, mode);
    tracing::info!(%device, mode = mode.label(), ok = result.ok, cached = result.cached, "device check");
    DeviceCheck {
        device: device.clone(),
        mode,
        ok: result.ok,
        hint: result.hint(),
        reason: result.reason,
        kind: result.kind,
        alternative: None,
    }
}

/// Like [`check_device`], and when the device fails, also report the first
/// device/mode pair from the fallback order that does open.
pub fn check_device_with_fallback(
    manager: &DeviceManager,
    device: &DeviceSelector,
    samplerate: u32,
    blocksize: u32,
    mode: AudioDeviceMode,
) -> DeviceCheck {
    let mut check = check_device(manager, device, samplerate, blocksize, mode);
    if check.ok {
        return check;
    }
    match manager.find_working_device(device, samplerate, blocksize, mode) {
        Ok(found) => {
            tracing::info!(device = %found.device, mode = found.mode.label(), "alternative input available");
            check.alternative = Some(found);
        }
        Err(err) => tracing::warn!("no alternative input device: {err}"),
    }
    check
}
