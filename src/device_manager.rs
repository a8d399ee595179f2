//! Picks an input device that is proven to open.
//!
//! Every candidate `(device, mode)` pair is probed by opening and closing a
//! throwaway stream. Results are cached for a short TTL so a burst of lookups
//! (startup, fallback, calibration) touches each device once.

use crate::audio::{AudioDeviceMode, DeviceSelector, InputDeviceInfo, StreamCallbacks};
use crate::backend::BackendRegistry;
use crate::error::{AudioError, DeviceErrorKind, ProbeFailure};
use crate::lock::{lock_or_recover, read_or_recover, write_or_recover};
use crate::stream::{self, OpenParams};
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Mode order for every device after the preferred one.
const CHAIN_MODES: [AudioDeviceMode; 3] = [
    AudioDeviceMode::Auto,
    AudioDeviceMode::Shared,
    AudioDeviceMode::Exclusive,
];

/// Outcome of one device probe. Probes never fail; a broken device is
/// reported with `ok == false` and a reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub reason: Option<String>,
    pub kind: Option<DeviceErrorKind>,
    /// Served from the cache instead of a fresh open.
    pub cached: bool,
}

impl ProbeResult {
    fn success() -> Self {
        Self {
            ok: true,
            reason: None,
            kind: None,
            cached: false,
        }
    }

    fn failure(reason: String, kind: DeviceErrorKind) -> Self {
        Self {
            ok: false,
            reason: Some(reason),
            kind: Some(kind),
            cached: false,
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        self.kind.map(DeviceErrorKind::recovery_hint)
    }
}

/// A device/mode pair that opened successfully.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkingDevice {
    pub device: DeviceSelector,
    pub mode: AudioDeviceMode,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ProbeResult,
    tested_at: Instant,
}

type CacheKey = (DeviceSelector, AudioDeviceMode);

pub struct DeviceManager {
    registry: Arc<BackendRegistry>,
    backend_hint: Option<String>,
    cache: RwLock<HashMap<CacheKey, CacheEntry>>,
    cache_ttl: Duration,
    probe_timeout: Duration,
    last_working: Mutex<Option<WorkingDevice>>,
    /// Held for the whole of a probe. Keeps the thread of a probe that timed
    /// out, which may still hold its device; the next probe joins it first.
    stale_probe: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceManager {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            backend_hint: None,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            last_working: Mutex::new(None),
            stale_probe: Mutex::new(None),
        }
    }

    pub fn with_backend_hint(mut self, hint: Option<String>) -> Self {
        self.backend_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn backend_hint(&self) -> Option<&str> {
        self.backend_hint.as_deref()
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    pub fn last_working(&self) -> Option<WorkingDevice> {
        lock_or_recover(&self.last_working, "last working device").clone()
    }

    fn remember(&self, device: &DeviceSelector, mode: AudioDeviceMode) {
        *lock_or_recover(&self.last_working, "last working device") = Some(WorkingDevice {
            device: device.clone(),
            mode,
        });
    }

    /// Input devices on the selected backend; empty when enumeration fails.
    pub fn available_input_devices(&self) -> Vec<InputDeviceInfo> {
        let listed = self
            .registry
            .select(None, self.backend_hint())
            .map_err(anyhow::Error::from)
            .and_then(|backend| backend.host().input_devices());
        match listed {
            Ok(devices) => devices
                .into_iter()
                .filter(|d| d.max_input_channels > 0)
                .collect(),
            Err(err) => {
                tracing::warn!("failed to query audio devices: {err:#}");
                Vec::new()
            }
        }
    }

    pub fn device_info(&self, device: &DeviceSelector) -> Option<InputDeviceInfo> {
        let backend = self.registry.select(None, self.backend_hint()).ok()?;
        match backend.host().device_info(device) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::debug!(%device, "failed to get device info: {err:#}");
                None
            }
        }
    }

    /// Open and immediately close `device` in `mode`, bounded by the probe
    /// timeout. Cached per `(device, mode)`.
    pub fn test_device(
        &self,
        device: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        mode: AudioDeviceMode,
    ) -> ProbeResult {
        self.test_device_with_timeout(device, samplerate, blocksize, mode, self.probe_timeout)
    }

    pub fn test_device_with_timeout(
        &self,
        device: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        mode: AudioDeviceMode,
        timeout: Duration,
    ) -> ProbeResult {
        let key = (device.clone(), mode);
        if let Some(entry) = read_or_recover(&self.cache, "device test cache").get(&key) {
            if entry.tested_at.elapsed() < self.cache_ttl {
                tracing::debug!(%device, mode = mode.label(), ok = entry.result.ok, "device test cache hit");
                return ProbeResult {
                    cached: true,
                    ..entry.result.clone()
                };
            }
        }

        let result = match self.probe(device, samplerate, blocksize, mode, timeout) {
            Ok(()) => ProbeResult::success(),
            Err((reason, kind)) => {
                let result = ProbeResult::failure(reason, kind);
                tracing::debug!(
                    %device,
                    mode = mode.label(),
                    kind = ?result.kind,
                    "device test failed: {}",
                    result.reason.as_deref().unwrap_or_default()
                );
                result
            }
        };
        if result.ok && !device.is_default() {
            self.remember(device, mode);
        }
        write_or_recover(&self.cache, "device test cache").insert(
            key,
            CacheEntry {
                result: result.clone(),
                tested_at: Instant::now(),
            },
        );
        result
    }

    /// Block until a probe that outlived its timeout has released its device.
    /// Call before opening a device for real.
    pub fn wait_for_probes(&self) {
        let mut stale = lock_or_recover(&self.stale_probe, "device probe");
        join_stale(&mut stale);
    }

    fn probe(
        &self,
        device: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        mode: AudioDeviceMode,
        timeout: Duration,
    ) -> Result<(), (String, DeviceErrorKind)> {
        let mut stale = lock_or_recover(&self.stale_probe, "device probe");
        join_stale(&mut stale);

        let registry = Arc::clone(&self.registry);
        let hint = self.backend_hint.clone();
        let params = OpenParams::new(device.clone(), samplerate, blocksize, mode);
        let (tx, rx) = bounded(1);
        // Streams may not be Send, so the open and the close happen on the
        // probe thread; only the outcome crosses back.
        let spawned = thread::Builder::new()
            .name("device-probe".into())
            .spawn(move || {
                let outcome = stream::open_input(
                    &registry,
                    &params,
                    hint.as_deref(),
                    StreamCallbacks::discard(),
                )
                .map(|opened| opened.close())
                .map_err(|err| (err.to_string(), err.kind()));
                let _ = tx.send(outcome);
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                return Err((
                    format!("failed to spawn device probe: {err}"),
                    DeviceErrorKind::General,
                ))
            }
        };
        match rx.recv_timeout(timeout) {
            Ok(outcome) => {
                let _ = handle.join();
                outcome
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(%device, mode = mode.label(), "device probe timed out; holding the device until it returns");
                *stale = Some(handle);
                Err((
                    format!("device test timed out after {} ms", timeout.as_millis()),
                    DeviceErrorKind::Hardware,
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err((
                    "device probe exited unexpectedly".to_string(),
                    DeviceErrorKind::General,
                ))
            }
        }
    }

    /// Find a device/mode pair that opens: the preferred device across its
    /// mode order, then the last working device, then everything else in the
    /// fallback chain.
    pub fn find_working_device(
        &self,
        preferred: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        preferred_mode: AudioDeviceMode,
    ) -> Result<WorkingDevice, AudioError> {
        self.find_working_device_until(preferred, samplerate, blocksize, preferred_mode, || false)?
            .ok_or(AudioError::NoWorkingDevice { attempts: Vec::new() })
    }

    /// [`find_working_device`](Self::find_working_device) that gives up with
    /// `Ok(None)` once `should_stop` returns true. Checked before every probe.
    pub fn find_working_device_until(
        &self,
        preferred: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        preferred_mode: AudioDeviceMode,
        should_stop: impl Fn() -> bool,
    ) -> Result<Option<WorkingDevice>, AudioError> {
        let chain = self.get_device_fallback_chain(preferred);
        let last = self.last_working();

        let mut candidates: Vec<(DeviceSelector, AudioDeviceMode)> = preferred_mode
            .fallback_order()
            .into_iter()
            .map(|mode| (preferred.clone(), mode))
            .collect();
        if let Some(last) = last
            .as_ref()
            .filter(|l| &l.device != preferred && chain.contains(&l.device))
        {
            candidates.push((last.device.clone(), last.mode));
            candidates.extend(
                CHAIN_MODES
                    .into_iter()
                    .filter(|m| *m != last.mode)
                    .map(|mode| (last.device.clone(), mode)),
            );
        }
        let skip_last = last.map(|l| l.device);
        for device in chain
            .iter()
            .filter(|d| *d != preferred && Some(*d) != skip_last.as_ref())
        {
            candidates.extend(CHAIN_MODES.into_iter().map(|mode| (device.clone(), mode)));
        }

        self.first_working(&candidates, samplerate, blocksize, should_stop)
    }

    fn first_working(
        &self,
        candidates: &[(DeviceSelector, AudioDeviceMode)],
        samplerate: u32,
        blocksize: u32,
        should_stop: impl Fn() -> bool,
    ) -> Result<Option<WorkingDevice>, AudioError> {
        let mut failures = Vec::new();
        for (device, mode) in candidates {
            if should_stop() {
                tracing::info!(attempts = failures.len(), "device search cancelled");
                return Ok(None);
            }
            if let Some(found) = self.try_candidate(device, samplerate, blocksize, *mode, &mut failures) {
                return Ok(Some(found));
            }
        }
        tracing::error!(attempts = failures.len(), "no working audio input devices found");
        Err(AudioError::NoWorkingDevice { attempts: failures })
    }

    fn try_candidate(
        &self,
        device: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        mode: AudioDeviceMode,
        failures: &mut Vec<ProbeFailure>,
    ) -> Option<WorkingDevice> {
        tracing::debug!(%device, mode = mode.label(), "testing audio device");
        let result = self.test_device(device, samplerate, blocksize, mode);
        if result.ok {
            tracing::info!(%device, mode = mode.label(), "found working audio device");
            self.remember(device, mode);
            return Some(WorkingDevice {
                device: device.clone(),
                mode,
            });
        }
        failures.push(ProbeFailure {
            device: device.clone(),
            mode,
            reason: result.reason.unwrap_or_else(|| "unknown error".to_string()),
        });
        None
    }

    /// `[preferred, last working, default, every other input device]`,
    /// without duplicates. Enumerated devices are listed by name, and an
    /// entry is dropped when an earlier one already names the same physical
    /// device by index, name or as the default.
    pub fn get_device_fallback_chain(&self, preferred: &DeviceSelector) -> Vec<DeviceSelector> {
        let devices = self.available_input_devices();
        let default_name = self.device_info(&DeviceSelector::Default).map(|info| info.name);
        let physical = |device: &DeviceSelector| -> Option<String> {
            match device {
                DeviceSelector::Default => default_name.clone(),
                DeviceSelector::Index(index) => devices
                    .iter()
                    .find(|d| d.index == *index)
                    .map(|d| d.name.clone()),
                DeviceSelector::Name(name) => Some(name.clone()),
            }
        };

        let mut chain: Vec<DeviceSelector> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        let mut push = |device: DeviceSelector| {
            let id = physical(&device);
            if chain.contains(&device) || id.as_ref().is_some_and(|id| seen.contains(id)) {
                return;
            }
            seen.extend(id);
            chain.push(device);
        };

        push(preferred.clone());
        if let Some(last) = self.last_working() {
            push(last.device);
        }
        push(DeviceSelector::Default);
        for info in &devices {
            push(DeviceSelector::Name(info.name.clone()));
        }
        chain
    }

    /// Like [`find_working_device`](Self::find_working_device) but never
    /// returns `exclude`, which just failed and must not be reopened.
    pub fn find_alternative_device(
        &self,
        exclude: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
    ) -> Result<WorkingDevice, AudioError> {
        self.find_alternative_device_until(exclude, samplerate, blocksize, || false)?
            .ok_or(AudioError::NoWorkingDevice { attempts: Vec::new() })
    }

    pub fn find_alternative_device_until(
        &self,
        exclude: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        should_stop: impl Fn() -> bool,
    ) -> Result<Option<WorkingDevice>, AudioError> {
        let excluded_name = self.device_info(exclude).map(|info| info.name);
        let candidates: Vec<(DeviceSelector, AudioDeviceMode)> = self
            .get_device_fallback_chain(exclude)
            .into_iter()
            .filter(|device| device != exclude && !self.same_device(device, excluded_name.as_deref()))
            .flat_map(|device| CHAIN_MODES.into_iter().map(move |mode| (device.clone(), mode)))
            .collect();
        self.first_working(&candidates, samplerate, blocksize, should_stop)
    }

    fn same_device(&self, device: &DeviceSelector, name: Option<&str>) -> bool {
        let Some(name) = name else {
            return false;
        };
        match device {
            DeviceSelector::Name(candidate) => candidate == name,
            other => self.device_info(other).is_some_and(|info| info.name == name),
        }
    }

    /// Check that `device` exists and opens with these settings.
    pub fn validate_device_settings(
        &self,
        device: &DeviceSelector,
        samplerate: u32,
        blocksize: u32,
        mode: AudioDeviceMode,
    ) -> Result<InputDeviceInfo, AudioError> {
        let Some(info) = self.device_info(device) else {
            return Err(AudioError::device(
                format!("device {device} not found"),
                Some(device.clone()),
            ));
        };
        let result = self.test_device(device, samplerate, blocksize, mode);
        if result.ok {
            Ok(info)
        } else {
            Err(AudioError::device(
                result.reason.unwrap_or_else(|| "device test failed".to_string()),
                Some(device.clone()),
            ))
        }
    }

    pub fn clear_cache(&self) {
        write_or_recover(&self.cache, "device test cache").clear();
    }

    /// Forget every cached result for `device`.
    pub fn invalidate(&self, device: &DeviceSelector) {
        write_or_recover(&self.cache, "device test cache").retain(|(d, _), _| d != device);
    }
}

fn join_stale(stale: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = stale.take() {
        tracing::debug!("waiting for a timed-out device probe to finish");
        let _ = handle.join();
    }
}
