//! Scripted audio host and switch-press waveforms.
//!
//! `SimHost` stands in for a platform host wherever hardware is unavailable:
//! unit tests, integration tests and `switch-listen --simulate`. Opens and
//! preflights are counted, failures can be scripted per device, share mode,
//! samplerate and blocksize, and each opened stream plays a waveform on its
//! own thread the way a driver would call back.

use super::device::{DeviceSelector, HostApiInfo, InputDeviceInfo, ShareMode};
use super::host::{AudioHost, InputStream, StreamCallbacks, StreamRequest};
use crate::lock::lock_or_recover;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shape of a desktop accessibility switch plugged into an electret-mic input.
///
/// A press is a spray of contact-bounce spikes, a single capacitor discharge
/// sample, an RC recharge curve and then silence while the switch is held.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchWaveform {
    pub samplerate: u32,
    pub rc_ms: f32,
    pub bias_pop: f32,
    pub bounce_spikes: usize,
    pub bounce_interval_ms: f32,
    pub hold_ms: f32,
    pub gap_ms: f32,
}

impl Default for SwitchWaveform {
    fn default() -> Self {
        Self {
            samplerate: 44_100,
            rc_ms: 12.0,
            bias_pop: 0.95,
            bounce_spikes: 6,
            bounce_interval_ms: 0.6,
            hold_ms: 180.0,
            gap_ms: 380.0,
        }
    }
}

impl SwitchWaveform {
    pub fn new(samplerate: u32) -> Self {
        Self {
            samplerate,
            ..Self::default()
        }
    }

    fn samples_for(&self, ms: f32) -> usize {
        (ms / 1_000.0 * self.samplerate as f32) as usize
    }

    /// One press-and-hold.
    pub fn press(&self) -> Vec<f32> {
        let gap = self.samples_for(self.bounce_interval_ms).max(2);
        let rc_len = self.samples_for(self.rc_ms);
        let hold = self.samples_for(self.hold_ms);
        let mut out = Vec::with_capacity(gap * self.bounce_spikes + 1 + rc_len + hold);

        for _ in 0..self.bounce_spikes {
            out.extend_from_slice(&[1.0, -1.0]);
            out.extend(std::iter::repeat(0.0).take(gap - 2));
        }
        out.push(-self.bias_pop);
        let tau = self.rc_ms / 1_000.0;
        out.extend((0..rc_len).map(|n| {
            let t = n as f32 / self.samplerate as f32;
            self.bias_pop * (-t / tau).exp()
        }));
        out.extend(std::iter::repeat(0.0).take(hold));
        for sample in &mut out {
            *sample = sample.clamp(-1.0, 1.0);
        }
        out
    }

    pub fn silence(&self, ms: f32) -> Vec<f32> {
        vec![0.0; self.samples_for(ms)]
    }

    /// `presses` presses, each followed by a gap. Recharge time and bounce
    /// count vary per press across 6..=20 ms and 2..=8 spikes, the ranges
    /// seen on real switches, without any randomness.
    pub fn session(&self, presses: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for i in 0..presses {
            let variant = Self {
                rc_ms: 6.0 + ((i * 5) % 15) as f32,
                bounce_spikes: 2 + (i * 3) % 7,
                ..self.clone()
            };
            out.extend(variant.press());
            out.extend(self.silence(self.gap_ms));
        }
        out
    }
}

/// Audio delivered by every stream opened on a matching device.
#[derive(Debug, Clone)]
pub struct SimSignal {
    samples: Arc<Vec<f32>>,
    paced: bool,
    then_fault: Option<String>,
}

impl SimSignal {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples: Arc::new(samples),
            paced: false,
            then_fault: None,
        }
    }

    /// Deliver blocks at the stream's real rate instead of as fast as possible.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Report a stream fault once the samples run out.
    pub fn then_fault(mut self, reason: impl Into<String>) -> Self {
        self.then_fault = Some(reason.into());
        self
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Check,
    Open,
}

/// A scripted failure. Every filter left unset matches anything.
#[derive(Debug, Clone)]
pub struct SimFailure {
    message: String,
    device: Option<String>,
    share: Option<ShareMode>,
    samplerate: Option<u32>,
    blocksize: Option<u32>,
    on_check: bool,
    on_open: bool,
    remaining: Option<usize>,
}

impl SimFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            device: None,
            share: None,
            samplerate: None,
            blocksize: None,
            on_check: true,
            on_open: true,
            remaining: None,
        }
    }

    pub fn device(mut self, name: impl Into<String>) -> Self {
        self.device = Some(name.into());
        self
    }

    pub fn share(mut self, share: ShareMode) -> Self {
        self.share = Some(share);
        self
    }

    pub fn samplerate(mut self, samplerate: u32) -> Self {
        self.samplerate = Some(samplerate);
        self
    }

    pub fn blocksize(mut self, blocksize: u32) -> Self {
        self.blocksize = Some(blocksize);
        self
    }

    /// Fail opens but let preflight checks pass.
    pub fn open_only(mut self) -> Self {
        self.on_check = false;
        self.on_open = true;
        self
    }

    pub fn check_only(mut self) -> Self {
        self.on_check = true;
        self.on_open = false;
        self
    }

    /// Stop failing after `n` matches.
    pub fn times(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    fn matches(&self, device: &str, request: &StreamRequest, stage: Stage) -> bool {
        let stage_ok = match stage {
            Stage::Check => self.on_check,
            Stage::Open => self.on_open,
        };
        stage_ok
            && self.device.as_deref().map_or(true, |d| d == device)
            && self.share.map_or(true, |s| s == request.share)
            && self.samplerate.map_or(true, |sr| sr == request.samplerate)
            && self.blocksize.map_or(true, |bs| bs == request.blocksize)
    }
}

struct LiveStream {
    stopped: Arc<AtomicBool>,
    callbacks: StreamCallbacks,
}

/// In-memory [`AudioHost`].
pub struct SimHost {
    hostapi: HostApiInfo,
    devices: Vec<InputDeviceInfo>,
    default_device: Option<usize>,
    strict_shared_rate: bool,
    failures: Mutex<Vec<SimFailure>>,
    signals: Mutex<Vec<(String, Option<ShareMode>, SimSignal)>>,
    live: Mutex<Vec<LiveStream>>,
    open_log: Mutex<Vec<StreamRequest>>,
    opens: AtomicUsize,
    checks: AtomicUsize,
    open_latency: Duration,
    opening: AtomicUsize,
    peak_busy: AtomicUsize,
}

impl SimHost {
    pub fn new(hostapi: impl Into<String>) -> Self {
        Self {
            hostapi: HostApiInfo::new(hostapi),
            devices: Vec::new(),
            default_device: None,
            strict_shared_rate: false,
            failures: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
            open_log: Mutex::new(Vec::new()),
            opens: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            open_latency: Duration::ZERO,
            opening: AtomicUsize::new(0),
            peak_busy: AtomicUsize::new(0),
        }
    }

    /// Add an input device. The first device added becomes the default.
    pub fn with_device(mut self, name: &str, channels: u16, native_rate: u32) -> Self {
        let index = self.devices.len();
        self.devices.push(InputDeviceInfo {
            index,
            name: name.to_string(),
            hostapi: self.hostapi.name.clone(),
            max_input_channels: channels,
            default_samplerate: native_rate,
        });
        self.default_device.get_or_insert(index);
        self
    }

    pub fn with_default(mut self, name: &str) -> Self {
        self.default_device = self.devices.iter().position(|d| d.name == name);
        self
    }

    /// Reject shared-mode opens whose samplerate differs from the device's
    /// native rate, the way a shared-mode mixer does.
    pub fn with_strict_shared_rate(mut self) -> Self {
        self.strict_shared_rate = true;
        self
    }

    /// Make every open take `latency` before it succeeds or fails, like a
    /// driver that is slow to hand over the device.
    pub fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }

    pub fn fail(&self, failure: SimFailure) {
        lock_or_recover(&self.failures, "sim failures").push(failure);
    }

    pub fn clear_failures(&self) {
        lock_or_recover(&self.failures, "sim failures").clear();
    }

    /// Play `signal` on every stream opened on `device`, optionally only for
    /// one share mode. Later registrations win.
    pub fn play_on(&self, device: &str, share: Option<ShareMode>, signal: SimSignal) {
        lock_or_recover(&self.signals, "sim signals").push((device.to_string(), share, signal));
    }

    /// Deliver `reason` to every stream that is still open.
    pub fn inject_fault(&self, reason: &str) {
        let targets: Vec<StreamCallbacks> = {
            let mut live = lock_or_recover(&self.live, "sim live streams");
            live.retain(|s| !s.stopped.load(Ordering::SeqCst));
            live.iter().map(|s| s.callbacks.clone()).collect()
        };
        for callbacks in targets {
            callbacks.fault(reason.to_string());
        }
    }

    /// Open attempts, successful or not.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn open_log(&self) -> Vec<StreamRequest> {
        lock_or_recover(&self.open_log, "sim open log").clone()
    }

    /// Most opens in flight plus streams alive at once, sampled as each open
    /// starts. Anything above 1 means two users held a device together.
    pub fn peak_busy(&self) -> usize {
        self.peak_busy.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        let mut live = lock_or_recover(&self.live, "sim live streams");
        live.retain(|s| !s.stopped.load(Ordering::SeqCst));
        live.len()
    }

    fn resolve(&self, selector: &DeviceSelector) -> Result<&InputDeviceInfo> {
        match selector {
            DeviceSelector::Default => self
                .default_device
                .and_then(|i| self.devices.get(i))
                .ok_or_else(|| anyhow!("no default input device available")),
            DeviceSelector::Index(index) => self
                .devices
                .get(*index)
                .ok_or_else(|| anyhow!("no such device: #{index}")),
            DeviceSelector::Name(name) => {
                let prefix = format!("{name}:");
                self.devices
                    .iter()
                    .find(|d| &d.name == name)
                    .or_else(|| self.devices.iter().find(|d| d.name.starts_with(&prefix)))
                    .ok_or_else(|| anyhow!("no such device: '{name}'"))
            }
        }
    }

    fn validate(&self, request: &StreamRequest, stage: Stage) -> Result<&InputDeviceInfo> {
        let device = self.resolve(&request.device)?;
        {
            let mut failures = lock_or_recover(&self.failures, "sim failures");
            if let Some(pos) = failures
                .iter()
                .position(|f| f.matches(&device.name, request, stage))
            {
                let message = failures[pos].message.clone();
                if let Some(remaining) = failures[pos].remaining.as_mut() {
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        failures.remove(pos);
                    }
                }
                bail!("{message}");
            }
        }
        if request.channels > device.max_input_channels {
            bail!(
                "invalid number of channels: {} (device has {})",
                request.channels,
                device.max_input_channels
            );
        }
        if self.strict_shared_rate
            && request.share == ShareMode::Shared
            && request.samplerate != device.default_samplerate
        {
            bail!(
                "invalid sample rate {} Hz (shared mix rate is {} Hz)",
                request.samplerate,
                device.default_samplerate
            );
        }
        Ok(device)
    }

    fn signal_for(&self, device: &str, share: ShareMode) -> Option<SimSignal> {
        lock_or_recover(&self.signals, "sim signals")
            .iter()
            .rev()
            .find(|(name, mode, _)| name == device && mode.map_or(true, |m| m == share))
            .map(|(_, _, signal)| signal.clone())
    }
}

struct SimStream {
    stopped: Arc<AtomicBool>,
    player: Option<JoinHandle<()>>,
}

impl InputStream for SimStream {
    fn stop(&mut self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(player) = self.player.take() {
            player
                .join()
                .map_err(|_| anyhow!("sim playback thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn play(
    signal: SimSignal,
    blocksize: usize,
    samplerate: u32,
    stopped: Arc<AtomicBool>,
    callbacks: StreamCallbacks,
) {
    let block_period =
        Duration::from_secs_f64(blocksize as f64 / f64::from(samplerate.max(1)));
    for block in signal.samples.chunks(blocksize.max(1)) {
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        callbacks.block(block);
        if signal.paced {
            thread::sleep(block_period);
        }
    }
    if let Some(reason) = signal.then_fault {
        if !stopped.load(Ordering::SeqCst) {
            callbacks.fault(reason);
        }
    }
}

impl AudioHost for SimHost {
    fn hostapi(&self) -> HostApiInfo {
        self.hostapi.clone()
    }

    fn input_devices(&self) -> Result<Vec<InputDeviceInfo>> {
        Ok(self.devices.clone())
    }

    fn default_input_device(&self) -> Option<InputDeviceInfo> {
        self.default_device
            .and_then(|i| self.devices.get(i))
            .cloned()
    }

    fn device_info(&self, device: &DeviceSelector) -> Result<InputDeviceInfo> {
        self.resolve(device).cloned()
    }

    fn check_input_settings(&self, request: &StreamRequest) -> Result<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.validate(request, Stage::Check).map(|_| ())
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Box<dyn InputStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.opening.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_busy
            .fetch_max(in_flight + self.live_streams(), Ordering::SeqCst);
        if !self.open_latency.is_zero() {
            thread::sleep(self.open_latency);
        }
        let opened = self.start_stream(request, callbacks);
        self.opening.fetch_sub(1, Ordering::SeqCst);
        opened
    }
}

impl SimHost {
    fn start_stream(
        &self,
        request: &StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Box<dyn InputStream>> {
        lock_or_recover(&self.open_log, "sim open log").push(request.clone());
        let device = self.validate(request, Stage::Open)?;

        let stopped = Arc::new(AtomicBool::new(false));
        let live = LiveStream {
            stopped: stopped.clone(),
            callbacks: callbacks.clone(),
        };
        let player = match self.signal_for(&device.name, request.share) {
            Some(signal) => {
                let blocksize = request.blocksize as usize;
                let samplerate = request.samplerate;
                let flag = stopped.clone();
                let handle = thread::Builder::new()
                    .name("sim-playback".into())
                    .spawn(move || play(signal, blocksize, samplerate, flag, callbacks))
                    .context("failed to spawn sim playback thread")?;
                Some(handle)
            }
            None => None,
        };
        lock_or_recover(&self.live, "sim live streams").push(live);
        tracing::debug!(%request, device = %device.name, "sim stream opened");
        Ok(Box::new(SimStream { stopped, player }))
    }
}
