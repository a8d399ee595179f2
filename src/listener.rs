//! Listening sessions.
//!
//! A session resolves a device that is proven to open, starts a stream on it
//! and feeds every block to one [`EdgeDetector`]. The driver thread only runs
//! the detector and posts events; the press callback runs on the session
//! thread. When the stream dies mid-session the listener falls back once:
//! shared mode on the same device after an exclusive-mode failure, otherwise
//! another device. A second failure ends the session.

use crate::audio::{AudioDeviceMode, DeviceSelector, ShareMode, StreamCallbacks};
use crate::backend::BackendRegistry;
use crate::config::ListenerConfig;
use crate::detection::{refractory_samples, EdgeDetector};
use crate::device_manager::DeviceManager;
use crate::error::{AudioError, ListenError};
use crate::lock::lock_or_recover;
use crate::stream::{self, OpenParams, OpenedStream};
use crossbeam_channel::{bounded, select, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const PRESS_QUEUE_CAPACITY: usize = 64;
const FAULT_QUEUE_CAPACITY: usize = 8;
/// How often the session loop checks the stop flag while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    Idle,
    ResolvingDevice,
    Streaming,
    StreamingAfterFallback,
    Stopped,
}

impl ListenerState {
    pub fn label(self) -> &'static str {
        match self {
            ListenerState::Idle => "idle",
            ListenerState::ResolvingDevice => "resolving_device",
            ListenerState::Streaming => "streaming",
            ListenerState::StreamingAfterFallback => "streaming_after_fallback",
            ListenerState::Stopped => "stopped",
        }
    }
}

/// Cooperative stop flag shared between a session and whoever ends it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of a session that ended because it was asked to stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    /// Presses delivered to the callback.
    pub presses: u64,
    pub blocks: u64,
    /// Blocks skipped because the detector was busy.
    pub dropped_blocks: u64,
    /// Presses lost to a full event queue.
    pub dropped_events: u64,
    pub fallback_used: bool,
    pub backend: &'static str,
    pub device: DeviceSelector,
    pub mode: &'static str,
    pub samplerate: u32,
    pub blocksize: u32,
    pub refractory_samples: usize,
}

impl SessionReport {
    /// Report for a session stopped before any stream opened.
    fn unopened(config: &ListenerConfig, refractory_samples: usize) -> Self {
        Self {
            presses: 0,
            blocks: 0,
            dropped_blocks: 0,
            dropped_events: 0,
            fallback_used: false,
            backend: "none",
            device: config.device.clone(),
            mode: "n/a",
            samplerate: config.samplerate,
            blocksize: config.blocksize,
            refractory_samples,
        }
    }
}

/// The stream facts a report carries, kept past the stream's close.
struct StreamInfo {
    backend: &'static str,
    device: DeviceSelector,
    mode: &'static str,
    samplerate: u32,
    blocksize: u32,
}

impl StreamInfo {
    fn of(stream: &OpenedStream) -> Self {
        Self {
            backend: stream.backend.name(),
            device: stream.device.clone(),
            mode: stream.mode_label(),
            samplerate: stream.samplerate,
            blocksize: stream.blocksize,
        }
    }
}

struct StreamFault {
    generation: u64,
    reason: String,
}

enum SessionEvent {
    Press,
    Fault(StreamFault),
}

/// State touched from the driver's callback thread.
struct SessionShared {
    detector: Mutex<EdgeDetector>,
    refractory: AtomicUsize,
    dropped_blocks: AtomicU64,
    dropped_events: AtomicU64,
}

impl SessionShared {
    fn new(detector: EdgeDetector) -> Self {
        let refractory = detector.params().refractory_samples;
        Self {
            detector: Mutex::new(detector),
            refractory: AtomicUsize::new(refractory),
            dropped_blocks: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Runs on the real-time thread, so it never waits on a lock.
    fn on_block(&self, block: &[f32], presses: &Sender<()>) {
        if block.is_empty() {
            return;
        }
        let mut detector = match self.detector.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let refractory = self.refractory.load(Ordering::Relaxed);
        if detector.params().refractory_samples != refractory {
            detector.set_refractory_samples(refractory);
        }
        if matches!(detector.process(block), Ok(true)) && presses.try_send(()).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Per-session plumbing for opening streams wired to the shared detector.
struct Session<'a> {
    listener: &'a Listener,
    shared: Arc<SessionShared>,
    presses: Sender<()>,
    faults: Sender<StreamFault>,
    /// Bumped on every reopen so faults from a closed stream are ignored.
    generation: u64,
}

impl Session<'_> {
    fn open(&self, device: &DeviceSelector, mode: AudioDeviceMode) -> Result<OpenedStream, AudioError> {
        let config = &self.listener.config;
        let manager = &self.listener.manager;
        manager.wait_for_probes();
        let generation = self.generation;
        let shared = Arc::clone(&self.shared);
        let presses = self.presses.clone();
        let faults = self.faults.clone();
        let callbacks = StreamCallbacks::new(
            move |block| shared.on_block(block, &presses),
            move |reason| {
                if faults.try_send(StreamFault { generation, reason }).is_err() {
                    tracing::warn!(generation, "audio fault queue full; dropping report");
                }
            },
        );

        let params = OpenParams::new(device.clone(), config.samplerate, config.blocksize, mode);
        let opened = stream::open_input(manager.registry(), &params, manager.backend_hint(), callbacks)?;

        let refractory = refractory_samples(config.debounce_ms, opened.samplerate);
        if opened.samplerate != config.samplerate {
            tracing::info!(
                requested = config.samplerate,
                opened = opened.samplerate,
                refractory,
                "stream opened at a different samplerate; refractory period adjusted"
            );
        }
        self.shared.refractory.store(refractory, Ordering::Relaxed);
        Ok(opened)
    }

    /// Replace a dead stream. The failed stream is closed before any probe
    /// touches the device again. `Ok(None)` when `stop` was raised first.
    fn recover(&mut self, failed: OpenedStream, stop: &StopSignal) -> Result<Option<OpenedStream>, AudioError> {
        let config = &self.listener.config;
        let manager = &self.listener.manager;
        let device = failed.device.clone();
        let was_exclusive = failed.share == Some(ShareMode::Exclusive);
        failed.close();
        self.generation += 1;
        manager.invalidate(&device);

        if was_exclusive && !stop.is_raised() {
            let probe = manager.test_device(&device, config.samplerate, config.blocksize, AudioDeviceMode::Shared);
            if probe.ok && !stop.is_raised() {
                match self.open(&device, AudioDeviceMode::Shared) {
                    Ok(opened) => {
                        tracing::info!(%device, "recovered in shared mode on the same device");
                        return Ok(Some(opened));
                    }
                    Err(err) => tracing::warn!(%device, "shared-mode reopen failed: {err}"),
                }
            } else if !probe.ok {
                tracing::debug!(
                    %device,
                    reason = probe.reason.as_deref().unwrap_or_default(),
                    "shared-mode probe failed"
                );
            }
        }

        let found = manager.find_alternative_device_until(&device, config.samplerate, config.blocksize, || {
            stop.is_raised()
        })?;
        let Some(alternative) = found.filter(|_| !stop.is_raised()) else {
            return Ok(None);
        };
        let opened = self.open(&alternative.device, alternative.mode)?;
        tracing::info!(from = %device, to = %opened.device, mode = opened.mode_label(), "switched to another input device");
        Ok(Some(opened))
    }

    fn report(&self, info: StreamInfo, presses: u64, fallback_used: bool) -> SessionReport {
        let shared = &self.shared;
        let blocks = lock_or_recover(&shared.detector, "edge detector").blocks();
        SessionReport {
            presses,
            blocks,
            dropped_blocks: shared.dropped_blocks.load(Ordering::Relaxed),
            dropped_events: shared.dropped_events.load(Ordering::Relaxed),
            fallback_used,
            backend: info.backend,
            device: info.device,
            mode: info.mode,
            samplerate: info.samplerate,
            blocksize: info.blocksize,
            refractory_samples: shared.refractory.load(Ordering::Relaxed),
        }
    }
}

/// Owns the configuration and device manager for listening sessions.
pub struct Listener {
    config: ListenerConfig,
    manager: Arc<DeviceManager>,
    state: Arc<Mutex<ListenerState>>,
}

impl Listener {
    pub fn new(config: ListenerConfig, manager: Arc<DeviceManager>) -> Self {
        Self {
            config,
            manager,
            state: Arc::new(Mutex::new(ListenerState::Idle)),
        }
    }

    /// Listener over the platform's cpal hosts, honouring the backend hint
    /// and probe timeout from `config`.
    pub fn with_platform_backends(config: ListenerConfig) -> Self {
        let manager = DeviceManager::new(Arc::new(BackendRegistry::cpal()))
            .with_backend_hint(config.backend.clone())
            .with_probe_timeout(config.probe_timeout);
        Self::new(config, Arc::new(manager))
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<DeviceManager> {
        &self.manager
    }

    pub fn state(&self) -> ListenerState {
        *lock_or_recover(&self.state, "listener state")
    }

    fn set_state(&self, next: ListenerState) {
        let mut state = lock_or_recover(&self.state, "listener state");
        if *state != next {
            tracing::debug!(from = state.label(), to = next.label(), "listener state changed");
            *state = next;
        }
    }

    /// Run a session on the calling thread until `stop` is raised or the
    /// stream is lost for good. `on_press` runs once per detected press.
    pub fn listen<F: FnMut()>(&self, mut on_press: F, stop: &StopSignal) -> Result<SessionReport, ListenError> {
        let result = self.run(&mut on_press, stop);
        self.set_state(ListenerState::Stopped);
        match &result {
            Ok(report) => tracing::info!(
                presses = report.presses,
                blocks = report.blocks,
                dropped_blocks = report.dropped_blocks,
                fallback = report.fallback_used,
                "listening session ended"
            ),
            Err(err) => tracing::error!("listening session failed: {err}"),
        }
        result
    }

    fn run(&self, on_press: &mut dyn FnMut(), stop: &StopSignal) -> Result<SessionReport, ListenError> {
        let params = self.config.detector_params()?;
        self.set_state(ListenerState::ResolvingDevice);
        let found = self.manager.find_working_device_until(
            &self.config.device,
            self.config.samplerate,
            self.config.blocksize,
            self.config.mode,
            || stop.is_raised(),
        )?;
        let Some(working) = found.filter(|_| !stop.is_raised()) else {
            tracing::info!("stop requested while resolving an input device");
            return Ok(SessionReport::unopened(&self.config, params.refractory_samples));
        };

        let (press_tx, press_rx) = bounded(PRESS_QUEUE_CAPACITY);
        let (fault_tx, fault_rx) = bounded(FAULT_QUEUE_CAPACITY);
        let mut session = Session {
            listener: self,
            shared: Arc::new(SessionShared::new(EdgeDetector::new(params))),
            presses: press_tx,
            faults: fault_tx,
            generation: 0,
        };
        let mut stream = session.open(&working.device, working.mode)?;
        self.set_state(ListenerState::Streaming);

        let mut fallback_used = false;
        let mut delivered = 0u64;
        while !stop.is_raised() {
            let event = select! {
                recv(press_rx) -> msg => msg.ok().map(|()| SessionEvent::Press),
                recv(fault_rx) -> msg => msg.ok().map(SessionEvent::Fault),
                default(POLL_INTERVAL) => None,
            };
            match event {
                Some(SessionEvent::Press) => {
                    delivered += 1;
                    tracing::debug!(press = delivered, "switch press");
                    on_press();
                }
                Some(SessionEvent::Fault(fault)) if fault.generation != session.generation => {
                    tracing::debug!(generation = fault.generation, "ignoring fault from a closed stream");
                }
                Some(SessionEvent::Fault(fault)) if fallback_used => {
                    let device = stream.device.to_string();
                    stream.close();
                    return Err(AudioError::StreamLost {
                        device,
                        reason: fault.reason,
                    }
                    .into());
                }
                Some(SessionEvent::Fault(fault)) => {
                    tracing::warn!(device = %stream.device, "audio stream failed: {}", fault.reason);
                    let failed = StreamInfo::of(&stream);
                    match session.recover(stream, stop) {
                        Ok(Some(next)) => {
                            stream = next;
                            fallback_used = true;
                            self.set_state(ListenerState::StreamingAfterFallback);
                        }
                        Ok(None) => {
                            tracing::info!("stop requested during fallback");
                            return Ok(session.report(failed, delivered, false));
                        }
                        Err(err) => {
                            return Err(AudioError::StreamLost {
                                device: failed.device.to_string(),
                                reason: format!("{}; fallback failed: {err}", fault.reason),
                            }
                            .into())
                        }
                    }
                }
                None => {}
            }
        }

        let info = StreamInfo::of(&stream);
        stream.close();
        Ok(session.report(info, delivered, fallback_used))
    }

    /// Run [`listen`](Self::listen) on a dedicated `switch-listener` thread.
    pub fn spawn<F>(self, on_press: F) -> Result<ListenerHandle, ListenError>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = StopSignal::new();
        let state = Arc::clone(&self.state);
        let thread_stop = stop.clone();
        let join = thread::Builder::new()
            .name("switch-listener".into())
            .spawn(move || self.listen(on_press, &thread_stop))
            .map_err(ListenError::Spawn)?;
        Ok(ListenerHandle {
            stop,
            state,
            join: Some(join),
        })
    }
}

/// Controls a session started with [`Listener::spawn`]. Dropping the handle
/// stops the session and waits for it.
pub struct ListenerHandle {
    stop: StopSignal,
    state: Arc<Mutex<ListenerState>>,
    join: Option<JoinHandle<Result<SessionReport, ListenError>>>,
}

impl ListenerHandle {
    pub fn stop(&self) {
        self.stop.raise();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> ListenerState {
        *lock_or_recover(&self.state, "listener state")
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the session to end. Does not raise the stop flag.
    pub fn join(mut self) -> Result<SessionReport, ListenError> {
        let Some(join) = self.join.take() else {
            return Err(ListenError::Panicked);
        };
        match join.join() {
            Ok(result) => result,
            Err(_) => {
                *lock_or_recover(&self.state, "listener state") = ListenerState::Stopped;
                Err(ListenError::Panicked)
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop.raise();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests;
