//! Platform capture backends.
//!
//! Each [`BackendKind`] pairs a host API (WASAPI, ALSA, Core Audio) with the
//! open policy that keeps the detector fed on that platform: exclusive/shared
//! fallback, device-name candidates, blocksize retries. The
//! [`BackendRegistry`] connects the kinds available on this machine once and
//! hands out the best match on request.

mod alsa;
mod coreaudio;
mod wasapi;

use crate::audio::{
    AudioDeviceMode, AudioHost, CpalHost, DeviceSelector, HostApiInfo, InputStream, ShareMode,
    StreamCallbacks, StreamGuard, StreamRequest, CAPTURE_CHANNELS,
};
use crate::error::{AudioError, OpenAttempt};
use crate::lock::{lock_or_recover, read_or_recover, write_or_recover};
use anyhow::{anyhow, Result};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

pub use alsa::alsa_candidates;

/// Capture backends known to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendKind {
    Wasapi,
    Alsa,
    CoreAudio,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Wasapi, BackendKind::Alsa, BackendKind::CoreAudio];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Wasapi => "WASAPI",
            BackendKind::Alsa => "ALSA",
            BackendKind::CoreAudio => "CoreAudio",
        }
    }

    /// Higher wins when several backends could serve the platform.
    pub fn priority(self) -> u8 {
        match self {
            BackendKind::Wasapi => 20,
            BackendKind::Alsa | BackendKind::CoreAudio => 10,
        }
    }

    /// Whether `info` names the host API this backend drives. Matching
    /// ignores case and spaces so "Windows WASAPI", "Core Audio" and cpal's
    /// "CoreAudio" all line up.
    pub fn matches_hostapi(self, info: &HostApiInfo) -> bool {
        let normalized: String = info
            .name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let needle = match self {
            BackendKind::Wasapi => "wasapi",
            BackendKind::Alsa => "alsa",
            BackendKind::CoreAudio => "coreaudio",
        };
        normalized.contains(needle)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operating system family, used to pick the default backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    pub fn preferred_backend(self) -> Option<BackendKind> {
        match self {
            Platform::Windows => Some(BackendKind::Wasapi),
            Platform::MacOs => Some(BackendKind::CoreAudio),
            Platform::Linux => Some(BackendKind::Alsa),
            Platform::Other => None,
        }
    }
}

/// What the caller wants opened.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenParams {
    pub device: DeviceSelector,
    pub samplerate: u32,
    pub blocksize: u32,
    pub mode: AudioDeviceMode,
}

impl OpenParams {
    pub fn new(device: DeviceSelector, samplerate: u32, blocksize: u32, mode: AudioDeviceMode) -> Self {
        Self {
            device,
            samplerate,
            blocksize,
            mode,
        }
    }

    pub(crate) fn request(&self, device: DeviceSelector, share: ShareMode) -> StreamRequest {
        StreamRequest {
            device,
            samplerate: self.samplerate,
            blocksize: self.blocksize,
            channels: CAPTURE_CHANNELS,
            share,
        }
    }
}

/// A started stream plus the settings it actually runs with, which may
/// differ from the request after fallback.
#[derive(Debug)]
pub struct OpenedStream {
    pub guard: StreamGuard,
    pub backend: BackendKind,
    pub device: DeviceSelector,
    /// `None` for backends without a share-mode concept.
    pub share: Option<ShareMode>,
    pub samplerate: u32,
    pub blocksize: u32,
}

impl OpenedStream {
    pub fn mode_label(&self) -> &'static str {
        self.share.map(ShareMode::label).unwrap_or("n/a")
    }

    pub fn close(self) {
        self.guard.close();
    }
}

/// Collects every failed combination for the aggregated error.
pub(crate) struct Attempts {
    kind: BackendKind,
    list: Vec<OpenAttempt>,
}

impl Attempts {
    pub(crate) fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            list: Vec::new(),
        }
    }

    pub(crate) fn record(
        &mut self,
        request: &StreamRequest,
        share: Option<ShareMode>,
        err: &anyhow::Error,
    ) {
        let mode = share.map(ShareMode::label).unwrap_or("n/a");
        tracing::debug!(
            backend = self.kind.name(),
            device = %request.device,
            mode,
            sr = request.samplerate,
            bs = request.blocksize,
            "open attempt failed: {err:#}"
        );
        self.list.push(OpenAttempt {
            device: request.device.to_string(),
            mode: mode.to_string(),
            samplerate: request.samplerate,
            blocksize: request.blocksize,
            error: format!("{err:#}"),
        });
    }

    pub(crate) fn into_error(self) -> AudioError {
        AudioError::OpenFailed {
            backend: self.kind.name(),
            attempts: self.list,
        }
    }
}

/// A connected backend: its kind and the host it drives.
#[derive(Clone)]
pub struct Backend {
    kind: BackendKind,
    host: Arc<dyn AudioHost>,
}

impl Backend {
    pub fn new(kind: BackendKind, host: Arc<dyn AudioHost>) -> Self {
        Self { kind, host }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }

    pub fn matches_hostapi(&self, info: &HostApiInfo) -> bool {
        self.kind.matches_hostapi(info)
    }

    pub fn host(&self) -> &dyn AudioHost {
        self.host.as_ref()
    }

    pub(crate) fn shared_host(&self) -> Arc<dyn AudioHost> {
        Arc::clone(&self.host)
    }

    /// Open a running stream using this backend's retry policy.
    pub fn open(&self, params: &OpenParams, callbacks: StreamCallbacks) -> Result<OpenedStream, AudioError> {
        match self.kind {
            BackendKind::Wasapi => wasapi::open(self, params, callbacks),
            BackendKind::Alsa => alsa::open(self, params, callbacks),
            BackendKind::CoreAudio => coreaudio::open(self, params, callbacks),
        }
    }

    pub(crate) fn opened(
        &self,
        stream: Box<dyn InputStream>,
        request: &StreamRequest,
        share: Option<ShareMode>,
    ) -> OpenedStream {
        OpenedStream {
            guard: StreamGuard::new(stream, format!("{} {}", self.name(), request.device)),
            backend: self.kind,
            device: request.device.clone(),
            share,
            samplerate: request.samplerate,
            blocksize: request.blocksize,
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("kind", &self.kind)
            .field("priority", &self.priority())
            .field("hostapi", &self.host.hostapi().name)
            .finish()
    }
}

/// Connects a backend kind to a concrete host.
pub trait HostProvider: Send + Sync {
    fn connect(&self, kind: BackendKind) -> Result<Arc<dyn AudioHost>>;
}

/// Connects kinds to the cpal host APIs compiled into this build.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHostProvider;

impl HostProvider for CpalHostProvider {
    fn connect(&self, kind: BackendKind) -> Result<Arc<dyn AudioHost>> {
        let host = CpalHost::find(|api| kind.matches_hostapi(api))?;
        Ok(Arc::new(host))
    }
}

/// Serves a fixed set of hosts, e.g. simulated ones.
#[derive(Default, Clone)]
pub struct FixedHostProvider {
    hosts: Vec<(BackendKind, Arc<dyn AudioHost>)>,
}

impl FixedHostProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: BackendKind, host: Arc<dyn AudioHost>) -> Self {
        self.hosts.push((kind, host));
        self
    }
}

impl HostProvider for FixedHostProvider {
    fn connect(&self, kind: BackendKind) -> Result<Arc<dyn AudioHost>> {
        self.hosts
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, host)| Arc::clone(host))
            .ok_or_else(|| anyhow!("{kind} host not provided"))
    }
}

/// Owns the set of usable backends.
///
/// Discovery runs once, on first use, and again only on [`rescan`]. Readers
/// take the fast path through the `RwLock`; concurrent first callers
/// serialize on the scan mutex and re-check before connecting anything.
///
/// [`rescan`]: BackendRegistry::rescan
pub struct BackendRegistry {
    provider: Box<dyn HostProvider>,
    loaded: RwLock<Option<Arc<Vec<Backend>>>>,
    scan: Mutex<()>,
    scans: AtomicUsize,
}

impl BackendRegistry {
    pub fn new(provider: impl HostProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            loaded: RwLock::new(None),
            scan: Mutex::new(()),
            scans: AtomicUsize::new(0),
        }
    }

    /// Registry over the host APIs cpal exposes on this machine.
    pub fn cpal() -> Self {
        Self::new(CpalHostProvider)
    }

    /// Connected backends, highest priority first.
    pub fn discover(&self) -> Arc<Vec<Backend>> {
        if let Some(backends) = read_or_recover(&self.loaded, "backend registry").as_ref() {
            return Arc::clone(backends);
        }
        let _scan = lock_or_recover(&self.scan, "backend scan");
        if let Some(backends) = read_or_recover(&self.loaded, "backend registry").as_ref() {
            return Arc::clone(backends);
        }
        self.load()
    }

    /// Drop the cached set and connect everything again.
    pub fn rescan(&self) -> Arc<Vec<Backend>> {
        let _scan = lock_or_recover(&self.scan, "backend scan");
        write_or_recover(&self.loaded, "backend registry").take();
        tracing::debug!("rescanning audio backends");
        self.load()
    }

    /// How many times discovery actually ran.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    fn load(&self) -> Arc<Vec<Backend>> {
        let mut backends = Vec::new();
        for kind in BackendKind::ALL {
            match self.provider.connect(kind) {
                Ok(host) => backends.push(Backend::new(kind, host)),
                Err(err) => tracing::debug!(backend = kind.name(), "backend skipped: {err:#}"),
            }
        }
        backends.sort_by(|a, b| b.priority().cmp(&a.priority()));
        let names: Vec<&str> = backends.iter().map(Backend::name).collect();
        tracing::debug!(count = backends.len(), ?names, "audio backends loaded");
        self.scans.fetch_add(1, Ordering::SeqCst);

        let backends = Arc::new(backends);
        *write_or_recover(&self.loaded, "backend registry") = Some(Arc::clone(&backends));
        backends
    }

    /// Pick a backend: a case-insensitive substring of `preferred_name`
    /// wins, then the platform's native API, then the highest priority.
    pub fn select(
        &self,
        platform: Option<Platform>,
        preferred_name: Option<&str>,
    ) -> Result<Backend, AudioError> {
        let backends = self.discover();
        if backends.is_empty() {
            return Err(AudioError::NoBackends);
        }

        if let Some(preferred) = preferred_name.map(str::trim).filter(|p| !p.is_empty()) {
            let preferred = preferred.to_lowercase();
            if let Some(backend) = backends
                .iter()
                .find(|b| b.name().to_lowercase().contains(&preferred))
            {
                tracing::debug!(backend = backend.name(), "selected preferred backend");
                return Ok(backend.clone());
            }
            tracing::debug!(preferred = %preferred, "preferred backend not loaded");
        }

        let platform = platform.unwrap_or_else(Platform::current);
        if let Some(kind) = platform.preferred_backend() {
            if let Some(backend) = backends.iter().find(|b| b.kind() == kind) {
                tracing::debug!(backend = backend.name(), ?platform, "selected platform backend");
                return Ok(backend.clone());
            }
        }

        let fallback = &backends[0];
        tracing::warn!(
            ?platform,
            backend = fallback.name(),
            "no platform match; using highest priority backend"
        );
        Ok(fallback.clone())
    }

    pub fn get(&self, kind: BackendKind) -> Option<Backend> {
        self.discover().iter().find(|b| b.kind() == kind).cloned()
    }
}
