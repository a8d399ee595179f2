//! `switch-listen`: print accessibility-switch presses detected on an audio
//! input, or inspect the devices and backends the listener would use.

mod output;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use switch_listener::audio::{AudioHost, DeviceSelector, SimHost, SimSignal, SwitchWaveform};
use switch_listener::backend::{BackendKind, BackendRegistry, FixedHostProvider, Platform};
use switch_listener::config::{AppConfig, ListenerConfig};
use switch_listener::device_manager::DeviceManager;
use switch_listener::probe;
use switch_listener::telemetry::init_tracing;
use switch_listener::{Listener, ListenerHandle};

const SIMULATED_SWITCH: &str = "Simulated Switch";
const SIMULATED_SPARE: &str = "Simulated Headset";
/// Upper bound on a simulated session when `--seconds` is not given.
const SIMULATION_LIMIT: Duration = Duration::from_secs(10);
const WAIT_POLL: Duration = Duration::from_millis(50);

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_tracing(&config);
    let listener_config = ListenerConfig::from(&config);

    let registry = match config.simulate {
        Some(presses) => simulated_registry(&listener_config, presses),
        None => BackendRegistry::cpal(),
    };
    let manager = Arc::new(
        DeviceManager::new(Arc::new(registry))
            .with_backend_hint(listener_config.backend.clone())
            .with_probe_timeout(listener_config.probe_timeout),
    );

    if config.list_backends {
        let backends = manager.registry().discover();
        println!("{}", output::render_backends(&backends, config.json));
        return Ok(());
    }
    if config.list_input_devices {
        let default_name = manager
            .device_info(&DeviceSelector::Default)
            .map(|info| info.name);
        let devices = manager.available_input_devices();
        println!(
            "{}",
            output::render_devices(&devices, default_name.as_deref(), config.json)
        );
        return Ok(());
    }
    if config.check_device {
        let check = probe::check_device_with_fallback(
            &manager,
            &listener_config.device,
            listener_config.samplerate,
            listener_config.blocksize,
            listener_config.mode,
        );
        println!("{}", output::render_check(&check, config.json));
        if !check.ok {
            bail!("input device {} did not open", check.device);
        }
        return Ok(());
    }

    let json = config.json;
    let started = Instant::now();
    let delivered = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&delivered);
    let handle = Listener::new(listener_config, manager).spawn(move || {
        let press = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("{}", output::render_press(press, started.elapsed(), json));
    })?;

    let deadline = (config.seconds > 0).then(|| started + Duration::from_secs(config.seconds));
    match config.simulate {
        Some(presses) => wait_for_presses(
            &handle,
            &delivered,
            presses as u64,
            deadline.unwrap_or(started + SIMULATION_LIMIT),
        ),
        None => {
            let input = if deadline.is_none() {
                Some(watch_stdin()?)
            } else {
                None
            };
            wait_for_stop(&handle, input.as_ref(), deadline);
        }
    }

    handle.stop();
    let report = handle.join()?;
    println!("{}", output::render_report(&report, json));
    Ok(())
}

/// A single simulated host for this platform's backend, playing `presses`
/// presses on the default device.
fn simulated_registry(config: &ListenerConfig, presses: usize) -> BackendRegistry {
    let kind = Platform::current()
        .preferred_backend()
        .unwrap_or(BackendKind::Alsa);
    let host = SimHost::new(kind.name())
        .with_device(SIMULATED_SWITCH, 1, config.samplerate)
        .with_device(SIMULATED_SPARE, 2, 48_000);
    let waveform = SwitchWaveform::new(config.samplerate);
    host.play_on(
        SIMULATED_SWITCH,
        None,
        SimSignal::new(waveform.session(presses)),
    );
    BackendRegistry::new(FixedHostProvider::new().with(kind, Arc::new(host) as Arc<dyn AudioHost>))
}

/// Fires once stdin yields a line or reaches end of input.
fn watch_stdin() -> Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            let _ = tx.send(());
        })
        .context("failed to spawn stdin watcher")?;
    Ok(rx)
}

fn wait_for_stop(handle: &ListenerHandle, input: Option<&Receiver<()>>, deadline: Option<Instant>) {
    while !handle.is_finished() {
        if deadline.is_some_and(|at| Instant::now() >= at) {
            return;
        }
        match input {
            Some(rx) => match rx.recv_timeout(WAIT_POLL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            },
            None => thread::sleep(WAIT_POLL),
        }
    }
}

fn wait_for_presses(handle: &ListenerHandle, delivered: &AtomicU64, target: u64, deadline: Instant) {
    while !handle.is_finished() && Instant::now() < deadline {
        if delivered.load(Ordering::SeqCst) >= target {
            return;
        }
        thread::sleep(WAIT_POLL);
    }
    if delivered.load(Ordering::SeqCst) < target {
        tracing::warn!(
            target,
            delivered = delivered.load(Ordering::SeqCst),
            "simulated session ended before every press was seen"
        );
    }
}
