use super::*;
use crate::audio::{AudioHost, SimFailure, SimHost, SimSignal, SwitchWaveform};
use crate::backend::{BackendKind, FixedHostProvider};
use std::time::Instant;

fn listener_for(host: Arc<SimHost>, kind: BackendKind, config: ListenerConfig) -> Listener {
    let registry = BackendRegistry::new(FixedHostProvider::new().with(kind, host as Arc<dyn AudioHost>));
    Listener::new(config, Arc::new(DeviceManager::new(Arc::new(registry))))
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    (count, move || {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

fn presses(n: usize) -> Vec<f32> {
    SwitchWaveform::default().session(n)
}

fn name(n: &str) -> DeviceSelector {
    DeviceSelector::Name(n.to_string())
}

fn alsa_pair() -> Arc<SimHost> {
    Arc::new(
        SimHost::new("ALSA")
            .with_device("default", 1, 44_100)
            .with_device("USB Switch Adapter", 1, 44_100),
    )
}

#[test]
fn delivers_each_simulated_press_once() {
    let host = alsa_pair();
    host.play_on("default", None, SimSignal::new(presses(5)));
    let listener = listener_for(host, BackendKind::Alsa, ListenerConfig::default());
    let (count, on_press) = counter();

    let handle = listener.spawn(on_press).unwrap();
    wait_until("five presses", || count.load(Ordering::SeqCst) == 5);
    assert_eq!(handle.state(), ListenerState::Streaming);
    handle.stop();
    let report = handle.join().unwrap();

    assert_eq!(report.presses, 5);
    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert!(!report.fallback_used);
    assert_eq!(report.backend, "ALSA");
    assert_eq!(report.device, DeviceSelector::Default);
    assert_eq!(report.mode, "n/a");
    assert_eq!(report.samplerate, 44_100);
    assert_eq!(report.refractory_samples, 1_764);
    assert!(report.blocks > 0);
}

#[test]
fn stop_releases_the_stream() {
    let host = alsa_pair();
    let listener = listener_for(host.clone(), BackendKind::Alsa, ListenerConfig::default());
    assert_eq!(listener.state(), ListenerState::Idle);

    let handle = listener.spawn(|| {}).unwrap();
    wait_until("streaming", || handle.state() == ListenerState::Streaming);
    assert_eq!(host.live_streams(), 1);

    handle.stop();
    wait_until("session end", || handle.is_finished());
    assert_eq!(handle.state(), ListenerState::Stopped);
    let report = handle.join().unwrap();
    assert_eq!(report.presses, 0);
    assert_eq!(host.live_streams(), 0);
}

#[test]
fn dropping_the_handle_stops_the_session() {
    let host = alsa_pair();
    let listener = listener_for(host.clone(), BackendKind::Alsa, ListenerConfig::default());
    let handle = listener.spawn(|| {}).unwrap();
    wait_until("streaming", || handle.state() == ListenerState::Streaming);
    drop(handle);
    assert_eq!(host.live_streams(), 0);
}

#[test]
fn exclusive_failure_recovers_in_shared_mode_on_the_same_device() {
    let host = Arc::new(
        SimHost::new("Windows WASAPI")
            .with_device("Mic", 1, 44_100)
            .with_device("USB Switch Adapter", 1, 44_100),
    );
    host.play_on(
        "USB Switch Adapter",
        Some(ShareMode::Exclusive),
        SimSignal::new(presses(2)).then_fault("device invalidated"),
    );
    host.play_on(
        "USB Switch Adapter",
        Some(ShareMode::Shared),
        SimSignal::new(presses(3)),
    );
    let config = ListenerConfig {
        device: name("USB Switch Adapter"),
        mode: AudioDeviceMode::Exclusive,
        ..ListenerConfig::default()
    };
    let listener = listener_for(host.clone(), BackendKind::Wasapi, config);
    let (count, on_press) = counter();

    let handle = listener.spawn(on_press).unwrap();
    wait_until("five presses", || count.load(Ordering::SeqCst) == 5);
    wait_until("fallback", || handle.state() == ListenerState::StreamingAfterFallback);
    handle.stop();
    let report = handle.join().unwrap();

    assert!(report.fallback_used);
    assert_eq!(report.presses, 5);
    assert_eq!(report.device, name("USB Switch Adapter"));
    assert_eq!(report.mode, "shared");
    let last = host.open_log().pop().unwrap();
    assert_eq!(last.share, ShareMode::Shared);
    assert_eq!(last.device, name("USB Switch Adapter"));
}

#[test]
fn device_failure_switches_to_another_device() {
    let host = alsa_pair();
    host.play_on(
        "default",
        None,
        SimSignal::new(presses(1)).then_fault("device disconnected"),
    );
    host.play_on("USB Switch Adapter", None, SimSignal::new(presses(2)));
    let listener = listener_for(host.clone(), BackendKind::Alsa, ListenerConfig::default());
    let (count, on_press) = counter();

    let handle = listener.spawn(on_press).unwrap();
    wait_until("three presses", || count.load(Ordering::SeqCst) == 3);
    handle.stop();
    let report = handle.join().unwrap();

    assert!(report.fallback_used);
    assert_eq!(report.presses, 3);
    assert_eq!(report.device, name("USB Switch Adapter"));
    assert_eq!(host.live_streams(), 0);
}

#[test]
fn second_failure_ends_the_session() {
    let host = alsa_pair();
    host.play_on(
        "default",
        None,
        SimSignal::new(presses(1)).then_fault("device disconnected"),
    );
    host.play_on(
        "USB Switch Adapter",
        None,
        SimSignal::new(presses(1)).then_fault("usb unplugged"),
    );
    let listener = listener_for(host.clone(), BackendKind::Alsa, ListenerConfig::default());
    let (count, on_press) = counter();

    let handle = listener.spawn(on_press).unwrap();
    let err = handle.join().unwrap_err();
    match err {
        ListenError::Audio(AudioError::StreamLost { device, reason }) => {
            assert_eq!(device, "USB Switch Adapter");
            assert_eq!(reason, "usb unplugged");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(count.load(Ordering::SeqCst) <= 2);
    assert_eq!(host.live_streams(), 0);
}

#[test]
fn refractory_follows_the_opened_samplerate() {
    let host = Arc::new(
        SimHost::new("Windows WASAPI")
            .with_device("Mic", 1, 48_000)
            .with_strict_shared_rate(),
    );
    let config = ListenerConfig {
        mode: AudioDeviceMode::Shared,
        ..ListenerConfig::default()
    };
    let listener = listener_for(host, BackendKind::Wasapi, config);
    let handle = listener.spawn(|| {}).unwrap();
    wait_until("streaming", || handle.state() == ListenerState::Streaming);
    handle.stop();
    let report = handle.join().unwrap();
    assert_eq!(report.samplerate, 48_000);
    assert_eq!(report.refractory_samples, 1_920);
    assert_eq!(report.mode, "shared");
}

#[test]
fn invalid_offsets_fail_before_any_open() {
    let host = alsa_pair();
    let config = ListenerConfig {
        upper_offset: -0.6,
        ..ListenerConfig::default()
    };
    let listener = listener_for(host.clone(), BackendKind::Alsa, config);
    let err = listener.listen(|| {}, &StopSignal::new()).unwrap_err();
    assert!(matches!(err, ListenError::Detector(_)));
    assert_eq!(host.opens(), 0);
    assert_eq!(listener.state(), ListenerState::Stopped);
}

#[test]
fn unopenable_devices_are_reported() {
    let host = alsa_pair();
    host.fail(SimFailure::new("driver crashed"));
    let listener = listener_for(host, BackendKind::Alsa, ListenerConfig::default());
    let err = listener.listen(|| {}, &StopSignal::new()).unwrap_err();
    assert!(matches!(
        err,
        ListenError::Audio(AudioError::NoWorkingDevice { .. })
    ));
}

#[test]
fn panicking_callback_releases_the_stream() {
    let host = alsa_pair();
    host.play_on("default", None, SimSignal::new(presses(1)));
    let listener = listener_for(host.clone(), BackendKind::Alsa, ListenerConfig::default());
    let handle = listener.spawn(|| panic!("press handler failed")).unwrap();
    assert!(matches!(handle.join(), Err(ListenError::Panicked)));
    assert_eq!(host.live_streams(), 0);
}

#[test]
fn stop_signal_is_shared_between_clones() {
    let stop = StopSignal::new();
    let other = stop.clone();
    assert!(!other.is_raised());
    stop.raise();
    assert!(other.is_raised());
}

#[test]
fn platform_listener_carries_hint_and_timeout() {
    let config = ListenerConfig {
        backend: Some("alsa".to_string()),
        probe_timeout: Duration::from_millis(750),
        ..ListenerConfig::default()
    };
    let listener = Listener::with_platform_backends(config);
    assert_eq!(listener.state(), ListenerState::Idle);
    assert_eq!(listener.manager().backend_hint(), Some("alsa"));
    assert_eq!(listener.manager().probe_timeout(), Duration::from_millis(750));
    assert_eq!(listener.manager().registry().scans(), 0);
}

#[test]
fn stop_while_resolving_ends_without_opening() {
    let host = Arc::new(
        SimHost::new("ALSA")
            .with_device("default", 1, 44_100)
            .with_device("A", 1, 44_100)
            .with_device("B", 1, 44_100)
            .with_open_latency(Duration::from_millis(300)),
    );
    host.fail(SimFailure::new("driver crashed").open_only());
    let registry = BackendRegistry::new(FixedHostProvider::new().with(BackendKind::Alsa, host.clone() as Arc<dyn AudioHost>));
    let manager = DeviceManager::new(Arc::new(registry)).with_probe_timeout(Duration::from_millis(500));
    let listener = Listener::new(ListenerConfig::default(), Arc::new(manager));

    let (count, on_press) = counter();
    let started = Instant::now();
    let handle = listener.spawn(on_press).unwrap();
    wait_until("device resolution", || handle.state() == ListenerState::ResolvingDevice);
    handle.stop();

    let report = handle.join().unwrap();
    assert!(started.elapsed() < Duration::from_secs(3), "stop took {:?}", started.elapsed());
    assert_eq!(report.backend, "none");
    assert_eq!(report.presses, 0);
    assert_eq!(report.device, DeviceSelector::Default);
    assert_eq!(report.refractory_samples, 1_764);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(host.live_streams(), 0);
}
