use super::defaults::{MAX_DEVICE_NAME_BYTES, MAX_LISTEN_SECONDS, MAX_SIMULATED_PRESSES};
use super::*;
use crate::audio::{AudioDeviceMode, DeviceSelector};
use clap::Parser;

#[test]
fn accepts_valid_defaults() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.samplerate, DEFAULT_SAMPLERATE);
    assert_eq!(cfg.blocksize, DEFAULT_BLOCKSIZE);
    assert_eq!(cfg.device_mode, AudioDeviceMode::Auto);
    assert_eq!(cfg.log_level, "warn");
    assert_eq!(cfg.device_selector(), DeviceSelector::Default);
}

#[test]
fn rejects_samplerate_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--samplerate", "7999"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--samplerate", "192001"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_samplerate_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--samplerate", "8000"]);
    assert!(cfg.validate().is_ok());
    let mut cfg = AppConfig::parse_from(["test-app", "--samplerate", "192000"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_blocksize_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--blocksize", "15"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--blocksize", "8193"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_debounce_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--debounce-ms", "0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--debounce-ms", "2001"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn parses_negative_offsets_with_and_without_equals() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--upper-offset",
        "-0.1",
        "--lower-offset=-0.4",
    ]);
    cfg.validate().expect("offsets should be valid");
    assert_eq!(cfg.upper_offset, -0.1);
    assert_eq!(cfg.lower_offset, -0.4);
}

#[test]
fn rejects_misordered_offsets() {
    let mut cfg = AppConfig::parse_from(["test-app", "--upper-offset=-0.5", "--lower-offset=-0.2"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--upper-offset", "0.1"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--upper-offset=-0.3", "--lower-offset=-0.3"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_probe_timeout_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--probe-timeout-ms", "99"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--probe-timeout-ms", "30001"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_listen_seconds_above_max() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    cfg.seconds = MAX_LISTEN_SECONDS + 1;
    assert!(cfg.validate().is_err());
    cfg.seconds = MAX_LISTEN_SECONDS;
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_simulated_press_count_out_of_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--simulate", "0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app"]);
    cfg.simulate = Some(MAX_SIMULATED_PRESSES + 1);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--simulate", "5"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn device_is_trimmed_and_parsed() {
    let mut cfg = AppConfig::parse_from(["test-app", "--device", "  USB Switch Adapter "]);
    cfg.validate().unwrap();
    assert_eq!(
        cfg.device_selector(),
        DeviceSelector::Name("USB Switch Adapter".to_string())
    );

    let mut cfg = AppConfig::parse_from(["test-app", "--device", "2"]);
    cfg.validate().unwrap();
    assert_eq!(cfg.device_selector(), DeviceSelector::Index(2));

    let mut cfg = AppConfig::parse_from(["test-app", "--device", "   "]);
    cfg.validate().unwrap();
    assert_eq!(cfg.device, None);
    assert_eq!(cfg.device_selector(), DeviceSelector::Default);
}

#[test]
fn rejects_device_with_control_characters_or_excess_length() {
    for bad in ["mic\nbreak", "tab\tname", "bell\u{7}"] {
        let mut cfg = AppConfig::parse_from(["test-app", "--device", bad]);
        assert!(cfg.validate().is_err(), "device {bad:?} should be rejected");
    }
    let long_name = "a".repeat(MAX_DEVICE_NAME_BYTES + 1);
    let mut cfg = AppConfig::parse_from(["test-app", "--device", &long_name]);
    assert!(cfg.validate().is_err());
    let name = "a".repeat(MAX_DEVICE_NAME_BYTES);
    let mut cfg = AppConfig::parse_from(["test-app", "--device", &name]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn backend_hint_is_normalized_and_checked() {
    let mut cfg = AppConfig::parse_from(["test-app", "--backend", " ALSA "]);
    cfg.validate().unwrap();
    assert_eq!(cfg.backend.as_deref(), Some("alsa"));

    let mut cfg = AppConfig::parse_from(["test-app", "--backend", "core"]);
    assert!(cfg.validate().is_ok());

    let mut cfg = AppConfig::parse_from(["test-app", "--backend", "jack"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn log_level_is_case_insensitive_and_checked() {
    let mut cfg = AppConfig::parse_from(["test-app", "--log-level", "DEBUG"]);
    cfg.validate().unwrap();
    assert_eq!(cfg.log_level, "debug");

    let mut cfg = AppConfig::parse_from(["test-app", "--log-level", "loud"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn device_mode_flag_parses_value_enum() {
    let cfg = AppConfig::parse_from(["test-app", "--device-mode", "exclusive"]);
    assert_eq!(cfg.device_mode, AudioDeviceMode::Exclusive);
    assert!(AppConfig::try_parse_from(["test-app", "--device-mode", "loopback"]).is_err());
}

#[test]
fn listener_config_carries_cli_values() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--samplerate",
        "48000",
        "--blocksize",
        "128",
        "--debounce-ms",
        "50",
        "--device",
        "hw:1,0",
        "--device-mode",
        "shared",
        "--backend",
        "alsa",
        "--probe-timeout-ms",
        "500",
    ]);
    cfg.validate().unwrap();
    let listener = ListenerConfig::from(&cfg);
    assert_eq!(listener.samplerate, 48_000);
    assert_eq!(listener.blocksize, 128);
    assert_eq!(listener.device, DeviceSelector::Name("hw:1,0".to_string()));
    assert_eq!(listener.mode, AudioDeviceMode::Shared);
    assert_eq!(listener.backend.as_deref(), Some("alsa"));
    assert_eq!(listener.probe_timeout, std::time::Duration::from_millis(500));
    assert_eq!(listener.refractory_samples(), 2_400);
}

#[test]
fn default_listener_config_builds_detector_params() {
    let listener = ListenerConfig::default();
    assert_eq!(listener.refractory_samples(), 1_764);
    let params = listener.detector_params().unwrap();
    assert_eq!(params.upper_offset, DEFAULT_UPPER_OFFSET);
    assert_eq!(params.refractory_samples, 1_764);

    let inverted = ListenerConfig {
        upper_offset: -0.6,
        ..ListenerConfig::default()
    };
    assert!(inverted.detector_params().is_err());
}
