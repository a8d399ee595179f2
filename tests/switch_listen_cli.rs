use std::process::{Command, Output, Stdio};

fn combined_output(output: &Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn switch_listen_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_switch-listen").expect("switch-listen test binary not built")
}

fn run(args: &[&str]) -> Output {
    Command::new(switch_listen_bin())
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("run switch-listen")
}

#[test]
fn help_mentions_switch_presses() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("accessibility-switch"));
    assert!(combined.contains("--device-mode"));
}

#[test]
fn simulated_devices_are_listed_with_default_marker() {
    let output = run(&["--simulate", "1", "--list-input-devices"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available audio input devices:"));
    assert!(stdout.contains("Simulated Switch (default)"));
    assert!(stdout.contains("Simulated Headset"));
}

#[test]
fn simulated_backends_are_listed() {
    let output = run(&["--simulate", "1", "--list-backends"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Available audio backends:"));
}

#[test]
fn check_device_reports_ok_on_simulated_switch() {
    let output = run(&["--simulate", "1", "--check-device"]);
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("default (auto): ok"));
}

#[test]
fn simulated_session_prints_each_press_and_a_summary() {
    let output = run(&["--simulate", "3"]);
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let presses = stdout.lines().filter(|line| line.starts_with("press #")).count();
    assert_eq!(presses, 3);
    assert!(stdout.contains("3 presses over"));
}

#[test]
fn json_output_is_one_object_per_line() {
    let output = run(&["--simulate", "2", "--json"]);
    assert!(output.status.success(), "{}", combined_output(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["event"], "press");
    assert_eq!(events[1]["press"], 2);
    assert_eq!(events[2]["event"], "summary");
    assert_eq!(events[2]["report"]["presses"], 2);
}

#[test]
fn invalid_settings_are_rejected() {
    let output = run(&["--samplerate", "100"]);
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("--samplerate"));

    let output = run(&["--upper-offset=-0.6", "--lower-offset=-0.5"]);
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("lower < upper < 0"));
}
