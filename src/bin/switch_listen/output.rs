use serde_json::json;
use std::fmt::Write;
use std::time::Duration;
use switch_listener::audio::InputDeviceInfo;
use switch_listener::backend::Backend;
use switch_listener::probe::DeviceCheck;
use switch_listener::SessionReport;

pub(crate) fn render_press(press: u64, elapsed: Duration, json: bool) -> String {
    if json {
        json!({
            "event": "press",
            "press": press,
            "elapsed_ms": elapsed.as_millis() as u64,
        })
        .to_string()
    } else {
        format!("press #{press} at {:.3}s", elapsed.as_secs_f64())
    }
}

pub(crate) fn render_devices(
    devices: &[InputDeviceInfo],
    default_name: Option<&str>,
    json: bool,
) -> String {
    if json {
        return json!({ "devices": devices, "default": default_name }).to_string();
    }
    if devices.is_empty() {
        return "No audio input devices detected.".to_string();
    }
    let mut out = String::from("Available audio input devices:");
    for device in devices {
        let marker = if Some(device.name.as_str()) == default_name {
            " (default)"
        } else {
            ""
        };
        let _ = write!(
            out,
            "\n  - [{}] {}{marker}: {} ch, {} Hz",
            device.index, device.name, device.max_input_channels, device.default_samplerate
        );
    }
    out
}

pub(crate) fn render_backends(backends: &[Backend], json: bool) -> String {
    if json {
        let list: Vec<_> = backends
            .iter()
            .map(|backend| {
                json!({
                    "name": backend.name(),
                    "priority": backend.priority(),
                    "hostapi": backend.host().hostapi().name,
                })
            })
            .collect();
        return json!({ "backends": list }).to_string();
    }
    if backends.is_empty() {
        return "No audio backends available.".to_string();
    }
    let mut out = String::from("Available audio backends:");
    for backend in backends {
        let _ = write!(
            out,
            "\n  - {} (priority {}, host API {})",
            backend.name(),
            backend.priority(),
            backend.host().hostapi().name
        );
    }
    out
}

pub(crate) fn render_check(check: &DeviceCheck, json: bool) -> String {
    if json {
        return json!(check).to_string();
    }
    if check.ok {
        return format!("{} ({}): ok", check.device, check.mode);
    }
    let mut out = format!(
        "{} ({}): failed: {}",
        check.device,
        check.mode,
        check.reason.as_deref().unwrap_or("unknown error")
    );
    if let Some(hint) = check.hint {
        let _ = write!(out, "\n  hint: {hint}");
    }
    match &check.alternative {
        Some(found) => {
            let _ = write!(out, "\n  would open instead: {} ({})", found.device, found.mode);
        }
        None => out.push_str("\n  no other input device opens"),
    }
    out
}

pub(crate) fn render_report(report: &SessionReport, json: bool) -> String {
    if json {
        return json!({ "event": "summary", "report": report }).to_string();
    }
    let plural = if report.presses == 1 { "" } else { "es" };
    let mut out = format!(
        "{} press{plural} over {} blocks on {} via {} ({}, {} Hz, block {})",
        report.presses,
        report.blocks,
        report.device,
        report.backend,
        report.mode,
        report.samplerate,
        report.blocksize
    );
    if report.fallback_used {
        out.push_str(", after fallback");
    }
    if report.dropped_blocks > 0 || report.dropped_events > 0 {
        let _ = write!(
            out,
            "; dropped {} blocks and {} events",
            report.dropped_blocks, report.dropped_events
        );
    }
    out
}
