//! Platform adaptation through the controller
//!
//! Mobile adapters rewrite the configuration before it reaches the engine:
//! the host's tunnel descriptor is injected into the tun inbound and route
//! auto-detection is switched off. These tests run the rewrites against both
//! engine schema revisions via the mock backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;

use boxlink_config::{Schema, TunStack};
use boxlink_engine::mock::MockEngine;
use boxlink_engine::{Controller, DiagnosticsSettings, Settings};
use boxlink_platform::{adapter_for, TargetOs};

const TUN_CONFIG: &str = r#"{
    "inbounds": [
        {"type": "tun", "tag": "tun-in", "auto_route": true, "strict_route": true, "stack": "system", "mtu": 9000},
        {"type": "mixed", "tag": "mixed-in", "listen_port": 2080}
    ],
    "outbounds": [{"type": "direct", "tag": "direct"}],
    "route": {"rules": [{"domain": ["a.example"], "outbound": "direct"}], "final": "direct"}
}"#;

fn controller_with_log(mock: &Arc<MockEngine>, target: TargetOs, log: &Path) -> Controller {
    Controller::builder(mock.clone())
        .platform(adapter_for(target))
        .settings(Settings {
            diagnostics: DiagnosticsSettings {
                file_enabled: true,
                file: Some(log.to_path_buf()),
            },
            ..Settings::default()
        })
        .build()
        .unwrap()
}

fn log_path(dir: &TempDir) -> PathBuf {
    dir.path().join("diag").join("early_start.log")
}

fn read_log(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// The current schema takes the descriptor as a top-level tun field
#[test]
fn test_android_current_schema() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Android, &log);

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 42).unwrap();

    let options = mock.last_options().unwrap();
    let tun = options.tun().unwrap();
    assert_eq!(tun.file_descriptor, Some(42));
    assert!(!tun.auto_route);
    assert!(!tun.strict_route);
    assert_eq!(tun.stack, Some(TunStack::Gvisor));
    assert_eq!(tun.mtu, None);
    assert_eq!(options.inbounds[0].tag.as_deref(), Some("tun-in"));
    assert_eq!(options.document["inbounds"][0]["file_descriptor"], 42);
    assert_eq!(options.route.auto_detect_interface, Some(false));
    assert_eq!(options.route.auto_detect_interface_ipv6, Some(false));
    assert_eq!(options.route.final_outbound.as_deref(), Some("direct"));
    assert_eq!(mock.opened_descriptors(), [42]);

    let text = read_log(&log);
    assert!(text.contains("[NATIVE] injected tun fd=42 with key=file_descriptor"), "{}", text);
    assert!(text.contains("[NATIVE] disabled route auto-detect v4+v6"));
    assert!(text.contains("[NATIVE] final: tun inbound = "));
}

/// The legacy schema only takes `platform.fd` and has no IPv6 flag
#[test]
fn test_android_legacy_schema() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mock = MockEngine::with_schema(Schema::legacy());
    let controller = controller_with_log(&mock, TargetOs::Android, &log);

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 42).unwrap();

    let options = mock.last_options().unwrap();
    assert_eq!(options.tun().unwrap().file_descriptor, Some(42));
    assert_eq!(options.document["inbounds"][0]["platform"]["fd"], 42);
    assert_eq!(options.route.auto_detect_interface, Some(false));
    assert_eq!(options.route.auto_detect_interface_ipv6, None);
    assert_eq!(mock.opened_descriptors(), [42]);

    let text = read_log(&log);
    assert!(text.contains("with key=platform.fd"), "{}", text);
    assert!(text.contains("disabled route auto-detect v4 only"));
}

/// A schema with no descriptor field still starts, without injection
#[test]
fn test_android_injection_unsupported() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let schema = Schema::legacy().without_tun_platform_field("fd");
    let mock = MockEngine::with_schema(schema);
    let controller = controller_with_log(&mock, TargetOs::Android, &log);

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 42).unwrap();

    let tun = mock.last_options().unwrap().tun().cloned().unwrap();
    assert_eq!(tun.file_descriptor, None);
    assert_eq!(tun.stack, Some(TunStack::System));
    assert!(read_log(&log).contains("no schema accepted tun fd, proceed without fd injection"));
}

/// Route flags are left alone when the schema knows neither of them
#[test]
fn test_android_route_flags_unsupported() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let schema = Schema::legacy().without_route_field("auto_detect_interface");
    let mock = MockEngine::with_schema(schema);
    let controller = controller_with_log(&mock, TargetOs::Android, &log);

    controller.start(TUN_CONFIG).unwrap();

    assert_eq!(mock.last_options().unwrap().route.auto_detect_interface, None);
    assert!(read_log(&log).contains("route auto-detect flags unsupported by schema, keep original"));
}

/// A configuration without a tun inbound gets one appended
#[test]
fn test_android_appends_tun_inbound() {
    let dir = TempDir::new().unwrap();
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Android, &log_path(&dir));

    controller
        .start_with_tunnel_descriptor(r#"{"inbounds":[{"type":"mixed","tag":"mixed-in"}]}"#, 7)
        .unwrap();

    let options = mock.last_options().unwrap();
    assert_eq!(options.inbounds.len(), 2);
    assert_eq!(options.inbounds[1].kind, "tun");
    assert_eq!(options.inbounds[1].tag.as_deref(), Some("tun-in"));
    assert_eq!(mock.opened_descriptors(), [7]);
}

/// Each restart hands the same descriptor to the new instance
#[test]
fn test_restart_reuses_descriptor() {
    let dir = TempDir::new().unwrap();
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Android, &log_path(&dir));

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 42).unwrap();
    controller
        .add_rule(r#"{"domain":["r1.example"],"outbound":"direct"}"#)
        .unwrap();
    controller.reload().unwrap();

    assert_eq!(mock.opened_descriptors(), [42, 42]);
    let options = mock.last_options().unwrap();
    assert_eq!(options.tun().unwrap().file_descriptor, Some(42));
    assert_eq!(options.route.rules.len(), 2);
}

/// A negative descriptor means none: no injection, no handoff
#[test]
fn test_negative_descriptor_ignored() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Android, &log);

    controller.start_with_tunnel_descriptor(TUN_CONFIG, -1).unwrap();

    let options = mock.last_options().unwrap();
    assert_eq!(options.tun().unwrap().file_descriptor, None);
    assert_eq!(options.route.auto_detect_interface, Some(false));
    assert!(mock.opened_descriptors().is_empty());
    assert!(!read_log(&log).contains("injected tun"));
}

/// Android ignores log receivers; native, lifecycle and engine lines all
/// land in the diagnostics file
#[test]
fn test_android_log_receiver_ignored() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Android, &log);

    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    assert!(!controller.register_log_receiver(Some(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string())
    }))));

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 42).unwrap();
    assert!(lines.lock().is_empty());

    controller.stop().unwrap();
    assert!(lines.lock().is_empty());

    let text = read_log(&log);
    assert!(text.contains("[NATIVE] start phase=parse_options begin"));
    assert!(text.contains("[NATIVE] start phase=engine_start ok"));
    assert!(text.contains("[INFO] mock engine #"), "{}", text);
    assert!(text.contains("[INFO] engine started"));
    assert!(text.contains("[INFO] engine stopped"));
}

/// iOS injects the descriptor and delivers logs to a receiver
#[test]
fn test_ios_receiver_and_injection() {
    let dir = TempDir::new().unwrap();
    let log = log_path(&dir);
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Ios, &log);

    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    assert!(controller.register_log_receiver(Some(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string())
    }))));

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 5).unwrap();

    assert_eq!(mock.last_options().unwrap().tun().unwrap().file_descriptor, Some(5));
    let lines = lines.lock();
    assert!(lines.iter().any(|l| l == "[NATIVE] injected tun fd=5 with key=file_descriptor"));
    assert!(lines.iter().any(|l| l == "engine started"));
    assert!(read_log(&log).is_empty());
}

/// Desktop targets pass the configuration through untouched
#[test]
fn test_desktop_passthrough() {
    let dir = TempDir::new().unwrap();
    let mock = MockEngine::new();
    let controller = controller_with_log(&mock, TargetOs::Linux, &log_path(&dir));

    controller.start_with_tunnel_descriptor(TUN_CONFIG, 42).unwrap();

    let options = mock.last_options().unwrap();
    let tun = options.tun().unwrap();
    assert_eq!(tun.file_descriptor, None);
    assert!(tun.auto_route);
    assert_eq!(tun.stack, Some(TunStack::System));
    assert_eq!(tun.mtu, Some(9000));
    assert_eq!(options.route.auto_detect_interface, None);
    assert!(mock.opened_descriptors().is_empty());
}

/// Validation on Android sees the same rewritten text a start would
#[test]
fn test_test_config_on_android() {
    let dir = TempDir::new().unwrap();
    let mock = MockEngine::with_schema(Schema::legacy());
    let controller = controller_with_log(&mock, TargetOs::Android, &log_path(&dir));

    controller.test_config(TUN_CONFIG).unwrap();
    assert!(controller.test_config(r#"{"route":{"bogus":true}}"#).is_err());
    assert_eq!(mock.created_count(), 0);
}
