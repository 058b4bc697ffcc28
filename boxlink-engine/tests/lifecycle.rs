//! Integration tests for the lifecycle controller
//!
//! Every test drives a [`Controller`] backed by the mock engine, which records
//! constructions, starts and closes so ordering and timing can be checked.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use boxlink_engine::mock::{MockBehavior, MockEngine};
use boxlink_engine::status::{self, Operation};
use boxlink_engine::{
    Controller, DiagnosticsSettings, Error, LifecycleState, ProbeTarget, Settings,
};
use boxlink_platform::{adapter_for, TargetOs};

const BASE: &str = r#"{
    "log": {"level": "info"},
    "inbounds": [{"type": "mixed", "tag": "mixed-in", "listen_port": 2080}],
    "outbounds": [{"type": "direct", "tag": "direct"}, {"type": "block", "tag": "block"}],
    "route": {
        "rules": [{"domain": ["a.example"], "outbound": "direct"}, {"domain": ["b.example"], "outbound": "direct"}],
        "final": "direct"
    }
}"#;

const RULE_1: &str = r#"{"domain":["r1.example"],"outbound":"block"}"#;
const RULE_2: &str = r#"{"domain":["r2.example"],"outbound":"block"}"#;

fn quiet_settings() -> Settings {
    Settings {
        diagnostics: DiagnosticsSettings {
            file_enabled: false,
            file: None,
        },
        ..Settings::default()
    }
}

fn controller(mock: &Arc<MockEngine>) -> Controller {
    Controller::builder(mock.clone())
        .platform(adapter_for(TargetOs::Linux))
        .settings(quiet_settings())
        .build()
        .unwrap()
}

fn route_domains(mock: &MockEngine) -> Vec<String> {
    mock.last_options()
        .unwrap()
        .route
        .rules
        .iter()
        .map(|rule| rule["domain"][0].as_str().unwrap().to_string())
        .collect()
}

/// A successful start leaves one running instance; stop removes it
#[test]
fn test_start_stop() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    assert_eq!(controller.state(), LifecycleState::Uninitialized);

    controller.start(BASE).unwrap();
    assert!(controller.is_running());
    assert_eq!(controller.state(), LifecycleState::Running);
    assert_eq!(mock.live_instances(), 1);
    assert_eq!(controller.last_error(), "");

    controller.stop().unwrap();
    assert!(!controller.is_running());
    assert_eq!(controller.state(), LifecycleState::Idle);
    assert_eq!(mock.live_instances(), 0);
}

/// A second start is refused and leaves the first instance alone
#[test]
fn test_start_while_running() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    let result = controller.start(r#"{"route":{}}"#);
    assert!(matches!(result, Err(Error::AlreadyRunning)));
    assert_eq!(status::code(Operation::Start, &result), status::start::ALREADY_RUNNING);
    assert_eq!(mock.created_count(), 1);
    assert_eq!(mock.live_instances(), 1);
    assert!(controller.is_running());
    assert_eq!(controller.last_error(), "already running");
}

/// Commands that need an engine fail with their not-running code
#[test]
fn test_commands_require_running_engine() {
    let mock = MockEngine::new();
    let controller = controller(&mock);

    let stop = controller.stop();
    assert_eq!(status::code(Operation::Stop, &stop), status::stop::NOT_RUNNING);
    let reload = controller.reload();
    assert_eq!(status::code(Operation::Reload, &reload), status::restart::NOT_RUNNING);
    let replace = controller.replace(Some(BASE));
    assert_eq!(status::code(Operation::Replace, &replace), status::restart::NOT_RUNNING);
    let add = controller.add_rule(RULE_1);
    assert_eq!(status::code(Operation::AddRule, &add), status::add_rule::NOT_RUNNING);
    let remove = controller.remove_rule(RULE_1);
    assert_eq!(status::code(Operation::RemoveRule, &remove), status::remove_rule::NOT_RUNNING);
    assert_eq!(controller.last_error(), "not running");
    assert_eq!(mock.created_count(), 0);
}

/// Each start step maps to its own code and leaves no instance behind
#[test]
fn test_start_failures_by_step() {
    let mock = MockEngine::new();
    let controller = controller(&mock);

    let parse = controller.start(r#"{"unknown_section": {}}"#);
    assert_eq!(status::code(Operation::Start, &parse), status::start::PARSE_FAILED);
    assert!(controller.last_error().starts_with("parse options:"));

    mock.update_behavior(|b| b.fail_create = Some("bad outbound".into()));
    let construct = controller.start(BASE);
    assert_eq!(status::code(Operation::Start, &construct), status::start::CONSTRUCT_FAILED);
    assert_eq!(controller.last_error(), "create engine: bad outbound");

    mock.set_behavior(MockBehavior {
        fail_start: Some("port in use".into()),
        ..MockBehavior::default()
    });
    let start = controller.start(BASE);
    assert_eq!(status::code(Operation::Start, &start), status::start::ENGINE_START_FAILED);
    assert_eq!(controller.last_error(), "engine start: port in use");

    assert!(!controller.is_running());
    assert_eq!(controller.state(), LifecycleState::Idle);
    assert_eq!(mock.live_instances(), 0);
    assert_eq!(mock.closed_count(), 1, "partially started engine must be released");
}

/// A success after a failure clears the last error
#[test]
fn test_success_clears_last_error() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    assert!(controller.stop().is_err());
    assert!(!controller.last_error().is_empty());

    controller.start(BASE).unwrap();
    assert_eq!(controller.last_error(), "");
}

/// Reloading without rules restarts with an equivalent configuration
#[test]
fn test_reload_without_rules() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();
    let before = mock.last_options().unwrap();

    controller.reload().unwrap();
    controller.reload().unwrap();

    assert!(controller.is_running());
    assert_eq!(mock.created_count(), 3);
    assert_eq!(mock.live_instances(), 1);
    let after = mock.last_options().unwrap();
    assert_eq!(after.route, before.route);
    assert_eq!(after.inbounds, before.inbounds);
}

/// Added rules land in front of the base rules, most recent first
#[test]
fn test_reload_merges_rules_last_added_first() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    controller.add_rule(RULE_1).unwrap();
    controller.add_rule(RULE_2).unwrap();
    assert_eq!(mock.created_count(), 1, "adding rules must not restart");
    controller.reload().unwrap();

    assert_eq!(
        route_domains(&mock),
        ["r2.example", "r1.example", "a.example", "b.example"]
    );
    assert_eq!(controller.dynamic_rules(), [RULE_1, RULE_2]);

    let merged: Value = serde_json::from_str(&controller.merged_config().unwrap()).unwrap();
    assert_eq!(merged["route"]["rules"].as_array().unwrap().len(), 4);
    assert_eq!(merged["route"]["final"], "direct");
}

/// Replacing the base keeps the queued rules
#[test]
fn test_replace_keeps_rules() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();
    controller.add_rule(RULE_1).unwrap();

    let replacement = r#"{"route":{"rules":[{"domain":["c.example"],"outbound":"direct"}]}}"#;
    controller.replace(Some(replacement)).unwrap();

    assert_eq!(route_domains(&mock), ["r1.example", "c.example"]);
    assert_eq!(controller.dynamic_rules(), [RULE_1]);
    assert!(controller.is_running());
}

/// Replace without a configuration is an invalid argument
#[test]
fn test_replace_null_config() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    let result = controller.replace(None);
    assert_eq!(status::code(Operation::Replace, &result), status::restart::INVALID_ARGUMENT);
    assert_eq!(mock.created_count(), 1);
}

/// Rule documents are validated and removed by exact text
#[test]
fn test_rule_add_remove() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    let invalid = controller.add_rule("[1,2]");
    assert_eq!(status::code(Operation::AddRule, &invalid), status::add_rule::INVALID_RULE);
    let invalid = controller.add_rule("{not json");
    assert_eq!(status::code(Operation::AddRule, &invalid), status::add_rule::INVALID_RULE);

    controller.add_rule(RULE_1).unwrap();
    controller.add_rule(RULE_2).unwrap();

    let missing = controller.remove_rule(r#"{"domain":["zz.example"]}"#);
    assert_eq!(status::code(Operation::RemoveRule, &missing), status::remove_rule::NOT_FOUND);
    assert_eq!(controller.last_error(), "rule not found");

    let reformatted = r#"{ "domain": ["r1.example"], "outbound": "block" }"#;
    assert!(matches!(controller.remove_rule(reformatted), Err(Error::RuleNotFound)));

    let garbage = controller.remove_rule("nope");
    assert_eq!(status::code(Operation::RemoveRule, &garbage), status::remove_rule::INVALID_RULE);

    controller.remove_rule(RULE_1).unwrap();
    assert_eq!(controller.dynamic_rules(), [RULE_2]);
}

/// Clearing rules needs no engine and does not restart one
#[test]
fn test_clear_rules() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.clear_rules();

    controller.start(BASE).unwrap();
    controller.add_rule(RULE_1).unwrap();
    controller.clear_rules();
    assert!(controller.dynamic_rules().is_empty());
    assert_eq!(mock.created_count(), 1);

    controller.reload().unwrap();
    assert_eq!(route_domains(&mock), ["a.example", "b.example"]);
}

/// A fresh start drops the rules of the previous session
#[test]
fn test_start_resets_rules() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();
    controller.add_rule(RULE_1).unwrap();
    controller.stop().unwrap();

    controller.start(BASE).unwrap();
    assert!(controller.dynamic_rules().is_empty());
}

/// Validation agrees with the parse step of a start
#[test]
fn test_test_config_matches_start() {
    let configs = [
        BASE,
        "{}",
        r#"{"bogus": true}"#,
        r#"{"inbounds":[{"type":"tun","stack":"lwip"}]}"#,
        r#"{"route":{"rules":{}}}"#,
        "not json",
    ];

    for config in configs {
        let mock = MockEngine::new();
        let controller = controller(&mock);
        let tested = controller.test_config(config);
        let started = controller.start(config);

        let parse_failed = matches!(started, Err(Error::Parse(_)));
        assert_eq!(tested.is_ok(), !parse_failed, "config: {}", config);
        if let Err(err) = &tested {
            assert_eq!(status::error_code(Operation::TestConfig, err), status::test_config::INVALID);
        }
    }
}

/// Restarts are spaced at least the throttle interval apart
#[test]
fn test_restart_throttle() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    controller.reload().unwrap();
    controller.reload().unwrap();
    controller.replace(Some(BASE)).unwrap();

    let starts = mock.start_times();
    assert_eq!(starts.len(), 4);
    for pair in starts[1..].windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(300), "restart gap {:?}", gap);
    }
}

/// A failed restart leaves no engine but keeps configuration and rules
#[test]
fn test_failed_restart() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();
    controller.add_rule(RULE_1).unwrap();

    mock.update_behavior(|b| b.fail_start = Some("bind failed".into()));
    let result = controller.reload();
    assert_eq!(status::code(Operation::Reload, &result), status::restart::RESTART_FAILED);
    assert_eq!(controller.last_error(), "restart: engine start: bind failed");
    assert!(!controller.is_running());
    assert_eq!(mock.live_instances(), 0);
    assert_eq!(controller.dynamic_rules(), [RULE_1]);
    assert!(controller.merged_config().is_ok());

    let again = controller.reload();
    assert_eq!(status::code(Operation::Reload, &again), status::restart::NOT_RUNNING);
}

/// Only a successful restart counts towards the throttle
#[test]
fn test_failed_restart_not_throttled() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    mock.update_behavior(|b| b.fail_start = Some("bind failed".into()));
    assert!(controller.reload().is_err());

    mock.set_behavior(MockBehavior::default());
    controller.start(BASE).unwrap();
    controller.reload().unwrap();

    let starts = mock.start_times();
    assert_eq!(starts.len(), 4);
    let gap = starts[3].duration_since(starts[1]);
    assert!(gap < Duration::from_millis(300), "reload waited {:?}", gap);
}

/// Stop closes without the lock: other commands answer while the close runs,
/// and the engine sees its scope cancelled before the close begins
#[test]
fn test_commands_answer_during_slow_stop() {
    let mock = MockEngine::new();
    let controller = Arc::new(controller(&mock));
    controller.start(BASE).unwrap();
    mock.update_behavior(|b| b.close_delay = Duration::from_millis(1500));

    let stopper = {
        let controller = controller.clone();
        std::thread::spawn(move || controller.stop())
    };
    std::thread::sleep(Duration::from_millis(200));

    let began = std::time::Instant::now();
    assert!(!controller.is_running());
    assert_eq!(controller.state(), LifecycleState::Stopping);
    let _ = controller.last_error();
    let added = controller.add_rule(RULE_1);
    assert_eq!(status::code(Operation::AddRule, &added), status::add_rule::NOT_RUNNING);
    let started = controller.start(BASE);
    assert_eq!(status::code(Operation::Start, &started), status::start::ALREADY_RUNNING);
    let answered = began.elapsed();
    assert!(answered < Duration::from_millis(500), "blocked for {:?}", answered);

    stopper.join().unwrap().unwrap();
    assert_eq!(mock.close_scopes_cancelled(), [true]);
    assert_eq!(controller.state(), LifecycleState::Idle);
    assert_eq!(controller.last_error(), "");
    assert_eq!(mock.live_instances(), 0);
}

/// Cleanup cancels a probe stuck waiting for a handshake, and the
/// cancellation does not leave an error behind
#[test]
fn test_cleanup_cancels_probe() {
    // accepts TCP but never answers the client hello
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mock = MockEngine::new();
    let controller = Arc::new(controller(&mock));
    let prober = {
        let controller = controller.clone();
        std::thread::spawn(move || {
            let target = ProbeTarget::new("127.0.0.1", port)
                .with_sni("localhost")
                .with_timeout(Duration::from_secs(10));
            let began = std::time::Instant::now();
            (controller.probe_tls(&target), began.elapsed())
        })
    };
    std::thread::sleep(Duration::from_millis(200));
    controller.cleanup();

    let (result, elapsed) = prober.join().unwrap();
    let err = result.unwrap_err();
    assert!(err.is_cancelled(), "{}", err);
    assert_eq!(status::code(Operation::Probe, &Err::<(), _>(err)), status::probe::FAILED);
    assert!(elapsed < Duration::from_secs(3), "probe ran {:?}", elapsed);
    assert_eq!(controller.last_error(), "");
    drop(listener);
}

/// A failed close keeps the instance so stop can be retried
#[test]
fn test_stop_close_failure() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.start(BASE).unwrap();

    mock.update_behavior(|b| b.fail_close = Some("busy".into()));
    let result = controller.stop();
    assert_eq!(status::code(Operation::Stop, &result), status::stop::CLOSE_FAILED);
    assert!(controller.is_running());

    mock.set_behavior(MockBehavior::default());
    controller.stop().unwrap();
    assert!(!controller.is_running());
}

/// Cleanup works from any state, is idempotent and clears everything
#[test]
fn test_cleanup_any_state() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.cleanup();
    assert_eq!(controller.state(), LifecycleState::Uninitialized);

    controller.start(BASE).unwrap();
    controller.add_rule(RULE_1).unwrap();
    assert!(controller.remove_rule(RULE_2).is_err());
    assert!(!controller.last_error().is_empty());

    controller.cleanup();
    assert!(!controller.is_running());
    assert_eq!(controller.last_error(), "");
    assert!(controller.dynamic_rules().is_empty());
    assert!(matches!(controller.merged_config(), Err(Error::Merge(_))));
    assert_eq!(mock.live_instances(), 0);

    controller.cleanup();
    controller.start(BASE).unwrap();
    assert!(controller.is_running());
}

/// Cleanup cancels a start that is stuck inside the engine
#[test]
fn test_cleanup_unblocks_hanging_start() {
    let mock = MockEngine::new();
    mock.update_behavior(|b| b.start_delay = Duration::from_secs(30));
    let controller = Arc::new(controller(&mock));

    let starter = {
        let controller = controller.clone();
        std::thread::spawn(move || controller.start(BASE))
    };
    std::thread::sleep(Duration::from_millis(200));
    controller.cleanup();

    let result = starter.join().unwrap();
    let err = result.unwrap_err();
    assert!(err.is_cancelled(), "{}", err);
    assert!(!controller.is_running());
    assert_eq!(mock.live_instances(), 0);
}

/// Init is idempotent and moves out of the uninitialized state
#[test]
fn test_init() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    controller.init();
    controller.init();
    assert_eq!(controller.state(), LifecycleState::Idle);
    controller.start(BASE).unwrap();
    assert!(controller.is_running());
}

/// The version names the linked backend
#[test]
fn test_version() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    assert!(controller.version().starts_with("mock integrated v"));
}

/// Registered receivers get lifecycle messages and engine log lines
#[test]
fn test_log_receiver() {
    let mock = MockEngine::new();
    let controller = controller(&mock);
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    assert!(controller.register_log_receiver(Some(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string())
    }))));

    controller.start(BASE).unwrap();
    controller.stop().unwrap();

    let lines = lines.lock();
    assert!(lines.iter().any(|l| l == "engine started"));
    assert!(lines.iter().any(|l| l == "engine stopped"));
    assert!(lines.iter().any(|l| l.starts_with("mock engine #")));
    assert!(lines.iter().any(|l| l == "[NATIVE] start phase=parse_options begin"));
}

/// The watchdog reports progress while a start is slow
#[test]
fn test_watchdog_heartbeat_during_slow_start() {
    let mock = MockEngine::new();
    mock.update_behavior(|b| b.start_delay = Duration::from_millis(400));
    let controller = Controller::builder(mock.clone())
        .platform(adapter_for(TargetOs::Linux))
        .settings(Settings {
            watchdog_interval_ms: 50,
            ..quiet_settings()
        })
        .build()
        .unwrap();
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = lines.clone();
    controller.register_log_receiver(Some(Arc::new(move |line: &str| {
        sink.lock().push(line.to_string())
    })));

    controller.start(BASE).unwrap();
    let heartbeats: Vec<String> = lines
        .lock()
        .iter()
        .filter(|l| l.contains("watchdog elapsed="))
        .cloned()
        .collect();
    assert!(heartbeats.len() >= 3, "{:?}", heartbeats);
    assert!(heartbeats.iter().any(|l| l.ends_with("stage=engine_start")));

    std::thread::sleep(Duration::from_millis(150));
    let after = lines
        .lock()
        .iter()
        .filter(|l| l.contains("watchdog elapsed="))
        .count();
    assert_eq!(after, heartbeats.len(), "watchdog kept running after start returned");
}
