//! C ABI for the boxlink controller
//!
//! The library keeps one process-wide [`Controller`], created on the first
//! call. Every command returns `0` on success or the negative code listed in
//! [`boxlink_engine::status`]; `-99` means the controller could not be set up
//! or the command panicked.
//!
//! Strings returned by the library are owned by the caller and must be
//! released with [`boxlink_free_string`].
//!
//! A Rust host that links a real engine calls [`install`] before anything
//! else. Without it the controller runs an unlinked engine that validates
//! configuration but refuses to construct.
//!
//! Settings are read from the TOML file named by `BOXLINK_SETTINGS`, if set.
//!
//! The first command also installs a process logger so lines logged while no
//! receiver is registered stay visible: logcat on Android, stderr elsewhere
//! (filtered by `RUST_LOG`). A logger the host installed first is kept.

#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)]

pub mod string;

use std::os::raw::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use boxlink_engine::status::{self, Operation};
use boxlink_engine::{
    Controller, EngineFactory, LogReceiver, ProbeTarget, Settings, UnlinkedEngine,
};

/// Environment variable naming a TOML settings file
pub const SETTINGS_ENV: &str = "BOXLINK_SETTINGS";

/// Host log callback. `message` is only valid during the call.
pub type BoxlinkLogCallback = extern "C" fn(message: *const c_char, context: *mut c_void);

static FACTORY: OnceCell<Arc<dyn EngineFactory>> = OnceCell::new();
static CONTROLLER: OnceCell<Controller> = OnceCell::new();
static SETUP_ERROR: Mutex<String> = parking_lot::const_mutex(String::new());

/// Link the engine backend.
///
/// Returns false once a backend is installed or the controller exists.
pub fn install(factory: Arc<dyn EngineFactory>) -> bool {
    if CONTROLLER.get().is_some() {
        log::warn!("engine backend installed after first command, ignoring");
        return false;
    }
    FACTORY.set(factory).is_ok()
}

fn settings() -> boxlink_engine::Result<Settings> {
    match std::env::var_os(SETTINGS_ENV) {
        Some(path) => Settings::load(path),
        None => Ok(Settings::default()),
    }
}

fn init_logging() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("boxlink"),
    );

    #[cfg(not(target_os = "android"))]
    {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

fn controller() -> Option<&'static Controller> {
    let result = CONTROLLER.get_or_try_init(|| {
        init_logging();
        let factory = FACTORY
            .get_or_init(|| Arc::new(UnlinkedEngine::default()) as Arc<dyn EngineFactory>)
            .clone();
        Controller::builder(factory).settings(settings()?).build()
    });
    match result {
        Ok(controller) => Some(controller),
        Err(err) => {
            log::error!("controller setup failed: {}", err);
            *SETUP_ERROR.lock() = format!("setup: {}", err);
            None
        }
    }
}

fn guarded(name: &'static str, command: impl FnOnce(&Controller) -> i32) -> i32 {
    let Some(controller) = controller() else {
        return status::INTERNAL;
    };
    match catch_unwind(AssertUnwindSafe(|| command(controller))) {
        Ok(code) => code,
        Err(_) => {
            log::error!("{} panicked", name);
            status::INTERNAL
        }
    }
}

#[no_mangle]
pub extern "C" fn boxlink_init() -> i32 {
    guarded("init", |controller| {
        controller.init();
        status::OK
    })
}

#[no_mangle]
pub unsafe extern "C" fn boxlink_start(config: *const c_char) -> i32 {
    let config = unsafe { string::borrow(config) }.unwrap_or_default();
    guarded("start", |controller| {
        status::code(Operation::Start, &controller.start(config))
    })
}

/// Start with a tunnel the host opened. The descriptor stays owned by the
/// host; a negative value means none.
#[no_mangle]
pub unsafe extern "C" fn boxlink_start_with_tun_fd(config: *const c_char, fd: i32) -> i32 {
    let config = unsafe { string::borrow(config) }.unwrap_or_default();
    guarded("start_with_tun_fd", |controller| {
        status::code(
            Operation::Start,
            &controller.start_with_tunnel_descriptor(config, fd),
        )
    })
}

#[no_mangle]
pub extern "C" fn boxlink_stop() -> i32 {
    guarded("stop", |controller| {
        status::code(Operation::Stop, &controller.stop())
    })
}

#[no_mangle]
pub extern "C" fn boxlink_reload() -> i32 {
    guarded("reload", |controller| {
        status::code(Operation::Reload, &controller.reload())
    })
}

#[no_mangle]
pub unsafe extern "C" fn boxlink_replace(config: *const c_char) -> i32 {
    let config = unsafe { string::borrow(config) };
    guarded("replace", |controller| {
        status::code(Operation::Replace, &controller.replace(config))
    })
}

#[no_mangle]
pub unsafe extern "C" fn boxlink_add_rule(rule: *const c_char) -> i32 {
    let rule = unsafe { string::borrow(rule) }.unwrap_or_default();
    guarded("add_rule", |controller| {
        status::code(Operation::AddRule, &controller.add_rule(rule))
    })
}

#[no_mangle]
pub unsafe extern "C" fn boxlink_remove_rule(rule: *const c_char) -> i32 {
    let rule = unsafe { string::borrow(rule) }.unwrap_or_default();
    guarded("remove_rule", |controller| {
        status::code(Operation::RemoveRule, &controller.remove_rule(rule))
    })
}

#[no_mangle]
pub extern "C" fn boxlink_clear_rules() -> i32 {
    guarded("clear_rules", |controller| {
        controller.clear_rules();
        status::OK
    })
}

/// 1 while an engine is running, 0 otherwise
#[no_mangle]
pub extern "C" fn boxlink_is_running() -> i32 {
    CONTROLLER
        .get()
        .map_or(0, |controller| i32::from(controller.is_running()))
}

#[no_mangle]
pub unsafe extern "C" fn boxlink_test_config(config: *const c_char) -> i32 {
    let config = unsafe { string::borrow(config) }.unwrap_or_default();
    guarded("test_config", |controller| {
        status::code(Operation::TestConfig, &controller.test_config(config))
    })
}

#[no_mangle]
pub extern "C" fn boxlink_cleanup() {
    if let Some(controller) = CONTROLLER.get() {
        if catch_unwind(AssertUnwindSafe(|| controller.cleanup())).is_err() {
            log::error!("cleanup panicked");
        }
    }
    SETUP_ERROR.lock().clear();
}

/// Message of the last failure, empty when the last command succeeded
#[no_mangle]
pub extern "C" fn boxlink_last_error() -> *mut c_char {
    let message = match CONTROLLER.get() {
        Some(controller) => controller.last_error(),
        None => SETUP_ERROR.lock().clone(),
    };
    string::into_raw(message)
}

#[no_mangle]
pub unsafe extern "C" fn boxlink_free_string(ptr: *mut c_char) {
    unsafe { string::release(ptr) }
}

#[no_mangle]
pub extern "C" fn boxlink_version() -> *mut c_char {
    match controller() {
        Some(controller) => string::into_raw(controller.version()),
        None => string::into_raw(format!("boxlink v{}", env!("CARGO_PKG_VERSION"))),
    }
}

#[derive(Clone, Copy)]
struct HostContext(*mut c_void);

// the host promises the context may be used from any thread
unsafe impl Send for HostContext {}
unsafe impl Sync for HostContext {}

impl HostContext {
    fn get(self) -> *mut c_void {
        self.0
    }
}

/// Register the host log callback, or clear it with a null callback.
///
/// Returns 1 when registered, 0 when the platform ignores log callbacks.
#[no_mangle]
pub extern "C" fn boxlink_register_log_receiver(
    callback: Option<BoxlinkLogCallback>,
    context: *mut c_void,
) -> i32 {
    let context = HostContext(context);
    let receiver = callback.map(|callback| {
        Arc::new(move |line: &str| {
            let raw = string::into_raw(line);
            if !raw.is_null() {
                callback(raw, context.get());
                unsafe { string::release(raw) };
            }
        }) as LogReceiver
    });
    guarded("register_log_receiver", |controller| {
        i32::from(controller.register_log_receiver(receiver))
    })
}

unsafe fn probe_target(
    host: *const c_char,
    port: i32,
    sni: *const c_char,
    insecure: i32,
    alpn: *const c_char,
    timeout_ms: i64,
) -> ProbeTarget {
    let host = unsafe { string::borrow(host) }.unwrap_or_default();
    let mut target = ProbeTarget::new(host, u16::try_from(port).unwrap_or(0))
        .insecure(insecure != 0)
        .with_timeout(Duration::from_millis(u64::try_from(timeout_ms).unwrap_or(0)));
    if let Some(sni) = unsafe { string::borrow(sni) }.filter(|s| !s.is_empty()) {
        target = target.with_sni(sni);
    }
    if let Some(alpn) = unsafe { string::borrow(alpn) } {
        target = target.with_alpn_csv(alpn);
    }
    target
}

/// TLS handshake probe. `alpn` is a comma separated list and may be null; a
/// `timeout_ms` of zero or less uses the default deadline.
#[no_mangle]
pub unsafe extern "C" fn boxlink_probe_tls(
    host: *const c_char,
    port: i32,
    sni: *const c_char,
    insecure: i32,
    alpn: *const c_char,
    timeout_ms: i64,
) -> i32 {
    let target = unsafe { probe_target(host, port, sni, insecure, alpn, timeout_ms) };
    guarded("probe_tls", |controller| {
        status::code(Operation::Probe, &controller.probe_tls(&target))
    })
}

/// QUIC handshake probe. A null or empty `alpn` offers the default list.
#[no_mangle]
pub unsafe extern "C" fn boxlink_probe_quic(
    host: *const c_char,
    port: i32,
    sni: *const c_char,
    insecure: i32,
    alpn: *const c_char,
    timeout_ms: i64,
) -> i32 {
    let target = unsafe { probe_target(host, port, sni, insecure, alpn, timeout_ms) };
    guarded("probe_quic", |controller| {
        status::code(Operation::Probe, &controller.probe_quic(&target))
    })
}
