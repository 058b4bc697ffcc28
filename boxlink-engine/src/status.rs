//! Integer status codes returned across the host boundary
//!
//! `0` is success. Failures are negative and their meaning depends on the
//! operation; [`code`] is the single place where errors are mapped.

use crate::error::{Error, Result};

pub const OK: i32 = 0;

/// Unexpected failure not covered by an operation's own codes
pub const INTERNAL: i32 = -99;

pub mod start {
    pub const ALREADY_RUNNING: i32 = -1;
    pub const PARSE_FAILED: i32 = -2;
    pub const CONSTRUCT_FAILED: i32 = -3;
    pub const ENGINE_START_FAILED: i32 = -4;
}

pub mod stop {
    pub const NOT_RUNNING: i32 = -1;
    pub const CLOSE_FAILED: i32 = -2;
}

/// Shared by reload and replace
pub mod restart {
    pub const NOT_RUNNING: i32 = -1;
    pub const MERGE_FAILED: i32 = -2;
    pub const RESTART_FAILED: i32 = -3;
    /// replace only: no configuration text was given
    pub const INVALID_ARGUMENT: i32 = -4;
}

pub mod add_rule {
    pub const NOT_RUNNING: i32 = -1;
    pub const INVALID_RULE: i32 = -2;
}

pub mod remove_rule {
    pub const NOT_RUNNING: i32 = -1;
    pub const NOT_FOUND: i32 = -2;
    pub const INVALID_RULE: i32 = -3;
}

pub mod test_config {
    pub const INVALID: i32 = -1;
}

pub mod probe {
    pub const FAILED: i32 = -1;
    pub const INVALID_ARGUMENT: i32 = -2;
}

/// Host-visible operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Start,
    Stop,
    Reload,
    Replace,
    AddRule,
    RemoveRule,
    ClearRules,
    TestConfig,
    Cleanup,
    Probe,
}

/// Status code for the outcome of `op`
pub fn code<T>(op: Operation, result: &Result<T>) -> i32 {
    match result {
        Ok(_) => OK,
        Err(err) => error_code(op, err),
    }
}

/// Status code for a failed `op`
pub fn error_code(op: Operation, err: &Error) -> i32 {
    match (op, err) {
        (Operation::Start, Error::AlreadyRunning) => start::ALREADY_RUNNING,
        (Operation::Start, Error::Parse(_)) => start::PARSE_FAILED,
        (Operation::Start, Error::Construct(_)) => start::CONSTRUCT_FAILED,
        (Operation::Start, Error::Start(_)) => start::ENGINE_START_FAILED,

        (Operation::Stop, Error::NotRunning) => stop::NOT_RUNNING,
        (Operation::Stop, Error::Close(_)) => stop::CLOSE_FAILED,

        (Operation::Reload | Operation::Replace, Error::NotRunning) => restart::NOT_RUNNING,
        (Operation::Reload | Operation::Replace, Error::Merge(_)) => restart::MERGE_FAILED,
        (Operation::Reload | Operation::Replace, Error::Restart(_)) => restart::RESTART_FAILED,
        (Operation::Replace, Error::InvalidArgument(_)) => restart::INVALID_ARGUMENT,

        (Operation::AddRule, Error::NotRunning) => add_rule::NOT_RUNNING,
        (Operation::AddRule, Error::InvalidRule(_)) => add_rule::INVALID_RULE,

        (Operation::RemoveRule, Error::NotRunning) => remove_rule::NOT_RUNNING,
        (Operation::RemoveRule, Error::RuleNotFound) => remove_rule::NOT_FOUND,
        (Operation::RemoveRule, Error::InvalidRule(_)) => remove_rule::INVALID_RULE,

        (Operation::TestConfig, _) => test_config::INVALID,

        (Operation::Probe, Error::Probe { .. } | Error::ProbeCancelled(_)) => probe::FAILED,
        (Operation::Probe, Error::InvalidArgument(_)) => probe::INVALID_ARGUMENT,

        _ => INTERNAL,
    }
}
