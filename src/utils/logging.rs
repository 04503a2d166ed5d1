//! Module-gated logging macros.
//!
//! Sampling code runs dozens of times per second, so each module decides for
//! itself whether its routine chatter reaches the `log` facade. A module opts in
//! by declaring the gate before using the macros:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_error, log_info, log_warn};
//!
//! log_info!("collection started for {}", subject_id);
//! ```
//!
//! The gate is a plain `const`, so disabled call sites compile away entirely.

/// Debug-level logging behind the calling module's `ENABLE_LOGS` gate.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info-level logging behind the calling module's `ENABLE_LOGS` gate.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level logging behind the calling module's `ENABLE_LOGS` gate.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error-level logging behind the calling module's `ENABLE_LOGS` gate.
///
/// Errors are usually worth keeping on even in quiet modules; prefer calling
/// `log::error!` directly when a failure must never be silenced.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
