//! Logging macros that can be silenced per module.
//!
//! The reader driver and the scan aggregator log on every tag report, which is
//! far too chatty for a long stock-take. Those modules declare a module-level
//! `ENABLE_LOGS` flag and log through these macros instead of `log::*` directly:
//!
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("reader opened at {} baud", baud);
//! ```

/// Debug-level log line, emitted only when the calling module's
/// `ENABLE_LOGS` is `true`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// Info-level counterpart of [`log_debug!`].
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Errors go through the same gate so a muted module stays muted; failures
/// that callers must see are returned, not only logged.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
