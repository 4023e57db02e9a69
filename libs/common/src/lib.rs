//! Shared infrastructure for the data collection services
//!
//! Keeps the ambient concerns (logging bootstrap, shutdown signal, time
//! formatting) out of the service crates.

pub mod logging;
pub mod shutdown;
pub mod time;

pub use logging::{init_logging, LoggingConfig, LoggingGuard};
pub use shutdown::wait_for_shutdown;
pub use time::{format_iso_millis, now_iso_millis};
