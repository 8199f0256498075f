//! # promptloops-logging
//!
//! Logging and live progress events for the evaluation engine.
//!
//! ## Key Types
//!
//! - [`Logger`] - Structured event logging
//! - [`LogEvent`] - Log event types
//! - [`LogFormat`] - Output formats (Pretty, JSON, Compact)
//! - [`ProgressChannel`] - Best-effort broadcast of progress events
//!
//! Progress delivery is fire-and-forget: a slow or absent consumer never
//! blocks session execution.

mod events;
mod progress;

pub use events::{LogEvent, LogFormat, Logger};
pub use progress::{ProgressChannel, ProgressEvent};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(false))
                .init();
        }
        LogFormat::Pretty | LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .init();
        }
    }
}
