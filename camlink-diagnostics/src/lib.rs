//! # CamLink Diagnostics
//!
//! Structured logging setup and the status indicator mapping consumed by the
//! surrounding UI shell.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;
pub mod status_indicator;

// Re-export main types
pub use debug_logger::DebugLogger;
pub use status_indicator::{DotColor, StatusIndicator};
