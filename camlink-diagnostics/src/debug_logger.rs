//! Structured debug logging system

use camlink_core::CamLinkResult;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "camlink=info";

/// Filter used when debug logging is requested
pub const DEBUG_FILTER: &str = "camlink=debug";

/// Debug logger for structured logging
#[derive(Debug, Clone)]
pub struct DebugLogger {
    filter: String,
}

impl DebugLogger {
    /// Create new debug logger
    pub fn new() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
        }
    }

    /// Use `filter` when `RUST_LOG` is unset
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Switch between the default and debug filters
    pub fn with_debug(self, debug: bool) -> Self {
        self.with_filter(if debug { DEBUG_FILTER } else { DEFAULT_FILTER })
    }

    /// Fallback filter directive
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Install the fmt subscriber. Later calls are no-ops.
    pub fn install(&self) -> CamLinkResult<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter.as_str()));

        // A subscriber installed elsewhere (tests, host binary) wins
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .is_ok()
        {
            tracing::debug!("Logging initialised with fallback filter {}", self.filter);
        }
        Ok(())
    }

    /// Initialize logging system
    pub fn init_logging() -> CamLinkResult<()> {
        Self::new().install()
    }

    /// Initialize logging with an explicit fallback filter
    pub fn init_with_filter(filter: &str) -> CamLinkResult<()> {
        Self::new().with_filter(filter).install()
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::new()
    }
}
