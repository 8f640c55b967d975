//! Status indicator mapping
//!
//! The UI shell shows a coloured dot and a line of text per component. This
//! is the only view of pipeline state it gets.

use camlink_core::{ConsumerStatus, ErrorReport, LifecycleState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection dot colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DotColor {
    /// Idle or finished
    Grey,
    /// Working, waiting, or degraded
    Amber,
    /// Media flowing
    Green,
    /// Failed; needs user action
    Red,
}

/// What a status indicator should display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusIndicator {
    /// Dot colour
    pub color: DotColor,
    /// Status text
    pub text: String,
    /// Most recent error, if any
    pub error: Option<ErrorReport>,
}

impl StatusIndicator {
    /// Indicator for a connection lifecycle controller
    pub fn for_lifecycle(state: LifecycleState, last_error: Option<ErrorReport>) -> Self {
        let (color, text) = match state {
            LifecycleState::Initializing => (DotColor::Amber, "Starting camera"),
            LifecycleState::Ready => (DotColor::Amber, "Waiting for viewer"),
            LifecycleState::DegradedReady => {
                (DotColor::Amber, "Waiting for viewer (recovered registration)")
            }
            LifecycleState::Streaming => (DotColor::Green, "Streaming"),
            LifecycleState::Disconnected => (DotColor::Grey, "Disconnected"),
            LifecycleState::Error => (DotColor::Red, "Connection failed"),
            LifecycleState::Closed => (DotColor::Grey, "Closed"),
        };
        Self {
            color,
            text: text.to_string(),
            error: last_error,
        }
    }

    /// Indicator for a stream consumer
    pub fn for_consumer(status: ConsumerStatus, last_error: Option<ErrorReport>) -> Self {
        let (color, text) = match status {
            ConsumerStatus::Connecting => (DotColor::Amber, "Connecting"),
            ConsumerStatus::Connected => (DotColor::Green, "Connected"),
            ConsumerStatus::Closed => (DotColor::Grey, "Stream closed"),
            ConsumerStatus::Failed => (DotColor::Red, "Connection failed"),
        };
        Self {
            color,
            text: text.to_string(),
            error: last_error,
        }
    }

    /// Check if the indicator asks for user action
    pub fn needs_attention(&self) -> bool {
        self.color == DotColor::Red
    }
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) if self.color == DotColor::Red => {
                write!(f, "{}: {}", self.text, error.message)
            }
            _ => f.write_str(&self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ErrorReport {
        ErrorReport {
            code: "MEDIA_ACQUISITION_FAILED".to_string(),
            message: "Media acquisition failed: permission denied".to_string(),
            recoverable: false,
        }
    }

    #[test]
    fn test_lifecycle_colors() {
        assert_eq!(
            StatusIndicator::for_lifecycle(LifecycleState::Streaming, None).color,
            DotColor::Green
        );
        assert_eq!(
            StatusIndicator::for_lifecycle(LifecycleState::DegradedReady, None).color,
            DotColor::Amber
        );
        let failed = StatusIndicator::for_lifecycle(LifecycleState::Error, Some(report()));
        assert!(failed.needs_attention());
        assert_eq!(
            failed.to_string(),
            "Connection failed: Media acquisition failed: permission denied"
        );
    }

    #[test]
    fn test_consumer_colors() {
        assert_eq!(
            StatusIndicator::for_consumer(ConsumerStatus::Connected, None).color,
            DotColor::Green
        );
        assert_eq!(
            StatusIndicator::for_consumer(ConsumerStatus::Closed, None).to_string(),
            "Stream closed"
        );
        assert!(StatusIndicator::for_consumer(ConsumerStatus::Failed, None).needs_attention());
    }

    #[test]
    fn test_serialization() {
        let indicator = StatusIndicator::for_consumer(ConsumerStatus::Connecting, None);
        let json = serde_json::to_string(&indicator).unwrap();
        assert!(json.contains("\"amber\""));
    }
}
