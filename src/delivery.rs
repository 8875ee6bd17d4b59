//!
//! Delivery modes, priorities and the per-send quality of service options.
//!
use crate::error::JmsError;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::time::Duration;

pub const MIN_PRIORITY: u8 = 0;
pub const MAX_PRIORITY: u8 = 9;
pub const DEFAULT_PRIORITY: u8 = 4;

/// Zero means messages never expire.
pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::ZERO;

pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::ZERO;

/// Persistence policy of a message while it is in transit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    /// At most once. The provider does not log the message to stable storage, so it may be lost
    /// on failure, but it is never delivered twice.
    NonPersistent = 1,

    /// Once and only once. The provider logs the message to stable storage as part of the send.
    #[default]
    Persistent = 2,
}

impl DeliveryMode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for DeliveryMode {
    type Error = JmsError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DeliveryMode::NonPersistent),
            2 => Ok(DeliveryMode::Persistent),
            other => Err(JmsError::generic(format!("Unknown delivery mode `{}`", other))),
        }
    }
}

/// Check that a priority falls within `MIN_PRIORITY..=MAX_PRIORITY`.
pub fn check_priority(priority: u8) -> Result<u8, JmsError> {
    if priority > MAX_PRIORITY {
        return Err(JmsError::generic(format!(
            "Priority `{}` is outside of {}..={}",
            priority, MIN_PRIORITY, MAX_PRIORITY
        )));
    }
    Ok(priority)
}

/// Quality of service of a single send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub delivery_mode: DeliveryMode,
    pub priority: u8,
    pub time_to_live: Duration,
}

impl SendOptions {
    pub fn new(delivery_mode: DeliveryMode, priority: u8, time_to_live: Duration) -> Result<Self, JmsError> {
        Ok(Self {
            delivery_mode,
            priority: check_priority(priority)?,
            time_to_live,
        })
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::default(),
            priority: DEFAULT_PRIORITY,
            time_to_live: DEFAULT_TIME_TO_LIVE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[test]
    fn test_delivery_mode_values() {
        assert_eq!(DeliveryMode::NonPersistent.as_i32(), 1);
        assert_eq!(DeliveryMode::Persistent.as_i32(), 2);
        assert_ne!(DeliveryMode::NonPersistent, DeliveryMode::Persistent);
        assert_eq!(DeliveryMode::default(), DeliveryMode::Persistent);
    }

    #[rstest]
    #[case(1, Some(DeliveryMode::NonPersistent))]
    #[case(2, Some(DeliveryMode::Persistent))]
    #[case(0, None)]
    #[case(3, None)]
    #[case(-1, None)]
    fn test_delivery_mode_from_i32(#[case] raw: i32, #[case] expected: Option<DeliveryMode>) {
        match expected {
            Some(mode) => assert_eq!(DeliveryMode::try_from(raw).ok(), Some(mode)),
            None => assert_matches!(DeliveryMode::try_from(raw), Err(e) if e.kind() == ErrorKind::Generic),
        }
    }

    #[test]
    fn test_delivery_mode_serialization() -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(&DeliveryMode::NonPersistent)?;
        assert_eq!(json, r#""NON_PERSISTENT""#);
        let mode: DeliveryMode = serde_json::from_str(r#""PERSISTENT""#)?;
        assert_eq!(mode, DeliveryMode::Persistent);
        Ok(())
    }

    #[test]
    fn test_send_options() {
        let options = SendOptions::default();
        assert_eq!(options.priority, DEFAULT_PRIORITY);
        assert_eq!(options.time_to_live, Duration::ZERO);
        assert!(SendOptions::new(DeliveryMode::NonPersistent, 9, Duration::from_secs(1)).is_ok());
        assert!(SendOptions::new(DeliveryMode::NonPersistent, 10, Duration::from_secs(1)).is_err());
    }
}
