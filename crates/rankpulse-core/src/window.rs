use chrono::{DateTime, Duration, Utc};

use crate::event::TimeWindow;
use crate::ConfigError;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
pub const DEFAULT_LOOKFORWARD_DAYS: i64 = 3;

/// Lookback/lookforward spans used to bound context collection around an event.
///
/// Both spans are validated non-negative at construction, so
/// [`WindowConfig::window_for`] cannot fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    lookback: Duration,
    lookforward: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            lookforward: Duration::days(DEFAULT_LOOKFORWARD_DAYS),
        }
    }
}

impl WindowConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if either span is negative.
    pub fn new(lookback: Duration, lookforward: Duration) -> Result<Self, ConfigError> {
        if lookback < Duration::zero() {
            return Err(ConfigError::Validation(format!(
                "event lookback must be non-negative, got {lookback}"
            )));
        }
        if lookforward < Duration::zero() {
            return Err(ConfigError::Validation(format!(
                "event lookforward must be non-negative, got {lookforward}"
            )));
        }
        Ok(Self {
            lookback,
            lookforward,
        })
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if either span is negative.
    pub fn from_days(lookback_days: i64, lookforward_days: i64) -> Result<Self, ConfigError> {
        let days = |n: i64| {
            Duration::try_days(n)
                .ok_or_else(|| ConfigError::Validation(format!("{n} days is out of range")))
        };
        Self::new(days(lookback_days)?, days(lookforward_days)?)
    }

    #[must_use]
    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    #[must_use]
    pub fn lookforward(&self) -> Duration {
        self.lookforward
    }

    #[must_use]
    pub fn window_for(&self, detected_at: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: detected_at - self.lookback,
            end: detected_at + self.lookforward,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn default_window_spans_seven_back_three_forward() {
        let at = Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap();
        let window = WindowConfig::default().window_for(at);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 2, 3, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2026, 2, 13, 0, 0, 0).unwrap());
        assert!(window.contains(at));
    }

    #[test]
    fn zero_spans_are_allowed() {
        let at = Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap();
        let window = WindowConfig::from_days(0, 0).unwrap().window_for(at);
        assert_eq!(window.start, at);
        assert_eq!(window.end, at);
    }

    #[test]
    fn negative_lookback_is_rejected() {
        let err = WindowConfig::from_days(-1, 3).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("lookback")));
    }

    #[test]
    fn negative_lookforward_is_rejected() {
        let err = WindowConfig::from_days(7, -2).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("lookforward")));
    }
}
