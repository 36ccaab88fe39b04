// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue fill levels.
//!
//! The offline queue is capped. Nothing is ever evicted: once full, new
//! writes are rejected and the caller sees [`SyncError::QueueFull`](crate::SyncError::QueueFull).
//!
//! # Example
//!
//! ```
//! use nutrisync::QueuePressure;
//!
//! assert_eq!(QueuePressure::from_fill(10, 500, 0.8), QueuePressure::Normal);
//! assert_eq!(QueuePressure::from_fill(400, 500, 0.8), QueuePressure::Warn);
//!
//! let full = QueuePressure::from_fill(500, 500, 0.8);
//! assert_eq!(full, QueuePressure::Full);
//! assert!(!full.should_accept_writes());
//! ```

/// - **Normal**: below the warn ratio
/// - **Warn**: at or above the warn ratio, writes still accepted
/// - **Full**: at capacity, new writes rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueuePressure {
    Normal = 0,
    Warn = 1,
    Full = 2,
}

impl QueuePressure {
    #[must_use]
    pub fn from_fill(len: usize, max: usize, warn_ratio: f64) -> Self {
        if len >= max {
            return Self::Full;
        }
        match len as f64 / max as f64 {
            r if r >= warn_ratio => Self::Warn,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub fn should_accept_writes(&self) -> bool {
        !matches!(self, Self::Full)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Warn => "Warning - offline queue filling up",
            Self::Full => "Full - offline writes rejected",
        }
    }
}

impl std::fmt::Display for QueuePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        assert_eq!(QueuePressure::from_fill(0, 10, 0.8), QueuePressure::Normal);
        assert_eq!(QueuePressure::from_fill(7, 10, 0.8), QueuePressure::Normal);
        assert_eq!(QueuePressure::from_fill(8, 10, 0.8), QueuePressure::Warn);
        assert_eq!(QueuePressure::from_fill(9, 10, 0.8), QueuePressure::Warn);
        assert_eq!(QueuePressure::from_fill(10, 10, 0.8), QueuePressure::Full);
        assert_eq!(QueuePressure::from_fill(11, 10, 0.8), QueuePressure::Full);
    }

    #[test]
    fn test_zero_capacity_is_always_full() {
        assert_eq!(QueuePressure::from_fill(0, 0, 0.8), QueuePressure::Full);
    }

    #[test]
    fn test_ordering() {
        assert!(QueuePressure::Normal < QueuePressure::Warn);
        assert!(QueuePressure::Warn < QueuePressure::Full);
    }
}
