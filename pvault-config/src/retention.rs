//! The optional retention blob (`kopia.retention`), sibling of the format
//! blob: records the object-lock policy newly-written blobs should request.

use serde::{Deserialize, Serialize};

use pvault_api_types::RetentionMode;

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct RetentionConfig {
    pub mode: RetentionMode,
    /// Retention period in seconds; meaningless when `mode` is `None`.
    pub period_seconds: i64,
}

impl RetentionConfig {
    pub fn none() -> Self {
        Self {
            mode: RetentionMode::None,
            period_seconds: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.mode, RetentionMode::None)
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retention_is_inactive() {
        assert!(!RetentionConfig::default().is_active());
    }

    #[test]
    fn governance_mode_is_active() {
        let r = RetentionConfig {
            mode: RetentionMode::Governance,
            period_seconds: 3600,
        };
        assert!(r.is_active());
    }
}
