//! Tunables of a pair session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::MAX_CAPTURE_DELAY;
use crate::error::PairError;

/// Session settings, usually embedded in a host application's config
/// file under a `[pair]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairConfig {
    /// Clock round trips per synchronization run.
    #[serde(alias = "PairSyncSampleCount")]
    pub sync_sample_count: usize,
    /// Minimum gap between two preview-frame requests, in milliseconds.
    #[serde(alias = "PairedPreviewFrameDelayMs")]
    pub preview_frame_delay_ms: u64,
    /// Countdown before a synced capture, in seconds. 0 uses the
    /// measured round trip as the safety buffer instead.
    #[serde(alias = "PairedCaptureCountdown")]
    pub capture_countdown_secs: u64,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            sync_sample_count: 5,
            preview_frame_delay_ms: 100,
            capture_countdown_secs: 0,
        }
    }
}

impl PairConfig {
    pub fn validate(&self) -> Result<(), PairError> {
        if self.sync_sample_count == 0 {
            return Err(PairError::Config(
                "sync_sample_count must be at least 1".into(),
            ));
        }
        if self.capture_countdown_secs > MAX_CAPTURE_DELAY.as_secs() {
            return Err(PairError::Config(format!(
                "capture_countdown_secs must be at most {}",
                MAX_CAPTURE_DELAY.as_secs()
            )));
        }
        Ok(())
    }

    pub fn preview_interval(&self) -> Duration {
        Duration::from_millis(self.preview_frame_delay_ms)
    }

    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.capture_countdown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = PairConfig::default();
        assert_eq!(cfg.sync_sample_count, 5);
        assert_eq!(cfg.preview_interval(), Duration::from_millis(100));
        assert!(cfg.countdown().is_zero());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: PairConfig = toml::from_str("capture_countdown_secs = 3").unwrap();
        assert_eq!(cfg.countdown(), Duration::from_secs(3));
        assert_eq!(cfg.sync_sample_count, 5);
    }

    #[test]
    fn legacy_option_names_are_accepted() {
        let cfg: PairConfig = toml::from_str(
            "PairSyncSampleCount = 7\nPairedPreviewFrameDelayMs = 40\nPairedCaptureCountdown = 2",
        )
        .unwrap();
        assert_eq!(
            cfg,
            PairConfig {
                sync_sample_count: 7,
                preview_frame_delay_ms: 40,
                capture_countdown_secs: 2,
            }
        );
    }

    #[test]
    fn zero_samples_rejected() {
        let cfg = PairConfig {
            sync_sample_count: 0,
            ..PairConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PairError::Config(_))));
    }

    #[test]
    fn countdown_is_bounded() {
        let mut cfg = PairConfig {
            capture_countdown_secs: 3_600,
            ..PairConfig::default()
        };
        assert!(cfg.validate().is_ok());
        cfg.capture_countdown_secs = u64::MAX;
        assert!(matches!(cfg.validate(), Err(PairError::Config(_))));
    }

    #[test]
    fn serialize_roundtrip() {
        let cfg = PairConfig {
            capture_countdown_secs: 4,
            ..PairConfig::default()
        };
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("capture_countdown_secs = 4"));
        let back: PairConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
