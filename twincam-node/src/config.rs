//! Configuration for the pair node.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use twincam_core::{PairConfig, PairError, PairRole};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Which side of the rig this node plays and where its peer is.
    pub network: NetworkConfig,
    /// Session tunables.
    pub pair: PairConfig,
    /// Synthetic camera output.
    pub camera: CameraConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// "primary" dials `address`; "secondary" listens on it.
    pub role: PairRole,
    pub address: String,
    /// Pause before pairing again after a failed attempt, in milliseconds.
    pub retry_delay_ms: u64,
}

/// Sizes of the synthetic frames a node sends in place of real camera
/// output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub preview_frame_bytes: usize,
    pub captured_image_bytes: usize,
    /// Primary only: pull preview frames continuously.
    pub preview_pump: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            role: PairRole::Secondary,
            address: "127.0.0.1:7440".into(),
            retry_delay_ms: 1_000,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            preview_frame_bytes: 32 * 1024,
            captured_image_bytes: 2 * 1024 * 1024,
            preview_pump: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// The peer address, parsed.
    pub fn socket_addr(&self) -> Result<SocketAddr, PairError> {
        self.network
            .address
            .parse()
            .map_err(|e| PairError::Config(format!("address {:?}: {e}", self.network.address)))
    }

    pub fn validate(&self) -> Result<(), PairError> {
        self.pair.validate()?;
        self.socket_addr()?;
        if self.camera.captured_image_bytes > twincam_core::MAX_PAYLOAD_SIZE {
            return Err(PairError::Config(format!(
                "captured_image_bytes exceeds the {} byte frame limit",
                twincam_core::MAX_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
