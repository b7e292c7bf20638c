//! Link configuration.
//!
//! Loaded from YAML:
//!
//! ```yaml
//! listen_addr: "0.0.0.0:7766"
//! service_name: PhoneInfoAcc
//! reconnect:
//!   mode: backoff
//!   initial_ms: 250
//!   max_ms: 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Default TCP bind address.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7766";

/// Default service record name announced to accessories.
pub const DEFAULT_SERVICE_NAME: &str = "PhoneInfoAcc";

/// What to do after the accessory connection is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Start listening again straight away, every time.
    #[default]
    Immediate,
    /// Wait before listening again, doubling the wait after each loss
    /// that was not followed by a successful connection.
    Backoff {
        /// First wait in milliseconds.
        initial_ms: u64,
        /// Upper bound for the wait in milliseconds.
        max_ms: u64,
    },
}

impl ReconnectPolicy {
    /// Wait before rearming the listener after `attempt` consecutive losses
    /// (1 for the first).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            ReconnectPolicy::Immediate => Duration::ZERO,
            ReconnectPolicy::Backoff { initial_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(32);
                let ms = initial_ms.saturating_mul(1u64 << shift).min(max_ms);
                Duration::from_millis(ms)
            }
        }
    }
}

/// Configuration for the accessory link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address the TCP transport binds.
    pub listen_addr: String,
    /// Service name every listening endpoint is opened under.
    pub service_name: String,
    /// Behaviour after a lost connection.
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            reconnect: ReconnectPolicy::Immediate,
        }
    }
}

impl LinkConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> LinkResult<LinkConfig> {
        let config: LinkConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load(path: impl AsRef<Path>) -> LinkResult<LinkConfig> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    fn validate(&self) -> LinkResult<()> {
        if let ReconnectPolicy::Backoff { initial_ms, max_ms } = self.reconnect {
            if initial_ms == 0 || max_ms < initial_ms {
                return Err(LinkError::Config(format!(
                    "backoff needs 0 < initial_ms <= max_ms, got {} and {}",
                    initial_ms, max_ms
                )));
            }
        }
        Ok(())
    }
}
