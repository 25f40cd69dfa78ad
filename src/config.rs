//! Client configuration.
//!
//! Every field has a default matching a stock connector deployment, so an
//! empty file (or no file at all) is a valid configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::wire::message::TargetByteOrder;

/// Where the daemon and the logging service listen, and how to talk to them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Unix socket of the connector's control channel.
    pub control_socket: PathBuf,

    /// Log stream carrying connection lifecycle records.
    pub event_log_socket: PathBuf,

    /// Log stream carrying bitcoin message traces.
    pub message_log_socket: PathBuf,

    pub read_timeout_secs: Option<u64>,
    pub write_timeout_secs: Option<u64>,

    pub target_byte_order: TargetByteOrder,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            control_socket: PathBuf::from("/tmp/bitcoin_control"),
            event_log_socket: PathBuf::from("/tmp/logger/clients/bitcoin"),
            message_log_socket: PathBuf::from("/tmp/logger/clients/bitcoin_msg"),
            read_timeout_secs: None,
            write_timeout_secs: None,
            target_byte_order: TargetByteOrder::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Loads a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading client configuration");
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// `None` disables the timeout, as does a zero value.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }
}
