// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::MAX_PAYLOAD_SIZE_ALLOWED;

/// Runtime parameters of endpoints and sessions.
///
/// Everything has a code default matching the protocol constants, so a
/// `Config::default()` works out of the box and a YAML file only needs the
/// keys it wants to override.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Codec and buffer sizing caps.
    #[serde(default)]
    pub limits: Limits,
    /// TCP-level behavior of sessions.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Limits {
    #[serde(default = "default_max_payload", rename = "MaxPayloadSizeAllowed")]
    /// Largest primitive payload a reader will materialize.
    pub max_payload_size: usize,

    #[serde(default = "default_receive_buffer", rename = "ReceiveBufferLength")]
    /// Per-session reusable input buffer size.
    pub receive_buffer_length: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout_ms", rename = "ConnectTimeoutMs")]
    /// Client connect deadline in milliseconds.
    pub connect_timeout_ms: u64,

    #[serde(default = "default_keep_alive_time_secs", rename = "KeepAliveTimeSecs")]
    /// Idle time before TCP keep-alive probing starts.
    pub keep_alive_time_secs: u64,

    #[serde(
        default = "default_keep_alive_interval_secs",
        rename = "KeepAliveIntervalSecs"
    )]
    /// Interval between keep-alive probes.
    pub keep_alive_interval_secs: u64,

    #[serde(default = "default_nodelay", rename = "NoDelay")]
    /// Disable Nagle on accepted and connected sockets.
    pub nodelay: bool,
}

fn default_max_payload() -> usize {
    MAX_PAYLOAD_SIZE_ALLOWED
}

fn default_receive_buffer() -> usize {
    128 * 1024
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_keep_alive_time_secs() -> u64 {
    14 * 60
}

fn default_keep_alive_interval_secs() -> u64 {
    7 * 60
}

fn default_nodelay() -> bool {
    true
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_payload_size: default_max_payload(),
            receive_buffer_length: default_receive_buffer(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            keep_alive_time_secs: default_keep_alive_time_secs(),
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            nodelay: default_nodelay(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        serde_yaml::from_str(&raw).with_context(|| {
            format!("Failed to parse config file: {}", path.as_ref().display())
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.connect_timeout_ms)
    }

    pub fn keep_alive_time(&self) -> Duration {
        Duration::from_secs(self.connection.keep_alive_time_secs)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.connection.keep_alive_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.limits.max_payload_size, 128 * 1024 * 1024);
        assert_eq!(cfg.limits.receive_buffer_length, 128 * 1024);
        assert_eq!(cfg.connect_timeout(), Duration::from_millis(5_000));
        assert_eq!(cfg.keep_alive_time(), Duration::from_secs(840));
        assert_eq!(cfg.keep_alive_interval(), Duration::from_secs(420));
        assert!(cfg.connection.nodelay);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: Config =
            serde_yaml::from_str("limits:\n  ReceiveBufferLength: 32768\n")
                .expect("parse");
        assert_eq!(cfg.limits.receive_buffer_length, 32 * 1024);
        assert_eq!(cfg.limits.max_payload_size, 128 * 1024 * 1024);
        assert_eq!(cfg.connection.connect_timeout_ms, 5_000);
    }
}
