//! # Node Configuration and TOML File Loading
//!
//! This module contains the node configuration structure. Loading goes through
//! [`toml_config::TomlConfig`], see [`Config::load_toml_file`].

use crate::roster::{HostDetails, Member};
use serde::Deserialize;
use std::{fmt::Display, time::Duration};
use toml_config::{Error, TomlConfig};

pub const DEFAULT_GROUP_NAME: &str = "Network Link Simulator Group";

#[derive(Deserialize, Debug)]
struct MeFile {
    ip: String,
    port: u16,
    name: String,
    platform: String,
    os_version: String,
    host_description: String,
    #[serde(default)]
    api_version: String,
}

#[derive(Deserialize, Debug)]
pub struct ConfigFile {
    me: MeFile,
    bootstrap: Option<Peer>,
    heartbeat_interval_ms: u64,
    request_timeout_ms: Option<u64>,
    #[serde(default)]
    log_heartbeats: bool,
    group_name: Option<String>,
}

/// Address of a remote node
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Node configuration
///
/// Use [`Config::load_toml_file`] to initialize.
#[derive(Debug, Clone)]
pub struct Config {
    /// Self-description announced to the group
    pub me: Member,
    /// Peer to join on start, `None` runs the node standalone
    pub bootstrap: Option<Peer>,
    pub heartbeat_interval: Duration,
    /// Timeout of every outgoing request
    pub request_timeout: Duration,
    pub log_heartbeats: bool,
    /// Name of the group a standalone node creates
    pub group_name: String,
}

impl TryFrom<ConfigFile> for Config {
    type Error = Error;

    /// Rejects a zero heartbeat interval or request timeout
    fn try_from(
        ConfigFile {
            me,
            bootstrap,
            heartbeat_interval_ms,
            request_timeout_ms,
            log_heartbeats,
            group_name,
        }: ConfigFile,
    ) -> Result<Self, Error> {
        let request_timeout_ms = request_timeout_ms.unwrap_or(heartbeat_interval_ms);
        if heartbeat_interval_ms == 0 {
            return Err(Error::Invalid("heartbeat_interval_ms must not be 0".into()));
        }
        if request_timeout_ms == 0 {
            return Err(Error::Invalid("request_timeout_ms must not be 0".into()));
        }

        let details = HostDetails {
            platform: me.platform,
            os_version: me.os_version,
            host_description: me.host_description,
            api_version: me.api_version,
        };
        Ok(Self {
            me: Member::full(me.ip, me.port, me.name, details),
            bootstrap,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            log_heartbeats,
            group_name: group_name.unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string()),
        })
    }
}

impl TomlConfig<ConfigFile> for Config {}

impl Config {
    /// Address the HTTP server listens on
    #[must_use]
    pub fn listen_address(&self) -> Peer {
        Peer::new(self.me.ip.clone(), self.me.port)
    }
}
