//! Configuration structure
// (c) 2026 Ross Younger

use std::time::Duration;

use anyhow::{Result, ensure};
use clap::Args;
use serde::{Deserialize, Serialize};

/// Default TCP port of a node's client protocol interface
pub const DEFAULT_PORT: u16 = 9481;

/// The set of configurable options.
///
/// There is no `default()`. The hard-wired defaults are available as [`Configuration::system_default()`].
///
/// Field names are the same in configuration files and environment variables (with an `FCP_` prefix).
/// On the command line they are kebab-case; see [`ConfigurationOverrides`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Configuration {
    /// Host name or IP address of the node
    pub host: String,
    /// TCP port of the node's client interface
    pub port: u16,
    /// Connection and handshake timeout, in seconds
    pub timeout: u64,
    /// The name we announce to the node. If empty, a unique name is generated.
    ///
    /// The node allows only one connection per name; a second connection with the same name
    /// causes the first to be dropped.
    pub name: String,
    /// Logs every command and message, at debug level
    pub log_traffic: bool,
    /// Skips the node version check
    pub no_version_check: bool,
    /// The oldest node build we will talk to
    pub required_build: u32,
    /// The oldest node extension build we will talk to
    pub required_ext_build: u32,
}

impl Configuration {
    /// The names of all configurable fields
    pub const FIELD_NAMES: &'static [&'static str] = &[
        "host",
        "port",
        "timeout",
        "name",
        "log_traffic",
        "no_version_check",
        "required_build",
        "required_ext_build",
    ];

    /// Hard-wired configuration defaults
    #[must_use]
    pub fn system_default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            timeout: 1800,
            name: String::new(),
            log_traffic: false,
            no_version_check: false,
            required_build: 1373,
            required_ext_build: 29,
        }
    }

    /// The `host:port` to connect to
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Accessor for `timeout` as a [`Duration`]
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Performs additional validation checks
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.host.is_empty(), "host must not be empty");
        ensure!(self.port != 0, "port must not be 0");
        ensure!(self.timeout != 0, "timeout must not be 0");
        ensure!(
            !self.name.contains(['\n', '\r']),
            "client name must not contain a line break"
        );
        Ok(())
    }
}

/// Command-line overrides for [`Configuration`].
///
/// Each field left unset falls through to lower-priority sources.
/// Flags can only be switched on from here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize)]
pub struct ConfigurationOverrides {
    /// Host name or IP address of the node [default: 127.0.0.1]
    #[arg(long, help_heading("Connection"), value_name("host"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// TCP port of the node's client interface [default: 9481]
    #[arg(short('p'), long, help_heading("Connection"), value_name("port"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Connection and handshake timeout, in seconds [default: 1800]
    #[arg(long, help_heading("Connection"), value_name("sec"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// The name we announce to the node. If empty, a unique name is generated.
    #[arg(short('n'), long, help_heading("Connection"), value_name("name"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Logs every command and message, at debug level
    #[arg(long, help_heading("Debug"))]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub log_traffic: bool,

    /// Skips the node version check
    #[arg(long, help_heading("Debug"))]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_version_check: bool,

    /// The oldest node build we will talk to [default: 1373]
    #[arg(long, help_heading("Advanced"), value_name("build"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_build: Option<u32>,

    /// The oldest node extension build we will talk to [default: 29]
    #[arg(long, help_heading("Advanced"), value_name("build"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_ext_build: Option<u32>,
}
