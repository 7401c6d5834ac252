//! Service configuration

use std::io::{Read, read_to_string};
use std::net::SocketAddr;
use std::time::Duration;

use chrono::TimeDelta;
use derivative::Derivative;
use serde::{Deserialize, Deserializer};
use tracing_subscriber::filter::Directive;
use url::Url;

use crate::model::profiles::Role;

/// Logging output format
#[derive(Debug, Clone, Copy, Deserialize)]
pub enum LogFormat {
    Compact,
    Pretty,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Compact
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Logging {
    /// Additional filtering directives
    #[serde(default, deserialize_with = "Logging::deserialize_filters")]
    pub filters: Vec<Directive>,

    /// Logging format
    #[serde(default)]
    pub format: LogFormat,
}

impl Logging {
    fn deserialize_filters<'de, D>(deserializer: D) -> Result<Vec<Directive>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let dirs: Vec<String> = Deserialize::deserialize(deserializer)?;
        dirs.into_iter()
            .map(|dir| dir.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Hosted backend (auth and table APIs) connection
#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
    /// Project URL, eg. `https://abcdefgh.supabase.co`
    pub url: Url,

    /// Public API key sent with every request
    pub anon_key: String,

    /// Session cookie name. Derived from the project URL when not given.
    #[serde(default)]
    pub cookie_name: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "Backend::default_timeout")]
    pub timeout_secs: u64,
}

impl Backend {
    fn default_timeout() -> u64 {
        10
    }
}

/// Access policy knobs
///
/// Defaults reproduce the storefront's established behaviour. Both `public_root` and
/// `missing_profile_role` are product decisions kept here so they can be revisited without
/// touching the gate itself.
#[derive(Debug, Clone, Deserialize, Derivative)]
#[derivative(Default)]
#[serde(default)]
pub struct Policy {
    /// Lets anonymous visitors reach the home page
    #[derivative(Default(value = "true"))]
    pub public_root: bool,

    /// Role assumed for an authenticated user without a profile row
    #[derivative(Default(value = "Role::User"))]
    pub missing_profile_role: Role,

    /// Sessions expiring within this many seconds are refreshed before use
    #[derivative(Default(value = "10"))]
    pub refresh_margin_secs: u64,
}

/// Longest honoured refresh margin, access tokens never live that long
const MAX_REFRESH_MARGIN_SECS: u64 = 24 * 60 * 60;

impl Policy {
    /// Refresh margin as a duration, capped at a day
    pub fn refresh_margin(&self) -> TimeDelta {
        TimeDelta::seconds(self.refresh_margin_secs.min(MAX_REFRESH_MARGIN_SECS) as i64)
    }
}

/// Lead capture configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Leads {
    /// Spreadsheet webhook receiving captured leads
    #[serde(default)]
    pub webhook: Option<Url>,
}

/// Top level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address where to host the service
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,

    /// Storefront renderer receiving allowed requests
    #[serde(default)]
    pub upstream: Option<Url>,

    /// Logging configuration
    #[serde(default)]
    pub logging: Logging,

    /// Hosted backend
    pub backend: Backend,

    /// Access policy
    #[serde(default)]
    pub policy: Policy,

    /// Lead capture
    #[serde(default)]
    pub leads: Leads,
}

impl Config {
    fn default_host() -> SocketAddr {
        ([127, 0, 0, 1], 3030).into()
    }

    /// Reads TOML configuration
    pub fn load(source: impl Read) -> color_eyre::Result<Self> {
        let config = read_to_string(source)?;
        Ok(toml::from_str(&config)?)
    }

    /// Timeout of every outgoing request
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}
