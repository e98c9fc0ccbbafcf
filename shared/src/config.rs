use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::ffi::OsString;
use tracing::debug;

/// A seed node of the record store cluster
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Host {
    pub name: String,
    #[serde(default = "Host::default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls_name: Option<String>,
}

impl Host {
    pub const DEFAULT_PORT: u16 = 3000;

    fn default_port() -> u16 {
        Self::DEFAULT_PORT
    }

    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            tls_name: None,
        }
    }

    /// Parses `host[:port[:tls_name]]`
    pub fn parse(input: &str) -> Result<Self> {
        let mut parts = input.trim().splitn(3, ':');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(Error::Config(format!("invalid host '{}'", input)));
        }

        let port = match parts.next().map(str::trim) {
            None | Some("") => Self::DEFAULT_PORT,
            Some(port) => port
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("invalid port in host '{}': {}", input, e)))?,
        };

        let tls_name = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: name.to_string(),
            port,
            tls_name,
        })
    }

    /// Parses a comma separated host list, skipping empty entries
    pub fn parse_list(input: &str) -> Result<Vec<Self>> {
        input.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(Self::parse)
            .collect()
    }
}

/// Settings recognised by the cache adapter.
///
/// Built once at application start and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub hosts: Vec<Host>,
    pub namespace: String,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default = "CacheSettings::default_timeout")]
    pub default_timeout: u32,
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

impl CacheSettings {
    pub const DEFAULT_TIMEOUT: u32 = 300;
    pub const MAX_NAMESPACE_BYTES: usize = 31;
    pub const MAX_SET_BYTES: usize = 63;

    pub const ENV_PREFIX: &str = "AEROCACHE_";
    pub const ENV_HOSTS: &str = "AEROCACHE_HOSTS";
    pub const ENV_NAMESPACE: &str = "AEROCACHE_NAMESPACE";
    pub const ENV_SET: &str = "AEROCACHE_SET";
    pub const ENV_DEFAULT_TIMEOUT: &str = "AEROCACHE_DEFAULT_TIMEOUT";
    pub const ENV_OPERATION_TIMEOUT_MS: &str = "AEROCACHE_OPERATION_TIMEOUT_MS";

    fn default_timeout() -> u32 {
        Self::DEFAULT_TIMEOUT
    }

    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            hosts: Vec::new(),
            namespace: namespace.into(),
            set_name: None,
            default_timeout: Self::DEFAULT_TIMEOUT,
            operation_timeout_ms: None,
        }
    }

    pub fn with_hosts(mut self, hosts: Vec<Host>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_set_name(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    pub fn with_default_timeout(mut self, seconds: u32) -> Self {
        self.default_timeout = seconds;
        self
    }

    pub fn with_operation_timeout_ms(mut self, millis: u64) -> Self {
        self.operation_timeout_ms = Some(millis);
        self
    }

    /// Reads `AEROCACHE_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_env_vars(std::env::vars_os())
    }

    /// Only `AEROCACHE_*` entries must be UTF-8; anything else is skipped
    fn from_env_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Result<Self> {
        let mut settings = HashMap::new();
        for (key, value) in vars {
            let Some(key) = key.to_str().filter(|k| k.starts_with(Self::ENV_PREFIX)) else {
                continue;
            };
            let value = value
                .into_string()
                .map_err(|_| Error::Config(format!("{} is not valid UTF-8", key)))?;
            settings.insert(key.to_string(), value);
        }
        Self::from_map(&settings)
    }

    /// Builds settings from a flat key/value mapping.
    /// Unknown `AEROCACHE_*` keys are rejected, other keys are ignored.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        const KNOWN: [&str; 5] = [
            CacheSettings::ENV_HOSTS,
            CacheSettings::ENV_NAMESPACE,
            CacheSettings::ENV_SET,
            CacheSettings::ENV_DEFAULT_TIMEOUT,
            CacheSettings::ENV_OPERATION_TIMEOUT_MS,
        ];

        if let Some(unknown) = vars
            .keys()
            .find(|k| k.starts_with(Self::ENV_PREFIX) && !KNOWN.contains(&k.as_str()))
        {
            return Err(Error::Config(format!("unrecognized setting {}", unknown)));
        }

        let namespace = vars
            .get(Self::ENV_NAMESPACE)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Config(format!("{} is required", Self::ENV_NAMESPACE)))?;

        let hosts = match vars.get(Self::ENV_HOSTS) {
            Some(raw) => Host::parse_list(raw)?,
            None => Vec::new(),
        };

        let set_name = vars
            .get(Self::ENV_SET)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let default_timeout = match vars.get(Self::ENV_DEFAULT_TIMEOUT) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| {
                Error::Config(format!("{} must be an integer: {}", Self::ENV_DEFAULT_TIMEOUT, e))
            })?,
            None => Self::DEFAULT_TIMEOUT,
        };

        let operation_timeout_ms = match vars.get(Self::ENV_OPERATION_TIMEOUT_MS) {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!(
                    "{} must be an integer: {}",
                    Self::ENV_OPERATION_TIMEOUT_MS,
                    e
                ))
            })?),
            None => None,
        };

        let settings = Self {
            hosts,
            namespace,
            set_name,
            default_timeout,
            operation_timeout_ms,
        };
        debug!("Loaded cache settings: {:?}", settings);
        Ok(settings)
    }

    /// Checks the limits the record store puts on namespace and set names
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::Config("namespace is required".to_string()));
        }
        if self.namespace.len() > Self::MAX_NAMESPACE_BYTES {
            return Err(Error::Config(
                "namespace must be less than 32 characters".to_string(),
            ));
        }
        if self.namespace.contains('\0') {
            return Err(Error::Config("namespace must not contain NUL".to_string()));
        }

        if let Some(set_name) = &self.set_name {
            if set_name.len() > Self::MAX_SET_BYTES {
                return Err(Error::Config(
                    "set name must be less than 64 characters".to_string(),
                ));
            }
            if set_name.contains('\0') {
                return Err(Error::Config("set name must not contain NUL".to_string()));
            }
        }

        Ok(())
    }
}
