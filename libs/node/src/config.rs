//! Service configuration with layered loading.
//!
//! Settings come from an optional TOML file, overridden by environment
//! variables prefixed with `SWITCHBOARD_` (nested keys split on `__`).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::server::DEFAULT_MAX_IN_FLIGHT;

/// Port the RPC server listens on unless configured otherwise
pub const DEFAULT_RPC_PORT: u16 = 7070;

const ENV_PREFIX: &str = "SWITCHBOARD_";

/// Deployment environment a service runs in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }

    pub fn is_staging(self) -> bool {
        self == Self::Staging
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Environment> for String {
    fn from(env: Environment) -> Self {
        env.as_str().to_string()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, used for discovery and logs
    #[serde(default)]
    pub name: String,

    /// Host the RPC server binds to
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,

    #[serde(default)]
    pub environment: Environment,

    /// Requests handled at once across all connections
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Default bound on outbound calls, e.g. `"500ms"`, `"5s"`, `"1m"`
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub call_timeout: Option<Duration>,

    /// Static service name to address table
    #[serde(default)]
    pub services: HashMap<String, String>,
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_rpc_port() -> u16 {
    DEFAULT_RPC_PORT
}

const fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: default_host(),
            rpc_port: DEFAULT_RPC_PORT,
            environment: Environment::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            call_timeout: None,
            services: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Loads configuration from environment variables alone
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment().extract().map_err(ConfigError::from)
    }

    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `SWITCHBOARD_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(content))
            .extract()
            .map_err(ConfigError::from)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Address the RPC server listens on
    pub fn rpc_address(&self) -> String {
        format!("{}:{}", self.host, self.rpc_port)
    }
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map(|s| parse_duration(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn serialize_optional_duration<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(duration) => serializer.serialize_some(&format!("{}ms", duration.as_millis())),
        None => serializer.serialize_none(),
    }
}

/// Parse `"250ms"`, `"5s"`, `"2m"` or a bare number of seconds
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(mins * 60))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = ServiceConfig::parse("").unwrap();
        assert_eq!(config.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.call_timeout, None);
        assert_eq!(config.rpc_address(), "0.0.0.0:7070");
    }

    #[test]
    fn parses_full_config() {
        let config = ServiceConfig::parse(
            r#"
            name = "users"
            host = "127.0.0.1"
            rpc_port = 9000
            environment = "PROD"
            call_timeout = "750ms"

            [services]
            billing = "10.0.0.2:7070"
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "users");
        assert_eq!(config.rpc_address(), "127.0.0.1:9000");
        assert!(config.environment.is_production());
        assert_eq!(config.call_timeout, Some(Duration::from_millis(750)));
        assert_eq!(config.services.get("billing").unwrap(), "10.0.0.2:7070");
    }

    #[test]
    fn unknown_environment_is_an_error() {
        assert!(ServiceConfig::parse(r#"environment = "qa""#).is_err());
        assert!(matches!(
            "qa".parse::<Environment>(),
            Err(ConfigError::InvalidEnvironment(_))
        ));
    }

    #[test]
    fn environment_aliases() {
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Development);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
    }

    #[test]
    fn load_from_missing_file() {
        assert!(matches!(
            ServiceConfig::load_from("/nonexistent/switchboard.toml"),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = \"files\"\nrpc_port = 7171").unwrap();

        let config = ServiceConfig::load_from(file.path()).unwrap();
        assert_eq!(config.name, "files");
        assert_eq!(config.rpc_port, 7171);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("soon").is_err());
    }
}
