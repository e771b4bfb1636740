//! Service configuration: TOML file, environment variables, and the
//! validated [`ConnectionConfig`] handed to the connection manager.

use crate::message::{InvalidQos, QoS};
use crate::topics::{TopicError, TopicInterest};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variables every service must provide
pub const REQUIRED_BROKER_ENV: [&str; 3] = ["MQTT_BROKER", "MQTT_CLIENT_ID", "MQTT_QOS"];

/// Additional environment variables required by services backed by a data store
pub const REQUIRED_DATASTORE_ENV: [&str; 5] =
    ["DB_HOST", "DB_PORT", "DB_NAME", "DB_USERNAME", "DB_PASSWORD"];

/// Comma-separated topic list used when no config file is given
pub const TOPICS_ENV: &str = "MQTT_TOPICS";

/// Default wait for any broker acknowledgment
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Required environment variable not set: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("Invalid client ID '{0}': must be non-empty and at most 65535 bytes")]
    InvalidClientId(String),
    #[error(transparent)]
    InvalidQos(#[from] InvalidQos),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Reconnection backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds, one entry per attempt
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![250, 500, 1000, 2000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "reconnect.max_attempts must be greater than 0 or omitted for unlimited".into(),
            ));
        }
        if self.sustained_delay == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect.sustained_delay must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Broker credentials, resolved from environment variables at build time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Immutable connection parameters for one broker session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    broker_url: Url,
    client_id: String,
    default_qos: QoS,
    clean_start: bool,
    automatic_reconnect: bool,
    keep_alive: Duration,
    operation_timeout: Duration,
    credentials: Option<Credentials>,
    reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    pub fn new(broker_url: &str, client_id: &str, default_qos: QoS) -> Result<Self, ConfigError> {
        Ok(Self {
            broker_url: parse_broker_url(broker_url)?,
            client_id: validate_client_id(client_id)?,
            default_qos,
            clean_start: true,
            automatic_reconnect: true,
            keep_alive: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            credentials: None,
            reconnect: ReconnectConfig::default(),
        })
    }

    pub fn with_clean_start(mut self, clean_start: bool) -> Self {
        self.clean_start = clean_start;
        self
    }

    pub fn with_automatic_reconnect(mut self, automatic_reconnect: bool) -> Self {
        self.automatic_reconnect = automatic_reconnect;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn broker_url(&self) -> &Url {
        &self.broker_url
    }

    pub fn host(&self) -> &str {
        self.broker_url.host_str().unwrap_or_default()
    }

    /// Explicit port, or the scheme default (1883 plain, 8883 TLS)
    pub fn port(&self) -> u16 {
        self.broker_url
            .port()
            .unwrap_or(if self.uses_tls() { 8883 } else { 1883 })
    }

    pub fn uses_tls(&self) -> bool {
        matches!(self.broker_url.scheme(), "mqtts" | "ssl")
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn default_qos(&self) -> QoS {
        self.default_qos
    }

    pub fn clean_start(&self) -> bool {
        self.clean_start
    }

    pub fn automatic_reconnect(&self) -> bool {
        self.automatic_reconnect
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }
}

/// Parse and validate a broker URI (`mqtt://`, `tcp://`, `mqtts://`, `ssl://`)
pub fn parse_broker_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidBrokerUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "mqtt" | "tcp" | "mqtts" | "ssl") {
        return Err(invalid("scheme must be mqtt, tcp, mqtts or ssl"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}

fn validate_client_id(client_id: &str) -> Result<String, ConfigError> {
    if client_id.is_empty() || client_id.len() > u16::MAX as usize {
        return Err(ConfigError::InvalidClientId(client_id.to_string()));
    }
    Ok(client_id.to_string())
}

/// Top-level service configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicsSection,
}

/// `[mqtt]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL with protocol and port
    pub broker_url: String,
    /// Client identity, unique per broker
    pub client_id: String,
    /// Default QoS for subscribe/publish (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_true")]
    pub clean_start: bool,
    #[serde(default = "default_true")]
    pub automatic_reconnect: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_qos() -> u8 {
    1
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> u64 {
    60
}

fn default_operation_timeout() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

/// `[topics]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    #[serde(default)]
    pub subscribe: Vec<TopicEntry>,
}

/// A topic to subscribe to, with an optional QoS override
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TopicEntry {
    /// Simple form: `"a/b/c"`
    Simple(String),
    /// Detailed form: `{ filter = "a/b/#", qos = 2 }`
    Detailed { filter: String, qos: Option<u8> },
}

impl ServiceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `MQTT_BROKER`, `MQTT_CLIENT_ID`, `MQTT_QOS`
    /// and `MQTT_TOPICS`, after checking that every name in `extra_required`
    /// is set as well.
    pub fn from_env(extra_required: &[&str]) -> Result<Self, ConfigError> {
        require_env(REQUIRED_BROKER_ENV.iter().chain(extra_required.iter()).copied())?;

        let qos_raw = get_env_var_required("MQTT_QOS")?;
        let qos = qos_raw.trim().parse::<u8>().map_err(|_| ConfigError::InvalidValue {
            name: "MQTT_QOS".to_string(),
            value: qos_raw.clone(),
        })?;

        let subscribe = std::env::var(TOPICS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|t| TopicEntry::Simple(t.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let config = ServiceConfig {
            mqtt: MqttSection {
                broker_url: get_env_var_required("MQTT_BROKER")?,
                client_id: get_env_var_required("MQTT_CLIENT_ID")?,
                qos,
                clean_start: true,
                automatic_reconnect: true,
                keep_alive_secs: default_keep_alive(),
                operation_timeout_secs: default_operation_timeout(),
                username_env: Some("MQTT_USERNAME".to_string()),
                password_env: Some("MQTT_PASSWORD".to_string()),
                reconnect: ReconnectConfig::default(),
            },
            topics: TopicsSection { subscribe },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection_config()?;
        self.topic_interest()?;
        self.mqtt.reconnect.validate()?;
        if self.mqtt.operation_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "operation_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Build the immutable connection parameters
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let mqtt = &self.mqtt;
        let mut config = ConnectionConfig::new(
            &mqtt.broker_url,
            &mqtt.client_id,
            QoS::try_from(mqtt.qos)?,
        )?
        .with_clean_start(mqtt.clean_start)
        .with_automatic_reconnect(mqtt.automatic_reconnect)
        .with_keep_alive(Duration::from_secs(mqtt.keep_alive_secs))
        .with_operation_timeout(Duration::from_secs(mqtt.operation_timeout_secs))
        .with_reconnect(mqtt.reconnect.clone());

        if let Some(username) = get_env_var_optional(mqtt.username_env.as_ref()) {
            let password = get_env_var_optional(mqtt.password_env.as_ref()).unwrap_or_default();
            config = config.with_credentials(Credentials { username, password });
        }

        Ok(config)
    }

    /// Build the ordered topic interest set
    pub fn topic_interest(&self) -> Result<TopicInterest, ConfigError> {
        let mut interest = TopicInterest::new();
        for entry in &self.topics.subscribe {
            interest = match entry {
                TopicEntry::Simple(filter) => interest.with(filter.clone(), None)?,
                TopicEntry::Detailed { filter, qos } => {
                    let qos = qos.map(QoS::try_from).transpose()?;
                    interest.with(filter.clone(), qos)?
                }
            };
        }
        Ok(interest)
    }
}

/// Check that every listed environment variable is set, reporting the first
/// missing one by name
pub fn require_env<'a, I>(names: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    for name in names {
        get_env_var_required(name)?;
    }
    Ok(())
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}
