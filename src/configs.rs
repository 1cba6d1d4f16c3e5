// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Configuration
//!
//! Connection credentials and the topology settings a broker reads once at
//! construction. Credentials may be passed explicitly or picked up from the
//! environment (`RABBITMQ_*` variables, optionally from a `.env` file); the
//! topology comes from a JSON document shaped like:
//!
//! ```json
//! {
//!   "exchange": { "name": "transactionalExchange", "type": "topic", "durable": true },
//!   "queue": {
//!     "transactional": { "name": "transactionalQueue", "durable": true, "bindingKey": "*.*.transactional" }
//!   },
//!   "consume": { "no_ack": false },
//!   "routingKey": "user.registration.transactional"
//! }
//! ```

use crate::{errors::AmqpError, exchange::ExchangeDefinition, queue::QueueDefinition};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, fs, path::Path};
use tracing::{debug, error};

pub const ENV_HOST: &str = "RABBITMQ_HOST";
pub const ENV_PORT: &str = "RABBITMQ_PORT";
pub const ENV_USERNAME: &str = "RABBITMQ_USERNAME";
pub const ENV_PASSWORD: &str = "RABBITMQ_PASSWORD";
pub const ENV_VHOST: &str = "RABBITMQ_DOSOMETHING_VHOST";
/// Read when `RABBITMQ_DOSOMETHING_VHOST` is not set.
pub const ENV_VHOST_ALIAS: &str = "RABBITMQ_VHOST";

/// Connection name used when the configuration does not provide one.
pub const DEFAULT_CONNECTION_NAME: &str = "message-broker";

/// Lookup of configuration variables by name.
#[cfg_attr(test, mockall::automock)]
pub trait VarSource {
    /// Returns the value of `key`, or `None` when it is not set.
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads variables from the process environment.
pub struct ProcessEnv;

impl VarSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// RabbitMQ connection details.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("vhost", &self.vhost)
            .finish()
    }
}

impl Credentials {
    /// Creates credentials for the default vhost.
    ///
    /// # Parameters
    /// * `host` - Broker hostname
    /// * `port` - AMQP port, usually 5672
    /// * `username` - Login user
    /// * `password` - Login password
    ///
    /// # Returns
    /// Credentials with an empty vhost, which connects to `/`
    pub fn new(host: &str, port: u16, username: &str, password: &str) -> Credentials {
        Credentials {
            host: host.to_owned(),
            port,
            username: username.to_owned(),
            password: password.to_owned(),
            vhost: String::new(),
        }
    }

    /// Sets the virtual host to connect to.
    pub fn vhost(mut self, vhost: &str) -> Self {
        self.vhost = vhost.to_owned();
        self
    }

    /// True when host, port, username and password are all set.
    pub fn is_complete(&self) -> bool {
        !self.host.is_empty()
            && self.port != 0
            && !self.username.is_empty()
            && !self.password.is_empty()
    }

    /// Loads a `.env` file when present and reads credentials from the
    /// process environment.
    ///
    /// # Returns
    /// The credentials, or `MissingConfig` naming the first variable that is
    /// unset, empty or, for the port, not a valid port number
    pub fn from_env() -> Result<Credentials, AmqpError> {
        if let Err(err) = dotenv::dotenv() {
            debug!(error = err.to_string(), "no .env file loaded");
        }

        Credentials::default().resolve(&ProcessEnv)
    }

    /// Fills incomplete credentials from `source`.
    ///
    /// Variables are read in the order host, port, username, password, so the
    /// error names the first one missing. The vhost is optional and read from
    /// `RABBITMQ_DOSOMETHING_VHOST`, then `RABBITMQ_VHOST`.
    ///
    /// # Parameters
    /// * `source` - Where variables are looked up
    ///
    /// # Returns
    /// `self` untouched when complete, otherwise credentials built entirely
    /// from `source`, or `MissingConfig` with the offending variable name
    pub fn resolve(self, source: &impl VarSource) -> Result<Credentials, AmqpError> {
        if self.is_complete() {
            return Ok(self);
        }

        debug!("credentials incomplete, reading from environment");

        let host = required(source, ENV_HOST)?;
        let port = required(source, ENV_PORT)?;
        let port = port.trim().parse::<u16>().map_err(|err| {
            error!(error = err.to_string(), variable = ENV_PORT, "invalid rabbitmq port");
            AmqpError::MissingConfig(ENV_PORT.to_owned())
        })?;
        let username = required(source, ENV_USERNAME)?;
        let password = required(source, ENV_PASSWORD)?;
        let vhost = source
            .var(ENV_VHOST)
            .or_else(|| source.var(ENV_VHOST_ALIAS))
            .unwrap_or_default();

        Ok(Credentials {
            host,
            port,
            username,
            password,
            vhost,
        })
    }

    /// Builds the AMQP URI for these credentials.
    ///
    /// # Returns
    /// The URI lapin connects with; an empty vhost becomes the broker
    /// default `/`
    pub fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                host: self.host.clone(),
                port: self.port,
            },
            vhost: if self.vhost.is_empty() {
                "/".to_owned()
            } else {
                self.vhost.clone()
            },
            ..Default::default()
        }
    }
}

fn required(source: &impl VarSource, key: &str) -> Result<String, AmqpError> {
    match source.var(key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => {
            error!(variable = key, "missing rabbitmq credential");
            Err(AmqpError::MissingConfig(key.to_owned()))
        }
    }
}

/// Flags passed to `basic.consume` for every configured queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumeDefinition {
    pub(crate) consumer_tag: String,
    pub(crate) no_local: bool,
    pub(crate) no_ack: bool,
    pub(crate) exclusive: bool,
    pub(crate) nowait: bool,
}

impl Default for ConsumeDefinition {
    fn default() -> Self {
        ConsumeDefinition {
            consumer_tag: String::new(),
            no_local: false,
            no_ack: true,
            exclusive: false,
            nowait: false,
        }
    }
}

impl ConsumeDefinition {
    /// Sets the consumer tag; empty lets the server generate one.
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    /// Requires explicit acknowledgement of every delivery.
    pub fn manual_ack(mut self) -> Self {
        self.no_ack = false;
        self
    }

    /// Requests exclusive access to every consumed queue.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// Topology and publishing settings of a broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub(crate) connection_name: Option<String>,
    pub(crate) consume: ConsumeDefinition,
    pub(crate) exchange: ExchangeDefinition,
    #[serde(rename = "queue")]
    pub(crate) queues: BTreeMap<String, QueueDefinition>,
    #[serde(rename = "routingKey", alias = "routing_key")]
    pub(crate) routing_key: String,
}

impl BrokerConfig {
    /// Creates a configuration for `exchange` with no queues and default
    /// consume flags. At least one queue must be added before connecting.
    pub fn new(exchange: ExchangeDefinition) -> BrokerConfig {
        BrokerConfig {
            exchange,
            ..Default::default()
        }
    }

    /// Registers a queue under a logical key.
    pub fn queue(mut self, key: &str, def: QueueDefinition) -> Self {
        self.queues.insert(key.to_owned(), def);
        self
    }

    /// Sets the flags used by `basic.consume`.
    pub fn consume(mut self, def: ConsumeDefinition) -> Self {
        self.consume = def;
        self
    }

    /// Default routing key for messages published without one.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    /// Sets the name the connection reports to the broker.
    pub fn connection_name(mut self, name: &str) -> Self {
        self.connection_name = Some(name.to_owned());
        self
    }

    /// Parses and validates a JSON configuration document.
    ///
    /// # Parameters
    /// * `raw` - The JSON text
    ///
    /// # Returns
    /// The configuration, `InvalidConfig` when the text does not parse, or
    /// the `validate` error
    pub fn from_json(raw: &str) -> Result<BrokerConfig, AmqpError> {
        let cfg: BrokerConfig = serde_json::from_str(raw).map_err(|err| {
            error!(error = err.to_string(), "failure to parse broker config");
            AmqpError::InvalidConfig(err.to_string())
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads a JSON configuration file and parses it like `from_json`.
    ///
    /// # Parameters
    /// * `path` - Path of the file
    ///
    /// # Returns
    /// The configuration, or `InvalidConfig` when the file cannot be read
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<BrokerConfig, AmqpError> {
        let path = path.as_ref();
        debug!("reading broker config: {}", path.display());

        let raw = fs::read_to_string(path).map_err(|err| {
            error!(error = err.to_string(), "failure to read broker config");
            AmqpError::InvalidConfig(format!("{}: {}", path.display(), err))
        })?;

        BrokerConfig::from_json(&raw)
    }

    /// Checks the settings a broker cannot run without.
    ///
    /// # Returns
    /// `MissingConfig("queue")` without queues, `MissingConfig("queue.<key>.name")`
    /// for a queue with a blank name
    pub fn validate(&self) -> Result<(), AmqpError> {
        if self.queues.is_empty() {
            return Err(AmqpError::MissingConfig("queue".to_owned()));
        }

        for (key, def) in &self.queues {
            if def.name.trim().is_empty() {
                return Err(AmqpError::MissingConfig(format!("queue.{}.name", key)));
            }
        }

        Ok(())
    }

    /// Configured connection name, or `DEFAULT_CONNECTION_NAME`.
    pub fn connection_name_or_default(&self) -> &str {
        self.connection_name
            .as_deref()
            .unwrap_or(DEFAULT_CONNECTION_NAME)
    }

    /// The exchange every queue is bound to.
    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    /// Queue definitions in key order.
    pub fn queues(&self) -> impl Iterator<Item = &QueueDefinition> {
        self.queues.values()
    }

    /// Routing key used when a publish does not name one.
    pub fn default_routing_key(&self) -> &str {
        &self.routing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;

    fn env_with(vars: &'static [(&'static str, &'static str)]) -> MockVarSource {
        let mut source = MockVarSource::new();
        source.expect_var().returning(move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        });
        source
    }

    #[test]
    fn complete_credentials_skip_environment() {
        let mut source = MockVarSource::new();
        source.expect_var().never();

        let creds = Credentials::new("rabbit", 5672, "user", "secret")
            .resolve(&source)
            .unwrap();

        assert_eq!(creds.host, "rabbit");
        assert_eq!(creds.vhost, "");
    }

    #[test]
    fn incomplete_credentials_read_environment() {
        let source = env_with(&[
            (ENV_HOST, "mq.internal"),
            (ENV_PORT, "5673"),
            (ENV_USERNAME, "producer"),
            (ENV_PASSWORD, "pw"),
            (ENV_VHOST_ALIAS, "staging"),
        ]);

        let creds = Credentials::new("", 5672, "user", "secret")
            .resolve(&source)
            .unwrap();

        assert_eq!(
            creds,
            Credentials::new("mq.internal", 5673, "producer", "pw").vhost("staging")
        );
    }

    #[test]
    fn dosomething_vhost_variable_is_read() {
        let source = env_with(&[
            (ENV_HOST, "localhost"),
            (ENV_PORT, "5672"),
            (ENV_USERNAME, "guest"),
            (ENV_PASSWORD, "guest"),
            ("RABBITMQ_DOSOMETHING_VHOST", "dosomething"),
        ]);

        let creds = Credentials::default().resolve(&source).unwrap();
        assert_eq!(creds.vhost, "dosomething");
        assert_eq!(creds.uri().vhost, "dosomething");
    }

    #[test]
    fn dosomething_vhost_wins_over_alias() {
        let source = env_with(&[
            (ENV_HOST, "localhost"),
            (ENV_PORT, "5672"),
            (ENV_USERNAME, "guest"),
            (ENV_PASSWORD, "guest"),
            (ENV_VHOST, "dosomething"),
            (ENV_VHOST_ALIAS, "other"),
        ]);

        let creds = Credentials::default().resolve(&source).unwrap();
        assert_eq!(creds.vhost, "dosomething");
    }

    #[test]
    fn missing_vhost_variable_is_empty() {
        let source = env_with(&[
            (ENV_HOST, "localhost"),
            (ENV_PORT, "5672"),
            (ENV_USERNAME, "guest"),
            (ENV_PASSWORD, "guest"),
        ]);

        let creds = Credentials::default().resolve(&source).unwrap();
        assert_eq!(creds.vhost, "");
        assert_eq!(creds.uri().vhost, "/");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let source = env_with(&[(ENV_HOST, "localhost"), (ENV_PORT, "5672")]);

        assert_eq!(
            Credentials::default().resolve(&source),
            Err(AmqpError::MissingConfig(ENV_USERNAME.to_owned()))
        );
    }

    #[test]
    fn first_missing_variable_is_host() {
        let source = env_with(&[(ENV_USERNAME, "guest"), (ENV_PASSWORD, "guest")]);

        assert_eq!(
            Credentials::default().resolve(&source),
            Err(AmqpError::MissingConfig(ENV_HOST.to_owned()))
        );
    }

    #[test]
    fn invalid_port_is_reported_as_missing() {
        let source = env_with(&[
            (ENV_HOST, "localhost"),
            (ENV_PORT, "amqp"),
            (ENV_USERNAME, "guest"),
            (ENV_PASSWORD, "guest"),
        ]);

        assert_eq!(
            Credentials::default().resolve(&source),
            Err(AmqpError::MissingConfig(ENV_PORT.to_owned()))
        );
    }

    #[test]
    fn uri_carries_credentials_and_vhost() {
        let uri = Credentials::new("mq", 5672, "user", "pw")
            .vhost("staging")
            .uri();

        assert_eq!(uri.authority.host, "mq");
        assert_eq!(uri.authority.port, 5672);
        assert_eq!(uri.authority.userinfo.username, "user");
        assert_eq!(uri.authority.userinfo.password, "pw");
        assert_eq!(uri.vhost, "staging");
    }

    #[test]
    fn debug_hides_password() {
        let out = format!("{:?}", Credentials::new("mq", 5672, "user", "hunter2"));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn parses_full_config() {
        let cfg = BrokerConfig::from_json(
            r#"{
                "exchange": { "name": "transactionalExchange", "type": "topic", "durable": true },
                "queue": {
                    "transactional": { "name": "transactionalQueue", "durable": true, "bindingKey": "*.*.transactional" },
                    "userStatus": { "name": "userStatusQueue" }
                },
                "consume": { "consumer_tag": "mbc", "no_ack": false },
                "routingKey": "user.registration.transactional"
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.exchange.kind, ExchangeKind::Topic);
        assert!(cfg.exchange.durable);
        assert_eq!(cfg.queues.len(), 2);
        assert_eq!(cfg.queues["transactional"].binding_key, "*.*.transactional");
        assert_eq!(cfg.consume.consumer_tag, "mbc");
        assert!(!cfg.consume.no_ack);
        assert_eq!(cfg.default_routing_key(), "user.registration.transactional");
        assert_eq!(cfg.connection_name_or_default(), DEFAULT_CONNECTION_NAME);
    }

    #[test]
    fn consume_defaults_to_no_ack() {
        let cfg = BrokerConfig::from_json(r#"{"queue": {"q": {"name": "q"}}}"#).unwrap();

        assert_eq!(cfg.consume, ConsumeDefinition::default());
        assert!(cfg.consume.no_ack);
        assert_eq!(cfg.routing_key, "");
        assert_eq!(cfg.exchange, ExchangeDefinition::default());
    }

    #[test]
    fn config_without_queues_is_rejected() {
        assert_eq!(
            BrokerConfig::from_json(r#"{"exchange": {"name": "ex"}}"#),
            Err(AmqpError::MissingConfig("queue".to_owned()))
        );
    }

    #[test]
    fn blank_queue_name_is_rejected() {
        let cfg = BrokerConfig::new(ExchangeDefinition::new("ex"))
            .queue("main", QueueDefinition::new("  "));

        assert_eq!(
            cfg.validate(),
            Err(AmqpError::MissingConfig("queue.main.name".to_owned()))
        );
    }

    #[test]
    fn unreadable_file_is_an_error() {
        assert!(matches!(
            BrokerConfig::from_file("/nonexistent/broker.json"),
            Err(AmqpError::InvalidConfig(_))
        ));
    }
}
