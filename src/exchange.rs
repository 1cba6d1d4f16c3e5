// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Types describing the single exchange a broker publishes to and binds its
//! queues against. Producers never talk to a queue directly, so both sides
//! must declare the exchange with identical settings. Definitions are read
//! from configuration or built with the builder methods below.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Represents the types of exchanges available in RabbitMQ.
///
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = AmqpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(AmqpError::InvalidConfig(format!(
                "unknown exchange type `{}`",
                other
            ))),
        }
    }
}

/// Definition of a RabbitMQ exchange with its declaration flags.
///
/// `passive` asks the server to check for the exchange without creating it,
/// `durable` keeps it across broker restarts and `auto_delete` removes it once
/// every binding has been dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    #[serde(rename = "type")]
    pub(crate) kind: ExchangeKind,
    pub(crate) passive: bool,
    pub(crate) durable: bool,
    pub(crate) auto_delete: bool,
}

impl ExchangeDefinition {
    /// Creates a new direct exchange definition with the given name and every
    /// flag unset.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the exchange type to Direct.
    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    /// Sets the exchange type to Fanout.
    pub fn fanout(self) -> Self {
        self.kind(ExchangeKind::Fanout)
    }

    /// Sets the exchange type to Topic.
    pub fn topic(self) -> Self {
        self.kind(ExchangeKind::Topic)
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> &ExchangeKind {
        &self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exchange_kinds() {
        assert_eq!("topic".parse::<ExchangeKind>(), Ok(ExchangeKind::Topic));
        assert_eq!("Fanout".parse::<ExchangeKind>(), Ok(ExchangeKind::Fanout));
        assert!(" x-delayed ".parse::<ExchangeKind>().is_err());
    }

    #[test]
    fn builder_sets_flags() {
        let def = ExchangeDefinition::new("transactionalExchange")
            .topic()
            .durable();

        assert_eq!(def.name(), "transactionalExchange");
        assert_eq!(def.exchange_kind(), &ExchangeKind::Topic);
        assert!(def.durable);
        assert!(!def.passive);
        assert!(!def.auto_delete);
    }

    #[test]
    fn deserializes_with_defaults() {
        let def: ExchangeDefinition =
            serde_json::from_str(r#"{"name": "directUserStatusExchange", "type": "fanout"}"#)
                .unwrap();

        assert_eq!(def, ExchangeDefinition::new("directUserStatusExchange").fanout());
    }

    #[test]
    fn converts_into_lapin_kind() {
        let kind: lapin::ExchangeKind = (&ExchangeKind::Headers).into();
        assert!(matches!(kind, lapin::ExchangeKind::Headers));
    }
}
