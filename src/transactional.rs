// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transactional Producer
//!
//! A broker with a fixed topology for transactional messages: a durable topic
//! exchange and a durable queue bound with `*.*.transactional`. Names come from
//! the `TRANSACTIONAL_EXCHANGE` and `TRANSACTIONAL_QUEUE` variables. Messages
//! are published persistently with a routing key chosen by their activity.

use crate::{
    broker::MessageBroker,
    configs::{BrokerConfig, Credentials, ProcessEnv, VarSource},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    publisher::DeliveryMode,
    queue::QueueDefinition,
    routing::{transactional_routing_key, TRANSACTIONAL_BINDING_KEY},
};
use serde_json::Value;
use tracing::{debug, error};

pub const ENV_TRANSACTIONAL_EXCHANGE: &str = "TRANSACTIONAL_EXCHANGE";
pub const ENV_TRANSACTIONAL_QUEUE: &str = "TRANSACTIONAL_QUEUE";

const TRANSACTIONAL_QUEUE_KEY: &str = "transactional";
const CONNECTION_NAME: &str = "transactional-producer";

/// Builds the transactional topology from the names found in `source`.
pub fn transactional_config(source: &impl VarSource) -> Result<BrokerConfig, AmqpError> {
    let exchange = named(source, ENV_TRANSACTIONAL_EXCHANGE)?;
    let queue = named(source, ENV_TRANSACTIONAL_QUEUE)?;

    Ok(
        BrokerConfig::new(ExchangeDefinition::new(&exchange).topic().durable())
            .queue(
                TRANSACTIONAL_QUEUE_KEY,
                QueueDefinition::new(&queue)
                    .durable()
                    .binding_key(TRANSACTIONAL_BINDING_KEY),
            )
            .connection_name(CONNECTION_NAME),
    )
}

fn named(source: &impl VarSource, key: &str) -> Result<String, AmqpError> {
    match source.var(key) {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => {
            error!(variable = key, "exchange and/or queue name not set");
            Err(AmqpError::MissingConfig(key.to_owned()))
        }
    }
}

/// Publishes transactional messages.
pub struct TransactionalProducer {
    broker: MessageBroker,
}

impl TransactionalProducer {
    /// Connects with the topology named by the environment.
    pub async fn connect(credentials: Credentials) -> Result<TransactionalProducer, AmqpError> {
        if let Err(err) = dotenv::dotenv() {
            debug!(error = err.to_string(), "no .env file loaded");
        }

        let config = transactional_config(&ProcessEnv)?;
        let broker = MessageBroker::connect(credentials, config).await?;

        Ok(TransactionalProducer { broker })
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    /// Publishes `payload` persistently with the routing key of its activity.
    pub async fn produce(&self, payload: &Value) -> Result<(), AmqpError> {
        let routing_key = transactional_routing_key(payload)?;
        debug!(routing_key, "producing transactional message");

        self.broker
            .publish_json(payload, Some(routing_key), DeliveryMode::Persistent)
            .await
    }

    pub async fn close(self) -> Result<(), AmqpError> {
        self.broker.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{configs::MockVarSource, exchange::ExchangeKind, topology::AmqpTopology};

    fn source(exchange: Option<&'static str>, queue: Option<&'static str>) -> MockVarSource {
        let mut source = MockVarSource::new();
        source.expect_var().returning(move |key| match key {
            ENV_TRANSACTIONAL_EXCHANGE => exchange.map(str::to_owned),
            ENV_TRANSACTIONAL_QUEUE => queue.map(str::to_owned),
            _ => None,
        });
        source
    }

    #[test]
    fn builds_durable_topic_topology() {
        let cfg = transactional_config(&source(
            Some("transactionalExchange"),
            Some("transactionalQueue"),
        ))
        .unwrap();

        assert_eq!(cfg.exchange().name(), "transactionalExchange");
        assert_eq!(cfg.exchange().exchange_kind(), &ExchangeKind::Topic);
        assert!(cfg.exchange().durable);
        assert_eq!(cfg.connection_name_or_default(), CONNECTION_NAME);

        let tp = AmqpTopology::from_config(&cfg);
        let queue = tp.queue_definition("transactionalQueue").unwrap();
        assert!(queue.durable);
        assert_eq!(tp.queues_binding[0].routing_key, TRANSACTIONAL_BINDING_KEY);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_names_are_errors() {
        assert_eq!(
            transactional_config(&source(None, Some("q"))),
            Err(AmqpError::MissingConfig(ENV_TRANSACTIONAL_EXCHANGE.to_owned()))
        );
        assert_eq!(
            transactional_config(&source(Some("ex"), Some(" "))),
            Err(AmqpError::MissingConfig(ENV_TRANSACTIONAL_QUEUE.to_owned()))
        );
    }
}
