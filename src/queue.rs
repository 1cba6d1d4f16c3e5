// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Types for the queues a broker declares and binds to its exchange. Every
//! queue carries its own binding key, which is the pattern the exchange uses to
//! decide whether a published message lands in that queue.

use lapin::Queue;
use serde::{Deserialize, Serialize};

/// Definition of a RabbitMQ queue with its declaration flags.
///
/// By default the queue is non-durable, non-exclusive, not auto-deleted and
/// bound with an empty key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDefinition {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) passive: bool,
    #[serde(default)]
    pub(crate) durable: bool,
    #[serde(default)]
    pub(crate) exclusive: bool,
    #[serde(default)]
    pub(crate) auto_delete: bool,
    #[serde(default, rename = "bindingKey", alias = "binding_key")]
    pub(crate) binding_key: String,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// Messages must also be published persistently to survive a restart.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the declaration passive: the server only checks the queue exists.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Deletes the queue once its last consumer is gone.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// Sets the key used to bind the queue to the exchange.
    ///
    /// For topic exchanges this is a pattern such as `*.*.transactional`; for
    /// direct exchanges it must match the message routing key exactly.
    pub fn binding_key(mut self, key: &str) -> Self {
        self.binding_key = key.to_owned();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Configuration for binding a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding<'qeb> {
    pub(crate) queue_name: &'qeb str,
    pub(crate) exchange_name: &'qeb str,
    pub(crate) routing_key: &'qeb str,
}

impl<'qeb> QueueBinding<'qeb> {
    /// Creates a new queue binding for the given queue.
    ///
    /// The exchange name and routing key start empty and are set with the
    /// `exchange` and `routing_key` methods.
    pub fn new(queue: &'qeb str) -> QueueBinding<'qeb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &'qeb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &'qeb str) -> Self {
        self.routing_key = key;
        self
    }
}

/// What the server reports back after a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl From<&Queue> for QueueStatus {
    fn from(queue: &Queue) -> Self {
        QueueStatus {
            name: queue.name().to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_binding_key_aliases() {
        let camel: QueueDefinition = serde_json::from_str(
            r#"{"name": "userRegistrationQueue", "durable": true, "bindingKey": "user.registration.*"}"#,
        )
        .unwrap();
        let snake: QueueDefinition = serde_json::from_str(
            r#"{"name": "userRegistrationQueue", "durable": true, "binding_key": "user.registration.*"}"#,
        )
        .unwrap();

        assert_eq!(camel, snake);
        assert_eq!(
            camel,
            QueueDefinition::new("userRegistrationQueue")
                .durable()
                .binding_key("user.registration.*")
        );
    }

    #[test]
    fn binding_key_defaults_to_empty() {
        let def: QueueDefinition = serde_json::from_str(r#"{"name": "q"}"#).unwrap();
        assert_eq!(def.binding_key, "");
        assert!(!def.durable && !def.passive && !def.exclusive && !def.auto_delete);
    }

    #[test]
    fn queue_name_is_required() {
        assert!(serde_json::from_str::<QueueDefinition>(r#"{"durable": true}"#).is_err());
    }

    #[test]
    fn binding_builder() {
        let binding = QueueBinding::new("q")
            .exchange("ex")
            .routing_key("*.*.transactional");

        assert_eq!(binding.queue_name, "q");
        assert_eq!(binding.exchange_name, "ex");
        assert_eq!(binding.routing_key, "*.*.transactional");
    }
}
