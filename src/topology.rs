// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Producers and consumers of the same broker configuration must agree on the
//! exchange and queue settings, so every operation installs the same topology
//! before touching messages:
//! 1. Declares the exchange
//! 2. Declares every registered queue
//! 3. Binds each queue to the exchange with its binding key

use crate::{
    configs::BrokerConfig,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition, QueueStatus},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use tracing::{debug, error};

/// Interface for topology management.
#[async_trait]
pub trait Topology<'tp> {
    /// Sets the exchange definition of the topology.
    fn exchange(self, def: &'tp ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding<'tp>) -> Self;

    /// Creates the exchange and queues on the server and sets up the bindings.
    async fn install(&self, channel: &Channel) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
#[derive(Debug, Default)]
pub struct AmqpTopology<'tp> {
    pub(crate) exchange: Option<&'tp ExchangeDefinition>,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding<'tp>>,
}

impl<'tp> AmqpTopology<'tp> {
    pub fn new() -> AmqpTopology<'tp> {
        AmqpTopology::default()
    }

    /// Builds the topology described by a broker configuration: its exchange,
    /// every queue in key order, and one binding per queue using the queue's
    /// binding key.
    pub fn from_config(cfg: &'tp BrokerConfig) -> AmqpTopology<'tp> {
        let exchange = cfg.exchange();

        cfg.queues().fold(AmqpTopology::new().exchange(exchange), |tp, def| {
            tp.queue(def).queue_binding(
                QueueBinding::new(&def.name)
                    .exchange(&exchange.name)
                    .routing_key(&def.binding_key),
            )
        })
    }

    /// Looks up a registered queue by its name.
    pub fn queue_definition(&self, name: &str) -> Result<&'tp QueueDefinition, AmqpError> {
        self.queues
            .iter()
            .find(|def| def.name == name)
            .copied()
            .ok_or_else(|| AmqpError::UnknownQueue(name.to_owned()))
    }

    pub fn queue_names(&self) -> Vec<&'tp str> {
        self.queues.iter().map(|def| def.name.as_str()).collect()
    }

    /// Declares the exchange of the topology.
    pub async fn setup_exchange(&self, channel: &Channel) -> Result<(), AmqpError> {
        let Some(exch) = self.exchange else {
            return Err(AmqpError::MissingConfig("exchange".to_owned()));
        };

        debug!("creating exchange: {}", exch.name);

        match channel
            .exchange_declare(
                &exch.name,
                (&exch.kind).into(),
                ExchangeDeclareOptions {
                    passive: exch.passive,
                    durable: exch.durable,
                    auto_delete: exch.auto_delete,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = %exch.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(exch.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", exch.name);
                Ok(())
            }
        }
    }

    /// Declares the registered queue named `name`.
    ///
    /// When the queue already exists the server reports its current message
    /// and consumer counts.
    pub async fn setup_queue(
        &self,
        channel: &Channel,
        name: &str,
    ) -> Result<QueueStatus, AmqpError> {
        let def = self.queue_definition(name)?;
        debug!("creating queue: {}", name);

        match channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.auto_delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            Ok(queue) => {
                let status = QueueStatus::from(&queue);
                debug!(
                    messages = status.message_count,
                    consumers = status.consumer_count,
                    "queue: {} was created",
                    name
                );
                Ok(status)
            }
        }
    }

    async fn install_queues(&self, channel: &Channel) -> Result<(), AmqpError> {
        for def in &self.queues {
            self.setup_queue(channel, &def.name).await?;
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &Channel) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match channel
                .queue_bind(
                    binding.queue_name,
                    binding.exchange_name,
                    binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.to_owned(),
                        binding.queue_name.to_owned(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        debug!("queues were bound");

        Ok(())
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    fn exchange(mut self, def: &'tp ExchangeDefinition) -> Self {
        self.exchange = Some(def);
        self
    }

    /// Adds a queue definition; a later definition with the same name
    /// replaces the earlier one.
    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.retain(|q| q.name != def.name);
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding<'tp>) -> Self {
        self.queues_binding.push(binding);
        self
    }

    async fn install(&self, channel: &Channel) -> Result<(), AmqpError> {
        self.setup_exchange(channel).await?;
        self.install_queues(channel).await?;
        self.binding_queues(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BrokerConfig {
        BrokerConfig::new(ExchangeDefinition::new("transactionalExchange").topic().durable())
            .queue(
                "transactional",
                QueueDefinition::new("transactionalQueue")
                    .durable()
                    .binding_key("*.*.transactional"),
            )
            .queue("userStatus", QueueDefinition::new("userStatusQueue"))
    }

    #[test]
    fn from_config_binds_every_queue() {
        let cfg = config();
        let tp = AmqpTopology::from_config(&cfg);

        assert_eq!(tp.exchange.map(|e| e.name()), Some("transactionalExchange"));
        assert_eq!(tp.queue_names(), vec!["transactionalQueue", "userStatusQueue"]);
        assert_eq!(
            tp.queues_binding,
            vec![
                QueueBinding::new("transactionalQueue")
                    .exchange("transactionalExchange")
                    .routing_key("*.*.transactional"),
                QueueBinding::new("userStatusQueue").exchange("transactionalExchange"),
            ]
        );
    }

    #[test]
    fn unknown_queue_lookup_fails() {
        let cfg = config();
        let tp = AmqpTopology::from_config(&cfg);

        assert!(tp.queue_definition("transactionalQueue").is_ok());
        assert_eq!(
            tp.queue_definition("missingQueue"),
            Err(AmqpError::UnknownQueue("missingQueue".to_owned()))
        );
    }

    #[test]
    fn duplicate_queue_names_keep_last_definition() {
        let first = QueueDefinition::new("q");
        let second = QueueDefinition::new("q").durable();
        let tp = AmqpTopology::new().queue(&first).queue(&second);

        assert_eq!(tp.queues.len(), 1);
        assert!(tp.queue_definition("q").unwrap().durable);
    }
}
