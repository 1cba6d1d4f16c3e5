// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Broker Facade
//!
//! `MessageBroker` keeps one connection and its configuration for the whole
//! lifetime of a producer or consumer. Every operation opens its own channel,
//! installs the configured topology on it, does its work and closes it.
//!
//! ```no_run
//! use message_broker::{
//!     broker::MessageBroker,
//!     configs::{BrokerConfig, Credentials},
//!     publisher::DeliveryMode,
//! };
//!
//! # async fn run() -> Result<(), message_broker::errors::AmqpError> {
//! let config = BrokerConfig::from_file("broker.json")?;
//! let broker = MessageBroker::connect(Credentials::from_env()?, config).await?;
//!
//! broker
//!     .publish(br#"{"activity":"user_register"}"#, None, DeliveryMode::Persistent)
//!     .await?;
//! broker.close().await
//! # }
//! ```

use crate::{
    channel::{close_channel, new_amqp_channel, new_amqp_connection},
    configs::{BrokerConfig, Credentials, ProcessEnv},
    consumer::{BatchHandler, MessageHandler},
    dispatcher::{Dispatcher, StopHandle},
    errors::AmqpError,
    publisher::{self, DeliveryMode, PublishMessage},
    queue::QueueStatus,
    topology::{AmqpTopology, Topology},
};
use lapin::{Channel, Connection};
use opentelemetry::Context;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Configuration-driven facade over a RabbitMQ connection.
pub struct MessageBroker {
    connection: Arc<Connection>,
    config: BrokerConfig,
    stop: StopHandle,
}

impl MessageBroker {
    /// Validates `config`, completes `credentials` from the environment when
    /// needed and connects.
    ///
    /// # Parameters
    /// * `credentials` - Connection details; incomplete ones are replaced by
    ///   the `RABBITMQ_*` variables
    /// * `config` - Exchange, queues and consume settings
    ///
    /// # Returns
    /// A connected broker, `MissingConfig` for an invalid configuration or
    /// missing variable, `ConnectionError` when the broker is unreachable
    pub async fn connect(
        credentials: Credentials,
        config: BrokerConfig,
    ) -> Result<MessageBroker, AmqpError> {
        config.validate()?;
        let credentials = credentials.resolve(&ProcessEnv)?;

        let connection =
            new_amqp_connection(&credentials, config.connection_name_or_default()).await?;

        Ok(MessageBroker {
            connection,
            config,
            stop: StopHandle::new(),
        })
    }

    /// Configuration the broker was connected with.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Shared handle to the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    /// Opens a bare channel on the broker connection.
    pub async fn open_channel(&self) -> Result<Channel, AmqpError> {
        new_amqp_channel(&self.connection).await
    }

    /// Declares the configured exchange on `channel`.
    pub async fn setup_exchange(&self, channel: &Channel) -> Result<(), AmqpError> {
        AmqpTopology::from_config(&self.config)
            .setup_exchange(channel)
            .await
    }

    /// Declares the configured queue named `name` on `channel`.
    ///
    /// # Parameters
    /// * `channel` - Channel to declare on
    /// * `name` - Queue name, as given in the configuration
    ///
    /// # Returns
    /// Message and consumer counts reported by the server, or `UnknownQueue`
    /// when `name` is not configured
    pub async fn setup_queue(
        &self,
        channel: &Channel,
        name: &str,
    ) -> Result<QueueStatus, AmqpError> {
        AmqpTopology::from_config(&self.config)
            .setup_queue(channel, name)
            .await
    }

    async fn topology_channel(&self) -> Result<Channel, AmqpError> {
        let channel = self.open_channel().await?;

        if let Err(err) = AmqpTopology::from_config(&self.config)
            .install(&channel)
            .await
        {
            close_channel(&channel).await;
            return Err(err);
        }

        Ok(channel)
    }

    /// Publishes `payload` to the configured exchange.
    ///
    /// # Parameters
    /// * `payload` - Message body, must not be empty
    /// * `routing_key` - Routing key; `None` uses the configured default
    /// * `mode` - Transient or persistent delivery
    ///
    /// # Returns
    /// `EmptyPayload` before any channel is opened when `payload` is empty,
    /// otherwise the topology or publishing error, if any
    pub async fn publish(
        &self,
        payload: &[u8],
        routing_key: Option<&str>,
        mode: DeliveryMode,
    ) -> Result<(), AmqpError> {
        self.publish_with_context(&Context::current(), payload, routing_key, mode)
            .await
    }

    /// Like `publish`, propagating the trace context `ctx`.
    pub async fn publish_with_context(
        &self,
        ctx: &Context,
        payload: &[u8],
        routing_key: Option<&str>,
        mode: DeliveryMode,
    ) -> Result<(), AmqpError> {
        let msg = PublishMessage::new(
            self.config.exchange().name(),
            routing_key.unwrap_or(self.config.default_routing_key()),
            payload,
            mode,
        )?;

        let channel = self.topology_channel().await?;
        let result = publisher::publish(&channel, ctx, &msg).await;
        close_channel(&channel).await;

        result
    }

    /// Serializes `value` as JSON and publishes it.
    pub async fn publish_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        routing_key: Option<&str>,
        mode: DeliveryMode,
    ) -> Result<(), AmqpError> {
        let payload = serde_json::to_vec(value).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize payload");
            AmqpError::ParsePayloadError
        })?;

        self.publish(&payload, routing_key, mode).await
    }

    /// Consumes every configured queue, handing each message to `handler`,
    /// until `stop` is called or the broker closes the consumers.
    ///
    /// # Parameters
    /// * `handler` - Called once per message
    /// * `prefetch` - Caps the unacknowledged messages reserved for this
    ///   consumer; `None` leaves the server default
    ///
    /// # Returns
    /// `Ok` once stopped, or the first setup error
    pub async fn consume(
        &self,
        handler: &dyn MessageHandler,
        prefetch: Option<u16>,
    ) -> Result<(), AmqpError> {
        let channel = self.topology_channel().await?;
        let topology = AmqpTopology::from_config(&self.config);
        let dispatcher = Dispatcher::new(&channel, topology.queue_names(), &self.config.consume);

        let result = async {
            if let Some(prefetch) = prefetch {
                dispatcher.qos(prefetch).await?;
            }

            dispatcher
                .consume_blocking(handler, self.stop.subscribe())
                .await
        }
        .await;

        close_channel(&channel).await;
        result
    }

    /// Drains every configured queue and hands all messages to `handler` at
    /// once. Messages not acknowledged by the handler return to their queue.
    pub async fn get_all_messages(&self, handler: &dyn BatchHandler) -> Result<(), AmqpError> {
        let channel = self.topology_channel().await?;
        let topology = AmqpTopology::from_config(&self.config);
        let dispatcher = Dispatcher::new(&channel, topology.queue_names(), &self.config.consume);

        let result = dispatcher.drain_into(handler).await;
        close_channel(&channel).await;

        result
    }

    /// Ends every running `consume` after the message in hand.
    ///
    /// # Returns
    /// `false` when nothing is consuming
    pub fn stop(&self) -> bool {
        self.stop.stop()
    }

    /// Handle that can stop this broker's consume loop from elsewhere, for
    /// instance from inside a message handler.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<(), AmqpError> {
        debug!("closing amqp connection");

        match self.connection.close(200, "OK").await {
            Err(err) => {
                error!(error = err.to_string(), "error to close the connection");
                Err(AmqpError::ConnectionError)
            }
            _ => {
                info!("amqp connection closed");
                Ok(())
            }
        }
    }
}
