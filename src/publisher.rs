// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publishing
//!
//! Publishes payloads to the configured exchange. The routing key decides,
//! together with the exchange type and each queue's binding key, which queues
//! receive a copy of the message.

use crate::{errors::AmqpError, otel};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties, Channel};
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

/// AMQP delivery mode of a published message.
///
/// Persistent messages are written to disk and survive a broker restart as
/// long as the queue holding them is durable; transient ones are faster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

impl From<DeliveryMode> for u8 {
    fn from(mode: DeliveryMode) -> u8 {
        match mode {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

/// A message ready to be published.
#[derive(Debug, Clone)]
pub struct PublishMessage<'m> {
    pub(crate) exchange: &'m str,
    pub(crate) routing_key: &'m str,
    pub(crate) payload: &'m [u8],
    pub(crate) mode: DeliveryMode,
}

impl<'m> PublishMessage<'m> {
    /// Fails with `EmptyPayload` when there is nothing to send.
    pub fn new(
        exchange: &'m str,
        routing_key: &'m str,
        payload: &'m [u8],
        mode: DeliveryMode,
    ) -> Result<PublishMessage<'m>, AmqpError> {
        if payload.is_empty() {
            return Err(AmqpError::EmptyPayload);
        }

        Ok(PublishMessage {
            exchange,
            routing_key,
            payload,
            mode,
        })
    }

    /// Message properties: delivery mode, a fresh message id and the trace
    /// context of `ctx` in the headers.
    pub(crate) fn properties(&self, ctx: &Context) -> BasicProperties {
        BasicProperties::default()
            .with_delivery_mode(self.mode.into())
            .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
            .with_headers(otel::inject_headers(ctx))
    }
}

/// Publishes `msg` on `channel`.
pub async fn publish(
    channel: &Channel,
    ctx: &Context,
    msg: &PublishMessage<'_>,
) -> Result<(), AmqpError> {
    debug!(
        exchange = msg.exchange,
        routing_key = msg.routing_key,
        "publishing message"
    );

    match channel
        .basic_publish(
            msg.exchange,
            msg.routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            msg.payload,
            msg.properties(ctx),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error publishing message");
            Err(AmqpError::PublishingError)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_rejected() {
        assert_eq!(
            PublishMessage::new("ex", "key", b"", DeliveryMode::Transient).unwrap_err(),
            AmqpError::EmptyPayload
        );
    }

    #[test]
    fn delivery_mode_values() {
        assert_eq!(u8::from(DeliveryMode::default()), 1);
        assert_eq!(u8::from(DeliveryMode::Persistent), 2);
    }

    #[test]
    fn properties_carry_mode_and_id() {
        let msg =
            PublishMessage::new("ex", "key", br#"{"activity":"user_register"}"#, DeliveryMode::Persistent)
                .unwrap();
        let props = msg.properties(&Context::new());

        assert_eq!(props.delivery_mode(), &Some(2));
        assert!(props.message_id().is_some());
        assert!(props.headers().is_some());
    }
}
