// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Received Messages and Handlers
//!
//! Wraps each delivery in a `ReceivedMessage` that knows how to acknowledge
//! or reject itself, and hands it to the user's handler inside a consumer span.
//! With the default `no_ack` consume flag the broker considers messages
//! delivered as soon as they are sent, and acknowledging them is an error.

use crate::{errors::AmqpError, otel};
use async_trait::async_trait;
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    protocol::basic::AMQPProperties,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
    Context,
};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use tracing::{debug, error};

/// A message delivered from one of the configured queues.
///
/// Owns its delivery, so each message is acknowledged through exactly one
/// value.
#[derive(Debug)]
pub struct ReceivedMessage {
    queue: String,
    delivery: Delivery,
}

impl ReceivedMessage {
    pub(crate) fn new(queue: &str, delivery: Delivery) -> ReceivedMessage {
        ReceivedMessage {
            queue: queue.to_owned(),
            delivery,
        }
    }

    /// Name of the queue the message came from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Exchange the message was published to.
    pub fn exchange(&self) -> &str {
        self.delivery.exchange.as_str()
    }

    /// Routing key the message was published with.
    pub fn routing_key(&self) -> &str {
        self.delivery.routing_key.as_str()
    }

    /// Channel-scoped tag identifying the delivery for ack and nack.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    /// Raw message body.
    pub fn payload(&self) -> &[u8] {
        &self.delivery.data
    }

    pub fn properties(&self) -> &AMQPProperties {
        &self.delivery.properties
    }

    /// Deserializes the JSON payload.
    ///
    /// # Returns
    /// The decoded value, or `ParsePayloadError` when the body is not valid
    /// JSON for `T`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        parse_json(&self.delivery.data)
    }

    /// Acknowledges the message so the broker removes it from the queue.
    ///
    /// # Returns
    /// `MissingDeliveryTag` for a delivery without a tag, `AckMessageError`
    /// when the broker call fails
    pub async fn ack(&self) -> Result<(), AmqpError> {
        check_tag(self.delivery.delivery_tag, "ack")?;

        self.delivery
            .ack(BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    /// Rejects the message.
    ///
    /// With `multiple` every unacknowledged message up to this one is
    /// rejected; with `requeue` the broker puts them back on the queue for
    /// another consumer.
    pub async fn nack(&self, multiple: bool, requeue: bool) -> Result<(), AmqpError> {
        check_tag(self.delivery.delivery_tag, "nack")?;

        self.delivery
            .nack(BasicNackOptions { multiple, requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    /// Rejects only this message and returns it to the queue.
    pub async fn reject(&self) -> Result<(), AmqpError> {
        self.nack(false, true).await
    }
}

fn check_tag(tag: u64, op: &str) -> Result<(), AmqpError> {
    if tag == 0 {
        return Err(AmqpError::MissingDeliveryTag(op.to_owned()));
    }

    Ok(())
}

pub(crate) fn parse_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, AmqpError> {
    serde_json::from_slice(data).map_err(|err| {
        error!(error = err.to_string(), "failure to parse payload");
        AmqpError::ParsePayloadError
    })
}

/// Handles messages one at a time while a broker is consuming.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message.
    ///
    /// # Parameters
    /// * `ctx` - Trace context extracted from the message headers
    /// * `msg` - The delivery, to be acked or nacked by the handler when
    ///   consuming with manual acknowledgement
    ///
    /// # Returns
    /// An error is logged by the consume loop, which keeps running
    async fn handle(&self, ctx: &Context, msg: &ReceivedMessage) -> Result<(), AmqpError>;
}

/// Handles every message drained from the queues in one call.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle_batch(&self, msgs: Vec<ReceivedMessage>) -> Result<(), AmqpError>;
}

/// Runs `handler` for a single delivery inside a consumer span.
///
/// Handler failures are recorded on the span and returned; what happens to
/// the message is up to the handler, which acks or nacks it itself.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    msg: &ReceivedMessage,
    handler: &dyn MessageHandler,
) -> Result<(), AmqpError> {
    let (ctx, mut span) = otel::new_span(msg.properties(), tracer, msg.routing_key());

    debug!(
        "received: {} - exchange: {} - queue: {}",
        msg.routing_key(),
        msg.exchange(),
        msg.queue()
    );

    match handler.handle(&ctx, msg).await {
        Ok(()) => {
            debug!("message successfully processed");
            span.set_status(Status::Ok);
            Ok(())
        }
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn parses_json_payload() {
        let value: Value = parse_json(br#"{"activity":"user_register"}"#).unwrap();
        assert_eq!(value["activity"], "user_register");

        assert_eq!(
            parse_json::<Value>(b"not json").unwrap_err(),
            AmqpError::ParsePayloadError
        );
    }

    #[test]
    fn zero_delivery_tag_cannot_be_acked() {
        assert_eq!(
            check_tag(0, "ack"),
            Err(AmqpError::MissingDeliveryTag("ack".to_owned()))
        );
        assert_eq!(
            check_tag(0, "nack").unwrap_err().to_string(),
            "nack: delivery_tag not set"
        );
        assert!(check_tag(42, "ack").is_ok());
    }
}
