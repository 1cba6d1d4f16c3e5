// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Message Broker
//!
//! Every fallible operation of the broker facade returns `AmqpError`. Errors
//! coming from `lapin` are logged where they happen and mapped into one of
//! these variants, so callers only ever match on this enum.

use thiserror::Error;

/// Represents errors that can occur while configuring or using the broker.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// A required configuration value or environment variable is missing
    #[error("missing configuration `{0}`")]
    MissingConfig(String),

    /// The broker configuration could not be read or parsed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating or closing a channel
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// The queue name is not part of the configured topology
    #[error("queue `{0}` options not found")]
    UnknownQueue(String),

    /// Error binding a queue to an exchange
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Publish was called without a payload
    #[error("publish: payload not set")]
    EmptyPayload,

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error fetching a message with basic.get
    #[error("failure to get message from `{0}`")]
    GetMessageError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// The payload activity has no transactional routing key
    #[error("unsupported activity `{0}`")]
    UnsupportedActivity(String),

    /// The delivery carries no tag to acknowledge
    #[error("{0}: delivery_tag not set")]
    MissingDeliveryTag(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// A message handler reported a failure
    #[error("handler failure: {0}")]
    HandlerError(String),
}
