// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! Establishes the connection a broker keeps for its whole lifetime and opens
//! the short-lived channels each broker operation works on.

use crate::{configs::Credentials, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Connects to RabbitMQ with the given credentials.
///
/// The connection is tagged with `name` so it can be told apart in the
/// management UI.
pub async fn new_amqp_connection(
    creds: &Credentials,
    name: &str,
) -> Result<Arc<Connection>, AmqpError> {
    debug!(host = %creds.host, port = creds.port, "creating amqp connection...");
    let options =
        ConnectionProperties::default().with_connection_name(LongString::from(name.to_owned()));

    match Connection::connect_uri(creds.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }
}

/// Opens a new channel on an established connection.
pub async fn new_amqp_channel(conn: &Connection) -> Result<Channel, AmqpError> {
    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!(id = c.id(), "channel created");
            Ok(c)
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}

/// Closes a channel, logging instead of failing when it is already gone.
pub async fn close_channel(channel: &Channel) {
    if !channel.status().connected() {
        return;
    }

    if let Err(err) = channel.close(200, "OK").await {
        error!(error = err.to_string(), "error to close the channel");
    }
}
