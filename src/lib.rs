// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod broker;
pub mod channel;
pub mod configs;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod topology;
pub mod transactional;

pub use consumer::{BatchHandler, MessageHandler, ReceivedMessage};
