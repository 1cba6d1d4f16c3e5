// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Carries trace context through AMQP message headers: the publisher injects
//! the caller's context, the dispatcher extracts it from each delivery and
//! opens a consumer span around the handler call.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, FieldTable, ShortString},
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Name of the tracer used for consumer spans.
pub(crate) const CONSUMER_TRACER: &str = "amqp consumer";

/// Adapter for injecting and extracting OpenTelemetry context from AMQP headers.
pub(crate) struct RabbitMQTracePropagator<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> RabbitMQTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for RabbitMQTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(
            key.to_lowercase().into(),
            AMQPValue::LongString(value.into()),
        );
    }
}

impl Extractor for RabbitMQTracePropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|header_value| {
            if let AMQPValue::LongString(header_value) = header_value {
                std::str::from_utf8(header_value.as_bytes())
                    .map_err(|e| error!("Error decoding header value {:?}", e))
                    .ok()
            } else {
                None
            }
        })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|header| header.as_str()).collect()
    }
}

/// Builds message headers carrying a trace context.
///
/// # Parameters
/// * `ctx` - Context to inject with the global propagator
///
/// # Returns
/// A header table with one long string per propagated field
pub(crate) fn inject_headers(ctx: &Context) -> FieldTable {
    let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut RabbitMQTracePropagator::new(&mut btree))
    });

    FieldTable::from(btree)
}

/// Extracts the trace context from message properties and starts a consumer
/// span under it.
///
/// # Parameters
/// * `props` - Properties of the received message
/// * `tracer` - Tracer starting the span
/// * `name` - Span name, usually the routing key
///
/// # Returns
/// The extracted context and the started span
pub(crate) fn new_span(
    props: &AMQPProperties,
    tracer: &BoxedTracer,
    name: &str,
) -> (Context, BoxedSpan) {
    let mut headers = props.headers().clone().unwrap_or_default().inner().clone();

    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&RabbitMQTracePropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injector_lowercases_keys() {
        let mut headers = BTreeMap::default();
        RabbitMQTracePropagator::new(&mut headers).set("TraceParent", "00-abc".to_owned());

        assert_eq!(
            headers.get(&ShortString::from("traceparent")),
            Some(&AMQPValue::LongString("00-abc".into()))
        );
    }

    #[test]
    fn extractor_reads_only_long_strings() {
        let mut headers = BTreeMap::default();
        headers.insert(
            ShortString::from("traceparent"),
            AMQPValue::LongString("00-abc".into()),
        );
        headers.insert(ShortString::from("retries"), AMQPValue::LongInt(3));

        let propagator = RabbitMQTracePropagator::new(&mut headers);
        assert_eq!(propagator.get("traceparent"), Some("00-abc"));
        assert_eq!(propagator.get("retries"), None);
        assert_eq!(propagator.keys().len(), 2);
    }
}
