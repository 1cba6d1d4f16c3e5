// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Dispatcher
//!
//! Starts one AMQP consumer per configured queue on a channel and feeds every
//! delivery to a `MessageHandler` in arrival order, until the consumers end
//! or a stop is requested. Also drains queues with `basic.get` for callers
//! that want every waiting message at once.

use crate::{
    configs::ConsumeDefinition,
    consumer::{consume, BatchHandler, MessageHandler, ReceivedMessage},
    errors::AmqpError,
    otel::CONSUMER_TRACER,
};
use futures_util::{
    stream::{select_all, BoxStream},
    Stream, StreamExt,
};
use lapin::{
    message::Delivery,
    options::{BasicConsumeOptions, BasicGetOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Cloneable handle that ends running consume loops.
///
/// Every loop gets its own signal, so a stop reaches the loops running when
/// it is issued and never a loop started afterwards.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    loops: Arc<Mutex<Vec<watch::Sender<bool>>>>,
}

impl StopHandle {
    pub fn new() -> StopHandle {
        StopHandle::default()
    }

    /// Asks every running consume loop to return.
    ///
    /// A loop finishes the message it is handling and takes no other one.
    ///
    /// # Returns
    /// `false` when nothing is consuming
    pub fn stop(&self) -> bool {
        let mut loops = self.senders();
        loops.retain(|tx| tx.receiver_count() > 0);

        if loops.is_empty() {
            return false;
        }

        for tx in loops.iter() {
            tx.send_replace(true);
        }

        info!(loops = loops.len(), "stopping consumer");
        true
    }

    /// Registers a new consume loop and returns its stop signal.
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);

        let mut loops = self.senders();
        loops.retain(|tx| tx.receiver_count() > 0);
        loops.push(tx);

        rx
    }

    fn senders(&self) -> MutexGuard<'_, Vec<watch::Sender<bool>>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds `items` to `on_item` one at a time until `stop` turns true or the
/// stream ends.
///
/// The stop signal is checked before every item, so once it is set no
/// further item is taken, even when the stream has more ready.
pub(crate) async fn run_until_stopped<S, F, Fut>(
    mut items: S,
    mut stop: watch::Receiver<bool>,
    mut on_item: F,
) where
    S: Stream + Unpin,
    F: FnMut(S::Item) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        if *stop.borrow() {
            debug!("consume loop stopped");
            break;
        }

        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() {
                    debug!("stop handle dropped, consume loop ends");
                    break;
                }
            }
            next = items.next() => {
                let Some(item) = next else {
                    debug!("every consumer ended");
                    break;
                };

                if *stop.borrow() {
                    debug!("consume loop stopped");
                    break;
                }

                on_item(item).await;
            }
        }
    }
}

/// Fetches items queue by queue, in the given order, until `fetch` returns
/// `None` for each of them.
///
/// # Returns
/// Every fetched item, or the first `fetch` error
pub(crate) async fn drain_queues<'q, T, F, Fut>(
    queues: &[&'q str],
    mut fetch: F,
) -> Result<Vec<T>, AmqpError>
where
    F: FnMut(&'q str) -> Fut,
    Fut: Future<Output = Result<Option<T>, AmqpError>>,
{
    let mut items = vec![];

    for &queue in queues {
        let before = items.len();

        while let Some(item) = fetch(queue).await? {
            items.push(item);
        }

        debug!(queue, count = items.len() - before, "queue drained");
    }

    Ok(items)
}

type DeliveryStream = BoxStream<'static, (String, Result<Delivery, lapin::Error>)>;

/// Consumes the queues of one channel.
pub struct Dispatcher<'d> {
    channel: &'d Channel,
    queues: Vec<&'d str>,
    options: &'d ConsumeDefinition,
}

impl<'d> Dispatcher<'d> {
    pub fn new(
        channel: &'d Channel,
        queues: Vec<&'d str>,
        options: &'d ConsumeDefinition,
    ) -> Dispatcher<'d> {
        Dispatcher {
            channel,
            queues,
            options,
        }
    }

    /// Limits how many unacknowledged messages the broker hands this channel.
    pub async fn qos(&self, prefetch: u16) -> Result<(), AmqpError> {
        debug!(prefetch, "configuring qos");

        self.channel
            .basic_qos(prefetch, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AmqpError::QoSDeclarationError(prefetch.to_string())
            })
    }

    async fn consumers(&self) -> Result<Vec<DeliveryStream>, AmqpError> {
        let mut streams = Vec::with_capacity(self.queues.len());

        for queue in &self.queues {
            let consumer = match self
                .channel
                .basic_consume(
                    queue,
                    &self.options.consumer_tag,
                    BasicConsumeOptions {
                        no_local: self.options.no_local,
                        no_ack: self.options.no_ack,
                        exclusive: self.options.exclusive,
                        nowait: self.options.nowait,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to create the consumer");
                    Err(AmqpError::BindingConsumerError(queue.to_string()))
                }
                Ok(c) => Ok(c),
            }?;

            let name = queue.to_string();
            streams.push(
                consumer
                    .map(move |delivery| (name.clone(), delivery))
                    .boxed(),
            );
        }

        Ok(streams)
    }

    /// Hands every delivery to `handler` until `stop` fires or all consumers
    /// end.
    ///
    /// Handler and delivery errors are logged and do not end the loop.
    ///
    /// # Parameters
    /// * `handler` - Called once per delivery, in arrival order
    /// * `stop` - Signal from `StopHandle::subscribe`
    pub async fn consume_blocking(
        &self,
        handler: &dyn MessageHandler,
        stop: watch::Receiver<bool>,
    ) -> Result<(), AmqpError> {
        let deliveries = select_all(self.consumers().await?);
        let tracer = global::tracer(CONSUMER_TRACER);
        let tracer = &tracer;

        info!(queues = ?self.queues, "waiting for messages, to exit stop the broker");

        run_until_stopped(
            deliveries,
            stop,
            |(queue, result): (String, Result<Delivery, lapin::Error>)| async move {
                match result {
                    Ok(delivery) => {
                        let msg = ReceivedMessage::new(&queue, delivery);
                        if let Err(err) = consume(tracer, &msg, handler).await {
                            error!(error = err.to_string(), queue = %queue, "error consume msg");
                        }
                    }
                    Err(err) => error!(error = err.to_string(), queue = %queue, "errors consume msg"),
                }
            },
        )
        .await;

        Ok(())
    }

    /// Fetches every waiting message of every queue with `basic.get`.
    ///
    /// Messages are fetched unacknowledged, so the caller must ack them
    /// before the channel closes or the broker requeues them.
    ///
    /// # Returns
    /// The messages in queue order, or `GetMessageError` naming the queue
    /// whose fetch failed
    pub async fn drain(&self) -> Result<Vec<ReceivedMessage>, AmqpError> {
        let channel = self.channel;

        drain_queues(&self.queues, |queue: &'d str| async move {
            let fetched = channel
                .basic_get(queue, BasicGetOptions { no_ack: false })
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), queue, "error to get message");
                    AmqpError::GetMessageError(queue.to_owned())
                })?;

            Ok::<_, AmqpError>(fetched.map(|msg| ReceivedMessage::new(queue, msg.delivery)))
        })
        .await
    }

    /// Drains the queues and hands the messages to `handler` in one call.
    pub async fn drain_into(&self, handler: &dyn BatchHandler) -> Result<(), AmqpError> {
        let msgs = self.drain().await?;
        handler.handle_batch(msgs).await
    }
}
