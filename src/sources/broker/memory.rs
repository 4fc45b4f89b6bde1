//! In-process broker.
//!
//! Holds one queue, hands deliveries to subscriptions in FIFO order and
//! keeps unacknowledged deliveries in flight until they are settled. A
//! dropped connection requeues everything in flight, marked redelivered,
//! the way an AMQP broker does when a channel closes.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::config::{BrokerConfig, ServerConfig};
use crate::core::{AckHandle, AckSlot, Acknowledger, Error, Result};
use crate::envelope::Delivery;
use crate::sources::broker::{Connector, Subscription};

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Message>,
    in_flight: BTreeMap<u64, Message>,
    next_tag: u64,
    generation: u64,
    connections: usize,
    unreachable: HashSet<String>,
    refusal: Option<(String, String)>,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A broker living in the current process.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message.
    pub fn publish(&self, exchange: &str, routing_key: &str, body: impl Into<Vec<u8>>) {
        self.inner.state().queue.push_back(Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.into(),
            redelivered: false,
        });
        self.inner.notify.notify_waiters();
    }

    /// Break every live subscription; in-flight deliveries are requeued.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state();
            state.generation += 1;
            let in_flight = std::mem::take(&mut state.in_flight);
            for (_, mut message) in in_flight.into_iter().rev() {
                message.redelivered = true;
                state.queue.push_front(message);
            }
            debug!(generation = state.generation, "memory broker dropped its connections");
        }
        self.inner.notify.notify_waiters();
    }

    /// Make connections to `address` fail (or succeed again).
    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        let mut state = self.inner.state();
        if unreachable {
            state.unreachable.insert(address.to_string());
        } else {
            state.unreachable.remove(address);
        }
    }

    /// Reject every future connection with a configuration error.
    pub fn refuse(&self, field: &str, reason: &str) {
        self.inner.state().refusal = Some((field.to_string(), reason.to_string()));
    }

    /// Delivery tags acknowledged so far, in order.
    pub fn acked(&self) -> Vec<u64> {
        self.inner.state().acks.clone()
    }

    /// `(delivery tag, requeue)` of every rejection so far.
    pub fn nacked(&self) -> Vec<(u64, bool)> {
        self.inner.state().nacks.clone()
    }

    /// Messages waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.inner.state().queue.len()
    }

    /// Deliveries handed out and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.inner.state().in_flight.len()
    }

    /// Successful connections so far.
    pub fn connections(&self) -> usize {
        self.inner.state().connections
    }
}

fn take_settled(state: &mut State, delivery_tag: u64, multiple: bool) -> Result<Vec<(u64, Message)>> {
    if !state.in_flight.contains_key(&delivery_tag) {
        return Err(Error::custom(format!("unknown delivery tag {}", delivery_tag)));
    }
    if !multiple {
        return Ok(state
            .in_flight
            .remove(&delivery_tag)
            .map(|message| vec![(delivery_tag, message)])
            .unwrap_or_default());
    }
    let rest = state.in_flight.split_off(&(delivery_tag + 1));
    Ok(std::mem::replace(&mut state.in_flight, rest).into_iter().collect())
}

#[async_trait]
impl Acknowledger for Inner {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        let mut state = self.state();
        for (tag, _) in take_settled(&mut state, delivery_tag, multiple)? {
            state.acks.push(tag);
        }
        Ok(())
    }

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        {
            let mut state = self.state();
            for (tag, mut message) in take_settled(&mut state, delivery_tag, multiple)? {
                state.nacks.push((tag, requeue));
                if requeue {
                    message.redelivered = true;
                    state.queue.push_back(message);
                }
            }
        }
        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(
        &self,
        server: &ServerConfig,
        config: &BrokerConfig,
    ) -> Result<Box<dyn Subscription>> {
        let mut state = self.inner.state();
        if let Some((field, reason)) = &state.refusal {
            return Err(Error::configuration(field.clone(), reason.clone()));
        }
        if state.unreachable.contains(&server.address) {
            return Err(Error::source_io(
                server.to_string(),
                io::Error::new(io::ErrorKind::ConnectionRefused, "server unreachable"),
            ));
        }
        state.connections += 1;

        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            generation: state.generation,
            origin: server.to_string(),
            consumer_tag: config.client.tag.clone(),
        }))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    generation: u64,
    origin: String,
    consumer_tag: String,
}

impl MemorySubscription {
    fn poll_queue(&self) -> Result<Option<Delivery>> {
        let mut state = self.inner.state();
        if state.generation != self.generation {
            return Err(Error::source_io(
                self.origin.clone(),
                io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
            ));
        }
        let Some(message) = state.queue.pop_front() else {
            return Ok(None);
        };

        state.next_tag += 1;
        let delivery_tag = state.next_tag;
        state.in_flight.insert(delivery_tag, message.clone());
        trace!(delivery_tag, consumer_tag = %self.consumer_tag, "delivering");

        let acker: Arc<dyn Acknowledger> = self.inner.clone();
        Ok(Some(Delivery {
            exchange: message.exchange,
            routing_key: message.routing_key,
            content_type: Some("application/json".to_string()),
            delivery_tag,
            redelivered: message.redelivered,
            body: message.body,
            ack: AckSlot::new(Some(AckHandle::new(delivery_tag, acker))),
            ..Delivery::default()
        }))
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.poll_queue()? {
                return Ok(Some(delivery));
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    async fn subscribe(broker: &MemoryBroker) -> Box<dyn Subscription> {
        let config = BrokerConfig::new(ServerConfig::new("localhost"), "q");
        broker.connect(&config.servers[0], &config).await.unwrap()
    }

    #[tokio::test]
    async fn test_ack_and_nack_bookkeeping() {
        let broker = MemoryBroker::new();
        broker.publish("x", "k", "a");
        broker.publish("x", "k", "b");
        broker.publish("x", "k", "c");

        let mut subscription = subscribe(&broker).await;
        let mut a = subscription.recv().await.unwrap().unwrap();
        let mut b = subscription.recv().await.unwrap().unwrap();
        assert_eq!(broker.in_flight(), 2);

        a.ack.take().unwrap().ack().await.unwrap();
        b.ack.take().unwrap().nack(true).await.unwrap();

        assert_eq!(broker.acked(), vec![a.delivery_tag]);
        assert_eq!(broker.nacked(), vec![(b.delivery_tag, true)]);

        let c = subscription.recv().await.unwrap().unwrap();
        let b_again = subscription.recv().await.unwrap().unwrap();
        assert_eq!(c.body, b"c");
        assert_eq!(b_again.body, b"b");
        assert!(b_again.redelivered);
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish() {
        let broker = MemoryBroker::new();
        let mut subscription = subscribe(&broker).await;

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish("x", "k", "late");
        });

        let delivery = subscription.recv().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"late");
    }

    #[tokio::test]
    async fn test_disconnect_requeues_in_flight() {
        let broker = MemoryBroker::new();
        broker.publish("x", "k", "1");
        broker.publish("x", "k", "2");

        let mut subscription = subscribe(&broker).await;
        let first = subscription.recv().await.unwrap().unwrap();
        broker.disconnect();

        assert!(subscription.recv().await.is_err());
        assert_eq!(broker.pending(), 2);
        assert_eq!(broker.in_flight(), 0);

        let mut again = subscribe(&broker).await;
        let redelivered = again.recv().await.unwrap().unwrap();
        assert_eq!(redelivered.body, first.body);
        assert!(redelivered.redelivered);

        // The stale handle belongs to the broken connection.
        let mut first = first;
        assert!(first.ack.take().unwrap().ack().await.is_err());
    }

    #[tokio::test]
    async fn test_multiple_ack() {
        let broker = MemoryBroker::new();
        for body in ["a", "b", "c"] {
            broker.publish("x", "k", body);
        }
        let mut subscription = subscribe(&broker).await;
        let _a = subscription.recv().await.unwrap().unwrap();
        let b = subscription.recv().await.unwrap().unwrap();
        let _c = subscription.recv().await.unwrap().unwrap();

        broker.inner.ack(b.delivery_tag, true).await.unwrap();
        assert_eq!(broker.acked().len(), 2);
        assert_eq!(broker.in_flight(), 1);
    }
}
