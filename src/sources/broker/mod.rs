//! Broker consumer source.
//!
//! A [`BrokerSource`] owns one logical subscription over the configured
//! servers. The transport is pluggable through [`Connector`]:
//! [`MemoryBroker`] runs in-process, and `AmqpConnector` (feature `amqp`)
//! speaks AMQP 0.9.1.
//!
//! Transport failures are logged and retried against the next server after
//! the configured reconnect delay; the consumer sees one contiguous stream
//! of deliveries. A configuration error from a connector ends the stream.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{BrokerConfig, ServerConfig};
use crate::core::stream::DEFAULT_CAPACITY;
use crate::core::{Error, Result, Source};
use crate::envelope::Delivery;

#[cfg(feature = "amqp")]
pub use amqp::AmqpConnector;
pub use memory::MemoryBroker;

/// Opens subscriptions on a server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `server`, declare the queue and bindings of `config`, and
    /// start consuming.
    ///
    /// Return [`Error::Configuration`] for failures no retry can fix; any
    /// other error is treated as transient.
    async fn connect(
        &self,
        server: &ServerConfig,
        config: &BrokerConfig,
    ) -> Result<Box<dyn Subscription>>;
}

/// A live consumer on one server.
#[async_trait]
pub trait Subscription: Send {
    /// The next delivery. `Ok(None)` means the server ended the
    /// subscription.
    async fn recv(&mut self) -> Result<Option<Delivery>>;

    /// Cancel the consumer and release the connection.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Yields the deliveries of a broker queue.
pub struct BrokerSource<C> {
    config: BrokerConfig,
    connector: C,
    subscription: Option<Box<dyn Subscription>>,
    next_server: usize,
    capacity: usize,
    received: u64,
}

impl<C: Connector> BrokerSource<C> {
    /// Validate `config` and build the source. Nothing connects until the
    /// stream is pulled.
    pub fn new(config: BrokerConfig, connector: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            subscription: None,
            next_server: 0,
            capacity: DEFAULT_CAPACITY,
            received: 0,
        })
    }

    /// Set the channel capacity between the consumer task and the stream
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    async fn subscribe(&mut self) -> Result<()> {
        loop {
            let server = &self.config.servers[self.next_server % self.config.servers.len()];
            self.next_server = self.next_server.wrapping_add(1);

            let attempt = tokio::time::timeout(
                self.config.client.timeout,
                self.connector.connect(server, &self.config),
            )
            .await;

            let failure = match attempt {
                Ok(Ok(subscription)) => {
                    info!(server = %server, queue = %self.config.queue.name, "subscribed");
                    self.subscription = Some(subscription);
                    return Ok(());
                }
                Ok(Err(e @ Error::Configuration { .. })) => {
                    error!(server = %server, error = %e, "broker rejected the configuration");
                    return Err(e);
                }
                Ok(Err(e)) => e,
                Err(_) => Error::timeout(duration_ms(self.config.client.timeout)),
            };

            warn!(
                server = %server,
                error = %failure,
                retry_in_ms = duration_ms(self.config.reconnect_delay),
                "connection failed"
            );
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn drop_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            if let Err(e) = subscription.close().await {
                debug!(error = %e, "error closing failed subscription");
            }
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl<C: Connector> Source for BrokerSource<C> {
    type Item = Delivery;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        loop {
            if self.subscription.is_none() {
                self.subscribe().await?;
            }
            let Some(subscription) = self.subscription.as_mut() else {
                continue;
            };

            let failure = match subscription.recv().await {
                Ok(Some(delivery)) => {
                    self.received += 1;
                    return Ok(Some(delivery));
                }
                Ok(None) => Error::custom("subscription ended by the server"),
                Err(e) => e,
            };

            warn!(
                error = %failure,
                received = self.received,
                retry_in_ms = duration_ms(self.config.reconnect_delay),
                "subscription lost, reconnecting"
            );
            self.drop_subscription().await;
            tokio::time::sleep(self.config.reconnect_delay).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        debug!(received = self.received, "closing broker source");
        match self.subscription.take() {
            Some(mut subscription) => subscription.close().await,
            None => Ok(()),
        }
    }

    fn spawn_capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}
