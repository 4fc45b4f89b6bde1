//! AMQP 0.9.1 connector built on `lapin`.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery as AmqpDelivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{BrokerConfig, ExchangeKind, ServerConfig};
use crate::core::{AckHandle, AckSlot, Acknowledger, Error, Result};
use crate::envelope::Delivery;
use crate::sources::broker::{Connector, Subscription};

/// Connects to real brokers.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector {
    properties: Option<fn() -> ConnectionProperties>,
}

impl AmqpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Customise the connection properties of every connection.
    pub fn with_properties(mut self, properties: fn() -> ConnectionProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// A protocol error is the server refusing what we asked for; retrying
/// the same declaration cannot succeed.
fn classify(origin: &ServerConfig, field: &str, error: lapin::Error) -> Error {
    match error {
        lapin::Error::ProtocolError(e) => Error::configuration(field, e.to_string()),
        other => Error::source_io(origin.to_string(), other),
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(
        &self,
        server: &ServerConfig,
        config: &BrokerConfig,
    ) -> Result<Box<dyn Subscription>> {
        let url = server.url()?;
        let properties = self.properties.map(|f| f()).unwrap_or_default();
        let connection = Connection::connect(url.as_str(), properties)
            .await
            .map_err(|e| Error::source_io(server.to_string(), e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::source_io(server.to_string(), e))?;

        if config.prefetch_size != 0 {
            warn!(
                prefetch_size = config.prefetch_size,
                "prefetch size is not supported by the client, ignoring"
            );
        }
        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| classify(server, "prefetch_count", e))?;

        for (i, binding) in config.bindings.iter().enumerate() {
            let exchange = &binding.exchange;
            if !exchange.declare {
                continue;
            }
            channel
                .exchange_declare(
                    &exchange.name,
                    exchange.kind.into(),
                    ExchangeDeclareOptions {
                        durable: exchange.durable,
                        auto_delete: exchange.auto_delete,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| classify(server, &format!("bindings[{}].exchange", i), e))?;
        }

        let queue = &config.queue;
        if queue.declare {
            channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: queue.durable,
                        exclusive: queue.exclusive,
                        auto_delete: queue.auto_delete,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| classify(server, "queue", e))?;
        }

        for (i, binding) in config.bindings.iter().enumerate() {
            for key in &binding.routing_keys {
                channel
                    .queue_bind(
                        &queue.name,
                        &binding.exchange.name,
                        key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| classify(server, &format!("bindings[{}].routing_keys", i), e))?;
            }
        }

        let consumer = channel
            .basic_consume(
                &queue.name,
                &config.client.tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| classify(server, "queue.name", e))?;

        info!(
            server = %server,
            queue = %queue.name,
            consumer_tag = %config.client.tag,
            "consuming"
        );

        Ok(Box::new(AmqpSubscription {
            acker: Arc::new(AmqpAcker {
                channel: channel.clone(),
            }),
            connection,
            channel,
            consumer,
            consumer_tag: config.client.tag.clone(),
            origin: server.to_string(),
        }))
    }
}

struct AmqpAcker {
    channel: Channel,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
            .map_err(Error::sink)
    }

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
            .map_err(Error::sink)
    }
}

struct AmqpSubscription {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    acker: Arc<AmqpAcker>,
    consumer_tag: String,
    origin: String,
}

impl AmqpSubscription {
    fn convert(&self, delivery: AmqpDelivery) -> Delivery {
        let properties = &delivery.properties;
        let headers = properties
            .headers()
            .as_ref()
            .map(|table| {
                table
                    .inner()
                    .iter()
                    .map(|(key, value)| {
                        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                        (key.to_string(), value)
                    })
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        let acker: Arc<dyn Acknowledger> = self.acker.clone();
        Delivery {
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            content_type: properties.content_type().as_ref().map(|s| s.to_string()),
            delivery_tag: delivery.delivery_tag,
            priority: *properties.priority(),
            redelivered: delivery.redelivered,
            message_id: properties.message_id().as_ref().map(|s| s.to_string()),
            timestamp: *properties.timestamp(),
            headers,
            ack: AckSlot::new(Some(AckHandle::new(delivery.delivery_tag, acker))),
            body: delivery.data,
        }
    }
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn recv(&mut self) -> Result<Option<Delivery>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(self.convert(delivery))),
            Some(Err(e)) => Err(Error::source_io(self.origin.clone(), e)),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        debug!(consumer_tag = %self.consumer_tag, "cancelling consumer");
        if let Err(e) = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
        {
            debug!(error = %e, "consumer cancel failed");
        }
        self.connection
            .close(200, "closing")
            .await
            .map_err(|e| Error::source_io(self.origin.clone(), e))
    }
}
