//! The three decoding stages.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{DecodeError, Result, Transform};
use crate::envelope::registry;
use crate::envelope::{Delivery, Envelope, Event, IntermediateMessage, Quarantine};

/// Projects a [`Delivery`] onto an [`IntermediateMessage`].
///
/// With `with_ack` the acknowledgement capability moves to the message;
/// otherwise it is released here and nothing downstream can settle the
/// delivery.
#[derive(Debug, Clone, Copy)]
pub struct ToMessage {
    with_ack: bool,
}

impl ToMessage {
    pub fn new(with_ack: bool) -> Self {
        Self { with_ack }
    }
}

#[async_trait]
impl Transform for ToMessage {
    type Input = Delivery;
    type Output = IntermediateMessage;

    async fn apply(&mut self, mut delivery: Delivery) -> Result<IntermediateMessage> {
        let ack = if self.with_ack {
            delivery.ack.take()
        } else {
            None
        };
        let body = String::from_utf8(delivery.body).map_err(|e| {
            debug!(delivery_tag = delivery.delivery_tag, error = %e, "body is not UTF-8");
            DecodeError::InvalidEnvelope(e.to_string())
        })?;

        let mut message = IntermediateMessage {
            exchange: delivery.exchange,
            routing_key: delivery.routing_key,
            content_type: delivery.content_type,
            delivery_tag: delivery.delivery_tag,
            priority: delivery.priority,
            message_id: delivery.message_id,
            timestamp: delivery.timestamp,
            headers: delivery.headers,
            body,
            ..IntermediateMessage::default()
        };
        message.ack.set(ack);
        Ok(message)
    }
}

/// Parses the message body as an [`Envelope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ToEnvelope;

#[async_trait]
impl Transform for ToEnvelope {
    type Input = IntermediateMessage;
    type Output = Envelope;

    async fn apply(&mut self, mut message: IntermediateMessage) -> Result<Envelope> {
        let mut envelope: Envelope = serde_json::from_str(&message.body).map_err(|e| {
            debug!(delivery_tag = message.delivery_tag, error = %e, "invalid envelope");
            DecodeError::InvalidEnvelope(e.to_string())
        })?;
        envelope.ack.set(message.ack.take());
        Ok(envelope)
    }
}

/// Selects the event variant from the tag and parses the message into it.
#[derive(Debug, Clone, Default)]
pub struct ToEvent {
    quarantine: Option<Quarantine>,
}

impl ToEvent {
    pub fn new() -> Self {
        Self { quarantine: None }
    }

    /// Spool messages with unregistered tags to `quarantine`.
    pub fn with_quarantine(quarantine: Quarantine) -> Self {
        Self {
            quarantine: Some(quarantine),
        }
    }

    async fn unsupported(&self, tag: &str, envelope: &Envelope) -> DecodeError {
        let error = DecodeError::UnsupportedEventType(tag.to_string());
        if let Some(quarantine) = &self.quarantine {
            // A failed spool is logged by the quarantine; the decode error
            // is what the caller needs to see.
            let _ = quarantine
                .spool(tag, &error.to_string(), &envelope.version, &envelope.message)
                .await;
        }
        error
    }
}

#[async_trait]
impl Transform for ToEvent {
    type Input = Envelope;
    type Output = Event;

    async fn apply(&mut self, mut envelope: Envelope) -> Result<Event> {
        let tag = registry::scan_tag(&envelope.message).unwrap_or_default().to_string();

        let Some(kind) = registry::lookup(&tag) else {
            warn!(tag = %tag, "unsupported event type");
            return Err(self.unsupported(&tag, &envelope).await.into());
        };

        let mut event = Event::parse(kind, &envelope.message).map_err(|e| {
            warn!(tag = %tag, kind = %kind, error = %e, "payload does not match schema");
            DecodeError::SchemaMismatch {
                tag: tag.clone(),
                cause: e.to_string(),
            }
        })?;

        event.base_mut().ack.set(envelope.ack.take());
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ack::testing::RecordingAcker;
    use crate::core::{AckHandle, Acknowledgeable, Error, TransformExt};
    use std::sync::Arc;

    const KEYPAIR: &str = r#"{"oslo.version":"2.0","oslo.message":"{\"event_type\":\"keypair.create.end\",\"_unique_id\":\"u1\"}"}"#;

    #[tokio::test]
    async fn test_ack_moves_through_stages() {
        let acker = Arc::new(RecordingAcker::default());
        let delivery = Delivery::new(11, KEYPAIR).with_ack(AckHandle::new(11, acker.clone()));

        let mut chain = ToMessage::new(true).then(ToEnvelope).then(ToEvent::new());
        let mut event = chain.apply(delivery).await.unwrap();

        assert_eq!(event.ack_handle().map(|h| h.delivery_tag()), Some(11));
        event.take_ack().unwrap().ack().await.unwrap();
        assert_eq!(*acker.acks.lock().unwrap(), vec![11]);
    }

    #[tokio::test]
    async fn test_without_ack_no_capability() {
        let acker = Arc::new(RecordingAcker::default());
        let delivery = Delivery::new(12, KEYPAIR).with_ack(AckHandle::new(12, acker));

        let mut chain = ToMessage::new(false).then(ToEnvelope).then(ToEvent::new());
        let event = chain.apply(delivery).await.unwrap();
        assert!(event.ack_handle().is_none());
    }

    #[tokio::test]
    async fn test_envelope_aliases_and_unknown_keys() {
        let mut stage = ToEnvelope;
        let aliased = IntermediateMessage {
            body: r#"{"version":"2.0","payload":"{}"}"#.to_string(),
            ..IntermediateMessage::default()
        };
        assert_eq!(stage.apply(aliased).await.unwrap().version, "2.0");

        let extra = IntermediateMessage {
            body: r#"{"oslo.version":"2.0","oslo.message":"{}","x":1}"#.to_string(),
            ..IntermediateMessage::default()
        };
        assert!(matches!(
            stage.apply(extra).await,
            Err(Error::Decode(DecodeError::InvalidEnvelope(_)))
        ));
    }

    #[tokio::test]
    async fn test_missing_tag_is_unsupported() {
        let envelope = Envelope {
            version: "2.0".into(),
            message: r#"{"payload":{}}"#.into(),
            ..Envelope::default()
        };
        let result = ToEvent::new().apply(envelope).await;
        assert!(matches!(
            result,
            Err(Error::Decode(DecodeError::UnsupportedEventType(tag))) if tag.is_empty()
        ));
    }

    #[tokio::test]
    async fn test_unsupported_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let envelope = Envelope {
            version: "2.0".into(),
            message: r#"{"event_type":"fleet.rebalance.start"}"#.into(),
            ..Envelope::default()
        };
        let mut stage = ToEvent::with_quarantine(Quarantine::new(dir.path()));
        assert!(stage.apply(envelope).await.is_err());

        let spooled: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(spooled.len(), 1);
    }
}
