//! Envelope decoding: broker delivery to typed event.
//!
//! Decoding is a chain of three transforms:
//!
//! 1. [`ToMessage`]: [`Delivery`] to [`IntermediateMessage`], a stable,
//!    serializable projection of the delivery metadata and body.
//! 2. [`ToEnvelope`]: the message body parsed as an [`Envelope`]
//!    (`{"oslo.version": ..., "oslo.message": "<json string>"}`).
//! 3. [`ToEvent`]: the event type tag is scanned out of the inner message,
//!    looked up in the static [registry](registry), and the message is
//!    parsed strictly into the selected [`Event`] variant.
//!
//! The acknowledgement capability of the delivery moves along the chain
//! when [`decoder`] is asked to carry it, and ends up in the event's
//! [`Base`].

pub mod events;
pub mod quarantine;
pub mod registry;
pub mod stages;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{AckHandle, AckSlot, Acknowledgeable, TransformExt};
use crate::transforms::combinators::Then;
use crate::transforms::text::FromJson;

pub use events::{Base, Event};
pub use quarantine::Quarantine;
pub use registry::EventKind;
pub use stages::{ToEnvelope, ToEvent, ToMessage};

/// A message received from the broker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub delivery_tag: u64,
    pub priority: Option<u8>,
    pub redelivered: bool,
    pub message_id: Option<String>,
    /// Publisher timestamp, seconds since the epoch
    pub timestamp: Option<u64>,
    pub headers: BTreeMap<String, serde_json::Value>,
    pub body: Vec<u8>,
    pub ack: AckSlot,
}

impl Delivery {
    /// A delivery without routing metadata; mostly useful in tests.
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn with_ack(mut self, handle: AckHandle) -> Self {
        self.ack.set(Some(handle));
        self
    }
}

impl Acknowledgeable for Delivery {
    fn ack_handle(&self) -> Option<&AckHandle> {
        self.ack.get()
    }

    fn take_ack(&mut self) -> Option<AckHandle> {
        self.ack.take()
    }
}

/// Schema-stable form of a delivery; one of these per line in a recording.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntermediateMessage {
    #[serde(default)]
    pub exchange: String,

    #[serde(default)]
    pub routing_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default)]
    pub delivery_tag: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, serde_json::Value>,

    pub body: String,

    #[serde(skip)]
    pub ack: AckSlot,
}

impl Acknowledgeable for IntermediateMessage {
    fn ack_handle(&self) -> Option<&AckHandle> {
        self.ack.get()
    }

    fn take_ack(&mut self) -> Option<AckHandle> {
        self.ack.take()
    }
}

/// The versioned wrapper around every notification.
///
/// Exactly two keys are accepted; `version` and `payload` are understood
/// as aliases of the `oslo.*` names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    #[serde(rename = "oslo.version", alias = "version")]
    pub version: String,

    /// The notification itself, as a JSON document in a string
    #[serde(rename = "oslo.message", alias = "payload")]
    pub message: String,

    #[serde(skip)]
    pub ack: AckSlot,
}

impl Acknowledgeable for Envelope {
    fn ack_handle(&self) -> Option<&AckHandle> {
        self.ack.get()
    }

    fn take_ack(&mut self) -> Option<AckHandle> {
        self.ack.take()
    }
}

/// The live decoder: delivery in, event out.
pub type Decoder = Then<Then<ToMessage, ToEnvelope>, ToEvent>;

/// The replay decoder: recording line in, event out.
pub type Replay = Then<Then<FromJson<IntermediateMessage>, ToEnvelope>, ToEvent>;

/// Build the live decoder. With `with_ack` the delivery's acknowledgement
/// capability ends up on the event; without it no acknowledgement path
/// exists downstream.
pub fn decoder(with_ack: bool) -> Decoder {
    ToMessage::new(with_ack)
        .then(ToEnvelope)
        .then(ToEvent::new())
}

/// Like [`decoder`], spooling payloads with unknown tags to `quarantine`.
pub fn decoder_with_quarantine(with_ack: bool, quarantine: Quarantine) -> Decoder {
    ToMessage::new(with_ack)
        .then(ToEnvelope)
        .then(ToEvent::with_quarantine(quarantine))
}

/// Build the decoder for recording files written by
/// [`RecordingSink`](crate::sinks::RecordingSink).
pub fn replay() -> Replay {
    FromJson::new().then(ToEnvelope).then(ToEvent::new())
}
