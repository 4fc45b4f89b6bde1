//! Delivery acknowledgement capability.
//!
//! A broker delivery can be settled (acked or nacked) exactly once. The
//! capability to do so travels with the value currently representing the
//! delivery: [`AckHandle`] is move-only, so moving it from a `Delivery`
//! into an `Envelope` and then into an event leaves the predecessor without
//! an acknowledgement path.
//!
//! The chain runner additionally holds an [`AckToken`] for the value in
//! flight so it can nack a delivery whose value was dropped mid-chain. Both
//! share one settlement flag; whoever settles first wins and every later
//! attempt is a no-op.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::core::error::Result;

/// Settles deliveries on the broker side.
///
/// Implemented by every broker connector. Calls are addressed by the
/// delivery tag assigned by the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Positively acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()>;

    /// Reject a delivery, optionally asking the broker to requeue it.
    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()>;
}

struct AckState {
    delivery_tag: u64,
    acker: Arc<dyn Acknowledger>,
    settled: AtomicBool,
}

impl AckState {
    /// Claim the right to settle. True only for the first caller.
    fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }

    async fn ack(&self) -> Result<bool> {
        if !self.claim() {
            debug!(delivery_tag = self.delivery_tag, "delivery already settled, skipping ack");
            return Ok(false);
        }
        self.acker.ack(self.delivery_tag, false).await?;
        Ok(true)
    }

    async fn nack(&self, requeue: bool) -> Result<bool> {
        if !self.claim() {
            debug!(delivery_tag = self.delivery_tag, "delivery already settled, skipping nack");
            return Ok(false);
        }
        self.acker.nack(self.delivery_tag, false, requeue).await?;
        Ok(true)
    }
}

/// One-shot capability to settle a single delivery.
pub struct AckHandle {
    state: Arc<AckState>,
}

impl AckHandle {
    /// Create the capability for a freshly received delivery.
    pub fn new(delivery_tag: u64, acker: Arc<dyn Acknowledger>) -> Self {
        Self {
            state: Arc::new(AckState {
                delivery_tag,
                acker,
                settled: AtomicBool::new(false),
            }),
        }
    }

    /// The broker-assigned delivery tag.
    pub fn delivery_tag(&self) -> u64 {
        self.state.delivery_tag
    }

    /// Whether the delivery has already been settled.
    pub fn is_settled(&self) -> bool {
        self.state.settled.load(Ordering::Acquire)
    }

    /// Observer used by the chain runner; does not move the capability.
    pub fn token(&self) -> AckToken {
        AckToken {
            state: self.state.clone(),
        }
    }

    /// Acknowledge (non-multiple). Returns false if already settled.
    pub async fn ack(self) -> Result<bool> {
        self.state.ack().await
    }

    /// Reject (non-multiple). Returns false if already settled.
    pub async fn nack(self, requeue: bool) -> Result<bool> {
        self.state.nack(requeue).await
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("delivery_tag", &self.state.delivery_tag)
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Runner-side view of a delivery that may already have been settled.
#[derive(Clone)]
pub struct AckToken {
    state: Arc<AckState>,
}

impl AckToken {
    pub fn delivery_tag(&self) -> u64 {
        self.state.delivery_tag
    }

    pub fn is_settled(&self) -> bool {
        self.state.settled.load(Ordering::Acquire)
    }

    /// Reject unless someone settled the delivery first.
    pub async fn nack(&self, requeue: bool) -> Result<bool> {
        self.state.nack(requeue).await
    }
}

impl fmt::Debug for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckToken")
            .field("delivery_tag", &self.state.delivery_tag)
            .finish()
    }
}

/// Field type holding an optional [`AckHandle`] inside a data record.
///
/// Cloning yields an empty slot and equality ignores the contents, so the
/// records that embed it keep value semantics while the capability stays
/// unique.
#[derive(Default)]
pub struct AckSlot(Option<AckHandle>);

impl AckSlot {
    pub fn new(handle: Option<AckHandle>) -> Self {
        Self(handle)
    }

    pub fn empty() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<&AckHandle> {
        self.0.as_ref()
    }

    pub fn take(&mut self) -> Option<AckHandle> {
        self.0.take()
    }

    pub fn set(&mut self, handle: Option<AckHandle>) {
        self.0 = handle;
    }

    pub fn is_some(&self) -> bool {
        self.0.is_some()
    }
}

impl Clone for AckSlot {
    fn clone(&self) -> Self {
        Self(None)
    }
}

impl PartialEq for AckSlot {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl fmt::Debug for AckSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(handle) => write!(f, "AckSlot({})", handle.delivery_tag()),
            None => write!(f, "AckSlot(-)"),
        }
    }
}

/// Values that may carry the acknowledgement capability of a delivery.
///
/// Plain values carry nothing and use the default methods.
pub trait Acknowledgeable {
    /// Borrow the capability, if any.
    fn ack_handle(&self) -> Option<&AckHandle> {
        None
    }

    /// Move the capability out of the value.
    fn take_ack(&mut self) -> Option<AckHandle> {
        None
    }
}

macro_rules! no_ack {
    ($($ty:ty),* $(,)?) => {
        $(impl Acknowledgeable for $ty {})*
    };
}

no_ack!(
    (),
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    char,
    String,
    Vec<u8>,
    serde_json::Value,
    std::time::Duration,
);

impl<T: Acknowledgeable> Acknowledgeable for Box<T> {
    fn ack_handle(&self) -> Option<&AckHandle> {
        (**self).ack_handle()
    }

    fn take_ack(&mut self) -> Option<AckHandle> {
        (**self).take_ack()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every settlement for assertions.
    #[derive(Default)]
    pub struct RecordingAcker {
        pub acks: Mutex<Vec<u64>>,
        pub nacks: Mutex<Vec<(u64, bool)>>,
    }

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self, delivery_tag: u64, _multiple: bool) -> Result<()> {
            self.acks.lock().unwrap().push(delivery_tag);
            Ok(())
        }

        async fn nack(&self, delivery_tag: u64, _multiple: bool, requeue: bool) -> Result<()> {
            self.nacks.lock().unwrap().push((delivery_tag, requeue));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingAcker;
    use super::*;

    #[tokio::test]
    async fn test_settles_only_once() {
        let acker = Arc::new(RecordingAcker::default());
        let handle = AckHandle::new(7, acker.clone());
        let token = handle.token();

        assert!(handle.ack().await.unwrap());
        assert!(!token.nack(false).await.unwrap());
        assert!(token.is_settled());

        assert_eq!(*acker.acks.lock().unwrap(), vec![7]);
        assert!(acker.nacks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_token_nacks_dropped_value() {
        let acker = Arc::new(RecordingAcker::default());
        let handle = AckHandle::new(3, acker.clone());
        let token = handle.token();
        drop(handle);

        assert!(token.nack(false).await.unwrap());
        assert_eq!(*acker.nacks.lock().unwrap(), vec![(3, false)]);
    }

    #[test]
    fn test_slot_clone_is_empty() {
        let acker = Arc::new(RecordingAcker::default());
        let slot = AckSlot::new(Some(AckHandle::new(1, acker)));
        let copy = slot.clone();
        assert!(slot.is_some());
        assert!(!copy.is_some());
        assert_eq!(slot, copy);
    }
}
