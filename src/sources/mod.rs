//! Source implementations for the notiweld library.
//!
//! Pure generators ([`Sequence`], [`Random`], [`Fibonacci`], [`VecSource`])
//! are pulled inline by the consumer. [`Lines`] and
//! [`BrokerSource`](broker::BrokerSource) do real I/O and run on their own
//! task.

pub mod broker;
pub mod combinators;
pub mod file;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::TryRngCore;
use std::collections::VecDeque;

use crate::core::{Error, Result, Source};

pub use broker::{BrokerSource, Connector, MemoryBroker, Subscription};
pub use combinators::{from_fn, FnSource, MapSource, StreamSource, TakeSource};
pub use file::Lines;

/// A source that yields items from a vector
pub struct VecSource<T> {
    items: VecDeque<T>,
}

impl<T> VecSource<T> {
    /// Create a new vector source
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    /// Add more items to the source
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Check if the source has more items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get the number of remaining items
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl<T: Send + 'static> Source for VecSource<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.items.pop_front())
    }
}

/// An arithmetic integer sequence.
///
/// - `step == 0` requires `to == 0` and repeats `from` forever.
/// - `step > 0` stops strictly before `to` when `to > 0`, and never stops
///   otherwise.
/// - `step < 0` requires `to < from` and stops strictly after `to`.
///
/// The sequence also ends when the next value would overflow `i64`.
#[derive(Debug, Clone)]
pub struct Sequence {
    next: Option<i64>,
    to: i64,
    step: i64,
}

impl Sequence {
    /// Create a new sequence, validating the parameters
    pub fn new(from: i64, to: i64, step: i64) -> Result<Self> {
        if step == 0 && to != 0 {
            return Err(Error::configuration(
                "step",
                "a zero step is only valid for the constant sequence (to == 0)",
            ));
        }
        if step < 0 && to >= from {
            return Err(Error::configuration(
                "to",
                format!("a negative step requires to < from (from={}, to={})", from, to),
            ));
        }
        Ok(Self {
            next: Some(from),
            to,
            step,
        })
    }

    /// `from, from+1, ..., to-1`
    pub fn range(from: i64, to: i64) -> Result<Self> {
        Self::new(from, to, 1)
    }

    /// The same value forever
    pub fn constant(value: i64) -> Self {
        Self {
            next: Some(value),
            to: 0,
            step: 0,
        }
    }

    fn exhausted_at(&self, value: i64) -> bool {
        match self.step {
            s if s > 0 => self.to > 0 && value >= self.to,
            s if s < 0 => value <= self.to,
            _ => false,
        }
    }
}

#[async_trait]
impl Source for Sequence {
    type Item = i64;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        let Some(current) = self.next else {
            return Ok(None);
        };
        if self.exhausted_at(current) {
            self.next = None;
            return Ok(None);
        }
        self.next = current.checked_add(self.step);
        Ok(Some(current))
    }
}

/// Uniform integers in `[min, max)` drawn from the operating system's
/// cryptographic random source.
pub struct Random {
    min: i64,
    span: u64,
    rng: OsRng,
}

impl Random {
    pub fn new(min: i64, max: i64) -> Result<Self> {
        if min >= max {
            return Err(Error::configuration(
                "max",
                format!("empty interval [{}, {})", min, max),
            ));
        }
        Ok(Self {
            min,
            span: (max as i128 - min as i128) as u64,
            rng: OsRng,
        })
    }
}

#[async_trait]
impl Source for Random {
    type Item = i64;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        // Rejection sampling: values below `threshold` would bias the modulo.
        let threshold = self.span.wrapping_neg() % self.span;
        loop {
            let raw = self
                .rng
                .try_next_u64()
                .map_err(|e| Error::source_io("os-rng", e))?;
            if raw >= threshold {
                let value = self.min as i128 + (raw % self.span) as i128;
                return Ok(Some(value as i64));
            }
        }
    }
}

/// A source that generates fibonacci numbers
pub struct Fibonacci {
    current: Option<u64>,
    next: Option<u64>,
    count: Option<usize>,
}

impl Fibonacci {
    /// Create a fibonacci source that runs until `u64` overflows
    pub fn new() -> Self {
        Self {
            current: Some(0),
            next: Some(1),
            count: None,
        }
    }

    /// Create a fibonacci source with a limit
    pub fn with_limit(limit: usize) -> Self {
        Self {
            count: Some(limit),
            ..Self::new()
        }
    }
}

#[async_trait]
impl Source for Fibonacci {
    type Item = u64;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        if let Some(ref mut count) = self.count {
            if *count == 0 {
                return Ok(None);
            }
            *count -= 1;
        }

        let Some(result) = self.current else {
            return Ok(None);
        };
        self.current = self.next;
        self.next = self.next.and_then(|next| next.checked_add(result));
        Ok(Some(result))
    }
}

impl Default for Fibonacci {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Scope, SourceExt};

    #[tokio::test]
    async fn test_sequence_range_yields_n() {
        let scope = Scope::new();
        let mut stream = Sequence::range(0, 10).unwrap().open(&scope);
        let items = stream.to_vec().await;
        assert_eq!(items, (0..10).collect::<Vec<_>>());
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn test_sequence_stride_and_descending() {
        let scope = Scope::new();
        let up = Sequence::new(1, 10, 3).unwrap().open(&scope).to_vec().await;
        assert_eq!(up, vec![1, 4, 7]);

        let down = Sequence::new(5, 0, -2).unwrap().open(&scope).to_vec().await;
        assert_eq!(down, vec![5, 3, 1]);
    }

    #[tokio::test]
    async fn test_sequence_constant_repeats() {
        let scope = Scope::new();
        let items = Sequence::new(7, 0, 0)
            .unwrap()
            .take(100)
            .open(&scope)
            .to_vec()
            .await;
        assert_eq!(items.len(), 100);
        assert!(items.iter().all(|v| *v == 7));
    }

    #[test]
    fn test_sequence_rejects_bad_parameters() {
        assert!(matches!(
            Sequence::new(0, 5, 0),
            Err(Error::Configuration { .. })
        ));
        assert!(matches!(
            Sequence::new(0, 5, -1),
            Err(Error::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_random_stays_in_bounds() {
        let scope = Scope::new();
        let items = Random::new(-3, 4)
            .unwrap()
            .take(500)
            .open(&scope)
            .to_vec()
            .await;
        assert_eq!(items.len(), 500);
        assert!(items.iter().all(|v| (-3..4).contains(v)));
        assert!(Random::new(4, 4).is_err());
    }

    #[tokio::test]
    async fn test_fibonacci_with_limit() {
        let scope = Scope::new();
        let items = Fibonacci::with_limit(10).open(&scope).to_vec().await;
        assert_eq!(items, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
    }

    #[tokio::test]
    async fn test_fibonacci_ends_before_overflow() {
        let scope = Scope::new();
        let items = Fibonacci::new().open(&scope).to_vec().await;
        assert_eq!(items.len(), 94);
        assert_eq!(items.last(), Some(&12_200_160_415_121_876_738));
    }
}
