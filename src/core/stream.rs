//! The lazy, cancellable stream every source produces.
//!
//! A [`Stream`] is pulled one value at a time with [`Stream::next`]. Once it
//! is exhausted, [`Stream::err`] reports why: `None` for a natural end or a
//! caller-initiated cancellation, `Some(error)` otherwise.
//!
//! Pure sources are pulled inline on the consumer's task. Sources doing real
//! I/O run on their own task and hand values over a bounded channel.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::core::error::{Error, Result};
use crate::core::scope::Scope;
use crate::core::traits::Source;

/// Default capacity of the channel between a producer task and its consumer.
pub const DEFAULT_CAPACITY: usize = 1;

/// Terminal error shared between a stream and its producer task.
#[derive(Clone, Default)]
struct Status(Arc<Mutex<Option<Error>>>);

impl Status {
    /// Keep the first error recorded.
    fn record(&self, error: Error) {
        let mut slot = self.0.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn get(&self) -> Option<Error> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn clear(&self) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

enum Feed<T> {
    Inline(Box<dyn Source<Item = T>>),
    Channel(mpsc::Receiver<T>),
    Done,
}

enum Step<T> {
    Item(T),
    End(Option<Error>),
    Cancelled,
}

/// A single-consumer sequence of values bound to a cancellation scope.
pub struct Stream<T> {
    feed: Feed<T>,
    scope: Scope,
    status: Status,
}

impl<T: Send + 'static> Stream<T> {
    /// Pull values from `source` on the consumer's task.
    pub fn inline<S>(scope: &Scope, source: S) -> Self
    where
        S: Source<Item = T>,
    {
        Self {
            feed: Feed::Inline(Box::new(source)),
            scope: scope.clone(),
            status: Status::default(),
        }
    }

    /// Run `source` on its own task, handing values over a channel of
    /// `capacity` slots.
    pub fn spawn<S>(scope: &Scope, source: S, capacity: usize) -> Self
    where
        S: Source<Item = T>,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let status = Status::default();
        let task_status = status.clone();
        let task_scope = scope.clone();

        tokio::spawn(async move {
            let mut source = source;
            let mut cancelled = false;

            loop {
                let produced = tokio::select! {
                    biased;
                    _ = task_scope.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tx.closed() => {
                        trace!("stream dropped, stopping producer");
                        break;
                    }
                    produced = source.produce() => produced,
                };

                match produced {
                    Ok(Some(item)) => {
                        let sent = tokio::select! {
                            biased;
                            _ = task_scope.cancelled() => {
                                cancelled = true;
                                break;
                            }
                            sent = tx.send(item) => sent,
                        };
                        if sent.is_err() {
                            trace!("stream consumer went away, stopping producer");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        task_status.record(e);
                        break;
                    }
                }
            }

            match source.close().await {
                Err(e) if cancelled => debug!(error = %e, "error closing cancelled source"),
                Err(e) => task_status.record(e),
                Ok(()) => {}
            }
            // The consumer observes exhaustion only once `tx` is gone, which
            // happens after the status has been written.
            drop(tx);
        });

        Self {
            feed: Feed::Channel(rx),
            scope: scope.clone(),
            status,
        }
    }

    /// A stream that is already exhausted.
    pub fn empty(scope: &Scope) -> Self {
        Self {
            feed: Feed::Done,
            scope: scope.clone(),
            status: Status::default(),
        }
    }

    /// Pull the next value; `None` once exhausted or cancelled.
    pub async fn next(&mut self) -> Option<T> {
        let step = match &mut self.feed {
            Feed::Done => return None,
            Feed::Inline(source) => {
                tokio::select! {
                    biased;
                    _ = self.scope.cancelled() => Step::Cancelled,
                    produced = source.produce() => match produced {
                        Ok(Some(item)) => Step::Item(item),
                        Ok(None) => Step::End(None),
                        Err(e) => Step::End(Some(e)),
                    },
                }
            }
            Feed::Channel(rx) => {
                tokio::select! {
                    biased;
                    _ = self.scope.cancelled() => Step::Cancelled,
                    item = rx.recv() => match item {
                        Some(item) => Step::Item(item),
                        None => Step::End(None),
                    },
                }
            }
        };

        match step {
            Step::Item(item) => Some(item),
            Step::End(error) => {
                if let Some(e) = error {
                    self.status.record(e);
                }
                self.shutdown(false).await;
                None
            }
            Step::Cancelled => {
                self.shutdown(true).await;
                None
            }
        }
    }

    async fn shutdown(&mut self, cancelled: bool) {
        if let Feed::Inline(mut source) = std::mem::replace(&mut self.feed, Feed::Done) {
            match source.close().await {
                Err(e) if cancelled => debug!(error = %e, "error closing cancelled source"),
                Err(e) => self.status.record(e),
                Ok(()) => {}
            }
        }
    }

    /// Terminal error, meaningful after exhaustion.
    pub fn err(&self) -> Option<Error> {
        self.status.get()
    }

    /// Forget the terminal error. The source is not re-opened.
    pub fn reset(&mut self) {
        self.status.clear();
    }

    /// Whether the stream has been exhausted or cancelled.
    pub fn is_done(&self) -> bool {
        matches!(self.feed, Feed::Done)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Drain the remaining values into a vector.
    pub async fn to_vec(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        items
    }

    /// Adapt into a `futures` stream. The terminal error is not reachable
    /// through the adapter.
    pub fn into_stream(self) -> impl futures::Stream<Item = T> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }
}

/// Emit every value of each stream in turn.
///
/// All inputs are drained even if an earlier one failed; the terminal error
/// is the first non-`None` error among the inputs.
pub fn concat<T: Send + 'static>(scope: &Scope, streams: Vec<Stream<T>>) -> Stream<T> {
    Stream::inline(
        scope,
        Concat {
            parts: streams.into(),
            first_error: None,
        },
    )
}

struct Concat<T> {
    parts: VecDeque<Stream<T>>,
    first_error: Option<Error>,
}

#[async_trait]
impl<T: Send + 'static> Source for Concat<T> {
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        while let Some(part) = self.parts.front_mut() {
            if let Some(item) = part.next().await {
                return Ok(Some(item));
            }
            if let Some(done) = self.parts.pop_front() {
                if self.first_error.is_none() {
                    self.first_error = done.err();
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.parts.clear();
        match self.first_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Interleave the inputs in arrival order.
///
/// Each input is read by its own task. The merged stream closes when every
/// input has closed or `scope` is cancelled; values still buffered at
/// cancellation are discarded. Dropping the merged stream stops the readers,
/// which drop and so close their inputs. The terminal error is the first one
/// any input reports.
pub fn merge<T: Send + 'static>(scope: &Scope, streams: Vec<Stream<T>>) -> Stream<T> {
    let (tx, rx) = mpsc::channel(streams.len().max(1));
    let status = Status::default();

    for (index, mut input) in streams.into_iter().enumerate() {
        let tx = tx.clone();
        let status = status.clone();
        let scope = scope.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = scope.cancelled() => break,
                    _ = tx.closed() => break,
                    next = input.next() => next,
                };
                match next {
                    Some(item) => match scope.run(tx.send(item)).await {
                        Some(Ok(())) => {}
                        _ => break,
                    },
                    None => {
                        if let Some(e) = input.err() {
                            status.record(e);
                        }
                        trace!(input = index, "merge input exhausted");
                        break;
                    }
                }
            }
        });
    }

    Stream {
        feed: Feed::Channel(rx),
        scope: scope.clone(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::VecSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Failing;

    #[async_trait]
    impl Source for Failing {
        type Item = i64;

        async fn produce(&mut self) -> Result<Option<i64>> {
            Err(Error::custom("boom"))
        }
    }

    #[tokio::test]
    async fn test_inline_exhausts_without_error() {
        let scope = Scope::new();
        let mut stream = Stream::inline(&scope, VecSource::new(vec![1, 2, 3]));
        assert_eq!(stream.to_vec().await, vec![1, 2, 3]);
        assert!(stream.err().is_none());
        assert!(stream.is_done());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_spawned_keeps_order() {
        let scope = Scope::new();
        let mut stream = Stream::spawn(&scope, VecSource::new((0..50).collect()), 1);
        assert_eq!(stream.to_vec().await, (0..50).collect::<Vec<i64>>());
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn test_error_is_terminal_and_resettable() {
        let scope = Scope::new();
        let mut stream = Stream::spawn(&scope, Failing, 1);
        assert!(stream.next().await.is_none());
        assert!(matches!(stream.err(), Some(Error::Custom(_))));
        stream.reset();
        assert!(stream.err().is_none());
    }

    #[tokio::test]
    async fn test_concat_preserves_order() {
        let scope = Scope::new();
        let first = Stream::inline(&scope, VecSource::new(vec!["a", "b", "c"]));
        let second = Stream::spawn(&scope, VecSource::new(vec!["x", "y"]), 1);
        let mut joined = concat(&scope, vec![first, second]);
        assert_eq!(joined.to_vec().await, vec!["a", "b", "c", "x", "y"]);
        assert!(joined.err().is_none());
    }

    #[tokio::test]
    async fn test_concat_first_error_wins() {
        let scope = Scope::new();
        let failing = Stream::inline(&scope, Failing);
        let fine = Stream::inline(&scope, VecSource::new(vec![4]));
        let mut joined = concat(&scope, vec![failing, fine]);
        assert_eq!(joined.to_vec().await, vec![4]);
        assert!(matches!(joined.err(), Some(Error::Custom(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_merge_yields_everything() {
        let scope = Scope::new();
        let left = Stream::spawn(&scope, VecSource::new((0..20).collect()), 1);
        let right = Stream::spawn(&scope, VecSource::new((100..120).collect()), 1);
        let mut merged = merge(&scope, vec![left, right]);
        let mut items: Vec<i64> = merged.to_vec().await;

        let left_only: Vec<_> = items.iter().copied().filter(|x| *x < 100).collect();
        assert_eq!(left_only, (0..20).collect::<Vec<_>>());

        items.sort();
        let mut expected: Vec<i64> = (0..20).chain(100..120).collect();
        expected.sort();
        assert_eq!(items, expected);
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_stream() {
        let scope = Scope::new();
        let mut stream = Stream::spawn(&scope, crate::sources::Sequence::constant(1), 1);
        assert_eq!(stream.next().await, Some(1));
        scope.cancel();
        let extra = tokio::time::timeout(Duration::from_millis(100), stream.to_vec())
            .await
            .unwrap();
        assert!(extra.len() <= 1);
        assert!(stream.err().is_none());
    }

    struct Stalled(Arc<AtomicBool>);

    #[async_trait]
    impl Source for Stalled {
        type Item = i64;

        async fn produce(&mut self) -> Result<Option<i64>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropped_stream_closes_spawned_source() {
        let scope = Scope::new();
        let closed = Arc::new(AtomicBool::new(false));
        let stream = Stream::spawn(&scope, Stalled(closed.clone()), 1);

        drop(stream);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(closed.load(Ordering::SeqCst));
        assert!(!scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_merge_closes_its_inputs() {
        let scope = Scope::new();
        let left = Arc::new(AtomicBool::new(false));
        let right = Arc::new(AtomicBool::new(false));
        let merged = merge(
            &scope,
            vec![
                Stream::spawn(&scope, Stalled(left.clone()), 1),
                Stream::spawn(&scope, Stalled(right.clone()), 1),
            ],
        );

        drop(merged);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(left.load(Ordering::SeqCst));
        assert!(right.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_into_stream_adapter() {
        use futures::StreamExt;

        let scope = Scope::new();
        let stream = Stream::inline(&scope, VecSource::new(vec![1, 2]));
        let items: Vec<i64> = stream.into_stream().collect().await;
        assert_eq!(items, vec![1, 2]);
    }
}
