//! Core traits for the source/transform/sink system.
//!
//! A [`Source`] is opened into a [`Stream`] under a [`Scope`]; each value
//! pulled from the stream goes through a [`Transform`] chain and ends up in
//! a [`Sink`]. The pipeline driver in [`crate::pipeline`] wires the three
//! together.

use async_trait::async_trait;

use crate::core::error::Result;
use crate::core::scope::Scope;
use crate::core::stream::Stream;

/// A source generates items one at a time.
///
/// Sources are pull-based: [`Source::produce`] is called only when the
/// stream needs another value. Returning `Ok(None)` ends the stream; an
/// error ends it and becomes the stream's terminal error.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use notiweld::core::{Result, Source};
///
/// struct Countdown(u32);
///
/// #[async_trait]
/// impl Source for Countdown {
///     type Item = u32;
///
///     async fn produce(&mut self) -> Result<Option<Self::Item>> {
///         if self.0 == 0 {
///             return Ok(None);
///         }
///         self.0 -= 1;
///         Ok(Some(self.0))
///     }
/// }
/// ```
#[async_trait]
pub trait Source: Send + 'static {
    /// The type of items this source generates
    type Item: Send + 'static;

    /// Produce the next item, or `None` once the source is exhausted.
    async fn produce(&mut self) -> Result<Option<Self::Item>>;

    /// Release held resources. Called once, after the last `produce`.
    ///
    /// An error returned here becomes the stream's terminal error unless
    /// the stream was cancelled.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Channel capacity to run this source on its own task with, or `None`
    /// to pull it inline on the consumer's task.
    ///
    /// Sources doing real I/O return `Some`; wrappers report their inner
    /// source's answer.
    fn spawn_capacity(&self) -> Option<usize> {
        None
    }

    /// Open the source under `scope`, spawned or inline per
    /// [`Source::spawn_capacity`].
    fn open(self, scope: &Scope) -> Stream<Self::Item>
    where
        Self: Sized,
    {
        match self.spawn_capacity() {
            Some(capacity) => Stream::spawn(scope, self, capacity),
            None => Stream::inline(scope, self),
        }
    }
}

/// A transform maps one value to another: `A -> Result<B>`.
///
/// Returning [`Error::Drop`](crate::Error::Drop) skips the value,
/// [`Error::Quit`](crate::Error::Quit) ends the iteration, any other error
/// aborts it. Stateful transforms mutate their own fields, never the value
/// in flight.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use notiweld::core::{Result, Transform};
///
/// struct Double;
///
/// #[async_trait]
/// impl Transform for Double {
///     type Input = i64;
///     type Output = i64;
///
///     async fn apply(&mut self, item: i64) -> Result<i64> {
///         Ok(item * 2)
///     }
/// }
/// ```
#[async_trait]
pub trait Transform: Send {
    /// The type of items this transform accepts
    type Input: Send + 'static;
    /// The type of items this transform produces
    type Output: Send + 'static;

    /// Apply the transform to a single value.
    async fn apply(&mut self, item: Self::Input) -> Result<Self::Output>;
}

/// A sink absorbs values at the end of a pipeline.
///
/// Sinks own the terminal effects: writing, logging, accumulating, and
/// acknowledging the originating delivery once the value is absorbed.
#[async_trait]
pub trait Sink: Send {
    /// The type of items this sink accepts
    type Item: Send + 'static;

    /// Absorb a single item.
    async fn write(&mut self, item: Self::Item) -> Result<()>;

    /// Called when the upstream stream is exhausted.
    ///
    /// This allows sinks to flush any buffered state.
    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Extension trait for sources that provides combinator methods
pub trait SourceExt: Source {
    /// Map items through a function
    fn map<F, U>(self, f: F) -> crate::sources::combinators::MapSource<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item) -> U + Send + 'static,
        U: Send + 'static,
    {
        crate::sources::combinators::MapSource::new(self, f)
    }

    /// Take only the first N items
    fn take(self, count: usize) -> crate::sources::combinators::TakeSource<Self>
    where
        Self: Sized,
    {
        crate::sources::combinators::TakeSource::new(self, count)
    }
}

impl<P: Source> SourceExt for P {}

/// Extension trait for composing transforms.
pub trait TransformExt: Transform {
    /// Feed this transform's output into `next`.
    ///
    /// The composed transform short-circuits on the first error of either
    /// stage, sentinels included.
    fn then<N>(self, next: N) -> crate::transforms::combinators::Then<Self, N>
    where
        Self: Sized,
        N: Transform<Input = Self::Output>,
    {
        crate::transforms::combinators::Then::new(self, next)
    }

    /// Turn every failure of this transform except `Quit` into `Drop`.
    fn or_drop(self) -> crate::transforms::combinators::OrDrop<Self>
    where
        Self: Sized,
    {
        crate::transforms::combinators::OrDrop::new(self)
    }
}

impl<X: Transform> TransformExt for X {}
