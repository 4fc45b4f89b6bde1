//! Source combinators exposed through [`SourceExt`](crate::core::SourceExt),
//! and adapters turning closures and foreign streams into sources.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use tokio_stream::StreamExt;

use crate::core::{Result, Source};

/// Build a source from an async closure.
pub fn from_fn<F, Fut, T>(f: F) -> FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    T: Send + 'static,
{
    FnSource {
        f,
        _phantom: PhantomData,
    }
}

/// A source created from a function
pub struct FnSource<F, Fut, T> {
    f: F,
    _phantom: PhantomData<fn() -> (Fut, T)>,
}

#[async_trait]
impl<F, Fut, T> Source for FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    T: Send + 'static,
{
    type Item = T;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        (self.f)().await
    }
}

/// Yields the items of any `futures` stream, in order.
pub struct StreamSource<S> {
    stream: S,
}

impl<S> StreamSource<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Source for StreamSource<S>
where
    S: futures_core::Stream + Unpin + Send + 'static,
    S::Item: Send + 'static,
{
    type Item = S::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.stream.next().await)
    }
}

/// Maps every item of the inner source.
pub struct MapSource<P, F> {
    source: P,
    f: F,
}

impl<P, F> MapSource<P, F> {
    pub fn new(source: P, f: F) -> Self {
        Self { source, f }
    }
}

#[async_trait]
impl<P, F, U> Source for MapSource<P, F>
where
    P: Source,
    F: FnMut(P::Item) -> U + Send + 'static,
    U: Send + 'static,
{
    type Item = U;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        match self.source.produce().await? {
            Some(item) => Ok(Some((self.f)(item))),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.source.close().await
    }

    fn spawn_capacity(&self) -> Option<usize> {
        self.source.spawn_capacity()
    }
}

/// Ends after the first `remaining` items of the inner source.
pub struct TakeSource<P> {
    source: P,
    remaining: usize,
}

impl<P> TakeSource<P> {
    pub fn new(source: P, remaining: usize) -> Self {
        Self { source, remaining }
    }
}

#[async_trait]
impl<P: Source> Source for TakeSource<P> {
    type Item = P::Item;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        match self.source.produce().await? {
            Some(item) => {
                self.remaining -= 1;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.source.close().await
    }

    fn spawn_capacity(&self) -> Option<usize> {
        self.source.spawn_capacity()
    }
}
