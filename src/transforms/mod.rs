//! Transform implementations for the notiweld library.
//!
//! Transforms that claim identity ([`Delay`], [`Count`], [`MultiCount`],
//! [`Accumulate`], [`Cache`], [`MultiCache`], the stopwatch pair and
//! [`Inspect`]) return the value they were given; their effect is on a
//! handle the caller keeps ([`Counter`], [`Buffer`], ...). Handles are
//! `Clone` and thread-safe, so the caller can read them while the chain
//! runs.

pub mod combinators;
pub mod io;
pub mod text;

use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::core::{Error, Result, Transform};

pub use combinators::{OrDrop, Then};
pub use io::{Print, Write, WriteIf, Writef};
pub use text::{
    bytes_to_string, format, from_json, string_to_bytes, to_json, to_pretty_json, to_string,
    to_stringf, to_yaml, BytesToString, Format, FromJson, Stringify, Stringifyf, StringToBytes,
    ToJson, ToPrettyJson, ToYaml,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// A transform backed by a plain function.
pub struct FnTransform<F, A, B> {
    f: F,
    _phantom: PhantomData<fn(A) -> B>,
}

/// Lift an infallible function into a transform.
pub fn from_fn<F, A, B>(f: F) -> FnTransform<F, A, B>
where
    F: FnMut(A) -> B + Send,
{
    FnTransform {
        f,
        _phantom: PhantomData,
    }
}

/// A transform backed by a fallible function.
pub struct TryFnTransform<F, A, B> {
    f: F,
    _phantom: PhantomData<fn(A) -> B>,
}

/// Lift a fallible function into a transform; its errors, sentinels
/// included, are returned as-is.
pub fn try_from_fn<F, A, B>(f: F) -> TryFnTransform<F, A, B>
where
    F: FnMut(A) -> Result<B> + Send,
{
    TryFnTransform {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<F, A, B> Transform for FnTransform<F, A, B>
where
    F: FnMut(A) -> B + Send,
    A: Send + 'static,
    B: Send + 'static,
{
    type Input = A;
    type Output = B;

    async fn apply(&mut self, item: A) -> Result<B> {
        Ok((self.f)(item))
    }
}

#[async_trait]
impl<F, A, B> Transform for TryFnTransform<F, A, B>
where
    F: FnMut(A) -> Result<B> + Send,
    A: Send + 'static,
    B: Send + 'static,
{
    type Input = A;
    type Output = B;

    async fn apply(&mut self, item: A) -> Result<B> {
        (self.f)(item)
    }
}

/// Passes every value through untouched.
pub struct Identity<T>(PhantomData<fn(T) -> T>);

impl<T> Identity<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Identity<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Transform for Identity<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        Ok(item)
    }
}

/// Sleeps before passing each value on.
pub struct Delay<T> {
    duration: Duration,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Delay<T> {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Transform for Delay<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        tokio::time::sleep(self.duration).await;
        Ok(item)
    }
}

/// Shared counter read by the caller of a [`Count`].
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts the values passing through.
pub struct Count<T> {
    counter: Counter,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Count<T> {
    pub fn new(counter: Counter) -> Self {
        Self {
            counter,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Transform for Count<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        self.counter.increment();
        Ok(item)
    }
}

/// Shared per-key counts read by the caller of a [`MultiCount`].
#[derive(Debug)]
pub struct MultiCounter<K>(Arc<Mutex<HashMap<K, u64>>>);

impl<K> Clone for MultiCounter<K> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K> Default for MultiCounter<K> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }
}

impl<K: Eq + Hash + Clone> MultiCounter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> u64 {
        lock(&self.0).get(key).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<K, u64> {
        lock(&self.0).clone()
    }

    pub fn total(&self) -> u64 {
        lock(&self.0).values().sum()
    }
}

/// Counts values per key computed by `keyer`.
pub struct MultiCount<T, K, F> {
    counts: MultiCounter<K>,
    keyer: F,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T, K, F> MultiCount<T, K, F>
where
    F: FnMut(&T) -> K + Send,
{
    pub fn new(counts: MultiCounter<K>, keyer: F) -> Self {
        Self {
            counts,
            keyer,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, K, F> Transform for MultiCount<T, K, F>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: FnMut(&T) -> K + Send,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        let key = (self.keyer)(&item);
        *lock(&self.counts.0).entry(key).or_insert(0) += 1;
        Ok(item)
    }
}

/// Caller-owned buffer filled by an [`Accumulate`].
#[derive(Debug)]
pub struct Buffer<T>(Arc<Mutex<Vec<T>>>);

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T: Clone> Buffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.0).clone()
    }

    /// Empty the buffer, returning its contents.
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.0))
    }
}

/// Appends a copy of each value to a [`Buffer`].
///
/// The copy never carries an acknowledgement capability; the value passed
/// on keeps it.
pub struct Accumulate<T> {
    buffer: Buffer<T>,
}

impl<T> Accumulate<T> {
    pub fn new(buffer: Buffer<T>) -> Self {
        Self { buffer }
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Transform for Accumulate<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        lock(&self.buffer.0).push(item.clone());
        Ok(item)
    }
}

/// Keyed store filled by [`Cache`] (last value wins) or [`MultiCache`]
/// (values grouped in arrival order).
#[derive(Debug)]
pub struct Store<K, V>(Arc<Mutex<HashMap<K, V>>>);

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<K, V> Default for Store<K, V> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(HashMap::new())))
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Store<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        lock(&self.0).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn snapshot(&self) -> HashMap<K, V> {
        lock(&self.0).clone()
    }
}

/// Stores a copy of each value under the key computed by `keyer`.
pub struct Cache<T, K, F> {
    store: Store<K, T>,
    keyer: F,
}

impl<T, K, F> Cache<T, K, F>
where
    F: FnMut(&T) -> K + Send,
{
    pub fn new(store: Store<K, T>, keyer: F) -> Self {
        Self { store, keyer }
    }
}

#[async_trait]
impl<T, K, F> Transform for Cache<T, K, F>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: FnMut(&T) -> K + Send,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        let key = (self.keyer)(&item);
        lock(&self.store.0).insert(key, item.clone());
        Ok(item)
    }
}

/// Groups copies of the values under the key computed by `keyer`.
pub struct MultiCache<T, K, F> {
    store: Store<K, Vec<T>>,
    keyer: F,
}

impl<T, K, F> MultiCache<T, K, F>
where
    F: FnMut(&T) -> K + Send,
{
    pub fn new(store: Store<K, Vec<T>>, keyer: F) -> Self {
        Self { store, keyer }
    }
}

#[async_trait]
impl<T, K, F> Transform for MultiCache<T, K, F>
where
    T: Clone + Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: FnMut(&T) -> K + Send,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        let key = (self.keyer)(&item);
        lock(&self.store.0).entry(key).or_default().push(item.clone());
        Ok(item)
    }
}

/// Passes values for which `predicate` equals `accept_when`; drops the
/// rest.
pub struct Gate<T, F> {
    predicate: F,
    accept_when: bool,
    _phantom: PhantomData<fn(T) -> T>,
}

#[async_trait]
impl<T, F> Transform for Gate<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> bool + Send,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        if (self.predicate)(&item) == self.accept_when {
            Ok(item)
        } else {
            Err(Error::Drop)
        }
    }
}

fn gate<T, F>(predicate: F, accept_when: bool) -> Gate<T, F>
where
    F: FnMut(&T) -> bool + Send,
{
    Gate {
        predicate,
        accept_when,
        _phantom: PhantomData,
    }
}

/// Keep values matching `predicate`.
pub fn accept_if<T, F: FnMut(&T) -> bool + Send>(predicate: F) -> Gate<T, F> {
    gate(predicate, true)
}

/// Keep values not matching `predicate`.
pub fn accept_unless<T, F: FnMut(&T) -> bool + Send>(predicate: F) -> Gate<T, F> {
    gate(predicate, false)
}

/// Drop values matching `predicate`.
pub fn drop_if<T, F: FnMut(&T) -> bool + Send>(predicate: F) -> Gate<T, F> {
    gate(predicate, false)
}

/// Drop values not matching `predicate`.
pub fn drop_unless<T, F: FnMut(&T) -> bool + Send>(predicate: F) -> Gate<T, F> {
    gate(predicate, true)
}

#[derive(Debug, Default)]
struct Timing {
    started: Option<Instant>,
    last: Option<Duration>,
    total: Duration,
    laps: u64,
}

/// Measures the time values spend between a [`StopwatchStart`] and a
/// [`StopwatchStop`] placed around part of a chain.
#[derive(Debug, Clone, Default)]
pub struct Stopwatch(Arc<Mutex<Timing>>);

impl Stopwatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<T>(&self) -> StopwatchStart<T> {
        StopwatchStart {
            stopwatch: self.clone(),
            _phantom: PhantomData,
        }
    }

    pub fn stop<T>(&self) -> StopwatchStop<T> {
        StopwatchStop {
            stopwatch: self.clone(),
            _phantom: PhantomData,
        }
    }

    /// Elapsed time of the most recent start/stop pair.
    pub fn elapsed(&self) -> Option<Duration> {
        lock(&self.0).last
    }

    pub fn total(&self) -> Duration {
        lock(&self.0).total
    }

    /// Completed start/stop pairs.
    pub fn laps(&self) -> u64 {
        lock(&self.0).laps
    }
}

pub struct StopwatchStart<T> {
    stopwatch: Stopwatch,
    _phantom: PhantomData<fn(T) -> T>,
}

#[async_trait]
impl<T: Send + 'static> Transform for StopwatchStart<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        lock(&self.stopwatch.0).started = Some(Instant::now());
        Ok(item)
    }
}

pub struct StopwatchStop<T> {
    stopwatch: Stopwatch,
    _phantom: PhantomData<fn(T) -> T>,
}

#[async_trait]
impl<T: Send + 'static> Transform for StopwatchStop<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        let mut timing = lock(&self.stopwatch.0);
        if let Some(started) = timing.started.take() {
            let elapsed = started.elapsed();
            timing.last = Some(elapsed);
            timing.total += elapsed;
            timing.laps += 1;
        }
        Ok(item)
    }
}

/// Passes the first `limit` values, then quits.
pub struct Take<T> {
    remaining: usize,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T> Take<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            remaining: limit,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Transform for Take<T> {
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        if self.remaining == 0 {
            return Err(Error::Quit);
        }
        self.remaining -= 1;
        Ok(item)
    }
}

/// Calls `f` with a reference to each value.
pub struct Inspect<T, F> {
    f: F,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<T, F: FnMut(&T) + Send> Inspect<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F> Transform for Inspect<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) + Send,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        (self.f)(&item);
        Ok(item)
    }
}
