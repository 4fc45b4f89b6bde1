//! Sink implementations for the notiweld library.
//!
//! Every sink here settles the delivery behind a value once the value has
//! been absorbed: the acknowledgement capability is taken out of the value
//! and acked (non-multiple). Values without a capability are absorbed as
//! they are, except by [`AckSink`], which requires one.

pub mod log;

use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex as TokioMutex;
use tracing::trace;

use crate::core::error::IntoError;
use crate::core::{Acknowledgeable, Error, Result, Sink};

pub use log::{Facility, LogContent, LogEmitter, LogRecord, LogSink, Severity, TracingEmitter};

/// Ack the delivery behind `item`, if it carries one.
async fn settle<T: Acknowledgeable>(item: &mut T) -> Result<()> {
    if let Some(handle) = item.take_ack() {
        let tag = handle.delivery_tag();
        if handle.ack().await? {
            trace!(delivery_tag = tag, "delivery acknowledged");
        }
    }
    Ok(())
}

/// Discards every value, acknowledging it first.
pub struct NullSink<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> NullSink<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Acknowledgeable + Send + 'static> Sink for NullSink<T> {
    type Item = T;

    async fn write(&mut self, mut item: T) -> Result<()> {
        settle(&mut item).await
    }
}

/// Like [`NullSink`], but a value without an acknowledgement capability is
/// an error.
pub struct AckSink<T> {
    _phantom: PhantomData<fn(T)>,
}

impl<T> AckSink<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for AckSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Acknowledgeable + Send + 'static> Sink for AckSink<T> {
    type Item = T;

    async fn write(&mut self, mut item: T) -> Result<()> {
        let handle = item.take_ack().ok_or(Error::MissingAck)?;
        handle.ack().await?;
        Ok(())
    }
}

/// Textual form used by a [`RecordingSink`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordFormat {
    /// One compact JSON document per line; the form replays understand
    #[default]
    JsonLines,
    /// Indented JSON documents separated by newlines
    PrettyJson,
    /// A YAML stream, `---` before every document
    Yaml,
}

impl RecordFormat {
    fn render<T: Serialize>(&self, item: &T) -> Result<String> {
        match self {
            RecordFormat::JsonLines => serde_json::to_string(item)
                .map(|line| line + "\n")
                .into_sink_error(),
            RecordFormat::PrettyJson => serde_json::to_string_pretty(item)
                .map(|doc| doc + "\n")
                .into_sink_error(),
            RecordFormat::Yaml => serde_yaml::to_string(item)
                .map(|doc| format!("---\n{}", doc))
                .into_sink_error(),
        }
    }
}

/// Writes each value to a writer, then acknowledges it.
///
/// Recording [`IntermediateMessage`](crate::envelope::IntermediateMessage)
/// values as JSON lines produces a file that
/// [`replay`](crate::envelope::replay) decodes back into the same events.
pub struct RecordingSink<W, T> {
    writer: W,
    format: RecordFormat,
    written: u64,
    _phantom: PhantomData<fn(T)>,
}

impl<W, T> RecordingSink<W, T> {
    pub fn new(writer: W, format: RecordFormat) -> Self {
        Self {
            writer,
            format,
            written: 0,
            _phantom: PhantomData,
        }
    }

    /// Values recorded so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<T> RecordingSink<BufWriter<tokio::fs::File>, T> {
    /// Record into a new file at `path`, truncating an existing one.
    pub async fn create<P: AsRef<Path>>(path: P, format: RecordFormat) -> Result<Self> {
        let file = tokio::fs::File::create(path.as_ref()).await.into_sink_error()?;
        Ok(Self::new(BufWriter::new(file), format))
    }

    /// Record at the end of the file at `path`, creating it if needed.
    pub async fn append<P: AsRef<Path>>(path: P, format: RecordFormat) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await
            .into_sink_error()?;
        Ok(Self::new(BufWriter::new(file), format))
    }
}

#[async_trait]
impl<W, T> Sink for RecordingSink<W, T>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize + Acknowledgeable + Send + 'static,
{
    type Item = T;

    async fn write(&mut self, mut item: T) -> Result<()> {
        let text = self.format.render(&item)?;
        self.writer.write_all(text.as_bytes()).await.into_sink_error()?;
        self.written += 1;
        settle(&mut item).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await.into_sink_error()
    }
}

/// Collects values in memory, acknowledging each one.
pub struct CollectSink<T> {
    items: Arc<TokioMutex<Vec<T>>>,
}

impl<T: Send + 'static> CollectSink<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(TokioMutex::new(Vec::new())),
        }
    }

    /// Take the collected items
    pub async fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Get a clone of the items Arc for external access
    pub fn items(&self) -> Arc<TokioMutex<Vec<T>>> {
        self.items.clone()
    }
}

#[async_trait]
impl<T: Acknowledgeable + Send + 'static> Sink for CollectSink<T> {
    type Item = T;

    async fn write(&mut self, mut item: T) -> Result<()> {
        settle(&mut item).await?;
        self.items.lock().await.push(item);
        Ok(())
    }
}

impl<T: Send + 'static> Default for CollectSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CollectSink<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

/// Counts values, acknowledging each one.
pub struct CountSink<T> {
    count: Arc<TokioMutex<u64>>,
    _phantom: PhantomData<fn(T)>,
}

impl<T> CountSink<T> {
    pub fn new() -> Self {
        Self {
            count: Arc::new(TokioMutex::new(0)),
            _phantom: PhantomData,
        }
    }

    /// Get the current count
    pub async fn count(&self) -> u64 {
        *self.count.lock().await
    }
}

#[async_trait]
impl<T: Acknowledgeable + Send + 'static> Sink for CountSink<T> {
    type Item = T;

    async fn write(&mut self, mut item: T) -> Result<()> {
        settle(&mut item).await?;
        *self.count.lock().await += 1;
        Ok(())
    }
}

impl<T> Default for CountSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CountSink<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count.clone(),
            _phantom: PhantomData,
        }
    }
}
