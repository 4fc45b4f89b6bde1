//! Write side effects.
//!
//! Every transform here passes its value on unchanged after writing it.
//! A lenient writer logs I/O failures and carries on; a strict one fails
//! the chain with a sink error.

use async_trait::async_trait;
use std::fmt::Display;
use std::marker::PhantomData;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::core::{Error, Result, Transform};
use crate::transforms::text::substitute;

async fn emit<W>(writer: &mut W, line: String, lenient: bool) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let written = async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
    .await;

    match written {
        Ok(()) => Ok(()),
        Err(e) if lenient => {
            warn!(error = %e, "write failed, continuing");
            Ok(())
        }
        Err(e) => Err(Error::sink(e)),
    }
}

/// Writes each value's `Display` form, one per line.
pub struct Write<W, T> {
    writer: W,
    lenient: bool,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<W, T> Write<W, T> {
    pub fn new(writer: W, lenient: bool) -> Self {
        Self {
            writer,
            lenient,
            _phantom: PhantomData,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W, T> Transform for Write<W, T>
where
    W: AsyncWrite + Unpin + Send,
    T: Display + Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        emit(&mut self.writer, format!("{}\n", item), self.lenient).await?;
        Ok(item)
    }
}

/// Writes each value through a format string; `{}` is the value.
pub struct Writef<W, T> {
    writer: W,
    format: String,
    lenient: bool,
    _phantom: PhantomData<fn(T) -> T>,
}

impl<W, T> Writef<W, T> {
    pub fn new(writer: W, format: impl Into<String>, lenient: bool) -> Self {
        Self {
            writer,
            format: format.into(),
            lenient,
            _phantom: PhantomData,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W, T> Transform for Writef<W, T>
where
    W: AsyncWrite + Unpin + Send,
    T: Display + Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        let line = substitute(&self.format, &item);
        emit(&mut self.writer, line, self.lenient).await?;
        Ok(item)
    }
}

/// Writes through a format string only the values matching `predicate`;
/// every value is passed on.
pub struct WriteIf<W, T, F> {
    inner: Writef<W, T>,
    predicate: F,
}

impl<W, T, F> WriteIf<W, T, F>
where
    F: FnMut(&T) -> bool + Send,
{
    pub fn new(writer: W, format: impl Into<String>, lenient: bool, predicate: F) -> Self {
        Self {
            inner: Writef::new(writer, format, lenient),
            predicate,
        }
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }
}

#[async_trait]
impl<W, T, F> Transform for WriteIf<W, T, F>
where
    W: AsyncWrite + Unpin + Send,
    T: Display + Send + 'static,
    F: FnMut(&T) -> bool + Send,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        if (self.predicate)(&item) {
            self.inner.apply(item).await
        } else {
            Ok(item)
        }
    }
}

/// Fire-and-forget output: failures are ignored.
pub struct Print<W, T> {
    inner: Write<W, T>,
}

impl<W, T> Print<W, T> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Write::new(writer, true),
        }
    }
}

impl<T> Print<tokio::io::Stdout, T> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W, T> Transform for Print<W, T>
where
    W: AsyncWrite + Unpin + Send,
    T: Display + Send + 'static,
{
    type Input = T;
    type Output = T;

    async fn apply(&mut self, item: T) -> Result<T> {
        self.inner.apply(item).await
    }
}
