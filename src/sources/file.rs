//! Line-oriented file source.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines as LineReader};
use tracing::{debug, warn};

use crate::core::stream::DEFAULT_CAPACITY;
use crate::core::{Error, Result, Source};

/// Reads one or more files line by line, in the order given.
///
/// An I/O error on one file is recorded and the source moves on to the next
/// path; after exhaustion the stream's error joins every recorded failure.
pub struct Lines {
    pending: VecDeque<PathBuf>,
    current: Option<(PathBuf, LineReader<BufReader<File>>)>,
    errors: Vec<Error>,
    capacity: usize,
}

impl Lines {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            pending: paths.into_iter().map(Into::into).collect(),
            current: None,
            errors: Vec::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Set the channel capacity between the reader task and the consumer
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn fail(&mut self, path: PathBuf, error: std::io::Error) {
        warn!(path = %path.display(), error = %error, "failed reading file");
        self.errors
            .push(Error::source_io(path.display().to_string(), error));
    }
}

#[async_trait]
impl Source for Lines {
    type Item = String;

    async fn produce(&mut self) -> Result<Option<Self::Item>> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.pending.pop_front() else {
                    return Ok(None);
                };
                match File::open(&path).await {
                    Ok(file) => {
                        debug!(path = %path.display(), "reading file");
                        self.current = Some((path, BufReader::new(file).lines()));
                    }
                    Err(e) => {
                        self.fail(path, e);
                        continue;
                    }
                }
            }

            let Some((_, reader)) = self.current.as_mut() else {
                continue;
            };
            match reader.next_line().await {
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => {
                    self.current = None;
                }
                Err(e) => {
                    if let Some((path, _)) = self.current.take() {
                        self.fail(path, e);
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.current = None;
        self.pending.clear();
        match Error::join(std::mem::take(&mut self.errors)) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn spawn_capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}
