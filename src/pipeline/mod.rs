//! The chain runner.
//!
//! A [`Pipeline`] pulls values from a [`Stream`], applies a transform chain
//! to each one and hands the result to a [`Sink`]. It owns the
//! acknowledgement discipline for values the sink never sees:
//!
//! - a value the chain answers with [`Error::Drop`] is nacked without
//!   requeue, unless something already settled its delivery;
//! - [`Error::Quit`] ends the run as if the stream were exhausted;
//! - once the stream's scope is cancelled nothing more is written, acked or
//!   nacked, and the broker redelivers whatever was in transit.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::{AckHandle, Acknowledgeable, Error, Result, Sink, Stream, Transform};
use crate::transforms::Identity;

/// Configuration for pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum time one value may spend in the chain, and then in the sink
    pub operation_timeout: Option<Duration>,
    /// Whether a chain error ends the run. When false the error is logged,
    /// the delivery is nacked without requeue and the run continues.
    pub fail_fast: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            operation_timeout: None,
            fail_fast: true,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Values pulled from the stream
    pub received: u64,
    /// Values accepted by the sink
    pub written: u64,
    /// Values the chain dropped
    pub dropped: u64,
    /// Values whose chain error was tolerated (`fail_fast == false`)
    pub failed: u64,
    /// The chain asked to stop
    pub quit: bool,
    /// The scope was cancelled before the stream ended
    pub cancelled: bool,
}

/// Connects a stream, a transform chain and a sink.
pub struct Pipeline<T, X> {
    stream: Stream<T>,
    chain: X,
    config: PipelineConfig,
}

impl<T> Pipeline<T, Identity<T>>
where
    T: Acknowledgeable + Send + 'static,
{
    /// A pipeline whose chain passes every value through unchanged.
    pub fn passthrough(stream: Stream<T>) -> Self {
        Self::new(stream, Identity::new())
    }
}

impl<T, X> Pipeline<T, X>
where
    T: Acknowledgeable + Send + 'static,
    X: Transform<Input = T>,
{
    /// Create a new pipeline
    pub fn new(stream: Stream<T>, chain: X) -> Self {
        Self {
            stream,
            chain,
            config: PipelineConfig::default(),
        }
    }

    /// Set the per-value timeout for the chain and for the sink
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = Some(timeout);
        self
    }

    /// Set whether to fail fast on chain errors
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Run to completion, writing every surviving value into `sink`.
    ///
    /// Returns the first error among: a chain or sink failure, the sink's
    /// `finish`, and the stream's terminal error.
    pub async fn sink<C>(self, mut sink: C) -> Result<RunSummary>
    where
        C: Sink<Item = X::Output>,
    {
        let Pipeline {
            mut stream,
            mut chain,
            config,
        } = self;

        let outcome = drive(&mut stream, &mut chain, &mut sink, &config).await;
        let finished = sink.finish().await;

        let summary = match outcome {
            Ok(summary) => summary,
            Err(e) => {
                error!(error = %e, "pipeline failed");
                return Err(e);
            }
        };
        finished?;
        if let Some(e) = stream.err() {
            error!(error = %e, received = summary.received, "source failed");
            return Err(e);
        }

        info!(
            received = summary.received,
            written = summary.written,
            dropped = summary.dropped,
            failed = summary.failed,
            quit = summary.quit,
            cancelled = summary.cancelled,
            "pipeline finished"
        );
        Ok(summary)
    }
}

async fn within<F, O>(timeout: Option<Duration>, future: F) -> Result<O>
where
    F: Future<Output = Result<O>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            )),
        },
        None => future.await,
    }
}

async fn drive<T, X, C>(
    stream: &mut Stream<T>,
    chain: &mut X,
    sink: &mut C,
    config: &PipelineConfig,
) -> Result<RunSummary>
where
    T: Acknowledgeable + Send + 'static,
    X: Transform<Input = T>,
    C: Sink<Item = X::Output>,
{
    let scope = stream.scope().clone();
    let mut summary = RunSummary::default();

    while let Some(item) = stream.next().await {
        summary.received += 1;
        let token = item.ack_handle().map(AckHandle::token);

        let applied = match scope
            .run(within(config.operation_timeout, chain.apply(item)))
            .await
        {
            Some(applied) => applied,
            None => break,
        };

        match applied {
            Ok(output) => {
                if scope.is_cancelled() {
                    break;
                }
                match scope
                    .run(within(config.operation_timeout, sink.write(output)))
                    .await
                {
                    Some(written) => written?,
                    None => break,
                }
                summary.written += 1;
            }
            Err(Error::Drop) => {
                summary.dropped += 1;
                if let Some(token) = token {
                    if token.nack(false).await? {
                        debug!(delivery_tag = token.delivery_tag(), "dropped delivery rejected");
                    }
                }
            }
            Err(Error::Quit) => {
                debug!(received = summary.received, "chain quit");
                summary.quit = true;
                break;
            }
            Err(e) if !config.fail_fast => {
                summary.failed += 1;
                warn!(error = %e, "value failed, continuing");
                if let Some(token) = token {
                    token.nack(false).await?;
                }
            }
            Err(e) => return Err(e),
        }
    }

    summary.cancelled = scope.is_cancelled();
    Ok(summary)
}
