//! # Cancellable notification pipelines
//!
//! This crate turns a stream of broker deliveries into typed control-plane
//! events and hands them to sinks, acknowledging every delivery exactly once
//! at the point where it is finally absorbed.
//!
//! ## Core Concepts
//!
//! - **Source**: produces values; opened under a [`Scope`](core::Scope) into a
//!   lazy [`Stream`](core::Stream)
//! - **Transform**: maps one value to another, or answers with the `Drop` and
//!   `Quit` sentinels; composed with `then` or [`chain!`]
//! - **Sink**: absorbs values and settles their deliveries
//! - **Pipeline**: drives a stream through a chain into a sink
//! - **Envelope decoder**: `Delivery -> IntermediateMessage -> Envelope ->
//!   Event`, with the event schema picked from a static tag registry
//!
//! ## Example
//!
//! ```rust
//! use notiweld::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scope = Scope::new();
//!     let evens = Counter::new();
//!     let chain = chain!(
//!         accept_if(|x: &i64| x % 2 == 0),
//!         Count::new(evens.clone()),
//!     );
//!
//!     let summary = Pipeline::new(Sequence::range(0, 10)?.open(&scope), chain)
//!         .sink(NullSink::new())
//!         .await?;
//!
//!     assert_eq!(evens.get(), 5);
//!     assert_eq!(summary.dropped, 5);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod envelope;
pub mod pipeline;
pub mod sinks;
pub mod sources;
pub mod transforms;

// Re-export commonly used items
pub mod prelude {
    pub use crate::chain;
    pub use crate::config::BrokerConfig;
    pub use crate::core::{
        concat, merge, AckHandle, Acknowledgeable, Error, Result, Scope, Sink, Source, SourceExt,
        Stream, Transform, TransformExt,
    };
    pub use crate::envelope::{decoder, replay, Delivery, Envelope, Event, IntermediateMessage};
    pub use crate::pipeline::{Pipeline, PipelineConfig, RunSummary};
    pub use crate::sinks::{AckSink, CollectSink, CountSink, LogSink, NullSink, RecordingSink};
    pub use crate::sources::{BrokerSource, Fibonacci, Lines, MemoryBroker, Random, Sequence, VecSource};
    pub use crate::transforms::{
        accept_if, accept_unless, drop_if, drop_unless, Count, Counter, Stopwatch,
    };
}

// Re-export main error type
pub use crate::core::{Error, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
