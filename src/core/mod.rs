//! Core traits and types for the notiweld library.
//!
//! This module contains the fundamental traits, the stream primitive, the
//! cancellation scope and the acknowledgement capability that define the
//! processing model.

pub mod ack;
pub mod error;
pub mod scope;
pub mod stream;
pub mod traits;

// Re-export core items
pub use ack::{AckHandle, AckSlot, AckToken, Acknowledgeable, Acknowledger};
pub use error::{DecodeError, Error, Result};
pub use scope::Scope;
pub use stream::{concat, merge, Stream};
pub use traits::{Sink, Source, SourceExt, Transform, TransformExt};
