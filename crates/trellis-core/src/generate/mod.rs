//! Generation sessions: prefill, decode and stop conditions.
//!
//! A [`TokenIterator`] is a lazy, single-consumer sequence of
//! [`Generation`]s. Await [`TokenIterator::next`] directly, convert it with
//! [`TokenIterator::into_stream`], or run it in the background with
//! [`spawn`].

mod detokenizer;
mod iterator;
mod params;
mod stream;

pub use detokenizer::StreamingDetokenizer;
pub use iterator::{Generation, TokenIterator};
pub use params::{Disposition, GenerateParameters, StopReason};
pub use stream::{spawn, GenerationStream, DEFAULT_STREAM_BUFFER};
