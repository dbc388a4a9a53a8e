//! Background generation feeding a channel.

use super::{Generation, TokenIterator};
use crate::error::Result;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Default channel capacity between the generation task and its consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Generations produced on a spawned task.
///
/// Dropping the stream cancels the task.
pub struct GenerationStream {
    inner: ReceiverStream<Result<Generation>>,
    handle: JoinHandle<()>,
}

impl GenerationStream {
    /// Whether the producing task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Stream for GenerationStream {
    type Item = Result<Generation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Run `iterator` on the tokio runtime, buffering up to `buffer` generations.
///
/// Must be called from within a tokio runtime.
pub fn spawn(mut iterator: TokenIterator, buffer: usize) -> GenerationStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = tokio::spawn(async move {
        while let Some(item) = iterator.next().await {
            if tx.send(item).await.is_err() {
                debug!(
                    tokens = iterator.tokens().len(),
                    "stream consumer went away, stopping generation"
                );
                break;
            }
        }
    });
    GenerationStream {
        inner: ReceiverStream::new(rx),
        handle,
    }
}
