//! Results stream

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::task::TaskResult;

/// Stream of task results in completion order
///
/// Yields exactly one result per accepted task and ends after the engine has
/// been drained or stopped and every result has been read.
pub struct ResultStream<O> {
    inner: ReceiverStream<TaskResult<O>>,
}

impl<O> ResultStream<O> {
    pub(crate) fn new(rx: mpsc::Receiver<TaskResult<O>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Receive the next result, or `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<TaskResult<O>> {
        self.inner.next().await
    }
}

impl<O> Stream for ResultStream<O> {
    type Item = TaskResult<O>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<O> std::fmt::Debug for ResultStream<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream").finish_non_exhaustive()
    }
}
