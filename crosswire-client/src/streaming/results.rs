//! The single stream-result producer behind both delivery styles.
//!
//! Callback delivery hands the engine's sink straight to the caller's
//! closure; pull delivery routes it through an unbounded channel wrapped by
//! [`ResultStream`]. Both styles are fed by the same event production, so
//! they cannot diverge in behavior.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::message::StreamResult;

/// Create the channel pair backing a pull-style stream.
pub(crate) fn result_channel<T: Send + 'static>() -> (
    Box<dyn Fn(StreamResult<T>) + Send + Sync>,
    ResultStream<T>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Box::new(move |result: StreamResult<T>| {
        // The consumer may have been dropped; results are then discarded.
        let _ = tx.send(result);
    });
    (
        sink,
        ResultStream {
            receiver: rx,
            finished: false,
        },
    )
}

/// A lazy, finite, non-restartable sequence of [`StreamResult`]s.
///
/// The sequence ends (yields `None`) exactly once the terminal
/// `Complete` result has been delivered. Dropping the stream mid-flight
/// discards any further results but does not cancel the RPC; use the
/// shape's `cancel()` for that.
pub struct ResultStream<T> {
    receiver: mpsc::UnboundedReceiver<StreamResult<T>>,
    finished: bool,
}

impl<T> Stream for ResultStream<T> {
    type Item = StreamResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(result)) => {
                if result.is_complete() {
                    this.finished = true;
                }
                Poll::Ready(Some(result))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStream")
            .field("finished", &self.finished)
            .finish()
    }
}
