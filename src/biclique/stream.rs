//! Producer/consumer pipeline around the biclique search.
//!
//! ```text
//! search (blocking task) ──raw──▶ [queue: 100] ──▶ transform task ──▶ [queue: 100] ──▶ caller
//! ```
//!
//! The search blocks when the raw queue is full and the transform stage waits
//! while it is empty. Dropping the `BicliqueStream` cancels its token and closes
//! the output queue, which unwinds the transform task and then the search.

use std::ops::ControlFlow;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::search::{find_bicliques, RawBiclique};
use crate::cancel::CancelToken;
use crate::model::{Biclique, BitmapPair};

/// Capacity of each pipeline queue.
pub const PIPELINE_CAPACITY: usize = 100;

/// Bicliques of one candidate universe, produced in search order.
pub struct BicliqueStream {
    rx: ReceiverStream<Biclique>,
    cancel: CancelToken,
}

impl BicliqueStream {
    /// Start the search over `candidates`. `parent` cancels the pipeline
    /// together with whatever owns it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(candidates: Vec<BitmapPair>, parent: &CancelToken) -> Self {
        let cancel = parent.child();
        let (raw_tx, mut raw_rx) = mpsc::channel::<RawBiclique>(PIPELINE_CAPACITY);
        let (tx, rx) = mpsc::channel::<Biclique>(PIPELINE_CAPACITY);

        let search_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let universe = candidates.len();
            let flow = find_bicliques(&candidates, &search_cancel, |raw| {
                match raw_tx.blocking_send(raw) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            });
            debug!(universe, completed = flow.is_continue(), "biclique search finished");
        });

        tokio::spawn(async move {
            while let Some(raw) = raw_rx.recv().await {
                let count = raw.members.count();
                if tx.send(Biclique::new(raw.tiles, count)).await.is_err() {
                    break;
                }
            }
        });

        Self { rx: ReceiverStream::new(rx), cancel }
    }

    /// Next biclique, or `None` once the search is exhausted or cancelled.
    pub async fn next(&mut self) -> Option<Biclique> {
        self.rx.next().await
    }

    /// Drain the stream.
    pub async fn collect(mut self) -> Vec<Biclique> {
        let mut out = Vec::new();
        while let Some(bc) = self.next().await {
            out.push(bc);
        }
        out
    }

    /// Stop the search. Already queued results may still be delivered.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for BicliqueStream {
    type Item = Biclique;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Biclique>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for BicliqueStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
