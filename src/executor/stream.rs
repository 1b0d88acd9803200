//! Streaming execution.
//!
//! `Executor::execute_stream` runs a query on a background task and reports
//! progress as `CallEvent`s. `Bicliques()` calls stream one event per
//! biclique as shards produce them, and a shard group that fails mid-search
//! is reported as a `ShardFailure` while the other groups keep going.
//! Every other call yields a single `Value`, or an `Error` that ends the query.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{stream as fstream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{ExecOptions, Executor};
use crate::biclique::{candidate_universe, BicliqueStream, PIPELINE_CAPACITY};
use crate::cancel::CancelToken;
use crate::cluster::{shards_by_node, Node};
use crate::model::{sort_bicliques, Biclique, Bicliques, Call, QueryValue};
use crate::storage::ShardStorage;
use crate::{Error, Result};

/// Shards whose biclique search failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardFailure {
    pub node: Node,
    pub shards: Vec<u64>,
    pub message: String,
}

#[derive(Debug)]
pub enum CallPayload {
    Value(QueryValue),
    Biclique(Biclique),
    Failure(ShardFailure),
    Error(Error),
}

/// Progress of the call at `call_index`.
#[derive(Debug)]
pub struct CallEvent {
    pub call_index: usize,
    pub payload: CallPayload,
}

/// Events of one streamed query. Dropping it cancels outstanding work.
pub struct ResultStream {
    rx: ReceiverStream<CallEvent>,
    cancel: CancelToken,
}

impl ResultStream {
    pub async fn next(&mut self) -> Option<CallEvent> {
        self.rx.next().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for ResultStream {
    type Item = CallEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<CallEvent>> {
        self.rx.poll_next_unpin(cx)
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bicliques that could be found, plus the shard groups that could not be searched.
#[derive(Debug, Default)]
pub struct PartialBicliques {
    pub bicliques: Vec<Biclique>,
    pub failures: Vec<ShardFailure>,
}

impl PartialBicliques {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Sending half, tagged with the call being reported.
struct Emitter<'a> {
    tx: &'a mpsc::Sender<CallEvent>,
    call_index: usize,
}

impl Emitter<'_> {
    /// False once the consumer is gone.
    async fn emit(&self, payload: CallPayload) -> bool {
        let event = CallEvent { call_index: self.call_index, payload };
        self.tx.send(event).await.is_ok()
    }
}

impl<S: ShardStorage> Executor<S> {
    /// Run `calls` on a background task, streaming their results.
    ///
    /// Fails up front on a missing index or when shards cannot be resolved.
    pub async fn execute_stream(
        self: &Arc<Self>,
        index: &str,
        calls: Vec<Call>,
        shards: &[u64],
        opt: ExecOptions,
    ) -> Result<ResultStream> {
        if index.is_empty() {
            return Err(Error::MissingIndex);
        }
        let shards = self.resolve_shards(index, shards, &opt).await?;

        let cancel = opt.cancel.child();
        let opt = ExecOptions { cancel: cancel.clone(), ..opt };
        let (tx, rx) = mpsc::channel(PIPELINE_CAPACITY);

        let executor = Arc::clone(self);
        let index = index.to_string();
        tokio::spawn(async move {
            for (call_index, call) in calls.iter().enumerate() {
                if opt.cancel.is_cancelled() {
                    break;
                }
                let out = Emitter { tx: &tx, call_index };
                let open = match call {
                    Call::Bicliques(c) => executor.stream_bicliques(&index, c, &shards, &opt, &out).await,
                    other => match executor.execute_call(&index, other, &shards, &opt).await {
                        Ok(value) => out.emit(CallPayload::Value(value)).await,
                        Err(e) => {
                            out.emit(CallPayload::Error(e)).await;
                            false
                        }
                    },
                };
                if !open {
                    break;
                }
            }
            debug!(index = %index, calls = calls.len(), "streamed query finished");
        });

        Ok(ResultStream { rx: ReceiverStream::new(rx), cancel })
    }

    /// Run one `Bicliques()` call to completion, tolerating failed shard groups.
    pub async fn search_bicliques(
        self: &Arc<Self>,
        index: &str,
        call: Bicliques,
        shards: &[u64],
        opt: ExecOptions,
    ) -> Result<PartialBicliques> {
        let cancel = opt.cancel.clone();
        let mut events = self.execute_stream(index, vec![Call::Bicliques(call)], shards, opt).await?;

        let mut out = PartialBicliques::default();
        while let Some(event) = events.next().await {
            match event.payload {
                CallPayload::Biclique(bc) => out.bicliques.push(bc),
                CallPayload::Failure(f) => out.failures.push(f),
                CallPayload::Error(e) => return Err(e),
                CallPayload::Value(_) => {}
            }
        }
        cancel.check()?;
        sort_bicliques(&mut out.bicliques);
        Ok(out)
    }

    /// Returns false once the consumer is gone or the query was cancelled.
    async fn stream_bicliques(
        &self,
        index: &str,
        c: &Bicliques,
        shards: &[u64],
        opt: &ExecOptions,
        out: &Emitter<'_>,
    ) -> bool {
        let groups = shards_by_node(self.cluster.as_ref(), shards);
        fstream::iter(groups)
            .for_each_concurrent(self.config.max_concurrency.max(1), |(node, shards)| {
                self.stream_biclique_group(index, c, node, shards, opt, out)
            })
            .await;
        !opt.cancel.is_cancelled() && !out.tx.is_closed()
    }

    async fn stream_biclique_group(
        &self,
        index: &str,
        c: &Bicliques,
        node: Node,
        shards: Vec<u64>,
        opt: &ExecOptions,
        out: &Emitter<'_>,
    ) {
        if node != self.node {
            let call = [Call::Bicliques(c.clone())];
            let found = match self.client.delegate(&node, index, &call, &shards, opt).await {
                Ok(mut values) if values.len() == 1 => values.remove(0).into_bicliques(),
                Ok(values) => Err(Error::Protocol(format!("expected 1 result, got {}", values.len()))),
                Err(e) => Err(e),
            };
            match found {
                Ok(bcs) => {
                    for bc in bcs {
                        if !out.emit(CallPayload::Biclique(bc)).await {
                            opt.cancel.cancel();
                            return;
                        }
                    }
                }
                Err(e) => self.report_failure(node, shards, e, opt, out).await,
            }
            return;
        }

        for shard in shards {
            if opt.cancel.is_cancelled() {
                return;
            }
            let ranked = match self.storage.ranked_candidates(index, &c.frame, shard).await {
                Ok(ranked) => ranked,
                Err(e) => {
                    self.report_failure(node.clone(), vec![shard], e, opt, out).await;
                    continue;
                }
            };
            let mut found = BicliqueStream::spawn(candidate_universe(ranked, c.n), &opt.cancel);
            while let Some(bc) = found.next().await {
                if !out.emit(CallPayload::Biclique(bc)).await {
                    opt.cancel.cancel();
                    return;
                }
            }
        }
    }

    async fn report_failure(
        &self,
        node: Node,
        shards: Vec<u64>,
        e: Error,
        opt: &ExecOptions,
        out: &Emitter<'_>,
    ) {
        if matches!(e, Error::Cancelled) {
            return;
        }
        warn!(node = %node, shards = ?shards, error = %e, "biclique search degraded");
        let failure = ShardFailure { node, shards, message: e.to_string() };
        if !out.emit(CallPayload::Failure(failure)).await {
            opt.cancel.cancel();
        }
    }
}
