// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client outbound FIFO with ack-driven single-in-flight delivery. See
//! §4.8. At most one batch is ever in flight per socket; the next is sent
//! only once the previous has been acknowledged or the socket disconnects.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that can push a framed payload out over a live socket. Sending
/// only places the frame on the wire; acknowledgment arrives later via
/// [`OutboundQueue::ack`], driven by the transport's inbound message loop.
pub trait Sink: Send + Sync {
    fn send(&self, batch_id: &str, event: &str, payload: &Value) -> BoxFuture<'_, ()>;
}

/// One outbound unit: `{items, batchId}` in wire terms, plus an optional
/// resolver a caller can await (used by `init`-catch-up to serialize
/// per-session replay; see §4.9). `event` names the wire event this batch is
/// delivered as (`"messages"`, `"permission:request-as-message"`, ...).
pub struct Batch {
    pub batch_id: String,
    pub event: String,
    pub payload: Value,
    resolve: Option<oneshot::Sender<()>>,
}

impl Batch {
    pub fn new(batch_id: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self { batch_id: batch_id.into(), event: event.into(), payload, resolve: None }
    }

    /// Returns a receiver that resolves once this batch has been
    /// acknowledged (or the queue is torn down by disconnect/shutdown).
    pub fn with_waiter(mut self) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        self.resolve = Some(tx);
        (self, rx)
    }
}

struct State {
    queue: VecDeque<Batch>,
    in_flight: Option<(String, Option<oneshot::Sender<()>>)>,
    stopped: bool,
}

struct Inner {
    sink: Arc<dyn Sink>,
    state: Mutex<State>,
}

/// Handle to one socket's outbound queue.
#[derive(Clone)]
pub struct OutboundQueue {
    inner: Arc<Inner>,
}

impl OutboundQueue {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        let inner = Arc::new(Inner {
            sink,
            state: Mutex::new(State { queue: VecDeque::new(), in_flight: None, stopped: false }),
        });
        Self { inner }
    }

    /// Push a batch; pump immediately if nothing is currently in flight.
    pub fn enqueue(&self, batch: Batch) {
        let should_pump = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.stopped {
                if let Some(resolve) = batch.resolve {
                    let _ = resolve.send(());
                }
                return;
            }
            state.queue.push_back(batch);
            state.in_flight.is_none()
        };
        if should_pump {
            let this = self.clone();
            tokio::spawn(async move { this.pump().await });
        }
    }

    /// `ack(batchId)`: resolve the in-flight batch, if it matches, and drain
    /// the next one. Acks for a stale/mismatched batch id are ignored.
    pub fn ack(&self, batch_id: &str) {
        let resolve = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.in_flight.take() {
                Some((id, resolve)) if id == batch_id => resolve,
                Some(other) => {
                    state.in_flight = Some(other);
                    return;
                }
                None => return,
            }
        };
        if let Some(resolve) = resolve {
            let _ = resolve.send(());
        }
        let this = self.clone();
        tokio::spawn(async move { this.pump().await });
    }

    /// Drop the queue and resolve any pending waiters so `init`-catch-up
    /// loops awaiting an ack terminate cleanly instead of hanging (§5).
    pub fn on_disconnect(&self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.stopped = true;
        if let Some((_, resolve)) = state.in_flight.take() {
            if let Some(resolve) = resolve {
                let _ = resolve.send(());
            }
        }
        while let Some(batch) = state.queue.pop_front() {
            if let Some(resolve) = batch.resolve {
                let _ = resolve.send(());
            }
        }
    }

    async fn pump(&self) {
        let (batch_id, event, payload) = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.stopped || state.in_flight.is_some() {
                return;
            }
            let Some(batch) = state.queue.pop_front() else { return };
            let Batch { batch_id, event, payload, resolve } = batch;
            state.in_flight = Some((batch_id.clone(), resolve));
            (batch_id, event, payload)
        };

        self.inner.sink.send(&batch_id, &event, &payload).await;
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
