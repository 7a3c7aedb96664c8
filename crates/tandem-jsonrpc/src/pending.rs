//! Correlation of outgoing requests with their responses.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{ResponseError, RpcError, RpcResult};
use crate::issue::MessageIssue;
use crate::message::Message;
use crate::notification::NotificationMessage;
use crate::payload::Payload;
use crate::registry::CancellationSettings;
use crate::request::RequestMessage;
use crate::types::RequestId;

/// An outgoing request awaiting its response
#[derive(Debug)]
pub struct PendingRequest {
    pub id: RequestId,
    pub method: String,
    pub created_at: Instant,
    tx: oneshot::Sender<RpcResult<Payload>>,
}

impl PendingRequest {
    /// Complete the caller's future. Consumes the entry, so it happens once.
    fn complete(self, outcome: RpcResult<Payload>) {
        debug!(
            id = %self.id,
            method = %self.method,
            elapsed_ms = self.created_at.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "Resolving pending request"
        );
        // The caller may have dropped its future
        let _ = self.tx.send(outcome);
    }
}

/// Number of cancelled ids remembered for discarding late responses.
/// Older ids are forgotten; a late answer to one is reported as unmatched.
pub const CANCELLED_WINDOW: usize = 256;

#[derive(Debug, Default)]
struct PendingTable {
    requests: HashMap<RequestId, PendingRequest>,
    /// Ids cancelled locally whose late response may still arrive, oldest first
    cancelled: VecDeque<RequestId>,
    closed: bool,
}

impl PendingTable {
    fn remember_cancelled(&mut self, id: RequestId) {
        if self.cancelled.len() == CANCELLED_WINDOW {
            self.cancelled.pop_front();
        }
        self.cancelled.push_back(id);
    }

    fn forget_cancelled(&mut self, id: &RequestId) -> bool {
        match self.cancelled.iter().position(|cancelled| cancelled == id) {
            Some(index) => {
                self.cancelled.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Tracks outstanding outgoing requests by id.
#[derive(Debug)]
pub struct RequestManager {
    next_id: AtomicI64,
    table: Mutex<PendingTable>,
    outbound: mpsc::Sender<Message>,
    cancellation: Option<CancellationSettings>,
}

impl RequestManager {
    /// `cancellation` is the peer's cancel notification, if it has one.
    pub fn new(
        outbound: mpsc::Sender<Message>,
        cancellation: Option<CancellationSettings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicI64::new(1),
            table: Mutex::new(PendingTable::default()),
            outbound,
            cancellation,
        })
    }

    /// Record a new pending request and enqueue it for writing.
    pub async fn send(
        self: &Arc<Self>,
        method: impl Into<String>,
        params: Option<Payload>,
    ) -> RpcResult<PendingResponse> {
        let method = method.into();
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.table.lock();
            if table.closed {
                return Err(RpcError::ConnectionClosed);
            }
            table.requests.insert(
                id.clone(),
                PendingRequest {
                    id: id.clone(),
                    method: method.clone(),
                    created_at: Instant::now(),
                    tx,
                },
            );
        }

        let request = RequestMessage::new(id.clone(), method.clone(), params);
        if self.outbound.send(request.into()).await.is_err() {
            self.table.lock().requests.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        Ok(PendingResponse {
            id,
            method,
            rx,
            manager: Arc::clone(self),
        })
    }

    /// Complete the pending request `id` with the peer's answer.
    ///
    /// A late answer to a locally cancelled request is discarded. An answer
    /// nobody is waiting for is returned as an issue.
    pub fn resolve(
        &self,
        id: &RequestId,
        outcome: Result<Payload, ResponseError>,
    ) -> Result<(), MessageIssue> {
        let pending = {
            let mut table = self.table.lock();
            match table.requests.remove(id) {
                Some(pending) => pending,
                None if table.forget_cancelled(id) => {
                    debug!(id = %id, "Discarding late response to cancelled request");
                    return Ok(());
                }
                None => {
                    return Err(MessageIssue::invalid_request(format!(
                        "Unmatched response message: no pending request with id {}",
                        id
                    ))
                    .with_id(Some(id.clone())));
                }
            }
        };

        pending.complete(outcome.map_err(RpcError::Remote));
        Ok(())
    }

    /// Fail one pending request with a local error. Returns whether it was pending.
    pub fn fail(&self, id: &RequestId, error: RpcError) -> bool {
        let pending = self.table.lock().requests.remove(id);
        match pending {
            Some(pending) => {
                pending.complete(Err(error));
                true
            }
            None => false,
        }
    }

    /// Cancel a pending request.
    ///
    /// The local future fails with [`RpcError::Cancelled`] right away and the
    /// peer is sent the cancel notification, if it declares one. Returns
    /// whether the request was still pending.
    pub async fn cancel(&self, id: &RequestId) -> bool {
        let pending = {
            let mut table = self.table.lock();
            let pending = table.requests.remove(id);
            if pending.is_some() {
                table.remember_cancelled(id.clone());
            }
            pending
        };
        let Some(pending) = pending else {
            debug!(id = %id, "Cancel requested for a request that is no longer pending");
            return false;
        };

        pending.complete(Err(RpcError::Cancelled(id.clone())));

        if let Some(settings) = &self.cancellation {
            let notification = NotificationMessage::with_json(
                settings.method.clone(),
                json!({ "id": id.to_value() }),
            );
            if self.outbound.send(notification.into()).await.is_err() {
                debug!(id = %id, "Connection closed before the cancel notification was sent");
            }
        }
        true
    }

    /// Fail every pending request with [`RpcError::ConnectionClosed`] and
    /// reject all later sends. Returns the number of requests failed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table.lock();
            if table.closed {
                warn!("Pending requests already failed");
            }
            table.closed = true;
            table.cancelled.clear();
            table.requests.drain().map(|(_, pending)| pending).collect()
        };

        let count = drained.len();
        for pending in drained {
            pending.complete(Err(RpcError::ConnectionClosed));
        }
        count
    }

    /// Method of the pending request `id`, used to shape its result
    pub fn pending_method(&self, id: &RequestId) -> Option<String> {
        self.table
            .lock()
            .requests
            .get(id)
            .map(|pending| pending.method.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.table.lock().requests.len()
    }

    pub fn is_closed(&self) -> bool {
        self.table.lock().closed
    }
}

/// Future of a request's outcome.
///
/// Resolves with the peer's result or error, with [`RpcError::Cancelled`] if
/// cancelled locally, or with [`RpcError::ConnectionClosed`].
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    method: String,
    rx: oneshot::Receiver<RpcResult<Payload>>,
    manager: Arc<RequestManager>,
}

impl PendingResponse {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Cancel this request. See [`RequestManager::cancel`].
    pub async fn cancel(&self) -> bool {
        self.manager.cancel(&self.id).await
    }
}

impl Future for PendingResponse {
    type Output = RpcResult<Payload>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx
            .poll_unpin(cx)
            .map(|outcome| outcome.unwrap_or(Err(RpcError::ConnectionClosed)))
    }
}
