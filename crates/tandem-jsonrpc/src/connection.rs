//! A running JSON-RPC connection over one byte stream.
//!
//! [`Connection::start_listening`] spawns three tasks, all instrumented with
//! the connection's span:
//!
//! - the read loop, the only reader of the stream, which decodes frames,
//!   resolves responses and fires inbound cancellations inline;
//! - the writer, the only writer of the stream, draining a bounded queue;
//! - the notification worker, running notification handlers in arrival order
//!   from a bounded queue. While that queue is full the read loop waits.
//!
//! Each incoming request runs in its own task so a slow handler never delays
//! the read loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{Instrument, Span, debug, error, info, trace, warn};

use crate::cancellation::CancellationHandle;
use crate::config::ConnectionConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ConnectionError, ResponseError, RpcError};
use crate::framing::FrameCodec;
use crate::issue::MessageIssue;
use crate::json::{MessageTranslator, envelope_kind};
use crate::message::{Message, MessageKind};
use crate::notification::NotificationMessage;
use crate::pending::RequestManager;
use crate::registry::MethodRegistry;
use crate::remote::RemoteEndpoint;
use crate::request::RequestMessage;
use crate::response::ResponseMessage;
use crate::types::RequestId;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Receives every protocol issue the connection observes
pub type IssueListener = Arc<dyn Fn(&MessageIssue) + Send + Sync>;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Listening,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Created => write!(f, "created"),
            ConnectionState::Listening => write!(f, "listening"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Everything a connection needs, assembled by the launcher
pub(crate) struct ConnectionParts {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub local: Arc<MethodRegistry>,
    pub remote: Arc<MethodRegistry>,
    pub dispatcher: Dispatcher,
    pub config: ConnectionConfig,
    pub on_issue: Option<IssueListener>,
}

struct Stream {
    reader: BoxedReader,
    writer: BoxedWriter,
    outbound: mpsc::Receiver<Message>,
}

struct Shared {
    config: ConnectionConfig,
    local: Arc<MethodRegistry>,
    translator: MessageTranslator,
    dispatcher: Arc<Dispatcher>,
    requests: Arc<RequestManager>,
    remote: RemoteEndpoint,
    outbound: mpsc::Sender<Message>,
    state: watch::Sender<ConnectionState>,
    /// Cancellation handles of incoming requests whose handler is running
    in_flight: Mutex<HashMap<RequestId, CancellationHandle>>,
    shutdown: CancellationHandle,
    on_issue: Option<IssueListener>,
    span: Span,
}

/// A bidirectional JSON-RPC connection.
///
/// Dropping the connection closes it.
pub struct Connection {
    shared: Arc<Shared>,
    stream: Mutex<Option<Stream>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.shared.config.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(parts: ConnectionParts) -> Self {
        let ConnectionParts {
            reader,
            writer,
            local,
            remote,
            mut dispatcher,
            config,
            on_issue,
        } = parts;

        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity.max(1));
        let requests = RequestManager::new(outbound_tx.clone(), remote.cancellation().cloned());
        let remote_endpoint =
            RemoteEndpoint::new(Arc::clone(&remote), Arc::clone(&requests), outbound_tx.clone());
        dispatcher.set_cancellation(local.cancellation().cloned());
        let translator = MessageTranslator::new(Arc::clone(&local), remote)
            .with_validation(config.validate_messages);
        let span = tracing::info_span!("jsonrpc_connection", name = %config.name);
        let (state, _) = watch::channel(ConnectionState::Created);

        Self {
            shared: Arc::new(Shared {
                config,
                local,
                translator,
                dispatcher: Arc::new(dispatcher),
                requests,
                remote: remote_endpoint,
                outbound: outbound_tx,
                state,
                in_flight: Mutex::new(HashMap::new()),
                shutdown: CancellationHandle::new(),
                on_issue,
                span,
            }),
            stream: Mutex::new(Some(Stream {
                reader,
                writer,
                outbound: outbound_rx,
            })),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Endpoint for calling the peer
    pub fn remote(&self) -> RemoteEndpoint {
        self.shared.remote.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Number of our requests still awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.shared.requests.pending_count()
    }

    /// Move to `Listening` and spawn the read loop, writer and notification worker.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start_listening(&self) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Created => {}
            ConnectionState::Listening => return Err(ConnectionError::AlreadyListening),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
        }
        let Some(stream) = self.stream.lock().take() else {
            return Err(ConnectionError::AlreadyListening);
        };
        self.shared.state.send_replace(ConnectionState::Listening);

        let Stream {
            reader,
            writer,
            outbound,
        } = stream;
        let (notification_tx, notification_rx) =
            mpsc::channel(self.shared.config.notification_queue_capacity.max(1));
        let span = self.shared.span.clone();

        tokio::spawn(
            Arc::clone(&self.shared)
                .write_loop(writer, outbound)
                .instrument(span.clone()),
        );
        tokio::spawn(
            Arc::clone(&self.shared)
                .notification_loop(notification_rx)
                .instrument(span.clone()),
        );
        tokio::spawn(
            Arc::clone(&self.shared)
                .read_loop(reader, notification_tx)
                .instrument(span.clone()),
        );

        span.in_scope(|| info!("Connection listening"));
        Ok(())
    }

    /// Force the transition to `Closed`, failing all pending requests. Idempotent.
    pub fn close(&self) {
        self.stream.lock().take();
        self.shared.close("closed locally");
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `self`, so this only returns once closed.
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.close("connection dropped");
    }
}

impl Shared {
    fn close(&self, reason: &str) {
        let previous = self.state.send_replace(ConnectionState::Closed);
        if previous == ConnectionState::Closed {
            return;
        }
        self.shutdown.cancel();

        let failed = self.requests.fail_all();
        let interrupted: Vec<CancellationHandle> = self
            .in_flight
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in &interrupted {
            handle.cancel();
        }

        self.span.in_scope(|| {
            info!(
                reason,
                failed_requests = failed,
                interrupted_handlers = interrupted.len(),
                "Connection closed"
            )
        });
    }

    fn report(&self, issue: &MessageIssue) {
        warn!(code = issue.code, id = ?issue.id, issue = %issue, "Protocol issue");
        if let Some(listener) = &self.on_issue {
            listener(issue);
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        reader: BoxedReader,
        notifications: mpsc::Sender<NotificationMessage>,
    ) {
        let codec = FrameCodec::new(self.config.max_content_length, self.config.max_header_bytes);
        let mut frames = FramedRead::new(reader, codec);
        let mut framing_errors = 0u32;

        let reason = loop {
            let frame = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break "shutdown",
                frame = frames.next() => frame,
            };

            match frame {
                None => break "end of stream",
                Some(Err(e)) => {
                    error!(error = %e, "Failed to read from stream");
                    break "read error";
                }
                Some(Ok(Err(framing))) => {
                    framing_errors += 1;
                    self.report(&MessageIssue::parse_error(framing.to_string()));
                    if framing_errors >= self.config.max_consecutive_framing_errors {
                        error!(framing_errors, "Too many consecutive framing errors");
                        break "framing errors";
                    }
                }
                Some(Ok(Ok(body))) => {
                    framing_errors = 0;
                    let Some(notification) = self.handle_frame(body) else {
                        continue;
                    };
                    // A full queue stops reading until the worker catches up
                    let queued = tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => break "shutdown",
                        queued = notifications.send(notification) => queued,
                    };
                    if queued.is_err() {
                        debug!("Notification worker stopped, dropping notification");
                    }
                }
            }
        };

        debug!(reason, "Read loop finished");
        self.close(reason);
    }

    /// Act on one decoded frame. Notifications other than cancellation are
    /// returned for the notification worker.
    fn handle_frame(self: &Arc<Self>, body: Bytes) -> Option<NotificationMessage> {
        if self.config.trace_messages {
            trace!(direction = "in", message = %String::from_utf8_lossy(&body));
        }

        let decoded = self
            .translator
            .decode(&body, |id| self.requests.pending_method(id));

        match decoded {
            Ok(Message::Request(request)) => self.spawn_request(request),
            Ok(Message::Notification(notification)) => {
                if !self.local.is_cancel_method(&notification.method) {
                    return Some(notification);
                }
                self.cancel_in_flight(&notification);
            }
            Ok(Message::Response(response)) => self.handle_response(response),
            Err(issue) => self.handle_decode_issue(issue, &body),
        }
        None
    }

    fn handle_decode_issue(self: &Arc<Self>, issue: MessageIssue, body: &[u8]) {
        self.report(&issue);
        let Some(id) = issue.id.clone() else {
            return;
        };

        match envelope_kind(body) {
            Some(MessageKind::Request) => {
                let mut error = ResponseError::new(issue.error_code(), issue.text.clone());
                if let Some(cause) = &issue.cause {
                    error = error.with_data(Value::String(cause.to_string()));
                }
                self.enqueue(ResponseMessage::error(Some(id), error).into());
            }
            Some(MessageKind::Response) => {
                if self.requests.fail(&id, RpcError::InvalidResponse(issue)) {
                    debug!(id = %id, "Failed pending request with malformed response");
                }
            }
            _ => {}
        }
    }

    fn handle_response(&self, response: ResponseMessage) {
        let Some(id) = response.id.clone() else {
            let text = match response.error_object() {
                Some(error) => format!("Received error response without id: {}", error),
                None => "Received response without id".to_string(),
            };
            self.report(&MessageIssue::invalid_request(text));
            return;
        };

        if let Err(issue) = self.requests.resolve(&id, response.into_result()) {
            self.report(&issue);
        }
    }

    fn cancel_in_flight(&self, notification: &NotificationMessage) {
        let id = notification
            .get_param("id")
            .and_then(|id| id.as_request_id());
        let Some(id) = id else {
            self.report(&MessageIssue::invalid_params(format!(
                "Cancel notification without a valid request id: {}",
                notification
                    .params
                    .as_ref()
                    .map_or(Value::Null, |params| params.to_value())
            )));
            return;
        };

        match self.in_flight.lock().get(&id) {
            Some(handle) => {
                debug!(id = %id, "Peer cancelled request");
                handle.cancel();
            }
            None => debug!(id = %id, "Cancel for a request that is not in flight"),
        }
    }

    fn spawn_request(self: &Arc<Self>, request: RequestMessage) {
        let cancellation = CancellationHandle::new();
        if let Some(previous) = self
            .in_flight
            .lock()
            .insert(request.id.clone(), cancellation.clone())
        {
            warn!(id = %request.id, "Peer reused the id of a request still in flight");
            previous.cancel();
        }

        let shared = Arc::clone(self);
        tokio::spawn(
            async move {
                let id = request.id.clone();
                let response = shared
                    .dispatcher
                    .handle_request(request, cancellation.clone())
                    .await;

                // Leave the in-flight table before enqueueing, so a later
                // cancellation finds nothing and the response stands.
                {
                    let mut in_flight = shared.in_flight.lock();
                    if in_flight
                        .get(&id)
                        .is_some_and(|current| current.same_as(&cancellation))
                    {
                        in_flight.remove(&id);
                    }
                }
                shared.enqueue(response.into());
            }
            .instrument(self.span.clone()),
        );
    }

    fn enqueue(self: &Arc<Self>, message: Message) {
        let outbound = self.outbound.clone();
        // Full queue: wait in a task rather than in the caller
        if let Err(mpsc::error::TrySendError::Full(message)) = outbound.try_send(message) {
            tokio::spawn(
                async move {
                    if outbound.send(message).await.is_err() {
                        debug!("Writer stopped, dropping outgoing message");
                    }
                }
                .instrument(self.span.clone()),
            );
        }
    }

    async fn notification_loop(
        self: Arc<Self>,
        mut notifications: mpsc::Receiver<NotificationMessage>,
    ) {
        loop {
            let notification = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                notification = notifications.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
            };
            self.dispatcher.handle_notification(notification).await;
        }
        debug!("Notification worker finished");
    }

    async fn write_loop(self: Arc<Self>, writer: BoxedWriter, mut outbound: mpsc::Receiver<Message>) {
        let codec = FrameCodec::new(self.config.max_content_length, self.config.max_header_bytes)
            .with_content_type(self.config.content_type.clone());
        let mut frames = FramedWrite::new(writer, codec);

        loop {
            let message = tokio::select! {
                biased;
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            };

            let body = match self.translator.encode(&message) {
                Ok(body) => body,
                Err(e) => {
                    error!(kind = %message.kind(), error = %e, "Failed to encode message");
                    if let Message::Request(request) = &message {
                        self.requests.fail(&request.id, RpcError::Serialization(e));
                    }
                    continue;
                }
            };
            if self.config.trace_messages {
                trace!(direction = "out", message = %String::from_utf8_lossy(&body));
            }

            if let Err(e) = frames.send(Bytes::from(body)).await {
                error!(error = %e, "Failed to write to stream");
                self.close("write error");
                break;
            }
        }

        if let Err(e) = frames.close().await {
            debug!(error = %e, "Failed to shut down writer");
        }
        debug!("Writer finished");
    }
}
