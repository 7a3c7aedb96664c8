//! Local endpoint: routes incoming requests and notifications to handlers.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::cancellation::CancellationHandle;
use crate::error::{HandlerError, JsonRpcErrorCode, ResponseError};
use crate::message::Message;
use crate::notification::NotificationMessage;
use crate::payload::Payload;
use crate::registry::{CancellationSettings, MethodKind};
use crate::request::RequestMessage;
use crate::response::ResponseMessage;
use crate::types::RequestId;

/// Information about the request being handled
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    pub method: String,
    cancellation: CancellationHandle,
}

impl RequestContext {
    pub fn new(id: RequestId, method: impl Into<String>, cancellation: CancellationHandle) -> Self {
        Self {
            id,
            method: method.into(),
            cancellation,
        }
    }

    /// Fires when the peer cancels this request
    pub fn cancellation(&self) -> &CancellationHandle {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Trait for handling an incoming request
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(
        &self,
        params: Option<Payload>,
        context: RequestContext,
    ) -> Result<Payload, HandlerError>;
}

/// Trait for handling an incoming notification
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, params: Option<Payload>) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> RequestHandler for F
where
    F: Fn(Option<Payload>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        params: Option<Payload>,
        context: RequestContext,
    ) -> Result<Payload, HandlerError> {
        (self)(params, context).await
    }
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Option<Payload>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Option<Payload>) -> Result<(), HandlerError> {
        (self)(params).await
    }
}

/// A registered handler, tagged with the kind of message it accepts
#[derive(Clone)]
pub enum Handler {
    Request(Arc<dyn RequestHandler>),
    Notification(Arc<dyn NotificationHandler>),
}

impl Handler {
    pub fn kind(&self) -> MethodKind {
        match self {
            Handler::Request(_) => MethodKind::Request,
            Handler::Notification(_) => MethodKind::Notification,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler::{:?}", self.kind())
    }
}

/// Method dispatcher for the local side of a connection
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
    cancellation: Option<CancellationSettings>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method, replacing any earlier one
    pub fn register(&mut self, method: impl Into<String>, handler: Handler) -> &mut Self {
        let method = method.into();
        if self.handlers.insert(method.clone(), handler).is_some() {
            warn!(method = %method, "Replacing previously registered handler");
        }
        self
    }

    pub fn on_request<H>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: RequestHandler + 'static,
    {
        self.register(method, Handler::Request(Arc::new(handler)))
    }

    pub fn on_notification<H>(&mut self, method: impl Into<String>, handler: H) -> &mut Self
    where
        H: NotificationHandler + 'static,
    {
        self.register(method, Handler::Notification(Arc::new(handler)))
    }

    /// Register a request handler over deserialized params.
    ///
    /// Params that fail to deserialize are answered with InvalidParams.
    pub fn on_request_typed<P, R, F, Fut>(&mut self, method: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.on_request(method, move |params: Option<Payload>, context: RequestContext| {
            let f = Arc::clone(&f);
            async move {
                let params: P = decode_params(params)?;
                let result = f(params, context).await?;
                Payload::from_typed(&result).map_err(|e| HandlerError::Internal(e.into()))
            }
        })
    }

    /// Register a notification handler over deserialized params.
    pub fn on_notification_typed<P, F, Fut>(&mut self, method: impl Into<String>, f: F) -> &mut Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.on_notification(method, move |params: Option<Payload>| {
            let f = Arc::clone(&f);
            async move { f(decode_params(params)?).await }
        })
    }

    /// Answer requests cancelled by the peer with these settings' code
    pub fn set_cancellation(&mut self, settings: Option<CancellationSettings>) {
        self.cancellation = settings;
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn registered_methods(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Handle one incoming message. Only requests produce an answer.
    pub async fn handle(&self, message: Message, cancellation: CancellationHandle) -> Option<Message> {
        match message {
            Message::Request(request) => {
                Some(self.handle_request(request, cancellation).await.into())
            }
            Message::Notification(notification) => {
                self.handle_notification(notification).await;
                None
            }
            Message::Response(response) => {
                warn!(id = ?response.id, "Dispatcher does not handle responses, dropping");
                None
            }
        }
    }

    /// Invoke the request's handler and wrap its outcome in a response.
    ///
    /// Handler failures, panics included, become error responses.
    pub async fn handle_request(
        &self,
        request: RequestMessage,
        cancellation: CancellationHandle,
    ) -> ResponseMessage {
        let RequestMessage { id, method, params } = request;

        let handler = match self.handlers.get(&method) {
            Some(Handler::Request(handler)) => Arc::clone(handler),
            other => {
                if other.is_some() {
                    warn!(method = %method, id = %id, "Notification method called as a request");
                } else {
                    debug!(method = %method, id = %id, "No handler registered for request");
                }
                return ResponseMessage::error(Some(id), ResponseError::method_not_found(&method));
            }
        };

        let context = RequestContext::new(id.clone(), method.clone(), cancellation.clone());
        let invocation = AssertUnwindSafe(handler.handle(params, context)).catch_unwind();

        let outcome = match &self.cancellation {
            Some(_) => {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => None,
                    outcome = invocation => Some(outcome),
                }
            }
            None => Some(invocation.await),
        };

        let error = match outcome {
            Some(Ok(Ok(result))) => return ResponseMessage::success(id, result),
            Some(Ok(Err(failure))) => {
                if let HandlerError::Internal(ref cause) = failure {
                    warn!(method = %method, id = %id, error = %format!("{:#}", cause), "Request handler failed");
                }
                failure.to_response_error()
            }
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(method = %method, id = %id, panic = %message, "Request handler panicked");
                ResponseError::internal_error("Internal error", Some(Value::String(message)))
            }
            None => {
                debug!(method = %method, id = %id, "Request cancelled before completion");
                self.cancelled_error(&id, &method)
            }
        };
        ResponseMessage::error(Some(id), error)
    }

    /// Invoke the notification's handler, if any. Failures are only logged.
    pub async fn handle_notification(&self, notification: NotificationMessage) {
        let NotificationMessage { method, params } = notification;

        let handler = match self.handlers.get(&method) {
            Some(Handler::Notification(handler)) => Arc::clone(handler),
            Some(Handler::Request(_)) => {
                warn!(method = %method, "Request method sent as a notification, dropping");
                return;
            }
            // `$/` methods are optional for the receiver
            None if method.starts_with("$/") => {
                debug!(method = %method, "Ignoring optional notification");
                return;
            }
            None => {
                warn!(method = %method, "Unsupported notification method, dropping");
                return;
            }
        };

        match AssertUnwindSafe(handler.handle(params)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => {
                warn!(method = %method, error = %failure, "Notification handler failed");
            }
            Err(panic) => {
                error!(
                    method = %method,
                    panic = %panic_message(panic.as_ref()),
                    "Notification handler panicked"
                );
            }
        }
    }

    fn cancelled_error(&self, id: &RequestId, method: &str) -> ResponseError {
        let code = self
            .cancellation
            .as_ref()
            .map_or(JsonRpcErrorCode::InternalError, |settings| {
                JsonRpcErrorCode::from_code(settings.code)
            });
        ResponseError::new(
            code,
            format!(
                "The request (id: {}, method: '{}') has been cancelled",
                id, method
            ),
        )
    }
}

fn decode_params<P: DeserializeOwned>(params: Option<Payload>) -> Result<P, HandlerError> {
    params
        .unwrap_or_default()
        .into_typed()
        .map_err(|e| HandlerError::Failure(ResponseError::invalid_params(e.to_string())))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct AddParams {
        a: i64,
        b: i64,
    }

    fn dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .on_request("ping", |_params: Option<Payload>, _context: RequestContext| async {
                Ok::<_, HandlerError>(Payload::empty_object())
            })
            .on_request_typed("add", |params: AddParams, _context| async move {
                Ok::<_, HandlerError>(json!({"sum": params.a + params.b}))
            })
            .on_request("fail", |_params: Option<Payload>, _context: RequestContext| async {
                Err(HandlerError::failure(
                    JsonRpcErrorCode::ServerError(-32801),
                    "Content modified",
                ))
            })
            .on_request("boom", |_params: Option<Payload>, _context: RequestContext| async {
                if true {
                    panic!("handler exploded");
                }
                Ok::<_, HandlerError>(Payload::null())
            })
            .on_notification("exit", |_params: Option<Payload>| async {
                Ok::<_, HandlerError>(())
            });
        dispatcher
    }

    async fn call(dispatcher: &Dispatcher, method: &str, params: Value) -> ResponseMessage {
        dispatcher
            .handle_request(
                RequestMessage::with_json(1, method, params),
                CancellationHandle::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_success() {
        let response = call(&dispatcher(), "ping", json!({})).await;
        assert_eq!(
            response,
            ResponseMessage::success(RequestId::Number(1), Payload::empty_object())
        );
    }

    #[tokio::test]
    async fn test_typed_handler() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "add", json!({"a": 2, "b": 3})).await;
        assert_eq!(response.result().unwrap().to_value(), json!({"sum": 5}));

        let response = call(&dispatcher, "add", json!({"a": "two"})).await;
        assert_eq!(
            response.error_object().unwrap().error_code(),
            JsonRpcErrorCode::InvalidParams
        );
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, "nope", json!(null)).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.error_code(), JsonRpcErrorCode::MethodNotFound);
        assert_eq!(error.message, "Unsupported request method: nope");

        // Registered as a notification, so not callable as a request
        let response = call(&dispatcher, "exit", json!(null)).await;
        assert_eq!(
            response.error_object().unwrap().error_code(),
            JsonRpcErrorCode::MethodNotFound
        );
    }

    #[tokio::test]
    async fn test_typed_failure_is_sent_as_is() {
        let response = call(&dispatcher(), "fail", json!(null)).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.code, -32801);
        assert_eq!(error.message, "Content modified");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let response = call(&dispatcher(), "boom", json!(null)).await;
        let error = response.error_object().unwrap();
        assert_eq!(error.error_code(), JsonRpcErrorCode::InternalError);
        assert_eq!(error.data, Some(json!("handler exploded")));
    }

    #[tokio::test]
    async fn test_notification_produces_no_message() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = dispatcher();
        let seen = Arc::clone(&counter);
        dispatcher.on_notification("log", move |_params: Option<Payload>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(())
            }
        });

        let answer = dispatcher
            .handle(
                NotificationMessage::with_json("log", json!({"msg": "hi"})).into(),
                CancellationHandle::new(),
            )
            .await;
        assert!(answer.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let answer = dispatcher
            .handle(
                NotificationMessage::with_json("unknown", json!({})).into(),
                CancellationHandle::new(),
            )
            .await;
        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_request_answers_with_registry_code() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.set_cancellation(Some(CancellationSettings {
            method: "$/cancelRequest".to_string(),
            code: -32800,
        }));
        dispatcher.on_request("slow", |_params: Option<Payload>, context: RequestContext| async move {
            context.cancellation().cancelled().await;
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HandlerError>(Payload::null())
        });

        let cancellation = CancellationHandle::new();
        let pending = dispatcher.handle_request(
            RequestMessage::new_no_params("abc", "slow"),
            cancellation.clone(),
        );
        cancellation.cancel();

        let response = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap();
        let error = response.error_object().unwrap();
        assert_eq!(error.code, -32800);
        assert_eq!(
            error.message,
            "The request (id: abc, method: 'slow') has been cancelled"
        );
    }
}
