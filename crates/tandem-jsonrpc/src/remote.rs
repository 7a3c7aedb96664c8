//! Peer-facing calling API.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RpcError, RpcResult};
use crate::message::Message;
use crate::notification::NotificationMessage;
use crate::payload::Payload;
use crate::pending::{PendingResponse, RequestManager};
use crate::registry::{MethodKind, MethodRegistry};
use crate::types::RequestId;

/// Calls methods on the peer.
///
/// Only methods present in the peer's registry can be called, and only as the
/// kind they were registered with. Anything else fails locally without
/// writing a frame.
///
/// Protocol stubs wrap this type with one method per peer method:
///
/// ```rust,ignore
/// struct LanguageServer(RemoteEndpoint);
///
/// impl LanguageServer {
///     async fn hover(&self, params: HoverParams) -> RpcResult<Hover> {
///         self.0.request_typed("textDocument/hover", &params).await
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RemoteEndpoint {
    registry: Arc<MethodRegistry>,
    requests: Arc<RequestManager>,
    outbound: mpsc::Sender<Message>,
}

impl RemoteEndpoint {
    pub fn new(
        registry: Arc<MethodRegistry>,
        requests: Arc<RequestManager>,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            registry,
            requests,
            outbound,
        }
    }

    /// Send a request. The returned future resolves with the peer's answer.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Payload>,
    ) -> RpcResult<PendingResponse> {
        self.check(method, MethodKind::Request)?;
        self.requests.send(method, params).await
    }

    /// Send a request with serializable params and deserialize its result.
    pub async fn request_typed<P, R>(&self, method: &str, params: &P) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = Payload::from_typed(params)?;
        let result = self.request(method, Some(params)).await?.await?;
        Ok(result.into_typed()?)
    }

    /// Send a notification. Returns once it is queued for writing.
    pub async fn notify(&self, method: &str, params: Option<Payload>) -> RpcResult<()> {
        self.check(method, MethodKind::Notification)?;
        if self.requests.is_closed() {
            return Err(RpcError::ConnectionClosed);
        }
        let notification = NotificationMessage::new(method, params);
        self.outbound
            .send(notification.into())
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Send a notification with serializable params.
    pub async fn notify_typed<P>(&self, method: &str, params: &P) -> RpcResult<()>
    where
        P: Serialize + ?Sized,
    {
        self.notify(method, Some(Payload::from_typed(params)?)).await
    }

    /// Cancel a pending request by id. Returns whether it was still pending.
    pub async fn cancel(&self, id: &RequestId) -> bool {
        self.requests.cancel(id).await
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    fn check(&self, method: &str, expected: MethodKind) -> RpcResult<()> {
        let Some(spec) = self.registry.lookup(method) else {
            debug!(method, "Refusing to call a method the peer does not declare");
            return Err(RpcError::UnknownMethod(method.to_string()));
        };
        if spec.kind != expected {
            return Err(RpcError::WrongKind {
                method: method.to_string(),
                expected: spec.kind,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;
    use serde_json::json;

    fn endpoint() -> (RemoteEndpoint, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let registry = MethodRegistry::builder()
            .request("shutdown", Shape::Any, Shape::Any)
            .notification("exit", Shape::Any)
            .build()
            .into_shared();
        let requests = RequestManager::new(tx.clone(), None);
        (RemoteEndpoint::new(registry, requests, tx), rx)
    }

    #[tokio::test]
    async fn test_unknown_method_fails_locally() {
        let (endpoint, mut outbound) = endpoint();
        let error = endpoint.request("initialize", None).await.unwrap_err();
        assert!(matches!(error, RpcError::UnknownMethod(ref m) if m == "initialize"));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wrong_kind_fails_locally() {
        let (endpoint, mut outbound) = endpoint();
        assert!(matches!(
            endpoint.notify("shutdown", None).await,
            Err(RpcError::WrongKind { expected: MethodKind::Request, .. })
        ));
        assert!(matches!(
            endpoint.request("exit", None).await,
            Err(RpcError::WrongKind { expected: MethodKind::Notification, .. })
        ));
        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_enqueues_notification() {
        let (endpoint, mut outbound) = endpoint();
        endpoint.notify_typed("exit", &json!({"code": 0})).await.unwrap();

        let Some(Message::Notification(notification)) = outbound.recv().await else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, "exit");
    }
}
