//! # Bidirectional JSON-RPC 2.0
//!
//! A transport-agnostic JSON-RPC 2.0 engine where both ends of one byte
//! stream issue requests, notifications and responses to each other.
//!
//! ## Features
//! - `Content-Length` framing over any `AsyncRead`/`AsyncWrite` pair
//! - Shape-driven decoding of params and results, resolving `Either` unions
//! - Local dispatch with per-request tasks and ordered notifications
//! - Correlation of outgoing requests, with cooperative cancellation both ways
//! - Method tables supplied by the protocol, not the engine
//!
//! ```rust,ignore
//! use tandem_jsonrpc::prelude::*;
//!
//! let methods = MethodRegistry::builder()
//!     .request("ping", Shape::empty_object(), Shape::empty_object())
//!     .cancellation("$/cancelRequest", -32800)
//!     .build()
//!     .into_shared();
//!
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.on_request("ping", |_params: Option<Payload>, _context: RequestContext| async {
//!     Ok::<_, HandlerError>(Payload::empty_object())
//! });
//!
//! let connection = Launcher::new(reader, writer)
//!     .local_methods(methods.clone())
//!     .remote_methods(methods)
//!     .dispatcher(dispatcher)
//!     .build();
//! connection.start_listening()?;
//! let pong = connection.remote().request("ping", None).await?.await?;
//! ```

pub mod cancellation;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod either;
pub mod error;
pub mod framing;
pub mod issue;
pub mod json;
pub mod launcher;
pub mod message;
pub mod notification;
pub mod payload;
pub mod pending;
pub mod prelude;
pub mod registry;
pub mod remote;
pub mod request;
pub mod response;
pub mod shape;
pub mod types;

// Re-export main types
pub use cancellation::CancellationHandle;
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, IssueListener};
pub use dispatch::{Dispatcher, Handler, NotificationHandler, RequestContext, RequestHandler};
pub use either::Either;
pub use error::{
    ConnectionError, HandlerError, JsonRpcErrorCode, ResponseError, RpcError, RpcResult,
};
pub use framing::{FrameCodec, FramingError};
pub use issue::MessageIssue;
pub use json::MessageTranslator;
pub use launcher::Launcher;
pub use message::{Message, MessageKind};
pub use notification::NotificationMessage;
pub use payload::Payload;
pub use pending::{PendingRequest, PendingResponse, RequestManager};
pub use registry::{CancellationSettings, MethodKind, MethodRegistry, MethodSpec};
pub use remote::RemoteEndpoint;
pub use request::RequestMessage;
pub use response::{ResponseMessage, ResponseOutcome};
pub use shape::{FieldShape, ObjectShape, Shape};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}
