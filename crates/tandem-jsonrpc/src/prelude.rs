//! # Prelude
//!
//! Re-exports of the types needed to set up a connection, register handlers
//! and call the peer.
//!
//! ```rust
//! use tandem_jsonrpc::prelude::*;
//! ```

pub use crate::cancellation::CancellationHandle;
pub use crate::config::ConnectionConfig;
pub use crate::connection::{Connection, ConnectionState};
pub use crate::dispatch::{Dispatcher, RequestContext};
pub use crate::either::Either;
pub use crate::error::{HandlerError, JsonRpcErrorCode, ResponseError, RpcError, RpcResult};
pub use crate::issue::MessageIssue;
pub use crate::launcher::Launcher;
pub use crate::message::Message;
pub use crate::payload::Payload;
pub use crate::registry::{MethodKind, MethodRegistry};
pub use crate::remote::RemoteEndpoint;
pub use crate::shape::Shape;
pub use crate::types::RequestId;

// Standard error codes
pub use crate::error_codes::*;
