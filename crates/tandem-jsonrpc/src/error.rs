use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::error_codes::*;
use crate::issue::MessageIssue;
use crate::registry::MethodKind;
use crate::types::RequestId;

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    /// Any other code, including protocol-specific ones such as "request cancelled"
    ServerError(i64),
}

impl JsonRpcErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => INTERNAL_ERROR,
            JsonRpcErrorCode::ServerError(code) => *code,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            JsonRpcErrorCode::ParseError => "Parse error",
            JsonRpcErrorCode::InvalidRequest => "Invalid Request",
            JsonRpcErrorCode::MethodNotFound => "Method not found",
            JsonRpcErrorCode::InvalidParams => "Invalid params",
            JsonRpcErrorCode::InternalError => "Internal error",
            JsonRpcErrorCode::ServerError(_) => "Server error",
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            PARSE_ERROR => JsonRpcErrorCode::ParseError,
            INVALID_REQUEST => JsonRpcErrorCode::InvalidRequest,
            METHOD_NOT_FOUND => JsonRpcErrorCode::MethodNotFound,
            INVALID_PARAMS => JsonRpcErrorCode::InvalidParams,
            INTERNAL_ERROR => JsonRpcErrorCode::InternalError,
            other => JsonRpcErrorCode::ServerError(other),
        }
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// The `error` member of an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn error_code(&self) -> JsonRpcErrorCode {
        JsonRpcErrorCode::from_code(self.code)
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            JsonRpcErrorCode::MethodNotFound,
            format!("Unsupported request method: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code: JsonRpcErrorCode::InternalError.code(),
            message: message.into(),
            data,
        }
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ResponseError {}

/// Errors observed by callers of the remote endpoint
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Remote error: {0}")]
    Remote(ResponseError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request {0} was cancelled")]
    Cancelled(RequestId),

    #[error("Method '{0}' is not known to the remote endpoint")]
    UnknownMethod(String),

    #[error("Method '{method}' must be called as a {expected}")]
    WrongKind { method: String, expected: MethodKind },

    #[error("Invalid response: {0}")]
    InvalidResponse(MessageIssue),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RpcError {
    /// Get the error code if the peer answered with an error
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Remote(error) => Some(error.code),
            _ => None,
        }
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

/// Result type for remote endpoint operations
pub type RpcResult<T> = Result<T, RpcError>;

/// Misuse of a connection's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Connection is already listening")]
    AlreadyListening,

    #[error("Connection is closed")]
    Closed,
}

/// Failure returned by a local handler
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Typed failure, sent to the peer unchanged
    #[error("{0}")]
    Failure(ResponseError),

    /// Unexpected failure, reported to the peer as an internal error
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn failure(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self::Failure(ResponseError::new(code, message))
    }

    /// Convert into the error object sent on the wire.
    pub fn to_response_error(&self) -> ResponseError {
        match self {
            HandlerError::Failure(error) => error.clone(),
            HandlerError::Internal(error) => ResponseError::internal_error(
                "Internal error",
                Some(Value::String(format!("{:#}", error))),
            ),
        }
    }
}

impl From<ResponseError> for HandlerError {
    fn from(error: ResponseError) -> Self {
        HandlerError::Failure(error)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        HandlerError::Failure(ResponseError::invalid_params(error.to_string()))
    }
}
