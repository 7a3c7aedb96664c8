//! Diagnostics for messages that failed to parse or validate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::JsonRpcErrorCode;
use crate::types::RequestId;

/// Describes a message that could not be parsed, validated or routed.
///
/// `cause` links to the underlying failure, recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageIssue {
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<MessageIssue>>,
}

impl MessageIssue {
    pub fn new(code: JsonRpcErrorCode, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: code.code(),
            id: None,
            cause: None,
        }
    }

    pub fn parse_error(text: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::ParseError, text)
    }

    pub fn invalid_request(text: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, text)
    }

    pub fn invalid_params(text: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidParams, text)
    }

    pub fn with_id(mut self, id: Option<RequestId>) -> Self {
        self.id = id;
        self
    }

    pub fn caused_by(mut self, cause: MessageIssue) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn error_code(&self) -> JsonRpcErrorCode {
        JsonRpcErrorCode::from_code(self.code)
    }

    /// Iterate over this issue and every issue in its causal chain.
    pub fn chain(&self) -> impl Iterator<Item = &MessageIssue> {
        std::iter::successors(Some(self), |issue| issue.cause.as_deref())
    }

    /// The deepest cause in the chain.
    pub fn root_cause(&self) -> &MessageIssue {
        self.chain().last().unwrap_or(self)
    }
}

impl fmt::Display for MessageIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for MessageIssue {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}
