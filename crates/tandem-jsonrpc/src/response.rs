use serde_json::Value;

use crate::error::ResponseError;
use crate::payload::Payload;
use crate::types::RequestId;

/// Exactly one of `result` or `error`
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Payload),
    Error(ResponseError),
}

/// A JSON-RPC response.
///
/// `id` is `None` only for error responses to messages whose id could not be
/// recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub id: Option<RequestId>,
    pub outcome: ResponseOutcome,
}

impl ResponseMessage {
    pub fn success(id: RequestId, result: Payload) -> Self {
        Self {
            id: Some(id),
            outcome: ResponseOutcome::Result(result),
        }
    }

    pub fn success_json(id: RequestId, result: Value) -> Self {
        Self::success(id, Payload::Json(result))
    }

    pub fn error(id: Option<RequestId>, error: ResponseError) -> Self {
        Self {
            id,
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Check if this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    pub fn result(&self) -> Option<&Payload> {
        match &self.outcome {
            ResponseOutcome::Result(result) => Some(result),
            ResponseOutcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ResponseError> {
        match &self.outcome {
            ResponseOutcome::Result(_) => None,
            ResponseOutcome::Error(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<Payload, ResponseError> {
        match self.outcome {
            ResponseOutcome::Result(result) => Ok(result),
            ResponseOutcome::Error(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_response() {
        let response = ResponseMessage::success_json(RequestId::Number(1), json!({"ok": true}));
        assert!(!response.is_error());
        assert_eq!(response.result(), Some(&Payload::Json(json!({"ok": true}))));
        assert!(response.error_object().is_none());
    }

    #[test]
    fn test_error_response() {
        let response = ResponseMessage::error(None, ResponseError::parse_error("bad json"));
        assert!(response.is_error());
        assert_eq!(response.id, None);
        assert_eq!(response.into_result().unwrap_err().code, -32700);
    }
}
