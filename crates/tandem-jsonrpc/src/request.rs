use serde_json::Value;

use crate::payload::Payload;
use crate::types::RequestId;

/// A JSON-RPC request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMessage {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Payload>,
}

impl RequestMessage {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Payload>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Create a new request with no parameters
    pub fn new_no_params(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self::new(id, method, None)
    }

    /// Create a new request with generic JSON parameters
    pub fn with_json(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self::new(id, method, Some(Payload::Json(params)))
    }

    /// Get a parameter by name (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<Payload> {
        self.params.as_ref()?.field(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_with_object_params() {
        let request = RequestMessage::with_json(
            "req1",
            "set_value",
            json!({"name": "test", "value": 42}),
        );

        assert_eq!(request.id, RequestId::String("req1".to_string()));
        assert_eq!(request.get_param("name"), Some(Payload::Json(json!("test"))));
        assert_eq!(request.get_param("value"), Some(Payload::Json(json!(42))));
        assert_eq!(request.get_param("missing"), None);
    }

    #[test]
    fn test_request_without_params() {
        let request = RequestMessage::new_no_params(1, "shutdown");
        assert_eq!(request.id, RequestId::Number(1));
        assert!(request.params.is_none());
        assert_eq!(request.get_param("anything"), None);
    }
}
