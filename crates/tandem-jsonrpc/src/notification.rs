use serde_json::Value;

use crate::payload::Payload;

/// A JSON-RPC notification (request without an id)
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub method: String,
    pub params: Option<Payload>,
}

impl NotificationMessage {
    pub fn new(method: impl Into<String>, params: Option<Payload>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Create a new notification with no parameters
    pub fn new_no_params(method: impl Into<String>) -> Self {
        Self::new(method, None)
    }

    /// Create a new notification with generic JSON parameters
    pub fn with_json(method: impl Into<String>, params: Value) -> Self {
        Self::new(method, Some(Payload::Json(params)))
    }

    /// Get a parameter by name (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<Payload> {
        self.params.as_ref()?.field(name)
    }
}
