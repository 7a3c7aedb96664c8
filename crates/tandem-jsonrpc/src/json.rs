//! Conversion between [`Message`] and JSON text.
//!
//! Decoding consults the method tables to materialize `params` and `result`
//! against their shape hints. Methods without a registration, and responses
//! without a matching pending request, keep their payload as generic JSON.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{JsonRpcErrorCode, ResponseError};
use crate::issue::MessageIssue;
use crate::message::{Message, MessageKind};
use crate::notification::NotificationMessage;
use crate::payload::Payload;
use crate::registry::MethodRegistry;
use crate::request::RequestMessage;
use crate::response::{ResponseMessage, ResponseOutcome};
use crate::shape::Shape;
use crate::types::{JsonRpcVersion, RequestId};

/// Translates envelopes to and from JSON using the local and remote method tables.
#[derive(Debug, Clone)]
pub struct MessageTranslator {
    /// Methods served locally; shapes incoming request and notification params
    local: Arc<MethodRegistry>,
    /// Methods served by the peer; shapes results of our outgoing requests
    remote: Arc<MethodRegistry>,
    validate: bool,
}

impl MessageTranslator {
    pub fn new(local: Arc<MethodRegistry>, remote: Arc<MethodRegistry>) -> Self {
        Self {
            local,
            remote,
            validate: false,
        }
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Parse one frame payload.
    ///
    /// `pending_method` maps a response id to the method of the outstanding
    /// request it answers, if any.
    pub fn decode(
        &self,
        bytes: &[u8],
        pending_method: impl Fn(&RequestId) -> Option<String>,
    ) -> Result<Message, MessageIssue> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            MessageIssue::parse_error("Unable to parse JSON message")
                .caused_by(MessageIssue::parse_error(e.to_string()))
        })?;

        let Value::Object(object) = value else {
            return Err(MessageIssue::invalid_request(
                "JSON-RPC message must be an object",
            ));
        };

        let id = object.get("id").and_then(RequestId::from_value);

        if self.validate {
            let version = object.get("jsonrpc");
            let conforming = version
                .and_then(|version| JsonRpcVersion::deserialize(version).ok())
                .is_some();
            if !conforming {
                return Err(MessageIssue::invalid_request(format!(
                    "The \"jsonrpc\" member must be \"{}\", found {}",
                    JsonRpcVersion::V2_0,
                    version.map_or_else(|| "nothing".to_string(), Value::to_string)
                ))
                .with_id(id));
            }
        }

        if object.contains_key("method") {
            self.decode_call(&object, id)
        } else if object.contains_key("result")
            || object.contains_key("error")
            || object.contains_key("id")
        {
            self.decode_response(&object, id, pending_method)
        } else {
            Err(MessageIssue::invalid_request(
                "Message is neither a request, a notification nor a response",
            ))
        }
    }

    fn decode_call(
        &self,
        object: &Map<String, Value>,
        id: Option<RequestId>,
    ) -> Result<Message, MessageIssue> {
        let method = match object.get("method") {
            Some(Value::String(method)) => method.clone(),
            _ => {
                return Err(
                    MessageIssue::invalid_request("The \"method\" member must be a string")
                        .with_id(id),
                );
            }
        };
        if self.validate && method.is_empty() {
            return Err(
                MessageIssue::invalid_request("The \"method\" member must not be empty")
                    .with_id(id),
            );
        }

        let is_request = match object.get("id") {
            None => false,
            Some(_) if id.is_some() => true,
            Some(raw) => {
                return Err(MessageIssue::invalid_request(format!(
                    "Request id must be a string or an integer, found {}",
                    raw
                )));
            }
        };

        let generic = Shape::Any;
        let shape = self
            .local
            .lookup(&method)
            .map_or(&generic, |spec| &spec.params);
        let params = match object.get("params") {
            None => None,
            Some(raw) => Some(decode_params(raw, shape).map_err(|cause| {
                MessageIssue::invalid_params(format!("Invalid params for method '{}'", method))
                    .caused_by(cause)
                    .with_id(id.clone())
            })?),
        };

        match (is_request, id) {
            (true, Some(id)) => Ok(Message::Request(RequestMessage { id, method, params })),
            _ => Ok(Message::Notification(NotificationMessage { method, params })),
        }
    }

    fn decode_response(
        &self,
        object: &Map<String, Value>,
        id: Option<RequestId>,
        pending_method: impl Fn(&RequestId) -> Option<String>,
    ) -> Result<Message, MessageIssue> {
        if let Some(raw) = object.get("id") {
            if !raw.is_null() && id.is_none() {
                return Err(MessageIssue::invalid_request(format!(
                    "Response id must be a string, an integer or null, found {}",
                    raw
                )));
            }
        }

        let outcome = match (object.get("result"), object.get("error")) {
            (Some(_), Some(_)) => {
                return Err(MessageIssue::invalid_request(
                    "Response must not contain both \"result\" and \"error\"",
                )
                .with_id(id));
            }
            (None, None) => {
                return Err(MessageIssue::invalid_request(
                    "Response must contain either \"result\" or \"error\"",
                )
                .with_id(id));
            }
            (None, Some(error)) => {
                let error: ResponseError = serde_json::from_value(error.clone()).map_err(|e| {
                    MessageIssue::invalid_request("Malformed response error object")
                        .caused_by(MessageIssue::parse_error(e.to_string()))
                        .with_id(id.clone())
                })?;
                ResponseOutcome::Error(error)
            }
            (Some(result), None) => {
                let Some(request_id) = id.as_ref() else {
                    return Err(MessageIssue::invalid_request(
                        "Successful response must carry a request id",
                    ));
                };
                let shape = pending_method(request_id)
                    .and_then(|method| self.remote.lookup(&method).map(|spec| spec.result.clone()))
                    .unwrap_or_default();
                let result = decode_value(result, &shape, "result").map_err(|cause| {
                    MessageIssue::invalid_request(format!(
                        "Result of request {} does not match its declared shape",
                        request_id
                    ))
                    .caused_by(cause)
                    .with_id(id.clone())
                })?;
                ResponseOutcome::Result(result)
            }
        };

        Ok(Message::Response(ResponseMessage { id, outcome }))
    }

    /// Serialize a message to JSON bytes.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&to_json(message)?)
    }
}

/// Build the JSON envelope for a message.
pub fn to_json(message: &Message) -> Result<Value, serde_json::Error> {
    let mut object = Map::new();
    object.insert(
        "jsonrpc".to_string(),
        serde_json::to_value(JsonRpcVersion::V2_0)?,
    );
    match message {
        Message::Request(request) => {
            object.insert("id".to_string(), request.id.to_value());
            object.insert("method".to_string(), Value::from(request.method.as_str()));
            if let Some(params) = &request.params {
                object.insert("params".to_string(), params.to_value());
            }
        }
        Message::Notification(notification) => {
            object.insert(
                "method".to_string(),
                Value::from(notification.method.as_str()),
            );
            if let Some(params) = &notification.params {
                object.insert("params".to_string(), params.to_value());
            }
        }
        Message::Response(response) => {
            object.insert(
                "id".to_string(),
                response.id.as_ref().map_or(Value::Null, RequestId::to_value),
            );
            match &response.outcome {
                ResponseOutcome::Result(result) => {
                    object.insert("result".to_string(), result.to_value());
                }
                ResponseOutcome::Error(error) => {
                    object.insert("error".to_string(), serde_json::to_value(error)?);
                }
            }
        }
    }
    Ok(Value::Object(object))
}

/// Judge the envelope kind of a raw frame by its members alone.
///
/// Used to route a frame that failed to decode. `None` if the frame is not a
/// JSON object.
pub fn envelope_kind(bytes: &[u8]) -> Option<MessageKind> {
    let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(bytes) else {
        return None;
    };
    match (object.contains_key("method"), object.contains_key("id")) {
        (true, true) => Some(MessageKind::Request),
        (true, false) => Some(MessageKind::Notification),
        (false, _) => Some(MessageKind::Response),
    }
}

/// `params: null` is passed through rather than checked against the shape.
fn decode_params(raw: &Value, shape: &Shape) -> Result<Payload, MessageIssue> {
    if raw.is_null() {
        return Ok(Payload::Json(Value::Null));
    }
    decode_value(raw, shape, "params")
}

/// Materialize `value` against `shape`, resolving every union on the way.
///
/// `path` names the field being decoded and prefixes every issue text.
pub fn decode_value(value: &Value, shape: &Shape, path: &str) -> Result<Payload, MessageIssue> {
    let matches = match shape {
        Shape::Any => true,
        Shape::Null => value.is_null(),
        Shape::Bool => value.is_boolean(),
        Shape::Number => value.is_number(),
        Shape::Integer => value.is_i64() || value.is_u64(),
        Shape::String => value.is_string(),
        Shape::Array(items) => {
            let Value::Array(elements) = value else {
                return Err(mismatch(path, shape, value));
            };
            return elements
                .iter()
                .enumerate()
                .map(|(index, element)| decode_value(element, items, &format!("{}[{}]", path, index)))
                .collect::<Result<Vec<_>, _>>()
                .map(Payload::List);
        }
        Shape::Object(object_shape) => {
            let Value::Object(fields) = value else {
                return Err(mismatch(path, shape, value));
            };
            if let Some(missing) = object_shape
                .fields
                .iter()
                .find(|field| field.required && !fields.contains_key(&field.name))
            {
                return Err(shape_issue(format!(
                    "{}.{}: missing required field",
                    path, missing.name
                )));
            }
            let mut record = std::collections::BTreeMap::new();
            for (name, field_value) in fields {
                let decoded = match object_shape.field(name) {
                    Some(field) if !(field_value.is_null() && !field.required) => {
                        decode_value(field_value, &field.shape, &format!("{}.{}", path, name))?
                    }
                    _ => Payload::Json(field_value.clone()),
                };
                record.insert(name.clone(), decoded);
            }
            return Ok(Payload::Record(record));
        }
        Shape::Either(left, right) => {
            return match decode_value(value, left, path) {
                Ok(payload) => Ok(Payload::left(payload)),
                Err(left_issue) => match decode_value(value, right, path) {
                    Ok(payload) => Ok(Payload::right(payload)),
                    Err(_) => Err(shape_issue(format!(
                        "{}: value matches neither {} nor {}",
                        path, left, right
                    ))
                    .caused_by(left_issue)),
                },
            };
        }
    };

    if matches {
        Ok(Payload::Json(value.clone()))
    } else {
        Err(mismatch(path, shape, value))
    }
}

fn shape_issue(text: String) -> MessageIssue {
    MessageIssue::new(JsonRpcErrorCode::InvalidParams, text)
}

fn mismatch(path: &str, expected: &Shape, found: &Value) -> MessageIssue {
    shape_issue(format!(
        "{}: expected {}, found {}",
        path,
        expected,
        json_kind(found)
    ))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
