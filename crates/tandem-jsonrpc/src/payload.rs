//! Opaque, schema-described values carried by messages.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::either::Either;
use crate::types::RequestId;

/// Parameters or result attached to a message.
///
/// Values decoded without a shape hint stay as `Json`. Values decoded against
/// a shape keep the structure the shape describes, with every union field
/// resolved to an `Either` alternative.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Generic structural value, passed through untouched
    Json(Value),
    /// Array whose items were decoded against an item shape
    List(Vec<Payload>),
    /// Object whose fields were decoded against an object shape
    Record(BTreeMap<String, Payload>),
    /// Union field resolved to one alternative
    Either(Box<Either<Payload, Payload>>),
}

impl Payload {
    pub fn null() -> Self {
        Payload::Json(Value::Null)
    }

    pub fn empty_object() -> Self {
        Payload::Json(Value::Object(Map::new()))
    }

    pub fn left(payload: Payload) -> Self {
        Payload::Either(Box::new(Either::Left(payload)))
    }

    pub fn right(payload: Payload) -> Self {
        Payload::Either(Box::new(Either::Right(payload)))
    }

    /// Serialize a typed value into a generic payload.
    pub fn from_typed<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Payload::Json)
    }

    /// Deserialize this payload into a typed value.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.into_value())
    }

    /// The JSON form of this payload. Union wrappers disappear.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Json(value) => value.clone(),
            Payload::List(items) => Value::Array(items.iter().map(Payload::to_value).collect()),
            Payload::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, field)| (key.clone(), field.to_value()))
                    .collect(),
            ),
            Payload::Either(either) => match &**either {
                Either::Left(inner) | Either::Right(inner) => inner.to_value(),
            },
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Payload::Json(value) => value,
            Payload::List(items) => Value::Array(items.into_iter().map(Payload::into_value).collect()),
            Payload::Record(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(key, field)| (key, field.into_value()))
                    .collect(),
            ),
            Payload::Either(either) => match *either {
                Either::Left(inner) | Either::Right(inner) => inner.into_value(),
            },
        }
    }

    pub fn as_either(&self) -> Option<&Either<Payload, Payload>> {
        match self {
            Payload::Either(either) => Some(either),
            _ => None,
        }
    }

    /// Read a scalar payload as a request id.
    pub fn as_request_id(&self) -> Option<RequestId> {
        match self {
            Payload::Json(value) => RequestId::from_value(value),
            Payload::Either(either) => match &**either {
                Either::Left(inner) | Either::Right(inner) => inner.as_request_id(),
            },
            _ => None,
        }
    }

    /// Look up a field of an object payload.
    pub fn field(&self, name: &str) -> Option<Payload> {
        match self {
            Payload::Record(fields) => fields.get(name).cloned(),
            Payload::Json(Value::Object(map)) => map.get(name).cloned().map(Payload::Json),
            Payload::Either(either) => match &**either {
                Either::Left(inner) | Either::Right(inner) => inner.field(name),
            },
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Payload::null()
    }
}
