//! Static method table: method name → kind and shape hints.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::shape::Shape;

/// Whether a method is answered or fire-and-forget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Request,
    Notification,
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::Request => write!(f, "request"),
            MethodKind::Notification => write!(f, "notification"),
        }
    }
}

/// Registration entry for one method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSpec {
    pub name: String,
    pub kind: MethodKind,
    pub params: Shape,
    /// Always `Shape::Any` for notifications
    pub result: Shape,
}

/// Protocol-specific cancellation support
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationSettings {
    /// Notification method carrying `{"id": <id>}`, e.g. `$/cancelRequest`
    pub method: String,
    /// Error code answered for a request cancelled before it completed
    pub code: i64,
}

/// Read-only table of the methods one side of a connection serves.
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodSpec>,
    cancellation: Option<CancellationSettings>,
}

impl MethodRegistry {
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&MethodSpec> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn cancellation(&self) -> Option<&CancellationSettings> {
        self.cancellation.as_ref()
    }

    pub fn is_cancel_method(&self, name: &str) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|settings| settings.method == name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// Builds a [`MethodRegistry`]
#[derive(Debug, Default)]
pub struct MethodRegistryBuilder {
    prefix: String,
    methods: HashMap<String, MethodSpec>,
    cancellation: Option<CancellationSettings>,
}

impl MethodRegistryBuilder {
    /// Register a request method with its params and result shapes
    pub fn request(mut self, name: &str, params: Shape, result: Shape) -> Self {
        self.insert(name, MethodKind::Request, params, result);
        self
    }

    /// Register a notification method with its params shape
    pub fn notification(mut self, name: &str, params: Shape) -> Self {
        self.insert(name, MethodKind::Notification, params, Shape::Any);
        self
    }

    /// Register every method added inside `f` under `"<segment>/"`.
    ///
    /// Segments nest: `segment("a", |s| s.segment("b", ...))` yields `a/b/...`.
    pub fn segment(mut self, segment: &str, f: impl FnOnce(Self) -> Self) -> Self {
        let outer = self.prefix.clone();
        self.prefix = format!("{}{}/", outer, segment);
        let mut builder = f(self);
        builder.prefix = outer;
        builder
    }

    /// Declare the cancellation notification of this protocol.
    pub fn cancellation(mut self, method: &str, code: i64) -> Self {
        let params = Shape::object()
            .required("id", Shape::either(Shape::Integer, Shape::String))
            .build();
        self.methods.insert(
            method.to_string(),
            MethodSpec {
                name: method.to_string(),
                kind: MethodKind::Notification,
                params,
                result: Shape::Any,
            },
        );
        self.cancellation = Some(CancellationSettings {
            method: method.to_string(),
            code,
        });
        self
    }

    /// Merge another registry's methods into this one.
    pub fn extend(mut self, other: &MethodRegistry) -> Self {
        for spec in other.methods() {
            self.methods.insert(spec.name.clone(), spec.clone());
        }
        if self.cancellation.is_none() {
            self.cancellation = other.cancellation.clone();
        }
        self
    }

    pub fn build(self) -> MethodRegistry {
        MethodRegistry {
            methods: self.methods,
            cancellation: self.cancellation,
        }
    }

    fn insert(&mut self, name: &str, kind: MethodKind, params: Shape, result: Shape) {
        let name = format!("{}{}", self.prefix, name);
        if self.methods.contains_key(&name) {
            warn!(method = %name, "Duplicate method registration, replacing earlier entry");
        }
        self.methods.insert(
            name.clone(),
            MethodSpec {
                name,
                kind,
                params,
                result,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language_registry() -> MethodRegistry {
        MethodRegistry::builder()
            .request("initialize", Shape::empty_object(), Shape::empty_object())
            .notification("exit", Shape::Any)
            .segment("textDocument", |s| {
                s.request("hover", Shape::empty_object(), Shape::Any)
                    .notification("didOpen", Shape::empty_object())
            })
            .segment("workspace", |s| {
                s.segment("folders", |s| s.request("list", Shape::Any, Shape::Any))
            })
            .cancellation("$/cancelRequest", -32800)
            .build()
    }

    #[test]
    fn test_segments_prefix_names() {
        let registry = language_registry();
        assert_eq!(
            registry.lookup("textDocument/hover").unwrap().kind,
            MethodKind::Request
        );
        assert_eq!(
            registry.lookup("textDocument/didOpen").unwrap().kind,
            MethodKind::Notification
        );
        assert!(registry.contains("workspace/folders/list"));
        assert!(registry.contains("initialize"));
        assert!(!registry.contains("hover"));
    }

    #[test]
    fn test_cancellation_registered_as_notification() {
        let registry = language_registry();
        assert!(registry.is_cancel_method("$/cancelRequest"));
        assert_eq!(registry.cancellation().unwrap().code, -32800);
        assert_eq!(
            registry.lookup("$/cancelRequest").unwrap().kind,
            MethodKind::Notification
        );
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_extend_merges_tables() {
        let client = MethodRegistry::builder()
            .notification("window/logMessage", Shape::Any)
            .build();
        let merged = MethodRegistry::builder()
            .extend(&language_registry())
            .extend(&client)
            .build();
        assert!(merged.contains("window/logMessage"));
        assert!(merged.is_cancel_method("$/cancelRequest"));
    }
}
