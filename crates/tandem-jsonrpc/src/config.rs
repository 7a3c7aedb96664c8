//! Configuration types for a JSON-RPC connection

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_CONSECUTIVE_FRAMING_ERRORS: u32 = 8;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_NOTIFICATION_QUEUE_CAPACITY: usize = 1024;
/// Room for the blank line ending a header block
pub const MIN_HEADER_BYTES: usize = 4;

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Label recorded on the connection's tracing span
    pub name: String,

    /// Frames with a larger body are skipped and reported
    pub max_content_length: usize,

    /// Maximum size of a frame's header block
    pub max_header_bytes: usize,

    /// Framing errors in a row before the connection closes.
    /// A well-formed frame resets the count.
    pub max_consecutive_framing_errors: u32,

    /// Capacity of the outbound frame queue
    pub outbound_queue_capacity: usize,

    /// Inbound notifications waiting for the notification worker.
    /// When full, the read loop stops reading until the worker catches up.
    pub notification_queue_capacity: usize,

    /// Written as a `Content-Type` header on every outgoing frame when set
    pub content_type: Option<String>,

    /// Whether to check envelopes for JSON-RPC 2.0 conformance
    pub validate_messages: bool,

    /// Whether to log every envelope at TRACE level
    pub trace_messages: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "jsonrpc".to_string(),
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_consecutive_framing_errors: DEFAULT_MAX_CONSECUTIVE_FRAMING_ERRORS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            notification_queue_capacity: DEFAULT_NOTIFICATION_QUEUE_CAPACITY,
            content_type: None,
            validate_messages: false,
            trace_messages: false,
        }
    }
}

impl ConnectionConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    /// Values below [`MIN_HEADER_BYTES`] are raised to it.
    pub fn with_max_header_bytes(mut self, max_header_bytes: usize) -> Self {
        self.max_header_bytes = max_header_bytes.max(MIN_HEADER_BYTES);
        self
    }

    pub fn with_max_consecutive_framing_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_framing_errors = limit;
        self
    }

    /// Zero is raised to one; the queue must hold at least one frame.
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity.max(1);
        self
    }

    /// Zero is raised to one.
    pub fn with_notification_queue_capacity(mut self, capacity: usize) -> Self {
        self.notification_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_messages = validate;
        self
    }

    pub fn with_message_tracing(mut self, trace: bool) -> Self {
        self.trace_messages = trace;
        self
    }
}
