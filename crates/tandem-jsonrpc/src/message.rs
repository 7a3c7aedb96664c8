//! The tagged envelope exchanged over a connection.

use std::fmt;

use crate::notification::NotificationMessage;
use crate::request::RequestMessage;
use crate::response::ResponseMessage;
use crate::types::RequestId;

/// Which of the three envelopes a message is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Notification => write!(f, "notification"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(RequestMessage),
    Notification(NotificationMessage),
    Response(ResponseMessage),
}

impl Message {
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(request) => Some(&request.id),
            Message::Notification(_) => None,
            Message::Response(response) => response.id.as_ref(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(request) => Some(&request.method),
            Message::Notification(notification) => Some(&notification.method),
            Message::Response(_) => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Notification(_) => MessageKind::Notification,
            Message::Response(_) => MessageKind::Response,
        }
    }
}

impl From<RequestMessage> for Message {
    fn from(request: RequestMessage) -> Self {
        Message::Request(request)
    }
}

impl From<NotificationMessage> for Message {
    fn from(notification: NotificationMessage) -> Self {
        Message::Notification(notification)
    }
}

impl From<ResponseMessage> for Message {
    fn from(response: ResponseMessage) -> Self {
        Message::Response(response)
    }
}
