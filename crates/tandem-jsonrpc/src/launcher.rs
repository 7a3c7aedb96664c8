//! Builder assembling a [`Connection`] from a stream and method tables.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::ConnectionConfig;
use crate::connection::{BoxedReader, BoxedWriter, Connection, ConnectionParts, IssueListener};
use crate::dispatch::Dispatcher;
use crate::issue::MessageIssue;
use crate::registry::MethodRegistry;

/// Builds a connection.
///
/// ```rust,ignore
/// let connection = Launcher::new(stdin, stdout)
///     .local_methods(server_methods)
///     .remote_methods(client_methods)
///     .dispatcher(dispatcher)
///     .build();
/// connection.start_listening()?;
/// connection.closed().await;
/// ```
pub struct Launcher {
    reader: BoxedReader,
    writer: BoxedWriter,
    local: Arc<MethodRegistry>,
    remote: Arc<MethodRegistry>,
    dispatcher: Dispatcher,
    config: ConnectionConfig,
    on_issue: Option<IssueListener>,
}

impl Launcher {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            local: Arc::new(MethodRegistry::default()),
            remote: Arc::new(MethodRegistry::default()),
            dispatcher: Dispatcher::new(),
            config: ConnectionConfig::default(),
            on_issue: None,
        }
    }

    /// Methods served locally. Shapes incoming params and declares the
    /// cancel notification we accept.
    pub fn local_methods(mut self, registry: impl Into<Arc<MethodRegistry>>) -> Self {
        self.local = registry.into();
        self
    }

    /// Methods the peer serves. Only these can be called through the
    /// remote endpoint.
    pub fn remote_methods(mut self, registry: impl Into<Arc<MethodRegistry>>) -> Self {
        self.remote = registry.into();
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe every protocol issue, in addition to the log
    pub fn on_issue(mut self, listener: impl Fn(&MessageIssue) + Send + Sync + 'static) -> Self {
        self.on_issue = Some(Arc::new(listener));
        self
    }

    /// Assemble the connection in the `Created` state.
    pub fn build(self) -> Connection {
        Connection::new(ConnectionParts {
            reader: self.reader,
            writer: self.writer,
            local: self.local,
            remote: self.remote,
            dispatcher: self.dispatcher,
            config: self.config,
            on_issue: self.on_issue,
        })
    }
}
