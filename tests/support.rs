//! Shared fixtures for the integration tests.
//!
//! Two kinds of harness are provided: a pair of real connections talking to
//! each other over an in-memory stream, and a single connection facing a
//! [`RawPeer`] that reads and writes frames directly.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tandem_jsonrpc::prelude::*;
use tandem_jsonrpc::FrameCodec;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::FramedRead;

pub const REQUEST_CANCELLED: i64 = -32800;
pub const CANCEL_METHOD: &str = "$/cancelRequest";

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Methods the test server answers.
pub fn server_methods() -> MethodRegistry {
    let location = Shape::object()
        .required("uri", Shape::String)
        .required("line", Shape::Integer)
        .build();

    MethodRegistry::builder()
        .request("ping", Shape::empty_object(), Shape::empty_object())
        .request("shutdown", Shape::Any, Shape::Any)
        .request("slow", Shape::Any, Shape::Any)
        .request("explode", Shape::Any, Shape::Any)
        .request(
            "echo",
            Shape::object().required("value", Shape::Any).build(),
            Shape::Any,
        )
        .segment("textDocument", |s| {
            s.request(
                "hover",
                Shape::object().required("uri", Shape::String).build(),
                Shape::object()
                    .required(
                        "contents",
                        Shape::either(
                            Shape::String,
                            Shape::object()
                                .required("language", Shape::String)
                                .required("value", Shape::String)
                                .build(),
                        ),
                    )
                    .build(),
            )
            .request(
                "definition",
                Shape::object().required("uri", Shape::String).build(),
                Shape::either(Shape::array(location.clone()), location),
            )
            .notification(
                "didOpen",
                Shape::object().required("uri", Shape::String).build(),
            )
        })
        .notification("log", Shape::Any)
        .notification("exit", Shape::Any)
        .cancellation(CANCEL_METHOD, REQUEST_CANCELLED)
        .build()
}

/// Methods the test client answers.
pub fn client_methods() -> MethodRegistry {
    MethodRegistry::builder()
        .segment("window", |s| {
            s.request(
                "showMessageRequest",
                Shape::object().required("message", Shape::String).build(),
                Shape::object().required("title", Shape::String).build(),
            )
            .notification("logMessage", Shape::Any)
        })
        .cancellation(CANCEL_METHOD, REQUEST_CANCELLED)
        .build()
}

/// Collects the issues a connection reports.
#[derive(Clone, Default)]
pub struct Issues(Arc<Mutex<Vec<MessageIssue>>>);

impl Issues {
    pub fn listener(&self) -> impl Fn(&MessageIssue) + Send + Sync + 'static {
        let issues = Arc::clone(&self.0);
        move |issue: &MessageIssue| issues.lock().push(issue.clone())
    }

    pub fn snapshot(&self) -> Vec<MessageIssue> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Two connected endpoints, each with its own issue log
pub struct Peers {
    pub server: Connection,
    pub client: Connection,
    pub server_issues: Issues,
    pub client_issues: Issues,
}

/// Build and start a server and a client talking to each other.
pub fn connect(server: Dispatcher, client: Dispatcher) -> Peers {
    init_tracing();
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    let server_issues = Issues::default();
    let client_issues = Issues::default();

    let (reader, writer) = tokio::io::split(server_io);
    let server = Launcher::new(reader, writer)
        .local_methods(server_methods())
        .remote_methods(client_methods())
        .dispatcher(server)
        .config(ConnectionConfig::default().with_name("server"))
        .on_issue(server_issues.listener())
        .build();

    let (reader, writer) = tokio::io::split(client_io);
    let client = Launcher::new(reader, writer)
        .local_methods(client_methods())
        .remote_methods(server_methods())
        .dispatcher(client)
        .config(ConnectionConfig::default().with_name("client"))
        .on_issue(client_issues.listener())
        .build();

    server.start_listening().expect("server starts");
    client.start_listening().expect("client starts");

    Peers {
        server,
        client,
        server_issues,
        client_issues,
    }
}

/// The far end of a connection, speaking raw frames.
pub struct RawPeer {
    frames: FramedRead<ReadHalf<DuplexStream>, FrameCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    /// Write one well-formed frame carrying `value`.
    pub async fn send_json(&mut self, value: Value) {
        let body = serde_json::to_vec(&value).expect("serializable");
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        self.send_raw(header.as_bytes()).await;
        self.send_raw(&body).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("peer write");
        self.writer.flush().await.expect("peer flush");
    }

    /// Read the next frame as JSON.
    pub async fn recv_json(&mut self) -> Value {
        let frame = tokio::time::timeout(RECV_TIMEOUT, self.frames.next())
            .await
            .expect("a frame within the timeout")
            .expect("stream still open")
            .expect("no I/O error");
        let body = frame.expect("well-formed frame");
        serde_json::from_slice(&body).expect("frame holds JSON")
    }

    /// Read the next frame straight off the stream, header block included.
    ///
    /// Returns the header text (without the blank line) and the body.
    pub async fn recv_raw_frame(&mut self) -> (String, Vec<u8>) {
        assert!(
            self.frames.read_buffer().is_empty(),
            "frames already buffered by the codec"
        );
        tokio::time::timeout(RECV_TIMEOUT, async {
            let reader = self.frames.get_mut();
            let mut head = Vec::new();
            while !head.ends_with(b"\r\n\r\n") {
                head.push(reader.read_u8().await.expect("header byte"));
            }
            let head = String::from_utf8(head).expect("ASCII headers");
            let length: usize = head
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length: "))
                .expect("Content-Length header")
                .trim()
                .parse()
                .expect("numeric Content-Length");
            let mut body = vec![0; length];
            reader.read_exact(&mut body).await.expect("frame body");
            (head.trim_end().to_string(), body)
        })
        .await
        .expect("a frame within the timeout")
    }

    /// Assert nothing arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(window, self.frames.next()).await {
            panic!("expected no frame, got {:?}", frame);
        }
    }
}

/// Start a server connection facing a raw peer.
pub fn raw_server(dispatcher: Dispatcher, config: ConnectionConfig) -> (Connection, RawPeer, Issues) {
    init_tracing();
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let issues = Issues::default();

    let (reader, writer) = tokio::io::split(local);
    let connection = Launcher::new(reader, writer)
        .local_methods(server_methods())
        .remote_methods(client_methods())
        .dispatcher(dispatcher)
        .config(config)
        .on_issue(issues.listener())
        .build();
    connection.start_listening().expect("connection starts");

    let (reader, writer) = tokio::io::split(remote);
    let peer = RawPeer {
        frames: FramedRead::new(reader, FrameCodec::default()),
        writer,
    };
    (connection, peer, issues)
}

/// Start a client connection facing a raw peer acting as the server.
pub fn raw_client(dispatcher: Dispatcher) -> (Connection, RawPeer, Issues) {
    init_tracing();
    let (local, remote) = tokio::io::duplex(64 * 1024);
    let issues = Issues::default();

    let (reader, writer) = tokio::io::split(local);
    let connection = Launcher::new(reader, writer)
        .local_methods(client_methods())
        .remote_methods(server_methods())
        .dispatcher(dispatcher)
        .config(ConnectionConfig::default().with_name("client"))
        .on_issue(issues.listener())
        .build();
    connection.start_listening().expect("connection starts");

    let (reader, writer) = tokio::io::split(remote);
    let peer = RawPeer {
        frames: FramedRead::new(reader, FrameCodec::default()),
        writer,
    };
    (connection, peer, issues)
}

/// A dispatcher implementing the test server's methods.
pub fn server_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .on_request("ping", |_params: Option<Payload>, _context: RequestContext| async {
            Ok::<_, HandlerError>(Payload::empty_object())
        })
        .on_request("echo", |params: Option<Payload>, _context: RequestContext| async move {
            Ok::<_, HandlerError>(params.and_then(|p| p.field("value")).unwrap_or_default())
        })
        .on_request("slow", |_params: Option<Payload>, context: RequestContext| async move {
            context.cancellation().cancelled().await;
            Ok::<_, HandlerError>(Payload::null())
        })
        .on_request("explode", |_params: Option<Payload>, _context: RequestContext| async {
            if true {
                panic!("boom at the handler");
            }
            Ok::<_, HandlerError>(Payload::null())
        })
        .on_request("shutdown", |_params: Option<Payload>, _context: RequestContext| async {
            Ok::<_, HandlerError>(Payload::null())
        });
    dispatcher
}
