//! Client connection lifecycle and the dispatch loop.
//!
//! [`BosswaveClient::connect`] opens the TCP transport, requires the
//! router's `helo` acknowledgment, then splits the stream: the write half
//! goes to the dedicated writer task and the read half to a single
//! background read loop that decodes frames and routes them by sequence
//! number to registered handlers.
//!
//! All handler invocations happen on the read loop, in strict arrival
//! order. A handler that blocks stalls every other pending reply and
//! subscription on this connection; handlers must return quickly or
//! dispatch their own work elsewhere.
//!
//! # Example
//!
//! ```ignore
//! use bosswave_client::{BosswaveClient, PublishRequest};
//!
//! #[tokio::main]
//! async fn main() -> bosswave_client::Result<()> {
//!     let client = BosswaveClient::connect("localhost", 28589).await?;
//!     client.set_entity_file("router.ent", |r| println!("entity: {}", r.status)).await?;
//!
//!     let request = PublishRequest::builder("scratch/demo").build();
//!     client.publish(&request, |r| println!("publish: {}", r.status)).await?;
//!     client.wait_for_shutdown().await
//! }
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::error::{BosswaveError, Result};
use crate::handler::{HandlerTable, Message, Response, STATUS_OKAY};
use crate::protocol::{generate_seq_no, Command, Frame, ObjectType, PayloadObject};
use crate::request::{PublishRequest, SubscribeRequest};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Payload object type carrying an entity signing key.
const ENTITY_KEY_TYPE: [u8; 4] = [1, 0, 1, 2];

/// A connected Bosswave client.
///
/// Request-issuing methods may be called concurrently from any number of
/// tasks; each frame reaches the wire as one atomic byte run.
pub struct BosswaveClient {
    handlers: Arc<HandlerTable>,
    /// Present while the connection is open; [`Self::close`] takes it.
    writer: Mutex<Option<WriterHandle>>,
    shutdown: Arc<Notify>,
    shutdown_rx: oneshot::Receiver<()>,
    _writer_task: JoinHandle<()>,
}

impl BosswaveClient {
    /// Connect to a router and perform the handshake.
    ///
    /// The first frame on the connection must be `helo`; anything else
    /// tears the connection down with [`BosswaveError::Handshake`].
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Self::from_transport(stream).await
    }

    /// Perform the handshake over an already-open byte stream.
    ///
    /// `connect` wraps this for TCP; tests drive it with an in-memory
    /// duplex transport.
    pub async fn from_transport<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        // Synchronous handshake: nothing may be sent before the router's
        // acknowledgment arrives. Dropping the halves on error releases
        // the transport.
        let hello = match Frame::read_from(&mut reader).await {
            Ok(frame) => frame,
            Err(BosswaveError::Io(e)) => return Err(BosswaveError::Io(e)),
            Err(e) => return Err(BosswaveError::Handshake(e.to_string())),
        };
        if hello.command != Command::Hello {
            return Err(BosswaveError::Handshake(format!(
                "expected helo, received {}",
                hello.command
            )));
        }

        let handlers = Arc::new(HandlerTable::new());
        let shutdown = Arc::new(Notify::new());
        let (writer, writer_task) = spawn_writer_task(write_half);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let loop_handlers = handlers.clone();
        let loop_shutdown = shutdown.clone();
        tokio::spawn(async move {
            read_loop(reader, loop_handlers, loop_shutdown).await;
            let _ = shutdown_tx.send(());
        });

        Ok(Self {
            handlers,
            writer: Mutex::new(Some(writer)),
            shutdown,
            shutdown_rx,
            _writer_task: writer_task,
        })
    }

    /// Publish (or persist) a message.
    ///
    /// The handler fires exactly once with the router's terminal response.
    pub async fn publish<F>(&self, request: &PublishRequest, handler: F) -> Result<()>
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let writer = self.writer()?;
        let command = if request.is_persist() {
            Command::Persist
        } else {
            Command::Publish
        };
        let seq_no = generate_seq_no();
        let mut frame = Frame::new(command, seq_no);
        request.append_kv_pairs(&mut frame);
        request.append_objects(&mut frame);
        let encoded = Bytes::from(frame.encode());

        // Register before the write so a reply arriving immediately after
        // the frame hits the wire still finds its handler.
        self.handlers.install_response(seq_no, Box::new(handler));
        if let Err(e) = writer.send(encoded).await {
            self.handlers.take_response(seq_no);
            return Err(e);
        }
        Ok(())
    }

    /// Open a standing subscription.
    ///
    /// `on_response` fires once with the router's verdict on the request;
    /// `on_message` fires for every delivery until the subscription is
    /// cancelled. Returns the subscription's sequence number.
    pub async fn subscribe<F, M>(
        &self,
        request: &SubscribeRequest,
        on_response: F,
        on_message: M,
    ) -> Result<u32>
    where
        F: FnOnce(Response) + Send + 'static,
        M: Fn(Message) + Send + Sync + 'static,
    {
        let writer = self.writer()?;
        let seq_no = generate_seq_no();
        let mut frame = Frame::new(Command::Subscribe, seq_no);
        request.append_kv_pairs(&mut frame);
        request.append_objects(&mut frame);
        let encoded = Bytes::from(frame.encode());

        self.handlers.install_response(seq_no, Box::new(on_response));
        self.handlers.install_message(seq_no, Arc::new(on_message));
        if let Err(e) = writer.send(encoded).await {
            self.handlers.take_response(seq_no);
            self.handlers.remove_message(seq_no);
            return Err(e);
        }
        Ok(seq_no)
    }

    /// Stop delivering results for a subscription.
    ///
    /// This only retires the local handler; it does not inform the router.
    pub fn cancel_subscription(&self, seq_no: u32) {
        self.handlers.remove_message(seq_no);
    }

    /// Install the client's entity signing key.
    ///
    /// The key bytes are opaque to the client and travel as a single
    /// payload object.
    pub async fn set_entity<F>(&self, key: impl Into<Bytes>, handler: F) -> Result<()>
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let writer = self.writer()?;
        let seq_no = generate_seq_no();
        let mut frame = Frame::new(Command::SetEntity, seq_no);
        frame.push_payload_object(PayloadObject::new(
            ObjectType::from_octet(ENTITY_KEY_TYPE),
            key.into(),
        ));
        let encoded = Bytes::from(frame.encode());

        self.handlers.install_response(seq_no, Box::new(handler));
        if let Err(e) = writer.send(encoded).await {
            self.handlers.take_response(seq_no);
            return Err(e);
        }
        Ok(())
    }

    /// Install the entity key stored in a key file.
    ///
    /// The file's first byte is a kind tag and is stripped before the key
    /// is sent.
    pub async fn set_entity_file<F>(&self, path: impl AsRef<Path>, handler: F) -> Result<()>
    where
        F: FnOnce(Response) + Send + 'static,
    {
        let bytes = tokio::fs::read(path).await?;
        if bytes.is_empty() {
            return Err(BosswaveError::Format("entity file is empty".to_string()));
        }
        self.set_entity(Bytes::from(bytes).slice(1..), handler).await
    }

    /// Close the connection.
    ///
    /// Stops the read loop, flushes queued frames, and shuts the transport
    /// down. Safe to call more than once; subsequent request-issuing calls
    /// fail with [`BosswaveError::ConnectionClosed`].
    pub fn close(&self) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if writer.is_some() {
            self.shutdown.notify_one();
        }
    }

    /// Block until the connection shuts down, from either side.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let _ = self.shutdown_rx.await;
        Ok(())
    }

    fn writer(&self) -> Result<WriterHandle> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(BosswaveError::ConnectionClosed)
    }
}

/// Single-consumer loop: decode one frame, route it, repeat.
async fn read_loop<R>(mut reader: R, handlers: Arc<HandlerTable>, shutdown: Arc<Notify>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.notified() => {
                tracing::debug!("read loop stopping: client closed");
                return;
            }
            result = Frame::read_from(&mut reader) => match result {
                Ok(frame) => frame,
                Err(BosswaveError::ConnectionClosed) => {
                    tracing::debug!("router closed the connection");
                    return;
                }
                Err(BosswaveError::Io(e)) if is_disconnect(&e) => {
                    tracing::debug!("connection dropped: {}", e);
                    return;
                }
                // Fail fast: a malformed frame leaves the stream position
                // unknowable, so the whole connection's read loop ends.
                Err(e) => {
                    tracing::error!("read loop terminating: {}", e);
                    return;
                }
            }
        };
        dispatch_frame(frame, &handlers);
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}

fn dispatch_frame(frame: Frame, handlers: &HandlerTable) {
    match frame.command {
        Command::Response => dispatch_response(frame, handlers),
        Command::Result => dispatch_result(frame, handlers),
        other => {
            tracing::debug!(command = %other, seq_no = frame.seq_no, "dropping unhandled frame");
        }
    }
}

fn dispatch_response(frame: Frame, handlers: &HandlerTable) {
    // A terminal event: the handler entry is retired even for a one-shot
    // publisher that never issues another request.
    let handler = match handlers.take_response(frame.seq_no) {
        Some(handler) => handler,
        None => {
            tracing::debug!(seq_no = frame.seq_no, "response with no registered handler");
            return;
        }
    };
    let status = match utf8_value(&frame, "status") {
        Some(status) => status,
        None => {
            tracing::warn!(seq_no = frame.seq_no, "response frame missing status field");
            return;
        }
    };
    let reason = if status == STATUS_OKAY {
        None
    } else {
        let reason = utf8_value(&frame, "reason");
        if reason.is_none() {
            tracing::warn!(seq_no = frame.seq_no, status = %status, "response frame missing reason field");
        }
        reason
    };
    handler(Response { status, reason });
}

fn dispatch_result(frame: Frame, handlers: &HandlerTable) {
    let handler = match handlers.message(frame.seq_no) {
        Some(handler) => handler,
        None => {
            tracing::debug!(seq_no = frame.seq_no, "result with no registered handler");
            return;
        }
    };
    let (uri, from) = match (utf8_value(&frame, "uri"), utf8_value(&frame, "from")) {
        (Some(uri), Some(from)) => (uri, from),
        _ => {
            tracing::warn!(seq_no = frame.seq_no, "result frame missing uri or from field");
            return;
        }
    };
    let unpack = frame
        .first_value("unpack")
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(|s| s.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let message = if unpack {
        Message {
            from,
            uri,
            routing_objects: Some(frame.routing_objects),
            payload_objects: Some(frame.payload_objects),
        }
    } else {
        Message {
            from,
            uri,
            routing_objects: None,
            payload_objects: None,
        }
    };
    handler(message);
}

fn utf8_value(frame: &Frame, key: &str) -> Option<String> {
    frame
        .first_value(key)
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(str::to_string)
}
