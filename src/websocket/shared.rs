use std::collections::HashMap;
use std::net::TcpStream;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use tungstenite::client::connect_with_config;
use tungstenite::handshake::client::Response;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{ClientRequestBuilder, Error, Message, Utf8Bytes, WebSocket};
use crate::error::{WsResult, WsError};
use super::options::WebSocketOptions;
use super::types::{CloseOutcome, ConnectionState, CLOSE_NORMAL, CLOSE_NO_STATUS};
use super::uri::WsTarget;

pub(crate) type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

// Redirects are not followed for upgrade requests
const MAX_REDIRECTS: u8 = 0;

// ============================================================================
// Lifecycle - connection state shared by opener, sender and closer
// ============================================================================

#[derive(Debug)]
struct LifecycleInner {
    state: ConnectionState,
    close_requested_at: Option<Instant>,
}

/// Guards the `Unopened -> Opening -> Open -> Closed` state machine and lets
/// callers block until a pending handshake is resolved.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    changed: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle {
            inner: Mutex::new(LifecycleInner { state: ConnectionState::Unopened, close_requested_at: None }),
            changed: Condvar::new(),
        }
    }
}

impl Lifecycle {
    pub(crate) fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// `Unopened -> Opening`. A connection is opened at most once.
    pub(crate) fn begin_opening(&self) -> WsResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            ConnectionState::Unopened => {
                inner.state = ConnectionState::Opening;
                self.changed.notify_all();
                Ok(())
            }
            ConnectionState::Closed => Err(WsError::aborted()),
            ConnectionState::Opening | ConnectionState::Open => {
                Err(WsError::InvalidState("open was already called on this connection".to_string()))
            }
        }
    }

    /// `Opening -> Open`. Returns false when a close won the race.
    pub(crate) fn publish_open(&self) -> bool {
        let mut inner = self.inner.lock();
        let published = inner.state == ConnectionState::Opening;
        if published {
            inner.state = ConnectionState::Open;
        }
        self.changed.notify_all();
        published
    }

    /// Requests a local close. Returns true only for the call that moved the state to `Closed`.
    pub(crate) fn request_close(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return false;
        }
        inner.state = ConnectionState::Closed;
        inner.close_requested_at = Some(Instant::now());
        self.changed.notify_all();
        true
    }

    /// Marks the connection closed from the transport side (failed handshake,
    /// remote close, broken stream). Returns false if a local close came first.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ConnectionState::Closed {
            return false;
        }
        inner.state = ConnectionState::Closed;
        self.changed.notify_all();
        true
    }

    /// Whether a local close has been waiting for the peer longer than `timeout`.
    pub(crate) fn close_expired(&self, timeout: Duration) -> bool {
        match self.inner.lock().close_requested_at {
            Some(at) => at.elapsed() >= timeout,
            None => false,
        }
    }

    /// Blocks while the handshake is pending, then returns the settled state.
    /// On timeout the still-pending state is returned.
    pub(crate) fn wait_settled(&self, timeout: Option<Duration>) -> ConnectionState {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        while matches!(inner.state, ConnectionState::Unopened | ConnectionState::Opening) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut inner, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut inner),
            }
        }
        inner.state
    }
}

// ============================================================================
// Shared Internal Helpers
// ============================================================================

/// Result of one read attempt, classified for the receive loops
pub(crate) enum ReadStep {
    Text(String),
    Binary(usize),
    Control,
    Close(Option<CloseFrame>),
    /// Read timed out without a complete message
    Idle,
    /// Close handshake finished, nothing more to read
    Finished,
    Failed(WsError),
}

/// Establishes WebSocket connection with the recorded request headers
pub(crate) fn connect_socket(target: &WsTarget, headers: &HashMap<String, String>, options: &WebSocketOptions) -> WsResult<(Socket, Response)> {
    let mut builder = ClientRequestBuilder::new(target.request_uri()?);
    for (key, value) in headers {
        builder = builder.with_header(key, value);
    }

    let mut config = WebSocketConfig::default();
    if options.max_message_size.is_some() {
        config = config.max_message_size(options.max_message_size);
    }

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!("Connecting to {} with {} request header(s)", target, headers.len());
    }

    let (mut socket, response) = connect_with_config(builder, Some(config), MAX_REDIRECTS)?;
    trace_on_connected(&response);
    configure_stream(&mut socket, options)?;

    Ok((socket, response))
}

/// Configures the stream so reads return periodically instead of blocking forever
pub(crate) fn configure_stream(socket: &mut Socket, options: &WebSocketOptions) -> WsResult<()> {
    let stream = match socket.get_mut() {
        MaybeTlsStream::Plain(stream) => stream,
        MaybeTlsStream::NativeTls(stream) => stream.get_mut(),
        _ => return Ok(()),
    };

    if let Some(nodelay) = options.nodelay {
        stream.set_nodelay(nodelay)?;
    }
    if let Some(ttl) = options.ttl {
        stream.set_ttl(ttl)?;
    }
    stream.set_read_timeout(Some(options.poll_interval))?;
    stream.set_write_timeout(options.write_timeout)?;

    Ok(())
}

/// Performs one read and classifies what came back
pub(crate) fn read_step(socket: &mut Socket) -> ReadStep {
    match socket.read() {
        Ok(Message::Text(message)) => {
            trace_on_text_message(&message);
            ReadStep::Text(message.as_str().to_string())
        },
        Ok(Message::Binary(bytes)) => ReadStep::Binary(bytes.len()),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!("Received control frame");
            }
            ReadStep::Control
        },
        Ok(Message::Close(close_frame)) => {
            trace_on_close_frame(&close_frame);
            ReadStep::Close(close_frame)
        },
        Err(Error::Io(ref err)) if err.kind() == std::io::ErrorKind::WouldBlock => {
            // No data available within the poll interval
            ReadStep::Idle
        },
        Err(Error::Io(ref err)) if err.kind() == std::io::ErrorKind::TimedOut => {
            // No data available (e.g. Windows)
            ReadStep::Idle
        },
        Err(Error::ConnectionClosed) | Err(Error::AlreadyClosed) => {
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!("Connection closed normally");
            }
            ReadStep::Finished
        },
        Err(e) => {
            tracing::error!("Failed to read from socket: {}", e);
            ReadStep::Failed(WsError::from(e))
        }
    }
}

/// Builds the outcome for a close frame sent by the peer
pub(crate) fn remote_outcome(close_frame: Option<CloseFrame>) -> CloseOutcome {
    match close_frame {
        Some(frame) => CloseOutcome::remote(u16::from(frame.code), frame.reason.as_str().to_string()),
        None => CloseOutcome::remote(CLOSE_NO_STATUS, String::new()),
    }
}

/// Pushes out the close reply tungstenite queued after a peer close frame
pub(crate) fn flush_close_reply(socket: &mut Socket) {
    match socket.flush() {
        Ok(()) | Err(Error::ConnectionClosed) | Err(Error::AlreadyClosed) => {},
        Err(e) => {
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!("Error flushing close reply: {}", e);
            }
        }
    }
}

/// Sends text message to WebSocket
#[inline]
pub(crate) fn send_text_message_to_websocket(socket: &mut Socket, text: &str) -> WsResult<()> {
    socket.send(Message::text(text))
        .map(|_| {
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!("Sent text message: {}", text);
            }
        })
        .map_err(|e| {
            tracing::error!("Error sending text message: {}", e);
            WsError::from(e)
        })
}

/// Starts the close handshake with a normal closure status, with context logging
pub(crate) fn close_websocket_with_logging(socket: &mut Socket, reason: &str, context: &str) {
    if socket.can_write() {
        let frame = CloseFrame { code: CloseCode::from(CLOSE_NORMAL), reason: Utf8Bytes::from(reason.to_string()) };
        socket.close(Some(frame))
            .map(|_| {
                tracing::trace!("Connection close successfully requested for context: {}", context);
            })
            .unwrap_or_else(|e| {
                tracing::error!("Error on connection close request for context {}: {}", context, e);
            });
    }
}

/// Traces connection establishment
pub(crate) fn trace_on_connected(response: &Response) {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("Connected to the server");
        tracing::trace!("Response HTTP code: {}", response.status());
        tracing::trace!("Response contains the following headers:");
        for (header, _value) in response.headers() {
            tracing::trace!("* {header}");
        }
    }
}

/// Traces text message receipt
#[inline]
pub(crate) fn trace_on_text_message(message: &Utf8Bytes) {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("Received text message: {}", message);
    }
}

/// Traces connection close frame receipt
pub(crate) fn trace_on_close_frame(close_frame: &Option<CloseFrame>) {
    if tracing::enabled!(tracing::Level::TRACE) {
        match close_frame {
            Some(reason) => {
                tracing::trace!("Connection closed with reason: {}", reason)
            },
            None => {
                tracing::trace!("Connection closed without reason")
            },
        }
    }
}
