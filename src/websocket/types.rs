use std::fmt;
use crate::error::{WsError, WsResult};

// ============================================================================
// Constants
// ============================================================================

/// Status code sent with a locally requested close.
pub const CLOSE_NORMAL: u16 = 1000;

/// Reported when the peer closed without sending a status code.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Reported when the connection dropped without a close handshake.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Code passed to `on_error` when the connect or handshake fails.
pub const CONNECT_FAILED_CODE: u16 = 4000;

/// Message passed to `on_error` when the connect or handshake fails.
pub const CONNECT_FAILED_MESSAGE: &str = "Connection failed.";

/// Reason sent with a locally requested close unless overridden.
pub const DEFAULT_CLOSE_REASON: &str = "Close requested";

/// Largest close reason that fits into a control frame.
pub const MAX_CLOSE_REASON_LEN: usize = 123;

// ============================================================================
// Public API Types
// ============================================================================

/// Lifecycle of a single connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Opening,
    Open,
    Closed,
}

/// Which side ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOrigin {
    /// `close()` was called on this side.
    Local,
    /// The peer sent a close frame.
    Remote,
    /// The transport failed; carries the status code of the failure.
    Failure(i32),
}

/// Status code and reason of a finished connection, captured exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub code: u16,
    pub reason: String,
    pub origin: CloseOrigin,
}

impl CloseOutcome {
    pub(crate) fn local(reason: &str) -> Self {
        CloseOutcome { code: CLOSE_NORMAL, reason: reason.to_string(), origin: CloseOrigin::Local }
    }

    pub(crate) fn remote(code: u16, reason: String) -> Self {
        CloseOutcome { code, reason, origin: CloseOrigin::Remote }
    }

    pub(crate) fn failure(error: &WsError) -> Self {
        CloseOutcome {
            code: CLOSE_ABNORMAL,
            reason: error.to_string(),
            origin: CloseOrigin::Failure(error.code()),
        }
    }

    /// Whether `on_error` accompanies `on_close` for this outcome.
    pub fn is_error(&self) -> bool {
        self.origin != CloseOrigin::Local
    }

    /// Delivers the terminal callbacks for this outcome.
    pub(crate) fn deliver<W, H>(&self, socket: &W, handler: &mut H)
    where
        H: WebSocketHandler<W> + ?Sized,
    {
        if self.is_error() {
            handler.on_error(socket, self.code, &self.reason);
        }
        handler.on_close(socket, self.code, &self.reason);
    }

    /// The value `open` returns after delivering this outcome.
    pub(crate) fn into_result(self) -> WsResult<()> {
        match self.origin {
            CloseOrigin::Failure(code) => Err(WsError::Transport { code, message: self.reason }),
            CloseOrigin::Local | CloseOrigin::Remote => Ok(()),
        }
    }
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.code, self.origin, self.reason)
    }
}

/// Callbacks bound to one `open` call.
///
/// Every method defaults to a no-op, so each callback is optional. The
/// originating connection is passed in so handlers can `send` or `close`.
pub trait WebSocketHandler<W: ?Sized> {
    fn on_connect(&mut self, socket: &W, message: &str) {
        // Default: noop
        let _ = (socket, message);
    }
    fn on_message(&mut self, socket: &W, message: &str) {
        // Default: noop
        let _ = (socket, message);
    }
    fn on_error(&mut self, socket: &W, code: u16, error: &str) {
        // Default: noop
        let _ = (socket, code, error);
    }
    fn on_close(&mut self, socket: &W, code: u16, reason: &str) {
        // Default: noop
        let _ = (socket, code, reason);
    }
}

type TextCallback<'a, W> = Box<dyn FnMut(&W, &str) + 'a>;
type StatusCallback<'a, W> = Box<dyn FnMut(&W, u16, &str) + 'a>;

/// Closure based [`WebSocketHandler`]; set any subset of the four callbacks.
///
/// ```no_run
/// use syncws::{Callbacks, UpgradeWebSocket, WebSocket, WebSocketOptions};
///
/// let socket = UpgradeWebSocket::new(WebSocketOptions::new());
/// let mut callbacks = Callbacks::new()
///     .on_message(|_, message| println!("Received: {}", message))
///     .on_close(|_, code, reason| println!("Closed ({}): {}", code, reason));
/// socket.open("wss://echo.websocket.org", &mut callbacks).ok();
/// ```
pub struct Callbacks<'a, W> {
    connect: Option<TextCallback<'a, W>>,
    message: Option<TextCallback<'a, W>>,
    error: Option<StatusCallback<'a, W>>,
    close: Option<StatusCallback<'a, W>>,
}

impl<'a, W> Callbacks<'a, W> {
    pub fn new() -> Self {
        Callbacks { connect: None, message: None, error: None, close: None }
    }

    pub fn on_connect(mut self, f: impl FnMut(&W, &str) + 'a) -> Self {
        self.connect = Some(Box::new(f));
        self
    }

    pub fn on_message(mut self, f: impl FnMut(&W, &str) + 'a) -> Self {
        self.message = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&W, u16, &str) + 'a) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl FnMut(&W, u16, &str) + 'a) -> Self {
        self.close = Some(Box::new(f));
        self
    }
}

impl<W> Default for Callbacks<'_, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> WebSocketHandler<W> for Callbacks<'_, W> {
    fn on_connect(&mut self, socket: &W, message: &str) {
        if let Some(f) = self.connect.as_mut() {
            f(socket, message);
        }
    }

    fn on_message(&mut self, socket: &W, message: &str) {
        if let Some(f) = self.message.as_mut() {
            f(socket, message);
        }
    }

    fn on_error(&mut self, socket: &W, code: u16, error: &str) {
        if let Some(f) = self.error.as_mut() {
            f(socket, code, error);
        }
    }

    fn on_close(&mut self, socket: &W, code: u16, reason: &str) {
        if let Some(f) = self.close.as_mut() {
            f(socket, code, reason);
        }
    }
}

/// A single logical WebSocket connection shared by an opener, a sender and a closer.
///
/// `open` blocks for the lifetime of the connection and is normally run on a
/// dedicated thread; `send` and `close` may be called concurrently from others.
pub trait WebSocket: Send + Sync {
    /// Records or overwrites a request header for the upgrade handshake.
    ///
    /// Rejected with [`WsError::InvalidState`] once `open` has begun.
    fn add_header(&self, key: &str, value: &str) -> WsResult<()>;

    /// Connects, performs the upgrade handshake and drives the receive loop.
    ///
    /// Returns `Ok(())` when the loop ends through a close handshake. Every
    /// failure after the URI has been accepted is also reported to `on_error`.
    fn open<H>(&self, uri: &str, handler: &mut H) -> WsResult<()>
    where
        Self: Sized,
        H: WebSocketHandler<Self>;

    /// Sends one UTF-8 text message, waiting for a pending handshake first.
    fn send(&self, message: &str) -> WsResult<()>;

    /// Blocks until one complete text message is available.
    fn read(&self) -> WsResult<String>;

    /// Returns a pending text message without waiting for one to arrive.
    fn try_read(&self) -> WsResult<Option<String>>;

    /// Starts the close handshake. Only the first call has any effect.
    fn close(&self);

    fn state(&self) -> ConnectionState;
}

// ============================================================================
// Internal Types
// ============================================================================

/// Tagged events handed from a transport thread to the blocking consumer.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Connected,
    ConnectFailed(WsError),
    Message(String),
    Closed(CloseOutcome),
}

/// Requests handed to a transport thread that owns the socket.
pub(crate) enum ControlMessage {
    SendText(String, crossbeam_channel::Sender<WsResult<()>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl WebSocketHandler<()> for Recorder {
        fn on_error(&mut self, _socket: &(), code: u16, error: &str) {
            self.calls.push(format!("error {} {}", code, error));
        }
        fn on_close(&mut self, _socket: &(), code: u16, reason: &str) {
            self.calls.push(format!("close {} {}", code, reason));
        }
    }

    #[test]
    fn local_outcome_delivers_close_only() {
        let mut recorder = Recorder::default();
        CloseOutcome::local(DEFAULT_CLOSE_REASON).deliver(&(), &mut recorder);
        assert_eq!(recorder.calls, vec!["close 1000 Close requested"]);
    }

    #[test]
    fn remote_outcome_delivers_error_then_close() {
        let mut recorder = Recorder::default();
        let outcome = CloseOutcome::remote(1001, "going away".to_string());
        outcome.deliver(&(), &mut recorder);
        assert_eq!(recorder.calls, vec!["error 1001 going away", "close 1001 going away"]);
        assert!(outcome.into_result().is_ok());
    }

    #[test]
    fn failure_outcome_is_returned_as_transport_error() {
        let error = WsError::Io(std::io::Error::from_raw_os_error(104));
        let outcome = CloseOutcome::failure(&error);
        assert_eq!(outcome.code, CLOSE_ABNORMAL);
        match outcome.into_result() {
            Err(err @ WsError::Transport { .. }) => assert_eq!(err.code(), 104),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn unset_callbacks_are_skipped() {
        let mut closes = 0;
        {
            let mut callbacks = Callbacks::<()>::new().on_close(|_, _, _| closes += 1);
            WebSocketHandler::on_connect(&mut callbacks, &(), "Connected to: ws://localhost/");
            WebSocketHandler::on_message(&mut callbacks, &(), "ignored");
            WebSocketHandler::on_close(&mut callbacks, &(), CLOSE_NORMAL, DEFAULT_CLOSE_REASON);
        }
        assert_eq!(closes, 1);
    }
}
