//! Error types for WebSocket transport operations.
//!
//! Every failure is represented by [`WsError`]. Because the transport is also
//! exposed through a flat C surface, each error maps to a stable integer
//! status through [`WsError::code`]; the constants live in [`codes`].
//!
//! # Examples
//!
//! ```no_run
//! use syncws::{codes, UpgradeWebSocket, WebSocket, WebSocketOptions, WsError, Callbacks};
//!
//! # fn main() {
//! let socket = UpgradeWebSocket::new(WebSocketOptions::new());
//! let mut callbacks = Callbacks::new();
//! match socket.open("not a uri", &mut callbacks) {
//!     Err(err @ WsError::InvalidUri(_)) => assert_eq!(err.code(), codes::INVALID_ARGUMENT),
//!     Err(err) => eprintln!("Open failed ({}): {}", err.code(), err),
//!     Ok(()) => {}
//! }
//! # }
//! ```

use std::fmt;
use tungstenite::Error as TungsteniteError;

/// Integer status codes returned by the C surface and by [`WsError::code`].
pub mod codes {
    /// The operation succeeded.
    pub const OK: i32 = 0;

    /// A required handle, pointer or callback argument was null.
    pub const NULL_ARGUMENT: i32 = 1;

    /// Malformed URI, unsupported scheme, bad configuration or non-UTF-8 input.
    pub const INVALID_ARGUMENT: i32 = 0x8007_0057_u32 as i32;

    /// The connection is closed, or the handshake it was waiting on failed.
    pub const ABORTED: i32 = 0x8000_4004_u32 as i32;

    /// A frame type other than UTF-8 text was received.
    pub const INVALID_PROTOCOL_FORMAT: i32 = 0x8376_0002_u32 as i32;

    /// The operation is not valid in the current connection state.
    pub const ILLEGAL_STATE: i32 = 0x8000_000E_u32 as i32;

    /// Generic transport failure without a more specific code.
    pub const FAILURE: i32 = 0x8000_4005_u32 as i32;

    /// A panic was caught at the C boundary.
    pub const UNEXPECTED: i32 = 0x8000_FFFF_u32 as i32;

    /// Base for handshake rejections; the HTTP status is added to it.
    pub const HTTP_STATUS_BASE: i32 = 0x8019_0000_u32 as i32;
}

/// Error type for all WebSocket transport operations.
///
/// # Error Categories
///
/// - **Argument errors**: [`InvalidUri`](Self::InvalidUri), [`UnsupportedScheme`](Self::UnsupportedScheme),
///   [`InvalidArgument`](Self::InvalidArgument), [`NullArgument`](Self::NullArgument),
///   [`InvalidConfiguration`](Self::InvalidConfiguration)
/// - **Lifecycle errors**: [`ConnectionClosed`](Self::ConnectionClosed), [`InvalidState`](Self::InvalidState)
/// - **Protocol violations**: [`ProtocolFormat`](Self::ProtocolFormat)
/// - **Transport errors**: [`Handshake`](Self::Handshake), [`Transport`](Self::Transport),
///   [`Io`](Self::Io), [`Tungstenite`](Self::Tungstenite)
#[derive(Debug)]
pub enum WsError {
    /// The URI does not have the `scheme://host[:port]path` shape.
    InvalidUri(String),

    /// The URI scheme is neither `ws` nor `wss`.
    UnsupportedScheme(String),

    /// An argument could not be used, e.g. a string that is not valid UTF-8.
    InvalidArgument(String),

    /// A required pointer argument was null at the C boundary.
    NullArgument(&'static str),

    /// Invalid configuration was provided, such as a zero-length timeout.
    InvalidConfiguration(String),

    /// The operation is not allowed in the connection's current state.
    InvalidState(String),

    /// The connection is closed or never finished opening.
    ///
    /// The optional `String` carries the reason, when one is known.
    ConnectionClosed(Option<String>),

    /// A binary frame was received where only UTF-8 text is supported.
    ProtocolFormat(String),

    /// The server answered the upgrade request with a non-101 HTTP status.
    Handshake(u16),

    /// The transport failed after the handshake, identified by its status code.
    Transport { code: i32, message: String },

    /// An I/O operation failed.
    Io(std::io::Error),

    /// An error from the underlying tungstenite WebSocket library.
    Tungstenite(TungsteniteError),
}

impl WsError {
    /// Returns the integer status reported for this error across the C surface.
    pub fn code(&self) -> i32 {
        match self {
            WsError::InvalidUri(_)
            | WsError::UnsupportedScheme(_)
            | WsError::InvalidArgument(_)
            | WsError::InvalidConfiguration(_) => codes::INVALID_ARGUMENT,
            WsError::NullArgument(_) => codes::NULL_ARGUMENT,
            WsError::InvalidState(_) => codes::ILLEGAL_STATE,
            WsError::ConnectionClosed(_) => codes::ABORTED,
            WsError::ProtocolFormat(_) => codes::INVALID_PROTOCOL_FORMAT,
            WsError::Handshake(status) => codes::HTTP_STATUS_BASE | i32::from(*status),
            WsError::Transport { code, .. } => *code,
            WsError::Io(err) => err
                .raw_os_error()
                .filter(|code| *code != 0)
                .unwrap_or(codes::FAILURE),
            WsError::Tungstenite(_) => codes::FAILURE,
        }
    }

    pub(crate) fn aborted() -> Self {
        WsError::ConnectionClosed(None)
    }
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsError::InvalidUri(uri) => write!(f, "Invalid URI: {}", uri),
            WsError::UnsupportedScheme(scheme) => write!(f, "Unsupported URI scheme: {}", scheme),
            WsError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            WsError::NullArgument(name) => write!(f, "Null argument: {}", name),
            WsError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            WsError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            WsError::ConnectionClosed(reason) => match reason {
                Some(r) => write!(f, "Connection closed: {}", r),
                None => write!(f, "Connection closed"),
            },
            WsError::ProtocolFormat(msg) => write!(f, "Invalid protocol format: {}", msg),
            WsError::Handshake(status) => write!(f, "Upgrade rejected with HTTP status {}", status),
            WsError::Transport { code, message } => write!(f, "Transport error {:#010x}: {}", code, message),
            WsError::Io(err) => write!(f, "IO error: {}", err),
            WsError::Tungstenite(err) => write!(f, "WebSocket error: {}", err),
        }
    }
}

impl std::error::Error for WsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WsError::Io(err) => Some(err),
            WsError::Tungstenite(err) => Some(err),
            _ => None,
        }
    }
}

// Convert from tungstenite errors to WsError
impl From<TungsteniteError> for WsError {
    fn from(err: TungsteniteError) -> Self {
        match err {
            TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed => {
                WsError::ConnectionClosed(Some(err.to_string()))
            }
            TungsteniteError::Io(io_err) => WsError::Io(io_err),
            TungsteniteError::Url(url_err) => WsError::InvalidUri(url_err.to_string()),
            TungsteniteError::Http(response) => WsError::Handshake(response.status().as_u16()),
            TungsteniteError::Utf8 { .. } => WsError::ProtocolFormat(err.to_string()),
            _ => WsError::Tungstenite(err),
        }
    }
}

// Convert from std::io::Error to WsError
impl From<std::io::Error> for WsError {
    fn from(err: std::io::Error) -> Self {
        WsError::Io(err)
    }
}

/// Convenience type alias for `Result<T, WsError>`.
pub type WsResult<T> = Result<T, WsError>;
