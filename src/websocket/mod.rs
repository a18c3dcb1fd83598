// Public API modules
pub mod types;
pub mod options;
pub mod uri;
pub mod semaphore;

// Internal modules
mod shared;

// Transport implementations
mod upgrade_client;
mod event_client;

// Re-export public types
pub use types::{
    Callbacks, CloseOrigin, CloseOutcome, ConnectionState, WebSocket, WebSocketHandler, CLOSE_ABNORMAL,
    CLOSE_NORMAL, CLOSE_NO_STATUS, CONNECT_FAILED_CODE, CONNECT_FAILED_MESSAGE, DEFAULT_CLOSE_REASON,
    MAX_CLOSE_REASON_LEN,
};
pub use options::WebSocketOptions;
pub use uri::WsTarget;
pub use semaphore::Semaphore;

// Re-export transport types
pub use upgrade_client::UpgradeWebSocket;
pub use event_client::EventWebSocket;

/// Transport used by [`make_websocket`] and the C surface.
#[cfg(not(feature = "event-transport"))]
pub type PlatformWebSocket = UpgradeWebSocket;

/// Transport used by [`make_websocket`] and the C surface.
#[cfg(feature = "event-transport")]
pub type PlatformWebSocket = EventWebSocket;

/// Creates an unopened connection of the transport selected at build time.
pub fn make_websocket(options: WebSocketOptions) -> PlatformWebSocket {
    PlatformWebSocket::new(options)
}
