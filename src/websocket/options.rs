use std::time::Duration;
use crate::error::{WsResult, WsError};
use super::types::{DEFAULT_CLOSE_REASON, MAX_CLOSE_REASON_LEN};

// ============================================================================
// Configuration options
// ============================================================================

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration options shared by both transport variants.
#[derive(Debug, Clone)]
pub struct WebSocketOptions {
    pub(crate) nodelay: Option<bool>,
    pub(crate) ttl: Option<u32>,
    pub(crate) poll_interval: Duration,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) close_timeout: Duration,
    pub(crate) open_wait_timeout: Option<Duration>,
    pub(crate) max_message_size: Option<usize>,
    pub(crate) close_reason: String,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        WebSocketOptions {
            nodelay: None,
            ttl: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_timeout: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            open_wait_timeout: None,
            max_message_size: None,
            close_reason: DEFAULT_CLOSE_REASON.to_string(),
        }
    }
}

impl WebSocketOptions {
    /// Creates a new `WebSocketOptions` builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables the `TCP_NODELAY` option for messages to be sent.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = Some(nodelay);
        self
    }

    /// Sets the TTL (Time To Live, # of hops) for the socket.
    /// None for the system default
    pub fn ttl(mut self, ttl: Option<u32>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets how long a single socket read may block before the receive loop
    /// lets a waiting `send` or `close` through. Must be greater than zero.
    pub fn poll_interval(mut self, interval: Duration) -> WsResult<Self> {
        if interval.is_zero() {
            return Err(WsError::InvalidConfiguration("Poll interval cannot be zero".to_string()));
        }
        self.poll_interval = interval;
        Ok(self)
    }

    /// Sets the write timeout for the socket.
    /// Must be None for indefinitely blocking writes or greater than zero
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> WsResult<Self> {
        if let Some(timeout) = timeout {
            if timeout.is_zero() {
                return Err(WsError::InvalidConfiguration("Write timeout duration cannot be zero".to_string()));
            }
        }
        self.write_timeout = timeout;
        Ok(self)
    }

    /// Sets how long to wait for the peer to answer a local close before giving up.
    pub fn close_timeout(mut self, timeout: Duration) -> WsResult<Self> {
        if timeout.is_zero() {
            return Err(WsError::InvalidConfiguration("Close timeout duration cannot be zero".to_string()));
        }
        self.close_timeout = timeout;
        Ok(self)
    }

    /// Bounds how long `send` and `read` wait for a pending handshake.
    /// None waits until `open` either succeeds or fails.
    pub fn open_wait_timeout(mut self, timeout: Option<Duration>) -> WsResult<Self> {
        if let Some(timeout) = timeout {
            if timeout.is_zero() {
                return Err(WsError::InvalidConfiguration("Open wait timeout cannot be zero".to_string()));
            }
        }
        self.open_wait_timeout = timeout;
        Ok(self)
    }

    /// Limits the size of a reassembled inbound message. None for the library default.
    pub fn max_message_size(mut self, size: Option<usize>) -> WsResult<Self> {
        if size == Some(0) {
            return Err(WsError::InvalidConfiguration("Max message size cannot be zero".to_string()));
        }
        self.max_message_size = size;
        Ok(self)
    }

    /// Sets the reason sent with a locally requested close.
    /// Must fit into a close frame (at most 123 bytes).
    pub fn close_reason(mut self, reason: impl Into<String>) -> WsResult<Self> {
        let reason = reason.into();
        if reason.len() > MAX_CLOSE_REASON_LEN {
            return Err(WsError::InvalidConfiguration(format!(
                "Close reason is {} bytes, at most {} allowed", reason.len(), MAX_CLOSE_REASON_LEN
            )));
        }
        self.close_reason = reason;
        Ok(self)
    }
}
