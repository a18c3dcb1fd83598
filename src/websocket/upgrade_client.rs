use std::collections::HashMap;
use parking_lot::{Mutex, MutexGuard};
use crate::error::{WsResult, WsError};
use super::options::WebSocketOptions;
use super::shared::{self, Lifecycle, ReadStep, Socket};
use super::types::{
    CloseOutcome, ConnectionState, WebSocket, WebSocketHandler, CLOSE_NO_STATUS, CONNECT_FAILED_CODE,
    CONNECT_FAILED_MESSAGE,
};
use super::uri::WsTarget;

// ============================================================================
// UpgradeWebSocket - synchronous HTTP upgrade transport
// ============================================================================

/// Transport that performs the upgrade handshake and every read and write
/// synchronously on the calling thread.
///
/// The receive loop inside [`open`](WebSocket::open) holds the socket for one
/// read attempt at a time (bounded by the poll interval) and hands it over
/// fairly, so [`send`](WebSocket::send) and [`close`](WebSocket::close) from
/// other threads get their turn between reads.
///
/// ```no_run
/// use std::sync::Arc;
/// use std::thread;
/// use syncws::{Callbacks, UpgradeWebSocket, WebSocket, WebSocketOptions};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let socket = Arc::new(UpgradeWebSocket::new(WebSocketOptions::new()));
/// let opener = {
///     let socket = Arc::clone(&socket);
///     thread::spawn(move || {
///         let mut callbacks = Callbacks::new().on_message(|_, text| println!("Received: {}", text));
///         socket.open("wss://echo.websocket.org", &mut callbacks)
///     })
/// };
/// socket.send("Hello")?;
/// socket.close();
/// opener.join().unwrap()?;
/// # Ok(())
/// # }
/// ```
pub struct UpgradeWebSocket {
    options: WebSocketOptions,
    headers: Mutex<HashMap<String, String>>,
    lifecycle: Lifecycle,
    socket: Mutex<Option<Socket>>,
    // Close consumed by `read` while the receive loop was not looking
    pending_close: Mutex<Option<CloseOutcome>>,
}

impl UpgradeWebSocket {
    pub fn new(options: WebSocketOptions) -> UpgradeWebSocket {
        UpgradeWebSocket {
            options,
            headers: Mutex::new(HashMap::new()),
            lifecycle: Lifecycle::default(),
            socket: Mutex::new(None),
            pending_close: Mutex::new(None),
        }
    }

    fn receive_loop<H>(&self, handler: &mut H) -> WsResult<()>
    where
        H: WebSocketHandler<Self>,
    {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Starting receive loop");
        }

        loop {
            let stashed = self.pending_close.lock().take();
            if let Some(outcome) = stashed {
                return self.finish(outcome, handler);
            }

            let mut guard = self.socket.lock();
            let Some(socket) = guard.as_mut() else {
                drop(guard);
                return self.finish(CloseOutcome::local(&self.options.close_reason), handler);
            };

            if self.lifecycle.close_expired(self.options.close_timeout) {
                drop(guard);
                tracing::warn!("Peer did not answer the close request within {:?}", self.options.close_timeout);
                return self.finish(CloseOutcome::local(&self.options.close_reason), handler);
            }

            let outcome = match shared::read_step(socket) {
                ReadStep::Text(text) => {
                    // Callbacks run without the socket so they may send or close
                    MutexGuard::unlock_fair(guard);
                    handler.on_message(self, &text);
                    continue;
                },
                ReadStep::Binary(len) => {
                    tracing::warn!("Dropping binary message of {} bytes, only text is supported", len);
                    None
                },
                ReadStep::Control | ReadStep::Idle => None,
                ReadStep::Close(close_frame) => {
                    shared::flush_close_reply(socket);
                    Some(self.closed_by_transport(shared::remote_outcome(close_frame)))
                },
                ReadStep::Finished => {
                    Some(self.closed_by_transport(CloseOutcome::remote(CLOSE_NO_STATUS, String::new())))
                },
                ReadStep::Failed(error) => Some(self.closed_by_transport(CloseOutcome::failure(&error))),
            };

            match outcome {
                Some(outcome) => {
                    drop(guard);
                    return self.finish(outcome, handler);
                },
                None => MutexGuard::unlock_fair(guard),
            }
        }
    }

    /// Resolves a transport-side close against a concurrent local close
    fn closed_by_transport(&self, outcome: CloseOutcome) -> CloseOutcome {
        if self.lifecycle.mark_closed() {
            outcome
        } else {
            CloseOutcome::local(&self.options.close_reason)
        }
    }

    fn finish<H>(&self, outcome: CloseOutcome, handler: &mut H) -> WsResult<()>
    where
        H: WebSocketHandler<Self>,
    {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Receive loop finished: {}", outcome);
        }
        outcome.deliver(self, handler);
        outcome.into_result()
    }

    /// One read attempt on behalf of `read`/`try_read`
    fn read_one(&self, slot: &mut Option<Socket>) -> WsResult<Option<String>> {
        if self.lifecycle.is_closed() || self.pending_close.lock().is_some() {
            return Err(WsError::aborted());
        }
        let Some(socket) = slot.as_mut() else {
            return Err(WsError::aborted());
        };

        match shared::read_step(socket) {
            ReadStep::Text(text) => Ok(Some(text)),
            ReadStep::Binary(len) => {
                Err(WsError::ProtocolFormat(format!("binary message of {} bytes, only text is supported", len)))
            },
            ReadStep::Control | ReadStep::Idle => Ok(None),
            ReadStep::Close(close_frame) => {
                shared::flush_close_reply(socket);
                self.stash_close(shared::remote_outcome(close_frame));
                Err(WsError::aborted())
            },
            ReadStep::Finished => {
                self.stash_close(CloseOutcome::remote(CLOSE_NO_STATUS, String::new()));
                Err(WsError::aborted())
            },
            ReadStep::Failed(error) => {
                self.stash_close(CloseOutcome::failure(&error));
                Err(error)
            },
        }
    }

    fn stash_close(&self, outcome: CloseOutcome) {
        let outcome = self.closed_by_transport(outcome);
        *self.pending_close.lock() = Some(outcome);
    }
}

impl WebSocket for UpgradeWebSocket {
    fn add_header(&self, key: &str, value: &str) -> WsResult<()> {
        let mut headers = self.headers.lock();
        if self.lifecycle.state() != ConnectionState::Unopened {
            tracing::warn!("Ignoring header {} added after open", key);
            return Err(WsError::InvalidState("headers cannot change once open has begun".to_string()));
        }
        headers.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn open<H>(&self, uri: &str, handler: &mut H) -> WsResult<()>
    where
        H: WebSocketHandler<Self>,
    {
        self.lifecycle.begin_opening()?;

        let target = match WsTarget::parse(uri) {
            Ok(target) => target,
            Err(e) => {
                self.lifecycle.mark_closed();
                return Err(e);
            }
        };

        let headers = self.headers.lock().clone();
        let socket = match shared::connect_socket(&target, &headers, &self.options) {
            Ok((socket, _response)) => socket,
            Err(e) => {
                tracing::error!("Failed to open {}: {}", target, e);
                self.lifecycle.mark_closed();
                handler.on_error(self, CONNECT_FAILED_CODE, CONNECT_FAILED_MESSAGE);
                return Err(e);
            }
        };
        *self.socket.lock() = Some(socket);

        if !self.lifecycle.publish_open() {
            // close() raced the handshake and found no socket to close yet
            if let Some(socket) = self.socket.lock().as_mut() {
                shared::close_websocket_with_logging(socket, &self.options.close_reason, "close during handshake");
            }
        }

        handler.on_connect(self, &format!("Connected to: {}", uri));
        let result = self.receive_loop(handler);

        *self.socket.lock() = None;
        result
    }

    fn send(&self, message: &str) -> WsResult<()> {
        if self.lifecycle.wait_settled(self.options.open_wait_timeout) != ConnectionState::Open {
            return Err(WsError::aborted());
        }

        // Re-check under the socket lock, close may have won the race
        let mut guard = self.socket.lock();
        match guard.as_mut() {
            Some(socket) if !self.lifecycle.is_closed() => shared::send_text_message_to_websocket(socket, message),
            _ => Err(WsError::aborted()),
        }
    }

    fn read(&self) -> WsResult<String> {
        if self.lifecycle.wait_settled(self.options.open_wait_timeout) != ConnectionState::Open {
            return Err(WsError::aborted());
        }

        loop {
            let mut guard = self.socket.lock();
            match self.read_one(&mut guard)? {
                Some(text) => return Ok(text),
                None => MutexGuard::unlock_fair(guard),
            }
        }
    }

    fn try_read(&self) -> WsResult<Option<String>> {
        match self.lifecycle.state() {
            ConnectionState::Open => {},
            ConnectionState::Closed => return Err(WsError::aborted()),
            ConnectionState::Unopened | ConnectionState::Opening => return Ok(None),
        }

        match self.socket.try_lock() {
            Some(mut guard) => self.read_one(&mut guard),
            None => Ok(None),
        }
    }

    fn close(&self) {
        if !self.lifecycle.request_close() {
            return;
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Close requested");
        }
        if let Some(socket) = self.socket.lock().as_mut() {
            shared::close_websocket_with_logging(socket, &self.options.close_reason, "on close");
        }
    }

    fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }
}

impl Drop for UpgradeWebSocket {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.get_mut().as_mut() {
            shared::close_websocket_with_logging(socket, &self.options.close_reason, "on Drop");
        }
    }
}
