use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use crate::error::{WsResult, WsError};
use super::options::WebSocketOptions;
use super::semaphore::Inbox;
use super::shared::{self, Lifecycle, ReadStep};
use super::types::{
    CloseOutcome, ConnectionState, ControlMessage, TransportEvent, WebSocket, WebSocketHandler, CLOSE_NO_STATUS,
    CONNECT_FAILED_CODE, CONNECT_FAILED_MESSAGE,
};
use super::uri::WsTarget;

// ============================================================================
// Macros
// ============================================================================

macro_rules! send_or_log {
    ($sender:expr, $context:expr, $event:expr) => {
        if let Err(e) = $sender.send($event) {
            tracing::error!("Failed to send context {} through channel: {}", $context, e);
        }
    };
}

// ============================================================================
// EventWebSocket - event driven transport bridged to blocking calls
// ============================================================================

/// State shared between the connection object and its I/O thread
struct EventShared {
    lifecycle: Lifecycle,
    inbox: Inbox,
}

/// Transport whose socket lives on its own I/O thread.
///
/// Connect completion, inbound messages and the close notification arrive as
/// tagged events in a FIFO inbox; [`open`](WebSocket::open),
/// [`read`](WebSocket::read) and [`try_read`](WebSocket::try_read) consume
/// them, while [`send`](WebSocket::send) hands text to the I/O thread and
/// waits for the write result.
pub struct EventWebSocket {
    options: WebSocketOptions,
    headers: Mutex<HashMap<String, String>>,
    shared: Arc<EventShared>,
    control_tx: Mutex<Option<Sender<ControlMessage>>>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventWebSocket {
    pub fn new(options: WebSocketOptions) -> EventWebSocket {
        EventWebSocket {
            options,
            headers: Mutex::new(HashMap::new()),
            shared: Arc::new(EventShared { lifecycle: Lifecycle::default(), inbox: Inbox::new() }),
            control_tx: Mutex::new(None),
            io_thread: Mutex::new(None),
        }
    }

    fn spawn_io_thread(&self, target: WsTarget) -> WsResult<()> {
        let headers = self.headers.lock().clone();
        let (control_tx, control_rx) = unbounded::<ControlMessage>();
        *self.control_tx.lock() = Some(control_tx);

        let shared = Arc::clone(&self.shared);
        let options = self.options.clone();

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Starting I/O thread for {}", target);
        }

        let handle = thread::Builder::new()
            .name("syncws-io".to_string())
            .spawn(move || run_io_loop(target, headers, options, shared, control_rx))?;
        *self.io_thread.lock() = Some(handle);
        Ok(())
    }

    fn join_io_thread(&self) {
        let handle = self.io_thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("I/O thread panicked");
            }
        }
    }

    fn connect_failed<H>(&self, error: WsError, handler: &mut H) -> WsResult<()>
    where
        H: WebSocketHandler<Self>,
    {
        tracing::error!("Failed to open connection: {}", error);
        self.shared.lifecycle.mark_closed();
        handler.on_error(self, CONNECT_FAILED_CODE, CONNECT_FAILED_MESSAGE);
        Err(error)
    }
}

impl WebSocket for EventWebSocket {
    fn add_header(&self, key: &str, value: &str) -> WsResult<()> {
        let mut headers = self.headers.lock();
        if self.shared.lifecycle.state() != ConnectionState::Unopened {
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
        self.shared.lifecycle.begin_opening()?;

        let target = match WsTarget::parse(uri) {
            Ok(target) => target,
            Err(e) => {
                self.shared.lifecycle.mark_closed();
                return Err(e);
            }
        };

        if let Err(e) = self.spawn_io_thread(target) {
            return self.connect_failed(e, handler);
        }

        // Connect completion is always the first event
        loop {
            match self.shared.inbox.next() {
                TransportEvent::Connected => break,
                TransportEvent::ConnectFailed(e) => {
                    self.join_io_thread();
                    return self.connect_failed(e, handler);
                },
                event => tracing::warn!("Unexpected event before connect completed: {:?}", event),
            }
        }

        if !self.shared.lifecycle.publish_open() && tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Close was requested during the handshake");
        }
        handler.on_connect(self, &format!("Connected to: {}", uri));

        // Process messages until the socket is closed
        let outcome = loop {
            match self.shared.inbox.next() {
                TransportEvent::Message(text) => handler.on_message(self, &text),
                TransportEvent::Closed(outcome) => break outcome,
                event => tracing::warn!("Unexpected event after connect: {:?}", event),
            }
        };
        // Leave the close notification in place so blocked and later readers abort
        self.shared.inbox.requeue(TransportEvent::Closed(outcome.clone()));

        self.join_io_thread();
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Receive loop finished: {}", outcome);
        }
        outcome.deliver(self, handler);
        outcome.into_result()
    }

    fn send(&self, message: &str) -> WsResult<()> {
        if self.shared.lifecycle.wait_settled(self.options.open_wait_timeout) != ConnectionState::Open {
            return Err(WsError::aborted());
        }

        let control_tx = self.control_tx.lock().clone().ok_or_else(WsError::aborted)?;
        let (reply_tx, reply_rx) = bounded::<WsResult<()>>(1);
        control_tx
            .send(ControlMessage::SendText(message.to_string(), reply_tx))
            .map_err(|_| WsError::aborted())?;

        // A dropped reply sender means the I/O thread exited first
        reply_rx.recv().unwrap_or_else(|_| Err(WsError::aborted()))
    }

    fn read(&self) -> WsResult<String> {
        if self.shared.lifecycle.wait_settled(self.options.open_wait_timeout) != ConnectionState::Open {
            return Err(WsError::aborted());
        }

        loop {
            match self.shared.inbox.next() {
                TransportEvent::Message(text) => return Ok(text),
                event @ TransportEvent::Closed(_) => {
                    // Incorrectly consumed close notification, pass it on
                    self.shared.inbox.requeue(event);
                    return Err(WsError::aborted());
                },
                event => tracing::warn!("Unexpected event in read: {:?}", event),
            }
        }
    }

    fn try_read(&self) -> WsResult<Option<String>> {
        match self.shared.lifecycle.state() {
            ConnectionState::Open => {},
            ConnectionState::Closed => return Err(WsError::aborted()),
            ConnectionState::Unopened | ConnectionState::Opening => return Ok(None),
        }

        match self.shared.inbox.try_next() {
            Some(TransportEvent::Message(text)) => Ok(Some(text)),
            Some(event @ TransportEvent::Closed(_)) => {
                self.shared.inbox.requeue(event);
                Err(WsError::aborted())
            },
            Some(event) => {
                tracing::warn!("Unexpected event in try_read: {:?}", event);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    fn close(&self) {
        // The I/O thread starts the close handshake on its next turn
        if self.shared.lifecycle.request_close() && tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Close requested");
        }
    }

    fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }
}

impl Drop for EventWebSocket {
    fn drop(&mut self) {
        self.close();
        // Disconnecting the control channel lets a detached I/O thread exit
        self.control_tx.get_mut().take();
    }
}

// ============================================================================
// I/O thread
// ============================================================================

fn run_io_loop(
    target: WsTarget,
    headers: HashMap<String, String>,
    options: WebSocketOptions,
    shared: Arc<EventShared>,
    control_rx: Receiver<ControlMessage>,
) {
    let mut socket = match shared::connect_socket(&target, &headers, &options) {
        Ok((socket, _response)) => socket,
        Err(e) => {
            shared.lifecycle.mark_closed();
            shared.inbox.push(TransportEvent::ConnectFailed(e));
            return;
        }
    };
    shared.inbox.push(TransportEvent::Connected);

    let resolve = |outcome: CloseOutcome| {
        if shared.lifecycle.mark_closed() {
            outcome
        } else {
            CloseOutcome::local(&options.close_reason)
        }
    };

    let mut closing = false;
    let outcome = loop {
        // 1. Drain pending sends (non-blocking)
        loop {
            match control_rx.try_recv() {
                Ok(ControlMessage::SendText(text, reply_tx)) => {
                    let result = if shared.lifecycle.is_closed() {
                        Err(WsError::aborted())
                    } else {
                        shared::send_text_message_to_websocket(&mut socket, &text)
                    };
                    send_or_log!(reply_tx, "send result on ControlMessage::SendText", result);
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    shared.lifecycle.request_close();
                    break;
                },
            }
        }

        // 2. Start or time out a local close
        if !closing && shared.lifecycle.is_closed() {
            shared::close_websocket_with_logging(&mut socket, &options.close_reason, "on close request");
            closing = true;
        }
        if closing && shared.lifecycle.close_expired(options.close_timeout) {
            tracing::warn!("Peer did not answer the close request within {:?}", options.close_timeout);
            break CloseOutcome::local(&options.close_reason);
        }

        // 3. Read with the poll interval as timeout
        match shared::read_step(&mut socket) {
            ReadStep::Text(text) => shared.inbox.push(TransportEvent::Message(text)),
            ReadStep::Binary(len) => {
                tracing::warn!("Dropping binary message of {} bytes, only text is supported", len);
            },
            ReadStep::Control | ReadStep::Idle => {},
            ReadStep::Close(close_frame) => {
                shared::flush_close_reply(&mut socket);
                break resolve(shared::remote_outcome(close_frame));
            },
            ReadStep::Finished => break resolve(CloseOutcome::remote(CLOSE_NO_STATUS, String::new())),
            ReadStep::Failed(error) => break resolve(CloseOutcome::failure(&error)),
        }
    };

    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!("I/O thread for {} exiting: {}", target, outcome);
    }
    shared.inbox.push(TransportEvent::Closed(outcome));
}
