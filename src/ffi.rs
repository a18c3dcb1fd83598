//! Flat C surface over [`PlatformWebSocket`].
//!
//! # Overview
//! A connection crosses the boundary as an opaque `WsHandle` created by
//! [`create_websocket`] and released by [`close_websocket`]. Callbacks are
//! plain function pointers; text is passed as a pointer plus an explicit
//! length and is *not* NUL terminated. Strings passed *in* are NUL
//! terminated UTF-8.
//!
//! # Design
//! - Every entry point wraps its body in `catch_unwind`, a panic is reported
//!   as [`codes::UNEXPECTED`].
//! - Every entry point returns [`codes::OK`] on success and a non-zero
//!   [`WsError::code`] otherwise. Null pointers yield [`codes::NULL_ARGUMENT`].
//! - The handle pointer handed to callbacks is the one given to
//!   [`open_websocket`]; callbacks may pass it to [`write_websocket`] or
//!   [`read_websocket`] until [`close_websocket`] has returned.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use crate::error::{codes, WsError, WsResult};
use crate::websocket::{make_websocket, PlatformWebSocket, WebSocket, WebSocketHandler, WebSocketOptions};

/// Opaque connection handle.
pub struct WsHandle {
    inner: Arc<PlatformWebSocket>,
}

// Lengths are byte counts carried as `u32`. Text longer than `u32::MAX` bytes
// never reaches a callback: handler callbacks are skipped with an error log and
// `read_websocket` returns `codes::INVALID_ARGUMENT`.

/// `(handle, message, message_len)`
pub type WsConnectCallback = Option<extern "C" fn(*const WsHandle, *const c_char, u32)>;
/// `(handle, message, message_len)`
pub type WsMessageCallback = Option<extern "C" fn(*const WsHandle, *const c_char, u32)>;
/// `(handle, code, message, message_len)`
pub type WsErrorCallback = Option<extern "C" fn(*const WsHandle, u16, *const c_char, u32)>;
/// `(handle, code, reason, reason_len)`
pub type WsCloseCallback = Option<extern "C" fn(*const WsHandle, u16, *const c_char, u32)>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn guarded(context: &str, body: impl FnOnce() -> WsResult<()>) -> i32 {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => codes::OK,
        Ok(Err(e)) => {
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!("{} failed: {}", context, e);
            }
            e.code()
        },
        Err(_) => {
            tracing::error!("Panic caught in {}", context);
            codes::UNEXPECTED
        },
    }
}

/// # Safety
/// `handle` must be null or a live pointer from [`create_websocket`].
unsafe fn socket_of(handle: *const WsHandle) -> WsResult<Arc<PlatformWebSocket>> {
    if handle.is_null() {
        return Err(WsError::NullArgument("handle"));
    }
    // SAFETY: non-null and live per the caller contract.
    Ok(Arc::clone(unsafe { &(*handle).inner }))
}

/// # Safety
/// `ptr` must be null or point to a NUL terminated string that outlives `'a`.
unsafe fn text_arg<'a>(ptr: *const c_char, name: &'static str) -> WsResult<&'a str> {
    if ptr.is_null() {
        return Err(WsError::NullArgument(name));
    }
    // SAFETY: non-null and NUL terminated per the caller contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| WsError::InvalidArgument(format!("{} is not valid UTF-8: {}", name, e)))
}

fn buffer_len(len: usize) -> WsResult<u32> {
    u32::try_from(len)
        .map_err(|_| WsError::InvalidArgument(format!("{} bytes do not fit a u32 callback length", len)))
}

/// Pointer and length for a callback, `None` when the length does not fit.
fn c_text(text: &str, callback: &str) -> Option<(*const c_char, u32)> {
    match buffer_len(text.len()) {
        Ok(len) => Some((text.as_ptr().cast(), len)),
        Err(e) => {
            tracing::error!("Skipping {} callback: {}", callback, e);
            None
        },
    }
}

/// Forwards handler calls to the C callbacks registered for one `open`.
struct FfiHandler {
    handle: *const WsHandle,
    on_connect: WsConnectCallback,
    on_message: WsMessageCallback,
    on_error: WsErrorCallback,
    on_close: WsCloseCallback,
}

impl WebSocketHandler<PlatformWebSocket> for FfiHandler {
    fn on_connect(&mut self, _socket: &PlatformWebSocket, message: &str) {
        if let Some(callback) = self.on_connect {
            if let Some((ptr, len)) = c_text(message, "on_connect") {
                callback(self.handle, ptr, len);
            }
        }
    }

    fn on_message(&mut self, _socket: &PlatformWebSocket, message: &str) {
        if let Some(callback) = self.on_message {
            if let Some((ptr, len)) = c_text(message, "on_message") {
                callback(self.handle, ptr, len);
            }
        }
    }

    fn on_error(&mut self, _socket: &PlatformWebSocket, code: u16, error: &str) {
        if let Some(callback) = self.on_error {
            if let Some((ptr, len)) = c_text(error, "on_error") {
                callback(self.handle, code, ptr, len);
            }
        }
    }

    fn on_close(&mut self, _socket: &PlatformWebSocket, code: u16, reason: &str) {
        if let Some(callback) = self.on_close {
            if let Some((ptr, len)) = c_text(reason, "on_close") {
                callback(self.handle, code, ptr, len);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Creates an unopened connection and stores its handle in `*out`.
///
/// Release the handle with [`close_websocket`].
#[unsafe(no_mangle)]
pub extern "C" fn create_websocket(out: *mut *mut WsHandle) -> i32 {
    guarded("create_websocket", || {
        if out.is_null() {
            return Err(WsError::NullArgument("out"));
        }
        let handle = Box::new(WsHandle { inner: Arc::new(make_websocket(WebSocketOptions::new())) });
        // SAFETY: `out` is non-null and writable per the caller contract.
        unsafe { *out = Box::into_raw(handle) };
        Ok(())
    })
}

/// Records a request header for the upgrade handshake. Only valid before open.
#[unsafe(no_mangle)]
pub extern "C" fn add_header(handle: *mut WsHandle, key: *const c_char, value: *const c_char) -> i32 {
    guarded("add_header", || {
        // SAFETY: pointers are null or valid per the caller contract.
        let socket = unsafe { socket_of(handle) }?;
        let key = unsafe { text_arg(key, "key") }?;
        let value = unsafe { text_arg(value, "value") }?;
        socket.add_header(key, value)
    })
}

/// Connects to `uri` and runs the receive loop until the connection closes.
///
/// Blocks for the lifetime of the connection. Any callback may be null.
#[unsafe(no_mangle)]
pub extern "C" fn open_websocket(
    handle: *mut WsHandle,
    uri: *const c_char,
    on_connect: WsConnectCallback,
    on_message: WsMessageCallback,
    on_error: WsErrorCallback,
    on_close: WsCloseCallback,
) -> i32 {
    guarded("open_websocket", || {
        // SAFETY: pointers are null or valid per the caller contract.
        let socket = unsafe { socket_of(handle) }?;
        let uri = unsafe { text_arg(uri, "uri") }?;
        let mut handler = FfiHandler { handle: handle.cast_const(), on_connect, on_message, on_error, on_close };
        socket.open(uri, &mut handler)
    })
}

/// Sends one text message, waiting for a pending handshake first.
#[unsafe(no_mangle)]
pub extern "C" fn write_websocket(handle: *mut WsHandle, message: *const c_char) -> i32 {
    guarded("write_websocket", || {
        // SAFETY: pointers are null or valid per the caller contract.
        let socket = unsafe { socket_of(handle) }?;
        let message = unsafe { text_arg(message, "message") }?;
        socket.send(message)
    })
}

/// Delivers at most one pending message to `on_message` without blocking.
///
/// Returns [`codes::OK`] when nothing is pending, and
/// [`codes::INVALID_ARGUMENT`] for a message too long for a `u32` length.
#[unsafe(no_mangle)]
pub extern "C" fn read_websocket(handle: *mut WsHandle, on_message: WsMessageCallback) -> i32 {
    guarded("read_websocket", || {
        // SAFETY: `handle` is null or valid per the caller contract.
        let socket = unsafe { socket_of(handle) }?;
        let callback = on_message.ok_or(WsError::NullArgument("on_message"))?;
        if let Some(text) = socket.try_read()? {
            let len = buffer_len(text.len())?;
            callback(handle, text.as_ptr().cast(), len);
        }
        Ok(())
    })
}

/// Closes the connection and releases the handle.
///
/// A concurrent [`open_websocket`] keeps the connection alive until its
/// receive loop has delivered `on_close`. The handle must not be used again.
#[unsafe(no_mangle)]
pub extern "C" fn close_websocket(handle: *mut WsHandle) -> i32 {
    guarded("close_websocket", || {
        if handle.is_null() {
            return Err(WsError::NullArgument("handle"));
        }
        // SAFETY: `handle` came from `create_websocket` and is released exactly once.
        let handle = unsafe { Box::from_raw(handle) };
        handle.inner.close();
        Ok(())
    })
}
