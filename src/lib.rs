//! # syncws
//!
//! Blocking WebSocket transport with a callback interface.
//!
//! A connection is shared between an opener, which calls
//! [`WebSocket::open`] and stays inside it for the lifetime of the
//! connection, and any number of threads that [`send`](WebSocket::send),
//! [`read`](WebSocket::read) or [`close`](WebSocket::close) concurrently.
//! Two transports implement [`WebSocket`]:
//!
//! - [`UpgradeWebSocket`] performs the handshake and all socket I/O on the
//!   calling threads.
//! - [`EventWebSocket`] owns its socket on an I/O thread and bridges its
//!   events back into blocking calls.
//!
//! [`PlatformWebSocket`] names the one selected at build time (the
//! `event-transport` feature picks [`EventWebSocket`]); the [`ffi`] module
//! exposes it through a flat C surface.

mod websocket;
mod error;
pub mod ffi;

pub use websocket::*;
pub use error::{codes, WsError, WsResult};
