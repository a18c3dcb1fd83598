//! Echo client example using the transport selected at build time.
//!
//! One thread stays inside `open` and drives the receive loop while the main
//! thread sends ten messages with small delays, waits for their echoes and
//! closes the connection.
//!
//! Run with `cargo run --example echo_client [-- ws://host:port/path]`,
//! add `--features event-transport` for the event-driven transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use syncws::{make_websocket, PlatformWebSocket, WebSocket, WebSocketHandler, WebSocketOptions};

const MESSAGE_COUNT: usize = 10;

struct EchoHandler {
    received: Arc<AtomicUsize>,
}

impl WebSocketHandler<PlatformWebSocket> for EchoHandler {
    // Implement only what you need
    fn on_connect(&mut self, _socket: &PlatformWebSocket, message: &str) {
        println!("{}", message);
    }

    fn on_message(&mut self, _socket: &PlatformWebSocket, message: &str) {
        println!("Received: {}", message);
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&mut self, _socket: &PlatformWebSocket, code: u16, error: &str) {
        eprintln!("Error ({}): {}", code, error);
    }

    fn on_close(&mut self, _socket: &PlatformWebSocket, code: u16, reason: &str) {
        println!("Connection closed ({}): {}", code, reason);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let uri = std::env::args().nth(1).unwrap_or_else(|| "wss://echo.websocket.org".to_string());

    let options = WebSocketOptions::new()
        .nodelay(true)
        .open_wait_timeout(Some(Duration::from_secs(10)))?;
    let socket = Arc::new(make_websocket(options));
    socket.add_header("X-Protocol-Version", "2.0")?;

    // Receive loop on its own thread, it returns once the connection is closed
    let received = Arc::new(AtomicUsize::new(0));
    let opener = {
        let socket = Arc::clone(&socket);
        let mut handler = EchoHandler { received: Arc::clone(&received) };
        thread::spawn(move || socket.open(&uri, &mut handler))
    };

    for i in 0..MESSAGE_COUNT {
        let message = format!("Test message: {}", i);
        println!("Sending: {}", message);
        socket.send(&message)?;
        thread::sleep(Duration::from_millis(10 + (i as u64 * 37) % 50));
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while received.load(Ordering::SeqCst) < MESSAGE_COUNT && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }

    println!("Closing connection...");
    socket.close();

    match opener.join() {
        Ok(result) => result?,
        Err(_) => return Err("receive loop panicked".into()),
    }

    println!("Example completed successfully");
    Ok(())
}
