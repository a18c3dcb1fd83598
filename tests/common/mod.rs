#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use syncws::{codes, Callbacks, ConnectionState, WebSocket, WsError, DEFAULT_CLOSE_REASON};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::frame::coding::{CloseCode, Data, OpCode};
use tungstenite::protocol::frame::Frame;
use tungstenite::protocol::CloseFrame;
use tungstenite::Message;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// In-process server
// ============================================================================

/// What the server does once the upgrade handshake is done.
pub enum Behaviour {
    Echo,
    /// Sends one text message split into the given fragments, then echoes.
    Fragmented(Vec<&'static str>),
    /// Starts the close handshake with the given status.
    RemoteClose(u16, &'static str),
    /// Sends a binary message followed by `"after binary"`, then echoes.
    BinaryThenText,
    /// Sends one text message right after the handshake, then echoes.
    Greeting(&'static str),
    /// Holds the upgrade response back for the given time, then echoes.
    SlowHandshake(Duration),
}

pub struct TestServer {
    pub url: String,
    headers: Receiver<Vec<(String, String)>>,
}

impl TestServer {
    /// Serves a single connection on an ephemeral localhost port.
    pub fn spawn(behaviour: Behaviour) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let addr = listener.local_addr().expect("local addr");
        let (headers_tx, headers_rx) = unbounded();

        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream, behaviour, headers_tx);
            }
        });

        TestServer { url: format!("ws://{}/socket", addr), headers: headers_rx }
    }

    /// Request headers of the upgrade request, lower-cased by name.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        self.headers.recv_timeout(WAIT_LIMIT).expect("server saw no upgrade request")
    }
}

fn serve(stream: TcpStream, behaviour: Behaviour, headers_tx: Sender<Vec<(String, String)>>) {
    let response_delay = match behaviour {
        Behaviour::SlowHandshake(delay) => delay,
        _ => Duration::ZERO,
    };
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let headers = request
            .headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let _ = headers_tx.send(headers);
        thread::sleep(response_delay);
        Ok(response)
    };
    let Ok(mut ws) = tungstenite::accept_hdr(stream, capture) else {
        return;
    };

    match behaviour {
        Behaviour::Echo | Behaviour::SlowHandshake(_) => {},
        Behaviour::Greeting(text) => {
            ws.send(Message::text(text)).expect("send greeting");
        },
        Behaviour::Fragmented(parts) => {
            let last = parts.len() - 1;
            for (i, part) in parts.iter().enumerate() {
                let opcode = if i == 0 { OpCode::Data(Data::Text) } else { OpCode::Data(Data::Continue) };
                let frame = Frame::message(part.as_bytes().to_vec(), opcode, i == last);
                ws.send(Message::Frame(frame)).expect("send fragment");
            }
        },
        Behaviour::RemoteClose(code, reason) => {
            let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
            ws.close(Some(frame)).expect("start close");
        },
        Behaviour::BinaryThenText => {
            ws.send(Message::Binary(vec![1u8, 2, 3].into())).expect("send binary");
            ws.send(Message::text("after binary")).expect("send text");
        },
    }

    // Echo text until the close handshake completes
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => {
                if ws.send(Message::Text(text)).is_err() {
                    break;
                }
            },
            Ok(_) => {},
            Err(_) => break,
        }
    }
}

/// Address nothing listens on.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("ws://{}/socket", addr)
}

// ============================================================================
// Helpers
// ============================================================================

/// Ordered record of every callback invocation.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Polls until `count(prefix)` reaches `expected`.
    pub fn wait_for(&self, prefix: &str, expected: usize) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while self.count(prefix) < expected {
            assert!(Instant::now() < deadline, "timed out waiting for {} x {:?}: {:?}", expected, prefix, self.entries());
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn callbacks<W>(&self) -> Callbacks<'_, W> {
        Callbacks::new()
            .on_connect(move |_, m| self.push(format!("connect {}", m)))
            .on_message(move |_, m| self.push(format!("message {}", m)))
            .on_error(move |_, code, e| self.push(format!("error {} {}", code, e)))
            .on_close(move |_, code, r| self.push(format!("close {} {}", code, r)))
    }
}

/// Runs `open` on its own thread, recording callbacks in a journal.
pub fn open_in_background<W>(socket: &Arc<W>, url: &str) -> (Journal, thread::JoinHandle<Result<(), WsError>>)
where
    W: WebSocket + 'static,
{
    let journal = Journal::default();
    let handle = {
        let socket = Arc::clone(socket);
        let journal = journal.clone();
        let url = url.to_string();
        thread::spawn(move || {
            let mut callbacks = journal.callbacks();
            socket.open(&url, &mut callbacks)
        })
    };
    (journal, handle)
}

// ============================================================================
// Scenarios shared by both transports
// ============================================================================

pub fn ordered_echo_then_close<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::Echo);
    let socket = Arc::new(make());
    let (journal, opener) = open_in_background(&socket, &server.url);

    for i in 0..10u64 {
        socket.send(&format!("Test message: {}", i)).expect("send");
        thread::sleep(Duration::from_millis((i * 7) % 4));
    }
    journal.wait_for("message ", 10);

    socket.close();
    socket.close();
    opener.join().expect("opener panicked").expect("open");
    socket.close();

    let mut expected = vec![format!("connect Connected to: {}", server.url)];
    expected.extend((0..10).map(|i| format!("message Test message: {}", i)));
    expected.push(format!("close 1000 {}", DEFAULT_CLOSE_REASON));
    assert_eq!(journal.entries(), expected);

    assert_eq!(socket.state(), ConnectionState::Closed);
    assert_eq!(socket.send("late").unwrap_err().code(), codes::ABORTED);
}

pub fn malformed_uri_invokes_no_callbacks<W: WebSocket>(make: fn() -> W) {
    init_tracing();
    let socket = make();
    let journal = Journal::default();
    let mut callbacks = journal.callbacks();

    let err = socket.open("not a url????", &mut callbacks).unwrap_err();
    drop(callbacks);

    assert_eq!(err.code(), codes::INVALID_ARGUMENT);
    assert!(journal.entries().is_empty());
    assert_eq!(socket.state(), ConnectionState::Closed);
}

pub fn pending_send_is_released_when_connect_fails<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let socket = Arc::new(make());
    let sender = {
        let socket = Arc::clone(&socket);
        thread::spawn(move || socket.send("never delivered"))
    };

    let journal = Journal::default();
    let mut callbacks = journal.callbacks();
    assert!(socket.open(&refused_url(), &mut callbacks).is_err());
    drop(callbacks);

    let sent = sender.join().expect("sender panicked");
    assert_eq!(sent.unwrap_err().code(), codes::ABORTED);
    assert_eq!(journal.entries(), vec!["error 4000 Connection failed.".to_string()]);
}

pub fn fragments_are_delivered_once_reassembled<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::Fragmented(vec!["Hel", "lo ", "World"]));
    let socket = Arc::new(make());
    let (journal, opener) = open_in_background(&socket, &server.url);

    journal.wait_for("message ", 1);
    socket.close();
    opener.join().expect("opener panicked").expect("open");

    assert_eq!(journal.count("message "), 1);
    assert!(journal.entries().contains(&"message Hello World".to_string()));
}

pub fn remote_close_reports_error_then_close<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::RemoteClose(1001, "going away"));
    let socket = Arc::new(make());
    let (journal, opener) = open_in_background(&socket, &server.url);

    opener.join().expect("opener panicked").expect("open");

    let entries = journal.entries();
    assert_eq!(&entries[1..], ["error 1001 going away", "close 1001 going away"]);
    assert_eq!(socket.state(), ConnectionState::Closed);
}

pub fn request_headers_reach_the_server<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::Echo);
    let socket = Arc::new(make());
    socket.add_header("X-Protocol-Version", "1.0").unwrap();
    socket.add_header("X-Protocol-Version", "2.0").unwrap();
    socket.add_header("X-Auth-Token", "secret").unwrap();

    let (journal, opener) = open_in_background(&socket, &server.url);
    let headers = server.request_headers();
    journal.wait_for("connect ", 1);
    assert_eq!(socket.add_header("X-Late", "1").unwrap_err().code(), codes::ILLEGAL_STATE);

    socket.close();
    opener.join().expect("opener panicked").expect("open");

    let value = |name: &str| headers.iter().find(|(n, _)| n == name).map(|(_, v)| v.clone());
    assert_eq!(value("x-protocol-version").as_deref(), Some("2.0"));
    assert_eq!(value("x-auth-token").as_deref(), Some("secret"));
}

/// `binary_is_reported`: whether `read` surfaces the binary frame as an error
/// instead of skipping it.
pub fn read_inside_on_connect<W: WebSocket + 'static>(make: fn() -> W, binary_is_reported: bool) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::BinaryThenText);
    let socket = make();
    let reads = Mutex::new(Vec::new());

    let mut callbacks = Callbacks::new().on_connect(|socket: &W, _| {
        let mut reads = reads.lock();
        if binary_is_reported {
            reads.push(socket.read().map_err(|e| e.code()));
        }
        reads.push(socket.read().map_err(|e| e.code()));
        socket.close();
    });
    socket.open(&server.url, &mut callbacks).expect("open");
    drop(callbacks);

    let mut expected = Vec::new();
    if binary_is_reported {
        expected.push(Err(codes::INVALID_PROTOCOL_FORMAT));
    }
    expected.push(Ok("after binary".to_string()));
    assert_eq!(reads.into_inner(), expected);
}

pub fn callbacks_may_send_and_close<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::Echo);
    let socket = make();
    let journal = Journal::default();

    let mut callbacks = Callbacks::new()
        .on_connect(|socket: &W, _| {
            socket.send("first").expect("send from on_connect");
        })
        .on_message(|socket: &W, message| {
            journal.push(format!("message {}", message));
            match message {
                "first" => socket.send("second").expect("send from on_message"),
                _ => socket.close(),
            }
        })
        .on_close(|_, code, reason| journal.push(format!("close {} {}", code, reason)));
    socket.open(&server.url, &mut callbacks).expect("open");
    drop(callbacks);

    assert_eq!(journal.entries(), vec!["message first", "message second", "close 1000 Close requested"]);
}

pub fn close_releases_a_blocked_read<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::Echo);
    let socket = Arc::new(make());
    let (journal, opener) = open_in_background(&socket, &server.url);
    journal.wait_for("connect ", 1);

    let (read_tx, read_rx) = unbounded();
    let reader = {
        let socket = Arc::clone(&socket);
        thread::spawn(move || {
            let _ = read_tx.send(socket.read().map_err(|e| e.code()));
        })
    };
    thread::sleep(Duration::from_millis(50));
    assert!(read_rx.try_recv().is_err(), "read returned before anything happened");

    socket.close();
    opener.join().expect("opener panicked").expect("open");

    let read = read_rx.recv_timeout(WAIT_LIMIT).expect("read still blocked after close");
    assert_eq!(read, Err(codes::ABORTED));
    reader.join().expect("reader panicked");
    assert_eq!(socket.read().unwrap_err().code(), codes::ABORTED);
    assert_eq!(socket.try_read().unwrap_err().code(), codes::ABORTED);

    assert_eq!(
        journal.entries(),
        vec![format!("connect Connected to: {}", server.url), format!("close 1000 {}", DEFAULT_CLOSE_REASON)]
    );
}

pub fn close_during_the_handshake_still_connects_first<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::SlowHandshake(Duration::from_millis(200)));
    let socket = Arc::new(make());
    let (journal, opener) = open_in_background(&socket, &server.url);

    // The server has the upgrade request but has not answered yet
    server.request_headers();
    assert_eq!(socket.state(), ConnectionState::Opening);
    socket.close();

    opener.join().expect("opener panicked").expect("open");
    assert_eq!(socket.send("too late").unwrap_err().code(), codes::ABORTED);
    assert_eq!(
        journal.entries(),
        vec![format!("connect Connected to: {}", server.url), format!("close 1000 {}", DEFAULT_CLOSE_REASON)]
    );
    assert_eq!(socket.state(), ConnectionState::Closed);
}

/// Polls `try_read` from `on_connect`, before the receive loop can take the message.
pub fn try_read_returns_a_pending_message<W: WebSocket + 'static>(make: fn() -> W) {
    init_tracing();
    let server = TestServer::spawn(Behaviour::Greeting("welcome"));
    let socket = make();
    let pending = Mutex::new(None);

    let mut callbacks = Callbacks::new().on_connect(|socket: &W, _| {
        let deadline = Instant::now() + WAIT_LIMIT;
        while Instant::now() < deadline {
            match socket.try_read() {
                Ok(Some(text)) => {
                    *pending.lock() = Some(text);
                    break;
                },
                Ok(None) => thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("try_read failed: {}", e),
            }
        }
        socket.close();
    });
    socket.open(&server.url, &mut callbacks).expect("open");
    drop(callbacks);

    assert_eq!(pending.into_inner().as_deref(), Some("welcome"));
}
