//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;

use edge_router::config::{PathPattern, RouteConfig, RouterConfig};
use edge_router::{HttpServer, Shutdown};

/// A request as seen by a mock backend.
#[derive(Debug, Clone)]
pub struct Received {
    pub head: String,
    pub body_len: usize,
}

impl Received {
    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// Status code, when the head is a response head.
    pub fn status(&self) -> Option<u16> {
        self.request_line().split_whitespace().nth(1)?.parse().ok()
    }
}

/// Read up to the end of a message head. Returns the buffer and the head length.
async fn read_head(socket: &mut TcpStream) -> Option<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return Some((buf, pos + 4));
        }
    }
}

/// Read one HTTP/1.1 request with a Content-Length body.
pub async fn read_request(socket: &mut TcpStream) -> Option<Received> {
    let mut chunk = [0u8; 8192];
    let (buf, head_end) = read_head(socket).await?;

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut received = Received { head, body_len: 0 };
    let expected: usize = received
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut have = buf.len() - head_end;
    while have < expected {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        have += n;
    }
    received.body_len = have;
    Some(received)
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Start a mock backend that returns a fixed body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let (listener, addr) = bind_local().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_request(&mut socket).await;
                respond(&mut socket, "200 OK", response).await;
            });
        }
    });
    addr
}

/// Start a backend that answers with the request it received.
///
/// The body is the raw request head; `x-body-len` carries the number of body
/// bytes read.
pub async fn start_echo_backend() -> SocketAddr {
    let (listener, addr) = bind_local().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Some(received) = read_request(&mut socket).await else {
                    return;
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nx-body-len: {}\r\n\
                     Connection: close\r\n\r\n{}",
                    received.head.len(),
                    received.body_len,
                    received.head
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start a backend that counts accepted connections.
pub async fn start_counting_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let (listener, addr) = bind_local().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = read_request(&mut socket).await;
                respond(&mut socket, "200 OK", "counted").await;
            });
        }
    });
    (addr, accepted)
}

/// Start a backend that reads the request, then waits `delay` before answering.
pub async fn start_slow_backend(delay: Duration) -> SocketAddr {
    let (listener, addr) = bind_local().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = read_request(&mut socket).await;
                tokio::time::sleep(delay).await;
                respond(&mut socket, "200 OK", "late").await;
            });
        }
    });
    addr
}

/// Start a backend that reads one request per connection and never answers.
///
/// Reports `"request"` once a request head arrives and `"closed"` when the
/// proxy side of that connection goes away.
pub async fn start_hanging_backend() -> (SocketAddr, mpsc::UnboundedReceiver<&'static str>) {
    let (listener, addr) = bind_local().await;
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if read_request(&mut socket).await.is_none() {
                    return;
                }
                let _ = tx.send("request");
                let mut chunk = [0u8; 1024];
                while let Ok(n) = socket.read(&mut chunk).await {
                    if n == 0 {
                        break;
                    }
                }
                let _ = tx.send("closed");
            });
        }
    });
    (addr, rx)
}

/// A listener whose accept queue is full, so new connection attempts hang.
pub struct Unresponsive {
    pub addr: SocketAddr,
    _listener: TcpListener,
    _queued: Vec<TcpStream>,
}

pub async fn start_unresponsive_listener() -> Unresponsive {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = socket.local_addr().unwrap();
    let listener = socket.listen(0).unwrap();

    // Never accepted; once the queue is full further SYNs are dropped.
    let mut queued = Vec::new();
    for _ in 0..8 {
        match tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => queued.push(stream),
            _ => break,
        }
    }
    Unresponsive {
        addr,
        _listener: listener,
        _queued: queued,
    }
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let (listener, addr) = bind_local().await;
    drop(listener);
    addr
}

/// Route helper for prefix routes.
pub fn prefix(name: &str, prefix: &str, upstream: SocketAddr) -> RouteConfig {
    RouteConfig::new(name, PathPattern::Prefix(prefix.into()), upstream.to_string())
}

/// A running proxy. Dropping it shuts the server down.
pub struct TestProxy {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the proxy on an ephemeral port with `routes`.
pub async fn start_proxy(routes: Vec<RouteConfig>) -> TestProxy {
    let config = RouterConfig {
        routes,
        ..RouterConfig::default()
    };
    start_proxy_with(config).await
}

pub async fn start_proxy_with(config: RouterConfig) -> TestProxy {
    let server = HttpServer::new(config).unwrap();
    let (listener, addr) = bind_local().await;
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(server.run(listener, receiver));
    TestProxy { addr, shutdown }
}

/// Open a raw client connection to `addr` and write `bytes`.
pub async fn raw_send(addr: SocketAddr, bytes: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    stream
}

/// Write `bytes` one at a time with `gap` before each.
pub async fn dribble(stream: &mut TcpStream, bytes: &[u8], gap: Duration) {
    for byte in bytes {
        tokio::time::sleep(gap).await;
        stream.write_all(std::slice::from_ref(byte)).await.unwrap();
    }
}

/// Read a response head from a raw client connection.
pub async fn read_response_head(stream: &mut TcpStream) -> Option<Received> {
    let (buf, head_end) = read_head(stream).await?;
    Some(Received {
        head: String::from_utf8_lossy(&buf[..head_end]).into_owned(),
        body_len: buf.len() - head_end,
    })
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
