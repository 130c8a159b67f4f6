//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use transform_proxy::config::ProxyConfig;
use transform_proxy::handlers::HandlerSet;
use transform_proxy::http::HttpServer;
use transform_proxy::lifecycle::Shutdown;

/// What the mock upstream answers with.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Wait before writing anything.
    pub delay: Duration,
    /// Write the body in pieces of this size, pausing between them.
    pub chunk: Option<(usize, Duration)>,
    /// Write only this many body bytes, then hang.
    pub stall_after: Option<usize>,
}

impl MockResponse {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status: 200,
            headers: vec![
                ("Content-Type".to_string(), content_type.to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
            ],
            body,
            delay: Duration::ZERO,
            chunk: None,
            stall_after: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn trickled(mut self, size: usize, pause: Duration) -> Self {
        self.chunk = Some((size, pause));
        self
    }

    pub fn stalled_after(mut self, bytes: usize) -> Self {
        self.stall_after = Some(bytes);
        self
    }
}

/// A request as received by the mock upstream.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Handle on a running mock upstream.
#[derive(Clone)]
pub struct MockUpstream {
    pub addr: SocketAddr,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    aborted: Arc<AtomicBool>,
}

impl MockUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests.lock().unwrap().last().cloned().expect("no request recorded")
    }

    /// Whether a body write failed because the reader went away.
    pub fn aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Wait up to `limit` for a body write to fail.
    pub async fn wait_aborted(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if self.aborted() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.aborted()
    }
}

/// Start a mock upstream answering every request with `response`.
pub async fn start_mock_upstream(response: MockResponse) -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = MockUpstream {
        addr: listener.local_addr().unwrap(),
        calls: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
        aborted: Arc::new(AtomicBool::new(false)),
    };

    let handle = upstream.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handle = handle.clone();
            let response = response.clone();
            tokio::spawn(async move {
                serve_one(socket, handle, response).await;
            });
        }
    });
    upstream
}

async fn serve_one(mut socket: TcpStream, upstream: MockUpstream, response: MockResponse) {
    let Some(request) = read_request(&mut socket).await else {
        return;
    };
    upstream.calls.fetch_add(1, Ordering::SeqCst);
    upstream.requests.lock().unwrap().push(request);

    tokio::time::sleep(response.delay).await;

    let mut head = format!("HTTP/1.1 {} Mock\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");

    if socket.write_all(head.as_bytes()).await.is_err() {
        upstream.aborted.store(true, Ordering::SeqCst);
        return;
    }

    let body = match response.stall_after {
        Some(bytes) => &response.body[..bytes.min(response.body.len())],
        None => &response.body[..],
    };
    let (size, pause) = response.chunk.unwrap_or((body.len().max(1), Duration::ZERO));
    for piece in body.chunks(size) {
        if socket.write_all(piece).await.is_err() {
            upstream.aborted.store(true, Ordering::SeqCst);
            return;
        }
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    if response.stall_after.is_some() {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut request = RecordedRequest {
        head,
        body: buf[head_end..].to_vec(),
    };
    let expected: usize = request
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while request.body.len() < expected {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        request.body.extend_from_slice(&chunk[..n]);
    }
    Some(request)
}

/// A configuration pointing at `upstream`, listening on an ephemeral port.
pub fn config_for(upstream: &MockUpstream) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.url = upstream.url();
    config
}

/// Start the proxy; the returned `Shutdown` stops it.
pub async fn start_proxy(config: ProxyConfig, handlers: HandlerSet) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config, handlers).unwrap();
    let shutdown = Shutdown::new();
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    (addr, shutdown)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
