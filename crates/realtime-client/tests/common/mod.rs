#![allow(dead_code)]

use parking_lot::Mutex;
use realtime_client::{
    listener, BackoffPolicy, EventEnvelope, Listener, PlatformBus, PushTransport, RealtimeClient,
    RealtimeConfig, TransportSignal,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;
use user_state_store::{MemoryStateStorage, SnapshotCache};

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// One channel opened through [`ScriptedTransport`].
pub struct OpenedChannel {
    pub url: Url,
    pub tx: Option<mpsc::Sender<TransportSignal>>,
    pub at: Instant,
}

/// Transport whose channels are driven by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    opened: Mutex<Vec<OpenedChannel>>,
}

impl ScriptedTransport {
    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn channel(&self, index: usize) -> mpsc::Sender<TransportSignal> {
        self.opened.lock()[index]
            .tx
            .clone()
            .expect("channel sender was dropped")
    }

    /// Drop the transport's side of a channel without a closing signal.
    pub fn forget(&self, index: usize) {
        self.opened.lock()[index].tx = None;
    }

    pub fn opened_at(&self, index: usize) -> Instant {
        self.opened.lock()[index].at
    }

    pub fn url(&self, index: usize) -> Url {
        self.opened.lock()[index].url.clone()
    }

    pub fn token(&self, index: usize) -> Option<String> {
        self.url(index)
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
    }

    pub async fn ready(&self, index: usize) {
        self.channel(index).send(TransportSignal::Ready).await.unwrap();
    }

    pub async fn push(&self, index: usize, raw: &str) {
        self.channel(index)
            .send(TransportSignal::Message(raw.to_string()))
            .await
            .unwrap();
    }

    pub async fn fail(&self, index: usize) {
        self.channel(index)
            .send(TransportSignal::closed("connection reset"))
            .await
            .unwrap();
    }
}

impl PushTransport for ScriptedTransport {
    fn open(&self, url: Url) -> mpsc::Receiver<TransportSignal> {
        let (tx, rx) = mpsc::channel(16);
        self.opened.lock().push(OpenedChannel {
            url,
            tx: Some(tx),
            at: Instant::now(),
        });
        rx
    }
}

pub struct Harness {
    pub client: RealtimeClient,
    pub transport: Arc<ScriptedTransport>,
    pub bus: PlatformBus,
    pub storage: Arc<MemoryStateStorage>,
}

pub fn harness() -> Harness {
    harness_with_policy(BackoffPolicy::default())
}

pub fn harness_with_policy(backoff: BackoffPolicy) -> Harness {
    let transport = Arc::new(ScriptedTransport::default());
    let storage = Arc::new(MemoryStateStorage::new());
    let bus = PlatformBus::default();
    let config = RealtimeConfig {
        api_url: "http://127.0.0.1:9/api".to_string(),
        backoff,
        ..RealtimeConfig::default()
    };
    let client = RealtimeClient::with_transport(
        config,
        SnapshotCache::new(storage.clone()),
        bus.clone(),
        transport.clone(),
    )
    .unwrap();

    Harness {
        client,
        transport,
        bus,
        storage,
    }
}

/// Let spawned tasks process everything already sent.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Listener that records every envelope it sees.
pub fn recorder() -> (Listener, Arc<Mutex<Vec<EventEnvelope>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (listener(move |env| sink.lock().push(env.clone())), seen)
}

/// Listener that appends `name` to a shared log.
pub fn tagged(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener {
    let log = Arc::clone(log);
    listener(move |env| log.lock().push(format!("{name}:{}", env.kind)))
}

// ---------------------------------------------------------------------------
// Minimal HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    status: String,
    content_type: &'static str,
    body: String,
    streaming: bool,
}

impl MockResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status: status_line(status),
            content_type: "application/json",
            body: body.to_string(),
            streaming: false,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status: status_line(status),
            content_type: "text/plain",
            body: body.to_string(),
            streaming: false,
        }
    }

    /// An event stream that is written out and then closed by the server.
    pub fn event_stream(body: &str) -> Self {
        Self {
            status: status_line(200),
            content_type: "text/event-stream",
            body: body.to_string(),
            streaming: true,
        }
    }

    fn render(&self) -> String {
        if self.streaming {
            format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n{}",
                self.status, self.content_type, self.body
            )
        } else {
            format!(
                "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                self.status,
                self.content_type,
                self.body.len(),
                self.body
            )
        }
    }
}

fn status_line(status: u16) -> String {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    };
    format!("{status} {reason}")
}

/// Serves canned responses by request path; unknown paths get a 404.
pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    pub async fn start(routes: Vec<(&'static str, MockResponse)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes: Arc<HashMap<&'static str, MockResponse>> = Arc::new(routes.into_iter().collect());

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let routes = Arc::clone(&routes);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, &routes, &recorded).await;
                });
            }
        });

        Self {
            base_url: format!("http://{addr}/api"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path() == path)
            .collect()
    }
}

async fn handle_connection(
    stream: TcpStream,
    routes: &HashMap<&'static str, MockResponse>,
    recorded: &Mutex<Vec<RecordedRequest>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    let request = RecordedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let response = routes
        .get(request.path())
        .cloned()
        .unwrap_or_else(|| MockResponse::text(404, "not found"));
    recorded.lock().push(request);

    let mut stream = reader.into_inner();
    stream.write_all(response.render().as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
