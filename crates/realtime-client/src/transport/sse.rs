//! Streaming HTTP transport.
//!
//! Reads `text/event-stream` framing (`data:` lines terminated by a blank
//! line). Bare non-empty lines are accepted as newline-delimited JSON so the
//! same endpoint can also stream NDJSON.

use super::{PushTransport, TransportSignal, SIGNAL_BUFFER};
use crate::RealtimeResult;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const IGNORED_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Longest line, or event payload, the decoder will buffer.
pub(crate) const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Server-sent events over a long-lived HTTP GET.
#[derive(Debug, Clone)]
pub struct SseTransport {
    http: Client,
}

impl SseTransport {
    pub fn new() -> RealtimeResult<Self> {
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self { http })
    }

    /// Use an existing HTTP client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

impl PushTransport for SseTransport {
    fn open(&self, url: Url) -> mpsc::Receiver<TransportSignal> {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        let http = self.http.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = run_channel(http, url, &tx) => {}
                _ = tx.closed() => debug!("Push channel receiver dropped"),
            }
        });
        rx
    }
}

async fn run_channel(http: Client, url: Url, tx: &mpsc::Sender<TransportSignal>) {
    let response = match http
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(TransportSignal::closed(e.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let _ = tx
            .send(TransportSignal::closed(format!("server answered {status}")))
            .await;
        return;
    }

    if tx.send(TransportSignal::Ready).await.is_err() {
        return;
    }

    let mut decoder = FrameDecoder::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(TransportSignal::closed(e.to_string())).await;
                return;
            }
        };
        let frames = match decoder.push(&chunk) {
            Ok(frames) => frames,
            Err(e) => {
                let _ = tx.send(TransportSignal::closed(e.to_string())).await;
                return;
            }
        };
        for frame in frames {
            if tx.send(frame_signal(frame)).await.is_err() {
                return;
            }
        }
    }

    for frame in decoder.finish() {
        if tx.send(frame_signal(frame)).await.is_err() {
            return;
        }
    }
    let _ = tx.send(TransportSignal::closed("stream ended")).await;
}

fn frame_signal(frame: Result<String, String>) -> TransportSignal {
    match frame {
        Ok(message) => TransportSignal::Message(message),
        Err(reason) => TransportSignal::transient(reason),
    }
}

/// A pushed line or event grew past the decoder's limit.
#[derive(Debug, Error)]
#[error("pushed frame exceeds {limit} bytes")]
pub(crate) struct FrameTooLarge {
    limit: usize,
}

/// Incremental line decoder for event-stream and NDJSON bodies.
#[derive(Debug)]
pub(crate) struct FrameDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_len: 0,
            limit,
        }
    }

    /// Feed raw bytes; returns complete messages (or per-line decode errors).
    ///
    /// Fails once a single line or event outgrows the limit; the stream
    /// cannot be resynchronized after that.
    pub(crate) fn push(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<Result<String, String>>, FrameTooLarge> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            if pos > self.limit {
                return Err(self.too_large());
            }
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match String::from_utf8(line) {
                Ok(line) => self.line(&line, &mut out)?,
                Err(_) => out.push(Err("invalid UTF-8 in pushed line".to_string())),
            }
        }
        self.scanned = self.buffer.len();
        if self.buffer.len() > self.limit {
            return Err(self.too_large());
        }
        Ok(out)
    }

    /// Flush whatever is left once the body ends.
    pub(crate) fn finish(&mut self) -> Vec<Result<String, String>> {
        let mut out = Vec::new();
        self.scanned = 0;
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            match String::from_utf8(rest) {
                Ok(line) => {
                    if let Err(e) = self.line(line.trim_end_matches('\r'), &mut out) {
                        out.push(Err(e.to_string()));
                    }
                }
                Err(_) => out.push(Err("invalid UTF-8 in pushed line".to_string())),
            }
        }
        self.flush_data(&mut out);
        out
    }

    fn line(
        &mut self,
        line: &str,
        out: &mut Vec<Result<String, String>>,
    ) -> Result<(), FrameTooLarge> {
        if line.is_empty() {
            self.flush_data(out);
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_len += value.len() + 1;
            if self.data_len > self.limit {
                return Err(self.too_large());
            }
            self.data.push(value.to_string());
        } else if line.starts_with(':') || IGNORED_FIELDS.iter().any(|f| line.starts_with(f)) {
            // comments and fields we have no use for
        } else if !line.trim().is_empty() {
            out.push(Ok(line.to_string()));
        }
        Ok(())
    }

    fn flush_data(&mut self, out: &mut Vec<Result<String, String>>) {
        if !self.data.is_empty() {
            out.push(Ok(self.data.join("\n")));
            self.data.clear();
        }
        self.data_len = 0;
    }

    fn too_large(&mut self) -> FrameTooLarge {
        self.buffer.clear();
        self.scanned = 0;
        self.data.clear();
        self.data_len = 0;
        FrameTooLarge { limit: self.limit }
    }
}
