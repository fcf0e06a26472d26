//! Shared utilities for integration tests: scriptable raw-TCP HTTP backends.

#![allow(dead_code)]

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use voice_dialogue::config::{DialogueConfig, EndpointConfig};

/// What the mock saw.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }
}

/// Response script: status, content type, and body parts each sent after a delay.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub content_type: &'static str,
    pub parts: Vec<(Duration, Vec<u8>)>,
}

impl MockReply {
    pub fn ok(content_type: &'static str, parts: Vec<(Duration, Vec<u8>)>) -> Self {
        Self {
            status: 200,
            content_type,
            parts,
        }
    }

    pub fn audio(delay: Duration, bytes: &[u8]) -> Self {
        Self::ok("audio/mpeg", vec![(delay, bytes.to_vec())])
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            parts: vec![(Duration::ZERO, body.as_bytes().to_vec())],
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        402 => "Payment Required",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    })
}

async fn write_reply(socket: &mut TcpStream, method: &str, reply: MockReply) {
    if method == "HEAD" {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            reply.status,
            reason(reply.status)
        );
        let _ = socket.write_all(head.as_bytes()).await;
        return;
    }

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        reply.status,
        reason(reply.status),
        reply.content_type
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for (delay, part) in reply.parts {
        tokio::time::sleep(delay).await;
        if part.is_empty() {
            continue;
        }
        let mut frame = format!("{:x}\r\n", part.len()).into_bytes();
        frame.extend_from_slice(&part);
        frame.extend_from_slice(b"\r\n");
        if socket.write_all(&frame).await.is_err() {
            return;
        }
        let _ = socket.flush().await;
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

/// Start a backend on an ephemeral port; `handler` scripts every reply.
pub async fn start_backend<F>(handler: F) -> SocketAddr
where
    F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    let reply = handler(&request);
                    write_reply(&mut socket, &request.method, reply).await;
                }
            });
        }
    });
    addr
}

/// Synthesis replica: answers warm-ups with 200 and speech with `speak(text)`.
pub async fn start_synthesis_backend<F>(speak: F) -> SocketAddr
where
    F: Fn(&str) -> MockReply + Send + Sync + 'static,
{
    start_backend(move |request| {
        if request.method == "HEAD" {
            return MockReply::status(200, "");
        }
        let text = request.json()["text"].as_str().unwrap_or_default().to_string();
        speak(&text)
    })
    .await
}

/// OpenAI-compatible backend streaming `tokens` as SSE deltas.
pub async fn start_llm_backend(tokens: &'static [&'static str]) -> SocketAddr {
    start_backend(move |_| {
        let mut parts: Vec<(Duration, Vec<u8>)> = tokens
            .iter()
            .map(|t| {
                let event = serde_json::json!({ "choices": [{ "delta": { "content": t } }] });
                (Duration::from_millis(2), format!("data: {event}\n\n").into_bytes())
            })
            .collect();
        parts.push((Duration::ZERO, b"data: [DONE]\n\n".to_vec()));
        MockReply::ok("text/event-stream", parts)
    })
    .await
}

/// OpenAI-compatible transcription backend answering every call with `text`.
pub async fn start_stt_backend(
    text: &'static str,
) -> (SocketAddr, Arc<std::sync::Mutex<Vec<RecordedRequest>>>) {
    let seen: Arc<std::sync::Mutex<Vec<RecordedRequest>>> = Arc::default();
    let log = seen.clone();
    let addr = start_backend(move |request| {
        log.lock().unwrap().push(request.clone());
        let body = serde_json::json!({ "text": text }).to_string();
        MockReply::ok("application/json", vec![(Duration::ZERO, body.into_bytes())])
    })
    .await;
    (addr, seen)
}

pub fn endpoint(id: &str, addr: SocketAddr) -> EndpointConfig {
    EndpointConfig {
        id: id.to_string(),
        base_url: format!("http://{addr}"),
        api_key: format!("{id}-key"),
        max_concurrent: 4,
    }
}

/// Config with short timeouts pointing at the given mocks.
pub fn test_config(endpoints: Vec<EndpointConfig>, llm: Option<SocketAddr>) -> DialogueConfig {
    let mut config = DialogueConfig::default();
    config.synthesis.endpoints = endpoints;
    config.synthesis.request_timeout_ms = 2_000;
    config.synthesis.warmup_timeout_ms = 500;
    config.synthesis.backoff.base_delay_ms = 60_000;
    config.synthesis.backoff.max_delay_ms = 120_000;
    if let Some(llm) = llm {
        config.llm.base_url = format!("http://{llm}");
        config.llm.api_key = "test".to_string();
    }
    config.admin.api_key = "admin-secret".to_string();
    config
}
