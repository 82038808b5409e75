// Common test utilities for integration tests
// A scripted in-process STOMP broker, a tiny HTTP responder and wait helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, LevelFilter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use planit_chat::stomp::{Command, Frame, FrameDecoder};
use planit_chat::{ClientConfig, InboundMessage, SenderRole};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

pub const TEST_TOKEN: &str = "test-token";

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Client config pointed at `ws_url` with short timings and heart-beats off
pub fn test_config(ws_url: &str) -> ClientConfig {
    ClientConfig::new("http://127.0.0.1:9/api/v1")
        .and_then(|c| c.with_ws_url(ws_url))
        .expect("valid test config")
        .with_reconnect_delay(Duration::from_millis(200))
        .with_heartbeat(Duration::ZERO)
        .with_connect_timeout(Duration::from_secs(2))
}

pub fn server_message(id: i64, content: &str, sender_id: i64, correlation: Option<&str>) -> InboundMessage {
    InboundMessage {
        id,
        content: content.to_string(),
        sent_at: chrono::Utc::now(),
        sender_id,
        sender_name: format!("User {}", sender_id),
        sender_role: SenderRole::Planner,
        client_msg_id: correlation.map(str::to_string),
    }
}

pub fn server_message_json(id: i64, content: &str, sender_id: i64, correlation: Option<&str>) -> String {
    serde_json::to_string(&server_message(id, content, sender_id, correlation)).expect("serializable message")
}

/// Poll `condition` until it holds or `limit` elapses
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

//------------------------------------------------------------------------------
// FAKE STOMP BROKER
//------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Accepted(usize),
    Frame(usize, Frame),
    Closed(usize),
}

enum Control {
    Deliver(String),
    Drop,
}

pub struct FakeBroker {
    pub url: String,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>,
}

impl FakeBroker {
    /// Accepts any CONNECT carrying `Bearer <expected_token>`; others get ERROR
    pub async fn start(expected_token: &str) -> FakeBroker {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind broker");
        let addr = listener.local_addr().expect("broker address");
        let (events_tx, events) = mpsc::unbounded_channel();
        let current = Arc::new(Mutex::new(None));

        let expected = format!("Bearer {}", expected_token);
        let current_for_accept = current.clone();
        tokio::spawn(async move {
            let mut connection_no = 0;
            while let Ok((stream, _)) = listener.accept().await {
                connection_no += 1;
                tokio::spawn(serve_connection(
                    stream,
                    connection_no,
                    expected.clone(),
                    events_tx.clone(),
                    current_for_accept.clone(),
                ));
            }
        });

        FakeBroker {
            url: format!("ws://{}/ws/websocket", addr),
            events,
            current,
        }
    }

    pub async fn next_event(&mut self, limit: Duration) -> Option<BrokerEvent> {
        timeout(limit, self.events.recv()).await.ok().flatten()
    }

    /// Skip events until a frame with `command` arrives
    pub async fn expect_frame(&mut self, command: Command, limit: Duration) -> (usize, Frame) {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_event(remaining).await {
                Some(BrokerEvent::Frame(conn, frame)) if frame.command == command => return (conn, frame),
                Some(other) => debug!("Broker skipping event {:?}", other),
                None => panic!("Timed out waiting for {:?} frame", command),
            }
        }
    }

    /// Skip events until connection `conn` is closed
    pub async fn expect_closed(&mut self, conn: usize, limit: Duration) {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.next_event(remaining).await {
                Some(BrokerEvent::Closed(closed)) if closed == conn => return,
                Some(_) => {}
                None => panic!("Timed out waiting for connection {} to close", conn),
            }
        }
    }

    /// Push a MESSAGE with `body` to the current subscription
    pub fn deliver(&self, body: &str) {
        self.control(Control::Deliver(body.to_string()));
    }

    /// Kill the current connection without a close handshake
    pub fn drop_connection(&self) {
        self.control(Control::Drop);
    }

    fn control(&self, control: Control) {
        let guard = self.current.lock().expect("broker lock");
        let sender = guard.as_ref().expect("no active broker connection");
        let _ = sender.send(control);
    }
}

async fn serve_connection(
    stream: TcpStream,
    conn: usize,
    expected_auth: String,
    events: mpsc::UnboundedSender<BrokerEvent>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Control>>>>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Broker handshake failed: {}", e);
            return;
        }
    };
    let (mut sink, mut source) = ws.split();
    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    if let Ok(mut guard) = current.lock() {
        *guard = Some(control_tx);
    }
    let _ = events.send(BrokerEvent::Accepted(conn));

    let mut decoder = FrameDecoder::new();
    let mut subscription: Option<(String, String)> = None;
    let mut message_no = 0;

    'serve: loop {
        tokio::select! {
            incoming = source.next() => {
                let text = match incoming {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break 'serve,
                    Some(Ok(_)) => continue,
                };
                let frames = match decoder.push(&text) {
                    Ok(frames) => frames,
                    Err(_) => break 'serve,
                };
                for frame in frames {
                    let _ = events.send(BrokerEvent::Frame(conn, frame.clone()));
                    match frame.command {
                        Command::Connect | Command::Stomp => {
                            let reply = if frame.header("Authorization") == Some(expected_auth.as_str()) {
                                Frame::new(Command::Connected)
                                    .with_header("version", "1.2")
                                    .with_header("heart-beat", "0,0")
                            } else {
                                Frame::new(Command::Error).with_header("message", "Unauthorized")
                            };
                            let rejected = reply.command == Command::Error;
                            if sink.send(WsMessage::Text(reply.encode())).await.is_err() || rejected {
                                break 'serve;
                            }
                        }
                        Command::Subscribe => {
                            let id = frame.header("id").unwrap_or_default().to_string();
                            let destination = frame.header("destination").unwrap_or_default().to_string();
                            subscription = Some((id, destination));
                        }
                        Command::Unsubscribe => subscription = None,
                        Command::Disconnect => {
                            if let Some(receipt) = frame.header("receipt") {
                                let reply = Frame::new(Command::Receipt).with_header("receipt-id", receipt);
                                let _ = sink.send(WsMessage::Text(reply.encode())).await;
                            }
                        }
                        _ => {}
                    }
                }
            }
            control = control_rx.recv() => match control {
                Some(Control::Deliver(body)) => {
                    let Some((id, destination)) = &subscription else {
                        debug!("Broker has no subscription, dropping delivery");
                        continue;
                    };
                    message_no += 1;
                    let frame = Frame::new(Command::Message)
                        .with_header("subscription", id)
                        .with_header("destination", destination)
                        .with_header("message-id", &message_no.to_string())
                        .with_header("content-type", "application/json")
                        .with_body(body);
                    if sink.send(WsMessage::Text(frame.encode())).await.is_err() {
                        break 'serve;
                    }
                }
                Some(Control::Drop) | None => break 'serve,
            }
        }
    }

    let _ = events.send(BrokerEvent::Closed(conn));
}

//------------------------------------------------------------------------------
// FAKE HTTP API
//------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

pub struct FakeApi {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl FakeApi {
    /// Serve `routes` ("GET /api/v1/inquiries/my" -> (status, body)); anything else is 404
    pub async fn start(routes: Vec<(&str, u16, String)>) -> FakeApi {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind api");
        let addr = listener.local_addr().expect("api address");
        let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
            routes
                .into_iter()
                .map(|(route, status, body)| (route.to_string(), (status, body)))
                .collect(),
        );
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_http(stream, routes.clone(), recorded.clone()));
            }
        });

        FakeApi {
            base_url: format!("http://{}/api/v1", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

async fn serve_http(
    mut stream: TcpStream,
    routes: Arc<HashMap<String, (u16, String)>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buffer.extend_from_slice(&chunk[..n]),
        }
    }
    let body_end = buffer.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buffer[header_end..body_end]).to_string();

    let route = format!("{} {}", method, path);
    if let Ok(mut recorded) = requests.lock() {
        recorded.push(RecordedRequest {
            method,
            path,
            headers,
            body,
        });
    }

    let (status, response_body) = routes
        .get(&route)
        .cloned()
        .unwrap_or((404, r#"{"success":false,"message":"Not found","data":null}"#.to_string()));
    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        response_body.len(),
        response_body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
