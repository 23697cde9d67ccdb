//! CDP Transport Layer
//!
//! Talks to Chrome over its DevTools WebSocket with a hand-rolled client:
//! no heavyweight protocol crate, built-in filtering of CDP commands that
//! anti-bot scripts can detect, and per-session event routing so concurrent
//! extraction attempts never see each other's network traffic.
//!
//! A channel-backed mock variant stands in for Chrome in tests; everything
//! above this layer (connection, session, page, pipeline) runs unchanged
//! on top of it.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::cdp::mock::MockState;
use crate::error::{Error, Result};

/// Commands that are blocked outright (highly detectable by anti-bot probes)
const BLOCKED_COMMANDS: &[&str] = &[
    "Runtime.enable",
    "Runtime.disable",
    "HeapProfiler.enable",
    "HeapProfiler.disable",
    "Profiler.enable",
    "Profiler.disable",
    "Debugger.enable",
    "Debugger.disable",
    "Console.enable",
    "Console.disable",
];

fn is_blocked(method: &str) -> bool {
    BLOCKED_COMMANDS.contains(&method)
}

/// A pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Value>>;

/// Per-session event subscribers. A plain mutex: touched only for short
/// map operations, from both the reader thread and async tasks.
type EventRoutes = Arc<StdMutex<HashMap<String, mpsc::Sender<CdpEvent>>>>;

/// An event pushed by the browser
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

mod ws {
    pub const OPCODE_TEXT: u8 = 0x1;
    pub const OPCODE_CLOSE: u8 = 0x8;
    pub const OPCODE_PING: u8 = 0x9;
    pub const OPCODE_PONG: u8 = 0xA;
}

/// Write one masked text frame (clients must mask, RFC 6455)
fn write_ws_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let len = data.len();
    let mut frame = Vec::with_capacity(14 + len);

    frame.push(0x80 | ws::OPCODE_TEXT);

    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len < 65536 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mask: [u8; 4] = rand::random();
    frame.extend_from_slice(&mask);
    frame.extend(data.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));

    stream.write_all(&frame)?;
    stream.flush()
}

/// Read one frame, returns (opcode, payload)
fn read_ws_frame(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    use std::io::Read;

    let mut header = [0u8; 2];
    stream.read_exact(&mut header)?;

    let opcode = header[0] & 0x0F;
    let masked = (header[1] & 0x80) != 0;
    let mut len = (header[1] & 0x7F) as usize;

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext)?;
        len = u16::from_be_bytes(ext) as usize;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext)?;
        len = u64::from_be_bytes(ext) as usize;
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        stream.read_exact(&mut m)?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;

    if let Some(mask) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    Ok((opcode, payload))
}

struct SocketInner {
    child: Mutex<Child>,
    writer: Mutex<TcpStream>,
    pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
}

enum Inner {
    Socket(SocketInner),
    Mock(Arc<MockState>),
}

/// CDP transport: sends commands, routes responses and events
pub struct Transport {
    inner: Inner,
    next_id: AtomicU64,
    routes: EventRoutes,
}

impl Transport {
    /// Connect to a freshly launched Chrome via its DevTools WebSocket URL
    pub fn connect(child: Child, ws_url: &str) -> Result<Self> {
        let url = ws_url.trim_start_matches("ws://");
        let (host_port, path) = url.split_once('/').unwrap_or((url, ""));
        let path = format!("/{}", path);

        let mut stream = TcpStream::connect(host_port)
            .map_err(|e| Error::transport_io("Failed to connect to Chrome", e))?;

        let key = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            rand::random::<[u8; 16]>(),
        );
        let handshake = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            path, host_port, key
        );

        use std::io::{Read, Write};
        stream
            .write_all(handshake.as_bytes())
            .map_err(|e| Error::transport_io("Handshake write failed", e))?;

        let mut response = [0u8; 1024];
        let n = stream
            .read(&mut response)
            .map_err(|e| Error::transport_io("Handshake read failed", e))?;
        let response_str = String::from_utf8_lossy(&response[..n]);
        if !response_str.contains("101") {
            return Err(Error::transport(format!(
                "WebSocket handshake failed: {}",
                response_str
            )));
        }

        tracing::debug!("WebSocket connected to {}", ws_url);

        let reader_stream = stream
            .try_clone()
            .map_err(|e| Error::transport_io("Failed to clone stream", e))?;

        let pending: Arc<Mutex<HashMap<u64, PendingRequest>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let routes: EventRoutes = Arc::new(StdMutex::new(HashMap::new()));

        let pending_clone = Arc::clone(&pending);
        let routes_clone = Arc::clone(&routes);
        std::thread::spawn(move || {
            Self::reader_loop(reader_stream, pending_clone, routes_clone);
        });

        Ok(Self {
            inner: Inner::Socket(SocketInner {
                child: Mutex::new(child),
                writer: Mutex::new(stream),
                pending,
            }),
            next_id: AtomicU64::new(1),
            routes,
        })
    }

    /// Build a transport backed by a scripted in-memory responder.
    /// See [`crate::cdp::mock`].
    pub(crate) fn mock(state: Arc<MockState>) -> Self {
        let routes: EventRoutes = Arc::new(StdMutex::new(HashMap::new()));
        state.set_routes(Arc::clone(&routes));
        Self {
            inner: Inner::Mock(state),
            next_id: AtomicU64::new(1),
            routes,
        }
    }

    fn reader_loop(
        mut stream: TcpStream,
        pending: Arc<Mutex<HashMap<u64, PendingRequest>>>,
        routes: EventRoutes,
    ) {
        loop {
            let (opcode, payload) = match read_ws_frame(&mut stream) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    break;
                }
            };

            match opcode {
                ws::OPCODE_TEXT => {
                    let Ok(text) = String::from_utf8(payload) else {
                        continue;
                    };
                    let msg: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!("Failed to parse CDP message: {}", e);
                            continue;
                        }
                    };

                    if let Some(id) = msg.get("id").and_then(|v| v.as_u64()) {
                        let result = match msg.get("error") {
                            Some(error) => Err(Error::cdp(
                                "unknown",
                                error.get("code").and_then(|c| c.as_i64()).unwrap_or(-1),
                                error
                                    .get("message")
                                    .and_then(|m| m.as_str())
                                    .unwrap_or("unknown"),
                            )),
                            None => Ok(msg.get("result").cloned().unwrap_or(json!({}))),
                        };

                        let mut pending_guard = pending.blocking_lock();
                        if let Some(sender) = pending_guard.remove(&id) {
                            let _ = sender.send(result);
                        }
                    } else if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
                        let event = CdpEvent {
                            method: method.to_string(),
                            params: msg.get("params").cloned().unwrap_or(json!({})),
                            session_id: msg
                                .get("sessionId")
                                .and_then(|s| s.as_str())
                                .map(String::from),
                        };
                        Self::route_event(&routes, event);
                    }
                }
                ws::OPCODE_PING => {
                    let frame = vec![0x80 | ws::OPCODE_PONG, 0x80, 0, 0, 0, 0];
                    let _ = std::io::Write::write_all(&mut stream, &frame);
                }
                ws::OPCODE_CLOSE => {
                    tracing::debug!("WebSocket closed by server");
                    break;
                }
                _ => {}
            }
        }

        tracing::debug!("CDP reader loop ended");
    }

    fn route_event(routes: &EventRoutes, event: CdpEvent) {
        let Some(session_id) = event.session_id.clone() else {
            tracing::trace!("Dropping browser-level event {}", event.method);
            return;
        };
        let guard = routes.lock().unwrap();
        if let Some(tx) = guard.get(&session_id) {
            // A full subscriber is a slow consumer; losing events there is
            // preferable to stalling the reader thread.
            let _ = tx.try_send(event);
        }
    }

    /// Subscribe to events addressed to one session
    pub fn subscribe(&self, session_id: &str) -> mpsc::Receiver<CdpEvent> {
        let (tx, rx) = mpsc::channel(512);
        self.routes
            .lock()
            .unwrap()
            .insert(session_id.to_string(), tx);
        rx
    }

    /// Drop the subscription for a session
    pub fn unsubscribe(&self, session_id: &str) {
        self.routes.lock().unwrap().remove(session_id);
    }

    /// Send a browser-level CDP command and wait for the response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.send_raw(None, method, serde_json::to_value(params)?)
            .await
            .and_then(|v| serde_json::from_value(v).map_err(Into::into))
    }

    /// Send a CDP command addressed to a specific session
    pub async fn send_to_session<C, R>(
        &self,
        session_id: &str,
        method: &str,
        params: &C,
    ) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.send_raw(Some(session_id), method, serde_json::to_value(params)?)
            .await
            .and_then(|v| serde_json::from_value(v).map_err(Into::into))
    }

    async fn send_raw(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        // Detectable commands never reach the wire; the empty result
        // deserializes through #[serde(default)].
        if is_blocked(method) {
            tracing::debug!("Blocked CDP command: {}", method);
            return Ok(json!({}));
        }

        match &self.inner {
            Inner::Mock(state) => state.handle(session_id, method, params),
            Inner::Socket(socket) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);

                let (tx, rx) = oneshot::channel();
                socket.pending.lock().await.insert(id, tx);

                let mut msg = json!({
                    "id": id,
                    "method": method,
                    "params": params,
                });
                if let Some(session_id) = session_id {
                    msg["sessionId"] = json!(session_id);
                }

                let data = serde_json::to_string(&msg)?;
                {
                    let mut writer = socket.writer.lock().await;
                    write_ws_frame(&mut writer, data.as_bytes())
                        .map_err(|e| Error::transport_io("WebSocket write failed", e))?;
                }
                tracing::trace!("Sent CDP command: {} (id={})", method, id);

                rx.await
                    .map_err(|_| Error::transport("Response channel closed"))?
            }
        }
    }

    /// Close the transport and kill Chrome
    pub async fn close(&self) -> Result<()> {
        if let Inner::Socket(socket) = &self.inner {
            {
                let mut writer = socket.writer.lock().await;
                let close_frame = vec![0x80 | ws::OPCODE_CLOSE, 0x80, 0, 0, 0, 0];
                let _ = std::io::Write::write_all(&mut *writer, &close_frame);
            }
            let mut child = socket.child.lock().await;
            let _ = child.kill();
            let _ = child.wait();
        }
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Inner::Socket(socket) = &self.inner {
            if let Ok(mut child) = socket.child.try_lock() {
                let _ = child.kill();
            }
        }
    }
}

/// Launch Chrome and read the DevTools WebSocket URL from its stderr
pub fn launch_chrome(path: &std::path::Path, args: &[String]) -> Result<(Child, String)> {
    use std::process::Command;

    let mut cmd = Command::new(path);
    cmd.args(args)
        .args(["--remote-debugging-port=0"]) // Chrome picks a free port
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Launch(format!("Failed to spawn Chrome: {}", e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or(Error::Launch("No stderr from Chrome".into()))?;

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    let reader = BufReader::new(stderr);
    let mut ws_url = None;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        tracing::trace!("Chrome stderr: {}", line);
        if line.contains("DevTools listening on") {
            if let Some(start) = line.find("ws://") {
                ws_url = Some(line[start..].trim().to_string());
                break;
            }
        }
    }

    let ws_url = ws_url.ok_or(Error::Launch(
        "Failed to get DevTools WebSocket URL from Chrome".into(),
    ))?;
    tracing::info!("Chrome DevTools URL: {}", ws_url);

    Ok((child, ws_url))
}
