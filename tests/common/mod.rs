//! Common test utilities - PartyTest harness for end-to-end testing

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use partyd::{Config, Server};
use reqwest::{Client, Method};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Test harness that spawns a real partyd server on a random port
pub struct PartyTest {
    pub addr: SocketAddr,
    pub client: Client,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

/// Credentials returned by create/join
#[derive(Debug, Clone)]
pub struct Ticket {
    pub session_id: String,
    pub code: String,
    pub player_id: String,
    pub token: String,
}

impl Ticket {
    fn from_json(body: &Value) -> Self {
        let field = |k: &str| body[k].as_str().unwrap_or_default().to_string();
        Self {
            session_id: field("session_id"),
            code: field("code"),
            player_id: field("player_id"),
            token: field("token"),
        }
    }
}

impl PartyTest {
    /// Start a new test server with default settings
    pub async fn start() -> Result<Self> {
        Self::with_config(Config::default()).await
    }

    /// Start a new test server; the bind address is always a random local port
    pub async fn with_config(mut config: Config) -> Result<Self> {
        config.bind_addr = "127.0.0.1:0".parse()?;
        config.db_path = None;

        let server = Arc::new(Server::new(config).await?);
        let addr = server.local_addr();
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..40 {
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !ready {
            anyhow::bail!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            server,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make an unauthenticated GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make an authenticated request with an optional JSON body
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url(), path))
            .bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        Ok(req.send().await?)
    }

    pub async fn get_auth(&self, path: &str, token: &str) -> Result<reqwest::Response> {
        self.request(Method::GET, path, token, None).await
    }

    pub async fn post_auth(&self, path: &str, token: &str, body: Value) -> Result<reqwest::Response> {
        self.request(Method::POST, path, token, Some(body)).await
    }

    /// Create a room and return the GM's ticket
    pub async fn create_session(&self) -> Result<Ticket> {
        let resp = self
            .client
            .post(format!("{}/sessions", self.base_url()))
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;
        Ok(Ticket::from_json(&resp.json().await?))
    }

    /// Join a room by code
    pub async fn join(&self, code: &str, name: &str) -> Result<Ticket> {
        let resp = self
            .client
            .post(format!("{}/sessions/join", self.base_url()))
            .json(&serde_json::json!({ "code": code, "name": name }))
            .send()
            .await?
            .error_for_status()?;
        Ok(Ticket::from_json(&resp.json().await?))
    }

    /// Membership record of `player_id` as seen by `token`
    pub async fn player_record(&self, token: &str, player_id: &str) -> Result<Value> {
        let players: Vec<Value> = self
            .get_auth("/sessions/players", token)
            .await?
            .error_for_status()?
            .json()
            .await?;
        players
            .into_iter()
            .find(|p| p["id"] == player_id)
            .ok_or_else(|| anyhow::anyhow!("player {} not in room", player_id))
    }

    pub fn ws_url(&self, token: Option<&str>) -> String {
        match token {
            Some(token) => format!("ws://{}/ws?token={}", self.addr, token),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    /// Connect to the WebSocket endpoint and return a test client
    pub async fn connect_ws(&self, token: Option<&str>) -> Result<WsClient> {
        let (ws_stream, _) = connect_async(self.ws_url(token)).await?;
        let (write, read) = ws_stream.split();
        Ok(WsClient { write, read })
    }

    /// Shutdown the server gracefully
    pub fn shutdown(&self) {
        self.server.shutdown();
    }
}

impl Drop for PartyTest {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket client for testing
pub struct WsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

/// Next thing the server sent
#[derive(Debug)]
pub enum Frame {
    Event(Value),
    Closed(Option<u16>),
}

impl WsClient {
    /// Send a raw text frame
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.write.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Send a `{type, payload}` envelope
    pub async fn send(&mut self, kind: &str, payload: Value) -> Result<()> {
        let msg = serde_json::json!({ "type": kind, "payload": payload });
        self.send_text(&msg.to_string()).await
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Frame::Event(serde_json::from_str(&text)?));
                }
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Frame::Closed(frame.map(|f| u16::from(f.code))));
                }
                None | Some(Err(_)) => return Ok(Frame::Closed(None)),
                _ => continue, // Skip binary/ping/pong frames
            }
        }
    }

    /// Next event or close, with timeout
    pub async fn next_frame(&mut self) -> Result<Frame> {
        match tokio::time::timeout(RECV_TIMEOUT, self.read_frame()).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("Timeout waiting for WebSocket message"),
        }
    }

    /// Receive the next event as JSON
    pub async fn recv_json(&mut self) -> Result<Value> {
        match self.next_frame().await? {
            Frame::Event(event) => Ok(event),
            Frame::Closed(code) => anyhow::bail!("WebSocket closed ({:?})", code),
        }
    }

    /// Receive events until one of type `kind` arrives
    pub async fn recv_event(&mut self, kind: &str) -> Result<Value> {
        loop {
            let event = self.recv_json().await?;
            if event["type"] == kind {
                return Ok(event);
            }
        }
    }

    /// Skip events until the server closes; returns the close code
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        loop {
            if let Frame::Closed(code) = self.next_frame().await? {
                return Ok(code);
            }
        }
    }

    /// True if nothing arrives within `wait`
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.read.next()).await.is_err()
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}
