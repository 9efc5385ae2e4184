//! Inbound websocket endpoint for browsers and other peers.
//!
//! Sessions get strictly increasing ids that are never reused. A session
//! lives exactly as long as its socket; reconnecting is the remote side's
//! business. Plain HTTP requests get a short informational answer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dashmap::{DashMap, DashSet};
use futures::{SinkExt, StreamExt};
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::ingest::{Ingested, Ingestor};
use crate::peer::{payload_text, PeerId, PeerLink};

const PLAIN_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
content-type: text/plain\r\n\
content-length: 18\r\n\
connection: close\r\n\
\r\n\
WebSocket endpoint";

const HEAD_LIMIT: usize = 8192;
const PEEK_ROUNDS: usize = 50;

/// How long a new connection may take to send its request head.
pub const HEAD_TIMEOUT: Duration = Duration::from_secs(10);

pub struct InboundServer {
    sessions: DashMap<u64, UnboundedSender<Message>>,
    next_id: AtomicU64,
    ingest: Arc<Ingestor>,
    blobs: DashSet<String>,
    head_timeout: Duration,
}

impl InboundServer {
    pub fn new(ingest: Arc<Ingestor>) -> Arc<Self> {
        Self::with_head_timeout(ingest, HEAD_TIMEOUT)
    }

    pub fn with_head_timeout(ingest: Arc<Ingestor>, head_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            ingest,
            blobs: DashSet::new(),
            head_timeout,
        })
    }

    /// Binds `0.0.0.0:port` and accepts in the background. Returns the bound
    /// address (port 0 picks a free port).
    pub async fn listen(self: &Arc<Self>, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let addr = listener.local_addr()?;
        info!("[ws] listening on :{}", addr.port());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let this = Arc::clone(&this);
                        tokio::spawn(async move {
                            if let Err(e) = this.handle_connection(stream, peer_addr).await {
                                debug!("[ws] connection error ({}): {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("[ws] accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        Ok(addr)
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let upgrade = match tokio::time::timeout(self.head_timeout, is_upgrade_request(&stream)).await {
            Ok(upgrade) => upgrade?,
            Err(_) => {
                debug!("[ws] no request head from {} in {:?}, dropping", addr, self.head_timeout);
                return Ok(());
            }
        };
        if !upgrade {
            debug!("[ws] plain request from {}", addr);
            let mut head = vec![0u8; HEAD_LIMIT];
            let _ = stream.read(&mut head).await;
            stream.write_all(PLAIN_RESPONSE).await?;
            stream.shutdown().await?;
            return Ok(());
        }

        let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            debug!("[ws] request uri {}", request.uri());
            Ok(response)
        })
        .await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.sessions.insert(id, tx.clone());
        info!("[ws] client connected client-{} ({})", id, addr);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let peer = PeerId::Session(id);
        while let Some(msg) = source.next().await {
            match msg {
                Ok(msg) => {
                    if let Some(text) = payload_text(msg) {
                        debug!("[ws] recv client-{}: {}", id, text);
                        if let Ingested::Stored { blob: Some(hash), .. } = self.ingest.handle(&text, &peer, &tx) {
                            self.blobs.insert(hash);
                        }
                    }
                }
                Err(e) => {
                    debug!("[ws] client-{} error: {}", id, e);
                    break;
                }
            }
        }

        self.sessions.remove(&id);
        writer.abort();
        info!("[ws] client disconnected client-{}", id);
        Ok(())
    }

    pub fn connected_sessions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn send_to_session(&self, id: u64, payload: &str) -> bool {
        self.sessions
            .get(&id)
            .map_or(false, |tx| tx.send(Message::Text(payload.to_string())).is_ok())
    }

    pub fn send_to_random_session(&self, payload: &str) -> Option<u64> {
        let ids = self.connected_sessions();
        let id = *ids.choose(&mut rand::thread_rng())?;
        self.send_to_session(id, payload).then_some(id)
    }

    pub fn blobs_stored_count(&self) -> usize {
        self.blobs.len()
    }
}

impl PeerLink for InboundServer {
    fn connected(&self) -> Vec<PeerId> {
        self.connected_sessions().into_iter().map(PeerId::Session).collect()
    }

    fn send(&self, peer: &PeerId, payload: &str) -> bool {
        match peer {
            PeerId::Session(id) => self.send_to_session(*id, payload),
            PeerId::Pub(_) => false,
        }
    }
}

/// Peeks at the request head without consuming it.
async fn is_upgrade_request(stream: &TcpStream) -> Result<bool> {
    let mut buf = vec![0u8; HEAD_LIMIT];
    let mut seen = 0;
    for _ in 0..PEEK_ROUNDS {
        seen = stream.peek(&mut buf).await?;
        if seen == 0 {
            return Ok(false);
        }
        let head = &buf[..seen];
        if seen == buf.len() || head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(has_upgrade_header(&buf[..seen]))
}

fn has_upgrade_header(head: &[u8]) -> bool {
    String::from_utf8_lossy(head).lines().any(|line| {
        line.split_once(':').map_or(false, |(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade") && value.trim().eq_ignore_ascii_case("websocket")
        })
    })
}
