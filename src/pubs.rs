//! Outbound connections to configured pubs.
//!
//! One [`PeerConnection`] per url. The record owns the connection's outbox
//! (replaced on every dial, never shared) and drives reconnection through
//! explicit transitions:
//!
//! ```text
//! Disconnected --dial--> Connecting --open--> Open
//!      ^                     |                  |
//!      +----close/error------+------------------+   (backoff, unless removed)
//! removal: Connecting/Open --> Closing --> Disconnected --> dropped
//! ```
//!
//! A `generation` counter ties every spawned connection task to the dial
//! that created it so late events from a replaced transport are ignored.
//! Retry timers carry a `retry_epoch`; removal or revival bumps it so an
//! armed timer from the previous lifecycle fires into nothing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Notify;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info};
use url::Url;

use crate::backoff::{Backoff, MAX_ATTEMPTS};
use crate::ingest::{Ingested, Ingestor};
use crate::peer::{payload_text, PeerId, PeerLink};

/// How long a removed connection may take to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubStatus {
    pub state: ConnectionState,
    pub attempts: u32,
    pub removed: bool,
}

#[derive(Debug)]
pub struct PeerConnection {
    url: String,
    state: ConnectionState,
    attempts: u32,
    removed: bool,
    reconnect_pending: bool,
    generation: u64,
    retry_epoch: u64,
    outbox: Option<UnboundedSender<Message>>,
    closer: Arc<Notify>,
}

impl PeerConnection {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            state: ConnectionState::Disconnected,
            attempts: 0,
            removed: false,
            reconnect_pending: false,
            generation: 0,
            retry_epoch: 0,
            outbox: None,
            closer: Arc::new(Notify::new()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> PubStatus {
        PubStatus { state: self.state, attempts: self.attempts, removed: self.removed }
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && !self.removed
    }

    /// Idle, wanted, and no retry timer already armed.
    pub fn wants_dial(&self) -> bool {
        !self.removed && self.state == ConnectionState::Disconnected && !self.reconnect_pending
    }

    /// Starts a new transport lifecycle. The returned generation and closer
    /// belong to that lifecycle only.
    pub fn begin_dial(&mut self) -> (u64, Arc<Notify>) {
        self.state = ConnectionState::Connecting;
        self.reconnect_pending = false;
        self.generation += 1;
        self.closer = Arc::new(Notify::new());
        (self.generation, Arc::clone(&self.closer))
    }

    /// The transport for `generation` finished its handshake. `false` means
    /// it must be closed straight away.
    pub fn on_open(&mut self, generation: u64, outbox: UnboundedSender<Message>) -> bool {
        if generation != self.generation {
            return false;
        }
        if self.removed {
            self.state = ConnectionState::Closing;
            return false;
        }
        self.state = ConnectionState::Open;
        self.attempts = 0;
        self.outbox = Some(outbox);
        true
    }

    /// The transport for `generation` closed or failed. Returns the delay
    /// before the next dial, or `None` when no retry is wanted.
    pub fn on_closed(&mut self, generation: u64, schedule: &Backoff) -> Option<Duration> {
        if generation != self.generation {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        self.outbox = None;
        if self.removed {
            return None;
        }
        self.attempts = (self.attempts + 1).min(MAX_ATTEMPTS);
        self.reconnect_pending = true;
        Some(schedule.next_delay(self.attempts))
    }

    /// Epoch of the currently armed retry timer.
    pub fn retry_epoch(&self) -> u64 {
        self.retry_epoch
    }

    /// A retry timer armed at `epoch` fired. Returns whether to dial now.
    pub fn on_retry_due(&mut self, epoch: u64) -> bool {
        if epoch != self.retry_epoch || !self.reconnect_pending {
            return false;
        }
        self.reconnect_pending = false;
        !self.removed && self.state == ConnectionState::Disconnected
    }

    fn cancel_retry(&mut self) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            self.retry_epoch += 1;
        }
    }

    /// Url left the configuration. Any armed retry is cancelled. Returns the
    /// closer to signal when a transport is live or in flight.
    pub fn mark_removed(&mut self) -> Option<Arc<Notify>> {
        self.removed = true;
        self.cancel_retry();
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.state = ConnectionState::Closing;
                Some(Arc::clone(&self.closer))
            }
            _ => None,
        }
    }

    /// Url is configured again: start over with a fresh attempt counter. A
    /// transport still closing is kept and returns to its live state.
    pub fn revive(&mut self) {
        if !self.removed {
            return;
        }
        self.removed = false;
        self.attempts = 0;
        self.cancel_retry();
        if self.state == ConnectionState::Closing {
            self.state = if self.outbox.is_some() {
                ConnectionState::Open
            } else {
                ConnectionState::Connecting
            };
        }
    }

    /// Whether the transport started by `generation` should shut down.
    pub fn is_retired(&self, generation: u64) -> bool {
        self.removed || generation != self.generation
    }

    /// Removed with nothing left in flight; the record can be dropped.
    pub fn is_finished(&self) -> bool {
        self.removed && self.state == ConnectionState::Disconnected && !self.reconnect_pending
    }

    fn send(&self, payload: &str) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbox
            .as_ref()
            .map_or(false, |tx| tx.send(Message::Text(payload.to_string())).is_ok())
    }
}

/// Only websocket urls are dialable.
pub fn is_pub_url(url: &str) -> bool {
    Url::parse(url).map_or(false, |u| matches!(u.scheme(), "ws" | "wss"))
}

pub struct PubManager {
    conns: Mutex<HashMap<String, PeerConnection>>,
    ingest: Arc<Ingestor>,
    schedule: Backoff,
    blobs: DashSet<String>,
    dials: AtomicU64,
}

impl PubManager {
    pub fn new(ingest: Arc<Ingestor>, schedule: Backoff) -> Arc<Self> {
        Arc::new(Self {
            conns: Mutex::new(HashMap::new()),
            ingest,
            schedule,
            blobs: DashSet::new(),
            dials: AtomicU64::new(0),
        })
    }

    /// Brings the tracked set in line with `urls`. Calling it again with the
    /// same set starts nothing new.
    pub fn reconcile<I, S>(self: &Arc<Self>, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let target: HashSet<String> = urls
            .into_iter()
            .map(|u| u.as_ref().to_string())
            .filter(|u| is_pub_url(u))
            .collect();

        let mut dials = Vec::new();
        let mut closers = Vec::new();
        {
            let mut conns = self.conns.lock();
            for url in &target {
                let conn = conns.entry(url.clone()).or_insert_with(|| PeerConnection::new(url));
                conn.revive();
                if conn.wants_dial() {
                    let (generation, closer) = conn.begin_dial();
                    dials.push((url.clone(), generation, closer));
                }
            }
            for (url, conn) in conns.iter_mut() {
                if target.contains(url) || conn.removed {
                    continue;
                }
                info!("[pub] removed: {}", url);
                if let Some(closer) = conn.mark_removed() {
                    closers.push(closer);
                }
            }
            conns.retain(|_, c| !c.is_finished());
        }

        for closer in closers {
            closer.notify_one();
        }
        for (url, generation, closer) in dials {
            self.spawn_connection(url, generation, closer);
        }
    }

    /// Removes every pub.
    pub fn shutdown(self: &Arc<Self>) {
        self.reconcile(std::iter::empty::<&str>());
    }

    pub fn connected_peers(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .conns
            .lock()
            .values()
            .filter(|c| c.is_open())
            .map(|c| c.url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub fn send_to_peer(&self, url: &str, payload: &str) -> bool {
        self.conns.lock().get(url).map_or(false, |c| c.send(payload))
    }

    pub fn send_to_random_connected(&self, payload: &str) -> Option<String> {
        let urls = self.connected_peers();
        let url = urls.choose(&mut rand::thread_rng())?;
        self.send_to_peer(url, payload).then(|| url.clone())
    }

    pub fn blobs_stored_count(&self) -> usize {
        self.blobs.len()
    }

    pub fn status(&self, url: &str) -> Option<PubStatus> {
        self.conns.lock().get(url).map(PeerConnection::status)
    }

    /// Connection attempts started so far.
    pub fn dial_count(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }

    fn spawn_connection(self: &Arc<Self>, url: String, generation: u64, closer: Arc<Notify>) {
        self.dials.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_connection(&url, generation, closer).await;
            this.on_disconnect(&url, generation);
        });
    }

    async fn run_connection(self: &Arc<Self>, url: &str, generation: u64, closer: Arc<Notify>) {
        debug!("[pub] connecting: {}", url);
        let ws = match connect_async(url).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                debug!("[pub] connect failed {}: {}", url, e);
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let keep = self
            .conns
            .lock()
            .get_mut(url)
            .map_or(false, |c| c.on_open(generation, tx.clone()));
        let (mut sink, mut source) = ws.split();
        if !keep {
            debug!("[pub] {} no longer wanted, closing", url);
            let _ = sink.close().await;
            return;
        }
        info!("[pub] Connected: {}", url);

        let mut writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let peer = PeerId::Pub(url.to_string());
        let removed = loop {
            tokio::select! {
                _ = closer.notified() => {
                    // the url may have been re-added since the signal
                    let retired = self.conns.lock().get(url).map_or(true, |c| c.is_retired(generation));
                    if retired {
                        let _ = tx.send(Message::Close(None));
                        break true;
                    }
                }
                msg = source.next() => match msg {
                    Some(Ok(msg)) => {
                        if let Some(text) = payload_text(msg) {
                            debug!("[pub] recv {}: {}", url, text);
                            self.deliver(&text, &peer, &tx);
                        }
                    }
                    Some(Err(e)) => {
                        debug!("[pub] stream error on {}: {}", url, e);
                        break false;
                    }
                    None => break false,
                }
            }
        };

        if removed {
            let _ = tokio::time::timeout(CLOSE_GRACE, &mut writer).await;
        }
        writer.abort();
    }

    fn deliver(&self, text: &str, peer: &PeerId, reply: &UnboundedSender<Message>) {
        if let Ingested::Stored { blob: Some(hash), .. } = self.ingest.handle(text, peer, reply) {
            self.blobs.insert(hash);
        }
    }

    fn on_disconnect(self: &Arc<Self>, url: &str, generation: u64) {
        let wait = {
            let mut conns = self.conns.lock();
            let Some(conn) = conns.get_mut(url) else { return };
            let wait = conn
                .on_closed(generation, &self.schedule)
                .map(|wait| (wait, conn.retry_epoch()));
            if conn.is_finished() {
                conns.remove(url);
                debug!("[pub] dropped {}", url);
            }
            wait
        };

        let Some((wait, epoch)) = wait else { return };
        info!("[pub] closed. Reconnecting in {}s: {}", wait.as_secs(), url);
        let this = Arc::clone(self);
        let url = url.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            this.retry(url, epoch);
        });
    }

    fn retry(self: &Arc<Self>, url: String, epoch: u64) {
        let dial = {
            let mut conns = self.conns.lock();
            let Some(conn) = conns.get_mut(&url) else { return };
            if conn.on_retry_due(epoch) {
                Some(conn.begin_dial())
            } else {
                if conn.is_finished() {
                    conns.remove(&url);
                }
                None
            }
        };
        if let Some((generation, closer)) = dial {
            self.spawn_connection(url, generation, closer);
        }
    }
}

impl PeerLink for PubManager {
    fn connected(&self) -> Vec<PeerId> {
        self.connected_peers().into_iter().map(PeerId::Pub).collect()
    }

    fn send(&self, peer: &PeerId, payload: &str) -> bool {
        match peer {
            PeerId::Pub(url) => self.send_to_peer(url, payload),
            PeerId::Session(_) => false,
        }
    }
}
