use std::fmt;

use rand::seq::SliceRandom;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Who a payload came from or goes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerId {
    /// Outbound connection, keyed by configured url.
    Pub(String),
    /// Inbound session, keyed by its process-unique id.
    Session(u64),
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Pub(url) => write!(f, "pub:{}", url),
            PeerId::Session(id) => write!(f, "ws:client-{}", id),
        }
    }
}

/// Send side of one transport kind (all pubs, or all inbound sessions).
///
/// Sends are best-effort writes into the connection's outbox; `false` means
/// the peer is unknown, not open, or its outbox is gone. Nothing is
/// acknowledged.
pub trait PeerLink: Send + Sync {
    fn connected(&self) -> Vec<PeerId>;

    fn send(&self, peer: &PeerId, payload: &str) -> bool;

    fn send_to_random(&self, payload: &str) -> Option<PeerId> {
        let peers = self.connected();
        let peer = peers.choose(&mut rand::thread_rng())?;
        self.send(peer, payload).then(|| peer.clone())
    }
}

/// Reply path back to the connection a payload arrived on.
pub trait Reply {
    fn reply(&self, payload: String) -> bool;
}

impl Reply for UnboundedSender<Message> {
    fn reply(&self, payload: String) -> bool {
        self.send(Message::Text(payload)).is_ok()
    }
}

/// Text content of a data frame, trimmed. Control frames and empty payloads
/// yield `None`.
pub fn payload_text(msg: Message) -> Option<String> {
    let text = match msg {
        Message::Text(t) => t,
        Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
        _ => return None,
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(if trimmed.len() == text.len() { text } else { trimmed.to_string() })
}
