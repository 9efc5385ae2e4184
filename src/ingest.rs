//! Handling of a single inbound payload, whichever side it arrived on.
//!
//! Payloads carry no type tag. In order:
//! 1. anything we hold under that exact key is served back (it was a fetch);
//! 2. an author-key-shaped payload is noted as missing and answered with the
//!    author's newest envelope when we have one;
//! 3. a payload that opens as an envelope is added to the log;
//! 4. the payload is stored as a blob and, if it parses as a structured
//!    document, its references feed the missing set and the follow set.
//!
//! Every step swallows its own failure.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::gossip::GossipScheduler;
use crate::parser::token::{has_token_len, inline_tokens, is_token, OPENED_LEN};
use crate::peer::{PeerId, Reply};
use crate::store::RecordStore;

pub const SOURCE_PEER_REQUEST: &str = "peer-request";

const DIRECT_FIELDS: [(&str, &str); 2] = [("previous", "yaml.previous"), ("reply", "yaml.reply")];
const INLINE_FIELDS: [(&str, &str); 2] = [("image", "yaml.image"), ("body", "yaml.body")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    /// A stored blob matched the payload and was sent back.
    ServedBlob,
    /// The payload named an author; their newest envelope was sent back.
    ServedLatest,
    Stored {
        envelope: bool,
        blob: Option<String>,
        /// References newly added to the missing set.
        discovered: usize,
    },
}

pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    gossip: Arc<GossipScheduler>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RecordStore>, gossip: Arc<GossipScheduler>) -> Self {
        Self { store, gossip }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn gossip(&self) -> &Arc<GossipScheduler> {
        &self.gossip
    }

    pub fn handle(&self, payload: &str, from: &PeerId, reply: &dyn Reply) -> Ingested {
        if let Ok(Some(blob)) = self.store.get(payload) {
            let len = blob.len();
            if reply.reply(blob) {
                debug!("send blob for {} -> {} ({} chars)", payload, from, len);
            }
            return Ingested::ServedBlob;
        }

        if is_token(payload) {
            self.gossip.report_missing(payload, SOURCE_PEER_REQUEST);
            if let Ok(Some(latest)) = self.store.get_latest(payload) {
                if reply.reply(latest.sig) {
                    debug!("send latest sig for author {} -> {}", payload, from);
                }
                return Ingested::ServedLatest;
            }
        }

        let envelope = self.ingest_envelope(payload, from);

        let blob = match self.store.make(payload) {
            Ok(hash) => Some(hash),
            Err(e) => {
                debug!("blob not stored from {}: {}", from, e);
                None
            }
        };

        let discovered = match self.store.parse_yaml(payload) {
            Ok(doc) if doc.is_object() => self.scan_document(&doc),
            _ => 0,
        };

        Ingested::Stored { envelope, blob, discovered }
    }

    fn ingest_envelope(&self, payload: &str, from: &PeerId) -> bool {
        match self.store.open(payload) {
            Ok(opened) if opened.len() >= OPENED_LEN => {}
            _ => return false,
        }
        match self.store.add(payload) {
            Ok(true) => {
                info!("stored envelope from {}", from);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!("envelope from {} not stored: {}", from, e);
                false
            }
        }
    }

    /// Follows references out of a structured payload. Returns how many
    /// hashes were newly reported missing.
    fn scan_document(&self, doc: &Value) -> usize {
        let sig = doc.get("sig").and_then(Value::as_str);
        let mut discovered = 0;

        for (field, source) in DIRECT_FIELDS {
            if let Some(hash) = doc.get(field).and_then(Value::as_str) {
                discovered += self.note_reference(hash, sig, source) as usize;
            }
        }

        if let Some(key) = doc.get("replyTo").and_then(Value::as_str) {
            if has_token_len(key) {
                self.gossip.follows().add(key);
            }
        }

        for (field, source) in INLINE_FIELDS {
            if let Some(text) = doc.get(field).and_then(Value::as_str) {
                for hash in inline_tokens(text) {
                    discovered += self.note_reference(hash, sig, source) as usize;
                }
            }
        }
        discovered
    }

    fn note_reference(&self, hash: &str, sig: Option<&str>, source: &str) -> bool {
        if !has_token_len(hash) || sig == Some(hash) {
            return false;
        }
        if self.gossip.is_missing(hash) || self.store.has(hash) {
            return false;
        }
        self.gossip.report_missing(hash, source)
    }
}
