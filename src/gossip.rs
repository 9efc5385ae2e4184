//! Missing-record request scheduler.
//!
//! Each tick asks at most one peer for one thing. Missing hashes take
//! priority over follow polling. Peers are sampled at random and every
//! (hash, peer) pair carries its own backoff, so an ignored request is
//! simply retried later against whoever is eligible. There are no
//! acknowledgements: a request is done when the sweep finds the hash stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::Rng;
use tracing::debug;

use crate::backoff::{Backoff, BackoffRecord};
use crate::follows::FollowSet;
use crate::parser::token::has_token_len;
use crate::peer::{PeerId, PeerLink};

/// Random hash draws per tick before giving up.
pub const MAX_DRAWS: usize = 8;

/// Chance of trying a pub first when polling a followed author.
pub const PUB_POLL_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Default)]
pub struct MissingRecord {
    /// Where the reference was found; informational.
    pub source: String,
    pub backoff: HashMap<PeerId, BackoffRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nobody is connected.
    NoPeers,
    /// Asked `peer` for a missing hash.
    Requested { hash: String, peer: PeerId },
    /// Missing hashes exist but no drawn (hash, peer) pair was eligible.
    Throttled,
    /// Asked `peer` for the newest record of a followed author.
    Polled { key: String, peer: PeerId },
    /// Nothing to ask for, or every send failed.
    Idle,
}

pub struct GossipScheduler {
    missing: Mutex<HashMap<String, MissingRecord>>,
    follows: Arc<FollowSet>,
    schedule: Backoff,
    max_draws: usize,
    pub_weight: f64,
}

impl GossipScheduler {
    pub fn new(follows: Arc<FollowSet>) -> Self {
        Self {
            missing: Mutex::new(HashMap::new()),
            follows,
            schedule: Backoff::default(),
            max_draws: MAX_DRAWS,
            pub_weight: PUB_POLL_WEIGHT,
        }
    }

    pub fn with_schedule(mut self, schedule: Backoff) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_max_draws(mut self, draws: usize) -> Self {
        self.max_draws = draws.max(1);
        self
    }

    pub fn with_pub_weight(mut self, weight: f64) -> Self {
        self.pub_weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn follows(&self) -> &Arc<FollowSet> {
        &self.follows
    }

    /// Records a reference to an absent hash. First report wins the source tag.
    pub fn report_missing(&self, hash: &str, source: &str) -> bool {
        if !has_token_len(hash) {
            return false;
        }
        let mut missing = self.missing.lock();
        if missing.contains_key(hash) {
            return false;
        }
        missing.insert(
            hash.to_string(),
            MissingRecord { source: source.to_string(), backoff: HashMap::new() },
        );
        true
    }

    /// Drops a hash together with all its per-peer backoff state.
    pub fn retire(&self, hash: &str) -> Option<MissingRecord> {
        self.missing.lock().remove(hash)
    }

    pub fn is_missing(&self, hash: &str) -> bool {
        self.missing.lock().contains_key(hash)
    }

    pub fn source_of(&self, hash: &str) -> Option<String> {
        self.missing.lock().get(hash).map(|r| r.source.clone())
    }

    pub fn backoff_for(&self, hash: &str, peer: &PeerId) -> Option<BackoffRecord> {
        self.missing.lock().get(hash)?.backoff.get(peer).copied()
    }

    pub fn missing_len(&self) -> usize {
        self.missing.lock().len()
    }

    pub fn missing_hashes(&self) -> Vec<String> {
        self.missing.lock().keys().cloned().collect()
    }

    pub fn tick(&self, pubs: &dyn PeerLink, sessions: &dyn PeerLink) -> TickOutcome {
        self.tick_with(pubs, sessions, Instant::now(), &mut rand::thread_rng())
    }

    pub fn tick_with<R: Rng + ?Sized>(
        &self,
        pubs: &dyn PeerLink,
        sessions: &dyn PeerLink,
        now: Instant,
        rng: &mut R,
    ) -> TickOutcome {
        let pub_peers = pubs.connected();
        let session_peers = sessions.connected();
        if pub_peers.is_empty() && session_peers.is_empty() {
            return TickOutcome::NoPeers;
        }

        {
            let mut missing = self.missing.lock();
            if !missing.is_empty() {
                for _ in 0..self.max_draws {
                    let Some(hash) = missing.keys().choose(rng).cloned() else { break };
                    let mut peers: Vec<&PeerId> = pub_peers.iter().chain(session_peers.iter()).collect();
                    peers.shuffle(rng);

                    let Some(record) = missing.get_mut(&hash) else { continue };
                    for peer in peers {
                        let eligible = record.backoff.get(peer).map_or(true, |b| b.is_eligible(now));
                        if !eligible {
                            continue;
                        }
                        let link = match peer {
                            PeerId::Pub(_) => pubs,
                            PeerId::Session(_) => sessions,
                        };
                        if link.send(peer, &hash) {
                            record
                                .backoff
                                .entry(peer.clone())
                                .or_default()
                                .record_attempt(&self.schedule, now, rng);
                            debug!("[gossip] asked [missing {}] {} -> {}", record.source, hash, peer);
                            return TickOutcome::Requested { hash, peer: peer.clone() };
                        }
                    }
                }
                return TickOutcome::Throttled;
            }
        }

        let Some(key) = self.follows.random() else { return TickOutcome::Idle };
        let order: [&dyn PeerLink; 2] = if rng.gen_bool(self.pub_weight) {
            [pubs, sessions]
        } else {
            [sessions, pubs]
        };
        for link in order {
            if let Some(peer) = link.send_to_random(&key) {
                debug!("[gossip] asked [follow] {} -> {}", key, peer);
                return TickOutcome::Polled { key, peer };
            }
        }
        TickOutcome::Idle
    }
}
