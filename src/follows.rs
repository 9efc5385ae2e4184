//! Authors whose newest records the engine keeps asking for.
//!
//! Membership only grows here. Keys discovered from ingested payloads are
//! written through to the config document; keys merged from the document
//! itself are not written back.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tracing::{debug, info};

use crate::config::ConfigStore;
use crate::parser::token::has_token_len;

pub struct FollowSet {
    keys: Mutex<HashSet<String>>,
    config: Arc<dyn ConfigStore>,
    /// Serializes read-modify-write of the config document.
    persist: Mutex<()>,
}

impl FollowSet {
    pub fn new<I: IntoIterator<Item = String>>(initial: I, config: Arc<dyn ConfigStore>) -> Self {
        Self {
            keys: Mutex::new(initial.into_iter().collect()),
            config,
            persist: Mutex::new(()),
        }
    }

    /// Adds a discovered key. Returns `true` only for the call that actually
    /// inserted it; only that call touches the config document.
    pub fn add(&self, key: &str) -> bool {
        if !has_token_len(key) {
            return false;
        }
        if !self.keys.lock().insert(key.to_string()) {
            return false;
        }

        let _guard = self.persist.lock();
        match self.config.load() {
            Ok(mut cfg) => {
                if cfg.follow(key) {
                    if let Err(e) = self.config.save(&cfg) {
                        debug!("[follow] could not persist {}: {}", key, e);
                    }
                }
            }
            Err(e) => debug!("[follow] could not read config: {}", e),
        }
        info!("[follow] added {}", key);
        true
    }

    /// Merges keys read from the config document. Returns how many were new.
    pub fn merge_from_config<'a, I: IntoIterator<Item = &'a String>>(&self, keys: I) -> usize {
        let mut set = self.keys.lock();
        keys.into_iter().filter(|k| set.insert((*k).clone())).count()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    pub fn random(&self) -> Option<String> {
        self.keys.lock().iter().choose(&mut rand::thread_rng()).cloned()
    }

    pub fn snapshot(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.lock().iter().cloned().collect();
        keys.sort();
        keys
    }
}
