//! Peer/follow configuration document and change detection.
//!
//! The document is `{ "pubs": [...], "follows": [...] }`. The engine re-reads
//! it periodically and diffs against the last snapshot; no change
//! notification is assumed from the backing store.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const CONFIG_PATH: &str = "dovepub.json";
pub const DEFAULT_PUBS: &[&str] = &["wss://pub.wiredove.net"];

/// Non-array values read as empty lists; array items are stringified.
fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        _ => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default, deserialize_with = "string_list")]
    pub pubs: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    pub follows: Vec<String>,
}

impl PeerConfig {
    pub fn with_defaults() -> Self {
        Self {
            pubs: DEFAULT_PUBS.iter().map(|s| s.to_string()).collect(),
            follows: Vec::new(),
        }
    }

    pub fn to_pretty(&self) -> String {
        // serializing two string vectors cannot fail
        let mut text = serde_json::to_string_pretty(self).unwrap_or_default();
        text.push('\n');
        text
    }

    pub fn add_pub(&mut self, url: &str) -> bool {
        push_unique(&mut self.pubs, url)
    }

    pub fn remove_pub(&mut self, url: &str) -> bool {
        remove_item(&mut self.pubs, url)
    }

    pub fn follow(&mut self, key: &str) -> bool {
        push_unique(&mut self.follows, key)
    }

    pub fn unfollow(&mut self, key: &str) -> bool {
        remove_item(&mut self.follows, key)
    }

    /// Order-insensitive fingerprint of the pub list.
    pub fn pubs_key(&self) -> String {
        sorted_key(&self.pubs)
    }

    pub fn follows_key(&self) -> String {
        sorted_key(&self.follows)
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) -> bool {
    if list.iter().any(|x| x == item) {
        return false;
    }
    list.push(item.to_string());
    true
}

fn remove_item(list: &mut Vec<String>, item: &str) -> bool {
    match list.iter().position(|x| x == item) {
        Some(idx) => {
            list.remove(idx);
            true
        }
        None => false,
    }
}

fn sorted_key(items: &[String]) -> String {
    let mut sorted = items.to_vec();
    sorted.sort();
    sorted.join("\n")
}

/// Raw access to wherever the document lives.
pub trait ConfigStore: Send + Sync {
    fn read_raw(&self) -> Result<String>;
    fn write_raw(&self, text: &str) -> Result<()>;

    /// Reads the document, writing the defaults back when it is missing or
    /// unreadable.
    fn load(&self) -> Result<PeerConfig> {
        if let Ok(text) = self.read_raw() {
            if let Ok(cfg) = serde_json::from_str::<PeerConfig>(&text) {
                return Ok(cfg);
            }
        }
        let cfg = PeerConfig::with_defaults();
        self.save(&cfg)?;
        Ok(cfg)
    }

    fn save(&self, cfg: &PeerConfig) -> Result<()> {
        self.write_raw(&cfg.to_pretty())
    }
}

pub struct JsonConfigFile {
    path: PathBuf,
}

impl JsonConfigFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for JsonConfigFile {
    fn read_raw(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }

    fn write_raw(&self, text: &str) -> Result<()> {
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// Volatile document, for tests and embedding.
#[derive(Default)]
pub struct MemoryConfig {
    text: Mutex<Option<String>>,
    writes: Mutex<usize>,
}

impl MemoryConfig {
    pub fn new(cfg: &PeerConfig) -> Self {
        Self { text: Mutex::new(Some(cfg.to_pretty())), writes: Mutex::new(0) }
    }

    /// Number of `write_raw` calls so far.
    pub fn writes(&self) -> usize {
        *self.writes.lock()
    }
}

impl ConfigStore for MemoryConfig {
    fn read_raw(&self) -> Result<String> {
        self.text.lock().clone().ok_or_else(|| anyhow::anyhow!("no config document"))
    }

    fn write_raw(&self, text: &str) -> Result<()> {
        *self.text.lock() = Some(text.to_string());
        *self.writes.lock() += 1;
        Ok(())
    }
}

/// What changed since the previous poll.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    pub pubs: Option<Vec<String>>,
    pub follows: Option<Vec<String>>,
}

/// Remembers the last document seen and reports list-level changes.
pub struct ConfigWatcher {
    last_text: Option<String>,
    last_pubs: String,
    last_follows: String,
}

impl ConfigWatcher {
    pub fn new(initial: &PeerConfig) -> Self {
        Self {
            last_text: None,
            last_pubs: initial.pubs_key(),
            last_follows: initial.follows_key(),
        }
    }

    /// Compares `text` with the last observed document. Unparsable text is
    /// remembered but yields no delta.
    pub fn observe(&mut self, text: &str) -> ConfigDelta {
        let mut delta = ConfigDelta::default();
        if self.last_text.as_deref() == Some(text) {
            return delta;
        }
        self.last_text = Some(text.to_string());

        let Ok(doc) = serde_json::from_str::<Value>(text) else { return delta };
        let Ok(next) = serde_json::from_value::<PeerConfig>(doc.clone()) else { return delta };

        let pubs_key = next.pubs_key();
        let follows_key = next.follows_key();
        let PeerConfig { pubs, follows } = next;

        // absent or non-array lists are "not mentioned", not "emptied"
        if doc.get("pubs").is_some_and(Value::is_array) && pubs_key != self.last_pubs {
            self.last_pubs = pubs_key;
            delta.pubs = Some(pubs);
        }
        if doc.get("follows").is_some_and(Value::is_array) && follows_key != self.last_follows {
            self.last_follows = follows_key;
            delta.follows = Some(follows);
        }
        delta
    }
}
