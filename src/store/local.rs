//! Minimal local implementation of [`RecordStore`].
//!
//! Layout under `<root>/<namespace>/`:
//! - `blobs/<hex sha256>`: raw blobs, envelopes included
//! - `hashlog.json`: envelope hashes in arrival order
//!
//! Content hashes are standard base64 of SHA-256 (44 characters). Envelopes
//! are `<author key><base64(signature || message)>` with ed25519 keys.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey, SIGNATURE_LENGTH};
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{Latest, LogEntry, RecordStore};
use crate::parser::token::{is_token, opened_hash, opened_timestamp, OPENED_LEN, TOKEN_LEN};
use crate::parser::yaml;

const HASHLOG: &str = "hashlog.json";

/// Content hash of a blob.
pub fn content_hash(blob: &str) -> String {
    STANDARD.encode(Sha256::digest(blob.as_bytes()))
}

/// Verifies an envelope and returns the signed message.
pub fn open_envelope(envelope: &str) -> Result<String> {
    let author = envelope
        .get(..TOKEN_LEN)
        .filter(|a| is_token(a))
        .ok_or_else(|| anyhow!("envelope has no author key"))?;
    let key_bytes: [u8; 32] = STANDARD
        .decode(author)?
        .try_into()
        .map_err(|_| anyhow!("author key is not 32 bytes"))?;
    let key = VerifyingKey::from_bytes(&key_bytes)?;

    let signed = STANDARD.decode(&envelope[TOKEN_LEN..])?;
    if signed.len() < SIGNATURE_LENGTH {
        bail!("signed part too short ({} bytes)", signed.len());
    }
    let (sig, message) = signed.split_at(SIGNATURE_LENGTH);
    let sig = Signature::from_slice(sig)?;
    key.verify_strict(message, &sig)?;
    Ok(String::from_utf8(message.to_vec())?)
}

#[derive(Debug, Clone)]
struct Record {
    hash: String,
    sig: String,
    author: String,
    opened: String,
    timestamp: u64,
}

impl Record {
    fn from_envelope(hash: String, sig: &str) -> Result<Self> {
        let opened = open_envelope(sig)?;
        if opened.len() < OPENED_LEN {
            bail!("opened form too short ({} chars)", opened.len());
        }
        let timestamp = opened_timestamp(&opened).ok_or_else(|| anyhow!("no timestamp prefix"))?;
        Ok(Self {
            hash,
            sig: sig.to_string(),
            author: sig[..TOKEN_LEN].to_string(),
            opened,
            timestamp,
        })
    }
}

struct Inner {
    /// Only used by in-memory stores.
    blobs: HashMap<String, String>,
    log: Vec<Record>,
    seen: HashSet<String>,
    /// Cleared when an existing hashlog could not be read; the file is then
    /// left untouched for the life of the store.
    hashlog_writable: bool,
}

pub struct LocalStore {
    dir: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            blobs: HashMap::new(),
            log: Vec::new(),
            seen: HashSet::new(),
            hashlog_writable: true,
        }
    }
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self { dir: None, inner: Mutex::new(Inner::default()) }
    }

    /// Opens (creating if needed) the store for `namespace` under `root`.
    /// Log entries that no longer open are pruned.
    pub fn start<P: AsRef<Path>>(root: P, namespace: &str) -> Result<Self> {
        let dir = root.as_ref().join(namespace);
        fs::create_dir_all(dir.join("blobs"))
            .with_context(|| format!("creating store at {}", dir.display()))?;

        let store = Self { dir: Some(dir.clone()), inner: Mutex::new(Inner::default()) };

        let log_path = dir.join(HASHLOG);
        let mut hashlog_writable = true;
        let hashes: Vec<String> = match fs::read_to_string(&log_path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(hashes) => hashes,
                Err(e) => {
                    warn!("[repair] {} is unreadable, leaving it untouched: {}", log_path.display(), e);
                    hashlog_writable = false;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("[repair] could not read {}, leaving it untouched: {}", log_path.display(), e);
                hashlog_writable = false;
                Vec::new()
            }
        };

        let mut kept = Vec::with_capacity(hashes.len());
        for hash in &hashes {
            let Some(sig) = store.read_blob(hash) else { continue };
            match Record::from_envelope(hash.clone(), &sig) {
                Ok(record) => kept.push(record),
                Err(e) => debug!("[repair] dropping {}: {}", hash, e),
            }
        }

        {
            let mut inner = store.inner.lock();
            inner.hashlog_writable = hashlog_writable;
            inner.seen = kept.iter().map(|r| r.hash.clone()).collect();
            inner.log = kept;
            if inner.log.len() != hashes.len() {
                info!("[repair] pruned {} invalid entries from hashlog", hashes.len() - inner.log.len());
                store.write_hashlog(&inner)?;
            }
        }

        Ok(store)
    }

    fn blob_path(&self, hash: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let raw = STANDARD.decode(hash).ok()?;
        Some(dir.join("blobs").join(hex::encode(raw)))
    }

    fn read_blob(&self, hash: &str) -> Option<String> {
        fs::read_to_string(self.blob_path(hash)?).ok()
    }

    fn write_hashlog(&self, inner: &Inner) -> Result<()> {
        let Some(dir) = &self.dir else { return Ok(()) };
        if !inner.hashlog_writable {
            debug!("[repair] hashlog not rewritten: original was unreadable");
            return Ok(());
        }
        let hashes: Vec<&str> = inner.log.iter().map(|r| r.hash.as_str()).collect();
        fs::write(dir.join(HASHLOG), serde_json::to_string(&hashes)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for LocalStore {
    fn open(&self, envelope: &str) -> Result<String> {
        open_envelope(envelope)
    }

    fn add(&self, envelope: &str) -> Result<bool> {
        let hash = content_hash(envelope);
        let record = Record::from_envelope(hash.clone(), envelope)?;
        if self.inner.lock().seen.contains(&hash) {
            return Ok(false);
        }

        self.make(envelope)?;

        let mut inner = self.inner.lock();
        if !inner.seen.insert(hash) {
            return Ok(false);
        }
        inner.log.push(record);
        self.write_hashlog(&inner)?;
        Ok(true)
    }

    fn make(&self, blob: &str) -> Result<String> {
        let hash = content_hash(blob);
        match self.blob_path(&hash) {
            Some(path) => {
                if !path.exists() {
                    fs::write(&path, blob).with_context(|| format!("writing blob {}", hash))?;
                }
            }
            None => {
                self.inner.lock().blobs.entry(hash.clone()).or_insert_with(|| blob.to_string());
            }
        }
        Ok(hash)
    }

    fn get(&self, hash: &str) -> Result<Option<String>> {
        if self.dir.is_some() {
            return Ok(self.read_blob(hash));
        }
        Ok(self.inner.lock().blobs.get(hash).cloned())
    }

    fn get_latest(&self, author: &str) -> Result<Option<Latest>> {
        let inner = self.inner.lock();
        Ok(inner
            .log
            .iter()
            .filter(|r| r.author == author)
            .max_by_key(|r| r.timestamp)
            .map(|r| Latest { sig: r.sig.clone() }))
    }

    fn query(&self) -> Result<Vec<LogEntry>> {
        let mut records = self.inner.lock().log.clone();
        records.sort_by_key(|r| r.timestamp);
        Ok(records
            .into_iter()
            .map(|r| {
                let text = opened_hash(&r.opened).and_then(|h| self.get(h).ok().flatten());
                LogEntry {
                    hash: r.hash,
                    sig: r.sig,
                    author: r.author,
                    opened: r.opened,
                    timestamp: r.timestamp,
                    text,
                }
            })
            .collect())
    }

    fn parse_yaml(&self, text: &str) -> Result<Value> {
        yaml::parse(text)
    }
}
