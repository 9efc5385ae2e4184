//! Capability interface over the content-addressed record store.
//!
//! The engine never looks inside envelopes or blobs beyond what these calls
//! return. Every method may fail; callers treat a failure as "absent" or
//! "not stored" for that call only.

pub mod local;

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

pub use local::LocalStore;

/// Newest known envelope by an author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Latest {
    pub sig: String,
}

/// One decoded entry of the materialized log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub hash: String,
    pub sig: String,
    pub author: String,
    pub opened: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

pub trait RecordStore: Send + Sync {
    /// Verifies a signed envelope and returns its decoded form.
    fn open(&self, envelope: &str) -> Result<String>;

    /// Persists a verified envelope. `Ok(false)` when it was already held.
    fn add(&self, envelope: &str) -> Result<bool>;

    /// Stores a raw blob and returns its content hash.
    fn make(&self, blob: &str) -> Result<String>;

    fn get(&self, hash: &str) -> Result<Option<String>>;

    fn get_latest(&self, author: &str) -> Result<Option<Latest>>;

    fn query(&self) -> Result<Vec<LogEntry>>;

    fn parse_yaml(&self, text: &str) -> Result<Value>;

    /// `get` with failures folded into "absent".
    fn has(&self, hash: &str) -> bool {
        matches!(self.get(hash), Ok(Some(_)))
    }
}
