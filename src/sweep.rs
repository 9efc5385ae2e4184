//! Periodic passes over the store: retiring satisfied missing hashes and
//! discovering new references from the materialized log.

use serde_json::Value;
use tracing::{debug, info};

use crate::gossip::GossipScheduler;
use crate::parser::token::{has_token_len, opened_hash};
use crate::store::RecordStore;

pub const SOURCE_OPENED: &str = "opened";
pub const SOURCE_LOG_SCAN: &str = "yaml.scan";

/// Removes every missing hash the store now holds. Returns the retired hashes.
pub fn retire_fulfilled(gossip: &GossipScheduler, store: &dyn RecordStore) -> Vec<String> {
    let mut retired = Vec::new();
    for hash in gossip.missing_hashes() {
        if !store.has(&hash) {
            continue;
        }
        // may have been retired by a concurrent pass
        if let Some(record) = gossip.retire(&hash) {
            info!("[gossip] fulfilled {} (from {})", hash, record.source);
            retired.push(hash);
        }
    }
    retired
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Entries in the log.
    pub entries: usize,
    /// Hashes newly reported missing.
    pub discovered: usize,
}

/// Walks the whole log, reporting referenced content that is not stored.
pub fn scan_log(gossip: &GossipScheduler, store: &dyn RecordStore) -> ScanReport {
    let entries = match store.query() {
        Ok(entries) => entries,
        Err(e) => {
            debug!("log query failed: {}", e);
            return ScanReport::default();
        }
    };

    let mut report = ScanReport { entries: entries.len(), discovered: 0 };
    let mut note = |hash: &str, source: &str| {
        if has_token_len(hash) && !gossip.is_missing(hash) && !store.has(hash) && gossip.report_missing(hash, source) {
            report.discovered += 1;
        }
    };

    for entry in &entries {
        if let Some(hash) = opened_hash(&entry.opened) {
            note(hash, SOURCE_OPENED);
        }

        let Some(text) = entry.text.as_deref().filter(|t| !t.is_empty()) else { continue };
        let Ok(doc) = store.parse_yaml(text) else { continue };
        if !doc.is_object() {
            continue;
        }
        for field in ["previous", "reply"] {
            if let Some(hash) = doc.get(field).and_then(Value::as_str) {
                note(hash, SOURCE_LOG_SCAN);
            }
        }
        if let Some(key) = doc.get("replyTo").and_then(Value::as_str) {
            if has_token_len(key) {
                gossip.follows().add(key);
            }
        }
    }
    report
}
