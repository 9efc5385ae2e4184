#![allow(dead_code)]

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dovepub::store::local::content_hash;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;

/// Test author able to produce signed envelopes.
pub struct Author {
    key: SigningKey,
}

impl Author {
    pub fn generate() -> Self {
        Self { key: SigningKey::generate(&mut OsRng) }
    }

    pub fn pubkey(&self) -> String {
        STANDARD.encode(self.key.verifying_key().to_bytes())
    }

    /// Envelope whose opened form is `<ts><hash of body>`.
    pub fn sign_at(&self, ts: u64, body: &str) -> String {
        let opened = format!("{:013}{}", ts, content_hash(body));
        let sig = self.key.sign(opened.as_bytes());
        let mut signed = sig.to_bytes().to_vec();
        signed.extend_from_slice(opened.as_bytes());
        format!("{}{}", self.pubkey(), STANDARD.encode(signed))
    }

    pub fn sign(&self, body: &str) -> String {
        self.sign_at(chrono::Utc::now().timestamp_millis() as u64, body)
    }
}

/// Polls `check` every 20ms until it holds or `limit` runs out.
pub async fn wait_for<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
