//! Shape checks for 44-character identifiers (content hashes and author keys).
//!
//! Both are standard base64 of 32 bytes: 43 alphabet characters and a single
//! `=` pad. Nothing here interprets the bytes.

pub const TOKEN_LEN: usize = 44;

/// Decoded opened form: 13-digit millisecond timestamp followed by a hash.
pub const OPENED_LEN: usize = 13 + TOKEN_LEN;

#[inline]
fn is_b64(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Exactly `[A-Za-z0-9+/]{43}=`.
pub fn is_token(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == TOKEN_LEN && b[..TOKEN_LEN - 1].iter().all(|&c| is_b64(c)) && b[TOKEN_LEN - 1] == b'='
}

/// Any 44-character string. Field values are compared by length only, the
/// inline scanner is the one that insists on the full shape.
pub fn has_token_len(s: &str) -> bool {
    s.len() == TOKEN_LEN
}

/// Referenced hash of an opened envelope (`<13-digit ts><hash>`).
pub fn opened_hash(opened: &str) -> Option<&str> {
    if opened.len() < OPENED_LEN {
        return None;
    }
    opened.get(13..OPENED_LEN).filter(|h| is_token(h))
}

/// Millisecond timestamp prefix of an opened envelope.
pub fn opened_timestamp(opened: &str) -> Option<u64> {
    let ts = opened.get(..13)?;
    if !ts.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    ts.parse().ok()
}

/// Tokens embedded in free text. A token must be bounded on the left by the
/// start of the string or a non-alphabet character, and must not be followed
/// by another alphabet character.
pub fn inline_tokens(text: &str) -> Vec<&str> {
    let b = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < b.len() {
        if !is_b64(b[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < b.len() && is_b64(b[i]) {
            i += 1;
        }
        let run = i - start;
        if run == TOKEN_LEN - 1 && b.get(i) == Some(&b'=') && !b.get(i + 1).is_some_and(|&c| is_b64(c)) {
            // all bytes in range are ASCII, so slicing is on char boundaries
            out.push(&text[start..=i]);
        }
    }
    out
}
