//! Front-matter dialect used by log payloads.
//!
//! ```text
//! ---
//! name: ev
//! previous: <hash>
//! body: first line
//! second line of the body
//! ---
//! ```
//!
//! Each `key: value` line opens a field, any other line continues the
//! previous field's value. Values are plain strings.

use anyhow::{bail, Result};
use serde_json::{Map, Value};

fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    Some((key, value.trim()))
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

pub fn parse(text: &str) -> Result<Value> {
    // flow-style documents are JSON
    if text.trim_start().starts_with('{') {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            bail!("not an object");
        }
        return Ok(value);
    }

    let mut fields: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.trim() == "---" {
            continue;
        }
        if let Some((key, value)) = split_field(line) {
            fields.push((key.to_string(), unquote(value).to_string()));
        } else if let Some((_, value)) = fields.last_mut() {
            value.push('\n');
            value.push_str(line);
        } else if !line.trim().is_empty() {
            bail!("not a structured payload");
        }
    }

    if fields.is_empty() {
        bail!("no fields");
    }

    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key, Value::String(value.trim_end().to_string()));
    }
    Ok(Value::Object(map))
}
