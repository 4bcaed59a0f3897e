//! Key Builder Module
//!
//! Derives stable cache keys from a producer name and its named arguments.

use sha2::{Digest, Sha256};

use crate::cache::payload::Payload;

/// Hex characters kept from the digest of a complex argument.
const HASH_LEN: usize = 8;

// == Args ==
/// Named arguments passed to a producer.
///
/// Order of insertion is irrelevant to the derived key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    entries: Vec<(String, Payload)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Payload>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Payload>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Payload> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// True when `name` is present with a truthy value.
    ///
    /// Strings count when they read `true`, `t`, `yes`, `y` or `1`.
    pub fn flag(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Payload::Bool(b)) => *b,
            Some(Payload::Int(i)) => *i != 0,
            Some(Payload::Str(s)) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "t" | "yes" | "y" | "1")
            }
            _ => false,
        }
    }
}

// == Key Builder ==
/// Builds `prefix:name:arg:value:...` keys.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    /// Arguments never folded into the key
    skip: Vec<String>,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches(':').to_string(),
            skip: Vec::new(),
        }
    }

    /// Excludes a named argument (e.g. the bypass flag) from keys.
    pub fn skip(mut self, name: impl Into<String>) -> Self {
        self.skip.push(name.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Derives the key for `name` called with `args`.
    ///
    /// Arguments are sorted by name; null values, names starting with `_` and
    /// skipped names are left out. Lists, maps and tables collapse to a short
    /// content hash.
    pub fn build(&self, name: &str, args: &Args) -> String {
        let mut params: Vec<(&str, &Payload)> = args
            .iter()
            .filter(|(n, v)| !v.is_null() && !self.is_internal(n))
            .collect();
        params.sort_by(|a, b| a.0.cmp(b.0));

        let mut parts = Vec::with_capacity(params.len() + 2);
        if !self.prefix.is_empty() {
            parts.push(self.prefix.clone());
        }
        parts.push(name.to_string());
        for (param, value) in params {
            parts.push(format!("{}:{}", param, key_value(value)));
        }
        parts.join(":")
    }

    fn is_internal(&self, name: &str) -> bool {
        name.starts_with('_') || self.skip.iter().any(|s| s == name)
    }
}

fn key_value(value: &Payload) -> String {
    match value {
        Payload::List(_)
        | Payload::Map(_)
        | Payload::Table(_)
        | Payload::Object { .. } => content_hash(value),
        other => other.to_string(),
    }
}

/// First hex characters of the SHA-256 of the canonical JSON form.
fn content_hash(value: &Payload) -> String {
    // serde_json maps keep keys sorted, so map argument order does not matter
    let canonical = value.to_json().to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(HASH_LEN);
    hex
}
