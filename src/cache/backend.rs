//! Backend Module
//!
//! The storage engine seam. A backend moves bytes; serialization, TTL policy and
//! circuit breaking live above it in the store.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::StoreError;

// == Backend Trait ==
/// A Redis-compatible key-value engine.
///
/// Every method may fail with [`StoreError::Transient`] on connectivity faults.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a value; `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<(), StoreError>;

    /// Removes keys and returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Keys matching a glob pattern, at most `limit` of them when given.
    async fn scan(&self, pattern: &str, limit: Option<usize>) -> Result<Vec<String>, StoreError>;

    /// Remaining TTL in seconds; `None` for no expiry or a missing key.
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Stored value size in bytes; `None` for a missing key.
    async fn size(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Drops every key in the current database.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Server metrics as flat `name -> value` pairs.
    async fn info(&self) -> Result<BTreeMap<String, String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Re-establishes the connection after a transient failure.
    async fn reconnect(&self) -> Result<(), StoreError>;

    /// Asks the engine to release unused memory.
    async fn purge_memory(&self) -> Result<(), StoreError>;

    /// Per-database keyspace summary (`db0 -> keys=..,expires=..`).
    async fn keyspace(&self) -> Result<BTreeMap<String, String>, StoreError>;
}

// == INFO Parsing ==
/// Parses `INFO` output (`name:value` lines, `#` section headers) into pairs.
pub fn parse_info(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Extracts `keys=N` from a keyspace line such as `keys=12,expires=3,avg_ttl=0`.
pub fn keyspace_key_count(line: &str) -> u64 {
    line.split(',')
        .filter_map(|part| part.strip_prefix("keys="))
        .find_map(|n| n.parse().ok())
        .unwrap_or(0)
}

// == Glob Matching ==
/// Redis-style glob match: `*`, `?`, `[abc]`, `[^a]`, `[a-z]` and `\` escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    match_bytes(pattern.as_bytes(), key.as_bytes())
}

fn match_bytes(pattern: &[u8], key: &[u8]) -> bool {
    let (mut p, mut k) = (0, 0);
    // Backtrack point for the most recent '*'
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p, k));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    k += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, key[k]) {
                        if matched {
                            p = next;
                            k += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == key[k] {
                        p += 2;
                        k += 1;
                        continue;
                    }
                }
                c => {
                    if c == key[k] {
                        p += 1;
                        k += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((sp, sk)) => {
                p = sp + 1;
                k = sk + 1;
                star = Some((sp, sk + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Matches one byte against the class starting at `pattern[start] == b'['`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` for an unterminated class.
fn match_class(pattern: &[u8], start: usize, byte: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == byte;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= (lo..=hi).contains(&byte);
            i += 3;
        } else {
            matched |= pattern[i] == byte;
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
