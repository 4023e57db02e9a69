//! Trait definitions for the realtime store abstraction

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One message delivered from the change bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel the message was published on
    pub channel: String,
    /// Raw JSON payload
    pub payload: String,
}

/// Live subscription handle
///
/// Messages arrive on the embedded receiver; dropping the handle tears the
/// subscription down (the backend forwarding task is aborted).
pub struct Subscription {
    rx: mpsc::Receiver<BusMessage>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<BusMessage>, task: Option<JoinHandle<()>>) -> Self {
        Self { rx, task }
    }

    /// Receive the next message; `None` when the backend is gone
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Unified realtime store trait
///
/// Mirrors the subset of Redis the system actually uses: hashes for
/// entities, sets for identity enumeration, lists for time/frame logs,
/// pub/sub for the change bus. All values are UTF-8 strings; the key
/// schema lives in [`crate::keyspace`].
#[async_trait]
pub trait Rtdb: Send + Sync + 'static {
    // ========== Keys ==========

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Scan keys matching a Redis-style glob pattern (`*`, `?`, `[...]`)
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>>;

    // ========== Hash Operations ==========

    /// Set a single hash field
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Get a single hash field
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set multiple hash fields at once
    async fn hash_set_multi(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Get all fields of a hash (empty map when the key is missing)
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    // ========== List Operations ==========

    /// Append to the right of a list
    async fn list_rpush(&self, key: &str, value: &str) -> Result<()>;

    /// Fetch a range of list elements (negative indexes count from the end)
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Fetch one element by index (negative counts from the end)
    async fn list_index(&self, key: &str, index: isize) -> Result<Option<String>>;

    /// Trim a list to the given range
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()>;

    // ========== Set Operations ==========

    /// Add a member to a set; false if it was already present
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove a member from a set; false if it was absent
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;

    /// All members of a set
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    // ========== Change Bus ==========

    /// Publish a message, returning the number of subscribers reached
    async fn publish(&self, channel: &str, message: &str) -> Result<u32>;

    /// Subscribe to a fixed set of channels
    async fn subscribe(&self, channels: &[String]) -> Result<Subscription>;
}

/// Compile a Redis-style glob pattern (`*`, `?`, `[...]`) into an anchored
/// regex
///
/// Used by the in-memory backend for `scan_match`; the Redis backend
/// delegates matching to the server. Everything outside the glob
/// metacharacters is escaped so literal key punctuation never acts as
/// regex syntax.
pub fn glob_regex(pattern: &str) -> Result<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                // Character classes pass through to the regex engine
                expr.push('[');
                for c in chars.by_ref() {
                    expr.push(c);
                    if c == ']' {
                        break;
                    }
                }
            },
            _ => {
                let mut buf = [0u8; 4];
                expr.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            },
        }
    }
    expr.push('$');
    Ok(regex::Regex::new(&expr)?)
}

#[cfg(test)]
mod tests {
    use super::glob_regex;

    fn matches(pattern: &str, key: &str) -> bool {
        glob_regex(pattern).unwrap().is_match(key)
    }

    #[test]
    fn glob_basics() {
        assert!(matches("HS:MAPPING:*:d1:*", "HS:MAPPING:IEC104:d1:400"));
        assert!(matches("HS:DATA:d1:*", "HS:DATA:d1:t1:i1"));
        assert!(!matches("HS:DATA:d1:*", "HS:DATA:d2:t1:i1"));
        assert!(matches("*", "anything"));
        assert!(matches("exact", "exact"));
        assert!(!matches("exact", "exact-no"));
    }

    #[test]
    fn glob_question_mark_and_classes() {
        assert!(matches("HS:DEVICE:d?", "HS:DEVICE:d7"));
        assert!(!matches("HS:DEVICE:d?", "HS:DEVICE:d77"));
        assert!(matches("HS:DEVICE:d[12]", "HS:DEVICE:d1"));
        assert!(!matches("HS:DEVICE:d[12]", "HS:DEVICE:d3"));
    }

    #[test]
    fn literal_punctuation_is_escaped() {
        assert!(!matches("LST:DATA.TIME:*", "LST:DATAxTIME:d1"));
        assert!(matches("LST:DATA.TIME:*", "LST:DATA.TIME:d1"));
    }
}
