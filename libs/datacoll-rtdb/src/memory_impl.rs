//! In-memory store implementation
//!
//! Uses DashMap for lock-free concurrent access. Backs the test suite and
//! single-process deployments that do not need an external Redis.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::traits::{glob_regex, BusMessage, Rtdb, Subscription};

struct BusSubscriber {
    channels: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
}

/// In-memory realtime store with an in-process change bus
#[derive(Default)]
pub struct MemoryRtdb {
    hash_store: DashMap<String, DashMap<String, String>>,
    list_store: DashMap<String, RwLock<VecDeque<String>>>,
    set_store: DashMap<String, DashSet<String>>,
    subscribers: Arc<Mutex<Vec<BusSubscriber>>>,
}

impl MemoryRtdb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all data and subscriptions (test helper)
    pub fn clear(&self) {
        self.hash_store.clear();
        self.list_store.clear();
        self.set_store.clear();
        self.subscribers.lock().clear();
    }

    fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .hash_store
            .iter()
            .map(|e| e.key().clone())
            .chain(self.list_store.iter().map(|e| e.key().clone()))
            .chain(self.set_store.iter().map(|e| e.key().clone()))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Redis LRANGE/LTRIM index semantics; `None` means an empty range
    fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
        let len = len as isize;
        let mut start = if start < 0 { len + start } else { start };
        let mut stop = if stop < 0 { len + stop } else { stop };
        if start < 0 {
            start = 0;
        }
        if stop >= len {
            stop = len - 1;
        }
        if start > stop || start >= len || stop < 0 {
            return None;
        }
        Some((start as usize, stop as usize))
    }
}

#[async_trait]
impl Rtdb for MemoryRtdb {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.hash_store.contains_key(key)
            || self.list_store.contains_key(key)
            || self.set_store.contains_key(key))
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let mut removed = 0;
        for key in keys {
            let mut hit = false;
            hit |= self.hash_store.remove(key).is_some();
            hit |= self.list_store.remove(key).is_some();
            hit |= self.set_store.remove(key).is_some();
            if hit {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let re = glob_regex(pattern)?;
        Ok(self
            .all_keys()
            .into_iter()
            .filter(|k| re.is_match(k))
            .collect())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hash_store
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        Ok(self
            .hash_store
            .get(key)
            .and_then(|h| h.get(field).map(|v| v.clone())))
    }

    async fn hash_set_multi(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let hash = self.hash_store.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self
            .hash_store
            .get(key)
            .map(|h| {
                h.iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_rpush(&self, key: &str, value: &str) -> Result<()> {
        self.list_store
            .entry(key.to_string())
            .or_insert_with(|| RwLock::new(VecDeque::new()))
            .write()
            .push_back(value.to_string());
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        Ok(self
            .list_store
            .get(key)
            .map(|l| {
                let list = l.read();
                match Self::normalize_range(list.len(), start, stop) {
                    Some((start, stop)) => list
                        .iter()
                        .skip(start)
                        .take(stop - start + 1)
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                }
            })
            .unwrap_or_default())
    }

    async fn list_index(&self, key: &str, index: isize) -> Result<Option<String>> {
        Ok(self.list_store.get(key).and_then(|l| {
            let list = l.read();
            let idx = if index < 0 {
                list.len() as isize + index
            } else {
                index
            };
            if idx < 0 {
                return None;
            }
            list.get(idx as usize).cloned()
        }))
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        if let Some(l) = self.list_store.get(key) {
            let mut list = l.write();
            match Self::normalize_range(list.len(), start, stop) {
                Some((start, stop)) => {
                    let kept: VecDeque<String> = list
                        .iter()
                        .skip(start)
                        .take(stop - start + 1)
                        .cloned()
                        .collect();
                    *list = kept;
                },
                None => list.clear(),
            }
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .set_store
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .set_store
            .get(key)
            .map(|s| s.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .set_store
            .get(key)
            .map(|s| {
                let mut members: Vec<String> = s.iter().map(|m| m.clone()).collect();
                members.sort();
                members
            })
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        let mut subscribers = self.subscribers.lock();
        let mut reached = 0;
        subscribers.retain(|sub| !sub.tx.is_closed());
        for sub in subscribers.iter() {
            if sub.channels.iter().any(|c| c == channel) {
                let msg = BusMessage {
                    channel: channel.to_string(),
                    payload: message.to_string(),
                };
                if sub.tx.try_send(msg).is_ok() {
                    reached += 1;
                }
            }
        }
        Ok(reached)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(256);
        self.subscribers.lock().push(BusSubscriber {
            channels: channels.to_vec(),
            tx,
        });
        Ok(Subscription::new(rx, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Rtdb;

    #[tokio::test]
    async fn hash_and_set_ops() {
        let db = MemoryRtdb::new();
        db.hash_set("HS:DEVICE:1", "ip", "127.0.0.1").await.unwrap();
        db.hash_set("HS:DEVICE:1", "port", "2404").await.unwrap();
        assert!(db.exists("HS:DEVICE:1").await.unwrap());
        assert_eq!(
            db.hash_get("HS:DEVICE:1", "ip").await.unwrap().as_deref(),
            Some("127.0.0.1")
        );
        let all = db.hash_get_all("HS:DEVICE:1").await.unwrap();
        assert_eq!(all.len(), 2);

        assert!(db.sadd("SET:DEVICE", "1").await.unwrap());
        assert!(!db.sadd("SET:DEVICE", "1").await.unwrap());
        assert_eq!(db.smembers("SET:DEVICE").await.unwrap(), vec!["1"]);
        assert_eq!(db.del(&["HS:DEVICE:1".to_string()]).await.unwrap(), 1);
        assert!(!db.exists("HS:DEVICE:1").await.unwrap());
    }

    #[tokio::test]
    async fn list_ranges_follow_redis_semantics() {
        let db = MemoryRtdb::new();
        for v in ["a", "b", "c", "d"] {
            db.list_rpush("LST:X", v).await.unwrap();
        }
        assert_eq!(db.list_range("LST:X", 0, -1).await.unwrap().len(), 4);
        assert_eq!(db.list_range("LST:X", -2, -1).await.unwrap(), vec!["c", "d"]);
        assert_eq!(
            db.list_index("LST:X", -1).await.unwrap().as_deref(),
            Some("d")
        );
        db.list_trim("LST:X", -2, -1).await.unwrap();
        assert_eq!(db.list_range("LST:X", 0, -1).await.unwrap(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn bus_delivers_to_matching_subscribers_only() {
        let db = MemoryRtdb::new();
        let mut sub = db
            .subscribe(&["CHANNEL:DEVICE_ADD".to_string()])
            .await
            .unwrap();
        let reached = db.publish("CHANNEL:DEVICE_ADD", "{\"id\":\"1\"}").await.unwrap();
        assert_eq!(reached, 1);
        let reached = db.publish("CHANNEL:DEVICE_DEL", "\"1\"").await.unwrap();
        assert_eq!(reached, 0);

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.channel, "CHANNEL:DEVICE_ADD");
        assert_eq!(msg.payload, "{\"id\":\"1\"}");
    }
}
