//! In-memory collaborators for testing
//!
//! A HashMap object store, a push channel that records instead of
//! delivering, and an audit bus that collects events. Failures are
//! scripted per key, in the spirit of the handlers' real error paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::import::adapters::traits::{AuditBus, ObjectStorage, PushChannel};
use crate::import::types::AuditEvent;

/// Object store backed by a HashMap.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    /// Keys whose reads are scripted to fail
    failing: Mutex<HashSet<String>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the client's out-of-band upload.
    pub fn put(&self, key: &str, body: impl Into<Bytes>) {
        self.objects.lock().unwrap().insert(key.to_string(), body.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    /// Script every read of `key` to fail with a backend error.
    pub fn fail_reads_of(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn presign_put(&self, key: &str, expires_in: u32) -> Result<String> {
        log::debug!("[memory storage] presign_put({}, {}s)", key, expires_in);
        Ok(format!("memory://invoices/{}?expires={}", key, expires_in))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if self.failing.lock().unwrap().contains(key) {
            bail!("scripted object store failure for {}", key);
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Push channel that records every delivery attempt.
#[derive(Default)]
pub struct RecordingChannel {
    pushes: Mutex<Vec<(String, Value)>>,
    terminations: Mutex<Vec<String>>,
    dead: Mutex<bool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent push/terminate behave like a torn-down
    /// connection: nothing delivered, plain `false` back.
    pub fn go_dead(&self) {
        *self.dead.lock().unwrap() = true;
    }

    /// Payloads pushed to one connection, in order.
    pub fn pushes_for(&self, connection_id: &str) -> Vec<Value> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .filter(|(conn, _)| conn == connection_id)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Status strings pushed to one connection, in order, skipping
    /// payloads without a status field (grants, explanatory messages).
    pub fn statuses_for(&self, connection_id: &str) -> Vec<String> {
        self.pushes_for(connection_id)
            .iter()
            .filter_map(|payload| payload.get("status").and_then(Value::as_str).map(String::from))
            .collect()
    }

    pub fn termination_count(&self, connection_id: &str) -> usize {
        self.terminations
            .lock()
            .unwrap()
            .iter()
            .filter(|conn| *conn == connection_id)
            .count()
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn push(&self, connection_id: &str, payload: Value) -> bool {
        if *self.dead.lock().unwrap() {
            return false;
        }
        log::debug!("[recording channel] push({}, {})", connection_id, payload);
        self.pushes.lock().unwrap().push((connection_id.to_string(), payload));
        true
    }

    async fn terminate(&self, connection_id: &str) -> bool {
        if *self.dead.lock().unwrap() {
            return false;
        }
        log::debug!("[recording channel] terminate({})", connection_id);
        self.terminations.lock().unwrap().push(connection_id.to_string());
        true
    }
}

/// Audit bus that collects published events.
#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| e.reason().map(String::from))
            .collect()
    }
}

#[async_trait]
impl AuditBus for RecordingBus {
    async fn publish(&self, event: AuditEvent) {
        log::debug!("[recording bus] publish({:?})", event.reason());
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryObjectStorage::new();
        storage.put("k-1", "body");

        let body = storage.get("k-1").await.unwrap().unwrap();
        assert_eq!(&body[..], b"body");

        storage.delete("k-1").await.unwrap();
        assert!(storage.get("k-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_storage_scripted_failure() {
        let storage = MemoryObjectStorage::new();
        storage.put("k-1", "body");
        storage.fail_reads_of("k-1");

        assert!(storage.get("k-1").await.is_err());
    }

    #[tokio::test]
    async fn test_recording_channel_order_and_filter() {
        let channel = RecordingChannel::new();

        channel.push("c-1", json!({"url": "u"})).await;
        channel
            .push_status("t-1", "c-1", crate::import::status::TransactionStatus::Received)
            .await;
        channel.terminate("c-1").await;

        assert_eq!(channel.pushes_for("c-1").len(), 2);
        assert_eq!(channel.statuses_for("c-1"), vec!["RECEIVED"]);
        assert_eq!(channel.termination_count("c-1"), 1);
        assert!(channel.pushes_for("c-2").is_empty());
    }

    #[tokio::test]
    async fn test_dead_channel_swallows() {
        let channel = RecordingChannel::new();
        channel.go_dead();

        assert!(!channel.push("c-1", json!({})).await);
        assert!(!channel.terminate("c-1").await);
        assert!(channel.pushes_for("c-1").is_empty());
    }
}
