//! Record storage.
//!
//! Records are stored in their persisted encoding so that what survives a
//! restart is exactly what [`NodeRecord::to_bytes`] writes.

use crate::record::NodeRecord;
use crate::serialization::SerializationError;
use crate::types::NodeId;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NotFound(NodeId),

    #[error("Corrupt record: {0}")]
    Serialization(#[from] SerializationError),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, node_id: &NodeId) -> Result<Option<NodeRecord>, StoreError>;

    /// Insert or replace the record keyed by its node id.
    async fn put(&self, record: &NodeRecord) -> Result<(), StoreError>;

    async fn delete(&self, node_id: &NodeId) -> Result<(), StoreError>;

    async fn list_ids(&self) -> Result<Vec<NodeId>, StoreError>;
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<NodeId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, node_id: &NodeId) -> Result<Option<NodeRecord>, StoreError> {
        let records = self.records.read().await;
        match records.get(node_id) {
            Some(bytes) => Ok(Some(NodeRecord::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &NodeRecord) -> Result<(), StoreError> {
        let bytes = record.to_bytes()?;
        self.records.write().await.insert(record.node_id.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, node_id: &NodeId) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .remove(node_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(node_id.clone()))
    }

    async fn list_ids(&self) -> Result<Vec<NodeId>, StoreError> {
        let mut ids: Vec<NodeId> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeRecordBuilder;
    use crate::types::{Nonce, PcrPolicy, SecretShare};

    fn record(id: &str) -> NodeRecord {
        NodeRecordBuilder::new()
            .node_id(NodeId(id.to_string()))
            .network("10.0.0.1", 9002)
            .secret_share(SecretShare(vec![3u8; 32]))
            .tpm_policy(PcrPolicy::new("0x1"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        let mut record = record("a");
        record.challenge_nonce = Some(Nonce("x".repeat(20)));

        store.put(&record).await.unwrap();
        let loaded = store.get(&record.node_id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_missing() {
        let store = MemoryStore::new();
        assert!(store.get(&NodeId("nope".to_string())).await.unwrap().is_none());
        assert!(matches!(
            store.delete(&NodeId("nope".to_string())).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = MemoryStore::new();
        store.put(&record("b")).await.unwrap();
        store.put(&record("a")).await.unwrap();

        assert_eq!(
            store.list_ids().await.unwrap(),
            vec![NodeId("a".to_string()), NodeId("b".to_string())]
        );

        store.delete(&NodeId("a".to_string())).await.unwrap();
        assert_eq!(store.list_ids().await.unwrap(), vec![NodeId("b".to_string())]);
    }
}
