use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StorageError;
use crate::flag::{EntityType, Flag, FlagStatus, Override};
use crate::segment::Segment;

/// Storage is the async persistence contract the evaluation engine and the
/// segment evaluator consume. The engine only reads; the mutation side is
/// used by surrounding admin tooling.
///
/// Implementations must never hand the engine an expired override:
/// `get_override` filters on expiry at read time.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get_flag(&self, key: &str) -> Result<Option<Flag>, StorageError>;
    async fn get_flags(&self) -> Result<Vec<Flag>, StorageError>;
    async fn get_all_active_flags(&self) -> Result<Vec<Flag>, StorageError>;
    async fn create_flag(&self, flag: Flag) -> Result<(), StorageError>;
    async fn update_flag(&self, flag: Flag) -> Result<(), StorageError>;
    async fn delete_flag(&self, key: &str) -> Result<(), StorageError>;

    async fn get_override(
        &self,
        flag_id: Uuid,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Override>, StorageError>;
    async fn create_override(&self, ov: Override) -> Result<(), StorageError>;
    async fn delete_override(&self, id: Uuid) -> Result<(), StorageError>;

    async fn get_segment(&self, id: Uuid) -> Result<Option<Segment>, StorageError>;
    async fn get_segment_by_name(&self, name: &str) -> Result<Option<Segment>, StorageError>;
    async fn get_child_segments(&self, parent_id: Uuid) -> Result<Vec<Segment>, StorageError>;
    async fn create_segment(&self, segment: Segment) -> Result<(), StorageError>;
    async fn update_segment(&self, segment: Segment) -> Result<(), StorageError>;
    async fn delete_segment(&self, id: Uuid) -> Result<(), StorageError>;

    async fn health_check(&self) -> Result<bool, StorageError>;
}

/// In-memory [Storage] backed by `tokio::sync::RwLock`ed maps. The default
/// backend for tests and for embedding without an external store.
#[derive(Default)]
pub struct MemoryStore {
    flags: RwLock<HashMap<String, Flag>>,
    overrides: RwLock<HashMap<Uuid, Override>>,
    segments: RwLock<HashMap<Uuid, Segment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_flag(&self, key: &str) -> Result<Option<Flag>, StorageError> {
        Ok(self.flags.read().await.get(key).cloned())
    }

    async fn get_flags(&self) -> Result<Vec<Flag>, StorageError> {
        Ok(self.flags.read().await.values().cloned().collect())
    }

    async fn get_all_active_flags(&self) -> Result<Vec<Flag>, StorageError> {
        Ok(self
            .flags
            .read()
            .await
            .values()
            .filter(|f| f.status == FlagStatus::Active)
            .cloned()
            .collect())
    }

    async fn create_flag(&self, flag: Flag) -> Result<(), StorageError> {
        let mut flags = self.flags.write().await;
        if flags.contains_key(&flag.key) {
            return Err(StorageError::Duplicate {
                kind: "flag",
                name: flag.key,
            });
        }
        flags.insert(flag.key.clone(), flag);
        Ok(())
    }

    async fn update_flag(&self, flag: Flag) -> Result<(), StorageError> {
        let mut flags = self.flags.write().await;
        if !flags.contains_key(&flag.key) {
            return Err(StorageError::NotFound {
                kind: "flag",
                id: flag.key,
            });
        }
        flags.insert(flag.key.clone(), flag);
        Ok(())
    }

    async fn delete_flag(&self, key: &str) -> Result<(), StorageError> {
        self.flags.write().await.remove(key);
        Ok(())
    }

    async fn get_override(
        &self,
        flag_id: Uuid,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<Override>, StorageError> {
        let now = Utc::now();
        Ok(self
            .overrides
            .read()
            .await
            .values()
            .find(|ov| {
                ov.flag_id == flag_id
                    && ov.entity_type == entity_type
                    && ov.entity_id == entity_id
                    && !ov.is_expired(now)
            })
            .cloned())
    }

    async fn create_override(&self, ov: Override) -> Result<(), StorageError> {
        self.overrides.write().await.insert(ov.id, ov);
        Ok(())
    }

    async fn delete_override(&self, id: Uuid) -> Result<(), StorageError> {
        self.overrides.write().await.remove(&id);
        Ok(())
    }

    async fn get_segment(&self, id: Uuid) -> Result<Option<Segment>, StorageError> {
        Ok(self.segments.read().await.get(&id).cloned())
    }

    async fn get_segment_by_name(&self, name: &str) -> Result<Option<Segment>, StorageError> {
        Ok(self
            .segments
            .read()
            .await
            .values()
            .find(|s| s.name == name)
            .cloned())
    }

    async fn get_child_segments(&self, parent_id: Uuid) -> Result<Vec<Segment>, StorageError> {
        Ok(self
            .segments
            .read()
            .await
            .values()
            .filter(|s| s.parent_segment_id == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn create_segment(&self, segment: Segment) -> Result<(), StorageError> {
        let mut segments = self.segments.write().await;
        // Segment names are the handle rule conditions reference; keep them unique.
        if segments.values().any(|s| s.name == segment.name) {
            return Err(StorageError::Duplicate {
                kind: "segment",
                name: segment.name,
            });
        }
        segments.insert(segment.id, segment);
        Ok(())
    }

    async fn update_segment(&self, segment: Segment) -> Result<(), StorageError> {
        let mut segments = self.segments.write().await;
        if !segments.contains_key(&segment.id) {
            return Err(StorageError::NotFound {
                kind: "segment",
                id: segment.id.to_string(),
            });
        }
        segments.insert(segment.id, segment);
        Ok(())
    }

    async fn delete_segment(&self, id: Uuid) -> Result<(), StorageError> {
        self.segments.write().await.remove(&id);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, StorageError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{basic_flag, basic_override, basic_segment};
    use chrono::Duration;

    #[tokio::test]
    async fn create_flag_rejects_duplicate_keys() {
        let store = MemoryStore::new();
        store.create_flag(basic_flag("checkout")).await.unwrap();
        let err = store.create_flag(basic_flag("checkout")).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { kind: "flag", .. }));
    }

    #[tokio::test]
    async fn active_flag_listing_filters_by_status() {
        let store = MemoryStore::new();
        store.create_flag(basic_flag("active")).await.unwrap();
        let mut archived = basic_flag("archived");
        archived.status = FlagStatus::Archived;
        store.create_flag(archived).await.unwrap();

        let active = store.get_all_active_flags().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key, "active");
        assert_eq!(store.get_flags().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_overrides_are_invisible() {
        let store = MemoryStore::new();
        let flag = basic_flag("f");
        let mut ov = basic_override(flag.id, EntityType::User, "user-1", true);
        ov.expires_at = Some(Utc::now() - Duration::minutes(1));
        store.create_override(ov).await.unwrap();

        let found = store
            .get_override(flag.id, EntityType::User, "user-1")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn segment_names_are_unique() {
        let store = MemoryStore::new();
        store.create_segment(basic_segment("beta")).await.unwrap();
        let err = store.create_segment(basic_segment("beta")).await.unwrap_err();
        assert!(matches!(err, StorageError::Duplicate { kind: "segment", .. }));

        let found = store.get_segment_by_name("beta").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn child_segments_index_by_parent() {
        let store = MemoryStore::new();
        let parent = basic_segment("parent");
        let mut child = basic_segment("child");
        child.parent_segment_id = Some(parent.id);
        let parent_id = parent.id;
        store.create_segment(parent).await.unwrap();
        store.create_segment(child).await.unwrap();

        let children = store.get_child_segments(parent_id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "child");
    }
}
