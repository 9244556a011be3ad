//! In-memory implementations of the collaborator stores.
//!
//! Both types are cheap to clone (`Arc` inside) so a test can share one
//! store instance across a close/reopen cycle, the way a real deployment
//! shares the external services.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::store::{
    EntryId, ExpectedVersion, MetaRecord, MetaStore, MetaStoreError, MetaStoreResult, SegmentId,
    SegmentStore, SegmentStoreError, SegmentStoreResult,
};

#[derive(Debug, Default)]
struct SegmentData {
    entries: Vec<Bytes>,
    sealed: bool,
}

/// Process-local [`SegmentStore`].
#[derive(Clone, Default)]
pub struct InMemorySegmentStore {
    inner: Arc<InMemorySegmentStoreInner>,
}

#[derive(Default)]
struct InMemorySegmentStoreInner {
    segments: RwLock<BTreeMap<SegmentId, SegmentData>>,
    next_id: AtomicU64,
}

impl InMemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ids of all live segments, for test assertions.
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.inner.segments.read().unwrap().keys().copied().collect()
    }
}

#[async_trait]
impl SegmentStore for InMemorySegmentStore {
    async fn create(&self) -> SegmentStoreResult<SegmentId> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .segments
            .write()
            .unwrap()
            .insert(id, SegmentData::default());
        Ok(id)
    }

    async fn append(&self, segment: SegmentId, payload: Bytes) -> SegmentStoreResult<EntryId> {
        let mut segments = self.inner.segments.write().unwrap();
        let data = segments
            .get_mut(&segment)
            .ok_or(SegmentStoreError::SegmentNotFound(segment))?;
        if data.sealed {
            return Err(SegmentStoreError::SegmentSealed(segment));
        }
        data.entries.push(payload);
        Ok(data.entries.len() as EntryId - 1)
    }

    async fn read(
        &self,
        segment: SegmentId,
        first: EntryId,
        max: usize,
    ) -> SegmentStoreResult<Vec<(EntryId, Bytes)>> {
        if first < 0 {
            return Err(SegmentStoreError::EntryNotFound(segment, first));
        }
        let segments = self.inner.segments.read().unwrap();
        let data = segments
            .get(&segment)
            .ok_or(SegmentStoreError::SegmentNotFound(segment))?;
        let start = first as usize;
        if start >= data.entries.len() {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(max).min(data.entries.len());
        Ok(data.entries[start..end]
            .iter()
            .enumerate()
            .map(|(i, payload)| ((start + i) as EntryId, payload.clone()))
            .collect())
    }

    async fn last_entry(&self, segment: SegmentId) -> SegmentStoreResult<EntryId> {
        let segments = self.inner.segments.read().unwrap();
        let data = segments
            .get(&segment)
            .ok_or(SegmentStoreError::SegmentNotFound(segment))?;
        Ok(data.entries.len() as EntryId - 1)
    }

    async fn seal(&self, segment: SegmentId) -> SegmentStoreResult<()> {
        let mut segments = self.inner.segments.write().unwrap();
        let data = segments
            .get_mut(&segment)
            .ok_or(SegmentStoreError::SegmentNotFound(segment))?;
        data.sealed = true;
        Ok(())
    }

    async fn remove(&self, segment: SegmentId) -> SegmentStoreResult<()> {
        let mut segments = self.inner.segments.write().unwrap();
        segments
            .remove(&segment)
            .ok_or(SegmentStoreError::SegmentNotFound(segment))?;
        Ok(())
    }
}

/// Process-local [`MetaStore`].
#[derive(Clone, Default)]
pub struct InMemoryMetaStore {
    records: Arc<RwLock<BTreeMap<String, MetaRecord>>>,
}

impl InMemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for InMemoryMetaStore {
    async fn get(&self, key: &str) -> MetaStoreResult<Option<MetaRecord>> {
        Ok(self.records.read().unwrap().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        expected: ExpectedVersion,
    ) -> MetaStoreResult<u64> {
        let mut records = self.records.write().unwrap();
        let current = records.get(key).map(|r| r.version);
        let next = match (expected, current) {
            (ExpectedVersion::Any, current) => current.map_or(0, |v| v + 1),
            (ExpectedVersion::Absent, None) => 0,
            (ExpectedVersion::Absent, Some(_)) => return Err(MetaStoreError::BadVersion),
            (ExpectedVersion::Exact(v), Some(current)) if v == current => current + 1,
            (ExpectedVersion::Exact(_), _) => return Err(MetaStoreError::BadVersion),
        };
        records.insert(
            key.to_string(),
            MetaRecord {
                value,
                version: next,
            },
        );
        Ok(next)
    }

    async fn remove(&self, key: &str, expected: ExpectedVersion) -> MetaStoreResult<()> {
        let mut records = self.records.write().unwrap();
        let current = match records.get(key) {
            Some(record) => record.version,
            None => return Err(MetaStoreError::NotFound),
        };
        match expected {
            ExpectedVersion::Any => {}
            ExpectedVersion::Absent => return Err(MetaStoreError::BadVersion),
            ExpectedVersion::Exact(v) if v == current => {}
            ExpectedVersion::Exact(_) => return Err(MetaStoreError::BadVersion),
        }
        records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn should_assign_dense_entry_ids() {
        // given
        let store = InMemorySegmentStore::new();
        let segment = store.create().await.unwrap();

        // when
        let e0 = store.append(segment, Bytes::from("a")).await.unwrap();
        let e1 = store.append(segment, Bytes::from("b")).await.unwrap();

        // then
        assert_eq!(e0, 0);
        assert_eq!(e1, 1);
        assert_eq!(store.last_entry(segment).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn should_report_empty_segment_last_entry_as_minus_one() {
        // given
        let store = InMemorySegmentStore::new();
        let segment = store.create().await.unwrap();

        // when/then
        assert_eq!(store.last_entry(segment).await.unwrap(), -1);
    }

    #[tokio::test]
    async fn should_read_entries_in_order() {
        // given
        let store = InMemorySegmentStore::new();
        let segment = store.create().await.unwrap();
        for i in 0..5 {
            store
                .append(segment, Bytes::from(format!("value-{}", i)))
                .await
                .unwrap();
        }

        // when
        let entries = store.read(segment, 1, 3).await.unwrap();

        // then
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], (1, Bytes::from("value-1")));
        assert_eq!(entries[2], (3, Bytes::from("value-3")));
    }

    #[tokio::test]
    async fn should_return_empty_read_past_end() {
        // given
        let store = InMemorySegmentStore::new();
        let segment = store.create().await.unwrap();
        store.append(segment, Bytes::from("only")).await.unwrap();

        // when
        let entries = store.read(segment, 5, 10).await.unwrap();

        // then
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn should_reject_append_to_sealed_segment() {
        // given
        let store = InMemorySegmentStore::new();
        let segment = store.create().await.unwrap();
        store.seal(segment).await.unwrap();

        // when
        let result = store.append(segment, Bytes::from("late")).await;

        // then
        assert_eq!(result, Err(SegmentStoreError::SegmentSealed(segment)));
    }

    #[tokio::test]
    async fn should_fail_reads_of_removed_segment() {
        // given
        let store = InMemorySegmentStore::new();
        let segment = store.create().await.unwrap();
        store.remove(segment).await.unwrap();

        // when
        let result = store.read(segment, 0, 1).await;

        // then
        assert_eq!(result, Err(SegmentStoreError::SegmentNotFound(segment)));
    }

    #[tokio::test]
    async fn should_never_reuse_segment_ids() {
        // given
        let store = InMemorySegmentStore::new();
        let first = store.create().await.unwrap();
        store.remove(first).await.unwrap();

        // when
        let second = store.create().await.unwrap();

        // then
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn should_version_records_from_zero() {
        // given
        let store = InMemoryMetaStore::new();

        // when
        let v0 = store
            .put("key", Bytes::from("a"), ExpectedVersion::Absent)
            .await
            .unwrap();
        let v1 = store
            .put("key", Bytes::from("b"), ExpectedVersion::Exact(v0))
            .await
            .unwrap();

        // then
        assert_eq!(v0, 0);
        assert_eq!(v1, 1);
        let record = store.get("key").await.unwrap().unwrap();
        assert_eq!(record.value, Bytes::from("b"));
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn should_reject_stale_version_write() {
        // given
        let store = InMemoryMetaStore::new();
        store
            .put("key", Bytes::from("a"), ExpectedVersion::Absent)
            .await
            .unwrap();
        store
            .put("key", Bytes::from("b"), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        // when - write with the superseded version
        let result = store
            .put("key", Bytes::from("c"), ExpectedVersion::Exact(0))
            .await;

        // then
        assert_eq!(result, Err(MetaStoreError::BadVersion));
        let record = store.get("key").await.unwrap().unwrap();
        assert_eq!(record.value, Bytes::from("b"));
    }

    #[tokio::test]
    async fn should_reject_absent_expectation_when_key_exists() {
        // given
        let store = InMemoryMetaStore::new();
        store
            .put("key", Bytes::from("a"), ExpectedVersion::Absent)
            .await
            .unwrap();

        // when
        let result = store
            .put("key", Bytes::from("b"), ExpectedVersion::Absent)
            .await;

        // then
        assert_eq!(result, Err(MetaStoreError::BadVersion));
    }

    #[tokio::test]
    async fn should_remove_with_exact_version() {
        // given
        let store = InMemoryMetaStore::new();
        let version = store
            .put("key", Bytes::from("a"), ExpectedVersion::Absent)
            .await
            .unwrap();

        // when
        store
            .remove("key", ExpectedVersion::Exact(version))
            .await
            .unwrap();

        // then
        assert!(store.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_fail_removing_missing_key() {
        // given
        let store = InMemoryMetaStore::new();

        // when
        let result = store.remove("missing", ExpectedVersion::Any).await;

        // then
        assert_eq!(result, Err(MetaStoreError::NotFound));
    }
}
