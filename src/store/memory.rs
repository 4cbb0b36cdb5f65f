//! DashMap-backed deployment store

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{DeploymentFilter, DeploymentPatch, DeploymentStore, StoreError, StoreResult};
use crate::deployment::model::{
    DeploymentId, DeploymentMetrics, DeploymentRecord, DeploymentStatus,
};

/// Process-local store
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<DeploymentId, DeploymentRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryStore {
    async fn create(&self, mut record: DeploymentRecord) -> StoreResult<DeploymentRecord> {
        let now = Utc::now();
        record.id = Uuid::new_v4();
        record.created_at = now;
        record.updated_at = now;
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: &DeploymentId) -> StoreResult<Option<DeploymentRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn list(&self, filter: &DeploymentFilter) -> StoreResult<Vec<DeploymentRecord>> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update(&self, id: &DeploymentId, patch: DeploymentPatch) -> StoreResult<DeploymentRecord> {
        let mut entry = self.records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        patch.apply(entry.value_mut());
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn transition(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
        last_error: Option<String>,
    ) -> StoreResult<DeploymentStatus> {
        let mut entry = self.records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        let previous = entry.status;
        if !previous.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: previous,
                to: status,
            });
        }

        let record = entry.value_mut();
        record.status = status;
        record.last_error = match status {
            DeploymentStatus::Running => None,
            _ => last_error.or(record.last_error.take()),
        };
        record.updated_at = Utc::now();
        Ok(previous)
    }

    async fn update_metrics(&self, id: &DeploymentId, metrics: DeploymentMetrics) -> StoreResult<()> {
        let mut entry = self.records.get_mut(id).ok_or(StoreError::NotFound(*id))?;
        let now = Utc::now();
        let record = entry.value_mut();
        record.metrics = metrics;
        record.last_health_check_at = Some(now);
        record.updated_at = now;
        Ok(())
    }

    async fn delete(&self, id: &DeploymentId) -> StoreResult<()> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::testing::sample_record;

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamps() {
        let store = InMemoryStore::new();
        let record = sample_record("web");
        let placeholder = record.id;

        let created = store.create(record).await.unwrap();
        assert_ne!(created.id, placeholder);
        assert_eq!(created.created_at, created.updated_at);
        assert!(store.get(&created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = InMemoryStore::new();
        assert!(store.get(&Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_by_recency() {
        let store = InMemoryStore::new();
        let mut a = sample_record("a");
        a.user_id = "alice".into();
        let a = store.create(a).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let mut b = sample_record("b");
        b.user_id = "alice".into();
        let b = store.create(b).await.unwrap();
        let mut c = sample_record("c");
        c.user_id = "bob".into();
        store.create(c).await.unwrap();

        let alice = store.list(&DeploymentFilter::by_user("alice")).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].id, b.id);
        assert_eq!(alice[1].id, a.id);
    }

    #[tokio::test]
    async fn test_transition_enforces_state_machine() {
        let store = InMemoryStore::new();
        let rec = store.create(sample_record("web")).await.unwrap();

        let prev = store
            .transition(&rec.id, DeploymentStatus::Building, None)
            .await
            .unwrap();
        assert_eq!(prev, DeploymentStatus::Pending);

        let err = store
            .transition(&rec.id, DeploymentStatus::Running, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InvalidTransition {
                from: DeploymentStatus::Building,
                to: DeploymentStatus::Running
            }
        );
    }

    #[tokio::test]
    async fn test_running_clears_last_error() {
        let store = InMemoryStore::new();
        let rec = store.create(sample_record("web")).await.unwrap();
        store
            .transition(&rec.id, DeploymentStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(
            store.get(&rec.id).await.unwrap().unwrap().last_error.as_deref(),
            Some("boom")
        );

        store.transition(&rec.id, DeploymentStatus::Pending, None).await.unwrap();
        store.transition(&rec.id, DeploymentStatus::Building, None).await.unwrap();
        store.transition(&rec.id, DeploymentStatus::Deploying, None).await.unwrap();
        store.transition(&rec.id, DeploymentStatus::Running, None).await.unwrap();
        assert!(store.get(&rec.id).await.unwrap().unwrap().last_error.is_none());
    }

    #[tokio::test]
    async fn test_update_patch_and_metrics() {
        let store = InMemoryStore::new();
        let rec = store.create(sample_record("web")).await.unwrap();

        let updated = store
            .update(
                &rec.id,
                DeploymentPatch {
                    replicas: Some(5),
                    ..DeploymentPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.configuration.replicas, 5);
        assert_eq!(updated.metrics.desired_pods, 5);

        store
            .update_metrics(
                &rec.id,
                DeploymentMetrics {
                    active_pods: 3,
                    ..DeploymentMetrics::default()
                },
            )
            .await
            .unwrap();
        let fetched = store.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(fetched.metrics.active_pods, 3);
        assert_eq!(fetched.metrics.desired_pods, 0);
        assert!(fetched.last_health_check_at.is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let store = InMemoryStore::new();
        let mut on_node = sample_record("a");
        on_node.node_id = "node-1".into();
        let a = store.create(on_node).await.unwrap();
        store.create(sample_record("b")).await.unwrap();
        store.transition(&a.id, DeploymentStatus::Failed, None).await.unwrap();

        let all = store.stats(None).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.count(DeploymentStatus::Pending), 1);
        assert_eq!(all.count(DeploymentStatus::Failed), 1);

        let node = store.stats(Some("node-1")).await.unwrap();
        assert_eq!(node.total, 1);
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.delete(&id).await.unwrap_err(), StoreError::NotFound(id));
    }
}
