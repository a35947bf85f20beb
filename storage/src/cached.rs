//! Write-through cache wrappers for the hot sub-stores.
//!
//! Cluster, task definition, service and task reads are memoized; every
//! mutation writes the backend first and then upserts the single-object keys
//! and drops the affected listing keys. All other sub-stores pass through to
//! the backend untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kecs_common::Result;

use crate::{
    cache::{LIST_TTL, LruTtlCache},
    models::{Cluster, Service, Task, TaskDefinition},
    store::{
        ClusterStore, Page, ServiceFilters, ServiceStore, Storage, StorageTx, TaskDefinitionStore,
        TaskFilters, TaskStore,
    },
};

pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    cache: Arc<LruTtlCache>,
    clusters: CachedClusterStore,
    task_definitions: CachedTaskDefinitionStore,
    services: CachedServiceStore,
    tasks: CachedTaskStore,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, cache: Arc<LruTtlCache>) -> Self {
        Self {
            clusters: CachedClusterStore {
                inner: inner.clone(),
                cache: cache.clone(),
            },
            task_definitions: CachedTaskDefinitionStore {
                inner: inner.clone(),
                cache: cache.clone(),
            },
            services: CachedServiceStore {
                inner: inner.clone(),
                cache: cache.clone(),
            },
            tasks: CachedTaskStore {
                inner: inner.clone(),
                cache: cache.clone(),
            },
            inner,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<LruTtlCache> {
        &self.cache
    }
}

#[async_trait]
impl Storage for CachedStorage {
    fn clusters(&self) -> &dyn ClusterStore {
        &self.clusters
    }

    fn task_definitions(&self) -> &dyn TaskDefinitionStore {
        &self.task_definitions
    }

    fn services(&self) -> &dyn ServiceStore {
        &self.services
    }

    fn tasks(&self) -> &dyn TaskStore {
        &self.tasks
    }

    fn task_sets(&self) -> &dyn crate::store::TaskSetStore {
        self.inner.task_sets()
    }

    fn container_instances(&self) -> &dyn crate::store::ContainerInstanceStore {
        self.inner.container_instances()
    }

    fn attributes(&self) -> &dyn crate::store::AttributeStore {
        self.inner.attributes()
    }

    fn account_settings(&self) -> &dyn crate::store::AccountSettingStore {
        self.inner.account_settings()
    }

    fn elbv2(&self) -> &dyn crate::store::ElbV2Store {
        self.inner.elbv2()
    }

    fn task_logs(&self) -> &dyn crate::store::TaskLogStore {
        self.inner.task_logs()
    }

    async fn begin_tx(&self) -> Result<Box<dyn StorageTx>> {
        let inner = self.inner.begin_tx().await?;
        Ok(Box::new(CachedTx {
            inner: Some(inner),
            cache: self.cache.clone(),
            touched_clusters: Vec::new(),
        }))
    }
}

/// Transaction wrapper that invalidates the keys its writes touched, but only
/// once the transaction actually commits.
struct CachedTx {
    inner: Option<Box<dyn StorageTx>>,
    cache: Arc<LruTtlCache>,
    touched_clusters: Vec<String>,
}

impl CachedTx {
    fn inner_mut(&mut self) -> &mut Box<dyn StorageTx> {
        self.inner.as_mut().expect("transaction used after completion")
    }
}

#[async_trait]
impl StorageTx for CachedTx {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.inner.take().expect("transaction already completed").commit().await?;
        for arn in &self.touched_clusters {
            self.cache.delete(&format!("cluster:arn:{arn}"));
            self.cache.delete_with_prefix("clusters:list");
            self.cache.delete_with_prefix(&format!("tasks:list:{arn}"));
        }
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.inner.take().expect("transaction already completed").rollback().await
    }

    async fn create_task(&mut self, task: &Task) -> Result<()> {
        let cluster_arn = task.cluster_arn.clone();
        self.inner_mut().create_task(task).await?;
        if !self.touched_clusters.contains(&cluster_arn) {
            self.touched_clusters.push(cluster_arn);
        }
        Ok(())
    }

    async fn adjust_cluster_counters(
        &mut self,
        cluster_arn: &str,
        services_delta: i32,
        running_delta: i32,
        pending_delta: i32,
    ) -> Result<()> {
        self.inner_mut()
            .adjust_cluster_counters(cluster_arn, services_delta, running_delta, pending_delta)
            .await?;
        if !self.touched_clusters.iter().any(|a| a == cluster_arn) {
            self.touched_clusters.push(cluster_arn.to_string());
        }
        Ok(())
    }
}

struct CachedClusterStore {
    inner: Arc<dyn Storage>,
    cache: Arc<LruTtlCache>,
}

impl CachedClusterStore {
    fn upsert(&self, c: &Cluster) {
        self.cache.set(format!("cluster:name:{}", c.name), c.clone());
        self.cache.set(format!("cluster:arn:{}", c.arn), c.clone());
    }

    fn invalidate_lists(&self) {
        self.cache.delete_with_prefix("clusters:list");
    }
}

#[async_trait]
impl ClusterStore for CachedClusterStore {
    async fn create(&self, cluster: &Cluster) -> Result<()> {
        self.inner.clusters().create(cluster).await?;
        self.upsert(cluster);
        self.invalidate_lists();
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Cluster>> {
        let key = format!("cluster:name:{name}");
        if let Some(cluster) = self.cache.get::<Cluster>(&key) {
            return Ok(Some(cluster));
        }
        let cluster = self.inner.clusters().get(name).await?;
        if let Some(ref c) = cluster {
            self.upsert(c);
        }
        Ok(cluster)
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<Cluster>> {
        let key = format!("cluster:arn:{arn}");
        if let Some(cluster) = self.cache.get::<Cluster>(&key) {
            return Ok(Some(cluster));
        }
        let cluster = self.inner.clusters().get_by_arn(arn).await?;
        if let Some(ref c) = cluster {
            self.upsert(c);
        }
        Ok(cluster)
    }

    async fn update(&self, cluster: &Cluster) -> Result<()> {
        self.inner.clusters().update(cluster).await?;
        self.upsert(cluster);
        self.invalidate_lists();
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let existing = self.inner.clusters().get(name).await?;
        self.inner.clusters().delete(name).await?;
        self.cache.delete(&format!("cluster:name:{name}"));
        if let Some(c) = existing {
            self.cache.delete(&format!("cluster:arn:{}", c.arn));
        }
        self.invalidate_lists();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        if let Some(clusters) = self.cache.get::<Vec<Cluster>>("clusters:list") {
            return Ok(clusters);
        }
        let clusters = self.inner.clusters().list().await?;
        self.cache
            .set_with_ttl("clusters:list", clusters.clone(), LIST_TTL);
        Ok(clusters)
    }

    async fn list_paginated(&self, limit: i64, token: Option<&str>) -> Result<Page<Cluster>> {
        let key = format!("clusters:list:page:{limit}:{}", token.unwrap_or("-"));
        if let Some(page) = self.cache.get::<Page<Cluster>>(&key) {
            return Ok(page);
        }
        let page = self.inner.clusters().list_paginated(limit, token).await?;
        self.cache.set_with_ttl(key, page.clone(), LIST_TTL);
        Ok(page)
    }
}

struct CachedTaskDefinitionStore {
    inner: Arc<dyn Storage>,
    cache: Arc<LruTtlCache>,
}

impl CachedTaskDefinitionStore {
    fn upsert(&self, td: &TaskDefinition) {
        self.cache
            .set(format!("taskdef:{}:{}", td.family, td.revision), td.clone());
        self.cache.set(format!("taskdef:arn:{}", td.arn), td.clone());
    }

    fn invalidate_lists(&self, family: &str) {
        self.cache.delete_with_prefix(&format!("taskdef:family:{family}"));
        self.cache.delete_with_prefix("taskdefs:list");
        self.cache.delete_with_prefix("taskdefs:families");
    }
}

#[async_trait]
impl TaskDefinitionStore for CachedTaskDefinitionStore {
    async fn register(&self, td: &TaskDefinition) -> Result<TaskDefinition> {
        let stored = self.inner.task_definitions().register(td).await?;
        self.upsert(&stored);
        self.invalidate_lists(&stored.family);
        Ok(stored)
    }

    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>> {
        let key = format!("taskdef:{family}:{revision}");
        if let Some(td) = self.cache.get::<TaskDefinition>(&key) {
            return Ok(Some(td));
        }
        let td = self.inner.task_definitions().get(family, revision).await?;
        if let Some(ref td) = td {
            self.upsert(td);
        }
        Ok(td)
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinition>> {
        let key = format!("taskdef:arn:{arn}");
        if let Some(td) = self.cache.get::<TaskDefinition>(&key) {
            return Ok(Some(td));
        }
        let td = self.inner.task_definitions().get_by_arn(arn).await?;
        if let Some(ref td) = td {
            self.upsert(td);
        }
        Ok(td)
    }

    async fn get_latest(&self, family: &str) -> Result<Option<TaskDefinition>> {
        // Latest moves with every registration; always read the backend.
        self.inner.task_definitions().get_latest(family).await
    }

    async fn update(&self, td: &TaskDefinition) -> Result<()> {
        self.inner.task_definitions().update(td).await?;
        self.upsert(td);
        self.invalidate_lists(&td.family);
        Ok(())
    }

    async fn delete(&self, family: &str, revision: i32) -> Result<()> {
        let existing = self.inner.task_definitions().get(family, revision).await?;
        self.inner.task_definitions().delete(family, revision).await?;
        self.cache.delete(&format!("taskdef:{family}:{revision}"));
        if let Some(td) = existing {
            self.cache.delete(&format!("taskdef:arn:{}", td.arn));
        }
        self.invalidate_lists(family);
        Ok(())
    }

    async fn list_revisions(
        &self,
        family: &str,
        status: Option<&str>,
    ) -> Result<Vec<TaskDefinition>> {
        let key = format!("taskdef:family:{family}:{}", status.unwrap_or("-"));
        if let Some(revisions) = self.cache.get::<Vec<TaskDefinition>>(&key) {
            return Ok(revisions);
        }
        let revisions = self
            .inner
            .task_definitions()
            .list_revisions(family, status)
            .await?;
        self.cache.set_with_ttl(key, revisions.clone(), LIST_TTL);
        Ok(revisions)
    }

    async fn list_paginated(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<TaskDefinition>> {
        let key = format!(
            "taskdefs:list:page:{}:{}:{limit}:{}",
            family_prefix.unwrap_or("-"),
            status.unwrap_or("-"),
            token.unwrap_or("-")
        );
        if let Some(page) = self.cache.get::<Page<TaskDefinition>>(&key) {
            return Ok(page);
        }
        let page = self
            .inner
            .task_definitions()
            .list_paginated(family_prefix, status, limit, token)
            .await?;
        self.cache.set_with_ttl(key, page.clone(), LIST_TTL);
        Ok(page)
    }

    async fn list_families(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<String>> {
        let key = format!(
            "taskdefs:families:{}:{}:{limit}:{}",
            family_prefix.unwrap_or("-"),
            status.unwrap_or("-"),
            token.unwrap_or("-")
        );
        if let Some(page) = self.cache.get::<Page<String>>(&key) {
            return Ok(page);
        }
        let page = self
            .inner
            .task_definitions()
            .list_families(family_prefix, status, limit, token)
            .await?;
        self.cache.set_with_ttl(key, page.clone(), LIST_TTL);
        Ok(page)
    }
}

struct CachedServiceStore {
    inner: Arc<dyn Storage>,
    cache: Arc<LruTtlCache>,
}

impl CachedServiceStore {
    fn upsert(&self, s: &Service) {
        self.cache
            .set(format!("service:{}:{}", s.cluster_arn, s.service_name), s.clone());
        self.cache.set(format!("service:arn:{}", s.arn), s.clone());
    }

    fn invalidate_lists(&self, cluster_arn: &str) {
        self.cache
            .delete_with_prefix(&format!("services:list:{cluster_arn}"));
    }
}

#[async_trait]
impl ServiceStore for CachedServiceStore {
    async fn create(&self, service: &Service) -> Result<()> {
        self.inner.services().create(service).await?;
        self.upsert(service);
        self.invalidate_lists(&service.cluster_arn);
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        let key = format!("service:{cluster_arn}:{name}");
        if let Some(service) = self.cache.get::<Service>(&key) {
            return Ok(Some(service));
        }
        let service = self.inner.services().get(cluster_arn, name).await?;
        if let Some(ref s) = service {
            self.upsert(s);
        }
        Ok(service)
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<Service>> {
        let key = format!("service:arn:{arn}");
        if let Some(service) = self.cache.get::<Service>(&key) {
            return Ok(Some(service));
        }
        let service = self.inner.services().get_by_arn(arn).await?;
        if let Some(ref s) = service {
            self.upsert(s);
        }
        Ok(service)
    }

    async fn update(&self, service: &Service) -> Result<()> {
        self.inner.services().update(service).await?;
        self.upsert(service);
        self.invalidate_lists(&service.cluster_arn);
        Ok(())
    }

    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()> {
        let existing = self.inner.services().get(cluster_arn, name).await?;
        self.inner.services().delete(cluster_arn, name).await?;
        self.cache.delete(&format!("service:{cluster_arn}:{name}"));
        if let Some(s) = existing {
            self.cache.delete(&format!("service:arn:{}", s.arn));
        }
        self.invalidate_lists(cluster_arn);
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filters: &ServiceFilters,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Service>> {
        let key = format!(
            "services:list:{cluster_arn}:{}:{limit}:{}",
            filters.launch_type.as_deref().unwrap_or("-"),
            token.unwrap_or("-")
        );
        if let Some(page) = self.cache.get::<Page<Service>>(&key) {
            return Ok(page);
        }
        let page = self
            .inner
            .services()
            .list(cluster_arn, filters, limit, token)
            .await?;
        self.cache.set_with_ttl(key, page.clone(), LIST_TTL);
        Ok(page)
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Service>> {
        self.inner.services().get_by_arns(arns).await
    }

    async fn count_active(&self, cluster_arn: &str) -> Result<i64> {
        // Precondition checks need the authoritative count.
        self.inner.services().count_active(cluster_arn).await
    }

    async fn delete_marked_for_deletion(&self, cluster_arn: &str) -> Result<u64> {
        let removed = self
            .inner
            .services()
            .delete_marked_for_deletion(cluster_arn)
            .await?;
        if removed > 0 {
            self.cache.delete_with_prefix("service:");
            self.invalidate_lists(cluster_arn);
        }
        Ok(removed)
    }
}

struct CachedTaskStore {
    inner: Arc<dyn Storage>,
    cache: Arc<LruTtlCache>,
}

impl CachedTaskStore {
    fn upsert(&self, t: &Task) {
        self.cache.set(format!("task:arn:{}", t.arn), t.clone());
    }

    fn invalidate_lists(&self, cluster_arn: &str) {
        self.cache
            .delete_with_prefix(&format!("tasks:list:{cluster_arn}"));
    }
}

#[async_trait]
impl TaskStore for CachedTaskStore {
    async fn create(&self, task: &Task) -> Result<()> {
        self.inner.tasks().create(task).await?;
        self.upsert(task);
        self.invalidate_lists(&task.cluster_arn);
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Task>> {
        let key = format!("task:arn:{arn}");
        if let Some(task) = self.cache.get::<Task>(&key) {
            return Ok(Some(task));
        }
        let task = self.inner.tasks().get(arn).await?;
        if let Some(ref t) = task {
            self.upsert(t);
        }
        Ok(task)
    }

    async fn update(&self, task: &Task) -> Result<()> {
        self.inner.tasks().update(task).await?;
        self.upsert(task);
        self.invalidate_lists(&task.cluster_arn);
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let existing = self.inner.tasks().get(arn).await?;
        self.inner.tasks().delete(arn).await?;
        self.cache.delete(&format!("task:arn:{arn}"));
        if let Some(t) = existing {
            self.invalidate_lists(&t.cluster_arn);
        }
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filters: &TaskFilters,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Task>> {
        let key = format!(
            "tasks:list:{cluster_arn}:{}:{}:{}:{}:{}:{limit}:{}",
            filters.service_name.as_deref().unwrap_or("-"),
            filters.family.as_deref().unwrap_or("-"),
            filters.desired_status.as_deref().unwrap_or("-"),
            filters.started_by.as_deref().unwrap_or("-"),
            filters.launch_type.as_deref().unwrap_or("-"),
            token.unwrap_or("-")
        );
        if let Some(page) = self.cache.get::<Page<Task>>(&key) {
            return Ok(page);
        }
        let page = self
            .inner
            .tasks()
            .list(cluster_arn, filters, limit, token)
            .await?;
        self.cache.set_with_ttl(key, page.clone(), LIST_TTL);
        Ok(page)
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Task>> {
        self.inner.tasks().get_by_arns(arns).await
    }

    async fn count_running(&self, cluster_arn: &str) -> Result<i64> {
        self.inner.tasks().count_running(cluster_arn).await
    }

    async fn delete_older_than(
        &self,
        cluster_arn: &str,
        before: DateTime<Utc>,
        status: &str,
    ) -> Result<u64> {
        let removed = self
            .inner
            .tasks()
            .delete_older_than(cluster_arn, before, status)
            .await?;
        if removed > 0 {
            self.cache.delete_with_prefix("task:arn:");
            self.invalidate_lists(cluster_arn);
        }
        Ok(removed)
    }

    async fn delete_stale(&self, cluster_arn: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = self.inner.tasks().delete_stale(cluster_arn, cutoff).await?;
        if removed > 0 {
            self.cache.delete_with_prefix("task:arn:");
            self.invalidate_lists(cluster_arn);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStorage;
    use crate::test_fixtures;

    async fn cached() -> (CachedStorage, Arc<LruTtlCache>) {
        let inner: Arc<dyn Storage> =
            Arc::new(SqliteStorage::connect_in_memory().await.unwrap());
        let cache = Arc::new(LruTtlCache::new(1024));
        (CachedStorage::new(inner, cache.clone()), cache)
    }

    #[tokio::test]
    async fn repeated_get_is_served_from_cache() {
        let (storage, cache) = cached().await;
        let cluster = test_fixtures::cluster("prod");
        storage.clusters().create(&cluster).await.unwrap();

        storage.clusters().get("prod").await.unwrap().unwrap();
        let hits_before = cache.stats().hits;
        storage.clusters().get("prod").await.unwrap().unwrap();
        assert!(cache.stats().hits > hits_before);
    }

    #[tokio::test]
    async fn update_invalidates_listing_and_refreshes_object() {
        let (storage, _cache) = cached().await;
        let mut cluster = test_fixtures::cluster("prod");
        storage.clusters().create(&cluster).await.unwrap();

        // Warm the listing cache.
        let (page, _) = storage.clusters().list_paginated(10, None).await.unwrap();
        assert_eq!(page.len(), 1);

        cluster.settings = Some(r#"[{"name":"containerInsights","value":"enabled"}]"#.to_string());
        storage.clusters().update(&cluster).await.unwrap();

        let fetched = storage.clusters().get("prod").await.unwrap().unwrap();
        assert_eq!(fetched.settings, cluster.settings);
        let (page, _) = storage.clusters().list_paginated(10, None).await.unwrap();
        assert_eq!(page[0].settings, cluster.settings);
    }

    #[tokio::test]
    async fn delete_drops_both_object_keys() {
        let (storage, cache) = cached().await;
        let cluster = test_fixtures::cluster("prod");
        storage.clusters().create(&cluster).await.unwrap();
        storage.clusters().delete("prod").await.unwrap();
        assert!(cache.get::<Cluster>("cluster:name:prod").is_none());
        assert!(
            cache
                .get::<Cluster>(&format!("cluster:arn:{}", cluster.arn))
                .is_none()
        );
        assert!(storage.clusters().get("prod").await.unwrap().is_none());
    }
}
