//! Store traits implemented by every backend.
//!
//! All `get` methods return `Ok(None)` when the row does not exist; the
//! operation layer decides whether that is an error. `update` and `delete`
//! fail with `NotFound` when no row was affected. Listing returns
//! `(items, next_token)` where a `None` token marks the final page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kecs_common::Result;

use crate::models::{
    AccountSetting, Attribute, Cluster, ContainerInstance, Listener, LoadBalancer, Rule, Service,
    TargetGroup, TargetHealth, Task, TaskDefinition, TaskLog, TaskSet,
};

pub type Page<T> = (Vec<T>, Option<String>);

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn create(&self, cluster: &Cluster) -> Result<()>;
    async fn get(&self, name: &str) -> Result<Option<Cluster>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<Cluster>>;
    async fn update(&self, cluster: &Cluster) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<Cluster>>;
    async fn list_paginated(&self, limit: i64, token: Option<&str>) -> Result<Page<Cluster>>;
}

#[async_trait]
pub trait TaskDefinitionStore: Send + Sync {
    /// Persist a new revision, atomically allocating
    /// `revision = max(existing) + 1` within the family. The stored record
    /// (with revision and ARN filled in) is returned.
    async fn register(&self, td: &TaskDefinition) -> Result<TaskDefinition>;
    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinition>>;
    async fn get_latest(&self, family: &str) -> Result<Option<TaskDefinition>>;
    async fn update(&self, td: &TaskDefinition) -> Result<()>;
    async fn delete(&self, family: &str, revision: i32) -> Result<()>;
    async fn list_revisions(&self, family: &str, status: Option<&str>) -> Result<Vec<TaskDefinition>>;
    async fn list_paginated(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<TaskDefinition>>;
    /// Distinct family names, optionally filtered by prefix and status.
    async fn list_families(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<String>>;
}

#[derive(Debug, Clone, Default)]
pub struct ServiceFilters {
    pub launch_type: Option<String>,
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn create(&self, service: &Service) -> Result<()>;
    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<Service>>;
    async fn update(&self, service: &Service) -> Result<()>;
    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()>;
    async fn list(
        &self,
        cluster_arn: &str,
        filters: &ServiceFilters,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Service>>;
    /// Missing ARNs are silently dropped.
    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Service>>;
    /// Authoritative count for delete-cluster preconditions; never read the
    /// cached counters for this.
    async fn count_active(&self, cluster_arn: &str) -> Result<i64>;
    /// Purge services left in INACTIVE after draining. Returns rows removed.
    async fn delete_marked_for_deletion(&self, cluster_arn: &str) -> Result<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub service_name: Option<String>,
    pub family: Option<String>,
    pub desired_status: Option<String>,
    pub started_by: Option<String>,
    pub launch_type: Option<String>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<()>;
    async fn get(&self, arn: &str) -> Result<Option<Task>>;
    async fn update(&self, task: &Task) -> Result<()>;
    async fn delete(&self, arn: &str) -> Result<()>;
    async fn list(
        &self,
        cluster_arn: &str,
        filters: &TaskFilters,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Task>>;
    /// Missing ARNs are silently dropped.
    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Task>>;
    async fn count_running(&self, cluster_arn: &str) -> Result<i64>;
    /// Remove tasks in `status` whose stop predates `before`. Returns rows removed.
    async fn delete_older_than(
        &self,
        cluster_arn: &str,
        before: DateTime<Utc>,
        status: &str,
    ) -> Result<u64>;
    /// Remove stopped tasks untouched since `cutoff`. Returns rows removed.
    async fn delete_stale(&self, cluster_arn: &str, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait TaskSetStore: Send + Sync {
    async fn create(&self, task_set: &TaskSet) -> Result<()>;
    async fn get(&self, service_arn: &str, id: &str) -> Result<Option<TaskSet>>;
    async fn update(&self, task_set: &TaskSet) -> Result<()>;
    async fn delete(&self, service_arn: &str, id: &str) -> Result<()>;
    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSet>>;
}

#[async_trait]
pub trait ContainerInstanceStore: Send + Sync {
    async fn create(&self, instance: &ContainerInstance) -> Result<()>;
    async fn get_by_arn(&self, arn: &str) -> Result<Option<ContainerInstance>>;
    async fn update(&self, instance: &ContainerInstance) -> Result<()>;
    async fn delete(&self, arn: &str) -> Result<()>;
    async fn list(
        &self,
        cluster_arn: &str,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<ContainerInstance>>;
    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<ContainerInstance>>;
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    /// Upsert on the (name, target_type, target_id, cluster) unique key.
    async fn put(&self, attribute: &Attribute) -> Result<()>;
    async fn delete(
        &self,
        cluster_arn: &str,
        name: &str,
        target_type: &str,
        target_id: &str,
    ) -> Result<()>;
    async fn list(
        &self,
        cluster_arn: &str,
        target_type: Option<&str>,
        attr_name: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Attribute>>;
}

#[async_trait]
pub trait AccountSettingStore: Send + Sync {
    /// Upsert on the (principal_arn, name) unique key.
    async fn put(&self, setting: &AccountSetting) -> Result<()>;
    async fn get(&self, principal_arn: &str, name: &str) -> Result<Option<AccountSetting>>;
    async fn delete(&self, principal_arn: &str, name: &str) -> Result<()>;
    async fn list(
        &self,
        principal_arn: Option<&str>,
        name: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<AccountSetting>>;
}

#[async_trait]
pub trait ElbV2Store: Send + Sync {
    async fn create_load_balancer(&self, lb: &LoadBalancer) -> Result<()>;
    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>>;
    async fn get_load_balancer_by_arn(&self, arn: &str) -> Result<Option<LoadBalancer>>;
    async fn update_load_balancer(&self, lb: &LoadBalancer) -> Result<()>;
    async fn delete_load_balancer(&self, arn: &str) -> Result<()>;
    async fn list_load_balancers(&self, limit: i64, token: Option<&str>)
    -> Result<Page<LoadBalancer>>;

    async fn create_target_group(&self, tg: &TargetGroup) -> Result<()>;
    async fn get_target_group(&self, name: &str) -> Result<Option<TargetGroup>>;
    async fn get_target_group_by_arn(&self, arn: &str) -> Result<Option<TargetGroup>>;
    async fn update_target_group(&self, tg: &TargetGroup) -> Result<()>;
    async fn delete_target_group(&self, arn: &str) -> Result<()>;
    async fn list_target_groups(&self, limit: i64, token: Option<&str>) -> Result<Page<TargetGroup>>;

    async fn create_listener(&self, listener: &Listener) -> Result<()>;
    async fn get_listener(&self, arn: &str) -> Result<Option<Listener>>;
    async fn delete_listener(&self, arn: &str) -> Result<()>;
    async fn list_listeners(&self, load_balancer_arn: &str) -> Result<Vec<Listener>>;

    async fn create_rule(&self, rule: &Rule) -> Result<()>;
    async fn get_rule(&self, arn: &str) -> Result<Option<Rule>>;
    async fn delete_rule(&self, arn: &str) -> Result<()>;
    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<Rule>>;

    async fn register_targets(&self, targets: &[TargetHealth]) -> Result<()>;
    async fn deregister_targets(&self, target_group_arn: &str, target_ids: &[String])
    -> Result<()>;
    async fn list_targets(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>>;
}

#[derive(Debug, Clone, Default)]
pub struct TaskLogFilters {
    pub container_name: Option<String>,
    pub log_level: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TaskLogStore: Send + Sync {
    /// Persist a batch of collected lines in one round trip.
    async fn save_logs(&self, logs: &[TaskLog]) -> Result<()>;
    async fn list(
        &self,
        task_arn: &str,
        filters: &TaskLogFilters,
        limit: i64,
    ) -> Result<Vec<TaskLog>>;
    /// Remove logs whose task row no longer exists. Returns rows removed.
    async fn delete_orphaned(&self) -> Result<u64>;
}

/// A backend transaction. Dropping the handle without committing rolls the
/// transaction back.
#[async_trait]
pub trait StorageTx: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
    /// Insert a task inside the transaction.
    async fn create_task(&mut self, task: &Task) -> Result<()>;
    /// Adjust the aggregated counters of a cluster row inside the transaction.
    async fn adjust_cluster_counters(
        &mut self,
        cluster_arn: &str,
        services_delta: i32,
        running_delta: i32,
        pending_delta: i32,
    ) -> Result<()>;
}

/// Facade over one backend: one sub-store per entity kind plus transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    fn clusters(&self) -> &dyn ClusterStore;
    fn task_definitions(&self) -> &dyn TaskDefinitionStore;
    fn services(&self) -> &dyn ServiceStore;
    fn tasks(&self) -> &dyn TaskStore;
    fn task_sets(&self) -> &dyn TaskSetStore;
    fn container_instances(&self) -> &dyn ContainerInstanceStore;
    fn attributes(&self) -> &dyn AttributeStore;
    fn account_settings(&self) -> &dyn AccountSettingStore;
    fn elbv2(&self) -> &dyn ElbV2Store;
    fn task_logs(&self) -> &dyn TaskLogStore;
    async fn begin_tx(&self) -> Result<Box<dyn StorageTx>>;
}
