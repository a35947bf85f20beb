//! Persistence layer for the emulator.
//!
//! One facade ([`store::Storage`]) over two interchangeable backends: an
//! embedded SQLite database (default) and a networked PostgreSQL database.
//! Hot sub-stores can be wrapped by a write-through LRU/TTL cache.

use std::sync::Arc;

use kecs_common::{Error, Result, args::StorageArgs};

pub mod cache;
pub mod cached;
pub mod models;
pub mod pagination;
pub mod postgres;
pub mod sqlite;
pub mod store;

pub use cache::{CacheStats, LruTtlCache};
pub use cached::CachedStorage;
pub use store::{
    AccountSettingStore, AttributeStore, ClusterStore, ContainerInstanceStore, ElbV2Store, Page,
    ServiceFilters, ServiceStore, Storage, StorageTx, TaskDefinitionStore, TaskFilters,
    TaskLogFilters, TaskLogStore, TaskSetStore, TaskStore,
};

/// Build the storage facade selected by configuration.
///
/// Returns the facade and, when caching is enabled, the cache handle so the
/// caller can run the expiry sweeper and expose statistics.
pub async fn init_storage(
    args: &StorageArgs,
) -> Result<(Arc<dyn Storage>, Option<Arc<LruTtlCache>>)> {
    let backend: Arc<dyn Storage> = if args.is_networked() {
        let url = args.storage_url.as_deref().ok_or_else(|| {
            Error::invalid_input("networked storage requires a connection url")
        })?;
        tracing::info!("using networked storage backend");
        Arc::new(postgres::PostgresStorage::connect(url).await?)
    } else {
        tracing::info!(path = %args.storage_path, "using embedded storage backend");
        Arc::new(sqlite::SqliteStorage::connect(&args.storage_path).await?)
    };
    if args.cache_disabled {
        return Ok((backend, None));
    }
    let cache = Arc::new(LruTtlCache::new(args.cache_max_size));
    Ok((
        Arc::new(CachedStorage::new(backend, cache.clone())),
        Some(cache),
    ))
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use chrono::Utc;

    use crate::models::{
        Cluster, Service, Task, TaskDefinition, cluster_status, service_status, task_status,
    };

    pub fn cluster(name: &str) -> Cluster {
        let now = Utc::now();
        Cluster {
            id: uuid::Uuid::new_v4().to_string(),
            arn: format!("arn:aws:ecs:us-east-1:000000000000:cluster/{name}"),
            name: name.to_string(),
            status: cluster_status::ACTIVE.to_string(),
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            configuration: None,
            settings: None,
            tags: None,
            capacity_providers: None,
            default_capacity_provider_strategy: None,
            active_services_count: 0,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            registered_container_instances_count: 0,
            k8s_cluster_name: format!("kecs-{name}"),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task_definition(family: &str) -> TaskDefinition {
        let now = Utc::now();
        TaskDefinition {
            id: uuid::Uuid::new_v4().to_string(),
            arn: String::new(),
            family: family.to_string(),
            revision: 0,
            status: "ACTIVE".to_string(),
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            container_definitions: r#"[{"name":"app","image":"nginx:1"}]"#.to_string(),
            volumes: None,
            network_mode: None,
            requires_compatibilities: None,
            cpu: None,
            memory: None,
            task_role_arn: None,
            execution_role_arn: None,
            placement_constraints: None,
            runtime_platform: None,
            ipc_mode: None,
            pid_mode: None,
            tags: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn service(cluster_arn: &str, name: &str) -> Service {
        let now = Utc::now();
        Service {
            id: uuid::Uuid::new_v4().to_string(),
            arn: format!("arn:aws:ecs:us-east-1:000000000000:service/default/{name}"),
            service_name: name.to_string(),
            cluster_arn: cluster_arn.to_string(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/td:1"
                .to_string(),
            desired_count: 1,
            running_count: 0,
            pending_count: 0,
            status: service_status::ACTIVE.to_string(),
            launch_type: "FARGATE".to_string(),
            platform_version: None,
            role_arn: None,
            load_balancers: None,
            service_registries: None,
            network_configuration: None,
            deployment_configuration: None,
            placement_constraints: None,
            placement_strategy: None,
            capacity_provider_strategy: None,
            scheduling_strategy: "REPLICA".to_string(),
            health_check_grace_period_seconds: None,
            enable_ecs_managed_tags: false,
            enable_execute_command: false,
            propagate_tags: None,
            tags: None,
            deployment_name: format!("ecs-service-{name}"),
            namespace: "default".to_string(),
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn task(cluster_arn: &str) -> Task {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        Task {
            arn: format!("arn:aws:ecs:us-east-1:000000000000:task/default/{id}"),
            id,
            cluster_arn: cluster_arn.to_string(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/td:1"
                .to_string(),
            container_instance_arn: None,
            last_status: task_status::PROVISIONING.to_string(),
            desired_status: task_status::RUNNING.to_string(),
            launch_type: "FARGATE".to_string(),
            connectivity: None,
            connectivity_at: None,
            containers: "[]".to_string(),
            overrides: None,
            attachments: None,
            attributes: None,
            started_by: None,
            group_name: None,
            stop_code: None,
            stopped_reason: None,
            cpu: None,
            memory: None,
            pull_started_at: None,
            pull_stopped_at: None,
            started_at: None,
            stopping_at: None,
            stopped_at: None,
            execution_stopped_at: None,
            pod_name: None,
            namespace: None,
            version: 1,
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
