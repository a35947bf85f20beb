use chrono::Utc;
use kecs_common::{Error, Result, virtual_cluster_name};
use kecs_storage::models::{Cluster, cluster_status, task_status};
use kecs_storage::store::TaskFilters;
use serde::{Deserialize, Serialize};

use super::{EcsApi, Failure, from_column, to_column};
use crate::arn;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateClusterRequest {
    pub cluster_name: Option<String>,
    pub settings: Option<serde_json::Value>,
    pub configuration: Option<serde_json::Value>,
    pub capacity_providers: Option<serde_json::Value>,
    pub default_capacity_provider_strategy: Option<serde_json::Value>,
    pub tags: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClusterRequest {
    pub cluster: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeClustersRequest {
    pub clusters: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListClustersRequest {
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterRequest {
    pub cluster: String,
    pub settings: Option<serde_json::Value>,
    pub configuration: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterSettingsRequest {
    pub cluster: String,
    pub settings: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutClusterCapacityProvidersRequest {
    pub cluster: String,
    pub capacity_providers: Vec<String>,
    pub default_capacity_provider_strategy: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCluster {
    pub cluster_arn: String,
    pub cluster_name: String,
    pub status: String,
    pub registered_container_instances_count: i32,
    pub running_tasks_count: i32,
    pub pending_tasks_count: i32,
    pub active_services_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_providers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_capacity_provider_strategy: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
}

impl WireCluster {
    fn from_model(c: &Cluster) -> Self {
        Self {
            cluster_arn: c.arn.clone(),
            cluster_name: c.name.clone(),
            status: c.status.clone(),
            registered_container_instances_count: c.registered_container_instances_count,
            running_tasks_count: c.running_tasks_count,
            pending_tasks_count: c.pending_tasks_count,
            active_services_count: c.active_services_count,
            statistics: None,
            settings: from_column(&c.settings),
            configuration: from_column(&c.configuration),
            capacity_providers: from_column(&c.capacity_providers),
            default_capacity_provider_strategy: from_column(
                &c.default_capacity_provider_strategy,
            ),
            tags: from_column(&c.tags),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResponse {
    pub cluster: WireCluster,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeClustersResponse {
    pub clusters: Vec<WireCluster>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListClustersResponse {
    pub cluster_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl EcsApi {
    /// Create a cluster. Re-creating an existing name returns the stored
    /// cluster unchanged; either way the virtual cluster is ensured in the
    /// background.
    pub async fn create_cluster(&self, req: CreateClusterRequest) -> Result<ClusterResponse> {
        let name = req.cluster_name.as_deref().unwrap_or("default");
        arn::validate_name("cluster", name)?;

        if let Some(existing) = self.storage.clusters().get(name).await? {
            self.cluster_manager.ensure_cluster(name);
            return Ok(ClusterResponse {
                cluster: WireCluster::from_model(&existing),
            });
        }

        let now = Utc::now();
        let cluster = Cluster {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.cluster(name),
            name: name.to_string(),
            status: cluster_status::ACTIVE.to_string(),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            configuration: to_column(&req.configuration),
            settings: to_column(&req.settings),
            tags: to_column(&req.tags),
            capacity_providers: to_column(&req.capacity_providers),
            default_capacity_provider_strategy: to_column(
                &req.default_capacity_provider_strategy,
            ),
            active_services_count: 0,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            registered_container_instances_count: 0,
            k8s_cluster_name: virtual_cluster_name(name),
            created_at: now,
            updated_at: now,
        };
        match self.storage.clusters().create(&cluster).await {
            Ok(()) => {}
            Err(err) if err.is_already_exists() => {
                // Lost a create race; idempotent-create semantics apply.
                let existing = self.resolve_cluster(Some(name)).await?;
                self.cluster_manager.ensure_cluster(name);
                return Ok(ClusterResponse {
                    cluster: WireCluster::from_model(&existing),
                });
            }
            Err(err) => return Err(err),
        }
        self.cluster_manager.ensure_cluster(name);
        Ok(ClusterResponse {
            cluster: WireCluster::from_model(&cluster),
        })
    }

    /// Delete a cluster. Rejected while descendants are active; the counter
    /// columns are advisory, so the check enumerates rows.
    pub async fn delete_cluster(&self, req: DeleteClusterRequest) -> Result<ClusterResponse> {
        let mut cluster = self.resolve_cluster(Some(&req.cluster)).await?;

        let active_services = self.storage.services().count_active(&cluster.arn).await?;
        if active_services > 0 {
            return Err(Error::PreconditionFailed(format!(
                "cluster {} still has {active_services} active services",
                cluster.name
            )));
        }
        let running_tasks = self.storage.tasks().count_running(&cluster.arn).await?;
        if running_tasks > 0 {
            return Err(Error::PreconditionFailed(format!(
                "cluster {} still has {running_tasks} running tasks",
                cluster.name
            )));
        }

        cluster.status = cluster_status::INACTIVE.to_string();
        self.storage.clusters().update(&cluster).await?;
        self.storage.clusters().delete(&cluster.name).await?;
        self.cluster_manager.teardown_cluster(&cluster.name);
        Ok(ClusterResponse {
            cluster: WireCluster::from_model(&cluster),
        })
    }

    pub async fn describe_clusters(
        &self,
        req: DescribeClustersRequest,
    ) -> Result<DescribeClustersResponse> {
        let references = match req.clusters {
            Some(refs) if !refs.is_empty() => refs,
            _ => vec!["default".to_string()],
        };
        let with_statistics = req
            .include
            .as_ref()
            .is_some_and(|include| include.iter().any(|i| i == "STATISTICS"));

        let mut clusters = Vec::new();
        let mut failures = Vec::new();
        for reference in references {
            let name = arn::short_name(&reference);
            match self.storage.clusters().get(name).await? {
                Some(cluster) => {
                    let mut wire = WireCluster::from_model(&cluster);
                    if with_statistics {
                        wire.statistics = Some(self.cluster_statistics(&cluster).await?);
                    }
                    clusters.push(wire);
                }
                None => failures.push(Failure::missing(if arn::is_arn(&reference) {
                    reference.clone()
                } else {
                    self.arn.cluster(name)
                })),
            }
        }
        Ok(DescribeClustersResponse { clusters, failures })
    }

    /// Per-launch-type counts for `Include=[STATISTICS]`. Walks every page
    /// of the task listing; the first page alone would undercount clusters
    /// with more tasks than the page cap.
    async fn cluster_statistics(&self, cluster: &Cluster) -> Result<Vec<serde_json::Value>> {
        let mut statistics = Vec::new();
        for launch_type in ["EC2", "FARGATE"] {
            let filters = TaskFilters {
                launch_type: Some(launch_type.to_string()),
                desired_status: Some(task_status::RUNNING.to_string()),
                ..Default::default()
            };
            let mut running = 0usize;
            let mut pending = 0usize;
            let mut token: Option<String> = None;
            loop {
                let (tasks, next_token) = self
                    .storage
                    .tasks()
                    .list(
                        &cluster.arn,
                        &filters,
                        kecs_storage::pagination::MAX_PAGE_SIZE,
                        token.as_deref(),
                    )
                    .await?;
                for task in &tasks {
                    if task.last_status == task_status::RUNNING {
                        running += 1;
                    } else if task.last_status == task_status::PENDING {
                        pending += 1;
                    }
                }
                match next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
            let launch_title = if launch_type == "EC2" { "EC2" } else { "Fargate" };
            statistics.push(serde_json::json!({
                "name": format!("running{launch_title}TasksCount"),
                "value": running.to_string(),
            }));
            statistics.push(serde_json::json!({
                "name": format!("pending{launch_title}TasksCount"),
                "value": pending.to_string(),
            }));
        }
        Ok(statistics)
    }

    pub async fn list_clusters(&self, req: ListClustersRequest) -> Result<ListClustersResponse> {
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let (clusters, next_token) = self
            .storage
            .clusters()
            .list_paginated(limit, req.next_token.as_deref())
            .await?;
        Ok(ListClustersResponse {
            cluster_arns: clusters.into_iter().map(|c| c.arn).collect(),
            next_token,
        })
    }

    pub async fn update_cluster(&self, req: UpdateClusterRequest) -> Result<ClusterResponse> {
        let mut cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        if let Some(settings) = req.settings {
            cluster.settings = Some(settings.to_string());
        }
        if let Some(configuration) = req.configuration {
            cluster.configuration = Some(configuration.to_string());
        }
        self.storage.clusters().update(&cluster).await?;
        Ok(ClusterResponse {
            cluster: WireCluster::from_model(&cluster),
        })
    }

    pub async fn update_cluster_settings(
        &self,
        req: UpdateClusterSettingsRequest,
    ) -> Result<ClusterResponse> {
        let mut cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        cluster.settings = Some(req.settings.to_string());
        self.storage.clusters().update(&cluster).await?;
        Ok(ClusterResponse {
            cluster: WireCluster::from_model(&cluster),
        })
    }

    pub async fn put_cluster_capacity_providers(
        &self,
        req: PutClusterCapacityProvidersRequest,
    ) -> Result<ClusterResponse> {
        let mut cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        // Every provider referenced by the default strategy must be attached.
        if let Some(entries) = req.default_capacity_provider_strategy.as_array() {
            for entry in entries {
                let provider = entry
                    .get("capacityProvider")
                    .and_then(|p| p.as_str())
                    .unwrap_or_default();
                if !req.capacity_providers.iter().any(|p| p == provider) {
                    return Err(Error::invalid_input(format!(
                        "capacity provider {provider} is not associated with the cluster"
                    )));
                }
            }
        }
        cluster.capacity_providers =
            Some(serde_json::to_value(&req.capacity_providers)?.to_string());
        cluster.default_capacity_provider_strategy =
            Some(req.default_capacity_provider_strategy.to_string());
        self.storage.clusters().update(&cluster).await?;
        Ok(ClusterResponse {
            cluster: WireCluster::from_model(&cluster),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::super::test_support::api;
    use super::*;

    #[tokio::test]
    async fn create_and_describe_round_trip() {
        let api = api().await;
        let created = api
            .create_cluster(CreateClusterRequest {
                cluster_name: Some("prod".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(
            created.cluster.cluster_arn,
            "arn:aws:ecs:us-east-1:000000000000:cluster/prod"
        );
        assert_eq!(created.cluster.status, "ACTIVE");
        assert_eq!(created.cluster.running_tasks_count, 0);
        assert_eq!(created.cluster.active_services_count, 0);

        let described = api
            .describe_clusters(DescribeClustersRequest {
                clusters: Some(vec!["prod".to_string()]),
                include: None,
            })
            .await
            .unwrap();
        assert!(described.failures.is_empty());
        assert_eq!(described.clusters.len(), 1);
        assert_eq!(described.clusters[0].cluster_arn, created.cluster.cluster_arn);
    }

    #[tokio::test]
    async fn recreating_a_cluster_returns_the_existing_one() {
        let api = api().await;
        let first = api
            .create_cluster(CreateClusterRequest {
                cluster_name: Some("prod".to_string()),
                settings: Some(serde_json::json!([
                    {"name": "containerInsights", "value": "enabled"}
                ])),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = api
            .create_cluster(CreateClusterRequest {
                cluster_name: Some("prod".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.cluster.cluster_arn, second.cluster.cluster_arn);
        // The original settings survive the idempotent re-create.
        assert_eq!(second.cluster.settings, first.cluster.settings);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected() {
        let api = api().await;
        let err = api
            .create_cluster(CreateClusterRequest {
                cluster_name: Some("bad name!".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn describe_reports_missing_clusters_as_failures() {
        let api = api().await;
        let described = api
            .describe_clusters(DescribeClustersRequest {
                clusters: Some(vec!["ghost".to_string()]),
                include: None,
            })
            .await
            .unwrap();
        assert!(described.clusters.is_empty());
        assert_eq!(described.failures.len(), 1);
        assert_eq!(described.failures[0].reason.as_deref(), Some("MISSING"));
        assert_eq!(
            described.failures[0].arn.as_deref(),
            Some("arn:aws:ecs:us-east-1:000000000000:cluster/ghost")
        );
    }

    #[tokio::test]
    async fn pagination_walks_all_clusters_once() {
        let api = api().await;
        for i in 0..10 {
            api.create_cluster(CreateClusterRequest {
                cluster_name: Some(format!("c{i:02}")),
                ..Default::default()
            })
            .await
            .unwrap();
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut token: Option<String> = None;
        let mut last_page_len = 0;
        loop {
            let page = api
                .list_clusters(ListClustersRequest {
                    max_results: Some(3),
                    next_token: token.clone(),
                })
                .await
                .unwrap();
            last_page_len = page.cluster_arns.len();
            for arn in page.cluster_arns {
                assert!(seen.insert(arn));
            }
            match page.next_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(last_page_len, 1);
    }

    #[tokio::test]
    async fn delete_rejects_active_descendants() {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("busy".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        let cluster_arn = "arn:aws:ecs:us-east-1:000000000000:cluster/busy";

        // Plant an active service directly in storage.
        let mut service = service_fixture(cluster_arn, "web");
        service.status = "ACTIVE".to_string();
        api.storage().services().create(&service).await.unwrap();

        let err = api
            .delete_cluster(DeleteClusterRequest {
                cluster: "busy".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));

        // Draining the cluster makes delete succeed.
        service.status = "INACTIVE".to_string();
        api.storage().services().update(&service).await.unwrap();
        let deleted = api
            .delete_cluster(DeleteClusterRequest {
                cluster: "busy".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(deleted.cluster.status, "INACTIVE");
        let described = api
            .describe_clusters(DescribeClustersRequest {
                clusters: Some(vec!["busy".to_string()]),
                include: None,
            })
            .await
            .unwrap();
        assert_eq!(described.failures.len(), 1);
    }

    #[tokio::test]
    async fn statistics_count_past_the_first_listing_page() {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("big".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        let cluster_arn = "arn:aws:ecs:us-east-1:000000000000:cluster/big";

        // More running tasks than one listing page can hold.
        for _ in 0..105 {
            api.storage()
                .tasks()
                .create(&task_fixture(cluster_arn, "RUNNING"))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            api.storage()
                .tasks()
                .create(&task_fixture(cluster_arn, "PENDING"))
                .await
                .unwrap();
        }

        let described = api
            .describe_clusters(DescribeClustersRequest {
                clusters: Some(vec!["big".to_string()]),
                include: Some(vec!["STATISTICS".to_string()]),
            })
            .await
            .unwrap();
        let statistics = described.clusters[0].statistics.as_ref().unwrap();
        let value_of = |name: &str| {
            statistics
                .iter()
                .find(|s| s["name"] == name)
                .and_then(|s| s["value"].as_str())
                .map(str::to_string)
        };
        assert_eq!(value_of("runningFargateTasksCount").as_deref(), Some("105"));
        assert_eq!(value_of("pendingFargateTasksCount").as_deref(), Some("3"));
        assert_eq!(value_of("runningEC2TasksCount").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn update_cluster_settings_is_visible_in_describe() {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("prod".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        // Warm any caches.
        api.describe_clusters(DescribeClustersRequest {
            clusters: Some(vec!["prod".to_string()]),
            include: None,
        })
        .await
        .unwrap();

        let settings =
            serde_json::json!([{"name": "containerInsights", "value": "enabled"}]);
        api.update_cluster_settings(UpdateClusterSettingsRequest {
            cluster: "prod".to_string(),
            settings: settings.clone(),
        })
        .await
        .unwrap();

        let described = api
            .describe_clusters(DescribeClustersRequest {
                clusters: Some(vec!["prod".to_string()]),
                include: None,
            })
            .await
            .unwrap();
        assert_eq!(described.clusters[0].settings, Some(settings));
    }

    #[tokio::test]
    async fn capacity_provider_strategy_must_reference_attached_providers() {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("prod".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        let err = api
            .put_cluster_capacity_providers(PutClusterCapacityProvidersRequest {
                cluster: "prod".to_string(),
                capacity_providers: vec!["FARGATE".to_string()],
                default_capacity_provider_strategy: serde_json::json!([
                    {"capacityProvider": "FARGATE_SPOT", "weight": 1}
                ]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    fn task_fixture(cluster_arn: &str, last_status: &str) -> kecs_storage::models::Task {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().simple().to_string();
        kecs_storage::models::Task {
            arn: format!("arn:aws:ecs:us-east-1:000000000000:task/big/{id}"),
            id,
            cluster_arn: cluster_arn.to_string(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/td:1"
                .to_string(),
            container_instance_arn: None,
            last_status: last_status.to_string(),
            desired_status: "RUNNING".to_string(),
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

    fn service_fixture(cluster_arn: &str, name: &str) -> kecs_storage::models::Service {
        let now = Utc::now();
        kecs_storage::models::Service {
            id: uuid::Uuid::new_v4().to_string(),
            arn: format!("arn:aws:ecs:us-east-1:000000000000:service/busy/{name}"),
            service_name: name.to_string(),
            cluster_arn: cluster_arn.to_string(),
            task_definition_arn: "arn:aws:ecs:us-east-1:000000000000:task-definition/td:1"
                .to_string(),
            desired_count: 1,
            running_count: 0,
            pending_count: 0,
            status: "ACTIVE".to_string(),
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
            deployment_name: name.to_string(),
            namespace: "busy".to_string(),
            region: "us-east-1".to_string(),
            account_id: "000000000000".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}
