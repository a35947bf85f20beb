use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::{Service, service_status};
use kecs_storage::store::ServiceFilters;
use serde::{Deserialize, Serialize};

use super::{EcsApi, Failure, epoch, from_column, to_column};
use crate::arn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub service_name: String,
    pub task_definition: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub desired_count: Option<i32>,
    #[serde(default)]
    pub launch_type: Option<String>,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub load_balancers: Option<serde_json::Value>,
    #[serde(default)]
    pub service_registries: Option<serde_json::Value>,
    #[serde(default)]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub deployment_configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub placement_constraints: Option<serde_json::Value>,
    #[serde(default)]
    pub placement_strategy: Option<serde_json::Value>,
    #[serde(default)]
    pub capacity_provider_strategy: Option<serde_json::Value>,
    #[serde(default)]
    pub scheduling_strategy: Option<String>,
    #[serde(default)]
    pub health_check_grace_period_seconds: Option<i32>,
    #[serde(default)]
    pub enable_ecs_managed_tags: Option<bool>,
    #[serde(default)]
    pub enable_execute_command: Option<bool>,
    #[serde(default)]
    pub propagate_tags: Option<String>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceRequest {
    pub service: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub desired_count: Option<i32>,
    #[serde(default)]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub deployment_configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub force_new_deployment: Option<bool>,
    #[serde(default)]
    pub health_check_grace_period_seconds: Option<i32>,
    #[serde(default)]
    pub enable_execute_command: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteServiceRequest {
    pub service: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesRequest {
    pub services: Vec<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListServicesRequest {
    pub cluster: Option<String>,
    pub launch_type: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireService {
    pub service_arn: String,
    pub service_name: String,
    pub cluster_arn: String,
    pub status: String,
    pub desired_count: i32,
    pub running_count: i32,
    pub pending_count: i32,
    pub launch_type: String,
    pub task_definition: String,
    pub scheduling_strategy: String,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_registries: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_strategy: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider_strategy: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_seconds: Option<i32>,
    pub enable_ecs_managed_tags: bool,
    pub enable_execute_command: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagate_tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
}

impl WireService {
    fn from_model(s: &Service) -> Self {
        Self {
            service_arn: s.arn.clone(),
            service_name: s.service_name.clone(),
            cluster_arn: s.cluster_arn.clone(),
            status: s.status.clone(),
            desired_count: s.desired_count,
            running_count: s.running_count,
            pending_count: s.pending_count,
            launch_type: s.launch_type.clone(),
            task_definition: s.task_definition_arn.clone(),
            scheduling_strategy: s.scheduling_strategy.clone(),
            created_at: epoch(s.created_at),
            platform_version: s.platform_version.clone(),
            role_arn: s.role_arn.clone(),
            load_balancers: from_column(&s.load_balancers),
            service_registries: from_column(&s.service_registries),
            network_configuration: from_column(&s.network_configuration),
            deployment_configuration: from_column(&s.deployment_configuration),
            placement_constraints: from_column(&s.placement_constraints),
            placement_strategy: from_column(&s.placement_strategy),
            capacity_provider_strategy: from_column(&s.capacity_provider_strategy),
            health_check_grace_period_seconds: s.health_check_grace_period_seconds,
            enable_ecs_managed_tags: s.enable_ecs_managed_tags,
            enable_execute_command: s.enable_execute_command,
            propagate_tags: s.propagate_tags.clone(),
            tags: from_column(&s.tags),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub service: WireService,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesResponse {
    pub services: Vec<WireService>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListServicesResponse {
    pub service_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl EcsApi {
    /// Create a service. The core persists the intended deployment name and
    /// namespace; the controllers inside the virtual cluster converge on it,
    /// possibly after the cluster finishes warming up.
    pub async fn create_service(&self, req: CreateServiceRequest) -> Result<ServiceResponse> {
        arn::validate_name("service", &req.service_name)?;
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let task_definition = self.resolve_task_definition(&req.task_definition).await?;
        let desired_count = req.desired_count.unwrap_or(1);
        if desired_count < 0 {
            return Err(Error::invalid_input("desiredCount must not be negative"));
        }

        let now = Utc::now();
        let service = Service {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.service(&cluster.name, &req.service_name),
            service_name: req.service_name.clone(),
            cluster_arn: cluster.arn.clone(),
            task_definition_arn: task_definition.arn.clone(),
            desired_count,
            running_count: 0,
            pending_count: 0,
            status: service_status::ACTIVE.to_string(),
            launch_type: req.launch_type.unwrap_or_else(|| "FARGATE".to_string()),
            platform_version: req.platform_version,
            role_arn: req.role,
            load_balancers: to_column(&req.load_balancers),
            service_registries: to_column(&req.service_registries),
            network_configuration: to_column(&req.network_configuration),
            deployment_configuration: to_column(&req.deployment_configuration),
            placement_constraints: to_column(&req.placement_constraints),
            placement_strategy: to_column(&req.placement_strategy),
            capacity_provider_strategy: to_column(&req.capacity_provider_strategy),
            scheduling_strategy: req
                .scheduling_strategy
                .unwrap_or_else(|| "REPLICA".to_string()),
            health_check_grace_period_seconds: req.health_check_grace_period_seconds,
            enable_ecs_managed_tags: req.enable_ecs_managed_tags.unwrap_or(false),
            enable_execute_command: req.enable_execute_command.unwrap_or(false),
            propagate_tags: req.propagate_tags,
            tags: to_column(&req.tags),
            deployment_name: req.service_name.clone(),
            namespace: cluster.name.clone(),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.services().create(&service).await?;

        let mut tx = self.storage.begin_tx().await?;
        tx.adjust_cluster_counters(&cluster.arn, 1, 0, 0).await?;
        tx.commit().await?;

        Ok(ServiceResponse {
            service: WireService::from_model(&service),
        })
    }

    pub async fn update_service(&self, req: UpdateServiceRequest) -> Result<ServiceResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let name = arn::short_name(&req.service);
        let mut service = self
            .storage
            .services()
            .get(&cluster.arn, name)
            .await?
            .ok_or_else(|| Error::not_found("service", name))?;

        if let Some(desired_count) = req.desired_count {
            if desired_count < 0 {
                return Err(Error::invalid_input("desiredCount must not be negative"));
            }
            service.desired_count = desired_count;
        }
        if let Some(ref reference) = req.task_definition {
            let task_definition = self.resolve_task_definition(reference).await?;
            service.task_definition_arn = task_definition.arn;
        }
        if let Some(network_configuration) = req.network_configuration {
            service.network_configuration = Some(network_configuration.to_string());
        }
        if let Some(deployment_configuration) = req.deployment_configuration {
            // The deployment circuit breaker is accepted and stored; rollback
            // on a tripped breaker is not implemented.
            if deployment_configuration.get("deploymentCircuitBreaker").is_some() {
                tracing::info!(
                    service = name,
                    "deployment circuit breaker configured; rollback is not enforced"
                );
            }
            service.deployment_configuration = Some(deployment_configuration.to_string());
        }
        if let Some(platform_version) = req.platform_version {
            service.platform_version = Some(platform_version);
        }
        if let Some(grace) = req.health_check_grace_period_seconds {
            service.health_check_grace_period_seconds = Some(grace);
        }
        if let Some(enable) = req.enable_execute_command {
            service.enable_execute_command = enable;
        }
        if req.force_new_deployment.unwrap_or(false) {
            tracing::info!(service = name, "forcing new deployment");
        }
        self.storage.services().update(&service).await?;
        Ok(ServiceResponse {
            service: WireService::from_model(&service),
        })
    }

    /// Delete a service. A non-zero desired count requires `force`. The row
    /// is marked INACTIVE for the cleanup sweep; the response reports the
    /// draining view.
    pub async fn delete_service(&self, req: DeleteServiceRequest) -> Result<ServiceResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let name = arn::short_name(&req.service);
        let mut service = self
            .storage
            .services()
            .get(&cluster.arn, name)
            .await?
            .ok_or_else(|| Error::not_found("service", name))?;

        if service.desired_count > 0 && !req.force.unwrap_or(false) {
            return Err(Error::PreconditionFailed(format!(
                "service {name} has desired count {}; scale to 0 or pass force",
                service.desired_count
            )));
        }

        service.status = service_status::INACTIVE.to_string();
        service.desired_count = 0;
        self.storage.services().update(&service).await?;

        let mut tx = self.storage.begin_tx().await?;
        tx.adjust_cluster_counters(&cluster.arn, -1, 0, 0).await?;
        tx.commit().await?;

        let mut wire = WireService::from_model(&service);
        wire.status = service_status::DRAINING.to_string();
        Ok(ServiceResponse { service: wire })
    }

    pub async fn describe_services(
        &self,
        req: DescribeServicesRequest,
    ) -> Result<DescribeServicesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let mut services = Vec::new();
        let mut failures = Vec::new();
        for reference in &req.services {
            let name = arn::short_name(reference);
            match self.storage.services().get(&cluster.arn, name).await? {
                Some(service) => services.push(WireService::from_model(&service)),
                None => failures.push(Failure::missing(if arn::is_arn(reference) {
                    reference.clone()
                } else {
                    self.arn.service(&cluster.name, name)
                })),
            }
        }
        Ok(DescribeServicesResponse { services, failures })
    }

    pub async fn list_services(&self, req: ListServicesRequest) -> Result<ListServicesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let filters = ServiceFilters {
            launch_type: req.launch_type,
        };
        let (services, next_token) = self
            .storage
            .services()
            .list(&cluster.arn, &filters, limit, req.next_token.as_deref())
            .await?;
        Ok(ListServicesResponse {
            service_arns: services.into_iter().map(|s| s.arn).collect(),
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::cluster::CreateClusterRequest;
    use super::super::task_definition::RegisterTaskDefinitionRequest;
    use super::super::test_support::api;
    use super::*;

    async fn api_with_prereqs() -> super::super::EcsApi {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("prod".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        api.register_task_definition(RegisterTaskDefinitionRequest {
            family: "webapp".to_string(),
            container_definitions: serde_json::json!([{"name": "app", "image": "nginx:1"}]),
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
        })
        .await
        .unwrap();
        api
    }

    fn create_request(name: &str) -> CreateServiceRequest {
        CreateServiceRequest {
            service_name: name.to_string(),
            task_definition: "webapp".to_string(),
            cluster: Some("prod".to_string()),
            desired_count: Some(2),
            launch_type: None,
            platform_version: None,
            role: None,
            load_balancers: None,
            service_registries: None,
            network_configuration: None,
            deployment_configuration: None,
            placement_constraints: None,
            placement_strategy: None,
            capacity_provider_strategy: None,
            scheduling_strategy: None,
            health_check_grace_period_seconds: None,
            enable_ecs_managed_tags: None,
            enable_execute_command: None,
            propagate_tags: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn create_service_persists_intent_and_bumps_counters() {
        let api = api_with_prereqs().await;
        let created = api.create_service(create_request("web")).await.unwrap();
        assert_eq!(
            created.service.service_arn,
            "arn:aws:ecs:us-east-1:000000000000:service/prod/web"
        );
        assert_eq!(created.service.status, "ACTIVE");
        assert_eq!(created.service.desired_count, 2);
        assert_eq!(
            created.service.task_definition,
            "arn:aws:ecs:us-east-1:000000000000:task-definition/webapp:1"
        );

        let stored = api
            .storage()
            .services()
            .get("arn:aws:ecs:us-east-1:000000000000:cluster/prod", "web")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.deployment_name, "web");
        assert_eq!(stored.namespace, "prod");

        let cluster = api.storage().clusters().get("prod").await.unwrap().unwrap();
        assert_eq!(cluster.active_services_count, 1);
    }

    #[tokio::test]
    async fn duplicate_service_names_conflict() {
        let api = api_with_prereqs().await;
        api.create_service(create_request("web")).await.unwrap();
        let err = api.create_service(create_request("web")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_requires_existing_cluster_and_task_definition() {
        let api = api_with_prereqs().await;
        let mut req = create_request("web");
        req.cluster = Some("ghost".to_string());
        assert!(matches!(
            api.create_service(req).await.unwrap_err(),
            Error::NotFound(_)
        ));

        let mut req = create_request("web");
        req.task_definition = "missing".to_string();
        assert!(matches!(
            api.create_service(req).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn update_changes_desired_count_and_task_definition() {
        let api = api_with_prereqs().await;
        api.create_service(create_request("web")).await.unwrap();
        api.register_task_definition(RegisterTaskDefinitionRequest {
            family: "webapp".to_string(),
            container_definitions: serde_json::json!([{"name": "app", "image": "nginx:2"}]),
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
        })
        .await
        .unwrap();

        let updated = api
            .update_service(UpdateServiceRequest {
                service: "web".to_string(),
                cluster: Some("prod".to_string()),
                desired_count: Some(5),
                task_definition: Some("webapp".to_string()),
                network_configuration: None,
                deployment_configuration: None,
                platform_version: None,
                force_new_deployment: None,
                health_check_grace_period_seconds: None,
                enable_execute_command: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.service.desired_count, 5);
        assert!(updated.service.task_definition.ends_with("webapp:2"));

        let err = api
            .update_service(UpdateServiceRequest {
                service: "web".to_string(),
                cluster: Some("prod".to_string()),
                desired_count: Some(-1),
                task_definition: None,
                network_configuration: None,
                deployment_configuration: None,
                platform_version: None,
                force_new_deployment: None,
                health_check_grace_period_seconds: None,
                enable_execute_command: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn delete_requires_scale_to_zero_or_force() {
        let api = api_with_prereqs().await;
        api.create_service(create_request("web")).await.unwrap();

        let err = api
            .delete_service(DeleteServiceRequest {
                service: "web".to_string(),
                cluster: Some("prod".to_string()),
                force: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));

        let deleted = api
            .delete_service(DeleteServiceRequest {
                service: "web".to_string(),
                cluster: Some("prod".to_string()),
                force: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(deleted.service.status, "DRAINING");

        // The row is marked for the cleanup sweep and no longer active.
        let cluster_arn = "arn:aws:ecs:us-east-1:000000000000:cluster/prod";
        assert_eq!(
            api.storage().services().count_active(cluster_arn).await.unwrap(),
            0
        );
        let removed = api
            .storage()
            .services()
            .delete_marked_for_deletion(cluster_arn)
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn describe_mixes_found_and_failures() {
        let api = api_with_prereqs().await;
        api.create_service(create_request("web")).await.unwrap();
        let described = api
            .describe_services(DescribeServicesRequest {
                services: vec!["web".to_string(), "ghost".to_string()],
                cluster: Some("prod".to_string()),
                include: None,
            })
            .await
            .unwrap();
        assert_eq!(described.services.len(), 1);
        assert_eq!(described.failures.len(), 1);
        assert_eq!(
            described.failures[0].arn.as_deref(),
            Some("arn:aws:ecs:us-east-1:000000000000:service/prod/ghost")
        );
    }

    #[tokio::test]
    async fn list_filters_by_launch_type() {
        let api = api_with_prereqs().await;
        api.create_service(create_request("web")).await.unwrap();
        let mut ec2 = create_request("batch");
        ec2.launch_type = Some("EC2".to_string());
        api.create_service(ec2).await.unwrap();

        let all = api
            .list_services(ListServicesRequest {
                cluster: Some("prod".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all.service_arns.len(), 2);

        let fargate_only = api
            .list_services(ListServicesRequest {
                cluster: Some("prod".to_string()),
                launch_type: Some("FARGATE".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fargate_only.service_arns.len(), 1);
        assert!(fargate_only.service_arns[0].ends_with("/web"));
    }
}
