use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::{ContainerInstance, container_instance_status};
use serde::{Deserialize, Serialize};

use super::{EcsApi, Failure, epoch, from_column, to_column};
use crate::arn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterContainerInstanceRequest {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub instance_identity_document: Option<String>,
    #[serde(default)]
    pub total_resources: Option<serde_json::Value>,
    #[serde(default)]
    pub version_info: Option<serde_json::Value>,
    #[serde(default)]
    pub attributes: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterContainerInstanceRequest {
    pub container_instance: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeContainerInstancesRequest {
    pub container_instances: Vec<String>,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListContainerInstancesRequest {
    pub cluster: Option<String>,
    pub status: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContainerInstancesStateRequest {
    pub container_instances: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireContainerInstance {
    pub container_instance_arn: String,
    pub status: String,
    pub agent_connected: bool,
    pub running_tasks_count: i32,
    pub pending_tasks_count: i32,
    pub registered_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_resources: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_resources: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
}

impl WireContainerInstance {
    fn from_model(ci: &ContainerInstance) -> Self {
        Self {
            container_instance_arn: ci.arn.clone(),
            status: ci.status.clone(),
            agent_connected: ci.agent_connected,
            running_tasks_count: ci.running_tasks_count,
            pending_tasks_count: ci.pending_tasks_count,
            registered_at: epoch(ci.created_at),
            ec2_instance_id: ci.ec2_instance_id.clone(),
            registered_resources: from_column(&ci.registered_resources),
            remaining_resources: from_column(&ci.remaining_resources),
            version_info: from_column(&ci.version_info),
            attributes: from_column(&ci.attributes),
            tags: from_column(&ci.tags),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInstanceResponse {
    pub container_instance: WireContainerInstance,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeContainerInstancesResponse {
    pub container_instances: Vec<WireContainerInstance>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListContainerInstancesResponse {
    pub container_instance_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContainerInstancesStateResponse {
    pub container_instances: Vec<WireContainerInstance>,
    pub failures: Vec<Failure>,
}

/// Emulated workers register without hardware to inventory; a plausible
/// default resource set keeps scheduler-shaped clients happy.
fn default_resources() -> serde_json::Value {
    serde_json::json!([
        {"name": "CPU", "type": "INTEGER", "integerValue": 2048},
        {"name": "MEMORY", "type": "INTEGER", "integerValue": 4096},
        {"name": "PORTS", "type": "STRINGSET", "stringSetValue": ["22", "2376", "2375", "51678", "51679"]},
    ])
}

fn default_version_info() -> serde_json::Value {
    serde_json::json!({
        "agentVersion": "1.0.0",
        "agentHash": "0000000",
        "dockerVersion": "DockerVersion: 24.0",
    })
}

impl EcsApi {
    pub async fn register_container_instance(
        &self,
        req: RegisterContainerInstanceRequest,
    ) -> Result<ContainerInstanceResponse> {
        let mut cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let resources = req.total_resources.unwrap_or_else(default_resources);
        let version_info = req.version_info.unwrap_or_else(default_version_info);
        let ec2_instance_id = req
            .instance_identity_document
            .as_deref()
            .and_then(|doc| serde_json::from_str::<serde_json::Value>(doc).ok())
            .and_then(|doc| doc.get("instanceId").and_then(|v| v.as_str()).map(String::from));

        let now = Utc::now();
        let instance = ContainerInstance {
            arn: self.arn.container_instance(&cluster.name, &id),
            id,
            cluster_arn: cluster.arn.clone(),
            ec2_instance_id,
            status: container_instance_status::ACTIVE.to_string(),
            agent_connected: true,
            running_tasks_count: 0,
            pending_tasks_count: 0,
            attributes: to_column(&req.attributes),
            registered_resources: Some(resources.to_string()),
            remaining_resources: Some(resources.to_string()),
            version_info: Some(version_info.to_string()),
            tags: to_column(&req.tags),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.container_instances().create(&instance).await?;

        cluster.registered_container_instances_count += 1;
        self.storage.clusters().update(&cluster).await?;

        Ok(ContainerInstanceResponse {
            container_instance: WireContainerInstance::from_model(&instance),
        })
    }

    /// Deregistration transitions the row to INACTIVE; it is never purged.
    pub async fn deregister_container_instance(
        &self,
        req: DeregisterContainerInstanceRequest,
    ) -> Result<ContainerInstanceResponse> {
        let mut cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let reference = self.container_instance_arn(&cluster.name, &req.container_instance);
        let mut instance = self
            .storage
            .container_instances()
            .get_by_arn(&reference)
            .await?
            .ok_or_else(|| Error::not_found("container instance", &reference))?;

        if instance.running_tasks_count > 0 && !req.force.unwrap_or(false) {
            return Err(Error::PreconditionFailed(format!(
                "container instance has {} running tasks; drain it or pass force",
                instance.running_tasks_count
            )));
        }

        instance.status = container_instance_status::INACTIVE.to_string();
        instance.agent_connected = false;
        self.storage.container_instances().update(&instance).await?;

        if cluster.registered_container_instances_count > 0 {
            cluster.registered_container_instances_count -= 1;
            self.storage.clusters().update(&cluster).await?;
        }

        Ok(ContainerInstanceResponse {
            container_instance: WireContainerInstance::from_model(&instance),
        })
    }

    pub async fn describe_container_instances(
        &self,
        req: DescribeContainerInstancesRequest,
    ) -> Result<DescribeContainerInstancesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let arns: Vec<String> = req
            .container_instances
            .iter()
            .map(|reference| self.container_instance_arn(&cluster.name, reference))
            .collect();
        let found = self.storage.container_instances().get_by_arns(&arns).await?;
        let failures = arns
            .iter()
            .filter(|arn| !found.iter().any(|ci| &ci.arn == *arn))
            .map(Failure::missing)
            .collect();
        Ok(DescribeContainerInstancesResponse {
            container_instances: found.iter().map(WireContainerInstance::from_model).collect(),
            failures,
        })
    }

    pub async fn list_container_instances(
        &self,
        req: ListContainerInstancesRequest,
    ) -> Result<ListContainerInstancesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let (instances, next_token) = self
            .storage
            .container_instances()
            .list(
                &cluster.arn,
                req.status.as_deref(),
                limit,
                req.next_token.as_deref(),
            )
            .await?;
        Ok(ListContainerInstancesResponse {
            container_instance_arns: instances.into_iter().map(|ci| ci.arn).collect(),
            next_token,
        })
    }

    /// Supports the ACTIVE <-> DRAINING half of the lifecycle; anything else
    /// is rejected as invalid input.
    pub async fn update_container_instances_state(
        &self,
        req: UpdateContainerInstancesStateRequest,
    ) -> Result<UpdateContainerInstancesStateResponse> {
        if req.status != container_instance_status::ACTIVE
            && req.status != container_instance_status::DRAINING
        {
            return Err(Error::invalid_input(format!(
                "container instance state can only be set to ACTIVE or DRAINING, not {}",
                req.status
            )));
        }
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let mut updated = Vec::new();
        let mut failures = Vec::new();
        for reference in &req.container_instances {
            let reference = self.container_instance_arn(&cluster.name, reference);
            match self
                .storage
                .container_instances()
                .get_by_arn(&reference)
                .await?
            {
                Some(mut instance) => {
                    if !container_instance_status::is_valid_transition(
                        &instance.status,
                        &req.status,
                    ) {
                        failures.push(Failure {
                            arn: Some(reference),
                            reason: Some("INVALID_TRANSITION".to_string()),
                            detail: Some(format!("{} -> {}", instance.status, req.status)),
                        });
                        continue;
                    }
                    instance.status = req.status.clone();
                    self.storage.container_instances().update(&instance).await?;
                    updated.push(WireContainerInstance::from_model(&instance));
                }
                None => failures.push(Failure::missing(reference)),
            }
        }
        Ok(UpdateContainerInstancesStateResponse {
            container_instances: updated,
            failures,
        })
    }

    fn container_instance_arn(&self, cluster_name: &str, reference: &str) -> String {
        if arn::is_arn(reference) {
            reference.to_string()
        } else {
            self.arn.container_instance(cluster_name, reference)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::cluster::CreateClusterRequest;
    use super::super::test_support::api;
    use super::*;

    async fn api_with_cluster() -> super::super::EcsApi {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("prod".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        api
    }

    #[tokio::test]
    async fn registration_synthesizes_a_resource_inventory() {
        let api = api_with_cluster().await;
        let registered = api
            .register_container_instance(RegisterContainerInstanceRequest {
                cluster: Some("prod".to_string()),
                instance_identity_document: Some(
                    r#"{"instanceId": "i-0123456789abcdef0"}"#.to_string(),
                ),
                total_resources: None,
                version_info: None,
                attributes: None,
                tags: None,
            })
            .await
            .unwrap();
        let instance = &registered.container_instance;
        assert_eq!(instance.status, "ACTIVE");
        assert!(instance.agent_connected);
        assert_eq!(
            instance.ec2_instance_id.as_deref(),
            Some("i-0123456789abcdef0")
        );
        let resources = instance.registered_resources.as_ref().unwrap();
        assert_eq!(resources[0]["name"], "CPU");
        assert!(instance.version_info.is_some());

        let cluster = api.storage().clusters().get("prod").await.unwrap().unwrap();
        assert_eq!(cluster.registered_container_instances_count, 1);
    }

    #[tokio::test]
    async fn deregistration_keeps_the_row_as_inactive() {
        let api = api_with_cluster().await;
        let registered = api
            .register_container_instance(RegisterContainerInstanceRequest {
                cluster: Some("prod".to_string()),
                instance_identity_document: None,
                total_resources: None,
                version_info: None,
                attributes: None,
                tags: None,
            })
            .await
            .unwrap();
        let arn = registered.container_instance.container_instance_arn.clone();

        let deregistered = api
            .deregister_container_instance(DeregisterContainerInstanceRequest {
                container_instance: arn.clone(),
                cluster: Some("prod".to_string()),
                force: None,
            })
            .await
            .unwrap();
        assert_eq!(deregistered.container_instance.status, "INACTIVE");

        // Row survives and remains describable.
        let described = api
            .describe_container_instances(DescribeContainerInstancesRequest {
                container_instances: vec![arn],
                cluster: Some("prod".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(described.container_instances.len(), 1);
        assert_eq!(described.container_instances[0].status, "INACTIVE");
    }

    #[tokio::test]
    async fn draining_round_trips_but_inactive_cannot_recover() {
        let api = api_with_cluster().await;
        let registered = api
            .register_container_instance(RegisterContainerInstanceRequest {
                cluster: Some("prod".to_string()),
                instance_identity_document: None,
                total_resources: None,
                version_info: None,
                attributes: None,
                tags: None,
            })
            .await
            .unwrap();
        let arn = registered.container_instance.container_instance_arn.clone();

        let drained = api
            .update_container_instances_state(UpdateContainerInstancesStateRequest {
                container_instances: vec![arn.clone()],
                status: "DRAINING".to_string(),
                cluster: Some("prod".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(drained.container_instances[0].status, "DRAINING");

        let reactivated = api
            .update_container_instances_state(UpdateContainerInstancesStateRequest {
                container_instances: vec![arn.clone()],
                status: "ACTIVE".to_string(),
                cluster: Some("prod".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(reactivated.container_instances[0].status, "ACTIVE");

        assert!(matches!(
            api.update_container_instances_state(UpdateContainerInstancesStateRequest {
                container_instances: vec![arn],
                status: "INACTIVE".to_string(),
                cluster: Some("prod".to_string()),
            })
            .await
            .unwrap_err(),
            Error::InvalidInput(_)
        ));
    }
}
