use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::TaskSet;
use serde::{Deserialize, Serialize};

use super::{EcsApi, Failure, epoch};
use crate::arn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskSetRequest {
    pub service: String,
    pub cluster: String,
    pub task_definition: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub launch_type: Option<String>,
    #[serde(default)]
    pub scale: Option<Scale>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskSetRequest {
    pub cluster: String,
    pub service: String,
    pub task_set: String,
    pub scale: Scale,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskSetRequest {
    pub cluster: String,
    pub service: String,
    pub task_set: String,
    #[serde(default)]
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskSetsRequest {
    pub cluster: String,
    pub service: String,
    #[serde(default)]
    pub task_sets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scale {
    pub value: f64,
    #[serde(default = "default_scale_unit")]
    pub unit: String,
}

fn default_scale_unit() -> String {
    "PERCENT".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskSet {
    pub id: String,
    pub task_set_arn: String,
    pub service_arn: String,
    pub cluster_arn: String,
    pub status: String,
    pub task_definition: String,
    pub launch_type: String,
    pub scale: Scale,
    pub stability_status: String,
    pub computed_desired_count: i32,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
}

impl WireTaskSet {
    fn from_model(ts: &TaskSet) -> Self {
        Self {
            id: ts.id.clone(),
            task_set_arn: ts.arn.clone(),
            service_arn: ts.service_arn.clone(),
            cluster_arn: ts.cluster_arn.clone(),
            status: ts.status.clone(),
            task_definition: ts.task_definition_arn.clone(),
            launch_type: ts.launch_type.clone(),
            scale: Scale {
                value: ts.scale_value,
                unit: ts.scale_unit.clone(),
            },
            stability_status: ts.stability_status.clone(),
            computed_desired_count: ts.computed_desired_count,
            created_at: epoch(ts.created_at),
            external_id: ts.external_id.clone(),
            started_by: ts.started_by.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSetResponse {
    pub task_set: WireTaskSet,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskSetsResponse {
    pub task_sets: Vec<WireTaskSet>,
    pub failures: Vec<Failure>,
}

fn computed_count(service_desired: i32, scale_percent: f64) -> i32 {
    ((service_desired as f64) * scale_percent / 100.0).ceil() as i32
}

impl EcsApi {
    pub async fn create_task_set(&self, req: CreateTaskSetRequest) -> Result<TaskSetResponse> {
        let cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        let service_name = arn::short_name(&req.service);
        let service = self
            .storage
            .services()
            .get(&cluster.arn, service_name)
            .await?
            .ok_or_else(|| Error::not_found("service", service_name))?;
        let task_definition = self.resolve_task_definition(&req.task_definition).await?;

        let scale = req.scale.unwrap_or(Scale {
            value: 100.0,
            unit: default_scale_unit(),
        });
        if !(0.0..=100.0).contains(&scale.value) {
            return Err(Error::invalid_input("scale must be between 0 and 100"));
        }

        let now = Utc::now();
        let id = format!("ecs-svc-{}", uuid::Uuid::new_v4().simple());
        let task_set = TaskSet {
            arn: self.arn.task_set(&cluster.name, &service.service_name, &id),
            id,
            service_arn: service.arn.clone(),
            cluster_arn: cluster.arn.clone(),
            external_id: req.external_id,
            task_definition_arn: task_definition.arn,
            launch_type: req
                .launch_type
                .unwrap_or_else(|| service.launch_type.clone()),
            status: "ACTIVE".to_string(),
            stability_status: "STABILIZING".to_string(),
            scale_value: scale.value,
            scale_unit: scale.unit,
            computed_desired_count: computed_count(service.desired_count, scale.value),
            started_by: None,
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.task_sets().create(&task_set).await?;
        Ok(TaskSetResponse {
            task_set: WireTaskSet::from_model(&task_set),
        })
    }

    pub async fn update_task_set(&self, req: UpdateTaskSetRequest) -> Result<TaskSetResponse> {
        let cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        let service_name = arn::short_name(&req.service);
        let service = self
            .storage
            .services()
            .get(&cluster.arn, service_name)
            .await?
            .ok_or_else(|| Error::not_found("service", service_name))?;
        let id = arn::short_name(&req.task_set);
        let mut task_set = self
            .storage
            .task_sets()
            .get(&service.arn, id)
            .await?
            .ok_or_else(|| Error::not_found("task set", id))?;

        if !(0.0..=100.0).contains(&req.scale.value) {
            return Err(Error::invalid_input("scale must be between 0 and 100"));
        }
        task_set.scale_value = req.scale.value;
        task_set.scale_unit = req.scale.unit;
        task_set.computed_desired_count =
            computed_count(service.desired_count, task_set.scale_value);
        task_set.stability_status = "STABILIZING".to_string();
        self.storage.task_sets().update(&task_set).await?;
        Ok(TaskSetResponse {
            task_set: WireTaskSet::from_model(&task_set),
        })
    }

    pub async fn delete_task_set(&self, req: DeleteTaskSetRequest) -> Result<TaskSetResponse> {
        let cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        let service_name = arn::short_name(&req.service);
        let service = self
            .storage
            .services()
            .get(&cluster.arn, service_name)
            .await?
            .ok_or_else(|| Error::not_found("service", service_name))?;
        let id = arn::short_name(&req.task_set);
        let mut task_set = self
            .storage
            .task_sets()
            .get(&service.arn, id)
            .await?
            .ok_or_else(|| Error::not_found("task set", id))?;

        if task_set.scale_value > 0.0 && !req.force.unwrap_or(false) {
            return Err(Error::PreconditionFailed(format!(
                "task set {id} still has scale {}; scale to 0 or pass force",
                task_set.scale_value
            )));
        }
        self.storage.task_sets().delete(&service.arn, id).await?;
        task_set.status = "DRAINING".to_string();
        Ok(TaskSetResponse {
            task_set: WireTaskSet::from_model(&task_set),
        })
    }

    pub async fn describe_task_sets(
        &self,
        req: DescribeTaskSetsRequest,
    ) -> Result<DescribeTaskSetsResponse> {
        let cluster = self.resolve_cluster(Some(&req.cluster)).await?;
        let service_name = arn::short_name(&req.service);
        let service = self
            .storage
            .services()
            .get(&cluster.arn, service_name)
            .await?
            .ok_or_else(|| Error::not_found("service", service_name))?;

        let all = self.storage.task_sets().list(&service.arn).await?;
        let mut task_sets = Vec::new();
        let mut failures = Vec::new();
        match req.task_sets {
            Some(references) if !references.is_empty() => {
                for reference in references {
                    let id = arn::short_name(&reference);
                    match all.iter().find(|ts| ts.id == id || ts.arn == reference) {
                        Some(ts) => task_sets.push(WireTaskSet::from_model(ts)),
                        None => failures.push(Failure::missing(reference.clone())),
                    }
                }
            }
            _ => task_sets = all.iter().map(WireTaskSet::from_model).collect(),
        }
        Ok(DescribeTaskSetsResponse {
            task_sets,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::cluster::CreateClusterRequest;
    use super::super::service::CreateServiceRequest;
    use super::super::task_definition::RegisterTaskDefinitionRequest;
    use super::super::test_support::api;
    use super::*;

    async fn api_with_service() -> super::super::EcsApi {
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
        api.create_service(CreateServiceRequest {
            service_name: "web".to_string(),
            task_definition: "webapp".to_string(),
            cluster: Some("prod".to_string()),
            desired_count: Some(10),
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
        })
        .await
        .unwrap();
        api
    }

    #[tokio::test]
    async fn scale_drives_the_computed_desired_count() {
        let api = api_with_service().await;
        let created = api
            .create_task_set(CreateTaskSetRequest {
                service: "web".to_string(),
                cluster: "prod".to_string(),
                task_definition: "webapp".to_string(),
                external_id: None,
                launch_type: None,
                scale: Some(Scale {
                    value: 50.0,
                    unit: "PERCENT".to_string(),
                }),
            })
            .await
            .unwrap();
        assert_eq!(created.task_set.computed_desired_count, 5);
        assert_eq!(created.task_set.stability_status, "STABILIZING");

        let updated = api
            .update_task_set(UpdateTaskSetRequest {
                cluster: "prod".to_string(),
                service: "web".to_string(),
                task_set: created.task_set.id.clone(),
                scale: Scale {
                    value: 25.0,
                    unit: "PERCENT".to_string(),
                },
            })
            .await
            .unwrap();
        // ceil(10 * 25%) = 3
        assert_eq!(updated.task_set.computed_desired_count, 3);
    }

    #[tokio::test]
    async fn delete_requires_zero_scale_or_force() {
        let api = api_with_service().await;
        let created = api
            .create_task_set(CreateTaskSetRequest {
                service: "web".to_string(),
                cluster: "prod".to_string(),
                task_definition: "webapp".to_string(),
                external_id: None,
                launch_type: None,
                scale: None,
            })
            .await
            .unwrap();
        let err = api
            .delete_task_set(DeleteTaskSetRequest {
                cluster: "prod".to_string(),
                service: "web".to_string(),
                task_set: created.task_set.id.clone(),
                force: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed(_)));

        let deleted = api
            .delete_task_set(DeleteTaskSetRequest {
                cluster: "prod".to_string(),
                service: "web".to_string(),
                task_set: created.task_set.id.clone(),
                force: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(deleted.task_set.status, "DRAINING");

        let described = api
            .describe_task_sets(DescribeTaskSetsRequest {
                cluster: "prod".to_string(),
                service: "web".to_string(),
                task_sets: None,
            })
            .await
            .unwrap();
        assert!(described.task_sets.is_empty());
    }
}
