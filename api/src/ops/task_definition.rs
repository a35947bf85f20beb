use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::TaskDefinition;
use serde::{Deserialize, Serialize};

use super::{EcsApi, epoch, from_column, to_column};
use crate::arn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTaskDefinitionRequest {
    pub family: String,
    pub container_definitions: serde_json::Value,
    #[serde(default)]
    pub volumes: Option<serde_json::Value>,
    #[serde(default)]
    pub network_mode: Option<String>,
    #[serde(default)]
    pub requires_compatibilities: Option<serde_json::Value>,
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub task_role_arn: Option<String>,
    #[serde(default)]
    pub execution_role_arn: Option<String>,
    #[serde(default)]
    pub placement_constraints: Option<serde_json::Value>,
    #[serde(default)]
    pub runtime_platform: Option<serde_json::Value>,
    #[serde(default)]
    pub ipc_mode: Option<String>,
    #[serde(default)]
    pub pid_mode: Option<String>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterTaskDefinitionRequest {
    pub task_definition: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskDefinitionRequest {
    pub task_definition: String,
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTaskDefinitionsRequest {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTaskDefinitionFamiliesRequest {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskDefinition {
    pub task_definition_arn: String,
    pub family: String,
    pub revision: i32,
    pub status: String,
    pub container_definitions: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_compatibilities: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_platform: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    pub registered_at: f64,
}

impl WireTaskDefinition {
    fn from_model(td: &TaskDefinition) -> Self {
        Self {
            task_definition_arn: td.arn.clone(),
            family: td.family.clone(),
            revision: td.revision,
            status: td.status.clone(),
            container_definitions: serde_json::from_str(&td.container_definitions)
                .unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
            volumes: from_column(&td.volumes),
            network_mode: td.network_mode.clone(),
            requires_compatibilities: from_column(&td.requires_compatibilities),
            cpu: td.cpu.clone(),
            memory: td.memory.clone(),
            task_role_arn: td.task_role_arn.clone(),
            execution_role_arn: td.execution_role_arn.clone(),
            placement_constraints: from_column(&td.placement_constraints),
            runtime_platform: from_column(&td.runtime_platform),
            ipc_mode: td.ipc_mode.clone(),
            pid_mode: td.pid_mode.clone(),
            registered_at: epoch(td.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionResponse {
    pub task_definition: WireTaskDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionsResponse {
    pub task_definition_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionFamiliesResponse {
    pub families: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

const VALID_NETWORK_MODES: [&str; 4] = ["bridge", "host", "awsvpc", "none"];

impl EcsApi {
    /// Register a new revision of a family; the storage layer allocates
    /// `max(revision) + 1` atomically.
    pub async fn register_task_definition(
        &self,
        req: RegisterTaskDefinitionRequest,
    ) -> Result<TaskDefinitionResponse> {
        arn::validate_name("task definition family", &req.family)?;
        let containers = req
            .container_definitions
            .as_array()
            .ok_or_else(|| Error::invalid_input("containerDefinitions must be a list"))?;
        if containers.is_empty() {
            return Err(Error::invalid_input(
                "containerDefinitions must not be empty",
            ));
        }
        for (index, container) in containers.iter().enumerate() {
            let has = |field: &str| {
                container
                    .get(field)
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| !s.is_empty())
            };
            if !has("name") || !has("image") {
                return Err(Error::invalid_input(format!(
                    "containerDefinitions[{index}] requires name and image"
                )));
            }
        }
        if let Some(ref mode) = req.network_mode {
            if !VALID_NETWORK_MODES.contains(&mode.as_str()) {
                return Err(Error::invalid_input(format!(
                    "invalid network mode {mode}"
                )));
            }
        }

        let now = Utc::now();
        let td = TaskDefinition {
            id: uuid::Uuid::new_v4().to_string(),
            arn: String::new(),
            family: req.family.clone(),
            revision: 0,
            status: "ACTIVE".to_string(),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            container_definitions: req.container_definitions.to_string(),
            volumes: to_column(&req.volumes),
            network_mode: req.network_mode,
            requires_compatibilities: to_column(&req.requires_compatibilities),
            cpu: req.cpu,
            memory: req.memory,
            task_role_arn: req.task_role_arn,
            execution_role_arn: req.execution_role_arn,
            placement_constraints: to_column(&req.placement_constraints),
            runtime_platform: to_column(&req.runtime_platform),
            ipc_mode: req.ipc_mode,
            pid_mode: req.pid_mode,
            tags: to_column(&req.tags),
            created_at: now,
            updated_at: now,
        };
        let stored = self.storage.task_definitions().register(&td).await?;
        Ok(TaskDefinitionResponse {
            tags: from_column(&stored.tags),
            task_definition: WireTaskDefinition::from_model(&stored),
        })
    }

    /// Deregistration flips ACTIVE to INACTIVE; the row remains describable.
    pub async fn deregister_task_definition(
        &self,
        req: DeregisterTaskDefinitionRequest,
    ) -> Result<TaskDefinitionResponse> {
        let reference = req.task_definition.as_str();
        if !arn::is_arn(reference) {
            let (_, revision) = arn::split_family_revision(reference)?;
            if revision.is_none() {
                return Err(Error::invalid_input(
                    "deregistration requires an explicit revision (family:revision)",
                ));
            }
        }
        let mut td = self.resolve_task_definition(reference).await?;
        td.status = "INACTIVE".to_string();
        self.storage.task_definitions().update(&td).await?;
        Ok(TaskDefinitionResponse {
            tags: from_column(&td.tags),
            task_definition: WireTaskDefinition::from_model(&td),
        })
    }

    pub async fn describe_task_definition(
        &self,
        req: DescribeTaskDefinitionRequest,
    ) -> Result<TaskDefinitionResponse> {
        let td = self.resolve_task_definition(&req.task_definition).await?;
        let tags = req
            .include
            .as_ref()
            .is_some_and(|include| include.iter().any(|i| i == "TAGS"))
            .then(|| from_column(&td.tags))
            .flatten();
        Ok(TaskDefinitionResponse {
            tags,
            task_definition: WireTaskDefinition::from_model(&td),
        })
    }

    pub async fn list_task_definitions(
        &self,
        req: ListTaskDefinitionsRequest,
    ) -> Result<ListTaskDefinitionsResponse> {
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let (definitions, next_token) = self
            .storage
            .task_definitions()
            .list_paginated(
                req.family_prefix.as_deref(),
                req.status.as_deref(),
                limit,
                req.next_token.as_deref(),
            )
            .await?;
        Ok(ListTaskDefinitionsResponse {
            task_definition_arns: definitions.into_iter().map(|td| td.arn).collect(),
            next_token,
        })
    }

    pub async fn list_task_definition_families(
        &self,
        req: ListTaskDefinitionFamiliesRequest,
    ) -> Result<ListTaskDefinitionFamiliesResponse> {
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let (families, next_token) = self
            .storage
            .task_definitions()
            .list_families(
                req.family_prefix.as_deref(),
                req.status.as_deref(),
                limit,
                req.next_token.as_deref(),
            )
            .await?;
        Ok(ListTaskDefinitionFamiliesResponse {
            families,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::api;
    use super::*;

    fn register_request(family: &str, image: &str) -> RegisterTaskDefinitionRequest {
        RegisterTaskDefinitionRequest {
            family: family.to_string(),
            container_definitions: serde_json::json!([{"name": "app", "image": image}]),
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
        }
    }

    #[tokio::test]
    async fn two_registrations_produce_revisions_one_and_two() {
        let api = api().await;
        let first = api
            .register_task_definition(register_request("webapp", "nginx:1"))
            .await
            .unwrap();
        assert_eq!(first.task_definition.revision, 1);
        assert_eq!(
            first.task_definition.task_definition_arn,
            "arn:aws:ecs:us-east-1:000000000000:task-definition/webapp:1"
        );

        let second = api
            .register_task_definition(register_request("webapp", "nginx:2"))
            .await
            .unwrap();
        assert_eq!(second.task_definition.revision, 2);
        assert_eq!(
            second.task_definition.task_definition_arn,
            "arn:aws:ecs:us-east-1:000000000000:task-definition/webapp:2"
        );

        let revisions = api
            .storage()
            .task_definitions()
            .list_revisions("webapp", None)
            .await
            .unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(revisions.iter().all(|td| td.status == "ACTIVE"));
    }

    #[tokio::test]
    async fn container_definitions_are_validated() {
        let api = api().await;
        let mut req = register_request("webapp", "nginx:1");
        req.container_definitions = serde_json::json!([]);
        assert!(matches!(
            api.register_task_definition(req).await.unwrap_err(),
            Error::InvalidInput(_)
        ));

        let mut req = register_request("webapp", "nginx:1");
        req.container_definitions = serde_json::json!([{"name": "app"}]);
        assert!(matches!(
            api.register_task_definition(req).await.unwrap_err(),
            Error::InvalidInput(_)
        ));

        let mut req = register_request("webapp", "nginx:1");
        req.network_mode = Some("overlay".to_string());
        assert!(matches!(
            api.register_task_definition(req).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn describe_resolves_family_revision_and_latest() {
        let api = api().await;
        api.register_task_definition(register_request("webapp", "nginx:1"))
            .await
            .unwrap();
        api.register_task_definition(register_request("webapp", "nginx:2"))
            .await
            .unwrap();

        let by_revision = api
            .describe_task_definition(DescribeTaskDefinitionRequest {
                task_definition: "webapp:1".to_string(),
                include: None,
            })
            .await
            .unwrap();
        assert_eq!(by_revision.task_definition.revision, 1);

        let latest = api
            .describe_task_definition(DescribeTaskDefinitionRequest {
                task_definition: "webapp".to_string(),
                include: None,
            })
            .await
            .unwrap();
        assert_eq!(latest.task_definition.revision, 2);
    }

    #[tokio::test]
    async fn deregister_requires_a_revision_and_flips_status() {
        let api = api().await;
        api.register_task_definition(register_request("webapp", "nginx:1"))
            .await
            .unwrap();

        let err = api
            .deregister_task_definition(DeregisterTaskDefinitionRequest {
                task_definition: "webapp".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let deregistered = api
            .deregister_task_definition(DeregisterTaskDefinitionRequest {
                task_definition: "webapp:1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(deregistered.task_definition.status, "INACTIVE");

        // Still describable, but no longer the latest ACTIVE.
        let err = api
            .describe_task_definition(DescribeTaskDefinitionRequest {
                task_definition: "webapp".to_string(),
                include: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn families_listing_filters_by_prefix() {
        let api = api().await;
        for family in ["web-api", "web-ui", "worker"] {
            api.register_task_definition(register_request(family, "img:1"))
                .await
                .unwrap();
        }
        let families = api
            .list_task_definition_families(ListTaskDefinitionFamiliesRequest {
                family_prefix: Some("web".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(families.families, vec!["web-api", "web-ui"]);
    }
}
