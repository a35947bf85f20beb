use kecs_common::{Error, Result};
use serde::{Deserialize, Serialize};

use super::{EcsApi, Tag};
use crate::arn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResourceRequest {
    pub resource_arn: String,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UntagResourceRequest {
    pub resource_arn: String,
    pub tag_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTagsForResourceRequest {
    pub resource_arn: String,
}

#[derive(Debug, Serialize)]
pub struct TagResourceResponse {}

#[derive(Debug, Serialize)]
pub struct UntagResourceResponse {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTagsForResourceResponse {
    pub tags: Vec<Tag>,
}

fn parse_tags(column: &Option<String>) -> Vec<Tag> {
    column
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

fn merge_tags(existing: &mut Vec<Tag>, incoming: &[Tag]) {
    for tag in incoming {
        match existing.iter_mut().find(|t| t.key == tag.key) {
            Some(found) => found.value = tag.value.clone(),
            None => existing.push(tag.clone()),
        }
    }
}

impl EcsApi {
    /// Load a resource's tag column by ARN kind, apply `mutate`, store back.
    async fn with_resource_tags(
        &self,
        resource_arn: &str,
        mutate: impl FnOnce(&mut Vec<Tag>),
    ) -> Result<Vec<Tag>> {
        let kind = arn::resource_kind(resource_arn)?;
        match kind {
            "cluster" => {
                let name = arn::resource_name(resource_arn);
                let mut cluster = self
                    .storage
                    .clusters()
                    .get(name)
                    .await?
                    .ok_or_else(|| Error::not_found("cluster", name))?;
                let mut tags = parse_tags(&cluster.tags);
                mutate(&mut tags);
                cluster.tags = Some(serde_json::to_string(&tags)?);
                self.storage.clusters().update(&cluster).await?;
                Ok(tags)
            }
            "service" => {
                let mut service = self
                    .storage
                    .services()
                    .get_by_arn(resource_arn)
                    .await?
                    .ok_or_else(|| Error::not_found("service", resource_arn))?;
                let mut tags = parse_tags(&service.tags);
                mutate(&mut tags);
                service.tags = Some(serde_json::to_string(&tags)?);
                self.storage.services().update(&service).await?;
                Ok(tags)
            }
            "task-definition" => {
                let mut td = self
                    .storage
                    .task_definitions()
                    .get_by_arn(resource_arn)
                    .await?
                    .ok_or_else(|| Error::not_found("task definition", resource_arn))?;
                let mut tags = parse_tags(&td.tags);
                mutate(&mut tags);
                td.tags = Some(serde_json::to_string(&tags)?);
                self.storage.task_definitions().update(&td).await?;
                Ok(tags)
            }
            "container-instance" => {
                let mut instance = self
                    .storage
                    .container_instances()
                    .get_by_arn(resource_arn)
                    .await?
                    .ok_or_else(|| Error::not_found("container instance", resource_arn))?;
                let mut tags = parse_tags(&instance.tags);
                mutate(&mut tags);
                instance.tags = Some(serde_json::to_string(&tags)?);
                self.storage.container_instances().update(&instance).await?;
                Ok(tags)
            }
            other => Err(Error::invalid_input(format!(
                "resource kind {other} does not support tagging"
            ))),
        }
    }

    pub async fn tag_resource(&self, req: TagResourceRequest) -> Result<TagResourceResponse> {
        if req.tags.iter().any(|t| t.key.as_deref().unwrap_or("").is_empty()) {
            return Err(Error::invalid_input("tag keys must not be empty"));
        }
        self.with_resource_tags(&req.resource_arn, |tags| merge_tags(tags, &req.tags))
            .await?;
        Ok(TagResourceResponse {})
    }

    pub async fn untag_resource(&self, req: UntagResourceRequest) -> Result<UntagResourceResponse> {
        self.with_resource_tags(&req.resource_arn, |tags| {
            tags.retain(|t| {
                t.key
                    .as_deref()
                    .is_none_or(|key| !req.tag_keys.iter().any(|k| k == key))
            })
        })
        .await?;
        Ok(UntagResourceResponse {})
    }

    pub async fn list_tags_for_resource(
        &self,
        req: ListTagsForResourceRequest,
    ) -> Result<ListTagsForResourceResponse> {
        let tags = self.with_resource_tags(&req.resource_arn, |_| {}).await?;
        Ok(ListTagsForResourceResponse { tags })
    }
}

#[cfg(test)]
mod tests {
    use super::super::cluster::CreateClusterRequest;
    use super::super::test_support::api;
    use super::*;

    #[tokio::test]
    async fn tag_untag_list_round_trip_on_a_cluster() {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("prod".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        let resource_arn = "arn:aws:ecs:us-east-1:000000000000:cluster/prod".to_string();

        api.tag_resource(TagResourceRequest {
            resource_arn: resource_arn.clone(),
            tags: vec![
                Tag {
                    key: Some("env".to_string()),
                    value: Some("prod".to_string()),
                },
                Tag {
                    key: Some("team".to_string()),
                    value: Some("platform".to_string()),
                },
            ],
        })
        .await
        .unwrap();

        // Re-tagging a key overwrites its value.
        api.tag_resource(TagResourceRequest {
            resource_arn: resource_arn.clone(),
            tags: vec![Tag {
                key: Some("env".to_string()),
                value: Some("staging".to_string()),
            }],
        })
        .await
        .unwrap();

        let listed = api
            .list_tags_for_resource(ListTagsForResourceRequest {
                resource_arn: resource_arn.clone(),
            })
            .await
            .unwrap();
        assert_eq!(listed.tags.len(), 2);
        let env = listed.tags.iter().find(|t| t.key.as_deref() == Some("env"));
        assert_eq!(env.unwrap().value.as_deref(), Some("staging"));

        api.untag_resource(UntagResourceRequest {
            resource_arn: resource_arn.clone(),
            tag_keys: vec!["env".to_string()],
        })
        .await
        .unwrap();
        let listed = api
            .list_tags_for_resource(ListTagsForResourceRequest { resource_arn })
            .await
            .unwrap();
        assert_eq!(listed.tags.len(), 1);
        assert_eq!(listed.tags[0].key.as_deref(), Some("team"));
    }

    #[tokio::test]
    async fn unknown_resource_kinds_are_rejected() {
        let api = api().await;
        let err = api
            .list_tags_for_resource(ListTagsForResourceRequest {
                resource_arn: "arn:aws:ecs:us-east-1:000000000000:capacity-provider/x".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
