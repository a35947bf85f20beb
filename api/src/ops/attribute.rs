use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::Attribute;
use serde::{Deserialize, Serialize};

use super::EcsApi;
use crate::arn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttribute {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutAttributesRequest {
    pub attributes: Vec<WireAttribute>,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAttributesRequest {
    pub attributes: Vec<WireAttribute>,
    #[serde(default)]
    pub cluster: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListAttributesRequest {
    pub target_type: Option<String>,
    pub cluster: Option<String>,
    pub attribute_name: Option<String>,
    pub attribute_value: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributesResponse {
    pub attributes: Vec<WireAttribute>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAttributesResponse {
    pub attributes: Vec<WireAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

fn to_wire(a: &Attribute) -> WireAttribute {
    WireAttribute {
        name: a.name.clone(),
        value: a.value.clone(),
        target_type: Some(a.target_type.clone()),
        target_id: Some(a.target_id.clone()),
    }
}

impl EcsApi {
    pub async fn put_attributes(&self, req: PutAttributesRequest) -> Result<AttributesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let now = Utc::now();
        let mut applied = Vec::new();
        for wire in &req.attributes {
            let target_id = wire
                .target_id
                .as_deref()
                .ok_or_else(|| Error::invalid_input("attribute targetId is required"))?;
            let attribute = Attribute {
                id: uuid::Uuid::new_v4().to_string(),
                name: wire.name.clone(),
                value: wire.value.clone(),
                target_type: wire
                    .target_type
                    .clone()
                    .unwrap_or_else(|| "container-instance".to_string()),
                target_id: arn::short_name(target_id).to_string(),
                cluster_arn: cluster.arn.clone(),
                region: self.region.clone(),
                account_id: self.account_id.clone(),
                created_at: now,
                updated_at: now,
            };
            self.storage.attributes().put(&attribute).await?;
            applied.push(to_wire(&attribute));
        }
        Ok(AttributesResponse {
            attributes: applied,
        })
    }

    pub async fn delete_attributes(
        &self,
        req: DeleteAttributesRequest,
    ) -> Result<AttributesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let mut deleted = Vec::new();
        for wire in &req.attributes {
            let target_id = wire
                .target_id
                .as_deref()
                .ok_or_else(|| Error::invalid_input("attribute targetId is required"))?;
            let target_type = wire.target_type.as_deref().unwrap_or("container-instance");
            self.storage
                .attributes()
                .delete(
                    &cluster.arn,
                    &wire.name,
                    target_type,
                    arn::short_name(target_id),
                )
                .await?;
            deleted.push(wire.clone());
        }
        Ok(AttributesResponse { attributes: deleted })
    }

    pub async fn list_attributes(
        &self,
        req: ListAttributesRequest,
    ) -> Result<ListAttributesResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let (attributes, next_token) = self
            .storage
            .attributes()
            .list(
                &cluster.arn,
                req.target_type.as_deref(),
                req.attribute_name.as_deref(),
                limit,
                req.next_token.as_deref(),
            )
            .await?;
        let attributes = attributes
            .iter()
            .filter(|a| {
                req.attribute_value
                    .as_deref()
                    .is_none_or(|v| a.value.as_deref() == Some(v))
            })
            .map(to_wire)
            .collect();
        Ok(ListAttributesResponse {
            attributes,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::cluster::CreateClusterRequest;
    use super::super::test_support::api;
    use super::*;

    #[tokio::test]
    async fn put_list_delete_attributes_round_trip() {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("prod".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

        let attribute = WireAttribute {
            name: "ecs.availability-zone".to_string(),
            value: Some("us-east-1a".to_string()),
            target_type: Some("container-instance".to_string()),
            target_id: Some("i-12345".to_string()),
        };
        api.put_attributes(PutAttributesRequest {
            attributes: vec![attribute.clone()],
            cluster: Some("prod".to_string()),
        })
        .await
        .unwrap();

        let listed = api
            .list_attributes(ListAttributesRequest {
                cluster: Some("prod".to_string()),
                target_type: Some("container-instance".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.attributes.len(), 1);
        assert_eq!(listed.attributes[0].value.as_deref(), Some("us-east-1a"));

        // Value filter drops non-matching attributes.
        let filtered = api
            .list_attributes(ListAttributesRequest {
                cluster: Some("prod".to_string()),
                attribute_value: Some("us-east-1b".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(filtered.attributes.is_empty());

        api.delete_attributes(DeleteAttributesRequest {
            attributes: vec![attribute],
            cluster: Some("prod".to_string()),
        })
        .await
        .unwrap();
        let listed = api
            .list_attributes(ListAttributesRequest {
                cluster: Some("prod".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(listed.attributes.is_empty());
    }
}
