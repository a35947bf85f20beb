//! Stateless operation handlers.
//!
//! Every operation validates its request, consults storage, possibly
//! enqueues asynchronous provisioning work, and assembles the wire-shaped
//! response. Handlers are grouped by resource.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kecs_common::{DEFAULT_ACCOUNT_ID, DEFAULT_REGION, Error, Result};
use kecs_kubernetes::ClusterManager;
use kecs_storage::{Storage, models::Cluster, models::TaskDefinition};
use serde::{Deserialize, Serialize};

use crate::arn::{self, ArnBuilder};

pub mod account_setting;
pub mod attribute;
pub mod cluster;
pub mod container_instance;
pub mod elbv2;
pub mod service;
pub mod tag;
pub mod task;
pub mod task_definition;
pub mod task_set;

pub struct EcsApi {
    storage: Arc<dyn Storage>,
    cluster_manager: Arc<ClusterManager>,
    arn: ArnBuilder,
    region: String,
    account_id: String,
}

impl EcsApi {
    pub fn new(storage: Arc<dyn Storage>, cluster_manager: Arc<ClusterManager>) -> Self {
        Self {
            storage,
            cluster_manager,
            arn: ArnBuilder::new(DEFAULT_REGION, DEFAULT_ACCOUNT_ID),
            region: DEFAULT_REGION.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Resolve a cluster reference (short name, ARN, or absent meaning
    /// `default`) to its stored row.
    pub(crate) async fn resolve_cluster(&self, reference: Option<&str>) -> Result<Cluster> {
        let name = arn::short_name(reference.unwrap_or("default"));
        self.storage
            .clusters()
            .get(name)
            .await?
            .ok_or_else(|| Error::not_found("cluster", name))
    }

    /// Resolve a task definition reference: full ARN, `family:revision`, or
    /// bare family (latest ACTIVE revision).
    pub(crate) async fn resolve_task_definition(&self, reference: &str) -> Result<TaskDefinition> {
        if arn::is_arn(reference) {
            return self
                .storage
                .task_definitions()
                .get_by_arn(reference)
                .await?
                .ok_or_else(|| Error::not_found("task definition", reference));
        }
        let (family, revision) = arn::split_family_revision(reference)?;
        let found = match revision {
            Some(revision) => self.storage.task_definitions().get(family, revision).await?,
            None => self.storage.task_definitions().get_latest(family).await?,
        };
        found.ok_or_else(|| Error::not_found("task definition", reference))
    }
}

/// AWS JSON 1.1 timestamps are epoch seconds with fractional millis.
pub(crate) fn epoch(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

pub(crate) fn epoch_opt(ts: Option<DateTime<Utc>>) -> Option<f64> {
    ts.map(epoch)
}

/// Serialize an optional nested document to its column representation,
/// keeping absent distinct from present.
pub(crate) fn to_column(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

/// Parse a JSON column back into the wire document. Unparsable columns are
/// reported as absent rather than failing the whole response.
pub(crate) fn from_column(column: &Option<String>) -> Option<serde_json::Value> {
    column.as_ref().and_then(|raw| serde_json::from_str(raw).ok())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Per-item failure entry of bulk reads; bulk reads never fail wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    pub fn missing(arn: impl Into<String>) -> Self {
        Self {
            arn: Some(arn.into()),
            reason: Some("MISSING".to_string()),
            detail: None,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use kecs_kubernetes::{NoopProvisioner, OperationQueue};
    use kecs_storage::sqlite::SqliteStorage;
    use tokio_util::sync::CancellationToken;

    use super::*;

    pub async fn api() -> EcsApi {
        let storage: Arc<dyn Storage> =
            Arc::new(SqliteStorage::connect_in_memory().await.unwrap());
        let manager = Arc::new(ClusterManager::new(
            Arc::new(NoopProvisioner::new()),
            OperationQueue::new(CancellationToken::new()),
            DEFAULT_REGION.to_string(),
        ));
        EcsApi::new(storage, manager)
    }
}
