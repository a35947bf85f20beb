//! Per-cluster namespaces and replication of centrally-held secrets and
//! config maps.
//!
//! A well-known system namespace holds objects that user workloads may
//! reference. On demand they are copied into the target namespace with
//! bookkeeping labels and annotations; a periodic sweep removes copies whose
//! source has disappeared.

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kecs_common::{Error, Result, SYSTEM_NAMESPACE, annotations, labels};
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ListParams, PostParams},
};

pub struct Replicator {
    client: Client,
}

impl Replicator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create the namespace backing an emulated cluster. Already existing is
    /// fine; namespaces are recreated on demand.
    pub async fn ensure_namespace(&self, name: &str, region: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    labels::MANAGED_BY.to_string(),
                    labels::MANAGED_BY_VALUE.to_string(),
                )])),
                annotations: Some(BTreeMap::from([(
                    annotations::REGION.to_string(),
                    region.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = Error::from(err);
                if err.is_already_exists() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = Error::from(err);
                if err.is_not_found() { Ok(()) } else { Err(err) }
            }
        }
    }

    /// Copy a secret from the system namespace into `target_namespace`,
    /// updating the copy in place when it already exists.
    pub async fn replicate_secret(&self, name: &str, target_namespace: &str) -> Result<()> {
        let source_api: Api<Secret> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let source = source_api.get(name).await.map_err(Error::from)?;

        let mut copy = Secret {
            metadata: replicated_metadata(&source.metadata, name, target_namespace),
            data: source.data.clone(),
            string_data: source.string_data.clone(),
            type_: source.type_.clone(),
            ..Default::default()
        };
        let target_api: Api<Secret> = Api::namespaced(self.client.clone(), target_namespace);
        match target_api.create(&PostParams::default(), &copy).await {
            Ok(_) => Ok(()),
            Err(err) if is_conflict(&err) => {
                let existing = target_api.get(name).await.map_err(Error::from)?;
                copy.metadata.resource_version = existing.resource_version();
                target_api
                    .replace(name, &PostParams::default(), &copy)
                    .await
                    .map_err(Error::from)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Copy a config map from the system namespace into `target_namespace`,
    /// updating the copy in place when it already exists.
    pub async fn replicate_config_map(&self, name: &str, target_namespace: &str) -> Result<()> {
        let source_api: Api<ConfigMap> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let source = source_api.get(name).await.map_err(Error::from)?;

        let mut copy = ConfigMap {
            metadata: replicated_metadata(&source.metadata, name, target_namespace),
            data: source.data.clone(),
            binary_data: source.binary_data.clone(),
            ..Default::default()
        };
        let target_api: Api<ConfigMap> = Api::namespaced(self.client.clone(), target_namespace);
        match target_api.create(&PostParams::default(), &copy).await {
            Ok(_) => Ok(()),
            Err(err) if is_conflict(&err) => {
                let existing = target_api.get(name).await.map_err(Error::from)?;
                copy.metadata.resource_version = existing.resource_version();
                target_api
                    .replace(name, &PostParams::default(), &copy)
                    .await
                    .map_err(Error::from)?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Delete replicated objects in `namespaces` whose source no longer
    /// exists in the system namespace. Returns how many were removed.
    pub async fn cleanup_orphans(&self, namespaces: &[String]) -> Result<u64> {
        let selector = format!(
            "{}={},{}={}",
            labels::MANAGED_BY,
            labels::MANAGED_BY_VALUE,
            labels::REPLICATED_FROM,
            labels::REPLICATED_FROM_VALUE,
        );
        let params = ListParams::default().labels(&selector);
        let mut removed = 0;

        let source_secrets: Api<Secret> = Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);
        let source_config_maps: Api<ConfigMap> =
            Api::namespaced(self.client.clone(), SYSTEM_NAMESPACE);

        for namespace in namespaces {
            let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
            for secret in secrets.list(&params).await.map_err(Error::from)?.items {
                let name = secret.name_any();
                if is_absent(source_secrets.get_opt(&name).await)? {
                    secrets
                        .delete(&name, &DeleteParams::default())
                        .await
                        .map_err(Error::from)?;
                    tracing::info!(%namespace, secret = %name, "removed orphaned replica");
                    removed += 1;
                }
            }

            let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
            for config_map in config_maps.list(&params).await.map_err(Error::from)?.items {
                let name = config_map.name_any();
                if is_absent(source_config_maps.get_opt(&name).await)? {
                    config_maps
                        .delete(&name, &DeleteParams::default())
                        .await
                        .map_err(Error::from)?;
                    tracing::info!(%namespace, config_map = %name, "removed orphaned replica");
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

fn is_absent<T>(result: std::result::Result<Option<T>, kube::Error>) -> Result<bool> {
    match result {
        Ok(Some(_)) => Ok(false),
        Ok(None) => Ok(true),
        Err(err) => Err(err.into()),
    }
}

/// Metadata for a replicated copy: bookkeeping labels, a replication
/// timestamp, and any source annotations under the emulator prefix.
fn replicated_metadata(source: &ObjectMeta, name: &str, target_namespace: &str) -> ObjectMeta {
    let mut object_labels = BTreeMap::from([
        (
            labels::MANAGED_BY.to_string(),
            labels::MANAGED_BY_VALUE.to_string(),
        ),
        (
            labels::REPLICATED_FROM.to_string(),
            labels::REPLICATED_FROM_VALUE.to_string(),
        ),
    ]);
    if let Some(source_label) = source
        .labels
        .as_ref()
        .and_then(|l| l.get(labels::SOURCE))
    {
        object_labels.insert(labels::SOURCE.to_string(), source_label.clone());
    }

    let mut object_annotations = BTreeMap::from([
        (
            annotations::LAST_REPLICATED.to_string(),
            Utc::now().to_rfc3339(),
        ),
        (
            annotations::SOURCE_NAMESPACE.to_string(),
            SYSTEM_NAMESPACE.to_string(),
        ),
    ]);
    if let Some(source_annotations) = source.annotations.as_ref() {
        for (key, value) in source_annotations {
            if key.starts_with(annotations::PREFIX) {
                object_annotations.insert(key.clone(), value.clone());
            }
        }
    }

    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(target_namespace.to_string()),
        labels: Some(object_labels),
        annotations: Some(object_annotations),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replicated_metadata_carries_bookkeeping() {
        let source = ObjectMeta {
            name: Some("db-credentials".to_string()),
            namespace: Some(SYSTEM_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                labels::SOURCE.to_string(),
                "vault".to_string(),
            )])),
            annotations: Some(BTreeMap::from([
                ("kecs.dev/owner".to_string(), "platform".to_string()),
                ("unrelated/annotation".to_string(), "dropped".to_string()),
            ])),
            ..Default::default()
        };
        let meta = replicated_metadata(&source, "db-credentials", "prod");
        assert_eq!(meta.namespace.as_deref(), Some("prod"));
        let object_labels = meta.labels.unwrap();
        assert_eq!(
            object_labels.get(labels::MANAGED_BY).map(String::as_str),
            Some(labels::MANAGED_BY_VALUE)
        );
        assert_eq!(
            object_labels.get(labels::REPLICATED_FROM).map(String::as_str),
            Some(labels::REPLICATED_FROM_VALUE)
        );
        assert_eq!(
            object_labels.get(labels::SOURCE).map(String::as_str),
            Some("vault")
        );
        let object_annotations = meta.annotations.unwrap();
        assert!(object_annotations.contains_key(annotations::LAST_REPLICATED));
        assert_eq!(
            object_annotations
                .get(annotations::SOURCE_NAMESPACE)
                .map(String::as_str),
            Some(SYSTEM_NAMESPACE)
        );
        assert_eq!(
            object_annotations.get("kecs.dev/owner").map(String::as_str),
            Some("platform")
        );
        assert!(!object_annotations.contains_key("unrelated/annotation"));
    }
}
