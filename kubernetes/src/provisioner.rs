//! Virtual-cluster lifecycle abstraction.
//!
//! One virtual Kubernetes cluster materializes each emulated cluster. The
//! k3d-backed implementation lives in [`crate::k3d`]; test mode swaps in
//! [`NoopProvisioner`], which short-circuits every operation and hands out a
//! mock API client.

use std::{collections::HashSet, path::PathBuf};

use async_trait::async_trait;
use kecs_common::{Error, Result};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub name: String,
    pub running: bool,
    pub server_count: u32,
    pub agent_count: u32,
}

#[async_trait]
pub trait ClusterProvisioner: Send + Sync {
    async fn create_cluster(&self, cancel: &CancellationToken, name: &str) -> Result<()>;
    async fn start_cluster(&self, cancel: &CancellationToken, name: &str) -> Result<()>;
    async fn stop_cluster(&self, name: &str) -> Result<()>;
    async fn delete_cluster(&self, name: &str) -> Result<()>;
    async fn cluster_exists(&self, name: &str) -> Result<bool>;
    async fn list_clusters(&self) -> Result<Vec<String>>;
    async fn is_cluster_running(&self, name: &str) -> Result<bool>;
    async fn get_kube_client(&self, name: &str) -> Result<kube::Client>;
    async fn get_kubeconfig(&self, name: &str) -> Result<PathBuf>;
    async fn wait_for_cluster_ready(&self, cancel: &CancellationToken, name: &str) -> Result<()>;
    async fn get_cluster_info(&self, name: &str) -> Result<ClusterInfo>;
}

/// Test-mode provisioner: records cluster names, creates nothing.
#[derive(Default)]
pub struct NoopProvisioner {
    clusters: Mutex<HashSet<String>>,
}

impl NoopProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every request is answered with an empty list body.
    /// Enough for code paths that enumerate resources during tests.
    fn mock_client() -> kube::Client {
        let service = tower::service_fn(|_req: http::Request<kube::client::Body>| async {
            let body = r#"{"apiVersion":"v1","kind":"List","items":[]}"#;
            Ok::<_, std::convert::Infallible>(
                http::Response::builder()
                    .status(200)
                    .header(http::header::CONTENT_TYPE, "application/json")
                    .body(kube::client::Body::from(body.as_bytes().to_vec()))
                    .expect("static response"),
            )
        });
        kube::Client::new(service, "default")
    }
}

#[async_trait]
impl ClusterProvisioner for NoopProvisioner {
    async fn create_cluster(&self, _cancel: &CancellationToken, name: &str) -> Result<()> {
        self.clusters.lock().insert(name.to_string());
        Ok(())
    }

    async fn start_cluster(&self, _cancel: &CancellationToken, name: &str) -> Result<()> {
        if !self.clusters.lock().contains(name) {
            return Err(Error::not_found("virtual cluster", name));
        }
        Ok(())
    }

    async fn stop_cluster(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        self.clusters.lock().remove(name);
        Ok(())
    }

    async fn cluster_exists(&self, name: &str) -> Result<bool> {
        Ok(self.clusters.lock().contains(name))
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.clusters.lock().iter().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn is_cluster_running(&self, name: &str) -> Result<bool> {
        Ok(self.clusters.lock().contains(name))
    }

    async fn get_kube_client(&self, _name: &str) -> Result<kube::Client> {
        Ok(Self::mock_client())
    }

    async fn get_kubeconfig(&self, name: &str) -> Result<PathBuf> {
        Ok(PathBuf::from(format!("/dev/null/{name}")))
    }

    async fn wait_for_cluster_ready(
        &self,
        _cancel: &CancellationToken,
        _name: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_cluster_info(&self, name: &str) -> Result<ClusterInfo> {
        Ok(ClusterInfo {
            name: name.to_string(),
            running: self.clusters.lock().contains(name),
            server_count: 1,
            agent_count: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_provisioner_tracks_names_only() {
        let p = NoopProvisioner::new();
        let cancel = CancellationToken::new();
        assert!(!p.cluster_exists("kecs-prod").await.unwrap());
        p.create_cluster(&cancel, "kecs-prod").await.unwrap();
        assert!(p.cluster_exists("kecs-prod").await.unwrap());
        assert!(p.is_cluster_running("kecs-prod").await.unwrap());
        assert_eq!(p.list_clusters().await.unwrap(), vec!["kecs-prod"]);
        p.wait_for_cluster_ready(&cancel, "kecs-prod").await.unwrap();
        p.delete_cluster("kecs-prod").await.unwrap();
        assert!(!p.cluster_exists("kecs-prod").await.unwrap());
    }

    #[tokio::test]
    async fn mock_client_lists_nothing() {
        use k8s_openapi::api::core::v1::Pod;
        use kube::Api;

        let p = NoopProvisioner::new();
        let client = p.get_kube_client("kecs-prod").await.unwrap();
        let pods: Api<Pod> = Api::namespaced(client, "default");
        let listed = pods.list(&Default::default()).await.unwrap();
        assert!(listed.items.is_empty());
    }
}
