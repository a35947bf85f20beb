//! Kubernetes provisioning subsystem: virtual-cluster lifecycle, the async
//! operation queue, namespace/secret replication, and pod log collection.

use std::sync::Arc;

use kecs_common::{
    Result,
    args::{DockerArgs, FeatureArgs, KubernetesArgs},
    virtual_cluster_name,
};
use tokio_util::sync::CancellationToken;

pub mod k3d;
pub mod logs;
pub mod provisioner;
pub mod queue;
pub mod replicator;

pub use k3d::K3dProvisioner;
pub use logs::LogCollector;
pub use provisioner::{ClusterInfo, ClusterProvisioner, NoopProvisioner};
pub use queue::{OperationKind, OperationOutcome, OperationQueue};
pub use replicator::Replicator;

/// Bundles the provisioner and the operation queue behind the two entry
/// points the control plane uses: ensure a cluster exists, tear one down.
/// Both are fire-and-forget; failures surface in logs and through the
/// returned operation id.
pub struct ClusterManager {
    provisioner: Arc<dyn ClusterProvisioner>,
    queue: OperationQueue,
    region: String,
}

impl ClusterManager {
    pub fn new(
        provisioner: Arc<dyn ClusterProvisioner>,
        queue: OperationQueue,
        region: String,
    ) -> Self {
        Self {
            provisioner,
            queue,
            region,
        }
    }

    /// Build the provisioner selected by configuration. Test mode gets the
    /// short-circuit implementation.
    pub fn from_args(
        kubernetes: &KubernetesArgs,
        features: &FeatureArgs,
        docker: &DockerArgs,
        region: String,
        cancel: CancellationToken,
    ) -> Self {
        let provisioner: Arc<dyn ClusterProvisioner> = if features.test_mode {
            Arc::new(NoopProvisioner::new())
        } else {
            Arc::new(K3dProvisioner::new(
                kubernetes,
                features.container_mode,
                docker.docker_network.clone(),
                None,
            ))
        };
        Self::new(provisioner, OperationQueue::new(cancel), region)
    }

    pub fn provisioner(&self) -> &Arc<dyn ClusterProvisioner> {
        &self.provisioner
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Asynchronously make sure the virtual cluster and the per-cluster
    /// namespace behind `cluster_name` exist. Returns the operation id.
    pub fn ensure_cluster(&self, cluster_name: &str) -> String {
        let vc_name = virtual_cluster_name(cluster_name);
        let provisioner = self.provisioner.clone();
        let namespace = cluster_name.to_string();
        let region = self.region.clone();
        let cancel = CancellationToken::new();
        let target = vc_name.clone();
        self.queue.submit(
            OperationKind::ClusterCreate,
            &target,
            async move {
                if !provisioner.cluster_exists(&vc_name).await? {
                    provisioner.create_cluster(&cancel, &vc_name).await?;
                } else if !provisioner.is_cluster_running(&vc_name).await? {
                    provisioner.start_cluster(&cancel, &vc_name).await?;
                }
                provisioner.wait_for_cluster_ready(&cancel, &vc_name).await?;
                let client = provisioner.get_kube_client(&vc_name).await?;
                Replicator::new(client)
                    .ensure_namespace(&namespace, &region)
                    .await
            },
            Box::new(|outcome| {
                if !outcome.is_completed() {
                    tracing::warn!(?outcome, "cluster provisioning did not complete");
                }
            }),
        )
    }

    /// Asynchronously delete the per-cluster namespace and the virtual
    /// cluster behind `cluster_name`. Returns the operation id.
    pub fn teardown_cluster(&self, cluster_name: &str) -> String {
        let vc_name = virtual_cluster_name(cluster_name);
        let provisioner = self.provisioner.clone();
        let namespace = cluster_name.to_string();
        let target = vc_name.clone();
        self.queue.submit(
            OperationKind::ClusterDelete,
            &target,
            async move {
                if provisioner.cluster_exists(&vc_name).await? {
                    if let Ok(client) = provisioner.get_kube_client(&vc_name).await {
                        if let Err(err) = Replicator::new(client).delete_namespace(&namespace).await
                        {
                            tracing::warn!(%namespace, error = %err, "namespace deletion failed");
                        }
                    }
                    provisioner.delete_cluster(&vc_name).await?;
                }
                Ok(())
            },
            Box::new(|outcome| {
                if !outcome.is_completed() {
                    tracing::warn!(?outcome, "cluster teardown did not complete");
                }
            }),
        )
    }

    /// Drain the queue on shutdown.
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ClusterManager {
        ClusterManager::new(
            Arc::new(NoopProvisioner::new()),
            OperationQueue::new(CancellationToken::new()),
            "us-east-1".to_string(),
        )
    }

    #[tokio::test]
    async fn ensure_then_teardown_round_trip() {
        let manager = manager();
        let op = manager.ensure_cluster("prod");
        assert!(!op.is_empty());
        manager.queue().shutdown().await;
        assert!(
            manager
                .provisioner()
                .cluster_exists("kecs-prod")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_ensures_share_one_operation() {
        let manager = manager();
        let first = manager.ensure_cluster("prod");
        let second = manager.ensure_cluster("prod");
        // Either the ids match (coalesced) or the first finished already and
        // a fresh operation started; both ids must be non-empty.
        assert!(!first.is_empty());
        assert!(!second.is_empty());
        manager.queue().shutdown().await;
    }
}
