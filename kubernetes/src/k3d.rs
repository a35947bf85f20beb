//! k3d-backed cluster provisioner.
//!
//! Shells out to the `k3d` binary for cluster lifecycle and to `docker` for
//! node-level fixups, then talks to the resulting API server through `kube`.
//! Two creation paths exist: the standard one (load-balancer node, full
//! component set) and an optimized single-node path that disables everything
//! not needed for scheduling pods.

use std::{path::PathBuf, process::Stdio, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kecs_common::{Error, Result, args::KubernetesArgs};
use kube::{
    Api,
    api::{DeleteParams, ListParams, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::provisioner::{ClusterInfo, ClusterProvisioner};

const READY_TIMEOUT: Duration = Duration::from_secs(120);
const READY_TIMEOUT_OPTIMIZED: Duration = Duration::from_secs(20);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Stderr marker of the k3d host-record injection failure seen after a docker
/// restart. Recoverable by recreating the cluster; volumes configured on the
/// manager survive.
const DNS_FIX_ERROR: &str = "host.k3d.internal";

pub struct K3dProvisioner {
    optimized: bool,
    async_create: bool,
    disable_coredns: bool,
    kubeconfig_dir: PathBuf,
    container_mode: bool,
    docker_network: String,
    /// Optional `host:port` of an internal image registry wired into every
    /// created cluster.
    registry: Option<String>,
}

impl K3dProvisioner {
    pub fn new(
        kubernetes: &KubernetesArgs,
        container_mode: bool,
        docker_network: String,
        registry: Option<String>,
    ) -> Self {
        Self {
            optimized: kubernetes.k3d_optimized,
            async_create: kubernetes.k3d_async,
            disable_coredns: kubernetes.disable_coredns,
            kubeconfig_dir: PathBuf::from(&kubernetes.kubeconfig_dir),
            container_mode,
            docker_network,
            registry,
        }
    }

    fn kubeconfig_path(&self, name: &str) -> PathBuf {
        self.kubeconfig_dir.join(format!("{name}.yaml"))
    }

    fn internal_kubeconfig_path(&self, name: &str) -> PathBuf {
        self.kubeconfig_dir.join(format!("{name}.internal.yaml"))
    }

    async fn run(program: &str, args: &[&str]) -> Result<String> {
        tracing::debug!(program, ?args, "running provisioning command");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to spawn {program}"))
            .map_err(Error::Internal)?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(Error::Retryable(anyhow::anyhow!(
                "{program} {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(stdout)
    }

    async fn run_k3d(args: &[&str]) -> Result<String> {
        Self::run("k3d", args).await
    }

    /// Fetch the kubeconfig from k3d and write both variants: the host one
    /// verbatim, and (in container mode) an internal one whose server address
    /// is the server container on the shared network.
    async fn write_kubeconfigs(&self, name: &str) -> Result<()> {
        std::fs::create_dir_all(&self.kubeconfig_dir)
            .with_context(|| format!("failed to create {}", self.kubeconfig_dir.display()))
            .map_err(Error::Internal)?;
        let raw = Self::run_k3d(&["kubeconfig", "get", name]).await?;
        std::fs::write(self.kubeconfig_path(name), &raw)
            .context("failed to write kubeconfig")
            .map_err(Error::Internal)?;

        if self.container_mode {
            let mut kubeconfig: Kubeconfig = serde_yaml::from_str(&raw)
                .context("failed to parse kubeconfig")
                .map_err(Error::Internal)?;
            for named in &mut kubeconfig.clusters {
                if let Some(cluster) = named.cluster.as_mut() {
                    cluster.server = Some(format!("https://k3d-{name}-server-0:6443"));
                }
            }
            let rewritten = serde_yaml::to_string(&kubeconfig)
                .context("failed to serialize kubeconfig")
                .map_err(Error::Internal)?;
            std::fs::write(self.internal_kubeconfig_path(name), rewritten)
                .context("failed to write internal kubeconfig")
                .map_err(Error::Internal)?;
        }
        Ok(())
    }

    async fn client_from_kubeconfig(&self, name: &str) -> Result<kube::Client> {
        let path = if self.container_mode {
            self.internal_kubeconfig_path(name)
        } else {
            self.kubeconfig_path(name)
        };
        let kubeconfig = Kubeconfig::read_from(&path)
            .with_context(|| format!("failed to read kubeconfig {}", path.display()))
            .map_err(Error::Internal)?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("failed to build kube config")
            .map_err(Error::Internal)?;
        kube::Client::try_from(config)
            .context("failed to build kube client")
            .map_err(Error::Internal)
    }

    async fn cluster_rows(&self) -> Result<Vec<serde_json::Value>> {
        let raw = Self::run_k3d(&["cluster", "list", "-o", "json"]).await?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&raw)
            .context("failed to parse k3d cluster list")
            .map_err(Error::Internal)?;
        Ok(rows)
    }

    /// Point in-cluster DNS and every node at the internal registry:
    /// append the registry host to the CoreDNS NodeHosts map, bounce CoreDNS,
    /// and append an /etc/hosts entry on each node container.
    async fn wire_registry(&self, name: &str, registry: &str) -> Result<()> {
        let (host, _port) = registry.split_once(':').unwrap_or((registry, ""));
        let client = self.client_from_kubeconfig(name).await?;

        if !self.disable_coredns {
            let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), "kube-system");
            let coredns = config_maps.get("coredns").await?;
            let mut node_hosts = coredns
                .data
                .as_ref()
                .and_then(|d| d.get("NodeHosts").cloned())
                .unwrap_or_default();
            if !node_hosts.contains(host) {
                node_hosts.push_str(&format!("\n127.0.0.1 {host}\n"));
                let patch = serde_json::json!({"data": {"NodeHosts": node_hosts}});
                config_maps
                    .patch("coredns", &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                // CoreDNS reloads NodeHosts only on restart.
                let pods: Api<Pod> = Api::namespaced(client, "kube-system");
                pods.delete_collection(
                    &DeleteParams::default(),
                    &ListParams::default().labels("k8s-app=kube-dns"),
                )
                .await?;
            }
        }

        let nodes = Self::run_k3d(&["node", "list", "-o", "json"]).await?;
        let rows: Vec<serde_json::Value> = serde_json::from_str(&nodes)
            .context("failed to parse k3d node list")
            .map_err(Error::Internal)?;
        for row in rows {
            let node_name = row.get("name").and_then(|n| n.as_str()).unwrap_or_default();
            if !node_name.contains(&format!("k3d-{name}-")) {
                continue;
            }
            Self::run(
                "docker",
                &[
                    "exec",
                    node_name,
                    "sh",
                    "-c",
                    &format!("grep -q '{host}' /etc/hosts || echo '127.0.0.1 {host}' >> /etc/hosts"),
                ],
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterProvisioner for K3dProvisioner {
    async fn create_cluster(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        let mut args: Vec<String> = vec![
            "cluster".into(),
            "create".into(),
            name.into(),
            "--kubeconfig-update-default=false".into(),
            "--kubeconfig-switch-context=false".into(),
            "--network".into(),
            self.docker_network.clone(),
            "--servers".into(),
            "1".into(),
        ];
        if self.optimized {
            // Single node, nothing that is not needed to schedule pods.
            args.push("--no-lb".into());
            for component in ["traefik", "servicelb", "metrics-server"] {
                args.push("--k3s-arg".into());
                args.push(format!("--disable={component}@server:0"));
            }
        }
        if self.disable_coredns {
            args.push("--k3s-arg".into());
            args.push("--disable=coredns@server:0".into());
        }
        if let Some(ref registry) = self.registry {
            args.push("--registry-use".into());
            args.push(registry.clone());
        }
        if self.async_create {
            args.push("--wait=false".into());
        } else {
            args.push("--wait".into());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Self::run_k3d(&arg_refs).await?;

        self.write_kubeconfigs(name).await?;
        if !self.async_create {
            self.wait_for_cluster_ready(cancel, name).await?;
        }
        if let Some(ref registry) = self.registry {
            if let Err(err) = self.wire_registry(name, registry).await {
                tracing::warn!(cluster = name, error = %err, "registry wiring failed");
            }
        }
        Ok(())
    }

    async fn start_cluster(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        match Self::run_k3d(&["cluster", "start", name]).await {
            Ok(_) => {
                self.write_kubeconfigs(name).await?;
                self.wait_for_cluster_ready(cancel, name).await
            }
            Err(err) if err.to_string().contains(DNS_FIX_ERROR) => {
                tracing::warn!(
                    cluster = name,
                    "start hit the host-record injection failure, recreating cluster"
                );
                self.delete_cluster(name).await?;
                self.create_cluster(cancel, name).await
            }
            Err(err) => Err(err),
        }
    }

    async fn stop_cluster(&self, name: &str) -> Result<()> {
        Self::run_k3d(&["cluster", "stop", name]).await?;
        Ok(())
    }

    async fn delete_cluster(&self, name: &str) -> Result<()> {
        Self::run_k3d(&["cluster", "delete", name]).await?;
        for path in [self.kubeconfig_path(name), self.internal_kubeconfig_path(name)] {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "failed to remove kubeconfig");
                }
            }
        }
        Ok(())
    }

    async fn cluster_exists(&self, name: &str) -> Result<bool> {
        let rows = self.cluster_rows().await?;
        Ok(rows
            .iter()
            .any(|row| row.get("name").and_then(|n| n.as_str()) == Some(name)))
    }

    async fn list_clusters(&self) -> Result<Vec<String>> {
        let rows = self.cluster_rows().await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn is_cluster_running(&self, name: &str) -> Result<bool> {
        let rows = self.cluster_rows().await?;
        Ok(rows.iter().any(|row| {
            row.get("name").and_then(|n| n.as_str()) == Some(name)
                && row
                    .get("serversRunning")
                    .and_then(serde_json::Value::as_i64)
                    .unwrap_or(0)
                    > 0
        }))
    }

    async fn get_kube_client(&self, name: &str) -> Result<kube::Client> {
        self.client_from_kubeconfig(name).await
    }

    async fn get_kubeconfig(&self, name: &str) -> Result<PathBuf> {
        let path = self.kubeconfig_path(name);
        if !path.exists() {
            self.write_kubeconfigs(name).await?;
        }
        Ok(path)
    }

    async fn wait_for_cluster_ready(&self, cancel: &CancellationToken, name: &str) -> Result<()> {
        let timeout = if self.optimized {
            READY_TIMEOUT_OPTIMIZED
        } else {
            READY_TIMEOUT
        };
        let deadline = tokio::time::Instant::now() + timeout;
        let client = self.client_from_kubeconfig(name).await?;
        let nodes: Api<Node> = Api::all(client);
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Internal(anyhow::anyhow!(
                    "cancelled while waiting for cluster {name}"
                )));
            }
            match nodes.list(&ListParams::default()).await {
                Ok(list) => {
                    let ready = list.items.iter().any(|node| {
                        node.status
                            .as_ref()
                            .and_then(|s| s.conditions.as_ref())
                            .is_some_and(|conditions| {
                                conditions
                                    .iter()
                                    .any(|c| c.type_ == "Ready" && c.status == "True")
                            })
                    });
                    if ready {
                        return Ok(());
                    }
                }
                Err(err) => {
                    tracing::debug!(cluster = name, error = %err, "readiness poll failed")
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Retryable(anyhow::anyhow!(
                    "cluster {name} not ready within {timeout:?}"
                )));
            }
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
            }
        }
    }

    async fn get_cluster_info(&self, name: &str) -> Result<ClusterInfo> {
        let rows = self.cluster_rows().await?;
        let row = rows
            .iter()
            .find(|row| row.get("name").and_then(|n| n.as_str()) == Some(name))
            .ok_or_else(|| Error::not_found("virtual cluster", name))?;
        let count = |key: &str| {
            row.get(key)
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0) as u32
        };
        Ok(ClusterInfo {
            name: name.to_string(),
            running: count("serversRunning") > 0,
            server_count: count("serversCount"),
            agent_count: count("agentsCount"),
        })
    }
}
