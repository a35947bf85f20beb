use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct StorageArgs {
    /// Storage backend: "embedded" (file-backed SQLite) or "networked" (PostgreSQL)
    #[arg(long, env = "KECS_STORAGE_TYPE", default_value = "embedded")]
    pub storage_type: String,

    /// Connection URL for the networked backend, e.g. postgres://kecs@localhost/kecs
    #[arg(long, env = "KECS_STORAGE_URL")]
    pub storage_url: Option<String>,

    /// Database file path for the embedded backend
    #[arg(long, env = "KECS_STORAGE_PATH", default_value = ".kecs/kecs.db")]
    pub storage_path: String,

    /// Disable the write-through cache in front of hot sub-stores
    #[arg(long, env = "KECS_CACHE_DISABLED", default_value_t = false)]
    pub cache_disabled: bool,

    /// Maximum number of entries held by the cache before LRU eviction
    #[arg(long, env = "KECS_CACHE_MAX_SIZE", default_value_t = 10_000)]
    pub cache_max_size: usize,
}

impl StorageArgs {
    pub fn is_networked(&self) -> bool {
        self.storage_type == "networked"
    }
}

#[derive(Parser, Debug, Clone)]
pub struct KubernetesArgs {
    /// Use the single-node optimized cluster creation path (~30s target)
    #[arg(long, env = "KECS_K3D_OPTIMIZED", default_value_t = false)]
    pub k3d_optimized: bool,

    /// Do not wait for server readiness during cluster create
    #[arg(long, env = "KECS_K3D_ASYNC", default_value_t = false)]
    pub k3d_async: bool,

    /// Disable in-cluster DNS for faster startup
    #[arg(long, env = "KECS_DISABLE_COREDNS", default_value_t = false)]
    pub disable_coredns: bool,

    /// Directory where kubeconfigs for virtual clusters are written
    #[arg(long, env = "KECS_KUBECONFIG_DIR", default_value = ".kecs/kubeconfig")]
    pub kubeconfig_dir: String,
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureArgs {
    /// Short-circuit all cluster provisioning (no real infrastructure is created)
    #[arg(long, env = "KECS_TEST_MODE", default_value_t = false)]
    pub test_mode: bool,

    /// The emulator itself runs inside a container; use container-to-container kubeconfigs
    #[arg(long, env = "KECS_CONTAINER_MODE", default_value_t = false)]
    pub container_mode: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct DockerArgs {
    /// Shared container network joining the emulator and virtual clusters
    #[arg(long, env = "KECS_DOCKER_NETWORK", default_value = "kecs-network")]
    pub docker_network: String,
}

#[derive(Parser, Debug, Clone)]
pub struct WebhookArgs {
    #[arg(long, env = "KECS_WEBHOOK_BIND", default_value = "0.0.0.0")]
    pub webhook_bind: String,

    #[arg(long, env = "KECS_WEBHOOK_PORT", default_value_t = 8443)]
    pub webhook_port: u16,

    /// PEM certificate chain for TLS termination
    #[arg(long, env = "KECS_WEBHOOK_TLS_CERT")]
    pub webhook_tls_cert: Option<String>,

    /// PEM private key for TLS termination
    #[arg(long, env = "KECS_WEBHOOK_TLS_KEY")]
    pub webhook_tls_key: Option<String>,
}
