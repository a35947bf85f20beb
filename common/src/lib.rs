pub mod args;
pub mod error;
pub mod shutdown;

pub use error::{Error, Result, retry_with_backoff};

/// Region and account stamped into every generated ARN.
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ACCOUNT_ID: &str = "000000000000";

/// Namespace in the virtual cluster that holds centrally-managed secrets and
/// config maps, replicated on demand into per-cluster namespaces.
pub const SYSTEM_NAMESPACE: &str = "kecs-system";

/// Every emulated cluster is backed by a virtual cluster named
/// `kecs-<cluster-name>`.
pub const VIRTUAL_CLUSTER_PREFIX: &str = "kecs-";

pub mod labels {
    pub const MANAGED_BY: &str = "kecs.dev/managed-by";
    pub const MANAGED_BY_VALUE: &str = "kecs";
    pub const TASK_ID: &str = "kecs.dev/task-id";
    pub const SERVICE: &str = "kecs.dev/service";
    pub const CLUSTER: &str = "kecs.dev/cluster";
    pub const REPLICATED_FROM: &str = "kecs.dev/replicated-from";
    pub const REPLICATED_FROM_VALUE: &str = "system";
    pub const SOURCE: &str = "kecs.dev/source";
}

pub mod annotations {
    pub const LAST_REPLICATED: &str = "kecs.dev/last-replicated";
    pub const SOURCE_NAMESPACE: &str = "kecs.dev/source-namespace";
    pub const REGION: &str = "kecs.dev/region";
    /// Annotations under this prefix are carried over when replicating.
    pub const PREFIX: &str = "kecs.dev/";
}

/// One-time process setup: register the TLS crypto provider and decide
/// whether startup banners get color.
pub fn init() {
    // An embedding process may have registered a provider already; that is
    // not an error.
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider was already installed");
    }
    owo_colors::set_override(color_output_enabled());
}

/// Color only real terminals, and let NO_COLOR (https://no-color.org) turn
/// it off everywhere.
fn color_output_enabled() -> bool {
    use std::io::IsTerminal;

    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// Name of the virtual cluster that backs an emulated cluster.
pub fn virtual_cluster_name(cluster_name: &str) -> String {
    format!("{}{}", VIRTUAL_CLUSTER_PREFIX, cluster_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_cluster_name_is_prefixed() {
        assert_eq!(virtual_cluster_name("prod"), "kecs-prod");
    }
}
