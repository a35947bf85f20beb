use clap::{Parser, Subcommand};
use kecs_common::args::{DockerArgs, FeatureArgs, KubernetesArgs, StorageArgs, WebhookArgs};

#[derive(Parser, Debug)]
#[command(name = "kecs", about = "Local ECS-compatible control plane on Kubernetes")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane server
    Server(ServerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    #[arg(long, env = "KECS_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(long, env = "KECS_PORT", default_value_t = 8080)]
    pub port: u16,

    #[clap(flatten)]
    pub storage: StorageArgs,

    #[clap(flatten)]
    pub kubernetes: KubernetesArgs,

    #[clap(flatten)]
    pub features: FeatureArgs,

    #[clap(flatten)]
    pub docker: DockerArgs,

    #[clap(flatten)]
    pub webhook: WebhookArgs,
}
