use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use clap::Parser;
use kecs_api::{AppState, EcsApi, server};
use kecs_kubernetes::ClusterManager;
use kecs_webhook::{PodMutator, WebhookState};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kecs_api::args::{Cli, Commands, ServerArgs};

#[tokio::main]
async fn main() -> Result<()> {
    kecs_common::init();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Server(args) => run(args).await,
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    println!("{}", "🚀 Starting KECS control plane...".green());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        kecs_common::shutdown::shutdown_signal().await;
        shutdown.cancel();
    });

    let (storage, cache) = kecs_storage::init_storage(&args.storage).await?;
    if let Some(cache) = cache.clone() {
        cache.run_sweeper(cancel.clone());
    }

    let cluster_manager = Arc::new(ClusterManager::from_args(
        &args.kubernetes,
        &args.features,
        &args.docker,
        kecs_common::DEFAULT_REGION.to_string(),
        cancel.clone(),
    ));
    let api = Arc::new(EcsApi::new(storage.clone(), cluster_manager.clone()));

    // Readiness is shared between the control plane and the webhook; it goes
    // true only after storage and the provisioner are wired up.
    let ready = Arc::new(AtomicBool::new(false));

    let webhook_state = WebhookState {
        mutator: Arc::new(PodMutator::new(storage.clone())),
        ready: ready.clone(),
    };
    let webhook_args = args.webhook.clone();
    let webhook_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(err) = kecs_webhook::run_server(webhook_args, webhook_state, webhook_cancel).await
        {
            tracing::error!(error = %err, "webhook server exited");
        }
    });

    let state = AppState {
        api,
        ready: ready.clone(),
        cache,
    };
    ready.store(true, Ordering::Relaxed);
    println!("{}", "✅ KECS control plane initialized".green());

    let result = server::serve(&args.bind, args.port, state, cancel.clone()).await;
    cluster_manager.shutdown().await?;
    result
}
