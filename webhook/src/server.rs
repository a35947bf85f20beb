//! HTTPS server exposing the pod admission mutator plus liveness and
//! readiness probes.
//!
//! TLS termination is required for real clusters (the API server refuses
//! plaintext webhooks); a plaintext mode exists for development and is
//! loudly flagged.

use std::{
    fs::File,
    io::BufReader,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use k8s_openapi::api::core::v1::Pod;
use kecs_common::{Result, args::WebhookArgs};
use kube::core::admission::AdmissionReview;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crate::mutator::PodMutator;

#[derive(Clone)]
pub struct WebhookState {
    pub mutator: Arc<PodMutator>,
    pub ready: Arc<AtomicBool>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/mutate/pods", post(mutate_pods))
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn readyz(State(state): State<WebhookState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing")
    }
}

async fn mutate_pods(
    State(state): State<WebhookState>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> impl IntoResponse {
    Json(state.mutator.mutate(review).await)
}

/// Serve the webhook until `cancel` fires.
pub async fn run_server(
    args: WebhookArgs,
    state: WebhookState,
    cancel: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", args.webhook_bind, args.webhook_port)
        .parse()
        .map_err(|e| kecs_common::Error::invalid_input(format!("invalid webhook bind: {e}")))?;
    let app = router(state);

    match (args.webhook_tls_cert.as_deref(), args.webhook_tls_key.as_deref()) {
        (Some(cert_path), Some(key_path)) => {
            let config = load_tls_config(cert_path, key_path)?;
            serve_tls(addr, config, app, cancel).await
        }
        _ => {
            tracing::warn!(
                "webhook TLS is DISABLED; the Kubernetes API server will not call a plaintext \
                 webhook. Use this mode for local development only."
            );
            let listener = TcpListener::bind(addr)
                .await
                .context("failed to bind webhook listener")
                .map_err(kecs_common::Error::Internal)?;
            tracing::info!(%addr, "webhook server listening (plaintext)");
            axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
                .context("webhook server failed")
                .map_err(kecs_common::Error::Internal)
        }
    }
}

fn load_tls_config(cert_path: &str, key_path: &str) -> Result<ServerConfig> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("failed to open {cert_path}"))
            .map_err(kecs_common::Error::Internal)?,
    ))
    .collect::<std::result::Result<Vec<_>, _>>()
    .context("failed to parse certificate chain")
    .map_err(kecs_common::Error::Internal)?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(
        File::open(key_path)
            .with_context(|| format!("failed to open {key_path}"))
            .map_err(kecs_common::Error::Internal)?,
    ))
    .context("failed to parse private key")
    .map_err(kecs_common::Error::Internal)?
    .ok_or_else(|| kecs_common::Error::invalid_input("no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid certificate/key pair")
        .map_err(kecs_common::Error::Internal)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Accept loop that terminates TLS per connection and hands the stream to
/// the axum router.
async fn serve_tls(
    addr: SocketAddr,
    config: ServerConfig,
    app: Router,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind webhook listener")
        .map_err(kecs_common::Error::Internal)?;
    let acceptor = TlsAcceptor::from(Arc::new(config));
    tracing::info!(%addr, "webhook server listening (tls)");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, remote) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::debug!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let app = app.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(err) => {
                            tracing::debug!(%remote, error = %err, "TLS handshake failed");
                            return;
                        }
                    };
                    let service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                        app.clone().oneshot(request)
                    });
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(tls_stream), service)
                        .await
                    {
                        tracing::debug!(%remote, error = %err, "connection error");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kecs_storage::sqlite::SqliteStorage;
    use tower::Service;

    async fn state(ready: bool) -> WebhookState {
        let storage: Arc<dyn kecs_storage::Storage> =
            Arc::new(SqliteStorage::connect_in_memory().await.unwrap());
        WebhookState {
            mutator: Arc::new(PodMutator::new(storage)),
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    #[tokio::test]
    async fn readiness_flips_with_the_shared_flag() {
        let state = state(false).await;
        let flag = state.ready.clone();
        let mut app = router(state);

        let request = axum::http::Request::builder()
            .uri("/readyz")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        flag.store(true, Ordering::Relaxed);
        let request = axum::http::Request::builder()
            .uri("/readyz")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let mut app = router(state(false).await);
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.call(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
