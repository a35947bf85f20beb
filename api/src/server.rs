//! HTTP front door.
//!
//! The upstream service speaks AWS JSON 1.1: every call is a `POST /` with
//! the operation in the `X-Amz-Target` header and a JSON body. Errors leave
//! as `{"__type": ..., "message": ...}` envelopes so unmodified SDK clients
//! keep working.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kecs_common::{Error, Result};
use kecs_storage::LruTtlCache;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::ops::EcsApi;

const ECS_TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";
const ELBV2_TARGET_PREFIX: &str = "ElasticLoadBalancing_v10";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<EcsApi>,
    pub ready: Arc<AtomicBool>,
    pub cache: Option<Arc<LruTtlCache>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(dispatch))
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/cache/stats", get(cache_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing")
    }
}

async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache {
        Some(cache) => Json(serde_json::to_value(cache.stats()).unwrap_or_default()),
        None => Json(serde_json::json!({"enabled": false})),
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(raw).map_err(Error::from)
}

fn render<T: serde::Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(e.into()))
}

async fn dispatch(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let target = headers
        .get("x-amz-target")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let result = route(&state.api, &target, &body).await;
    match result {
        Ok(value) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, AMZ_JSON)],
            Json(value),
        )
            .into_response(),
        Err(err) => {
            let correlation_id = uuid::Uuid::new_v4().simple().to_string();
            if err.http_status() >= 500 {
                tracing::error!(%target, %correlation_id, error = %err, "request failed");
            } else {
                tracing::debug!(%target, error = %err, "request rejected");
            }
            let status =
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (
                status,
                [(header::CONTENT_TYPE, AMZ_JSON)],
                Json(serde_json::json!({
                    "__type": err.wire_type(),
                    "message": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn route(api: &EcsApi, target: &str, body: &[u8]) -> Result<serde_json::Value> {
    let (service, operation) = target
        .split_once('.')
        .ok_or_else(|| Error::invalid_input(format!("missing or malformed X-Amz-Target: {target}")))?;
    match service {
        ECS_TARGET_PREFIX => route_ecs(api, operation, body).await,
        ELBV2_TARGET_PREFIX => route_elbv2(api, operation, body).await,
        other => Err(Error::invalid_input(format!("unknown target service {other}"))),
    }
}

async fn route_ecs(api: &EcsApi, operation: &str, body: &[u8]) -> Result<serde_json::Value> {
    match operation {
        "CreateCluster" => render(api.create_cluster(parse(body)?).await?),
        "DeleteCluster" => render(api.delete_cluster(parse(body)?).await?),
        "DescribeClusters" => render(api.describe_clusters(parse(body)?).await?),
        "ListClusters" => render(api.list_clusters(parse(body)?).await?),
        "UpdateCluster" => render(api.update_cluster(parse(body)?).await?),
        "UpdateClusterSettings" => render(api.update_cluster_settings(parse(body)?).await?),
        "PutClusterCapacityProviders" => {
            render(api.put_cluster_capacity_providers(parse(body)?).await?)
        }

        "RegisterTaskDefinition" => render(api.register_task_definition(parse(body)?).await?),
        "DeregisterTaskDefinition" => render(api.deregister_task_definition(parse(body)?).await?),
        "DescribeTaskDefinition" => render(api.describe_task_definition(parse(body)?).await?),
        "ListTaskDefinitions" => render(api.list_task_definitions(parse(body)?).await?),
        "ListTaskDefinitionFamilies" => {
            render(api.list_task_definition_families(parse(body)?).await?)
        }

        "CreateService" => render(api.create_service(parse(body)?).await?),
        "UpdateService" => render(api.update_service(parse(body)?).await?),
        "DeleteService" => render(api.delete_service(parse(body)?).await?),
        "DescribeServices" => render(api.describe_services(parse(body)?).await?),
        "ListServices" => render(api.list_services(parse(body)?).await?),

        "RunTask" => render(api.run_task(parse(body)?).await?),
        "StopTask" => render(api.stop_task(parse(body)?).await?),
        "DescribeTasks" => render(api.describe_tasks(parse(body)?).await?),
        "ListTasks" => render(api.list_tasks(parse(body)?).await?),

        "CreateTaskSet" => render(api.create_task_set(parse(body)?).await?),
        "UpdateTaskSet" => render(api.update_task_set(parse(body)?).await?),
        "DeleteTaskSet" => render(api.delete_task_set(parse(body)?).await?),
        "DescribeTaskSets" => render(api.describe_task_sets(parse(body)?).await?),

        "RegisterContainerInstance" => {
            render(api.register_container_instance(parse(body)?).await?)
        }
        "DeregisterContainerInstance" => {
            render(api.deregister_container_instance(parse(body)?).await?)
        }
        "DescribeContainerInstances" => {
            render(api.describe_container_instances(parse(body)?).await?)
        }
        "ListContainerInstances" => render(api.list_container_instances(parse(body)?).await?),
        "UpdateContainerInstancesState" => {
            render(api.update_container_instances_state(parse(body)?).await?)
        }

        "PutAttributes" => render(api.put_attributes(parse(body)?).await?),
        "DeleteAttributes" => render(api.delete_attributes(parse(body)?).await?),
        "ListAttributes" => render(api.list_attributes(parse(body)?).await?),

        "PutAccountSetting" => render(api.put_account_setting(parse(body)?).await?),
        "PutAccountSettingDefault" => {
            render(api.put_account_setting_default(parse(body)?).await?)
        }
        "DeleteAccountSetting" => render(api.delete_account_setting(parse(body)?).await?),
        "ListAccountSettings" => render(api.list_account_settings(parse(body)?).await?),

        "TagResource" => render(api.tag_resource(parse(body)?).await?),
        "UntagResource" => render(api.untag_resource(parse(body)?).await?),
        "ListTagsForResource" => render(api.list_tags_for_resource(parse(body)?).await?),

        other => Err(Error::invalid_input(format!("unknown operation {other}"))),
    }
}

async fn route_elbv2(api: &EcsApi, operation: &str, body: &[u8]) -> Result<serde_json::Value> {
    match operation {
        "CreateLoadBalancer" => render(api.create_load_balancer(parse(body)?).await?),
        "DescribeLoadBalancers" => render(api.describe_load_balancers(parse(body)?).await?),
        "DeleteLoadBalancer" => render(api.delete_load_balancer(parse(body)?).await?),
        "CreateTargetGroup" => render(api.create_target_group(parse(body)?).await?),
        "DescribeTargetGroups" => render(api.describe_target_groups(parse(body)?).await?),
        "DeleteTargetGroup" => render(api.delete_target_group(parse(body)?).await?),
        "CreateListener" => render(api.create_listener(parse(body)?).await?),
        "DescribeListeners" => render(api.describe_listeners(parse(body)?).await?),
        "DeleteListener" => render(api.delete_listener(parse(body)?).await?),
        "CreateRule" => render(api.create_rule(parse(body)?).await?),
        "DescribeRules" => render(api.describe_rules(parse(body)?).await?),
        "DeleteRule" => render(api.delete_rule(parse(body)?).await?),
        "RegisterTargets" => render(api.register_targets(parse(body)?).await?),
        "DeregisterTargets" => render(api.deregister_targets(parse(body)?).await?),
        "DescribeTargetHealth" => render(api.describe_target_health(parse(body)?).await?),
        other => Err(Error::invalid_input(format!("unknown operation {other}"))),
    }
}

/// Bind and serve until `cancel` fires.
pub async fn serve(
    bind: &str,
    port: u16,
    state: AppState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "control plane listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("control plane server failed")
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::ops::test_support;

    async fn state() -> AppState {
        AppState {
            api: Arc::new(test_support::api().await),
            ready: Arc::new(AtomicBool::new(true)),
            cache: None,
        }
    }

    async fn call(app: Router, target: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header("x-amz-target", target)
            .header(header::CONTENT_TYPE, AMZ_JSON)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn create_cluster_over_the_wire() {
        let app = router(state().await);
        let (status, body) = call(
            app,
            "AmazonEC2ContainerServiceV20141113.CreateCluster",
            serde_json::json!({"clusterName": "prod"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["cluster"]["clusterArn"],
            "arn:aws:ecs:us-east-1:000000000000:cluster/prod"
        );
        assert_eq!(body["cluster"]["status"], "ACTIVE");
    }

    #[tokio::test]
    async fn errors_use_the_wire_envelope() {
        let app = router(state().await);
        let (status, body) = call(
            app.clone(),
            "AmazonEC2ContainerServiceV20141113.DeleteCluster",
            serde_json::json!({"cluster": "ghost"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "ResourceNotFoundException");
        assert!(body["message"].as_str().unwrap().contains("ghost"));

        let (status, body) = call(
            app,
            "AmazonEC2ContainerServiceV20141113.DoSomethingNew",
            serde_json::json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["__type"], "InvalidParameterException");
    }

    #[tokio::test]
    async fn missing_target_header_is_invalid() {
        let app = router(state().await);
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn elbv2_operations_dispatch_on_their_own_prefix() {
        let app = router(state().await);
        let (status, body) = call(
            app,
            "ElasticLoadBalancing_v10.CreateLoadBalancer",
            serde_json::json!({"name": "web"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            body["loadBalancers"][0]["loadBalancerArn"]
                .as_str()
                .unwrap()
                .contains("loadbalancer/app/web/")
        );
    }

    #[tokio::test]
    async fn health_and_readiness_endpoints() {
        let state = state().await;
        let flag = state.ready.clone();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        flag.store(false, Ordering::Relaxed);
        let response = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
