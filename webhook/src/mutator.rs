//! Pod admission mutator.
//!
//! The service controller inside the virtual cluster creates pods without a
//! task identity. This mutator intercepts pod creation, stamps a task id
//! label onto emulator-managed pods, and materializes the matching task row.
//! Applying it to its own output is a no-op.

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use kecs_common::{DEFAULT_ACCOUNT_ID, DEFAULT_REGION, labels};
use kecs_storage::{
    Storage,
    models::{Task, task_status},
};
use kube::{
    ResourceExt,
    core::admission::{AdmissionResponse, AdmissionReview},
};

pub struct PodMutator {
    storage: Arc<dyn Storage>,
    region: String,
    account_id: String,
}

impl PodMutator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            region: DEFAULT_REGION.to_string(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
        }
    }

    /// Process one admission review. Always admits; mutation and task-row
    /// materialization only apply to service-owned emulator pods.
    pub async fn mutate(&self, review: AdmissionReview<Pod>) -> AdmissionReview<Pod> {
        let request = match review.request {
            Some(request) => request,
            None => {
                let response = AdmissionResponse::invalid("admission review carried no request");
                return to_pod_review(response);
            }
        };
        let response = AdmissionResponse::from(&request);
        let Some(pod) = request.object.as_ref() else {
            return to_pod_review(response);
        };
        let pod_labels = pod.labels();

        // Not ours, or already stamped: admit unchanged.
        if pod_labels.get(labels::MANAGED_BY).map(String::as_str)
            != Some(labels::MANAGED_BY_VALUE)
            || pod_labels.contains_key(labels::TASK_ID)
        {
            return to_pod_review(response);
        }
        let Some(service) = pod_labels.get(labels::SERVICE).cloned() else {
            return to_pod_review(response);
        };

        let namespace = request
            .namespace
            .clone()
            .or_else(|| pod.namespace())
            .unwrap_or_else(|| "default".to_string());
        let cluster = pod_labels
            .get(labels::CLUSTER)
            .cloned()
            .unwrap_or_else(|| namespace.clone());
        let task_id = uuid::Uuid::new_v4().simple().to_string();

        let patch = match task_id_patch(&task_id) {
            Ok(patch) => patch,
            Err(err) => {
                tracing::error!(error = %err, "failed to build task-id patch");
                return to_pod_review(response);
            }
        };
        let response = match response.with_patch(patch) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "failed to attach task-id patch");
                return to_pod_review(AdmissionResponse::from(&request));
            }
        };

        // Best effort: a failed insert must not block admission.
        if let Err(err) = self
            .create_task_row(&task_id, &cluster, &service, &namespace, pod)
            .await
        {
            tracing::error!(task_id, error = %err, "failed to materialize task row");
        }

        to_pod_review(response)
    }

    async fn create_task_row(
        &self,
        task_id: &str,
        cluster: &str,
        service: &str,
        namespace: &str,
        pod: &Pod,
    ) -> kecs_common::Result<()> {
        let cluster_arn = format!(
            "arn:aws:ecs:{}:{}:cluster/{cluster}",
            self.region, self.account_id
        );
        // The owning service row knows the task definition and launch type.
        let owning_service = self.storage.services().get(&cluster_arn, service).await?;
        let (task_definition_arn, launch_type) = match owning_service {
            Some(s) => (s.task_definition_arn, s.launch_type),
            None => (String::new(), "FARGATE".to_string()),
        };
        let now = Utc::now();
        let task = Task {
            id: task_id.to_string(),
            arn: format!(
                "arn:aws:ecs:{}:{}:task/{cluster}/{task_id}",
                self.region, self.account_id
            ),
            cluster_arn,
            task_definition_arn,
            container_instance_arn: None,
            last_status: task_status::PENDING.to_string(),
            desired_status: task_status::RUNNING.to_string(),
            launch_type,
            connectivity: None,
            connectivity_at: None,
            containers: "[]".to_string(),
            overrides: None,
            attachments: None,
            attributes: None,
            started_by: Some(format!("ecs-svc/{service}")),
            group_name: Some(format!("service:{service}")),
            stop_code: None,
            stopped_reason: None,
            cpu: None,
            memory: None,
            pull_started_at: None,
            pull_stopped_at: None,
            started_at: None,
            stopping_at: None,
            stopped_at: None,
            execution_stopped_at: None,
            pod_name: Some(pod.name_any()),
            namespace: Some(namespace.to_string()),
            version: 1,
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.tasks().create(&task).await
    }
}

/// Wraps an [`AdmissionResponse`] in an [`AdmissionReview<Pod>`], since
/// [`AdmissionResponse::into_review`] is only generic over `DynamicObject`.
fn to_pod_review(response: AdmissionResponse) -> AdmissionReview<Pod> {
    AdmissionReview {
        types: response.types.clone(),
        request: None,
        response: Some(response),
    }
}

/// JSON-Patch that adds the task identity label ("/" in the label key is
/// escaped as "~1" per RFC 6901).
fn task_id_patch(task_id: &str) -> serde_json::Result<json_patch::Patch> {
    let pointer = format!("/metadata/labels/{}", labels::TASK_ID.replace('/', "~1"));
    serde_json::from_value(serde_json::json!([
        {"op": "add", "path": pointer, "value": task_id}
    ]))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kecs_storage::sqlite::SqliteStorage;

    use super::*;

    async fn mutator() -> PodMutator {
        let storage: Arc<dyn Storage> =
            Arc::new(SqliteStorage::connect_in_memory().await.unwrap());
        PodMutator::new(storage)
    }

    fn review_for(pod: &Pod) -> AdmissionReview<Pod> {
        let review = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": "prod",
                "operation": "CREATE",
                "userInfo": {},
                "object": serde_json::to_value(pod).unwrap(),
            }
        });
        serde_json::from_value(review).unwrap()
    }

    fn managed_pod(extra_labels: &[(&str, &str)]) -> Pod {
        let mut pod_labels = BTreeMap::from([(
            labels::MANAGED_BY.to_string(),
            labels::MANAGED_BY_VALUE.to_string(),
        )]);
        for (key, value) in extra_labels {
            pod_labels.insert(key.to_string(), value.to_string());
        }
        Pod {
            metadata: ObjectMeta {
                name: Some("web-7c9d6f-abcde".to_string()),
                namespace: Some("prod".to_string()),
                labels: Some(pod_labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn patch_of(review: &AdmissionReview<Pod>) -> Option<serde_json::Value> {
        review
            .response
            .as_ref()
            .and_then(|r| r.patch.as_ref())
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
    }

    #[tokio::test]
    async fn unmanaged_pods_pass_unchanged() {
        let mutator = mutator().await;
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("some-pod".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = mutator.mutate(review_for(&pod)).await;
        let response = result.response.unwrap();
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn service_pods_get_a_task_id_and_a_task_row() {
        let storage: Arc<dyn Storage> =
            Arc::new(SqliteStorage::connect_in_memory().await.unwrap());
        let mutator = PodMutator::new(storage.clone());
        let pod = managed_pod(&[(labels::SERVICE, "web"), (labels::CLUSTER, "prod")]);

        let result = mutator.mutate(review_for(&pod)).await;
        let response = result.response.as_ref().unwrap();
        assert!(response.allowed);

        let patch = patch_of(&result).unwrap();
        let op = &patch[0];
        assert_eq!(op["op"], "add");
        assert_eq!(op["path"], "/metadata/labels/kecs.dev~1task-id");
        let task_id = op["value"].as_str().unwrap();
        assert_eq!(task_id.len(), 32);
        assert!(task_id.chars().all(|c| c.is_ascii_hexdigit()));

        let arn =
            format!("arn:aws:ecs:us-east-1:000000000000:task/prod/{task_id}");
        let task = storage.tasks().get(&arn).await.unwrap().unwrap();
        assert_eq!(task.last_status, "PENDING");
        assert_eq!(task.desired_status, "RUNNING");
        assert_eq!(task.launch_type, "FARGATE");
        assert_eq!(task.started_by.as_deref(), Some("ecs-svc/web"));
        assert_eq!(task.namespace.as_deref(), Some("prod"));
        assert_eq!(task.version, 1);
    }

    #[tokio::test]
    async fn mutator_is_idempotent_on_its_own_output() {
        let storage: Arc<dyn Storage> =
            Arc::new(SqliteStorage::connect_in_memory().await.unwrap());
        let mutator = PodMutator::new(storage.clone());
        let pod = managed_pod(&[(labels::SERVICE, "web")]);

        let first = mutator.mutate(review_for(&pod)).await;
        let patch = patch_of(&first).unwrap();
        let task_id = patch[0]["value"].as_str().unwrap().to_string();

        // Re-apply the patched pod: already stamped, admitted unchanged.
        let stamped = managed_pod(&[
            (labels::SERVICE, "web"),
            (labels::TASK_ID, task_id.as_str()),
        ]);
        let second = mutator.mutate(review_for(&stamped)).await;
        let response = second.response.unwrap();
        assert!(response.allowed);
        assert!(response.patch.is_none());

        // And no second task row appeared.
        let (tasks, _) = storage
            .tasks()
            .list(
                "arn:aws:ecs:us-east-1:000000000000:cluster/prod",
                &Default::default(),
                100,
                None,
            )
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn pods_without_a_service_label_are_not_stamped() {
        let mutator = mutator().await;
        let pod = managed_pod(&[]);
        let result = mutator.mutate(review_for(&pod)).await;
        let response = result.response.unwrap();
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }
}
