use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::{Task, TaskDefinition, task_status};
use kecs_storage::store::TaskFilters;
use serde::{Deserialize, Serialize};

use super::{EcsApi, Failure, epoch, epoch_opt, from_column, to_column};
use crate::arn;

const MAX_RUN_TASK_COUNT: i32 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    pub task_definition: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub count: Option<i32>,
    #[serde(default)]
    pub launch_type: Option<String>,
    #[serde(default)]
    pub network_configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub overrides: Option<serde_json::Value>,
    #[serde(default)]
    pub started_by: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub enable_execute_command: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTaskRequest {
    pub task: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTasksRequest {
    pub tasks: Vec<String>,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTasksRequest {
    pub cluster: Option<String>,
    pub service_name: Option<String>,
    pub family: Option<String>,
    pub desired_status: Option<String>,
    pub started_by: Option<String>,
    pub launch_type: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    pub task_arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub last_status: String,
    pub desired_status: String,
    pub launch_type: String,
    pub containers: serde_json::Value,
    pub version: i64,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_instance_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<f64>,
}

impl WireTask {
    fn from_model(t: &Task) -> Self {
        Self {
            task_arn: t.arn.clone(),
            cluster_arn: t.cluster_arn.clone(),
            task_definition_arn: t.task_definition_arn.clone(),
            last_status: t.last_status.clone(),
            desired_status: t.desired_status.clone(),
            launch_type: t.launch_type.clone(),
            containers: serde_json::from_str(&t.containers)
                .unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
            version: t.version,
            created_at: epoch(t.created_at),
            container_instance_arn: t.container_instance_arn.clone(),
            overrides: from_column(&t.overrides),
            attachments: from_column(&t.attachments),
            connectivity: t.connectivity.clone(),
            connectivity_at: epoch_opt(t.connectivity_at),
            started_by: t.started_by.clone(),
            group: t.group_name.clone(),
            stop_code: t.stop_code.clone(),
            stopped_reason: t.stopped_reason.clone(),
            cpu: t.cpu.clone(),
            memory: t.memory.clone(),
            started_at: epoch_opt(t.started_at),
            stopping_at: epoch_opt(t.stopping_at),
            stopped_at: epoch_opt(t.stopped_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    pub tasks: Vec<WireTask>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTaskResponse {
    pub task: WireTask,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTasksResponse {
    pub tasks: Vec<WireTask>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResponse {
    pub task_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Placeholder container entries derived from the task definition; the pod
/// admission flow fills in runtime details as the backing pod appears.
fn materialize_containers(task_arn: &str, td: &TaskDefinition) -> serde_json::Value {
    let definitions: Vec<serde_json::Value> =
        serde_json::from_str(&td.container_definitions).unwrap_or_default();
    let containers: Vec<serde_json::Value> = definitions
        .iter()
        .map(|def| {
            serde_json::json!({
                "containerArn": format!("{task_arn}/{}", uuid::Uuid::new_v4()),
                "taskArn": task_arn,
                "name": def.get("name").cloned().unwrap_or_default(),
                "image": def.get("image").cloned().unwrap_or_default(),
                "lastStatus": task_status::PROVISIONING,
            })
        })
        .collect();
    serde_json::Value::Array(containers)
}

/// awsvpc tasks get one elastic-network-interface attachment each.
fn materialize_eni_attachment(network_configuration: Option<&serde_json::Value>) -> serde_json::Value {
    let subnet = network_configuration
        .and_then(|nc| nc.pointer("/awsvpcConfiguration/subnets/0"))
        .and_then(|s| s.as_str())
        .unwrap_or("subnet-00000000")
        .to_string();
    serde_json::json!([{
        "id": uuid::Uuid::new_v4().to_string(),
        "type": "ElasticNetworkInterface",
        "status": "PRECREATED",
        "details": [
            {"name": "subnetId", "value": subnet},
            {"name": "networkInterfaceId", "value": format!("eni-{}", &uuid::Uuid::new_v4().simple().to_string()[..17])},
        ],
    }])
}

impl EcsApi {
    /// Launch `count` fresh tasks. Each call creates new rows; the virtual
    /// cluster may still be warming up, so rows persist intent and start in
    /// PROVISIONING.
    pub async fn run_task(&self, req: RunTaskRequest) -> Result<RunTaskResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let task_definition = self.resolve_task_definition(&req.task_definition).await?;
        let count = req.count.unwrap_or(1);
        if !(1..=MAX_RUN_TASK_COUNT).contains(&count) {
            return Err(Error::invalid_input(format!(
                "count must be between 1 and {MAX_RUN_TASK_COUNT}"
            )));
        }
        let awsvpc = task_definition.network_mode.as_deref() == Some("awsvpc");

        let now = Utc::now();
        let mut tasks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let task_id = uuid::Uuid::new_v4().simple().to_string();
            let task_arn = self.arn.task(&cluster.name, &task_id);
            let attachments = awsvpc.then(|| {
                materialize_eni_attachment(req.network_configuration.as_ref()).to_string()
            });
            tasks.push(Task {
                id: task_id,
                arn: task_arn.clone(),
                cluster_arn: cluster.arn.clone(),
                task_definition_arn: task_definition.arn.clone(),
                container_instance_arn: None,
                last_status: task_status::PROVISIONING.to_string(),
                desired_status: task_status::RUNNING.to_string(),
                launch_type: req
                    .launch_type
                    .clone()
                    .unwrap_or_else(|| "FARGATE".to_string()),
                connectivity: awsvpc.then(|| "CONNECTED".to_string()),
                connectivity_at: awsvpc.then_some(now),
                containers: materialize_containers(&task_arn, &task_definition).to_string(),
                overrides: to_column(&req.overrides),
                attachments,
                attributes: None,
                started_by: req.started_by.clone(),
                group_name: req
                    .group
                    .clone()
                    .or_else(|| Some(format!("family:{}", task_definition.family))),
                stop_code: None,
                stopped_reason: None,
                cpu: task_definition.cpu.clone(),
                memory: task_definition.memory.clone(),
                pull_started_at: None,
                pull_stopped_at: None,
                started_at: None,
                stopping_at: None,
                stopped_at: None,
                execution_stopped_at: None,
                pod_name: None,
                namespace: Some(cluster.name.clone()),
                version: 1,
                region: self.region.clone(),
                account_id: self.account_id.clone(),
                created_at: now,
                updated_at: now,
            });
        }

        // Rows and the pending counter move together.
        let mut tx = self.storage.begin_tx().await?;
        for task in &tasks {
            tx.create_task(task).await?;
        }
        tx.adjust_cluster_counters(&cluster.arn, 0, 0, count).await?;
        tx.commit().await?;

        Ok(RunTaskResponse {
            tasks: tasks.iter().map(WireTask::from_model).collect(),
            failures: Vec::new(),
        })
    }

    /// Stop a task. Stopping an already-STOPPED task is idempotent and
    /// returns the stored task unchanged.
    pub async fn stop_task(&self, req: StopTaskRequest) -> Result<StopTaskResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let task_arn = self.task_reference_to_arn(&cluster.name, &req.task);
        let mut task = self
            .storage
            .tasks()
            .get(&task_arn)
            .await?
            .ok_or_else(|| Error::not_found("task", &task_arn))?;

        if task.last_status == task_status::STOPPED {
            return Ok(StopTaskResponse {
                task: WireTask::from_model(&task),
            });
        }

        let now = Utc::now();
        task.desired_status = task_status::STOPPED.to_string();
        task.stop_code = Some("UserInitiated".to_string());
        task.stopped_reason = req.reason.clone();
        task.stopping_at = Some(now);
        self.storage.tasks().update(&task).await?;

        // Deleting the backing pod (which drains logs first) converges the
        // observed state; absence of a pod means nothing to tear down yet.
        if let (Some(pod_name), Some(namespace)) = (task.pod_name.clone(), task.namespace.clone())
        {
            self.spawn_pod_teardown(&cluster.k8s_cluster_name, namespace, pod_name, &task.arn);
        }

        Ok(StopTaskResponse {
            task: WireTask::from_model(&task),
        })
    }

    fn spawn_pod_teardown(
        &self,
        virtual_cluster: &str,
        namespace: String,
        pod_name: String,
        task_arn: &str,
    ) {
        let provisioner = self.cluster_manager.provisioner().clone();
        let storage = self.storage.clone();
        let virtual_cluster = virtual_cluster.to_string();
        let task_arn = task_arn.to_string();
        tokio::spawn(async move {
            let client = match provisioner.get_kube_client(&virtual_cluster).await {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(error = %err, "no kube client for pod teardown");
                    return;
                }
            };
            let collector = kecs_kubernetes::LogCollector::new(storage);
            if let Err(err) = collector
                .collect_then_delete(client, &namespace, &pod_name, &task_arn)
                .await
            {
                tracing::warn!(pod = pod_name, error = %err, "pod teardown failed");
            }
        });
    }

    fn task_reference_to_arn(&self, cluster_name: &str, reference: &str) -> String {
        if arn::is_arn(reference) {
            reference.to_string()
        } else {
            self.arn.task(cluster_name, reference)
        }
    }

    pub async fn describe_tasks(&self, req: DescribeTasksRequest) -> Result<DescribeTasksResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let arns: Vec<String> = req
            .tasks
            .iter()
            .map(|reference| self.task_reference_to_arn(&cluster.name, reference))
            .collect();
        let found = self.storage.tasks().get_by_arns(&arns).await?;
        let failures = arns
            .iter()
            .filter(|arn| !found.iter().any(|t| &t.arn == *arn))
            .map(Failure::missing)
            .collect();
        Ok(DescribeTasksResponse {
            tasks: found.iter().map(WireTask::from_model).collect(),
            failures,
        })
    }

    pub async fn list_tasks(&self, req: ListTasksRequest) -> Result<ListTasksResponse> {
        let cluster = self.resolve_cluster(req.cluster.as_deref()).await?;
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;
        let filters = TaskFilters {
            service_name: req.service_name,
            family: req.family,
            desired_status: req.desired_status,
            started_by: req.started_by,
            launch_type: req.launch_type,
        };
        let (tasks, next_token) = self
            .storage
            .tasks()
            .list(&cluster.arn, &filters, limit, req.next_token.as_deref())
            .await?;
        Ok(ListTasksResponse {
            task_arns: tasks.into_iter().map(|t| t.arn).collect(),
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::cluster::CreateClusterRequest;
    use super::super::task_definition::RegisterTaskDefinitionRequest;
    use super::super::test_support::api;
    use super::*;

    async fn api_with_prereqs(network_mode: Option<&str>) -> super::super::EcsApi {
        let api = api().await;
        api.create_cluster(CreateClusterRequest {
            cluster_name: Some("t".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        api.register_task_definition(RegisterTaskDefinitionRequest {
            family: "td".to_string(),
            container_definitions: serde_json::json!([{"name": "app", "image": "nginx:1"}]),
            volumes: None,
            network_mode: network_mode.map(str::to_string),
            requires_compatibilities: None,
            cpu: None,
            memory: None,
            task_role_arn: None,
            execution_role_arn: None,
            placement_constraints: None,
            runtime_platform: None,
            ipc_mode: None,
            pid_mode: None,
            tags: None,
        })
        .await
        .unwrap();
        api
    }

    fn run_request(count: i32) -> RunTaskRequest {
        RunTaskRequest {
            task_definition: "td".to_string(),
            cluster: Some("t".to_string()),
            count: Some(count),
            launch_type: None,
            network_configuration: None,
            overrides: None,
            started_by: None,
            group: None,
            platform_version: None,
            tags: None,
            enable_execute_command: None,
        }
    }

    #[tokio::test]
    async fn run_then_stop_one_of_three() {
        let api = api_with_prereqs(None).await;
        let ran = api.run_task(run_request(3)).await.unwrap();
        assert_eq!(ran.tasks.len(), 3);
        for task in &ran.tasks {
            assert_eq!(task.last_status, "PROVISIONING");
            assert_eq!(task.desired_status, "RUNNING");
        }

        let victim = &ran.tasks[0].task_arn;
        let stopped = api
            .stop_task(StopTaskRequest {
                task: victim.clone(),
                cluster: Some("t".to_string()),
                reason: Some("manual".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(stopped.task.desired_status, "STOPPED");
        assert!(stopped.task.stopped_reason.as_deref().unwrap().contains("manual"));
        assert_eq!(stopped.task.stop_code.as_deref(), Some("UserInitiated"));

        // The other two are unaffected.
        for arn in [&ran.tasks[1].task_arn, &ran.tasks[2].task_arn] {
            let task = api.storage().tasks().get(arn).await.unwrap().unwrap();
            assert_eq!(task.desired_status, "RUNNING");
        }

        let cluster = api.storage().clusters().get("t").await.unwrap().unwrap();
        assert_eq!(cluster.pending_tasks_count, 3);
    }

    #[tokio::test]
    async fn run_task_requires_existing_references() {
        let api = api_with_prereqs(None).await;
        let mut req = run_request(1);
        req.cluster = Some("ghost".to_string());
        assert!(matches!(
            api.run_task(req).await.unwrap_err(),
            Error::NotFound(_)
        ));

        let mut req = run_request(1);
        req.task_definition = "missing".to_string();
        assert!(matches!(
            api.run_task(req).await.unwrap_err(),
            Error::NotFound(_)
        ));

        assert!(matches!(
            api.run_task(run_request(0)).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            api.run_task(run_request(11)).await.unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn awsvpc_tasks_get_an_eni_attachment() {
        let api = api_with_prereqs(Some("awsvpc")).await;
        let mut req = run_request(1);
        req.network_configuration = Some(serde_json::json!({
            "awsvpcConfiguration": {"subnets": ["subnet-abc123"], "securityGroups": []}
        }));
        let ran = api.run_task(req).await.unwrap();
        let attachments = ran.tasks[0].attachments.as_ref().unwrap();
        assert_eq!(attachments[0]["type"], "ElasticNetworkInterface");
        assert_eq!(attachments[0]["status"], "PRECREATED");
        assert_eq!(attachments[0]["details"][0]["value"], "subnet-abc123");
        assert_eq!(ran.tasks[0].connectivity.as_deref(), Some("CONNECTED"));
    }

    #[tokio::test]
    async fn stop_task_is_idempotent_on_stopped_tasks() {
        let api = api_with_prereqs(None).await;
        let ran = api.run_task(run_request(1)).await.unwrap();
        let arn = &ran.tasks[0].task_arn;

        // Mark the task fully stopped, as the reconciler eventually would.
        let mut task = api.storage().tasks().get(arn).await.unwrap().unwrap();
        task.last_status = "STOPPED".to_string();
        task.desired_status = "STOPPED".to_string();
        task.stopped_reason = Some("first stop".to_string());
        api.storage().tasks().update(&task).await.unwrap();

        let again = api
            .stop_task(StopTaskRequest {
                task: arn.clone(),
                cluster: Some("t".to_string()),
                reason: Some("second stop".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(again.task.stopped_reason.as_deref(), Some("first stop"));
    }

    #[tokio::test]
    async fn describe_accepts_short_task_ids() {
        let api = api_with_prereqs(None).await;
        let ran = api.run_task(run_request(1)).await.unwrap();
        let arn = &ran.tasks[0].task_arn;
        let id = arn.rsplit('/').next().unwrap().to_string();

        let described = api
            .describe_tasks(DescribeTasksRequest {
                tasks: vec![id, "ffffffffffffffffffffffffffffffff".to_string()],
                cluster: Some("t".to_string()),
                include: None,
            })
            .await
            .unwrap();
        assert_eq!(described.tasks.len(), 1);
        assert_eq!(&described.tasks[0].task_arn, arn);
        assert_eq!(described.failures.len(), 1);
    }

    #[tokio::test]
    async fn list_tasks_filters_by_desired_status() {
        let api = api_with_prereqs(None).await;
        let ran = api.run_task(run_request(2)).await.unwrap();
        api.stop_task(StopTaskRequest {
            task: ran.tasks[0].task_arn.clone(),
            cluster: Some("t".to_string()),
            reason: None,
        })
        .await
        .unwrap();

        let running = api
            .list_tasks(ListTasksRequest {
                cluster: Some("t".to_string()),
                desired_status: Some("RUNNING".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(running.task_arns.len(), 1);
        assert_eq!(running.task_arns[0], ran.tasks[1].task_arn);
    }
}
