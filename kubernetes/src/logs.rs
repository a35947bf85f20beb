//! Container log collection for pods that are about to be deleted.
//!
//! The whole drain is capped at 30 seconds so a wedged kubelet cannot stall
//! task teardown. Lines are parsed from the timestamped log stream, levelled
//! by keyword, and persisted as one batch.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kecs_common::{Error, Result};
use kecs_storage::{Storage, models::TaskLog, models::log_level};
use kube::{Api, Client, api::DeleteParams, api::LogParams};

const COLLECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay between opening the collection and deleting the pod, so the log
/// stream is established before the kubelet starts tearing containers down.
const DELETION_LEAD: Duration = Duration::from_millis(100);

pub struct LogCollector {
    storage: Arc<dyn Storage>,
}

impl LogCollector {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Drain all container logs of `pod_name` and persist them for
    /// `task_arn`, then delete the pod. Collection failures are logged; the
    /// deletion always proceeds.
    pub async fn collect_then_delete(
        &self,
        client: Client,
        namespace: &str,
        pod_name: &str,
        task_arn: &str,
    ) -> Result<()> {
        let drain = self.drain_pod_logs(client.clone(), namespace, pod_name, task_arn);
        match tokio::time::timeout(COLLECTION_TIMEOUT, drain).await {
            Ok(Ok(count)) => {
                tracing::info!(pod = pod_name, task = task_arn, lines = count, "collected logs")
            }
            Ok(Err(err)) => {
                tracing::warn!(pod = pod_name, error = %err, "log collection failed")
            }
            Err(_) => {
                tracing::warn!(pod = pod_name, "log collection timed out")
            }
        }
        tokio::time::sleep(DELETION_LEAD).await;
        let pods: Api<Pod> = Api::namespaced(client, namespace);
        match pods.delete(pod_name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = Error::from(err);
                if err.is_not_found() { Ok(()) } else { Err(err) }
            }
        }
    }

    /// Stream every container's full log buffer (init containers included)
    /// and persist the parsed lines as a single batch. Returns the number of
    /// lines saved.
    pub async fn drain_pod_logs(
        &self,
        client: Client,
        namespace: &str,
        pod_name: &str,
        task_arn: &str,
    ) -> Result<usize> {
        let pods: Api<Pod> = Api::namespaced(client, namespace);
        let pod = pods.get(pod_name).await.map_err(Error::from)?;

        let mut containers: Vec<String> = Vec::new();
        if let Some(spec) = pod.spec.as_ref() {
            if let Some(init) = spec.init_containers.as_ref() {
                containers.extend(init.iter().map(|c| c.name.clone()));
            }
            containers.extend(spec.containers.iter().map(|c| c.name.clone()));
        }

        let collected_at = Utc::now();
        let mut batch: Vec<TaskLog> = Vec::new();
        for container in containers {
            let params = LogParams {
                container: Some(container.clone()),
                timestamps: true,
                ..Default::default()
            };
            let raw = match pods.logs(pod_name, &params).await {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(pod = pod_name, container = %container, error = %err, "log stream failed");
                    continue;
                }
            };
            for line in raw.lines() {
                if line.is_empty() {
                    continue;
                }
                let (timestamp, message) = parse_line(line, collected_at);
                batch.push(TaskLog {
                    id: 0,
                    task_arn: task_arn.to_string(),
                    container_name: container.clone(),
                    timestamp,
                    log_level: classify_level(message).to_string(),
                    log_line: message.to_string(),
                    created_at: collected_at,
                });
            }
        }
        self.storage.task_logs().save_logs(&batch).await?;
        Ok(batch.len())
    }
}

/// Split a kubelet log line into its RFC3339-nano timestamp prefix and the
/// message. Lines without a parsable prefix keep their full text and get the
/// fallback timestamp.
fn parse_line(line: &str, fallback: DateTime<Utc>) -> (DateTime<Utc>, &str) {
    if let Some((prefix, rest)) = line.split_once(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(prefix) {
            return (ts.with_timezone(&Utc), rest);
        }
    }
    (fallback, line)
}

/// Case-insensitive keyword scan; first match wins.
fn classify_level(message: &str) -> &'static str {
    let upper = message.to_uppercase();
    if upper.contains("ERROR") || upper.contains("FATAL") {
        log_level::ERROR
    } else if upper.contains("WARN") {
        log_level::WARN
    } else if upper.contains("DEBUG") {
        log_level::DEBUG
    } else {
        log_level::INFO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamped_lines_are_split() {
        let fallback = Utc::now();
        let (ts, message) = parse_line(
            "2026-07-14T09:30:00.123456789Z listening on :8080",
            fallback,
        );
        assert_eq!(message, "listening on :8080");
        assert_eq!(ts.to_rfc3339(), "2026-07-14T09:30:00.123456789+00:00");
    }

    #[test]
    fn unparsable_prefix_keeps_whole_line() {
        let fallback = Utc::now();
        let (ts, message) = parse_line("plain message without timestamp", fallback);
        assert_eq!(message, "plain message without timestamp");
        assert_eq!(ts, fallback);
    }

    #[test]
    fn level_classification_is_keyword_based() {
        assert_eq!(classify_level("connection ERROR: refused"), "ERROR");
        assert_eq!(classify_level("fatal: out of memory"), "ERROR");
        assert_eq!(classify_level("Warning: deprecated flag"), "WARN");
        assert_eq!(classify_level("debug: cache miss"), "DEBUG");
        assert_eq!(classify_level("request served in 4ms"), "INFO");
    }
}
