//! Entity records persisted by the storage layer.
//!
//! Nested structures (container definitions, load balancer lists, placement
//! strategies, tag sets) are kept as serialized JSON text in a single column
//! per field; only the columns used as query predicates are first-class.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cluster_status {
    pub const ACTIVE: &str = "ACTIVE";
    pub const PROVISIONING: &str = "PROVISIONING";
    pub const INACTIVE: &str = "INACTIVE";
}

pub mod task_status {
    pub const PROVISIONING: &str = "PROVISIONING";
    pub const PENDING: &str = "PENDING";
    pub const ACTIVATING: &str = "ACTIVATING";
    pub const RUNNING: &str = "RUNNING";
    pub const DEACTIVATING: &str = "DEACTIVATING";
    pub const STOPPING: &str = "STOPPING";
    pub const DEPROVISIONING: &str = "DEPROVISIONING";
    pub const STOPPED: &str = "STOPPED";

    /// The task lifecycle is a straight line; a status may only move forward.
    const ORDER: [&str; 8] = [
        PROVISIONING,
        PENDING,
        ACTIVATING,
        RUNNING,
        DEACTIVATING,
        STOPPING,
        DEPROVISIONING,
        STOPPED,
    ];

    pub fn rank(status: &str) -> Option<usize> {
        ORDER.iter().position(|s| *s == status)
    }

    pub fn is_valid_transition(from: &str, to: &str) -> bool {
        match (rank(from), rank(to)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    pub fn is_terminal(status: &str) -> bool {
        status == STOPPED
    }
}

pub mod service_status {
    pub const PENDING: &str = "PENDING";
    pub const ACTIVE: &str = "ACTIVE";
    pub const UPDATING: &str = "UPDATING";
    pub const DRAINING: &str = "DRAINING";
    pub const INACTIVE: &str = "INACTIVE";

    pub fn is_valid_transition(from: &str, to: &str) -> bool {
        matches!(
            (from, to),
            (PENDING, ACTIVE)
                | (ACTIVE, UPDATING)
                | (UPDATING, ACTIVE)
                | (ACTIVE, DRAINING)
                | (PENDING, DRAINING)
                | (UPDATING, DRAINING)
                | (DRAINING, INACTIVE)
        )
    }
}

pub mod container_instance_status {
    pub const REGISTERING: &str = "REGISTERING";
    pub const ACTIVE: &str = "ACTIVE";
    pub const DRAINING: &str = "DRAINING";
    pub const DEREGISTERING: &str = "DEREGISTERING";
    pub const REGISTRATION_FAILED: &str = "REGISTRATION_FAILED";
    pub const INACTIVE: &str = "INACTIVE";

    pub fn is_valid_transition(from: &str, to: &str) -> bool {
        matches!(
            (from, to),
            (REGISTERING, ACTIVE)
                | (REGISTERING, REGISTRATION_FAILED)
                | (ACTIVE, DRAINING)
                | (DRAINING, ACTIVE)
                | (ACTIVE, DEREGISTERING)
                | (DRAINING, DEREGISTERING)
                | (DEREGISTERING, INACTIVE)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cluster {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub status: String,
    pub region: String,
    pub account_id: String,
    /// Serialized ExecuteCommand/LogConfiguration document.
    pub configuration: Option<String>,
    /// Serialized list of cluster settings.
    pub settings: Option<String>,
    pub tags: Option<String>,
    pub capacity_providers: Option<String>,
    pub default_capacity_provider_strategy: Option<String>,
    pub active_services_count: i32,
    pub running_tasks_count: i32,
    pub pending_tasks_count: i32,
    pub registered_container_instances_count: i32,
    /// Name of the virtual cluster materializing this cluster. Weak
    /// reference: the row can outlive the virtual cluster.
    pub k8s_cluster_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskDefinition {
    pub id: String,
    pub arn: String,
    pub family: String,
    pub revision: i32,
    /// ACTIVE until deregistered, then INACTIVE. Immutable otherwise.
    pub status: String,
    pub region: String,
    pub account_id: String,
    pub container_definitions: String,
    pub volumes: Option<String>,
    pub network_mode: Option<String>,
    pub requires_compatibilities: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub placement_constraints: Option<String>,
    pub runtime_platform: Option<String>,
    pub ipc_mode: Option<String>,
    pub pid_mode: Option<String>,
    pub tags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Service {
    pub id: String,
    pub arn: String,
    pub service_name: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub desired_count: i32,
    pub running_count: i32,
    pub pending_count: i32,
    pub status: String,
    pub launch_type: String,
    pub platform_version: Option<String>,
    pub role_arn: Option<String>,
    pub load_balancers: Option<String>,
    pub service_registries: Option<String>,
    pub network_configuration: Option<String>,
    pub deployment_configuration: Option<String>,
    pub placement_constraints: Option<String>,
    pub placement_strategy: Option<String>,
    pub capacity_provider_strategy: Option<String>,
    pub scheduling_strategy: String,
    pub health_check_grace_period_seconds: Option<i32>,
    pub enable_ecs_managed_tags: bool,
    pub enable_execute_command: bool,
    pub propagate_tags: Option<String>,
    pub tags: Option<String>,
    /// Deployment the service scheduler maintains in the virtual cluster.
    pub deployment_name: String,
    pub namespace: String,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    /// 32-char hex identifier; the trailing component of the ARN.
    pub id: String,
    pub arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    pub container_instance_arn: Option<String>,
    pub last_status: String,
    pub desired_status: String,
    pub launch_type: String,
    pub connectivity: Option<String>,
    pub connectivity_at: Option<DateTime<Utc>>,
    pub containers: String,
    pub overrides: Option<String>,
    pub attachments: Option<String>,
    pub attributes: Option<String>,
    pub started_by: Option<String>,
    pub group_name: Option<String>,
    pub stop_code: Option<String>,
    pub stopped_reason: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub pull_started_at: Option<DateTime<Utc>>,
    pub pull_stopped_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopping_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub execution_stopped_at: Option<DateTime<Utc>>,
    /// Pod that materializes this task, once admission has stamped it.
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub version: i64,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskSet {
    pub id: String,
    pub arn: String,
    pub service_arn: String,
    pub cluster_arn: String,
    pub external_id: Option<String>,
    pub task_definition_arn: String,
    pub launch_type: String,
    pub status: String,
    pub stability_status: String,
    pub scale_value: f64,
    pub scale_unit: String,
    pub computed_desired_count: i32,
    pub started_by: Option<String>,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ContainerInstance {
    pub id: String,
    pub arn: String,
    pub cluster_arn: String,
    pub ec2_instance_id: Option<String>,
    pub status: String,
    pub agent_connected: bool,
    pub running_tasks_count: i32,
    pub pending_tasks_count: i32,
    pub attributes: Option<String>,
    pub registered_resources: Option<String>,
    pub remaining_resources: Option<String>,
    pub version_info: Option<String>,
    pub tags: Option<String>,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Key/value pair attached to a target, unique by
/// (name, target_type, target_id, cluster_arn).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attribute {
    pub id: String,
    pub name: String,
    pub value: Option<String>,
    pub target_type: String,
    pub target_id: String,
    pub cluster_arn: String,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-principal configuration override. The principal `default` holds the
/// account-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountSetting {
    pub id: String,
    pub principal_arn: String,
    pub name: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LoadBalancer {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub dns_name: String,
    pub state: String,
    pub lb_type: String,
    pub scheme: String,
    pub vpc_id: Option<String>,
    pub subnets: Option<String>,
    pub security_groups: Option<String>,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TargetGroup {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub protocol: String,
    pub port: i32,
    pub vpc_id: Option<String>,
    pub target_type: String,
    pub health_check: Option<String>,
    pub load_balancer_arns: Option<String>,
    pub region: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listener {
    pub id: String,
    pub arn: String,
    pub load_balancer_arn: String,
    pub port: i32,
    pub protocol: String,
    pub default_actions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Rule {
    pub id: String,
    pub arn: String,
    pub listener_arn: String,
    pub priority: i32,
    pub conditions: Option<String>,
    pub actions: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration of a target with a target group, with its current health.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TargetHealth {
    pub target_group_arn: String,
    pub target_id: String,
    pub port: i32,
    pub health_state: String,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub mod log_level {
    pub const ERROR: &str = "ERROR";
    pub const WARN: &str = "WARN";
    pub const INFO: &str = "INFO";
    pub const DEBUG: &str = "DEBUG";
}

/// One captured container log line.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskLog {
    pub id: i64,
    pub task_arn: String,
    pub container_name: String,
    pub timestamp: DateTime<Utc>,
    pub log_line: String,
    pub log_level: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_lifecycle_only_moves_forward() {
        use task_status::*;
        assert!(is_valid_transition(PROVISIONING, PENDING));
        assert!(is_valid_transition(PENDING, RUNNING));
        assert!(is_valid_transition(RUNNING, STOPPED));
        assert!(!is_valid_transition(STOPPED, RUNNING));
        assert!(!is_valid_transition(RUNNING, PENDING));
        assert!(!is_valid_transition(RUNNING, "UNKNOWN"));
        assert!(is_terminal(STOPPED));
        assert!(!is_terminal(RUNNING));
    }

    #[test]
    fn container_instance_can_drain_and_recover() {
        use container_instance_status::*;
        assert!(is_valid_transition(ACTIVE, DRAINING));
        assert!(is_valid_transition(DRAINING, ACTIVE));
        assert!(is_valid_transition(DRAINING, DEREGISTERING));
        assert!(!is_valid_transition(INACTIVE, ACTIVE));
    }

    #[test]
    fn service_rolls_between_active_and_updating() {
        use service_status::*;
        assert!(is_valid_transition(PENDING, ACTIVE));
        assert!(is_valid_transition(ACTIVE, UPDATING));
        assert!(is_valid_transition(UPDATING, ACTIVE));
        assert!(!is_valid_transition(INACTIVE, ACTIVE));
    }
}
