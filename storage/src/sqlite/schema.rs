use kecs_common::Result;
use sqlx::sqlite::SqlitePool;

/// Idempotent schema bootstrap, one table per entity kind.
pub async fn init(pool: &SqlitePool) -> Result<()> {
    for statement in TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("embedded database schema initialized");
    Ok(())
}

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS clusters (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        configuration TEXT,
        settings TEXT,
        tags TEXT,
        capacity_providers TEXT,
        default_capacity_provider_strategy TEXT,
        active_services_count INTEGER NOT NULL DEFAULT 0,
        running_tasks_count INTEGER NOT NULL DEFAULT 0,
        pending_tasks_count INTEGER NOT NULL DEFAULT 0,
        registered_container_instances_count INTEGER NOT NULL DEFAULT 0,
        k8s_cluster_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_definitions (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        family TEXT NOT NULL,
        revision INTEGER NOT NULL,
        status TEXT NOT NULL,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        container_definitions TEXT NOT NULL,
        volumes TEXT,
        network_mode TEXT,
        requires_compatibilities TEXT,
        cpu TEXT,
        memory TEXT,
        task_role_arn TEXT,
        execution_role_arn TEXT,
        placement_constraints TEXT,
        runtime_platform TEXT,
        ipc_mode TEXT,
        pid_mode TEXT,
        tags TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (family, revision)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS services (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        service_name TEXT NOT NULL,
        cluster_arn TEXT NOT NULL,
        task_definition_arn TEXT NOT NULL,
        desired_count INTEGER NOT NULL DEFAULT 0,
        running_count INTEGER NOT NULL DEFAULT 0,
        pending_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        launch_type TEXT NOT NULL,
        platform_version TEXT,
        role_arn TEXT,
        load_balancers TEXT,
        service_registries TEXT,
        network_configuration TEXT,
        deployment_configuration TEXT,
        placement_constraints TEXT,
        placement_strategy TEXT,
        capacity_provider_strategy TEXT,
        scheduling_strategy TEXT NOT NULL DEFAULT 'REPLICA',
        health_check_grace_period_seconds INTEGER,
        enable_ecs_managed_tags INTEGER NOT NULL DEFAULT 0,
        enable_execute_command INTEGER NOT NULL DEFAULT 0,
        propagate_tags TEXT,
        tags TEXT,
        deployment_name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (cluster_arn, service_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        cluster_arn TEXT NOT NULL,
        task_definition_arn TEXT NOT NULL,
        container_instance_arn TEXT,
        last_status TEXT NOT NULL,
        desired_status TEXT NOT NULL,
        launch_type TEXT NOT NULL,
        connectivity TEXT,
        connectivity_at TEXT,
        containers TEXT NOT NULL,
        overrides TEXT,
        attachments TEXT,
        attributes TEXT,
        started_by TEXT,
        group_name TEXT,
        stop_code TEXT,
        stopped_reason TEXT,
        cpu TEXT,
        memory TEXT,
        pull_started_at TEXT,
        pull_stopped_at TEXT,
        started_at TEXT,
        stopping_at TEXT,
        stopped_at TEXT,
        execution_stopped_at TEXT,
        pod_name TEXT,
        namespace TEXT,
        version INTEGER NOT NULL DEFAULT 1,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_tasks_cluster ON tasks (cluster_arn)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_sets (
        id TEXT NOT NULL,
        arn TEXT NOT NULL UNIQUE,
        service_arn TEXT NOT NULL,
        cluster_arn TEXT NOT NULL,
        external_id TEXT,
        task_definition_arn TEXT NOT NULL,
        launch_type TEXT NOT NULL,
        status TEXT NOT NULL,
        stability_status TEXT NOT NULL,
        scale_value REAL NOT NULL DEFAULT 100.0,
        scale_unit TEXT NOT NULL DEFAULT 'PERCENT',
        computed_desired_count INTEGER NOT NULL DEFAULT 0,
        started_by TEXT,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (service_arn, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS container_instances (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        cluster_arn TEXT NOT NULL,
        ec2_instance_id TEXT,
        status TEXT NOT NULL,
        agent_connected INTEGER NOT NULL DEFAULT 1,
        running_tasks_count INTEGER NOT NULL DEFAULT 0,
        pending_tasks_count INTEGER NOT NULL DEFAULT 0,
        attributes TEXT,
        registered_resources TEXT,
        remaining_resources TEXT,
        version_info TEXT,
        tags TEXT,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attributes (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        value TEXT,
        target_type TEXT NOT NULL,
        target_id TEXT NOT NULL,
        cluster_arn TEXT NOT NULL,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (name, target_type, target_id, cluster_arn)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS account_settings (
        id TEXT PRIMARY KEY,
        principal_arn TEXT NOT NULL,
        name TEXT NOT NULL,
        value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (principal_arn, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS load_balancers (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        dns_name TEXT NOT NULL,
        state TEXT NOT NULL,
        lb_type TEXT NOT NULL,
        scheme TEXT NOT NULL,
        vpc_id TEXT,
        subnets TEXT,
        security_groups TEXT,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS target_groups (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL UNIQUE,
        protocol TEXT NOT NULL,
        port INTEGER NOT NULL,
        vpc_id TEXT,
        target_type TEXT NOT NULL,
        health_check TEXT,
        load_balancer_arns TEXT,
        region TEXT NOT NULL,
        account_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS listeners (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        load_balancer_arn TEXT NOT NULL,
        port INTEGER NOT NULL,
        protocol TEXT NOT NULL,
        default_actions TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rules (
        id TEXT PRIMARY KEY,
        arn TEXT NOT NULL UNIQUE,
        listener_arn TEXT NOT NULL,
        priority INTEGER NOT NULL,
        conditions TEXT,
        actions TEXT,
        is_default INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS targets (
        target_group_arn TEXT NOT NULL,
        target_id TEXT NOT NULL,
        port INTEGER NOT NULL,
        health_state TEXT NOT NULL,
        reason TEXT,
        description TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (target_group_arn, target_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS task_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        task_arn TEXT NOT NULL,
        container_name TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        log_line TEXT NOT NULL,
        log_level TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_task_logs_task ON task_logs (task_arn)
    "#,
];
