use std::collections::HashSet;

use chrono::{Duration, Utc};
use kecs_common::Error;

use super::SqliteStorage;
use crate::{
    models::{AccountSetting, Attribute, TaskLog, task_status},
    store::{Storage, TaskFilters, TaskLogFilters},
    test_fixtures,
};

async fn storage() -> SqliteStorage {
    SqliteStorage::connect_in_memory().await.unwrap()
}

#[tokio::test]
async fn create_then_get_returns_equal_cluster() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("prod");
    storage.clusters().create(&cluster).await.unwrap();
    let fetched = storage.clusters().get("prod").await.unwrap().unwrap();
    assert_eq!(fetched.arn, cluster.arn);
    assert_eq!(fetched.name, "prod");
    assert_eq!(fetched.status, "ACTIVE");
    assert_eq!(fetched.active_services_count, 0);
    assert_eq!(fetched.k8s_cluster_name, "kecs-prod");
}

#[tokio::test]
async fn duplicate_create_is_already_exists() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("prod");
    storage.clusters().create(&cluster).await.unwrap();
    let mut dup = test_fixtures::cluster("prod");
    dup.id = uuid::Uuid::new_v4().to_string();
    let err = storage.clusters().create(&dup).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)), "got {err:?}");
}

#[tokio::test]
async fn create_delete_get_is_absent() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("prod");
    storage.clusters().create(&cluster).await.unwrap();
    storage.clusters().delete("prod").await.unwrap();
    assert!(storage.clusters().get("prod").await.unwrap().is_none());
    let err = storage.clusters().delete("prod").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn update_of_missing_row_is_not_found() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("ghost");
    let err = storage.clusters().update(&cluster).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn pagination_covers_the_set_exactly_once() {
    let storage = storage().await;
    for i in 0..10 {
        let cluster = test_fixtures::cluster(&format!("c{i:02}"));
        storage.clusters().create(&cluster).await.unwrap();
    }
    let mut seen: HashSet<String> = HashSet::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let (items, next) = storage
            .clusters()
            .list_paginated(3, token.as_deref())
            .await
            .unwrap();
        for c in &items {
            assert!(seen.insert(c.name.clone()), "duplicate {}", c.name);
        }
        pages += 1;
        match next {
            Some(t) => token = Some(t),
            None => break,
        }
    }
    assert_eq!(seen.len(), 10);
    assert_eq!(pages, 4);
}

#[tokio::test]
async fn malformed_token_is_invalid_input() {
    let storage = storage().await;
    let err = storage
        .clusters()
        .list_paginated(3, Some("not base64!"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn revisions_are_contiguous_within_a_family() {
    let storage = storage().await;
    let first = storage
        .task_definitions()
        .register(&test_fixtures::task_definition("webapp"))
        .await
        .unwrap();
    assert_eq!(first.revision, 1);
    assert_eq!(
        first.arn,
        "arn:aws:ecs:us-east-1:000000000000:task-definition/webapp:1"
    );
    let second = storage
        .task_definitions()
        .register(&test_fixtures::task_definition("webapp"))
        .await
        .unwrap();
    assert_eq!(second.revision, 2);

    // An unrelated family starts over at 1.
    let other = storage
        .task_definitions()
        .register(&test_fixtures::task_definition("worker"))
        .await
        .unwrap();
    assert_eq!(other.revision, 1);

    let revisions = storage
        .task_definitions()
        .list_revisions("webapp", None)
        .await
        .unwrap();
    assert_eq!(
        revisions.iter().map(|td| td.revision).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[tokio::test]
async fn deregistered_revision_is_excluded_from_latest() {
    let storage = storage().await;
    storage
        .task_definitions()
        .register(&test_fixtures::task_definition("webapp"))
        .await
        .unwrap();
    let mut second = storage
        .task_definitions()
        .register(&test_fixtures::task_definition("webapp"))
        .await
        .unwrap();
    second.status = "INACTIVE".to_string();
    storage.task_definitions().update(&second).await.unwrap();
    let latest = storage
        .task_definitions()
        .get_latest("webapp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.revision, 1);
}

#[tokio::test]
async fn list_families_is_distinct_and_prefix_filtered() {
    let storage = storage().await;
    for family in ["web-api", "web-ui", "worker"] {
        for _ in 0..2 {
            storage
                .task_definitions()
                .register(&test_fixtures::task_definition(family))
                .await
                .unwrap();
        }
    }
    let (families, next) = storage
        .task_definitions()
        .list_families(Some("web"), None, 10, None)
        .await
        .unwrap();
    assert_eq!(families, vec!["web-api", "web-ui"]);
    assert!(next.is_none());
}

#[tokio::test]
async fn get_by_arns_silently_drops_missing() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("t");
    storage.clusters().create(&cluster).await.unwrap();
    let task = test_fixtures::task(&cluster.arn);
    storage.tasks().create(&task).await.unwrap();
    let found = storage
        .tasks()
        .get_by_arns(&[
            task.arn.clone(),
            "arn:aws:ecs:us-east-1:000000000000:task/t/ffffffffffffffffffffffffffffffff"
                .to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].arn, task.arn);
}

#[tokio::test]
async fn task_list_filters_by_desired_status_and_started_by() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("t");
    storage.clusters().create(&cluster).await.unwrap();
    let mut stopped = test_fixtures::task(&cluster.arn);
    stopped.desired_status = task_status::STOPPED.to_string();
    storage.tasks().create(&stopped).await.unwrap();
    let mut svc_task = test_fixtures::task(&cluster.arn);
    svc_task.started_by = Some("ecs-svc/web".to_string());
    storage.tasks().create(&svc_task).await.unwrap();

    let filters = TaskFilters {
        desired_status: Some(task_status::RUNNING.to_string()),
        ..Default::default()
    };
    let (running, _) = storage
        .tasks()
        .list(&cluster.arn, &filters, 10, None)
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].arn, svc_task.arn);

    let filters = TaskFilters {
        service_name: Some("web".to_string()),
        ..Default::default()
    };
    let (by_service, _) = storage
        .tasks()
        .list(&cluster.arn, &filters, 10, None)
        .await
        .unwrap();
    assert_eq!(by_service.len(), 1);
    assert_eq!(by_service[0].arn, svc_task.arn);
}

#[tokio::test]
async fn delete_older_than_removes_only_matching_rows() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("t");
    storage.clusters().create(&cluster).await.unwrap();

    let mut old_stopped = test_fixtures::task(&cluster.arn);
    old_stopped.last_status = task_status::STOPPED.to_string();
    old_stopped.stopped_at = Some(Utc::now() - Duration::hours(2));
    storage.tasks().create(&old_stopped).await.unwrap();

    let running = test_fixtures::task(&cluster.arn);
    storage.tasks().create(&running).await.unwrap();

    let removed = storage
        .tasks()
        .delete_older_than(
            &cluster.arn,
            Utc::now() - Duration::hours(1),
            task_status::STOPPED,
        )
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(storage.tasks().get(&old_stopped.arn).await.unwrap().is_none());
    assert!(storage.tasks().get(&running.arn).await.unwrap().is_some());
}

#[tokio::test]
async fn tx_commit_applies_and_rollback_discards() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("t");
    storage.clusters().create(&cluster).await.unwrap();

    let task = test_fixtures::task(&cluster.arn);
    let mut tx = storage.begin_tx().await.unwrap();
    tx.create_task(&task).await.unwrap();
    tx.adjust_cluster_counters(&cluster.arn, 0, 0, 1).await.unwrap();
    tx.commit().await.unwrap();
    assert!(storage.tasks().get(&task.arn).await.unwrap().is_some());
    let fetched = storage.clusters().get("t").await.unwrap().unwrap();
    assert_eq!(fetched.pending_tasks_count, 1);

    let discarded = test_fixtures::task(&cluster.arn);
    let mut tx = storage.begin_tx().await.unwrap();
    tx.create_task(&discarded).await.unwrap();
    tx.rollback().await.unwrap();
    assert!(storage.tasks().get(&discarded.arn).await.unwrap().is_none());
}

#[tokio::test]
async fn dropped_tx_rolls_back() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("t");
    storage.clusters().create(&cluster).await.unwrap();
    let task = test_fixtures::task(&cluster.arn);
    {
        let mut tx = storage.begin_tx().await.unwrap();
        tx.create_task(&task).await.unwrap();
        // Dropped without commit.
    }
    assert!(storage.tasks().get(&task.arn).await.unwrap().is_none());
}

#[tokio::test]
async fn service_unique_key_is_per_cluster() {
    let storage = storage().await;
    let a = test_fixtures::cluster("a");
    let b = test_fixtures::cluster("b");
    storage.clusters().create(&a).await.unwrap();
    storage.clusters().create(&b).await.unwrap();

    let mut svc_a = test_fixtures::service(&a.arn, "web");
    svc_a.arn = "arn:aws:ecs:us-east-1:000000000000:service/a/web".to_string();
    storage.services().create(&svc_a).await.unwrap();

    // Same name in another cluster is fine.
    let mut svc_b = test_fixtures::service(&b.arn, "web");
    svc_b.arn = "arn:aws:ecs:us-east-1:000000000000:service/b/web".to_string();
    storage.services().create(&svc_b).await.unwrap();

    // Same (cluster, name) conflicts.
    let mut dup = test_fixtures::service(&a.arn, "web");
    dup.arn = "arn:aws:ecs:us-east-1:000000000000:service/a/web2".to_string();
    let err = storage.services().create(&dup).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));

    assert_eq!(storage.services().count_active(&a.arn).await.unwrap(), 1);
}

#[tokio::test]
async fn attribute_put_is_an_upsert() {
    let storage = storage().await;
    let now = Utc::now();
    let mut attr = Attribute {
        id: uuid::Uuid::new_v4().to_string(),
        name: "ecs.availability-zone".to_string(),
        value: Some("us-east-1a".to_string()),
        target_type: "container-instance".to_string(),
        target_id: "i-12345".to_string(),
        cluster_arn: "arn:aws:ecs:us-east-1:000000000000:cluster/t".to_string(),
        region: "us-east-1".to_string(),
        account_id: "000000000000".to_string(),
        created_at: now,
        updated_at: now,
    };
    storage.attributes().put(&attr).await.unwrap();
    attr.value = Some("us-east-1b".to_string());
    storage.attributes().put(&attr).await.unwrap();
    let (listed, _) = storage
        .attributes()
        .list(&attr.cluster_arn, None, None, 10, None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].value.as_deref(), Some("us-east-1b"));
}

#[tokio::test]
async fn account_setting_round_trip() {
    let storage = storage().await;
    let now = Utc::now();
    let setting = AccountSetting {
        id: uuid::Uuid::new_v4().to_string(),
        principal_arn: "default".to_string(),
        name: "containerInsights".to_string(),
        value: "enabled".to_string(),
        created_at: now,
        updated_at: now,
    };
    storage.account_settings().put(&setting).await.unwrap();
    let fetched = storage
        .account_settings()
        .get("default", "containerInsights")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.value, "enabled");
    storage
        .account_settings()
        .delete("default", "containerInsights")
        .await
        .unwrap();
    assert!(
        storage
            .account_settings()
            .get("default", "containerInsights")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn task_logs_batch_then_filter_then_orphan_cleanup() {
    let storage = storage().await;
    let cluster = test_fixtures::cluster("t");
    storage.clusters().create(&cluster).await.unwrap();
    let task = test_fixtures::task(&cluster.arn);
    storage.tasks().create(&task).await.unwrap();

    let now = Utc::now();
    let mk = |line: &str, level: &str| TaskLog {
        id: 0,
        task_arn: task.arn.clone(),
        container_name: "app".to_string(),
        timestamp: now,
        log_line: line.to_string(),
        log_level: level.to_string(),
        created_at: now,
    };
    storage
        .task_logs()
        .save_logs(&[
            mk("listening on :8080", "INFO"),
            mk("connection refused", "ERROR"),
        ])
        .await
        .unwrap();

    let filters = TaskLogFilters {
        log_level: Some("ERROR".to_string()),
        ..Default::default()
    };
    let errors = storage.task_logs().list(&task.arn, &filters, 100).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].log_line, "connection refused");

    storage.tasks().delete(&task.arn).await.unwrap();
    let removed = storage.task_logs().delete_orphaned().await.unwrap();
    assert_eq!(removed, 2);
}

#[tokio::test]
async fn file_backed_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kecs.db");
    let path = path.to_str().unwrap();

    {
        let storage = SqliteStorage::connect(path).await.unwrap();
        storage
            .clusters()
            .create(&test_fixtures::cluster("durable"))
            .await
            .unwrap();
    }

    // Schema bootstrap is idempotent and the row is still there.
    let storage = SqliteStorage::connect(path).await.unwrap();
    let cluster = storage.clusters().get("durable").await.unwrap().unwrap();
    assert_eq!(cluster.k8s_cluster_name, "kecs-durable");
}

#[tokio::test]
async fn elbv2_object_graph_round_trip() {
    let storage = storage().await;
    let now = Utc::now();
    let lb = crate::models::LoadBalancer {
        id: uuid::Uuid::new_v4().to_string(),
        arn: "arn:aws:elasticloadbalancing:us-east-1:000000000000:loadbalancer/app/web/1"
            .to_string(),
        name: "web".to_string(),
        dns_name: "web-1.elb.localhost".to_string(),
        state: "active".to_string(),
        lb_type: "application".to_string(),
        scheme: "internet-facing".to_string(),
        vpc_id: None,
        subnets: None,
        security_groups: None,
        region: "us-east-1".to_string(),
        account_id: "000000000000".to_string(),
        created_at: now,
        updated_at: now,
    };
    storage.elbv2().create_load_balancer(&lb).await.unwrap();
    assert!(storage.elbv2().get_load_balancer("web").await.unwrap().is_some());

    let tg = crate::models::TargetGroup {
        id: uuid::Uuid::new_v4().to_string(),
        arn: "arn:aws:elasticloadbalancing:us-east-1:000000000000:targetgroup/web/1".to_string(),
        name: "web".to_string(),
        protocol: "HTTP".to_string(),
        port: 80,
        vpc_id: None,
        target_type: "ip".to_string(),
        health_check: None,
        load_balancer_arns: None,
        region: "us-east-1".to_string(),
        account_id: "000000000000".to_string(),
        created_at: now,
        updated_at: now,
    };
    storage.elbv2().create_target_group(&tg).await.unwrap();

    let target = crate::models::TargetHealth {
        target_group_arn: tg.arn.clone(),
        target_id: "10.0.0.5".to_string(),
        port: 8080,
        health_state: "healthy".to_string(),
        reason: None,
        description: None,
        created_at: now,
        updated_at: now,
    };
    storage.elbv2().register_targets(&[target]).await.unwrap();
    let targets = storage.elbv2().list_targets(&tg.arn).await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].health_state, "healthy");

    storage
        .elbv2()
        .deregister_targets(&tg.arn, &["10.0.0.5".to_string()])
        .await
        .unwrap();
    assert!(storage.elbv2().list_targets(&tg.arn).await.unwrap().is_empty());
}
