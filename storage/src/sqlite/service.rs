use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{
    models::{Service, service_status},
    pagination,
    store::{Page, ServiceFilters, ServiceStore},
};

const COLUMNS: &str = "id, arn, service_name, cluster_arn, task_definition_arn, desired_count, \
     running_count, pending_count, status, launch_type, platform_version, role_arn, \
     load_balancers, service_registries, network_configuration, deployment_configuration, \
     placement_constraints, placement_strategy, capacity_provider_strategy, scheduling_strategy, \
     health_check_grace_period_seconds, enable_ecs_managed_tags, enable_execute_command, \
     propagate_tags, tags, deployment_name, namespace, region, account_id, created_at, updated_at";

pub struct ServiceRepo {
    pool: SqlitePool,
}

impl ServiceRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceStore for ServiceRepo {
    async fn create(&self, s: &Service) -> Result<()> {
        let sql = format!(
            "INSERT INTO services ({COLUMNS}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(s.id.as_str())
            .bind(s.arn.as_str())
            .bind(s.service_name.as_str())
            .bind(s.cluster_arn.as_str())
            .bind(s.task_definition_arn.as_str())
            .bind(s.desired_count)
            .bind(s.running_count)
            .bind(s.pending_count)
            .bind(s.status.as_str())
            .bind(s.launch_type.as_str())
            .bind(s.platform_version.as_deref())
            .bind(s.role_arn.as_deref())
            .bind(s.load_balancers.as_deref())
            .bind(s.service_registries.as_deref())
            .bind(s.network_configuration.as_deref())
            .bind(s.deployment_configuration.as_deref())
            .bind(s.placement_constraints.as_deref())
            .bind(s.placement_strategy.as_deref())
            .bind(s.capacity_provider_strategy.as_deref())
            .bind(s.scheduling_strategy.as_str())
            .bind(s.health_check_grace_period_seconds)
            .bind(s.enable_ecs_managed_tags)
            .bind(s.enable_execute_command)
            .bind(s.propagate_tags.as_deref())
            .bind(s.tags.as_deref())
            .bind(s.deployment_name.as_str())
            .bind(s.namespace.as_str())
            .bind(s.region.as_str())
            .bind(s.account_id.as_str())
            .bind(s.created_at)
            .bind(s.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        let sql =
            format!("SELECT {COLUMNS} FROM services WHERE cluster_arn = ? AND service_name = ?");
        let service = sqlx::query_as::<_, Service>(&sql)
            .bind(cluster_arn)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(service)
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<Service>> {
        let sql = format!("SELECT {COLUMNS} FROM services WHERE arn = ?");
        let service = sqlx::query_as::<_, Service>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(service)
    }

    async fn update(&self, s: &Service) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE services
            SET task_definition_arn = ?, desired_count = ?, running_count = ?,
                pending_count = ?, status = ?, platform_version = ?,
                load_balancers = ?, service_registries = ?, network_configuration = ?,
                deployment_configuration = ?, placement_constraints = ?,
                placement_strategy = ?, capacity_provider_strategy = ?,
                health_check_grace_period_seconds = ?, enable_execute_command = ?,
                propagate_tags = ?, tags = ?, deployment_name = ?, namespace = ?,
                updated_at = ?
            WHERE arn = ?
            "#,
        )
        .bind(s.task_definition_arn.as_str())
        .bind(s.desired_count)
        .bind(s.running_count)
        .bind(s.pending_count)
        .bind(s.status.as_str())
        .bind(s.platform_version.as_deref())
        .bind(s.load_balancers.as_deref())
        .bind(s.service_registries.as_deref())
        .bind(s.network_configuration.as_deref())
        .bind(s.deployment_configuration.as_deref())
        .bind(s.placement_constraints.as_deref())
        .bind(s.placement_strategy.as_deref())
        .bind(s.capacity_provider_strategy.as_deref())
        .bind(s.health_check_grace_period_seconds)
        .bind(s.enable_execute_command)
        .bind(s.propagate_tags.as_deref())
        .bind(s.tags.as_deref())
        .bind(s.deployment_name.as_str())
        .bind(s.namespace.as_str())
        .bind(chrono::Utc::now())
        .bind(s.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("service", &s.service_name));
        }
        Ok(())
    }

    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM services WHERE cluster_arn = ? AND service_name = ?")
            .bind(cluster_arn)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("service", name));
        }
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filters: &ServiceFilters,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Service>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM services WHERE cluster_arn = ?"
        );
        if filters.launch_type.is_some() {
            sql.push_str(" AND launch_type = ?");
        }
        sql.push_str(" ORDER BY service_name ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql).bind(cluster_arn);
        if let Some(ref launch_type) = filters.launch_type {
            query = query.bind(launch_type.as_str());
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        super::page_from_rows(&rows, offset)
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Service>> {
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; arns.len()].join(", ");
        let sql = format!("SELECT {COLUMNS} FROM services WHERE arn IN ({placeholders})");
        let mut query = sqlx::query_as::<_, Service>(&sql);
        for arn in arns {
            query = query.bind(arn.as_str());
        }
        let services = query.fetch_all(&self.pool).await?;
        Ok(services)
    }

    async fn count_active(&self, cluster_arn: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM services WHERE cluster_arn = ? AND status IN (?, ?, ?)",
        )
        .bind(cluster_arn)
        .bind(service_status::ACTIVE)
        .bind(service_status::PENDING)
        .bind(service_status::UPDATING)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn delete_marked_for_deletion(&self, cluster_arn: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM services WHERE cluster_arn = ? AND status = ?")
            .bind(cluster_arn)
            .bind(service_status::INACTIVE)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
