use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::{Service, service_status},
    store::{Page, ServiceFilters, ServiceStore},
};

const COLUMNS: &str = "id, arn, service_name, cluster_arn, task_definition_arn, desired_count, \
     running_count, pending_count, status, launch_type, platform_version, role_arn, \
     load_balancers, service_registries, network_configuration, deployment_configuration, \
     placement_constraints, placement_strategy, capacity_provider_strategy, scheduling_strategy, \
     health_check_grace_period_seconds, enable_ecs_managed_tags, enable_execute_command, \
     propagate_tags, tags, deployment_name, namespace, region, account_id, created_at, updated_at";

fn from_row(row: &Row) -> Service {
    Service {
        id: row.get("id"),
        arn: row.get("arn"),
        service_name: row.get("service_name"),
        cluster_arn: row.get("cluster_arn"),
        task_definition_arn: row.get("task_definition_arn"),
        desired_count: row.get("desired_count"),
        running_count: row.get("running_count"),
        pending_count: row.get("pending_count"),
        status: row.get("status"),
        launch_type: row.get("launch_type"),
        platform_version: row.get("platform_version"),
        role_arn: row.get("role_arn"),
        load_balancers: row.get("load_balancers"),
        service_registries: row.get("service_registries"),
        network_configuration: row.get("network_configuration"),
        deployment_configuration: row.get("deployment_configuration"),
        placement_constraints: row.get("placement_constraints"),
        placement_strategy: row.get("placement_strategy"),
        capacity_provider_strategy: row.get("capacity_provider_strategy"),
        scheduling_strategy: row.get("scheduling_strategy"),
        health_check_grace_period_seconds: row.get("health_check_grace_period_seconds"),
        enable_ecs_managed_tags: row.get("enable_ecs_managed_tags"),
        enable_execute_command: row.get("enable_execute_command"),
        propagate_tags: row.get("propagate_tags"),
        tags: row.get("tags"),
        deployment_name: row.get("deployment_name"),
        namespace: row.get("namespace"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct ServiceRepo {
    pool: Pool,
}

impl ServiceRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceStore for ServiceRepo {
    async fn create(&self, s: &Service) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO services ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31)"
        );
        client
            .execute(
                &sql,
                &[
                    &s.id,
                    &s.arn,
                    &s.service_name,
                    &s.cluster_arn,
                    &s.task_definition_arn,
                    &s.desired_count,
                    &s.running_count,
                    &s.pending_count,
                    &s.status,
                    &s.launch_type,
                    &s.platform_version,
                    &s.role_arn,
                    &s.load_balancers,
                    &s.service_registries,
                    &s.network_configuration,
                    &s.deployment_configuration,
                    &s.placement_constraints,
                    &s.placement_strategy,
                    &s.capacity_provider_strategy,
                    &s.scheduling_strategy,
                    &s.health_check_grace_period_seconds,
                    &s.enable_ecs_managed_tags,
                    &s.enable_execute_command,
                    &s.propagate_tags,
                    &s.tags,
                    &s.deployment_name,
                    &s.namespace,
                    &s.region,
                    &s.account_id,
                    &s.created_at,
                    &s.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, cluster_arn: &str, name: &str) -> Result<Option<Service>> {
        let client = self.pool.get().await?;
        let sql =
            format!("SELECT {COLUMNS} FROM services WHERE cluster_arn = $1 AND service_name = $2");
        let row = client.query_opt(&sql, &[&cluster_arn, &name]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<Service>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM services WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn update(&self, s: &Service) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                UPDATE services
                SET task_definition_arn = $1, desired_count = $2, running_count = $3,
                    pending_count = $4, status = $5, platform_version = $6,
                    load_balancers = $7, service_registries = $8, network_configuration = $9,
                    deployment_configuration = $10, placement_constraints = $11,
                    placement_strategy = $12, capacity_provider_strategy = $13,
                    health_check_grace_period_seconds = $14, enable_execute_command = $15,
                    propagate_tags = $16, tags = $17, deployment_name = $18, namespace = $19,
                    updated_at = NOW()
                WHERE arn = $20
                "#,
                &[
                    &s.task_definition_arn,
                    &s.desired_count,
                    &s.running_count,
                    &s.pending_count,
                    &s.status,
                    &s.platform_version,
                    &s.load_balancers,
                    &s.service_registries,
                    &s.network_configuration,
                    &s.deployment_configuration,
                    &s.placement_constraints,
                    &s.placement_strategy,
                    &s.capacity_provider_strategy,
                    &s.health_check_grace_period_seconds,
                    &s.enable_execute_command,
                    &s.propagate_tags,
                    &s.tags,
                    &s.deployment_name,
                    &s.namespace,
                    &s.arn,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("service", &s.service_name));
        }
        Ok(())
    }

    async fn delete(&self, cluster_arn: &str, name: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM services WHERE cluster_arn = $1 AND service_name = $2",
                &[&cluster_arn, &name],
            )
            .await?;
        if affected == 0 {
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
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM services WHERE cluster_arn = $1"
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&cluster_arn];
        if let Some(ref launch_type) = filters.launch_type {
            params.push(launch_type);
            sql.push_str(&format!(" AND launch_type = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY service_name ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Service>> {
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM services WHERE arn = ANY($1)");
        let rows = client.query(&sql, &[&arns]).await?;
        Ok(rows.iter().map(from_row).collect())
    }

    async fn count_active(&self, cluster_arn: &str) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS n FROM services WHERE cluster_arn = $1 \
                 AND status = ANY($2)",
                &[
                    &cluster_arn,
                    &vec![
                        service_status::ACTIVE,
                        service_status::PENDING,
                        service_status::UPDATING,
                    ],
                ],
            )
            .await?;
        Ok(row.get("n"))
    }

    async fn delete_marked_for_deletion(&self, cluster_arn: &str) -> Result<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM services WHERE cluster_arn = $1 AND status = $2",
                &[&cluster_arn, &service_status::INACTIVE],
            )
            .await?;
        Ok(removed)
    }
}
