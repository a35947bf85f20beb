use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::{Listener, LoadBalancer, Rule, TargetGroup, TargetHealth},
    store::{ElbV2Store, Page},
};

const LB_COLUMNS: &str = "id, arn, name, dns_name, state, lb_type, scheme, vpc_id, subnets, \
     security_groups, region, account_id, created_at, updated_at";
const TG_COLUMNS: &str = "id, arn, name, protocol, port, vpc_id, target_type, health_check, \
     load_balancer_arns, region, account_id, created_at, updated_at";
const LISTENER_COLUMNS: &str =
    "id, arn, load_balancer_arn, port, protocol, default_actions, created_at, updated_at";
const RULE_COLUMNS: &str =
    "id, arn, listener_arn, priority, conditions, actions, is_default, created_at, updated_at";
const TARGET_COLUMNS: &str = "target_group_arn, target_id, port, health_state, reason, \
     description, created_at, updated_at";

fn lb_from_row(row: &Row) -> LoadBalancer {
    LoadBalancer {
        id: row.get("id"),
        arn: row.get("arn"),
        name: row.get("name"),
        dns_name: row.get("dns_name"),
        state: row.get("state"),
        lb_type: row.get("lb_type"),
        scheme: row.get("scheme"),
        vpc_id: row.get("vpc_id"),
        subnets: row.get("subnets"),
        security_groups: row.get("security_groups"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn tg_from_row(row: &Row) -> TargetGroup {
    TargetGroup {
        id: row.get("id"),
        arn: row.get("arn"),
        name: row.get("name"),
        protocol: row.get("protocol"),
        port: row.get("port"),
        vpc_id: row.get("vpc_id"),
        target_type: row.get("target_type"),
        health_check: row.get("health_check"),
        load_balancer_arns: row.get("load_balancer_arns"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn listener_from_row(row: &Row) -> Listener {
    Listener {
        id: row.get("id"),
        arn: row.get("arn"),
        load_balancer_arn: row.get("load_balancer_arn"),
        port: row.get("port"),
        protocol: row.get("protocol"),
        default_actions: row.get("default_actions"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn rule_from_row(row: &Row) -> Rule {
    Rule {
        id: row.get("id"),
        arn: row.get("arn"),
        listener_arn: row.get("listener_arn"),
        priority: row.get("priority"),
        conditions: row.get("conditions"),
        actions: row.get("actions"),
        is_default: row.get("is_default"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn target_from_row(row: &Row) -> TargetHealth {
    TargetHealth {
        target_group_arn: row.get("target_group_arn"),
        target_id: row.get("target_id"),
        port: row.get("port"),
        health_state: row.get("health_state"),
        reason: row.get("reason"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct ElbV2Repo {
    pool: Pool,
}

impl ElbV2Repo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ElbV2Store for ElbV2Repo {
    async fn create_load_balancer(&self, lb: &LoadBalancer) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO load_balancers ({LB_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );
        client
            .execute(
                &sql,
                &[
                    &lb.id,
                    &lb.arn,
                    &lb.name,
                    &lb.dns_name,
                    &lb.state,
                    &lb.lb_type,
                    &lb.scheme,
                    &lb.vpc_id,
                    &lb.subnets,
                    &lb.security_groups,
                    &lb.region,
                    &lb.account_id,
                    &lb.created_at,
                    &lb.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {LB_COLUMNS} FROM load_balancers WHERE name = $1");
        let row = client.query_opt(&sql, &[&name]).await?;
        Ok(row.as_ref().map(lb_from_row))
    }

    async fn get_load_balancer_by_arn(&self, arn: &str) -> Result<Option<LoadBalancer>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {LB_COLUMNS} FROM load_balancers WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(lb_from_row))
    }

    async fn update_load_balancer(&self, lb: &LoadBalancer) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "UPDATE load_balancers SET state = $1, subnets = $2, security_groups = $3, \
                 updated_at = NOW() WHERE arn = $4",
                &[&lb.state, &lb.subnets, &lb.security_groups, &lb.arn],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("load balancer", &lb.name));
        }
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM load_balancers WHERE arn = $1", &[&arn])
            .await?;
        if affected == 0 {
            return Err(Error::not_found("load balancer", arn));
        }
        Ok(())
    }

    async fn list_load_balancers(
        &self,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<LoadBalancer>> {
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {LB_COLUMNS}, COUNT(*) OVER() AS full_count FROM load_balancers \
             ORDER BY name ASC LIMIT $1 OFFSET $2"
        );
        let rows = client.query(&sql, &[&limit, &offset]).await?;
        Ok(super::page_from_rows(&rows, offset, lb_from_row))
    }

    async fn create_target_group(&self, tg: &TargetGroup) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO target_groups ({TG_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        client
            .execute(
                &sql,
                &[
                    &tg.id,
                    &tg.arn,
                    &tg.name,
                    &tg.protocol,
                    &tg.port,
                    &tg.vpc_id,
                    &tg.target_type,
                    &tg.health_check,
                    &tg.load_balancer_arns,
                    &tg.region,
                    &tg.account_id,
                    &tg.created_at,
                    &tg.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_target_group(&self, name: &str) -> Result<Option<TargetGroup>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {TG_COLUMNS} FROM target_groups WHERE name = $1");
        let row = client.query_opt(&sql, &[&name]).await?;
        Ok(row.as_ref().map(tg_from_row))
    }

    async fn get_target_group_by_arn(&self, arn: &str) -> Result<Option<TargetGroup>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {TG_COLUMNS} FROM target_groups WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(tg_from_row))
    }

    async fn update_target_group(&self, tg: &TargetGroup) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "UPDATE target_groups SET health_check = $1, load_balancer_arns = $2, \
                 updated_at = NOW() WHERE arn = $3",
                &[&tg.health_check, &tg.load_balancer_arns, &tg.arn],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("target group", &tg.name));
        }
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM target_groups WHERE arn = $1", &[&arn])
            .await?;
        if affected == 0 {
            return Err(Error::not_found("target group", arn));
        }
        Ok(())
    }

    async fn list_target_groups(&self, limit: i64, token: Option<&str>) -> Result<Page<TargetGroup>> {
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {TG_COLUMNS}, COUNT(*) OVER() AS full_count FROM target_groups \
             ORDER BY name ASC LIMIT $1 OFFSET $2"
        );
        let rows = client.query(&sql, &[&limit, &offset]).await?;
        Ok(super::page_from_rows(&rows, offset, tg_from_row))
    }

    async fn create_listener(&self, listener: &Listener) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO listeners ({LISTENER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        client
            .execute(
                &sql,
                &[
                    &listener.id,
                    &listener.arn,
                    &listener.load_balancer_arn,
                    &listener.port,
                    &listener.protocol,
                    &listener.default_actions,
                    &listener.created_at,
                    &listener.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_listener(&self, arn: &str) -> Result<Option<Listener>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {LISTENER_COLUMNS} FROM listeners WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(listener_from_row))
    }

    async fn delete_listener(&self, arn: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM listeners WHERE arn = $1", &[&arn])
            .await?;
        if affected == 0 {
            return Err(Error::not_found("listener", arn));
        }
        Ok(())
    }

    async fn list_listeners(&self, load_balancer_arn: &str) -> Result<Vec<Listener>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {LISTENER_COLUMNS} FROM listeners WHERE load_balancer_arn = $1 \
             ORDER BY port ASC"
        );
        let rows = client.query(&sql, &[&load_balancer_arn]).await?;
        Ok(rows.iter().map(listener_from_row).collect())
    }

    async fn create_rule(&self, rule: &Rule) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO rules ({RULE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        client
            .execute(
                &sql,
                &[
                    &rule.id,
                    &rule.arn,
                    &rule.listener_arn,
                    &rule.priority,
                    &rule.conditions,
                    &rule.actions,
                    &rule.is_default,
                    &rule.created_at,
                    &rule.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_rule(&self, arn: &str) -> Result<Option<Rule>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(rule_from_row))
    }

    async fn delete_rule(&self, arn: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM rules WHERE arn = $1", &[&arn])
            .await?;
        if affected == 0 {
            return Err(Error::not_found("rule", arn));
        }
        Ok(())
    }

    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<Rule>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE listener_arn = $1 ORDER BY priority ASC"
        );
        let rows = client.query(&sql, &[&listener_arn]).await?;
        Ok(rows.iter().map(rule_from_row).collect())
    }

    async fn register_targets(&self, targets: &[TargetHealth]) -> Result<()> {
        let client = self.pool.get().await?;
        for target in targets {
            let sql = format!(
                "INSERT INTO targets ({TARGET_COLUMNS}) VALUES \
                 ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (target_group_arn, target_id) \
                 DO UPDATE SET port = EXCLUDED.port, health_state = EXCLUDED.health_state, \
                 reason = EXCLUDED.reason, description = EXCLUDED.description, \
                 updated_at = EXCLUDED.updated_at"
            );
            client
                .execute(
                    &sql,
                    &[
                        &target.target_group_arn,
                        &target.target_id,
                        &target.port,
                        &target.health_state,
                        &target.reason,
                        &target.description,
                        &target.created_at,
                        &target.updated_at,
                    ],
                )
                .await?;
        }
        Ok(())
    }

    async fn deregister_targets(
        &self,
        target_group_arn: &str,
        target_ids: &[String],
    ) -> Result<()> {
        if target_ids.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;
        client
            .execute(
                "DELETE FROM targets WHERE target_group_arn = $1 AND target_id = ANY($2)",
                &[&target_group_arn, &target_ids],
            )
            .await?;
        Ok(())
    }

    async fn list_targets(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {TARGET_COLUMNS} FROM targets WHERE target_group_arn = $1 \
             ORDER BY target_id ASC"
        );
        let rows = client.query(&sql, &[&target_group_arn]).await?;
        Ok(rows.iter().map(target_from_row).collect())
    }
}
