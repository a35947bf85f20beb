use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{
    models::{Listener, LoadBalancer, Rule, TargetGroup, TargetHealth},
    pagination,
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

pub struct ElbV2Repo {
    pool: SqlitePool,
}

impl ElbV2Repo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ElbV2Store for ElbV2Repo {
    async fn create_load_balancer(&self, lb: &LoadBalancer) -> Result<()> {
        let sql = format!(
            "INSERT INTO load_balancers ({LB_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(lb.id.as_str())
            .bind(lb.arn.as_str())
            .bind(lb.name.as_str())
            .bind(lb.dns_name.as_str())
            .bind(lb.state.as_str())
            .bind(lb.lb_type.as_str())
            .bind(lb.scheme.as_str())
            .bind(lb.vpc_id.as_deref())
            .bind(lb.subnets.as_deref())
            .bind(lb.security_groups.as_deref())
            .bind(lb.region.as_str())
            .bind(lb.account_id.as_str())
            .bind(lb.created_at)
            .bind(lb.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_load_balancer(&self, name: &str) -> Result<Option<LoadBalancer>> {
        let sql = format!("SELECT {LB_COLUMNS} FROM load_balancers WHERE name = ?");
        let lb = sqlx::query_as::<_, LoadBalancer>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lb)
    }

    async fn get_load_balancer_by_arn(&self, arn: &str) -> Result<Option<LoadBalancer>> {
        let sql = format!("SELECT {LB_COLUMNS} FROM load_balancers WHERE arn = ?");
        let lb = sqlx::query_as::<_, LoadBalancer>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lb)
    }

    async fn update_load_balancer(&self, lb: &LoadBalancer) -> Result<()> {
        let result = sqlx::query(
            "UPDATE load_balancers SET state = ?, subnets = ?, security_groups = ?, updated_at = ? \
             WHERE arn = ?",
        )
        .bind(lb.state.as_str())
        .bind(lb.subnets.as_deref())
        .bind(lb.security_groups.as_deref())
        .bind(chrono::Utc::now())
        .bind(lb.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("load balancer", &lb.name));
        }
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM load_balancers WHERE arn = ?")
            .bind(arn)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("load balancer", arn));
        }
        Ok(())
    }

    async fn list_load_balancers(
        &self,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<LoadBalancer>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let sql = format!(
            "SELECT {LB_COLUMNS}, COUNT(*) OVER() AS full_count FROM load_balancers \
             ORDER BY name ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        super::page_from_rows(&rows, offset)
    }

    async fn create_target_group(&self, tg: &TargetGroup) -> Result<()> {
        let sql = format!(
            "INSERT INTO target_groups ({TG_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(tg.id.as_str())
            .bind(tg.arn.as_str())
            .bind(tg.name.as_str())
            .bind(tg.protocol.as_str())
            .bind(tg.port)
            .bind(tg.vpc_id.as_deref())
            .bind(tg.target_type.as_str())
            .bind(tg.health_check.as_deref())
            .bind(tg.load_balancer_arns.as_deref())
            .bind(tg.region.as_str())
            .bind(tg.account_id.as_str())
            .bind(tg.created_at)
            .bind(tg.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_target_group(&self, name: &str) -> Result<Option<TargetGroup>> {
        let sql = format!("SELECT {TG_COLUMNS} FROM target_groups WHERE name = ?");
        let tg = sqlx::query_as::<_, TargetGroup>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tg)
    }

    async fn get_target_group_by_arn(&self, arn: &str) -> Result<Option<TargetGroup>> {
        let sql = format!("SELECT {TG_COLUMNS} FROM target_groups WHERE arn = ?");
        let tg = sqlx::query_as::<_, TargetGroup>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tg)
    }

    async fn update_target_group(&self, tg: &TargetGroup) -> Result<()> {
        let result = sqlx::query(
            "UPDATE target_groups SET health_check = ?, load_balancer_arns = ?, updated_at = ? \
             WHERE arn = ?",
        )
        .bind(tg.health_check.as_deref())
        .bind(tg.load_balancer_arns.as_deref())
        .bind(chrono::Utc::now())
        .bind(tg.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("target group", &tg.name));
        }
        Ok(())
    }

    async fn delete_target_group(&self, arn: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM target_groups WHERE arn = ?")
            .bind(arn)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("target group", arn));
        }
        Ok(())
    }

    async fn list_target_groups(&self, limit: i64, token: Option<&str>) -> Result<Page<TargetGroup>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let sql = format!(
            "SELECT {TG_COLUMNS}, COUNT(*) OVER() AS full_count FROM target_groups \
             ORDER BY name ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        super::page_from_rows(&rows, offset)
    }

    async fn create_listener(&self, listener: &Listener) -> Result<()> {
        let sql = format!(
            "INSERT INTO listeners ({LISTENER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(listener.id.as_str())
            .bind(listener.arn.as_str())
            .bind(listener.load_balancer_arn.as_str())
            .bind(listener.port)
            .bind(listener.protocol.as_str())
            .bind(listener.default_actions.as_deref())
            .bind(listener.created_at)
            .bind(listener.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_listener(&self, arn: &str) -> Result<Option<Listener>> {
        let sql = format!("SELECT {LISTENER_COLUMNS} FROM listeners WHERE arn = ?");
        let listener = sqlx::query_as::<_, Listener>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(listener)
    }

    async fn delete_listener(&self, arn: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM listeners WHERE arn = ?")
            .bind(arn)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("listener", arn));
        }
        Ok(())
    }

    async fn list_listeners(&self, load_balancer_arn: &str) -> Result<Vec<Listener>> {
        let sql = format!(
            "SELECT {LISTENER_COLUMNS} FROM listeners WHERE load_balancer_arn = ? ORDER BY port ASC"
        );
        let listeners = sqlx::query_as::<_, Listener>(&sql)
            .bind(load_balancer_arn)
            .fetch_all(&self.pool)
            .await?;
        Ok(listeners)
    }

    async fn create_rule(&self, rule: &Rule) -> Result<()> {
        let sql = format!("INSERT INTO rules ({RULE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)");
        sqlx::query(&sql)
            .bind(rule.id.as_str())
            .bind(rule.arn.as_str())
            .bind(rule.listener_arn.as_str())
            .bind(rule.priority)
            .bind(rule.conditions.as_deref())
            .bind(rule.actions.as_deref())
            .bind(rule.is_default)
            .bind(rule.created_at)
            .bind(rule.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_rule(&self, arn: &str) -> Result<Option<Rule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE arn = ?");
        let rule = sqlx::query_as::<_, Rule>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rule)
    }

    async fn delete_rule(&self, arn: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM rules WHERE arn = ?")
            .bind(arn)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("rule", arn));
        }
        Ok(())
    }

    async fn list_rules(&self, listener_arn: &str) -> Result<Vec<Rule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM rules WHERE listener_arn = ? ORDER BY priority ASC"
        );
        let rules = sqlx::query_as::<_, Rule>(&sql)
            .bind(listener_arn)
            .fetch_all(&self.pool)
            .await?;
        Ok(rules)
    }

    async fn register_targets(&self, targets: &[TargetHealth]) -> Result<()> {
        for target in targets {
            let sql = format!(
                "INSERT INTO targets ({TARGET_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (target_group_arn, target_id) \
                 DO UPDATE SET port = excluded.port, health_state = excluded.health_state, \
                 reason = excluded.reason, description = excluded.description, \
                 updated_at = excluded.updated_at"
            );
            sqlx::query(&sql)
                .bind(target.target_group_arn.as_str())
                .bind(target.target_id.as_str())
                .bind(target.port)
                .bind(target.health_state.as_str())
                .bind(target.reason.as_deref())
                .bind(target.description.as_deref())
                .bind(target.created_at)
                .bind(target.updated_at)
                .execute(&self.pool)
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
        let placeholders = vec!["?"; target_ids.len()].join(", ");
        let sql = format!(
            "DELETE FROM targets WHERE target_group_arn = ? AND target_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(target_group_arn);
        for id in target_ids {
            query = query.bind(id.as_str());
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn list_targets(&self, target_group_arn: &str) -> Result<Vec<TargetHealth>> {
        let sql = format!(
            "SELECT {TARGET_COLUMNS} FROM targets WHERE target_group_arn = ? ORDER BY target_id ASC"
        );
        let targets = sqlx::query_as::<_, TargetHealth>(&sql)
            .bind(target_group_arn)
            .fetch_all(&self.pool)
            .await?;
        Ok(targets)
    }
}
