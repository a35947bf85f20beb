use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::{Listener, LoadBalancer, Rule, TargetGroup, TargetHealth};
use serde::{Deserialize, Serialize};

use super::{EcsApi, epoch, from_column};
use crate::arn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    #[serde(default)]
    pub subnets: Option<Vec<String>>,
    #[serde(default)]
    pub security_groups: Option<Vec<String>>,
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default, rename = "type")]
    pub lb_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeLoadBalancersRequest {
    pub load_balancer_arns: Option<Vec<String>>,
    pub names: Option<Vec<String>>,
    pub page_size: Option<i64>,
    pub marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteLoadBalancerRequest {
    pub load_balancer_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetGroupRequest {
    pub name: String,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub vpc_id: Option<String>,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub health_check_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeTargetGroupsRequest {
    pub target_group_arns: Option<Vec<String>>,
    pub names: Option<Vec<String>>,
    pub page_size: Option<i64>,
    pub marker: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTargetGroupRequest {
    pub target_group_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateListenerRequest {
    pub load_balancer_arn: String,
    pub port: i32,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub default_actions: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeListenersRequest {
    #[serde(default)]
    pub load_balancer_arn: Option<String>,
    #[serde(default)]
    pub listener_arns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteListenerRequest {
    pub listener_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    pub listener_arn: String,
    pub priority: i32,
    pub conditions: serde_json::Value,
    pub actions: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeRulesRequest {
    #[serde(default)]
    pub listener_arn: Option<String>,
    #[serde(default)]
    pub rule_arns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRuleRequest {
    pub rule_arn: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescription {
    pub id: String,
    #[serde(default)]
    pub port: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTargetsRequest {
    pub target_group_arn: String,
    pub targets: Vec<TargetDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterTargetsRequest {
    pub target_group_arn: String,
    pub targets: Vec<TargetDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTargetHealthRequest {
    pub target_group_arn: String,
    #[serde(default)]
    pub targets: Option<Vec<TargetDescription>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLoadBalancer {
    pub load_balancer_arn: String,
    pub load_balancer_name: String,
    #[serde(rename = "dNSName")]
    pub dns_name: String,
    pub state: serde_json::Value,
    #[serde(rename = "type")]
    pub lb_type: String,
    pub scheme: String,
    pub created_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zones: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<serde_json::Value>,
}

impl WireLoadBalancer {
    fn from_model(lb: &LoadBalancer) -> Self {
        Self {
            load_balancer_arn: lb.arn.clone(),
            load_balancer_name: lb.name.clone(),
            dns_name: lb.dns_name.clone(),
            state: serde_json::json!({"code": lb.state}),
            lb_type: lb.lb_type.clone(),
            scheme: lb.scheme.clone(),
            created_time: epoch(lb.created_at),
            vpc_id: lb.vpc_id.clone(),
            availability_zones: from_column(&lb.subnets).map(|subnets| {
                serde_json::json!(
                    subnets
                        .as_array()
                        .map(|list| {
                            list.iter()
                                .map(|s| serde_json::json!({"subnetId": s}))
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default()
                )
            }),
            security_groups: from_column(&lb.security_groups),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTargetGroup {
    pub target_group_arn: String,
    pub target_group_name: String,
    pub protocol: String,
    pub port: i32,
    pub target_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
    pub load_balancer_arns: Vec<String>,
}

impl WireTargetGroup {
    fn from_model(tg: &TargetGroup) -> Self {
        Self {
            target_group_arn: tg.arn.clone(),
            target_group_name: tg.name.clone(),
            protocol: tg.protocol.clone(),
            port: tg.port,
            target_type: tg.target_type.clone(),
            vpc_id: tg.vpc_id.clone(),
            health_check_path: from_column(&tg.health_check)
                .and_then(|hc| hc.get("path").and_then(|p| p.as_str()).map(String::from)),
            load_balancer_arns: from_column(&tg.load_balancer_arns)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireListener {
    pub listener_arn: String,
    pub load_balancer_arn: String,
    pub port: i32,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_actions: Option<serde_json::Value>,
}

impl WireListener {
    fn from_model(l: &Listener) -> Self {
        Self {
            listener_arn: l.arn.clone(),
            load_balancer_arn: l.load_balancer_arn.clone(),
            port: l.port,
            protocol: l.protocol.clone(),
            default_actions: from_column(&l.default_actions),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRule {
    pub rule_arn: String,
    pub priority: String,
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<serde_json::Value>,
}

impl WireRule {
    fn from_model(r: &Rule) -> Self {
        Self {
            rule_arn: r.arn.clone(),
            priority: if r.is_default {
                "default".to_string()
            } else {
                r.priority.to_string()
            },
            is_default: r.is_default,
            conditions: from_column(&r.conditions),
            actions: from_column(&r.actions),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancersResponse {
    pub load_balancers: Vec<WireLoadBalancer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupsResponse {
    pub target_groups: Vec<WireTargetGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_marker: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenersResponse {
    pub listeners: Vec<WireListener>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesResponse {
    pub rules: Vec<WireRule>,
}

#[derive(Debug, Serialize)]
pub struct EmptyResponse {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetHealthDescription {
    pub target: TargetOut,
    pub target_health: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOut {
    pub id: String,
    pub port: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTargetHealthResponse {
    pub target_health_descriptions: Vec<TargetHealthDescription>,
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..16].to_string()
}

impl EcsApi {
    pub async fn create_load_balancer(
        &self,
        req: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancersResponse> {
        arn::validate_name("load balancer", &req.name)?;
        if self.storage.elbv2().get_load_balancer(&req.name).await?.is_some() {
            return Err(Error::already_exists("load balancer", &req.name));
        }
        let id = short_id();
        let now = Utc::now();
        let lb = LoadBalancer {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.load_balancer(&req.name, &id),
            dns_name: format!("{}-{id}.elb.{}.localhost", req.name, self.region),
            name: req.name,
            state: "active".to_string(),
            lb_type: req.lb_type.unwrap_or_else(|| "application".to_string()),
            scheme: req.scheme.unwrap_or_else(|| "internet-facing".to_string()),
            vpc_id: Some("vpc-00000000".to_string()),
            subnets: req
                .subnets
                .map(|s| serde_json::to_string(&s))
                .transpose()?,
            security_groups: req
                .security_groups
                .map(|s| serde_json::to_string(&s))
                .transpose()?,
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.elbv2().create_load_balancer(&lb).await?;
        Ok(LoadBalancersResponse {
            load_balancers: vec![WireLoadBalancer::from_model(&lb)],
            next_marker: None,
        })
    }

    pub async fn describe_load_balancers(
        &self,
        req: DescribeLoadBalancersRequest,
    ) -> Result<LoadBalancersResponse> {
        let store = self.storage.elbv2();
        if let Some(arns) = req.load_balancer_arns.filter(|a| !a.is_empty()) {
            let mut load_balancers = Vec::new();
            for lb_arn in &arns {
                let lb = store
                    .get_load_balancer_by_arn(lb_arn)
                    .await?
                    .ok_or_else(|| Error::not_found("load balancer", lb_arn))?;
                load_balancers.push(WireLoadBalancer::from_model(&lb));
            }
            return Ok(LoadBalancersResponse {
                load_balancers,
                next_marker: None,
            });
        }
        if let Some(names) = req.names.filter(|n| !n.is_empty()) {
            let mut load_balancers = Vec::new();
            for name in &names {
                let lb = store
                    .get_load_balancer(name)
                    .await?
                    .ok_or_else(|| Error::not_found("load balancer", name))?;
                load_balancers.push(WireLoadBalancer::from_model(&lb));
            }
            return Ok(LoadBalancersResponse {
                load_balancers,
                next_marker: None,
            });
        }
        let (limit, _) =
            kecs_storage::pagination::page_window(req.page_size, req.marker.as_deref())?;
        let (all, next_marker) = store
            .list_load_balancers(limit, req.marker.as_deref())
            .await?;
        Ok(LoadBalancersResponse {
            load_balancers: all.iter().map(WireLoadBalancer::from_model).collect(),
            next_marker,
        })
    }

    pub async fn delete_load_balancer(
        &self,
        req: DeleteLoadBalancerRequest,
    ) -> Result<EmptyResponse> {
        // Listeners (and their rules) go with the load balancer.
        let listeners = self
            .storage
            .elbv2()
            .list_listeners(&req.load_balancer_arn)
            .await?;
        for listener in listeners {
            for rule in self.storage.elbv2().list_rules(&listener.arn).await? {
                self.storage.elbv2().delete_rule(&rule.arn).await?;
            }
            self.storage.elbv2().delete_listener(&listener.arn).await?;
        }
        self.storage
            .elbv2()
            .delete_load_balancer(&req.load_balancer_arn)
            .await?;
        Ok(EmptyResponse {})
    }

    pub async fn create_target_group(
        &self,
        req: CreateTargetGroupRequest,
    ) -> Result<TargetGroupsResponse> {
        arn::validate_name("target group", &req.name)?;
        if self.storage.elbv2().get_target_group(&req.name).await?.is_some() {
            return Err(Error::already_exists("target group", &req.name));
        }
        let now = Utc::now();
        let health_check = serde_json::json!({
            "protocol": req.protocol.as_deref().unwrap_or("HTTP"),
            "path": req.health_check_path.as_deref().unwrap_or("/"),
            "intervalSeconds": 30,
            "timeoutSeconds": 5,
            "healthyThresholdCount": 5,
            "unhealthyThresholdCount": 2,
        });
        let tg = TargetGroup {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.target_group(&req.name, &short_id()),
            name: req.name,
            protocol: req.protocol.unwrap_or_else(|| "HTTP".to_string()),
            port: req.port.unwrap_or(80),
            vpc_id: req.vpc_id.or_else(|| Some("vpc-00000000".to_string())),
            target_type: req.target_type.unwrap_or_else(|| "ip".to_string()),
            health_check: Some(health_check.to_string()),
            load_balancer_arns: Some("[]".to_string()),
            region: self.region.clone(),
            account_id: self.account_id.clone(),
            created_at: now,
            updated_at: now,
        };
        self.storage.elbv2().create_target_group(&tg).await?;
        Ok(TargetGroupsResponse {
            target_groups: vec![WireTargetGroup::from_model(&tg)],
            next_marker: None,
        })
    }

    pub async fn describe_target_groups(
        &self,
        req: DescribeTargetGroupsRequest,
    ) -> Result<TargetGroupsResponse> {
        let store = self.storage.elbv2();
        if let Some(arns) = req.target_group_arns.filter(|a| !a.is_empty()) {
            let mut target_groups = Vec::new();
            for tg_arn in &arns {
                let tg = store
                    .get_target_group_by_arn(tg_arn)
                    .await?
                    .ok_or_else(|| Error::not_found("target group", tg_arn))?;
                target_groups.push(WireTargetGroup::from_model(&tg));
            }
            return Ok(TargetGroupsResponse {
                target_groups,
                next_marker: None,
            });
        }
        if let Some(names) = req.names.filter(|n| !n.is_empty()) {
            let mut target_groups = Vec::new();
            for name in &names {
                let tg = store
                    .get_target_group(name)
                    .await?
                    .ok_or_else(|| Error::not_found("target group", name))?;
                target_groups.push(WireTargetGroup::from_model(&tg));
            }
            return Ok(TargetGroupsResponse {
                target_groups,
                next_marker: None,
            });
        }
        let (limit, _) =
            kecs_storage::pagination::page_window(req.page_size, req.marker.as_deref())?;
        let (all, next_marker) = store.list_target_groups(limit, req.marker.as_deref()).await?;
        Ok(TargetGroupsResponse {
            target_groups: all.iter().map(WireTargetGroup::from_model).collect(),
            next_marker,
        })
    }

    pub async fn delete_target_group(&self, req: DeleteTargetGroupRequest) -> Result<EmptyResponse> {
        self.storage
            .elbv2()
            .delete_target_group(&req.target_group_arn)
            .await?;
        Ok(EmptyResponse {})
    }

    /// Creating a listener also materializes its default rule.
    pub async fn create_listener(&self, req: CreateListenerRequest) -> Result<ListenersResponse> {
        let lb = self
            .storage
            .elbv2()
            .get_load_balancer_by_arn(&req.load_balancer_arn)
            .await?
            .ok_or_else(|| Error::not_found("load balancer", &req.load_balancer_arn))?;
        let lb_id = arn::resource_name(&lb.arn).to_string();
        let listener_id = short_id();
        let now = Utc::now();
        let listener = Listener {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.listener(&lb.name, &lb_id, &listener_id),
            load_balancer_arn: lb.arn.clone(),
            port: req.port,
            protocol: req.protocol.unwrap_or_else(|| "HTTP".to_string()),
            default_actions: req.default_actions.as_ref().map(|a| a.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.storage.elbv2().create_listener(&listener).await?;

        let default_rule = Rule {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.rule(&lb.name, &lb_id, &listener_id, &short_id()),
            listener_arn: listener.arn.clone(),
            priority: 0,
            conditions: Some("[]".to_string()),
            actions: listener.default_actions.clone(),
            is_default: true,
            created_at: now,
            updated_at: now,
        };
        self.storage.elbv2().create_rule(&default_rule).await?;

        // Wire the target groups referenced by forward actions back to the
        // load balancer so their health reads as in-service.
        if let Some(actions) = req.default_actions.as_ref().and_then(|a| a.as_array()) {
            for action in actions {
                if let Some(tg_arn) = action.get("targetGroupArn").and_then(|v| v.as_str()) {
                    if let Some(mut tg) =
                        self.storage.elbv2().get_target_group_by_arn(tg_arn).await?
                    {
                        let mut arns: Vec<String> = from_column(&tg.load_balancer_arns)
                            .and_then(|v| serde_json::from_value(v).ok())
                            .unwrap_or_default();
                        if !arns.contains(&lb.arn) {
                            arns.push(lb.arn.clone());
                            tg.load_balancer_arns = Some(serde_json::to_string(&arns)?);
                            self.storage.elbv2().update_target_group(&tg).await?;
                        }
                    }
                }
            }
        }

        Ok(ListenersResponse {
            listeners: vec![WireListener::from_model(&listener)],
        })
    }

    pub async fn describe_listeners(
        &self,
        req: DescribeListenersRequest,
    ) -> Result<ListenersResponse> {
        let store = self.storage.elbv2();
        let listeners = match (req.listener_arns, req.load_balancer_arn) {
            (Some(arns), _) if !arns.is_empty() => {
                let mut found = Vec::new();
                for listener_arn in &arns {
                    let listener = store
                        .get_listener(listener_arn)
                        .await?
                        .ok_or_else(|| Error::not_found("listener", listener_arn))?;
                    found.push(listener);
                }
                found
            }
            (_, Some(lb_arn)) => store.list_listeners(&lb_arn).await?,
            _ => {
                return Err(Error::invalid_input(
                    "either loadBalancerArn or listenerArns is required",
                ));
            }
        };
        Ok(ListenersResponse {
            listeners: listeners.iter().map(WireListener::from_model).collect(),
        })
    }

    pub async fn delete_listener(&self, req: DeleteListenerRequest) -> Result<EmptyResponse> {
        for rule in self.storage.elbv2().list_rules(&req.listener_arn).await? {
            self.storage.elbv2().delete_rule(&rule.arn).await?;
        }
        self.storage.elbv2().delete_listener(&req.listener_arn).await?;
        Ok(EmptyResponse {})
    }

    pub async fn create_rule(&self, req: CreateRuleRequest) -> Result<RulesResponse> {
        let listener = self
            .storage
            .elbv2()
            .get_listener(&req.listener_arn)
            .await?
            .ok_or_else(|| Error::not_found("listener", &req.listener_arn))?;
        if !(1..=50_000).contains(&req.priority) {
            return Err(Error::invalid_input("rule priority must be 1-50000"));
        }
        let existing = self.storage.elbv2().list_rules(&listener.arn).await?;
        if existing.iter().any(|r| r.priority == req.priority) {
            return Err(Error::already_exists("rule priority", &req.priority.to_string()));
        }
        let lb = self
            .storage
            .elbv2()
            .get_load_balancer_by_arn(&listener.load_balancer_arn)
            .await?
            .ok_or_else(|| Error::not_found("load balancer", &listener.load_balancer_arn))?;
        let now = Utc::now();
        let rule = Rule {
            id: uuid::Uuid::new_v4().to_string(),
            arn: self.arn.rule(
                &lb.name,
                arn::resource_name(&lb.arn),
                arn::resource_name(&listener.arn),
                &short_id(),
            ),
            listener_arn: listener.arn,
            priority: req.priority,
            conditions: Some(req.conditions.to_string()),
            actions: Some(req.actions.to_string()),
            is_default: false,
            created_at: now,
            updated_at: now,
        };
        self.storage.elbv2().create_rule(&rule).await?;
        Ok(RulesResponse {
            rules: vec![WireRule::from_model(&rule)],
        })
    }

    pub async fn describe_rules(&self, req: DescribeRulesRequest) -> Result<RulesResponse> {
        let store = self.storage.elbv2();
        let rules = match (req.rule_arns, req.listener_arn) {
            (Some(arns), _) if !arns.is_empty() => {
                let mut found = Vec::new();
                for rule_arn in &arns {
                    let rule = store
                        .get_rule(rule_arn)
                        .await?
                        .ok_or_else(|| Error::not_found("rule", rule_arn))?;
                    found.push(rule);
                }
                found
            }
            (_, Some(listener_arn)) => store.list_rules(&listener_arn).await?,
            _ => {
                return Err(Error::invalid_input(
                    "either listenerArn or ruleArns is required",
                ));
            }
        };
        Ok(RulesResponse {
            rules: rules.iter().map(WireRule::from_model).collect(),
        })
    }

    pub async fn delete_rule(&self, req: DeleteRuleRequest) -> Result<EmptyResponse> {
        let rule = self
            .storage
            .elbv2()
            .get_rule(&req.rule_arn)
            .await?
            .ok_or_else(|| Error::not_found("rule", &req.rule_arn))?;
        if rule.is_default {
            return Err(Error::invalid_input("the default rule cannot be deleted"));
        }
        self.storage.elbv2().delete_rule(&req.rule_arn).await?;
        Ok(EmptyResponse {})
    }

    pub async fn register_targets(&self, req: RegisterTargetsRequest) -> Result<EmptyResponse> {
        let tg = self
            .storage
            .elbv2()
            .get_target_group_by_arn(&req.target_group_arn)
            .await?
            .ok_or_else(|| Error::not_found("target group", &req.target_group_arn))?;
        let now = Utc::now();
        let targets: Vec<TargetHealth> = req
            .targets
            .iter()
            .map(|t| TargetHealth {
                target_group_arn: tg.arn.clone(),
                target_id: t.id.clone(),
                port: t.port.unwrap_or(tg.port),
                health_state: "healthy".to_string(),
                reason: None,
                description: None,
                created_at: now,
                updated_at: now,
            })
            .collect();
        self.storage.elbv2().register_targets(&targets).await?;
        Ok(EmptyResponse {})
    }

    pub async fn deregister_targets(&self, req: DeregisterTargetsRequest) -> Result<EmptyResponse> {
        let ids: Vec<String> = req.targets.iter().map(|t| t.id.clone()).collect();
        self.storage
            .elbv2()
            .deregister_targets(&req.target_group_arn, &ids)
            .await?;
        Ok(EmptyResponse {})
    }

    /// Registered targets report healthy; a target group no load balancer
    /// references reports its targets as unused.
    pub async fn describe_target_health(
        &self,
        req: DescribeTargetHealthRequest,
    ) -> Result<DescribeTargetHealthResponse> {
        let tg = self
            .storage
            .elbv2()
            .get_target_group_by_arn(&req.target_group_arn)
            .await?
            .ok_or_else(|| Error::not_found("target group", &req.target_group_arn))?;
        let attached = from_column(&tg.load_balancer_arns)
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .is_some_and(|arns| !arns.is_empty());

        let mut targets = self.storage.elbv2().list_targets(&tg.arn).await?;
        if let Some(filter) = req.targets.filter(|t| !t.is_empty()) {
            targets.retain(|t| filter.iter().any(|f| f.id == t.target_id));
        }
        let target_health_descriptions = targets
            .iter()
            .map(|t| {
                let state = if attached {
                    t.health_state.clone()
                } else {
                    "unused".to_string()
                };
                let reason = (state == "unused").then_some("Target.NotInUse");
                TargetHealthDescription {
                    target: TargetOut {
                        id: t.target_id.clone(),
                        port: t.port,
                    },
                    target_health: match reason {
                        Some(reason) => serde_json::json!({"state": state, "reason": reason}),
                        None => serde_json::json!({"state": state}),
                    },
                }
            })
            .collect();
        Ok(DescribeTargetHealthResponse {
            target_health_descriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::api;
    use super::*;

    #[tokio::test]
    async fn load_balancer_listener_rule_graph() {
        let api = api().await;
        let created = api
            .create_load_balancer(CreateLoadBalancerRequest {
                name: "web".to_string(),
                subnets: Some(vec!["subnet-1".to_string()]),
                security_groups: None,
                scheme: None,
                lb_type: None,
            })
            .await
            .unwrap();
        let lb = &created.load_balancers[0];
        assert!(lb.load_balancer_arn.contains(":loadbalancer/app/web/"));
        assert_eq!(lb.state["code"], "active");

        // Names are unique.
        assert!(matches!(
            api.create_load_balancer(CreateLoadBalancerRequest {
                name: "web".to_string(),
                subnets: None,
                security_groups: None,
                scheme: None,
                lb_type: None,
            })
            .await
            .unwrap_err(),
            Error::AlreadyExists(_)
        ));

        let tg = api
            .create_target_group(CreateTargetGroupRequest {
                name: "web-tg".to_string(),
                protocol: None,
                port: Some(8080),
                vpc_id: None,
                target_type: None,
                health_check_path: Some("/healthz".to_string()),
            })
            .await
            .unwrap();
        let tg_arn = tg.target_groups[0].target_group_arn.clone();

        let listeners = api
            .create_listener(CreateListenerRequest {
                load_balancer_arn: lb.load_balancer_arn.clone(),
                port: 80,
                protocol: None,
                default_actions: Some(serde_json::json!([
                    {"type": "forward", "targetGroupArn": tg_arn}
                ])),
            })
            .await
            .unwrap();
        let listener_arn = listeners.listeners[0].listener_arn.clone();

        // The default rule came with the listener.
        let rules = api
            .describe_rules(DescribeRulesRequest {
                listener_arn: Some(listener_arn.clone()),
                rule_arns: None,
            })
            .await
            .unwrap();
        assert_eq!(rules.rules.len(), 1);
        assert!(rules.rules[0].is_default);
        assert_eq!(rules.rules[0].priority, "default");

        let rule = api
            .create_rule(CreateRuleRequest {
                listener_arn: listener_arn.clone(),
                priority: 10,
                conditions: serde_json::json!([
                    {"field": "path-pattern", "values": ["/api/*"]}
                ]),
                actions: serde_json::json!([{"type": "forward", "targetGroupArn": "x"}]),
            })
            .await
            .unwrap();
        assert_eq!(rule.rules[0].priority, "10");

        // Duplicate priorities conflict; the default rule cannot be deleted.
        assert!(matches!(
            api.create_rule(CreateRuleRequest {
                listener_arn: listener_arn.clone(),
                priority: 10,
                conditions: serde_json::json!([]),
                actions: serde_json::json!([]),
            })
            .await
            .unwrap_err(),
            Error::AlreadyExists(_)
        ));
        let default_rule_arn = rules.rules[0].rule_arn.clone();
        assert!(matches!(
            api.delete_rule(DeleteRuleRequest {
                rule_arn: default_rule_arn
            })
            .await
            .unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn target_health_reflects_load_balancer_attachment() {
        let api = api().await;
        let tg = api
            .create_target_group(CreateTargetGroupRequest {
                name: "api-tg".to_string(),
                protocol: None,
                port: Some(8080),
                vpc_id: None,
                target_type: None,
                health_check_path: None,
            })
            .await
            .unwrap();
        let tg_arn = tg.target_groups[0].target_group_arn.clone();

        api.register_targets(RegisterTargetsRequest {
            target_group_arn: tg_arn.clone(),
            targets: vec![TargetDescription {
                id: "10.0.0.5".to_string(),
                port: None,
            }],
        })
        .await
        .unwrap();

        // No load balancer references the group yet: unused.
        let health = api
            .describe_target_health(DescribeTargetHealthRequest {
                target_group_arn: tg_arn.clone(),
                targets: None,
            })
            .await
            .unwrap();
        assert_eq!(health.target_health_descriptions.len(), 1);
        assert_eq!(
            health.target_health_descriptions[0].target_health["state"],
            "unused"
        );
        assert_eq!(health.target_health_descriptions[0].target.port, 8080);

        // Attach via a listener's forward action: healthy.
        let lb = api
            .create_load_balancer(CreateLoadBalancerRequest {
                name: "api".to_string(),
                subnets: None,
                security_groups: None,
                scheme: None,
                lb_type: None,
            })
            .await
            .unwrap();
        api.create_listener(CreateListenerRequest {
            load_balancer_arn: lb.load_balancers[0].load_balancer_arn.clone(),
            port: 80,
            protocol: None,
            default_actions: Some(serde_json::json!([
                {"type": "forward", "targetGroupArn": tg_arn}
            ])),
        })
        .await
        .unwrap();

        let health = api
            .describe_target_health(DescribeTargetHealthRequest {
                target_group_arn: tg_arn.clone(),
                targets: None,
            })
            .await
            .unwrap();
        assert_eq!(
            health.target_health_descriptions[0].target_health["state"],
            "healthy"
        );

        api.deregister_targets(DeregisterTargetsRequest {
            target_group_arn: tg_arn.clone(),
            targets: vec![TargetDescription {
                id: "10.0.0.5".to_string(),
                port: None,
            }],
        })
        .await
        .unwrap();
        let health = api
            .describe_target_health(DescribeTargetHealthRequest {
                target_group_arn: tg_arn,
                targets: None,
            })
            .await
            .unwrap();
        assert!(health.target_health_descriptions.is_empty());
    }
}
