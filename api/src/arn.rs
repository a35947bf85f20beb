//! ARN synthesis and parsing.
//!
//! ECS ARNs follow `arn:aws:ecs:<region>:<account>:<kind>/<scope>/<name>`;
//! the load-balancer surface uses the analogous `elasticloadbalancing`
//! patterns.

use kecs_common::{Error, Result};

#[derive(Debug, Clone)]
pub struct ArnBuilder {
    region: String,
    account_id: String,
}

impl ArnBuilder {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    fn ecs(&self, suffix: &str) -> String {
        format!("arn:aws:ecs:{}:{}:{suffix}", self.region, self.account_id)
    }

    fn elb(&self, suffix: &str) -> String {
        format!(
            "arn:aws:elasticloadbalancing:{}:{}:{suffix}",
            self.region, self.account_id
        )
    }

    pub fn cluster(&self, name: &str) -> String {
        self.ecs(&format!("cluster/{name}"))
    }

    pub fn service(&self, cluster: &str, name: &str) -> String {
        self.ecs(&format!("service/{cluster}/{name}"))
    }

    pub fn task(&self, cluster: &str, task_id: &str) -> String {
        self.ecs(&format!("task/{cluster}/{task_id}"))
    }

    pub fn task_definition(&self, family: &str, revision: i32) -> String {
        self.ecs(&format!("task-definition/{family}:{revision}"))
    }

    pub fn task_set(&self, cluster: &str, service: &str, id: &str) -> String {
        self.ecs(&format!("task-set/{cluster}/{service}/{id}"))
    }

    pub fn container_instance(&self, cluster: &str, id: &str) -> String {
        self.ecs(&format!("container-instance/{cluster}/{id}"))
    }

    pub fn load_balancer(&self, name: &str, id: &str) -> String {
        self.elb(&format!("loadbalancer/app/{name}/{id}"))
    }

    pub fn target_group(&self, name: &str, id: &str) -> String {
        self.elb(&format!("targetgroup/{name}/{id}"))
    }

    pub fn listener(&self, lb_name: &str, lb_id: &str, id: &str) -> String {
        self.elb(&format!("listener/app/{lb_name}/{lb_id}/{id}"))
    }

    pub fn rule(&self, lb_name: &str, lb_id: &str, listener_id: &str, id: &str) -> String {
        self.elb(&format!(
            "listener-rule/app/{lb_name}/{lb_id}/{listener_id}/{id}"
        ))
    }
}

pub fn is_arn(value: &str) -> bool {
    value.starts_with("arn:")
}

/// Final path component of an ARN resource, e.g. the cluster name from
/// `arn:aws:ecs:…:cluster/prod`.
pub fn resource_name(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

/// The `<kind>` portion of an ECS ARN resource, e.g. `service` from
/// `arn:aws:ecs:…:service/prod/web`.
pub fn resource_kind(arn: &str) -> Result<&str> {
    let resource = arn
        .splitn(6, ':')
        .nth(5)
        .ok_or_else(|| Error::invalid_input(format!("malformed ARN: {arn}")))?;
    Ok(resource.split('/').next().unwrap_or(resource))
}

/// Resource names are 1-255 characters of letters, digits, hyphens and
/// underscores.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(Error::invalid_input(format!(
            "{kind} name must be between 1 and 255 characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::invalid_input(format!(
            "{kind} name may only contain letters, numbers, hyphens and underscores"
        )));
    }
    Ok(())
}

/// Accept a short name or a full ARN, returning the short name.
pub fn short_name(value: &str) -> &str {
    if is_arn(value) {
        resource_name(value)
    } else {
        value
    }
}

/// Split a `family:revision` task definition reference.
pub fn split_family_revision(reference: &str) -> Result<(&str, Option<i32>)> {
    match reference.rsplit_once(':') {
        Some((family, revision)) => {
            let revision: i32 = revision.parse().map_err(|_| {
                Error::invalid_input(format!("invalid task definition revision in {reference}"))
            })?;
            if revision < 1 {
                return Err(Error::invalid_input(format!(
                    "invalid task definition revision in {reference}"
                )));
            }
            Ok((family, Some(revision)))
        }
        None => Ok((reference, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ArnBuilder {
        ArnBuilder::new("us-east-1", "000000000000")
    }

    #[test]
    fn ecs_arns_follow_the_canonical_shapes() {
        let arn = builder();
        assert_eq!(
            arn.cluster("prod"),
            "arn:aws:ecs:us-east-1:000000000000:cluster/prod"
        );
        assert_eq!(
            arn.service("prod", "web"),
            "arn:aws:ecs:us-east-1:000000000000:service/prod/web"
        );
        assert_eq!(
            arn.task_definition("webapp", 3),
            "arn:aws:ecs:us-east-1:000000000000:task-definition/webapp:3"
        );
    }

    #[test]
    fn resource_helpers_round_trip() {
        let arn = builder().service("prod", "web");
        assert_eq!(resource_name(&arn), "web");
        assert_eq!(resource_kind(&arn).unwrap(), "service");
        assert_eq!(short_name(&arn), "web");
        assert_eq!(short_name("web"), "web");
    }

    #[test]
    fn name_validation_rejects_bad_charsets() {
        assert!(validate_name("cluster", "prod-1_a").is_ok());
        assert!(validate_name("cluster", "").is_err());
        assert!(validate_name("cluster", "has space").is_err());
        assert!(validate_name("cluster", &"x".repeat(256)).is_err());
    }

    #[test]
    fn family_revision_references_parse() {
        assert_eq!(split_family_revision("webapp:3").unwrap(), ("webapp", Some(3)));
        assert_eq!(split_family_revision("webapp").unwrap(), ("webapp", None));
        assert!(split_family_revision("webapp:zero").is_err());
        assert!(split_family_revision("webapp:0").is_err());
    }
}
