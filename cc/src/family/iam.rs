//! IAM aggregation across one family
//!
//! Folds every container's `x-iam` hints into the family's two roles.
//! Managed-policy ARNs union with set semantics; inline policies
//! deduplicate by name, autonaming anonymous ones; the permissions
//! boundary is a singleton where the first writer wins and later
//! conflicting writers are warned and dropped, never merged.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;
use tracing::{debug, warn};

use crate::compose::ComposeService;
use crate::error::PolicyWarning;

/// Which of the family's two roles a hint applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    /// Pulls images, fetches secrets, writes logs on the task's behalf
    Execution,
    /// Assumed by the application containers themselves
    Task,
}

/// Aggregated policy content for one role
#[derive(Debug, Clone, Default)]
pub struct RoleAggregate {
    /// Managed policy ARNs, set semantics
    pub managed_policy_arns: BTreeSet<String>,

    /// Inline policies by name
    pub inline_policies: BTreeMap<String, serde_json::Value>,
}

/// The family's IAM aggregate: one execution role, one task role
#[derive(Debug, Clone, Default)]
pub struct TaskIam {
    pub execution: RoleAggregate,
    pub task: RoleAggregate,

    /// Singleton permissions boundary applied to both roles
    pub permissions_boundary: Option<String>,
}

/// Prefix for autogenerated inline policy names
const GENERATED_POLICY_PREFIX: &str = "PolicyGenerated";

impl TaskIam {
    /// Fold one container's IAM hints into the aggregate
    pub fn merge_service(&mut self, service: &ComposeService, warnings: &mut Vec<PolicyWarning>) {
        for arn in &service.iam.managed_policies {
            self.add_managed_policy(RoleKind::Task, arn);
        }
        for policy in &service.iam.policies {
            self.add_inline_policy(RoleKind::Task, policy.name.clone(), policy.document.clone());
        }
        if let Some(boundary) = &service.iam.boundary {
            self.set_boundary(boundary, warnings);
        }
    }

    /// Union a managed policy ARN into a role
    pub fn add_managed_policy(&mut self, role: RoleKind, arn: impl Into<String>) {
        self.role_mut(role).managed_policy_arns.insert(arn.into());
    }

    /// Attach an inline policy, deduplicating by name
    ///
    /// A missing name gets the next free `PolicyGenerated{n}`. Re-declaring
    /// an existing name keeps the first document; identical re-declarations
    /// are silent, diverging ones are logged.
    pub fn add_inline_policy(&mut self, role: RoleKind, name: Option<String>, document: serde_json::Value) -> String {
        let aggregate = self.role_mut(role);
        let name = match name {
            Some(name) => name,
            None => next_generated_name(&aggregate.inline_policies),
        };

        match aggregate.inline_policies.get(&name) {
            None => {
                aggregate.inline_policies.insert(name.clone(), document);
            }
            Some(existing) if *existing == document => {
                debug!(policy = %name, "Identical inline policy re-declared, skipping");
            }
            Some(_) => {
                debug!(policy = %name, "Inline policy name re-declared with a different document, keeping first");
            }
        }
        name
    }

    /// Set the permissions boundary; first writer wins
    pub fn set_boundary(&mut self, value: &str, warnings: &mut Vec<PolicyWarning>) {
        match &self.permissions_boundary {
            None => self.permissions_boundary = Some(value.to_string()),
            Some(existing) if existing == value => {}
            Some(existing) => {
                warn!(
                    kept = %existing,
                    rejected = value,
                    "Conflicting permissions boundary declared, keeping first"
                );
                warnings.push(PolicyWarning::BoundaryConflict {
                    kept: existing.clone(),
                    rejected: value.to_string(),
                });
            }
        }
    }

    /// Grant the execution role read access to the given secret references
    ///
    /// Secrets are injected at container start by the ECS agent, which runs
    /// under the execution role, so the grant belongs there and not on the
    /// task role.
    pub fn grant_secrets_read(&mut self, secret_refs: &[String]) {
        if secret_refs.is_empty() {
            return;
        }
        let resources: Vec<String> = secret_refs
            .iter()
            .map(|r| {
                if r.starts_with("arn:") {
                    r.clone()
                } else {
                    // Secrets Manager appends a random 6-character suffix to ARNs
                    format!("arn:aws:secretsmanager:*:*:secret:{r}-??????")
                }
            })
            .collect();

        self.add_inline_policy(
            RoleKind::Execution,
            Some("SecretsAccess".to_string()),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": ["secretsmanager:GetSecretValue"],
                    "Resource": resources,
                }]
            }),
        );
    }

    fn role_mut(&mut self, role: RoleKind) -> &mut RoleAggregate {
        match role {
            RoleKind::Execution => &mut self.execution,
            RoleKind::Task => &mut self.task,
        }
    }

    /// Read access to one role's aggregate
    pub fn role(&self, role: RoleKind) -> &RoleAggregate {
        match role {
            RoleKind::Execution => &self.execution,
            RoleKind::Task => &self.task,
        }
    }
}

fn next_generated_name(existing: &BTreeMap<String, serde_json::Value>) -> String {
    let mut n = 0;
    loop {
        let candidate = format!("{GENERATED_POLICY_PREFIX}{n}");
        if !existing.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::service::RawService;

    fn service_with_iam(name: &str, iam_yaml: &str) -> ComposeService {
        let yaml = format!("image: {name}\nx-iam:\n{iam_yaml}");
        let raw: RawService = serde_yaml::from_str(&yaml).unwrap();
        ComposeService::from_raw(name, raw).unwrap()
    }

    #[test]
    fn test_managed_policy_union() {
        let a = service_with_iam(
            "a",
            r#"
  managed-policies:
    - policyA
"#,
        );
        let b = service_with_iam(
            "b",
            r#"
  managed-policies:
    - policyA
    - policyB
"#,
        );

        let mut iam = TaskIam::default();
        let mut warnings = Vec::new();
        iam.merge_service(&a, &mut warnings);
        iam.merge_service(&b, &mut warnings);

        let expected: BTreeSet<String> = ["policyA", "policyB"].iter().map(|s| s.to_string()).collect();
        assert_eq!(iam.task.managed_policy_arns, expected);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_boundary_first_writer_wins() {
        let a = service_with_iam("a", "  boundary: arn:aws:iam::aws:policy/Foo");
        let b = service_with_iam("b", "  boundary: arn:aws:iam::aws:policy/Bar");

        let mut iam = TaskIam::default();
        let mut warnings = Vec::new();
        iam.merge_service(&a, &mut warnings);
        iam.merge_service(&b, &mut warnings);

        assert_eq!(iam.permissions_boundary.as_deref(), Some("arn:aws:iam::aws:policy/Foo"));
        assert_eq!(warnings.len(), 1);
        assert!(matches!(&warnings[0], PolicyWarning::BoundaryConflict { rejected, .. }
            if rejected == "arn:aws:iam::aws:policy/Bar"));
    }

    #[test]
    fn test_boundary_same_value_no_warning() {
        let mut iam = TaskIam::default();
        let mut warnings = Vec::new();
        iam.set_boundary("arn:aws:iam::aws:policy/Foo", &mut warnings);
        iam.set_boundary("arn:aws:iam::aws:policy/Foo", &mut warnings);

        assert!(warnings.is_empty());
    }

    #[test]
    fn test_generated_policy_names_avoid_collision() {
        let mut iam = TaskIam::default();
        let doc = json!({"Version": "2012-10-17"});

        let first = iam.add_inline_policy(RoleKind::Task, None, doc.clone());
        assert_eq!(first, "PolicyGenerated0");

        // A user-declared policy squats on the next generated name
        iam.add_inline_policy(RoleKind::Task, Some("PolicyGenerated1".to_string()), doc.clone());

        let third = iam.add_inline_policy(RoleKind::Task, None, doc.clone());
        assert_eq!(third, "PolicyGenerated2");
        assert_eq!(iam.task.inline_policies.len(), 3);
    }

    #[test]
    fn test_inline_policy_name_dedup_keeps_first() {
        let mut iam = TaskIam::default();
        let first = json!({"Statement": "first"});
        let second = json!({"Statement": "second"});

        iam.add_inline_policy(RoleKind::Task, Some("Shared".to_string()), first.clone());
        iam.add_inline_policy(RoleKind::Task, Some("Shared".to_string()), second);

        assert_eq!(iam.task.inline_policies.get("Shared").unwrap(), &first);
    }

    #[test]
    fn test_secrets_grant_on_execution_role() {
        let mut iam = TaskIam::default();
        iam.grant_secrets_read(&[
            "db-password".to_string(),
            "arn:aws:secretsmanager:eu-west-1:123456789012:secret:api-AbC123".to_string(),
        ]);

        let policy = iam.execution.inline_policies.get("SecretsAccess").unwrap();
        let resources = policy["Statement"][0]["Resource"].as_array().unwrap();
        assert_eq!(resources.len(), 2);
        assert!(resources[0].as_str().unwrap().contains("db-password"));
        assert!(resources[1].as_str().unwrap().starts_with("arn:aws:secretsmanager:eu-west-1"));
        assert!(iam.task.inline_policies.is_empty());
    }

    #[test]
    fn test_empty_secrets_no_policy() {
        let mut iam = TaskIam::default();
        iam.grant_secrets_read(&[]);
        assert!(iam.execution.inline_policies.is_empty());
    }
}
