//! Policy resolver: locates the policy version governing an appeal and
//! expands its steps into concrete approval records.
//!
//! Lookups go through typed composite-key indexes built once per batch, so
//! a `create` call with many appeals never pays N+1 collaborator calls.

use crate::{appeal_vars, evaluate_expression, is_valid_email, EngineError, EngineResult};
use std::collections::{HashMap, HashSet};
use warden_types::{
    Appeal, AppealKey, Approval, Policy, Provider, Resource, ResourceConfig, Step, StepStrategy,
};

/// Resources indexed by id.
#[derive(Debug, Default)]
pub struct ResourceIndex {
    resources: HashMap<String, Resource>,
}

impl ResourceIndex {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self {
            resources: resources.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ProviderKey {
    provider_type: String,
    urn: String,
}

/// Providers indexed by `(type, urn)`.
#[derive(Debug, Default)]
pub struct ProviderIndex {
    providers: HashMap<ProviderKey, Provider>,
    known_types: HashSet<String>,
}

impl ProviderIndex {
    pub fn new(providers: impl IntoIterator<Item = Provider>) -> Self {
        let mut index = Self::default();
        for provider in providers {
            index.known_types.insert(provider.provider_type.clone());
            index.providers.insert(
                ProviderKey {
                    provider_type: provider.provider_type.clone(),
                    urn: provider.urn.clone(),
                },
                provider,
            );
        }
        index
    }

    pub fn get(&self, provider_type: &str, urn: &str) -> EngineResult<&Provider> {
        if !self.known_types.contains(provider_type) {
            return Err(EngineError::ProviderTypeNotFound(provider_type.to_string()));
        }
        self.providers
            .get(&ProviderKey {
                provider_type: provider_type.to_string(),
                urn: urn.to_string(),
            })
            .ok_or_else(|| EngineError::ProviderUrnNotFound(urn.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PolicyKey {
    id: String,
    version: u32,
}

/// Policies indexed by `(id, version)`.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    policies: HashMap<PolicyKey, Policy>,
    known_ids: HashSet<String>,
}

impl PolicyIndex {
    pub fn new(policies: impl IntoIterator<Item = Policy>) -> Self {
        let mut index = Self::default();
        for policy in policies {
            index.known_ids.insert(policy.id.clone());
            index.policies.insert(
                PolicyKey {
                    id: policy.id.clone(),
                    version: policy.version,
                },
                policy,
            );
        }
        index
    }

    pub fn get(&self, id: &str, version: u32) -> EngineResult<&Policy> {
        if !self.known_ids.contains(id) {
            return Err(EngineError::PolicyIdNotFound(id.to_string()));
        }
        self.policies
            .get(&PolicyKey {
                id: id.to_string(),
                version,
            })
            .ok_or_else(|| EngineError::PolicyVersionNotFound {
                id: id.to_string(),
                version,
            })
    }
}

/// Existing appeals indexed by their composite request key. Holds at most
/// one appeal per key; later insertions for the same key are ignored.
#[derive(Debug, Default)]
pub struct AppealIndex {
    appeals: HashMap<AppealKey, Appeal>,
}

impl AppealIndex {
    pub fn new(appeals: impl IntoIterator<Item = Appeal>) -> Self {
        let mut index = Self::default();
        for appeal in appeals {
            index.appeals.entry(AppealKey::of(&appeal)).or_insert(appeal);
        }
        index
    }

    pub fn get(&self, key: &AppealKey) -> Option<&Appeal> {
        self.appeals.get(key)
    }
}

/// Resolves appeals against provider and policy configuration.
#[derive(Clone, Debug, Default)]
pub struct PolicyResolver;

impl PolicyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Attach the resource snapshot the appeal refers to. Deleted resources
    /// cannot be appealed for.
    pub fn attach_resource(
        &self,
        appeal: &mut Appeal,
        resources: &ResourceIndex,
    ) -> EngineResult<()> {
        let resource = resources
            .get(&appeal.resource_id)
            .ok_or_else(|| EngineError::ResourceNotFound(appeal.resource_id.clone()))?;
        if resource.is_deleted {
            return Err(EngineError::ResourceDeleted(appeal.resource_id.clone()));
        }
        appeal.resource = Some(resource.clone());
        Ok(())
    }

    /// Locate the provider serving the appeal's resource.
    pub fn find_provider<'a>(
        &self,
        appeal: &Appeal,
        providers: &'a ProviderIndex,
    ) -> EngineResult<&'a Provider> {
        let resource = appeal
            .resource
            .as_ref()
            .ok_or_else(|| EngineError::ResourceNotFound(appeal.resource_id.clone()))?;
        providers.get(&resource.provider_type, &resource.provider_urn)
    }

    /// Locate the policy version governing the appeal. An explicit policy
    /// binding on the appeal overrides the provider's resource config.
    pub fn resolve_policy<'a>(
        &self,
        appeal: &Appeal,
        provider: &Provider,
        policies: &'a PolicyIndex,
    ) -> EngineResult<&'a Policy> {
        if !appeal.policy_id.is_empty() {
            return policies.get(&appeal.policy_id, appeal.policy_version);
        }
        let config = self.resource_config(appeal, provider)?;
        policies.get(&config.policy.id, config.policy.version)
    }

    /// Expand the policy's steps into approval records on the appeal,
    /// resolving approver expressions for manual steps. On any failure the
    /// appeal's approvals are left untouched and the creation attempt must
    /// be discarded.
    pub fn fill_approvals(&self, appeal: &mut Appeal, policy: &Policy) -> EngineResult<()> {
        let vars = appeal_vars(appeal)?;
        let mut approvals = Vec::with_capacity(policy.steps.len());
        for (index, step) in policy.steps.iter().enumerate() {
            let approvers = match step.strategy {
                StepStrategy::Manual => self.resolve_approvers(step, &vars)?,
                StepStrategy::Auto => Vec::new(),
            };
            approvals.push(Approval::new(
                &step.name,
                index,
                &appeal.id,
                &policy.id,
                policy.version,
                approvers,
            ));
        }
        appeal.approvals = approvals;
        Ok(())
    }

    fn resource_config<'a>(
        &self,
        appeal: &Appeal,
        provider: &'a Provider,
    ) -> EngineResult<&'a ResourceConfig> {
        let resource = appeal
            .resource
            .as_ref()
            .ok_or_else(|| EngineError::ResourceNotFound(appeal.resource_id.clone()))?;
        provider
            .config
            .resources
            .iter()
            .find(|rc| rc.resource_type == resource.resource_type)
            .ok_or_else(|| EngineError::ResourceTypeNotFound(resource.resource_type.clone()))
    }

    /// Each approver entry is either a literal email or an expression
    /// producing one email or a list of emails.
    fn resolve_approvers(
        &self,
        step: &Step,
        vars: &std::collections::HashMap<String, serde_json::Value>,
    ) -> EngineResult<Vec<String>> {
        let mut approvers = Vec::new();
        for source in &step.approvers {
            if is_valid_email(source) {
                approvers.push(source.clone());
                continue;
            }
            let value = evaluate_expression(source, vars)?;
            let resolved = value
                .into_string_list()
                .map_err(|_| EngineError::ApproverInvalidType(source.clone()))?;
            approvers.extend(resolved);
        }
        for approver in &approvers {
            if !is_valid_email(approver) {
                return Err(EngineError::ApproverEmail(approver.clone()));
            }
        }
        Ok(approvers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_types::{PolicyConfig, ProviderConfig};

    fn resource() -> Resource {
        Resource {
            id: "res-1".to_string(),
            provider_type: "postgres".to_string(),
            provider_urn: "pg-main".to_string(),
            resource_type: "database".to_string(),
            urn: "orders".to_string(),
            name: "Orders DB".to_string(),
            details: json!({"owner": "owner@example.com", "stewards": ["a@x.com", "b@x.com"]}),
            is_deleted: false,
        }
    }

    fn provider() -> Provider {
        Provider {
            id: "prv-1".to_string(),
            provider_type: "postgres".to_string(),
            urn: "pg-main".to_string(),
            config: ProviderConfig {
                resources: vec![ResourceConfig {
                    resource_type: "database".to_string(),
                    policy: PolicyConfig {
                        id: "db-access".to_string(),
                        version: 2,
                    },
                }],
            },
        }
    }

    fn manual_step(name: &str, approvers: Vec<&str>) -> Step {
        Step {
            name: name.to_string(),
            description: None,
            strategy: StepStrategy::Manual,
            when: None,
            approve_if: None,
            approvers: approvers.into_iter().map(String::from).collect(),
            rejection_reason: None,
            allow_failed: false,
        }
    }

    fn appeal() -> Appeal {
        let mut appeal = Appeal::new("res-1", "user@example.com", "user@example.com", "viewer");
        appeal.resource = Some(resource());
        appeal
    }

    #[test]
    fn attach_resource_rejects_unknown_and_deleted() {
        let resolver = PolicyResolver::new();
        let mut a = Appeal::new("missing", "u@x.com", "u@x.com", "viewer");
        let index = ResourceIndex::new([resource()]);
        assert!(matches!(
            resolver.attach_resource(&mut a, &index),
            Err(EngineError::ResourceNotFound(_))
        ));

        let mut deleted = resource();
        deleted.is_deleted = true;
        let index = ResourceIndex::new([deleted]);
        let mut a = Appeal::new("res-1", "u@x.com", "u@x.com", "viewer");
        assert!(matches!(
            resolver.attach_resource(&mut a, &index),
            Err(EngineError::ResourceDeleted(_))
        ));
    }

    #[test]
    fn provider_lookup_distinguishes_type_and_urn() {
        let resolver = PolicyResolver::new();
        let index = ProviderIndex::new([provider()]);

        let mut a = appeal();
        a.resource.as_mut().unwrap().provider_type = "bigquery".to_string();
        assert!(matches!(
            resolver.find_provider(&a, &index),
            Err(EngineError::ProviderTypeNotFound(_))
        ));

        let mut a = appeal();
        a.resource.as_mut().unwrap().provider_urn = "pg-replica".to_string();
        assert!(matches!(
            resolver.find_provider(&a, &index),
            Err(EngineError::ProviderUrnNotFound(_))
        ));

        let a = appeal();
        assert!(resolver.find_provider(&a, &index).is_ok());
    }

    #[test]
    fn policy_resolution_follows_provider_config() {
        let resolver = PolicyResolver::new();
        let policies = PolicyIndex::new([Policy::new(
            "db-access",
            2,
            vec![manual_step("lead", vec!["lead@example.com"])],
        )]);
        let a = appeal();
        let policy = resolver.resolve_policy(&a, &provider(), &policies).unwrap();
        assert_eq!(policy.id, "db-access");
        assert_eq!(policy.version, 2);
    }

    #[test]
    fn appeal_policy_binding_overrides_provider_config() {
        let resolver = PolicyResolver::new();
        let policies = PolicyIndex::new([
            Policy::new("db-access", 2, vec![manual_step("lead", vec!["l@x.com"])]),
            Policy::new("override", 7, vec![manual_step("sec", vec!["s@x.com"])]),
        ]);
        let mut a = appeal();
        a.policy_id = "override".to_string();
        a.policy_version = 7;
        let policy = resolver.resolve_policy(&a, &provider(), &policies).unwrap();
        assert_eq!(policy.id, "override");
    }

    #[test]
    fn policy_errors_distinguish_id_and_version() {
        let resolver = PolicyResolver::new();
        let policies = PolicyIndex::new([Policy::new(
            "db-access",
            1,
            vec![manual_step("lead", vec!["l@x.com"])],
        )]);
        let a = appeal();
        // Provider references version 2, only version 1 exists.
        assert!(matches!(
            resolver.resolve_policy(&a, &provider(), &policies),
            Err(EngineError::PolicyVersionNotFound { .. })
        ));

        let mut a = appeal();
        a.policy_id = "nonexistent".to_string();
        a.policy_version = 1;
        assert!(matches!(
            resolver.resolve_policy(&a, &provider(), &policies),
            Err(EngineError::PolicyIdNotFound(_))
        ));
    }

    #[test]
    fn unknown_resource_type_has_no_config() {
        let resolver = PolicyResolver::new();
        let policies = PolicyIndex::new([]);
        let mut a = appeal();
        a.resource.as_mut().unwrap().resource_type = "dashboard".to_string();
        assert!(matches!(
            resolver.resolve_policy(&a, &provider(), &policies),
            Err(EngineError::ResourceTypeNotFound(_))
        ));
    }

    #[test]
    fn fill_approvals_resolves_literals_and_expressions() {
        let resolver = PolicyResolver::new();
        let policy = Policy::new(
            "db-access",
            2,
            vec![
                manual_step(
                    "owner",
                    vec!["$appeal.resource.details.owner", "sre@example.com"],
                ),
                manual_step("stewards", vec!["$appeal.resource.details.stewards"]),
            ],
        );
        let mut a = appeal();
        resolver.fill_approvals(&mut a, &policy).unwrap();

        assert_eq!(a.approvals.len(), 2);
        assert_eq!(a.approvals[0].index, 0);
        assert_eq!(
            a.approvals[0].approvers,
            vec!["owner@example.com".to_string(), "sre@example.com".to_string()]
        );
        assert_eq!(
            a.approvals[1].approvers,
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
        assert_eq!(a.approvals[1].index, 1);
    }

    #[test]
    fn fill_approvals_rejects_non_string_approver_values() {
        let resolver = PolicyResolver::new();
        let policy = Policy::new(
            "db-access",
            2,
            vec![manual_step("owner", vec!["$appeal.policy_version"])],
        );
        let mut a = appeal();
        assert!(matches!(
            resolver.fill_approvals(&mut a, &policy),
            Err(EngineError::ApproverInvalidType(_))
        ));
    }

    #[test]
    fn fill_approvals_validates_resolved_emails() {
        let resolver = PolicyResolver::new();
        let policy = Policy::new(
            "db-access",
            2,
            vec![manual_step("owner", vec!["$appeal.role"])],
        );
        let mut a = appeal();
        assert!(matches!(
            resolver.fill_approvals(&mut a, &policy),
            Err(EngineError::ApproverEmail(_))
        ));
    }

    #[test]
    fn auto_steps_carry_no_approvers() {
        let resolver = PolicyResolver::new();
        let mut auto = manual_step("auto", vec![]);
        auto.strategy = StepStrategy::Auto;
        auto.approve_if = Some("true".to_string());
        let policy = Policy::new("db-access", 2, vec![auto]);
        let mut a = appeal();
        resolver.fill_approvals(&mut a, &policy).unwrap();
        assert!(a.approvals[0].approvers.is_empty());
        assert!(!a.approvals[0].is_manual());
    }
}
