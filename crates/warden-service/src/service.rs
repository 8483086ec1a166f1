//! The appeal lifecycle orchestrator.

use crate::{
    AppealRepository, AuditLogger, Clock, IamManager, Notifier, PolicyService, ProviderService,
    ResourceService, ServiceError, ServiceResult,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;
use warden_engine::{
    is_valid_email, AppealIndex, PolicyIndex, PolicyResolver, ProviderIndex, ResourceIndex,
    StateMachine,
};
use warden_types::{
    parse_duration, Appeal, AppealConfig, AppealFilter, AppealKey, AppealStatus, Approval,
    ApprovalStatus, Notification, NotificationMessage, Policy, ResourceFilter,
    DEFAULT_ACCOUNT_TYPE, SYSTEM_ACTOR,
};

pub const AUDIT_KEY_BULK_INSERT: &str = "appeal.bulkInsert";
pub const AUDIT_KEY_CANCEL: &str = "appeal.cancel";
pub const AUDIT_KEY_APPROVE: &str = "appeal.approve";
pub const AUDIT_KEY_REJECT: &str = "appeal.reject";
pub const AUDIT_KEY_REVOKE: &str = "appeal.revoke";
pub const AUDIT_KEY_ADD_APPROVER: &str = "appeal.addApprover";
pub const AUDIT_KEY_DELETE_APPROVER: &str = "appeal.deleteApprover";

/// Reason recorded on an active appeal superseded by its extension.
const EXTENSION_REVOKE_REASON: &str = "Superseded by an approved extension";

/// A decision on one named approval step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalActionKind {
    Approve,
    Reject,
}

#[derive(Clone, Debug)]
pub struct ApprovalAction {
    pub appeal_id: String,
    pub approval_name: String,
    pub actor: String,
    pub action: ApprovalActionKind,
    pub reason: Option<String>,
}

/// Collaborators wired into the orchestrator.
pub struct AppealServiceDeps {
    pub repository: Arc<dyn AppealRepository>,
    pub resource_service: Arc<dyn ResourceService>,
    pub provider_service: Arc<dyn ProviderService>,
    pub policy_service: Arc<dyn PolicyService>,
    pub iam_manager: Arc<dyn IamManager>,
    pub notifier: Arc<dyn Notifier>,
    pub audit_logger: Arc<dyn AuditLogger>,
    pub clock: Arc<dyn Clock>,
}

/// The appeal lifecycle orchestrator.
pub struct AppealService {
    repo: Arc<dyn AppealRepository>,
    resources: Arc<dyn ResourceService>,
    providers: Arc<dyn ProviderService>,
    policies: Arc<dyn PolicyService>,
    iam: Arc<dyn IamManager>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLogger>,
    clock: Arc<dyn Clock>,
    resolver: PolicyResolver,
    state_machine: StateMachine,
}

impl AppealService {
    pub fn new(deps: AppealServiceDeps) -> Self {
        Self {
            repo: deps.repository,
            resources: deps.resource_service,
            providers: deps.provider_service,
            policies: deps.policy_service,
            iam: deps.iam_manager,
            notifier: deps.notifier,
            audit: deps.audit_logger,
            clock: deps.clock,
            resolver: PolicyResolver::new(),
            state_machine: StateMachine::new(),
        }
    }

    // ============ Queries ============

    pub async fn get_by_id(&self, id: &str) -> ServiceResult<Appeal> {
        if id.is_empty() {
            return Err(ServiceError::AppealIdRequired);
        }
        self.repo
            .get_by_id(id)
            .await
            .map_err(ServiceError::Repository)?
            .ok_or_else(|| ServiceError::AppealNotFound(id.to_string()))
    }

    pub async fn find(&self, filter: &AppealFilter) -> ServiceResult<Vec<Appeal>> {
        self.repo.find(filter).await.map_err(ServiceError::Repository)
    }

    // ============ Creation ============

    /// Create a batch of appeals.
    ///
    /// Lookup maps for resources, providers, policies, and existing
    /// pending/active appeals are built once for the whole batch. Appeals
    /// whose approval chain resolves immediately are granted and activated
    /// before anything is persisted; the batch is then written in a single
    /// bulk upsert, and notifications go out best-effort afterwards.
    pub async fn create(&self, mut appeals: Vec<Appeal>) -> ServiceResult<Vec<Appeal>> {
        let resource_ids: Vec<String> = appeals.iter().map(|a| a.resource_id.clone()).collect();
        let resources = ResourceIndex::new(
            self.resources
                .find(&ResourceFilter { ids: resource_ids })
                .await
                .map_err(ServiceError::ResourceLookup)?,
        );
        let providers = ProviderIndex::new(
            self.providers
                .find()
                .await
                .map_err(ServiceError::Provider)?,
        );
        let policies = PolicyIndex::new(
            self.policies
                .find()
                .await
                .map_err(ServiceError::PolicyLookup)?,
        );

        let existing = self
            .repo
            .find(&AppealFilter::statuses([
                AppealStatus::Pending,
                AppealStatus::Active,
            ]))
            .await
            .map_err(ServiceError::Repository)?;
        let (pending, active): (Vec<Appeal>, Vec<Appeal>) = existing
            .into_iter()
            .partition(|a| a.status == AppealStatus::Pending);
        let pending_index = AppealIndex::new(pending);
        let active_index = AppealIndex::new(active);

        let mut superseded: Vec<Appeal> = Vec::new();
        let mut notifications: Vec<Notification> = Vec::new();

        for appeal in appeals.iter_mut() {
            appeal.set_defaults();
            let key = AppealKey::of(appeal);
            if pending_index.get(&key).is_some() {
                return Err(ServiceError::AppealDuplicate);
            }

            self.resolver.attach_resource(appeal, &resources)?;
            let provider = self.resolver.find_provider(appeal, &providers)?;
            self.providers
                .validate_appeal(appeal, provider)
                .await
                .map_err(ServiceError::Provider)?;
            let policy = self.resolver.resolve_policy(appeal, provider, &policies)?;

            check_on_behalf(appeal, policy.appeal.as_ref())?;
            validate_options(appeal, policy.appeal.as_ref())?;
            self.check_extension_eligibility(appeal, policy.appeal.as_ref(), &active_index)?;

            appeal.init(policy);
            self.attach_creator_details(appeal, policy).await?;
            self.resolver.fill_approvals(appeal, policy)?;
            self.state_machine.advance(appeal, policy)?;

            if appeal.status == AppealStatus::Active {
                if let Some(active) = active_index.get(&key) {
                    let mut old = active.clone();
                    old.terminate(self.clock.now(), SYSTEM_ACTOR, EXTENSION_REVOKE_REASON);
                    superseded.push(old);
                }
                self.create_access(appeal, policy).await?;
                notifications.push(Notification {
                    user: appeal.created_by.clone(),
                    message: NotificationMessage::AppealApproved {
                        resource_name: resource_display(appeal),
                        role: appeal.role.clone(),
                    },
                });
            }
        }

        let mut to_persist = appeals.clone();
        to_persist.extend(superseded);
        self.repo
            .bulk_upsert(&to_persist)
            .await
            .map_err(ServiceError::Repository)?;

        self.record_audit(
            AUDIT_KEY_BULK_INSERT,
            serde_json::to_value(&appeals).unwrap_or_default(),
        )
        .await;

        for appeal in &appeals {
            notifications.extend(approver_notifications(appeal));
        }
        self.dispatch_notifications(notifications).await;

        Ok(appeals)
    }

    // ============ Manual actions ============

    /// Apply an approve/reject decision to a named approval step.
    ///
    /// When the decision completes the chain, access is granted (or, if an
    /// active grant already exists for the same account/resource/role, the
    /// old grant is terminated instead of granting a duplicate). A persist
    /// failure after a successful grant triggers a best-effort compensating
    /// revoke; this is a saga-style compensation, not a transaction.
    pub async fn make_action(&self, action: ApprovalAction) -> ServiceResult<Appeal> {
        if action.appeal_id.is_empty() {
            return Err(ServiceError::AppealIdRequired);
        }
        if action.approval_name.is_empty() {
            return Err(ServiceError::ApprovalIdRequired);
        }
        if !is_valid_email(&action.actor) {
            return Err(ServiceError::InvalidActor(action.actor.clone()));
        }

        let mut appeal = self.get_by_id(&action.appeal_id).await?;
        check_appeal_pending(appeal.status)?;
        let policy = self.policy_for(&appeal).await?;

        let position = appeal
            .approvals
            .iter()
            .position(|a| a.name == action.approval_name)
            .ok_or_else(|| ServiceError::ApprovalNotFound(action.approval_name.clone()))?;

        for earlier in &appeal.approvals[..position] {
            check_dependency_resolved(earlier.status)?;
        }

        {
            let current = &appeal.approvals[position];
            if let Some(conflict) = approval_status_conflict(current.status) {
                return Err(conflict);
            }
            if !current.has_approver(&action.actor) {
                return Err(ServiceError::ActionForbidden);
            }
        }

        let now = self.clock.now();
        appeal.approvals[position].actor = Some(action.actor.clone());
        appeal.approvals[position].reason = action.reason.clone();

        match action.action {
            ApprovalActionKind::Approve => {
                appeal.approvals[position].approve();
                if position + 1 < appeal.approvals.len() {
                    appeal.approvals[position + 1].unblock();
                }
                self.state_machine.advance(&mut appeal, &policy)?;
            }
            ApprovalActionKind::Reject => {
                appeal.approvals[position].reject();
                appeal.reject();
                for later in appeal.approvals.iter_mut().skip(position + 1) {
                    later.skip();
                }
            }
        }

        let mut granted = false;
        if appeal.status == AppealStatus::Active {
            let existing = self
                .repo
                .find(&AppealFilter {
                    account_id: Some(appeal.account_id.clone()),
                    resource_id: Some(appeal.resource_id.clone()),
                    role: Some(appeal.role.clone()),
                    statuses: vec![AppealStatus::Active],
                    ..AppealFilter::default()
                })
                .await
                .map_err(ServiceError::Repository)?;

            if let Some(old) = existing.into_iter().next() {
                // Access already exists at the provider; terminate the old
                // grant instead of granting a duplicate.
                let mut old = old;
                old.terminate(now, SYSTEM_ACTOR, EXTENSION_REVOKE_REASON);
                self.repo
                    .update(&old)
                    .await
                    .map_err(ServiceError::Repository)?;
                appeal.activate(now)?;
            } else {
                self.create_access(&mut appeal, &policy).await?;
                granted = true;
            }
        }

        if let Err(update_err) = self.repo.update(&appeal).await {
            if granted {
                if let Err(revoke_err) = self.providers.revoke_access(&appeal).await {
                    warn!(
                        appeal_id = %appeal.id,
                        error = %revoke_err,
                        "compensating revoke failed after persist failure",
                    );
                }
            }
            return Err(ServiceError::Repository(update_err));
        }

        let notifications = match appeal.status {
            AppealStatus::Active => vec![Notification {
                user: appeal.created_by.clone(),
                message: NotificationMessage::AppealApproved {
                    resource_name: resource_display(&appeal),
                    role: appeal.role.clone(),
                },
            }],
            AppealStatus::Rejected => vec![Notification {
                user: appeal.created_by.clone(),
                message: NotificationMessage::AppealRejected {
                    resource_name: resource_display(&appeal),
                    role: appeal.role.clone(),
                },
            }],
            _ => approver_notifications(&appeal),
        };
        self.dispatch_notifications(notifications).await;

        let audit_key = match action.action {
            ApprovalActionKind::Approve => AUDIT_KEY_APPROVE,
            ApprovalActionKind::Reject => AUDIT_KEY_REJECT,
        };
        self.record_audit(
            audit_key,
            serde_json::json!({
                "appeal_id": appeal.id,
                "approval": action.approval_name,
                "actor": action.actor,
            }),
        )
        .await;

        Ok(appeal)
    }

    /// Cancel a pending appeal.
    pub async fn cancel(&self, id: &str) -> ServiceResult<Appeal> {
        let mut appeal = self.get_by_id(id).await?;
        check_appeal_pending(appeal.status)?;

        appeal.cancel();
        self.repo
            .update(&appeal)
            .await
            .map_err(ServiceError::Repository)?;

        self.record_audit(AUDIT_KEY_CANCEL, serde_json::json!({ "appeal_id": id }))
            .await;
        Ok(appeal)
    }

    /// Revoke an appeal's access.
    ///
    /// The terminated copy is persisted first; if the provider then fails
    /// to revoke, the original row is restored and the error returned.
    /// Revocation is only complete once access is gone at the provider.
    pub async fn revoke(&self, id: &str, actor: &str, reason: &str) -> ServiceResult<Appeal> {
        let original = self.get_by_id(id).await?;

        let mut revoked = original.clone();
        revoked.terminate(self.clock.now(), actor, reason);
        self.repo
            .update(&revoked)
            .await
            .map_err(ServiceError::Repository)?;

        if let Err(err) = self.providers.revoke_access(&original).await {
            self.repo
                .update(&original)
                .await
                .map_err(ServiceError::Repository)?;
            return Err(ServiceError::RevokeAccess(err));
        }

        self.dispatch_notifications(vec![Notification {
            user: original.created_by.clone(),
            message: NotificationMessage::AccessRevoked {
                resource_name: resource_display(&original),
                role: original.role.clone(),
            },
        }])
        .await;
        self.record_audit(
            AUDIT_KEY_REVOKE,
            serde_json::json!({ "appeal_id": id, "reason": reason }),
        )
        .await;

        Ok(revoked)
    }

    // ============ Approver management ============

    /// Add an approver to a pending or blocked manual step of a pending
    /// appeal.
    pub async fn add_approver(
        &self,
        appeal_id: &str,
        approval_ref: &str,
        email: &str,
    ) -> ServiceResult<Appeal> {
        if appeal_id.is_empty() {
            return Err(ServiceError::AppealIdRequired);
        }
        if approval_ref.is_empty() {
            return Err(ServiceError::ApprovalIdRequired);
        }
        if !is_valid_email(email) {
            return Err(ServiceError::InvalidApprover(email.to_string()));
        }

        let mut appeal = self.get_by_id(appeal_id).await?;
        if appeal.status != AppealStatus::Pending {
            return Err(ServiceError::UnableToAddApprover(format!(
                "appeal is already {}",
                appeal.status
            )));
        }

        let notify_now;
        {
            let approval = find_approval_mut(&mut appeal.approvals, approval_ref)
                .ok_or_else(|| ServiceError::ApprovalNotFound(approval_ref.to_string()))?;
            match approval.status {
                ApprovalStatus::Pending | ApprovalStatus::Blocked => {}
                other => {
                    return Err(ServiceError::UnableToAddApprover(format!(
                        "approval is already {other}"
                    )))
                }
            }
            if !approval.is_manual() {
                return Err(ServiceError::UnableToAddApprover(
                    "the approval step is automatic".to_string(),
                ));
            }
            if approval.has_approver(email) {
                return Err(ServiceError::UnableToAddApprover(format!(
                    "{email} is already an approver"
                )));
            }
            approval.approvers.push(email.to_string());
            approval.updated_at = self.clock.now();
            notify_now = approval.status == ApprovalStatus::Pending;
        }

        self.repo
            .update(&appeal)
            .await
            .map_err(ServiceError::Repository)?;
        self.record_audit(
            AUDIT_KEY_ADD_APPROVER,
            serde_json::json!({
                "appeal_id": appeal_id,
                "approval": approval_ref,
                "email": email,
            }),
        )
        .await;

        if notify_now {
            self.dispatch_notifications(vec![Notification {
                user: email.to_string(),
                message: NotificationMessage::ApproverNotification {
                    resource_name: resource_display(&appeal),
                    role: appeal.role.clone(),
                    requestor: appeal.created_by.clone(),
                    appeal_id: appeal.id.clone(),
                },
            }])
            .await;
        }

        Ok(appeal)
    }

    /// Remove an approver from a pending or blocked manual step. The last
    /// remaining approver of a step cannot be removed.
    pub async fn delete_approver(
        &self,
        appeal_id: &str,
        approval_ref: &str,
        email: &str,
    ) -> ServiceResult<Appeal> {
        if appeal_id.is_empty() {
            return Err(ServiceError::AppealIdRequired);
        }
        if approval_ref.is_empty() {
            return Err(ServiceError::ApprovalIdRequired);
        }

        let mut appeal = self.get_by_id(appeal_id).await?;
        if appeal.status != AppealStatus::Pending {
            return Err(ServiceError::UnableToDeleteApprover(format!(
                "appeal is already {}",
                appeal.status
            )));
        }

        {
            let approval = find_approval_mut(&mut appeal.approvals, approval_ref)
                .ok_or_else(|| ServiceError::ApprovalNotFound(approval_ref.to_string()))?;
            match approval.status {
                ApprovalStatus::Pending | ApprovalStatus::Blocked => {}
                other => {
                    return Err(ServiceError::UnableToDeleteApprover(format!(
                        "approval is already {other}"
                    )))
                }
            }
            if !approval.is_manual() {
                return Err(ServiceError::UnableToDeleteApprover(
                    "the approval step is automatic".to_string(),
                ));
            }
            if !approval.has_approver(email) {
                return Err(ServiceError::UnableToDeleteApprover(format!(
                    "{email} is not an approver of this step"
                )));
            }
            if approval.approvers.len() == 1 {
                return Err(ServiceError::UnableToDeleteApprover(
                    "cannot remove the last approver of a step".to_string(),
                ));
            }
            approval.approvers.retain(|a| a != email);
            approval.updated_at = self.clock.now();
        }

        self.repo
            .update(&appeal)
            .await
            .map_err(ServiceError::Repository)?;
        self.record_audit(
            AUDIT_KEY_DELETE_APPROVER,
            serde_json::json!({
                "appeal_id": appeal_id,
                "approval": approval_ref,
                "email": email,
            }),
        )
        .await;

        Ok(appeal)
    }

    // ============ Internals ============

    /// Grant access for a fully approved appeal: spawn any appeals the
    /// policy's requirements demand, call the provider, and activate.
    async fn create_access(&self, appeal: &mut Appeal, policy: &Policy) -> ServiceResult<()> {
        self.handle_requirements(appeal, policy).await?;
        self.providers
            .grant_access(appeal)
            .await
            .map_err(ServiceError::GrantAccess)?;
        appeal.activate(self.clock.now())?;
        Ok(())
    }

    /// Spawn the additional appeals configured by matching requirements.
    /// Duplicates of already-pending requests are skipped silently.
    async fn handle_requirements(&self, appeal: &Appeal, policy: &Policy) -> ServiceResult<()> {
        for requirement in &policy.requirements {
            if !requirement.on.matches(appeal)? {
                continue;
            }
            for additional in &requirement.appeals {
                let resource = self
                    .resources
                    .get(&additional.resource)
                    .await
                    .map_err(ServiceError::ResourceLookup)?
                    .ok_or_else(|| {
                        ServiceError::ResourceNotFound(
                            additional.resource.id.clone().unwrap_or_default(),
                        )
                    })?;

                let mut spawned = Appeal::new(
                    resource.id.clone(),
                    appeal.account_id.clone(),
                    appeal.created_by.clone(),
                    additional.role.clone(),
                );
                spawned.account_type = appeal.account_type.clone();
                if let Some(options) = &additional.options {
                    spawned.options = Some(options.clone());
                }
                if let Some(policy_ref) = &additional.policy {
                    spawned.policy_id = policy_ref.id.clone();
                    spawned.policy_version = policy_ref.version;
                }

                match self.create_boxed(vec![spawned]).await {
                    Ok(_) => {}
                    Err(ServiceError::AppealDuplicate) => continue,
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// Boxed recursion point: additional appeals run through the full
    /// `create` flow.
    fn create_boxed<'a>(
        &'a self,
        appeals: Vec<Appeal>,
    ) -> Pin<Box<dyn Future<Output = ServiceResult<Vec<Appeal>>> + Send + 'a>> {
        Box::pin(self.create(appeals))
    }

    fn check_extension_eligibility(
        &self,
        appeal: &Appeal,
        config: Option<&AppealConfig>,
        active_index: &AppealIndex,
    ) -> ServiceResult<()> {
        let Some(existing) = active_index.get(&AppealKey::of(appeal)) else {
            return Ok(());
        };
        let Some(window) = config.and_then(|c| c.allow_active_access_extension_in.as_deref())
        else {
            return Err(ServiceError::FoundActiveAccess);
        };
        let window =
            parse_duration(window).map_err(|source| ServiceError::InvalidExtensionDuration {
                value: window.to_string(),
                source,
            })?;

        match existing.expiration_date() {
            // Eligible once inside the window before the current expiry.
            Some(expiry) => {
                if expiry - self.clock.now() <= window {
                    Ok(())
                } else {
                    Err(ServiceError::NotEligibleForExtension)
                }
            }
            // Permanent existing access can always be re-requested.
            None => Ok(()),
        }
    }

    /// Fetch requester attributes through the policy's IAM client, mapped
    /// through the configured schema when one is present.
    async fn attach_creator_details(
        &self,
        appeal: &mut Appeal,
        policy: &Policy,
    ) -> ServiceResult<()> {
        let Some(iam_config) = &policy.iam else {
            return Ok(());
        };
        let client_config = self
            .iam
            .parse_config(iam_config)
            .map_err(ServiceError::CreatorDetails)?;
        let client = self
            .iam
            .get_client(&client_config)
            .map_err(ServiceError::CreatorDetails)?;
        let user = client
            .get_user(&appeal.created_by)
            .await
            .map_err(ServiceError::CreatorDetails)?;

        let creator = match (&iam_config.schema, user) {
            (Some(schema), serde_json::Value::Object(details)) => {
                let mut mapped = serde_json::Map::new();
                for (key, source_key) in schema {
                    mapped.insert(
                        key.clone(),
                        details
                            .get(source_key)
                            .cloned()
                            .unwrap_or(serde_json::Value::Null),
                    );
                }
                serde_json::Value::Object(mapped)
            }
            (_, value) => value,
        };
        appeal.creator = Some(creator);
        Ok(())
    }

    async fn policy_for(&self, appeal: &Appeal) -> ServiceResult<Policy> {
        self.policies
            .get_one(&appeal.policy_id, appeal.policy_version)
            .await
            .map_err(ServiceError::PolicyLookup)?
            .ok_or_else(|| ServiceError::PolicyNotFound {
                id: appeal.policy_id.clone(),
                version: appeal.policy_version,
            })
    }

    async fn dispatch_notifications(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        for err in self.notifier.notify(&notifications).await {
            warn!(error = %err, "failed to send notification");
        }
    }

    async fn record_audit(&self, action: &str, payload: serde_json::Value) {
        if let Err(err) = self.audit.log(action, &payload).await {
            warn!(error = %err, action, "failed to record audit log");
        }
    }
}

fn check_on_behalf(appeal: &Appeal, config: Option<&AppealConfig>) -> ServiceResult<()> {
    if appeal.account_type == DEFAULT_ACCOUNT_TYPE
        && appeal.account_id != appeal.created_by
        && !config.is_some_and(|c| c.allow_on_behalf)
    {
        return Err(ServiceError::CannotCreateAppealForOtherUser);
    }
    Ok(())
}

fn validate_options(appeal: &Appeal, config: Option<&AppealConfig>) -> ServiceResult<()> {
    let duration = appeal
        .options
        .as_ref()
        .and_then(|o| o.duration.as_deref())
        .unwrap_or("");
    let has_expiry = appeal
        .options
        .as_ref()
        .is_some_and(|o| o.expiration_date.is_some());

    if duration.is_empty() && !has_expiry {
        if let Some(config) = config {
            if !config.allow_permanent_access {
                return Err(ServiceError::DurationRequired);
            }
        }
    } else if !duration.is_empty() {
        parse_duration(duration)?;
    }
    Ok(())
}

fn check_appeal_pending(status: AppealStatus) -> ServiceResult<()> {
    match status {
        AppealStatus::Pending => Ok(()),
        AppealStatus::Canceled => Err(ServiceError::AppealStatusCanceled),
        AppealStatus::Active => Err(ServiceError::AppealStatusApproved),
        AppealStatus::Rejected => Err(ServiceError::AppealStatusRejected),
        AppealStatus::Terminated => Err(ServiceError::AppealStatusTerminated),
    }
}

fn check_dependency_resolved(status: ApprovalStatus) -> ServiceResult<()> {
    match status {
        ApprovalStatus::Approved | ApprovalStatus::Skipped => Ok(()),
        ApprovalStatus::Blocked => Err(ServiceError::ApprovalDependencyIsBlocked),
        ApprovalStatus::Pending => Err(ServiceError::ApprovalDependencyIsPending),
        ApprovalStatus::Rejected => Err(ServiceError::AppealStatusRejected),
    }
}

fn approval_status_conflict(status: ApprovalStatus) -> Option<ServiceError> {
    match status {
        ApprovalStatus::Pending => None,
        ApprovalStatus::Blocked => Some(ServiceError::ApprovalBlocked),
        ApprovalStatus::Approved => Some(ServiceError::ApprovalStatusApproved),
        ApprovalStatus::Rejected => Some(ServiceError::ApprovalStatusRejected),
        ApprovalStatus::Skipped => Some(ServiceError::ApprovalStatusSkipped),
    }
}

fn find_approval_mut<'a>(
    approvals: &'a mut [Approval],
    approval_ref: &str,
) -> Option<&'a mut Approval> {
    approvals
        .iter_mut()
        .find(|a| a.name == approval_ref || a.id == approval_ref)
}

fn resource_display(appeal: &Appeal) -> String {
    appeal
        .resource
        .as_ref()
        .map(|r| r.display_name())
        .unwrap_or_else(|| appeal.resource_id.clone())
}

/// One notification per approver of the current pending manual step.
fn approver_notifications(appeal: &Appeal) -> Vec<Notification> {
    let Some(approval) = appeal.next_pending_approval() else {
        return Vec::new();
    };
    approval
        .approvers
        .iter()
        .map(|approver| Notification {
            user: approver.clone(),
            message: NotificationMessage::ApproverNotification {
                resource_name: resource_display(appeal),
                role: appeal.role.clone(),
                requestor: appeal.created_by.clone(),
                appeal_id: appeal.id.clone(),
            },
        })
        .collect()
}
