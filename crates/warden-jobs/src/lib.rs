//! Warden Jobs - Batch maintenance jobs for appeal expiry and dormancy.
//!
//! These entry points are invoked by an external scheduler; the engine
//! defines no cron surface of its own. Each job is a plain async function
//! over the orchestrator's narrow [`AppealFlow`] contract:
//!
//! - [`JobHandler::revoke_expired_access`] revokes active appeals past
//!   their expiration date.
//! - [`JobHandler::notify_about_to_expire_access`] reminds requesters at
//!   fixed day marks before expiry.
//! - [`JobHandler::revoke_dormant_account_access`] revokes all appeals of
//!   accounts an IAM client reports inactive, fanning out over a bounded,
//!   rate-limited worker pool.
//!
//! Revokes on distinct appeal ids are independent and safely concurrent;
//! the pool never issues two revokes for the same appeal.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveTime};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};
use warden_service::{
    AppealService, Clock, IamManager, Notifier, PolicyService, ServiceResult,
};
use warden_types::{
    Appeal, AppealFilter, AppealStatus, Notification, NotificationMessage, DEFAULT_ACCOUNT_TYPE,
    SYSTEM_ACTOR,
};

const EXPIRED_REVOKE_REASON: &str = "Automatically revoked";
const DORMANT_REVOKE_REASON: &str = "Automatically revoked since the account is dormant";

/// Days before expiry at which reminders are sent.
const REMINDER_DAYS: [i64; 3] = [7, 3, 1];

/// The slice of the orchestrator the jobs need.
#[async_trait]
pub trait AppealFlow: Send + Sync {
    async fn find(&self, filter: &AppealFilter) -> ServiceResult<Vec<Appeal>>;
    async fn revoke(&self, id: &str, actor: &str, reason: &str) -> ServiceResult<Appeal>;
}

#[async_trait]
impl AppealFlow for AppealService {
    async fn find(&self, filter: &AppealFilter) -> ServiceResult<Vec<Appeal>> {
        AppealService::find(self, filter).await
    }

    async fn revoke(&self, id: &str, actor: &str, reason: &str) -> ServiceResult<Appeal> {
        AppealService::revoke(self, id, actor, reason).await
    }
}

/// Outcome of a batch job run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl JobReport {
    fn merge(&mut self, other: JobReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct DormantKey {
    account_id: String,
    policy_id: String,
    policy_version: u32,
}

/// Runs the periodic maintenance jobs.
pub struct JobHandler {
    appeals: Arc<dyn AppealFlow>,
    policies: Arc<dyn PolicyService>,
    iam: Arc<dyn IamManager>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl JobHandler {
    pub fn new(
        appeals: Arc<dyn AppealFlow>,
        policies: Arc<dyn PolicyService>,
        iam: Arc<dyn IamManager>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            appeals,
            policies,
            iam,
            notifier,
            clock,
        }
    }

    /// Revoke every active appeal whose expiration date has passed.
    pub async fn revoke_expired_access(&self) -> ServiceResult<JobReport> {
        let filter = AppealFilter {
            statuses: vec![AppealStatus::Active],
            expiration_date_less_than: Some(self.clock.now()),
            ..AppealFilter::default()
        };
        let appeals = self.appeals.find(&filter).await?;
        info!(count = appeals.len(), "found appeals with expired access");

        let mut report = JobReport::default();
        for appeal in appeals {
            match self
                .appeals
                .revoke(&appeal.id, SYSTEM_ACTOR, EXPIRED_REVOKE_REASON)
                .await
            {
                Ok(_) => {
                    info!(appeal_id = %appeal.id, "expired access revoked");
                    report.succeeded.push(appeal.id);
                }
                Err(err) => {
                    warn!(appeal_id = %appeal.id, error = %err, "failed to revoke expired access");
                    report.failed.push((appeal.id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Send expiration reminders for appeals expiring 7, 3, and 1 days from
    /// now. Returns the number of reminders handed to the notifier.
    pub async fn notify_about_to_expire_access(&self) -> ServiceResult<usize> {
        let mut notifications = Vec::new();
        for days in REMINDER_DAYS {
            let target = self.clock.now() + Duration::days(days);
            let from = target.date_naive().and_time(NaiveTime::MIN).and_utc();
            let to = from + Duration::days(1);

            let filter = AppealFilter {
                statuses: vec![AppealStatus::Active],
                expiration_date_greater_than: Some(from),
                expiration_date_less_than: Some(to),
                ..AppealFilter::default()
            };
            let appeals = match self.appeals.find(&filter).await {
                Ok(appeals) => appeals,
                Err(err) => {
                    warn!(days, error = %err, "unable to list appeals for expiration reminders");
                    continue;
                }
            };

            for appeal in appeals {
                let Some(expiration_date) = appeal.expiration_date() else {
                    continue;
                };
                notifications.push(Notification {
                    user: appeal.account_id.clone(),
                    message: NotificationMessage::ExpirationReminder {
                        resource_name: resource_display(&appeal),
                        role: appeal.role.clone(),
                        expiration_date,
                    },
                });
            }
        }

        let count = notifications.len();
        if count > 0 {
            for err in self.notifier.notify(&notifications).await {
                warn!(error = %err, "failed to send expiration reminder");
            }
        }
        Ok(count)
    }

    /// Revoke all active user appeals of dormant accounts.
    ///
    /// Appeals are grouped per `(account, policy id, policy version)` and
    /// each group is checked against the policy's IAM client on its own
    /// worker. Workers draw tokens from a bucket of `batch_size` permits
    /// refilled every `refill_interval`, and report back on a completion
    /// channel, so distinct appeals are revoked concurrently while the IAM
    /// backend sees a bounded request rate.
    pub async fn revoke_dormant_account_access(
        &self,
        batch_size: usize,
        refill_interval: StdDuration,
    ) -> ServiceResult<JobReport> {
        let filter = AppealFilter {
            account_type: Some(DEFAULT_ACCOUNT_TYPE.to_string()),
            statuses: vec![AppealStatus::Active],
            ..AppealFilter::default()
        };
        let appeals = self.appeals.find(&filter).await?;
        if appeals.is_empty() {
            return Ok(JobReport::default());
        }

        let mut groups: HashMap<DormantKey, Vec<Appeal>> = HashMap::new();
        for appeal in appeals {
            let key = DormantKey {
                account_id: appeal.account_id.clone(),
                policy_id: appeal.policy_id.clone(),
                policy_version: appeal.policy_version,
            };
            groups.entry(key).or_default().push(appeal);
        }

        let limiter = Arc::new(Semaphore::new(batch_size));
        let refill = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(refill_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let available = limiter.available_permits();
                    if available < batch_size {
                        limiter.add_permits(batch_size - available);
                    }
                }
            })
        };

        let (done_tx, mut done_rx) = mpsc::channel::<JobReport>(groups.len());
        let mut spawned = 0usize;

        for (key, group) in groups {
            let policy = match self
                .policies
                .get_one(&key.policy_id, key.policy_version)
                .await
            {
                Ok(Some(policy)) => policy,
                Ok(None) => {
                    warn!(
                        policy_id = %key.policy_id,
                        policy_version = key.policy_version,
                        "policy not found, skipping dormancy check for its appeals",
                    );
                    continue;
                }
                Err(err) => {
                    warn!(policy_id = %key.policy_id, error = %err, "failed to get policy");
                    continue;
                }
            };
            let Some(iam_config) = &policy.iam else {
                continue;
            };
            let client = match self
                .iam
                .parse_config(iam_config)
                .and_then(|config| self.iam.get_client(&config))
            {
                Ok(client) => client,
                Err(err) => {
                    warn!(policy_id = %key.policy_id, error = %err, "failed to build iam client");
                    continue;
                }
            };

            let appeals = Arc::clone(&self.appeals);
            let limiter = Arc::clone(&limiter);
            let done = done_tx.clone();
            let account_id = key.account_id.clone();
            spawned += 1;

            tokio::spawn(async move {
                let Ok(permit) = limiter.acquire_owned().await else {
                    let _ = done.send(JobReport::default()).await;
                    return;
                };
                // Consume the token; the refill task replaces it.
                permit.forget();

                let mut report = JobReport::default();
                match client.is_active_user(&account_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        for appeal in &group {
                            match appeals
                                .revoke(&appeal.id, SYSTEM_ACTOR, DORMANT_REVOKE_REASON)
                                .await
                            {
                                Ok(_) => {
                                    info!(appeal_id = %appeal.id, account = %account_id, "dormant appeal revoked");
                                    report.succeeded.push(appeal.id.clone());
                                }
                                Err(err) => {
                                    warn!(appeal_id = %appeal.id, error = %err, "failed to revoke dormant appeal");
                                    report.failed.push((appeal.id.clone(), err.to_string()));
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(account = %account_id, error = %err, "failed to check account activity");
                    }
                }
                let _ = done.send(report).await;
            });
        }
        drop(done_tx);

        let mut combined = JobReport::default();
        for _ in 0..spawned {
            if let Some(report) = done_rx.recv().await {
                combined.merge(report);
            }
        }
        refill.abort();

        info!(
            succeeded = combined.succeeded.len(),
            failed = combined.failed.len(),
            "dormant account revocation finished",
        );
        Ok(combined)
    }
}

fn resource_display(appeal: &Appeal) -> String {
    appeal
        .resource
        .as_ref()
        .map(|r| r.display_name())
        .unwrap_or_else(|| appeal.resource_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use warden_service::{CollaboratorError, IamClient, ServiceError};
    use warden_types::{AppealOptions, IamConfig, Policy, Step, StepStrategy};

    struct FakeFlow {
        appeals: Mutex<Vec<Appeal>>,
        revoked: Mutex<Vec<String>>,
        fail_ids: HashSet<String>,
    }

    impl FakeFlow {
        fn new(appeals: Vec<Appeal>) -> Self {
            Self {
                appeals: Mutex::new(appeals),
                revoked: Mutex::new(Vec::new()),
                fail_ids: HashSet::new(),
            }
        }

        fn revoked(&self) -> Vec<String> {
            self.revoked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AppealFlow for FakeFlow {
        async fn find(&self, filter: &AppealFilter) -> ServiceResult<Vec<Appeal>> {
            Ok(self
                .appeals
                .lock()
                .unwrap()
                .iter()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect())
        }

        async fn revoke(&self, id: &str, _actor: &str, _reason: &str) -> ServiceResult<Appeal> {
            if self.fail_ids.contains(id) {
                return Err(ServiceError::AppealNotFound(id.to_string()));
            }
            self.revoked.lock().unwrap().push(id.to_string());
            let mut appeals = self.appeals.lock().unwrap();
            let appeal = appeals
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| ServiceError::AppealNotFound(id.to_string()))?;
            appeal.terminate(Utc::now(), SYSTEM_ACTOR, "revoked");
            Ok(appeal.clone())
        }
    }

    struct StaticPolicies(Vec<Policy>);

    #[async_trait]
    impl PolicyService for StaticPolicies {
        async fn find(&self) -> Result<Vec<Policy>, CollaboratorError> {
            Ok(self.0.clone())
        }

        async fn get_one(
            &self,
            id: &str,
            version: u32,
        ) -> Result<Option<Policy>, CollaboratorError> {
            Ok(self
                .0
                .iter()
                .find(|p| p.id == id && p.version == version)
                .cloned())
        }
    }

    struct ActivityIam {
        inactive: HashSet<String>,
    }

    impl IamManager for ActivityIam {
        fn parse_config(
            &self,
            config: &IamConfig,
        ) -> Result<serde_json::Value, CollaboratorError> {
            Ok(config.config.clone())
        }

        fn get_client(
            &self,
            _config: &serde_json::Value,
        ) -> Result<Arc<dyn IamClient>, CollaboratorError> {
            Ok(Arc::new(ActivityClient {
                inactive: self.inactive.clone(),
            }))
        }
    }

    struct ActivityClient {
        inactive: HashSet<String>,
    }

    #[async_trait]
    impl IamClient for ActivityClient {
        async fn get_user(&self, _id: &str) -> Result<serde_json::Value, CollaboratorError> {
            Ok(serde_json::Value::Null)
        }

        async fn is_active_user(&self, id: &str) -> Result<bool, CollaboratorError> {
            Ok(!self.inactive.contains(id))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<Notification>>);

    impl RecordingNotifier {
        fn sent(&self) -> Vec<Notification> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notifications: &[Notification]) -> Vec<CollaboratorError> {
            self.0.lock().unwrap().extend_from_slice(notifications);
            Vec::new()
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn active_appeal(id: &str, account: &str, expiry: Option<DateTime<Utc>>) -> Appeal {
        let mut appeal = Appeal::new("res-1", account, account, "viewer");
        appeal.id = id.to_string();
        appeal.status = AppealStatus::Active;
        appeal.policy_id = "db-access".to_string();
        appeal.policy_version = 1;
        appeal.options = expiry.map(|date| AppealOptions {
            duration: None,
            expiration_date: Some(date),
        });
        appeal
    }

    fn dormancy_policy() -> Policy {
        let mut policy = Policy::new(
            "db-access",
            1,
            vec![Step {
                name: "auto".to_string(),
                description: None,
                strategy: StepStrategy::Auto,
                when: None,
                approve_if: Some("true".to_string()),
                approvers: vec![],
                rejection_reason: None,
                allow_failed: false,
            }],
        );
        policy.iam = Some(IamConfig {
            provider: "http".to_string(),
            config: serde_json::json!({}),
            schema: None,
        });
        policy
    }

    fn handler(flow: Arc<FakeFlow>, now: DateTime<Utc>, inactive: &[&str]) -> JobHandler {
        JobHandler::new(
            flow,
            Arc::new(StaticPolicies(vec![dormancy_policy()])),
            Arc::new(ActivityIam {
                inactive: inactive.iter().map(|s| s.to_string()).collect(),
            }),
            Arc::new(RecordingNotifier::default()),
            Arc::new(FixedClock(now)),
        )
    }

    #[tokio::test]
    async fn revokes_only_expired_active_appeals() {
        let now = Utc::now();
        let flow = Arc::new(FakeFlow::new(vec![
            active_appeal("expired-1", "u1@x.com", Some(now - Duration::hours(2))),
            active_appeal("expired-2", "u2@x.com", Some(now - Duration::minutes(1))),
            active_appeal("current", "u3@x.com", Some(now + Duration::hours(4))),
            active_appeal("permanent", "u4@x.com", None),
        ]));
        let handler = handler(Arc::clone(&flow), now, &[]);

        let report = handler.revoke_expired_access().await.unwrap();

        let mut succeeded = report.succeeded.clone();
        succeeded.sort();
        assert_eq!(succeeded, vec!["expired-1", "expired-2"]);
        assert!(report.failed.is_empty());
        assert_eq!(flow.revoked().len(), 2);
    }

    #[tokio::test]
    async fn reports_failed_revocations() {
        let now = Utc::now();
        let mut flow = FakeFlow::new(vec![
            active_appeal("ok", "u1@x.com", Some(now - Duration::hours(1))),
            active_appeal("broken", "u2@x.com", Some(now - Duration::hours(1))),
        ]);
        flow.fail_ids.insert("broken".to_string());
        let handler = handler(Arc::new(flow), now, &[]);

        let report = handler.revoke_expired_access().await.unwrap();
        assert_eq!(report.succeeded, vec!["ok"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
    }

    #[tokio::test]
    async fn reminds_at_the_configured_day_marks() {
        let now = Utc::now();
        let flow = Arc::new(FakeFlow::new(vec![
            active_appeal("in-7d", "u1@x.com", Some(now + Duration::days(7))),
            active_appeal("in-3d", "u2@x.com", Some(now + Duration::days(3))),
            active_appeal("in-1d", "u3@x.com", Some(now + Duration::days(1))),
            active_appeal("in-10d", "u4@x.com", Some(now + Duration::days(10))),
        ]));
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = JobHandler::new(
            Arc::clone(&flow) as Arc<dyn AppealFlow>,
            Arc::new(StaticPolicies(vec![])),
            Arc::new(ActivityIam {
                inactive: HashSet::new(),
            }),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::new(FixedClock(now)),
        );

        let count = handler.notify_about_to_expire_access().await.unwrap();
        assert_eq!(count, 3);

        let recipients: HashSet<String> =
            notifier.sent().into_iter().map(|n| n.user).collect();
        assert_eq!(
            recipients,
            HashSet::from([
                "u1@x.com".to_string(),
                "u2@x.com".to_string(),
                "u3@x.com".to_string(),
            ])
        );
        assert!(notifier
            .sent()
            .iter()
            .all(|n| matches!(n.message, NotificationMessage::ExpirationReminder { .. })));
    }

    #[tokio::test]
    async fn dormant_accounts_lose_all_their_appeals() {
        let now = Utc::now();
        let flow = Arc::new(FakeFlow::new(vec![
            active_appeal("dormant-a", "ghost@x.com", Some(now + Duration::days(30))),
            active_appeal("dormant-b", "ghost@x.com", None),
            active_appeal("active-a", "alive@x.com", Some(now + Duration::days(30))),
        ]));
        let handler = handler(Arc::clone(&flow), now, &["ghost@x.com"]);

        let report = handler
            .revoke_dormant_account_access(2, StdDuration::from_millis(10))
            .await
            .unwrap();

        let mut succeeded = report.succeeded.clone();
        succeeded.sort();
        assert_eq!(succeeded, vec!["dormant-a", "dormant-b"]);
        assert!(report.failed.is_empty());
        assert!(!flow.revoked().contains(&"active-a".to_string()));
    }

    #[tokio::test]
    async fn dormancy_check_handles_many_accounts_with_a_small_bucket() {
        let now = Utc::now();
        let appeals: Vec<Appeal> = (0..10)
            .map(|i| {
                active_appeal(
                    &format!("appeal-{i}"),
                    &format!("ghost{i}@x.com"),
                    Some(now + Duration::days(5)),
                )
            })
            .collect();
        let flow = Arc::new(FakeFlow::new(appeals));
        let inactive: Vec<String> = (0..10).map(|i| format!("ghost{i}@x.com")).collect();
        let inactive_refs: Vec<&str> = inactive.iter().map(String::as_str).collect();
        let handler = handler(Arc::clone(&flow), now, &inactive_refs);

        let report = handler
            .revoke_dormant_account_access(3, StdDuration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(report.succeeded.len(), 10);
        assert_eq!(flow.revoked().len(), 10);
    }
}
