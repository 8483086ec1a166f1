//! Collaborator contracts consumed by the orchestrator.
//!
//! The engine owns none of these concerns; each contract is the narrow
//! surface of an external subsystem (storage, provider plugins, IAM,
//! messaging, audit). Implementations live outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use warden_types::{
    Appeal, AppealFilter, IamConfig, Notification, Policy, Provider, Resource, ResourceFilter,
    ResourceIdentifier,
};

/// Opaque error produced by a collaborator implementation.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Appeal persistence.
///
/// `update` carries optimistic semantics: it fails when the stored row
/// changed since it was read, and the caller must re-fetch before retrying.
#[async_trait]
pub trait AppealRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<Appeal>, CollaboratorError>;
    async fn find(&self, filter: &AppealFilter) -> Result<Vec<Appeal>, CollaboratorError>;
    async fn bulk_upsert(&self, appeals: &[Appeal]) -> Result<(), CollaboratorError>;
    async fn update(&self, appeal: &Appeal) -> Result<(), CollaboratorError>;
}

/// Read access to the resource inventory.
#[async_trait]
pub trait ResourceService: Send + Sync {
    async fn find(&self, filter: &ResourceFilter) -> Result<Vec<Resource>, CollaboratorError>;
    async fn get(
        &self,
        identifier: &ResourceIdentifier,
    ) -> Result<Option<Resource>, CollaboratorError>;
}

/// Provider plugins: validation plus the actual grant/revoke side effects.
#[async_trait]
pub trait ProviderService: Send + Sync {
    async fn find(&self) -> Result<Vec<Provider>, CollaboratorError>;
    async fn validate_appeal(
        &self,
        appeal: &Appeal,
        provider: &Provider,
    ) -> Result<(), CollaboratorError>;
    async fn grant_access(&self, appeal: &Appeal) -> Result<(), CollaboratorError>;
    async fn revoke_access(&self, appeal: &Appeal) -> Result<(), CollaboratorError>;
}

/// Read access to published policies.
#[async_trait]
pub trait PolicyService: Send + Sync {
    async fn find(&self) -> Result<Vec<Policy>, CollaboratorError>;
    async fn get_one(&self, id: &str, version: u32)
        -> Result<Option<Policy>, CollaboratorError>;
}

/// A configured identity client.
#[async_trait]
pub trait IamClient: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<serde_json::Value, CollaboratorError>;
    async fn is_active_user(&self, id: &str) -> Result<bool, CollaboratorError>;
}

/// Parses policy-level IAM configuration and hands out clients.
pub trait IamManager: Send + Sync {
    fn parse_config(&self, config: &IamConfig) -> Result<serde_json::Value, CollaboratorError>;
    fn get_client(
        &self,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn IamClient>, CollaboratorError>;
}

/// Fire-and-forget message delivery. Failures are returned per notification
/// and are logged by the caller, never propagated.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notifications: &[Notification]) -> Vec<CollaboratorError>;
}

/// Best-effort audit trail.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, action: &str, payload: &serde_json::Value)
        -> Result<(), CollaboratorError>;
}

/// Injected time source, so eligibility windows and expirations are
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
