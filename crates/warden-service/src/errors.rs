//! Error types for orchestrator operations.
//!
//! Kinds, not just codes: validation errors mutate nothing; state-conflict
//! errors require the caller to re-fetch before retrying; lookup failures
//! are terminal for the request; expression failures point at policy
//! authoring; collaborator failures carry their operation context.

use crate::CollaboratorError;
use thiserror::Error;
use warden_engine::EngineError;
use warden_types::{ConditionError, DurationParseError};

#[derive(Debug, Error)]
pub enum ServiceError {
    // Validation
    #[error("appeal id is required")]
    AppealIdRequired,

    #[error("approval id/name is required")]
    ApprovalIdRequired,

    #[error("actor must be a valid email: {0:?}")]
    InvalidActor(String),

    #[error("approver must be a valid email: {0:?}")]
    InvalidApprover(String),

    #[error("having permanent access to this resource is not allowed, access duration is required")]
    DurationRequired,

    #[error("invalid access duration: {0}")]
    InvalidDuration(#[from] DurationParseError),

    #[error("invalid appeal extension duration {value:?}: {source}")]
    InvalidExtensionDuration {
        value: String,
        source: DurationParseError,
    },

    // State conflicts
    #[error("appeal already canceled")]
    AppealStatusCanceled,

    #[error("appeal already approved")]
    AppealStatusApproved,

    #[error("appeal already rejected")]
    AppealStatusRejected,

    #[error("appeal already terminated")]
    AppealStatusTerminated,

    #[error("an appeal for the same account, resource, and role is already pending")]
    AppealDuplicate,

    #[error("account still has an active access for this resource and role")]
    FoundActiveAccess,

    #[error("existing active access is not yet eligible for extension")]
    NotEligibleForExtension,

    #[error("creating an appeal on behalf of another user is not allowed")]
    CannotCreateAppealForOtherUser,

    #[error("found a previous approval step that is still blocked")]
    ApprovalDependencyIsBlocked,

    #[error("found a previous approval step that is still pending")]
    ApprovalDependencyIsPending,

    #[error("approval is blocked")]
    ApprovalBlocked,

    #[error("approval already approved")]
    ApprovalStatusApproved,

    #[error("approval already rejected")]
    ApprovalStatusRejected,

    #[error("approval already skipped")]
    ApprovalStatusSkipped,

    #[error("user is not allowed to act on this approval step")]
    ActionForbidden,

    #[error("unable to add a new approver: {0}")]
    UnableToAddApprover(String),

    #[error("unable to remove approver: {0}")]
    UnableToDeleteApprover(String),

    // Lookups
    #[error("appeal {0:?} not found")]
    AppealNotFound(String),

    #[error("approval {0:?} not found")]
    ApprovalNotFound(String),

    #[error("approval policy {id:?} version {version} not found")]
    PolicyNotFound { id: String, version: u32 },

    #[error("resource {0:?} not found")]
    ResourceNotFound(String),

    // Policy resolution and expression evaluation
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("evaluating requirement trigger: {0}")]
    Requirement(#[from] ConditionError),

    // Collaborators, wrapped with operation context
    #[error("repository error: {0}")]
    Repository(CollaboratorError),

    #[error("resource service error: {0}")]
    ResourceLookup(CollaboratorError),

    #[error("provider service error: {0}")]
    Provider(CollaboratorError),

    #[error("policy service error: {0}")]
    PolicyLookup(CollaboratorError),

    #[error("granting access: {0}")]
    GrantAccess(CollaboratorError),

    #[error("revoking access: {0}")]
    RevokeAccess(CollaboratorError),

    #[error("retrieving creator details: {0}")]
    CreatorDetails(CollaboratorError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
