//! Error types for policy resolution and approval advancement.

use thiserror::Error;
use warden_expr::ExprError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider type {0:?} is not registered")]
    ProviderTypeNotFound(String),

    #[error("provider with urn {0:?} is not registered")]
    ProviderUrnNotFound(String),

    #[error("no matching resource config for resource type {0:?}")]
    ResourceTypeNotFound(String),

    #[error("resource {0:?} not found")]
    ResourceNotFound(String),

    #[error("resource {0:?} is deleted")]
    ResourceDeleted(String),

    #[error("approval policy {0:?} not found")]
    PolicyIdNotFound(String),

    #[error("approval policy {id:?} has no version {version}")]
    PolicyVersionNotFound { id: String, version: u32 },

    #[error("auto step {0:?} has no approve_if expression")]
    MissingApproveIf(String),

    #[error("approval {name:?} references policy step index {index} which does not exist")]
    StepNotFound { name: String, index: usize },

    #[error("invalid approver value {0:?}, expected an email or a list of emails")]
    ApproverInvalidType(String),

    #[error("approver {0:?} is not a valid email")]
    ApproverEmail(String),

    #[error("evaluating expression {expression:?}: {source}")]
    Expression {
        expression: String,
        #[source]
        source: ExprError,
    },

    #[error("serializing appeal for evaluation: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
