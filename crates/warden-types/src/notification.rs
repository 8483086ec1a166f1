//! Notifications fanned out to requesters and approvers.
//!
//! Delivery is fire-and-forget from the engine's perspective; failures are
//! logged by the caller and never fail the primary operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed message payloads with the variables each template needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "variables")]
pub enum NotificationMessage {
    AppealApproved {
        resource_name: String,
        role: String,
    },
    AppealRejected {
        resource_name: String,
        role: String,
    },
    AccessRevoked {
        resource_name: String,
        role: String,
    },
    ApproverNotification {
        resource_name: String,
        role: String,
        requestor: String,
        appeal_id: String,
    },
    ExpirationReminder {
        resource_name: String,
        role: String,
        expiration_date: DateTime<Utc>,
    },
}

/// A message addressed to a single user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub user: String,
    pub message: NotificationMessage,
}
