//! Resources: reference data owned by external provider plugins.

use serde::{Deserialize, Serialize};

/// A resource that accounts can request access to. Looked up, never owned,
/// by the governance engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub provider_type: String,
    pub provider_urn: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub urn: String,
    #[serde(default)]
    pub name: String,
    /// Provider-specific attributes; referenced by approver expressions and
    /// requirement conditions.
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Resource {
    /// Human-readable label used in notifications.
    pub fn display_name(&self) -> String {
        format!("{} ({}: {})", self.name, self.provider_type, self.urn)
    }
}

/// Identifies a resource either directly by id or by its full coordinates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_urn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urn: Option<String>,
}

/// Filter for listing resources through the resource service.
#[derive(Clone, Debug, Default)]
pub struct ResourceFilter {
    pub ids: Vec<String>,
}
