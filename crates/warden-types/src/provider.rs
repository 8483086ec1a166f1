//! Providers: external systems capable of granting and revoking access.

use crate::PolicyConfig;
use serde::{Deserialize, Serialize};

/// Binds a resource type served by a provider to the policy governing
/// appeals for it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub policy: PolicyConfig,
}

/// Provider-level configuration. The concrete credentials and plugin
/// parameters live with the provider plugin, outside this engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// A registered provider instance, identified by `(type, urn)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub urn: String,
    #[serde(default)]
    pub config: ProviderConfig,
}
