use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A registered tenant application scope.
///
/// Immutable keys (`project_id`, `api_key`, `bundle_id`, `package_name`)
/// identify the tenant; `callback_url`/`signing_secret` configure the
/// outbound webhook; `is_active = false` disables every route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub project_id: String,
    pub project_name: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    /// iOS identity (unique when set).
    pub bundle_id: Option<String>,
    /// Android identity (unique when set).
    pub package_name: Option<String>,
    /// Tenant webhook endpoint for `subscription.updated` events.
    pub callback_url: Option<String>,
    /// HMAC secret for the outbound webhook signature.
    #[serde(skip_serializing)]
    pub signing_secret: Option<String>,
    /// Tenant base URL used to resolve app account tokens to device ids.
    pub tenant_base_url: Option<String>,
    /// Product id -> plan name, serialized as JSON in the database.
    pub plan_map: HashMap<String, String>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    /// Plan name for a product id: explicit mapping first, then a
    /// monthly/yearly suffix heuristic, then "basic".
    pub fn plan_for_product(&self, product_id: &str) -> String {
        if let Some(plan) = self.plan_map.get(product_id) {
            return plan.clone();
        }
        let lower = product_id.to_lowercase();
        if lower.ends_with("monthly") || lower == "monthly" {
            "monthly".to_string()
        } else if lower.ends_with("yearly") || lower.ends_with("annual") || lower == "yearly" {
            "yearly".to_string()
        } else {
            "basic".to_string()
        }
    }
}

/// Partial update applied by the admin surface. The identity keys
/// (`project_id`, `api_key`, `bundle_id`, `package_name`) are immutable
/// once issued and deliberately absent here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProject {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub tenant_base_url: Option<String>,
    #[serde(default)]
    pub plan_map: Option<HashMap<String, String>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateProject {
    pub project_id: String,
    pub project_name: String,
    pub api_key: String,
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub tenant_base_url: Option<String>,
    #[serde(default)]
    pub plan_map: HashMap<String, String>,
}
