use serde::{Deserialize, Serialize};

/// Tenant context resolved from an API key. Injected into every row the
/// collector writes; never taken from the request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectContext {
    pub project_id: String,
    pub org_id: String,
    #[serde(default)]
    pub log_full_url: bool,
}
