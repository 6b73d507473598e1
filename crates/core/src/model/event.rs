use serde::{Deserialize, Serialize};

/// One HTTP request/response observation reported by a middleware SDK.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub api_key: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    pub status: f64,
    pub latency_ms: f64,
    pub req_size: f64,
    pub res_size: f64,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// Event row as written to the `events` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub id: String,
    pub timestamp: String,
    pub org_id: String,
    pub project_id: String,
    pub method: String,
    pub path: String,
    pub url: Option<String>,
    pub host: Option<String>,
    pub status: i64,
    pub latency_ms: i64,
    pub req_size: i64,
    pub res_size: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub body: Option<String>,
}
