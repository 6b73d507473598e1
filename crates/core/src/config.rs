use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PathwatchError, Result};
use crate::model::project::ProjectContext;
use crate::time::parse_duration_str;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Tinybird,
    DuckDb,
    Memory,
}

impl FromStr for SinkKind {
    type Err = PathwatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tinybird" | "tb" => Ok(Self::Tinybird),
            "duckdb" | "local" => Ok(Self::DuckDb),
            "memory" => Ok(Self::Memory),
            _ => Err(PathwatchError::Config(format!("unknown sink kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiKeyEntry {
    pub api_key: String,
    pub project_id: String,
    pub org_id: String,
    #[serde(default)]
    pub log_full_url: bool,
}

impl ApiKeyEntry {
    pub fn project(&self) -> ProjectContext {
        ProjectContext {
            project_id: self.project_id.clone(),
            org_id: self.org_id.clone(),
            log_full_url: self.log_full_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub collector_addr: String,
    pub query_addr: String,
    pub sink: SinkKind,
    pub db_path: PathBuf,
    pub tinybird_url: Option<String>,
    pub tinybird_token: Option<String>,
    pub tinybird_api_base: Option<String>,
    /// Cloudflare R2 pipeline that also receives request events.
    pub r2_pipeline_url: Option<String>,
    pub sink_timeout: Duration,
    pub sink_gzip: bool,
    pub database_url: Option<String>,
    pub api_keys: Vec<ApiKeyEntry>,
    pub api_key_cache_ttl: Duration,
    pub retention_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            collector_addr: "0.0.0.0:6000".to_string(),
            query_addr: "0.0.0.0:8000".to_string(),
            sink: SinkKind::DuckDb,
            db_path: data_root.join("pathwatch/pathwatch.duckdb"),
            tinybird_url: None,
            tinybird_token: None,
            tinybird_api_base: None,
            r2_pipeline_url: None,
            sink_timeout: Duration::from_secs(10),
            sink_gzip: false,
            database_url: None,
            api_keys: Vec::new(),
            api_key_cache_ttl: Duration::from_secs(60),
            retention_ttl: Duration::from_secs(60 * 60 * 24 * 7),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    /// Reports every setting the selected sink and key lookup still need.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.sink == SinkKind::Tinybird {
            if self.tinybird_url.is_none() {
                missing.push("TINYBIRD_URL");
            }
            if self.tinybird_token.is_none() {
                missing.push("TINYBIRD_TOKEN");
            }
        }
        if self.database_url.is_none() && self.api_keys.is_empty() {
            missing.push("DATABASE_URL (or api_keys in the config file)");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PathwatchError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    collector_addr: Option<String>,
    query_addr: Option<String>,
    sink: Option<String>,
    db_path: Option<PathBuf>,
    tinybird_url: Option<String>,
    tinybird_token: Option<String>,
    tinybird_api_base: Option<String>,
    r2_pipeline_url: Option<String>,
    sink_timeout: Option<String>,
    sink_gzip: Option<bool>,
    database_url: Option<String>,
    api_keys: Option<Vec<ApiKeyEntry>>,
    api_key_cache_ttl: Option<String>,
    retention_ttl: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("PATHWATCH_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("pathwatch/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| PathwatchError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| PathwatchError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let sink_gzip = match env::var("PATHWATCH_SINK_GZIP") {
        Ok(v) => Some(parse_bool(&v).ok_or_else(|| {
            PathwatchError::Config(format!("bad PATHWATCH_SINK_GZIP in environment: {v}"))
        })?),
        Err(_) => None,
    };

    Ok(ConfigOverrides {
        collector_addr: env::var("PATHWATCH_COLLECTOR_ADDR").ok(),
        query_addr: env::var("PATHWATCH_QUERY_ADDR").ok(),
        sink: env::var("PATHWATCH_SINK").ok(),
        db_path: env::var("PATHWATCH_DB_PATH").ok().map(PathBuf::from),
        tinybird_url: env::var("TINYBIRD_URL").ok(),
        tinybird_token: env::var("TINYBIRD_TOKEN")
            .or_else(|_| env::var("TB_TOKEN"))
            .ok(),
        tinybird_api_base: env::var("PATHWATCH_TINYBIRD_API").ok(),
        r2_pipeline_url: env::var("CLOUDFLARE_R2_PIPELINE_URL").ok(),
        sink_timeout: env::var("PATHWATCH_SINK_TIMEOUT").ok(),
        sink_gzip,
        database_url: env::var("DATABASE_URL").ok(),
        api_keys: None,
        api_key_cache_ttl: env::var("PATHWATCH_API_KEY_CACHE_TTL").ok(),
        retention_ttl: env::var("PATHWATCH_RETENTION_TTL").ok(),
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.collector_addr {
        cfg.collector_addr = v;
    }
    if let Some(v) = overrides.query_addr {
        cfg.query_addr = v;
    }
    if let Some(v) = overrides.sink {
        cfg.sink = v.parse().map_err(|e| {
            PathwatchError::Config(format!("bad sink in {source}: {e} (value={v})"))
        })?;
    }
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.tinybird_url {
        cfg.tinybird_url = Some(v);
    }
    if let Some(v) = overrides.tinybird_token {
        cfg.tinybird_token = Some(v);
    }
    if let Some(v) = overrides.tinybird_api_base {
        cfg.tinybird_api_base = Some(v);
    }
    if let Some(v) = overrides.r2_pipeline_url {
        cfg.r2_pipeline_url = Some(v);
    }
    if let Some(v) = overrides.sink_timeout {
        cfg.sink_timeout = parse_duration_field("sink_timeout", &v, source)?;
    }
    if let Some(v) = overrides.sink_gzip {
        cfg.sink_gzip = v;
    }
    if let Some(v) = overrides.database_url {
        cfg.database_url = Some(v);
    }
    if let Some(v) = overrides.api_keys {
        cfg.api_keys = v;
    }
    if let Some(v) = overrides.api_key_cache_ttl {
        cfg.api_key_cache_ttl = parse_duration_field("api_key_cache_ttl", &v, source)?;
    }
    if let Some(v) = overrides.retention_ttl {
        cfg.retention_ttl = parse_duration_field("retention_ttl", &v, source)?;
    }
    Ok(())
}

fn parse_duration_field(field: &str, raw: &str, source: &str) -> Result<Duration> {
    parse_duration_str(raw)
        .map_err(|e| PathwatchError::Config(format!("bad {field} in {source}: {e}")))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_expected_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.collector_addr, "0.0.0.0:6000");
        assert_eq!(cfg.query_addr, "0.0.0.0:8000");
        assert_eq!(cfg.sink, SinkKind::DuckDb);
    }

    #[test]
    fn sink_kind_parse() {
        assert_eq!("TinyBird".parse::<SinkKind>().unwrap(), SinkKind::Tinybird);
        assert_eq!("memory".parse::<SinkKind>().unwrap(), SinkKind::Memory);
        assert!("s3".parse::<SinkKind>().is_err());
    }

    #[test]
    fn validate_lists_every_missing_setting() {
        let cfg = Config {
            sink: SinkKind::Tinybird,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("TINYBIRD_URL"));
        assert!(err.contains("TINYBIRD_TOKEN"));
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn static_keys_satisfy_lookup_requirement() {
        let cfg = Config {
            api_keys: vec![ApiKeyEntry {
                api_key: "k".into(),
                project_id: "p".into(),
                org_id: "o".into(),
                log_full_url: true,
            }],
            ..Config::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_overrides_parse_from_toml() {
        let raw = r#"
            sink = "tinybird"
            tinybird_url = "https://api.tinybird.co/v0/events?name=spans"
            tinybird_token = "tok"
            sink_timeout = "3s"
            sink_gzip = true
            r2_pipeline_url = "https://pipeline.example.com/pw_logs"

            [[api_keys]]
            api_key = "pw_live_1"
            project_id = "p1"
            org_id = "o1"
        "#;
        let overrides: ConfigOverrides = toml::from_str(raw).unwrap();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, overrides, "config file").unwrap();

        assert_eq!(cfg.sink, SinkKind::Tinybird);
        assert_eq!(cfg.sink_timeout, Duration::from_secs(3));
        assert!(cfg.sink_gzip);
        assert_eq!(
            cfg.r2_pipeline_url.as_deref(),
            Some("https://pipeline.example.com/pw_logs")
        );
        assert_eq!(cfg.api_keys.len(), 1);
        assert!(!cfg.api_keys[0].log_full_url);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bad_duration_names_source() {
        let overrides = ConfigOverrides {
            retention_ttl: Some("forever".into()),
            ..ConfigOverrides::default()
        };
        let err = apply_overrides(&mut Config::default(), overrides, "environment")
            .unwrap_err()
            .to_string();
        assert!(err.contains("retention_ttl in environment"));
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
