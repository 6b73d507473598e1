//! API key to project resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use pathwatch_core::config::ApiKeyEntry;
use pathwatch_core::error::{PathwatchError, Result};
use pathwatch_core::model::project::ProjectContext;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

#[async_trait]
pub trait ProjectLookup: Send + Sync {
    /// `Ok(None)` means the key is unknown. `Err` means the lookup itself
    /// failed and says nothing about the key.
    async fn lookup(&self, api_key: &str) -> Result<Option<ProjectContext>>;
}

#[async_trait]
impl<L: ProjectLookup + ?Sized> ProjectLookup for Arc<L> {
    async fn lookup(&self, api_key: &str) -> Result<Option<ProjectContext>> {
        (**self).lookup(api_key).await
    }
}

/// Keys listed in the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticProjects {
    keys: HashMap<String, ProjectContext>,
}

impl StaticProjects {
    pub fn new(entries: &[ApiKeyEntry]) -> Self {
        Self {
            keys: entries
                .iter()
                .map(|e| (e.api_key.clone(), e.project()))
                .collect(),
        }
    }

    pub fn single(api_key: &str, project: ProjectContext) -> Self {
        Self {
            keys: HashMap::from([(api_key.to_string(), project)]),
        }
    }
}

#[async_trait]
impl ProjectLookup for StaticProjects {
    async fn lookup(&self, api_key: &str) -> Result<Option<ProjectContext>> {
        Ok(self.keys.get(api_key).cloned())
    }
}

/// Looks keys up in the `projects` table of the console database.
#[derive(Clone)]
pub struct PgProjects {
    pool: PgPool,
}

impl PgProjects {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| PathwatchError::Store(format!("failed to connect to postgres: {e}")))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectLookup for PgProjects {
    async fn lookup(&self, api_key: &str) -> Result<Option<ProjectContext>> {
        let row: Option<(String, String, Option<bool>)> = sqlx::query_as(
            "SELECT id::text, org_id::text, log_full_url FROM projects WHERE api_key = $1",
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PathwatchError::Store(format!("project lookup failed: {e}")))?;

        Ok(row.map(|(project_id, org_id, log_full_url)| ProjectContext {
            project_id,
            org_id,
            log_full_url: log_full_url.unwrap_or(false),
        }))
    }
}

/// Caches successful lookups for `ttl`. Misses are never cached, so a key
/// created after a failed attempt works on the next request.
pub struct CachedProjects<L> {
    inner: L,
    ttl: Duration,
    entries: DashMap<String, (ProjectContext, Instant)>,
}

impl<L: ProjectLookup> CachedProjects<L> {
    pub fn new(inner: L, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl<L: ProjectLookup> ProjectLookup for CachedProjects<L> {
    async fn lookup(&self, api_key: &str) -> Result<Option<ProjectContext>> {
        if let Some(entry) = self.entries.get(api_key) {
            let (project, cached_at) = entry.value();
            if cached_at.elapsed() < self.ttl {
                return Ok(Some(project.clone()));
            }
        }
        self.entries.remove(api_key);

        let found = self.inner.lookup(api_key).await?;
        if let Some(project) = &found {
            self.entries
                .insert(api_key.to_string(), (project.clone(), Instant::now()));
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: AtomicUsize,
        inner: StaticProjects,
    }

    #[async_trait]
    impl ProjectLookup for Counting {
        async fn lookup(&self, api_key: &str) -> Result<Option<ProjectContext>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.lookup(api_key).await
        }
    }

    fn counting() -> Arc<Counting> {
        Arc::new(Counting {
            calls: AtomicUsize::new(0),
            inner: StaticProjects::single(testkit::API_KEY, testkit::project()),
        })
    }

    #[tokio::test]
    async fn static_lookup_resolves_known_keys() {
        let projects = StaticProjects::new(&[ApiKeyEntry {
            api_key: "k1".into(),
            project_id: "p1".into(),
            org_id: "o1".into(),
            log_full_url: true,
        }]);
        let found = projects.lookup("k1").await.unwrap().unwrap();
        assert_eq!(found.org_id, "o1");
        assert!(found.log_full_url);
        assert!(projects.lookup("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_serves_hits_and_retries_misses() {
        let inner = counting();
        let cached = CachedProjects::new(inner.clone(), Duration::from_secs(60));

        cached.lookup(testkit::API_KEY).await.unwrap();
        cached.lookup(testkit::API_KEY).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        assert!(cached.lookup("nope").await.unwrap().is_none());
        assert!(cached.lookup("nope").await.unwrap().is_none());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let inner = counting();
        let cached = CachedProjects::new(inner.clone(), Duration::ZERO);
        cached.lookup(testkit::API_KEY).await.unwrap();
        cached.lookup(testkit::API_KEY).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
