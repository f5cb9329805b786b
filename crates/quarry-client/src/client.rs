//! The query client interface and its caching implementation.

use std::fmt;
use std::sync::Arc;

use quarry_cache::{CacheOptions, TieredCache};
use quarry_core::sql::{is_cacheable, truncate_sql};
use quarry_core::ResultSet;
use tracing::{info, warn};

use crate::backoff::BackoffPolicy;
use crate::engine::{Engine, ExecutionContext};
use crate::query::PollingQuery;
use crate::sleep::{Sleep, ThreadSleep};
use crate::QueryResult;

// ---------------------------------------------------------------------------
// QueryClient
// ---------------------------------------------------------------------------

/// Per-submission options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Skip the execution-id lookup. The new execution is still recorded.
    pub ignore_cache: bool,
}

/// Submits statements and reattaches to executions.
pub trait QueryClient {
    /// Submits `sql`, or reuses a cached execution of it.
    fn submit(&self, sql: &str) -> QueryResult<PollingQuery> {
        self.submit_with(sql, SubmitOptions::default())
    }

    fn submit_with(&self, sql: &str, options: SubmitOptions) -> QueryResult<PollingQuery>;

    /// Returns a handle to an existing execution.
    fn get_query(&self, execution_id: &str) -> QueryResult<PollingQuery>;

    /// Submits `sql` and waits for its results.
    fn execute(&self, sql: &str) -> QueryResult<Arc<ResultSet>> {
        self.submit(sql)?.get_results()
    }
}

impl<C: QueryClient + ?Sized> QueryClient for Box<C> {
    fn submit_with(&self, sql: &str, options: SubmitOptions) -> QueryResult<PollingQuery> {
        (**self).submit_with(sql, options)
    }

    fn get_query(&self, execution_id: &str) -> QueryResult<PollingQuery> {
        (**self).get_query(execution_id)
    }
}

// ---------------------------------------------------------------------------
// CachingClient
// ---------------------------------------------------------------------------

/// Field overrides for [`CachingClient::using`]. `None` keeps the current
/// value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<String>,
    pub workgroup: Option<String>,
    pub output_location: Option<String>,
    pub cache: Option<CacheOptions>,
    pub max_backoff_secs: Option<u64>,
}

/// Client that caches execution ids and results of read-only statements.
///
/// Clones share the engine and the cache stores; every other setting is
/// owned by the clone.
#[derive(Clone)]
pub struct CachingClient {
    engine: Arc<dyn Engine>,
    context: ExecutionContext,
    cache: TieredCache,
    backoff: BackoffPolicy,
    sleep: Arc<dyn Sleep>,
    cacheable: fn(&str) -> bool,
}

impl fmt::Debug for CachingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingClient")
            .field("engine", &self.engine)
            .field("context", &self.context)
            .field("cache", &self.cache)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl CachingClient {
    /// Creates a client with an empty execution context and default backoff.
    pub fn new(engine: Arc<dyn Engine>, cache: TieredCache) -> Self {
        Self {
            engine,
            context: ExecutionContext::default(),
            cache,
            backoff: BackoffPolicy::default(),
            sleep: Arc::new(ThreadSleep),
            cacheable: is_cacheable,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replaces how the client sleeps between polls, e.g. with a
    /// [`crate::CancellationToken`].
    #[must_use]
    pub fn with_sleep(mut self, sleep: Arc<dyn Sleep>) -> Self {
        self.sleep = sleep;
        self
    }

    /// Replaces the predicate deciding which statements may be cached.
    #[must_use]
    pub fn with_cacheable(mut self, cacheable: fn(&str) -> bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Derives a client with some settings overridden.
    #[must_use]
    pub fn using(&self, overrides: Overrides) -> Self {
        let mut client = self.clone();
        if let Some(database) = overrides.database {
            client.context.database = Some(database);
        }
        if let Some(workgroup) = overrides.workgroup {
            client.context.workgroup = Some(workgroup);
        }
        if let Some(output_location) = overrides.output_location {
            client.context.output_location = Some(output_location);
        }
        if let Some(options) = overrides.cache {
            *client.cache.options_mut() = options;
        }
        if let Some(max_secs) = overrides.max_backoff_secs {
            client.backoff = BackoffPolicy::new(max_secs);
        }
        client
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Cache toggles, adjustable between submissions.
    pub fn cache_options_mut(&mut self) -> &mut CacheOptions {
        self.cache.options_mut()
    }

    fn query(&self, execution_id: String, cache: TieredCache) -> PollingQuery {
        PollingQuery::new(
            Arc::clone(&self.engine),
            execution_id,
            cache,
            self.backoff,
            Arc::clone(&self.sleep),
            self.cacheable,
        )
    }

    /// Decides whether a cached execution can stand in for a new one.
    ///
    /// Unless failures are cached, an execution known to have failed is
    /// not reused. Locally cached results prove success without asking the
    /// engine.
    fn reusable(&self, query: &mut PollingQuery) -> bool {
        if self.cache.options().cache_failures || self.cache.has_results(query.execution_id()) {
            return true;
        }
        let execution_id = query.execution_id().to_string();
        match query.info() {
            Ok(info) if info.is_finished() && !info.is_succeeded() => {
                info!(%execution_id, state = %info.state, "cached execution did not succeed, resubmitting");
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(%execution_id, error = %e, "cached execution unavailable, resubmitting");
                false
            }
        }
    }
}

impl QueryClient for CachingClient {
    fn submit_with(&self, sql: &str, options: SubmitOptions) -> QueryResult<PollingQuery> {
        let cacheable = (self.cacheable)(sql);
        let database = self.context.database.as_deref();

        if cacheable && !options.ignore_cache {
            if let Some(execution_id) = self.cache.load_execution_id(database, sql) {
                let mut query = self.query(execution_id, self.cache.clone());
                if self.reusable(&mut query) {
                    return Ok(query);
                }
            }
        }

        let execution_id = self.engine.submit(sql, &self.context)?;
        info!(
            %execution_id,
            database = database.unwrap_or_default(),
            sql = %truncate_sql(sql, 80),
            "query submitted"
        );

        if cacheable {
            self.cache.save_execution_id(database, sql, &execution_id);
            Ok(self.query(execution_id, self.cache.clone()))
        } else {
            let uncached = self.cache.clone().with_options(CacheOptions::disabled());
            Ok(self.query(execution_id, uncached))
        }
    }

    fn get_query(&self, execution_id: &str) -> QueryResult<PollingQuery> {
        Ok(self.query(execution_id.to_string(), self.cache.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep::ScriptedSleep;
    use crate::testing::{FakeEngine, Request};
    use quarry_core::QueryState;
    use quarry_storage::{KeyValueStore, MemoryStore};

    fn setup() -> (Arc<FakeEngine>, Arc<MemoryStore>, CachingClient) {
        let engine = Arc::new(FakeEngine::new());
        let local = Arc::new(MemoryStore::new());
        let cache = TieredCache::new(Some(local.clone()), None);
        let client = CachingClient::new(engine.clone(), cache).with_sleep(Arc::new(ScriptedSleep::new()));
        (engine, local, client)
    }

    #[test]
    fn submit_passes_context() {
        let (engine, _, client) = setup();
        let client = client.with_context(ExecutionContext {
            database: Some("sales".into()),
            ..ExecutionContext::default()
        });
        client.submit("SELECT 1").unwrap();
        assert_eq!(
            engine.requests(),
            vec![Request::Submit {
                sql: "SELECT 1".into(),
                database: Some("sales".into())
            }]
        );
    }

    #[test]
    fn ignore_cache_resubmits_and_records() {
        let (engine, _, client) = setup();
        let first = client.submit("SELECT 1").unwrap();
        let second = client
            .submit_with("SELECT 1", SubmitOptions { ignore_cache: true })
            .unwrap();
        assert_ne!(first.execution_id(), second.execution_id());
        assert_eq!(engine.submits(), 2);

        let third = client.submit("SELECT 1").unwrap();
        assert_eq!(third.execution_id(), second.execution_id());
        assert_eq!(engine.submits(), 2);
    }

    #[test]
    fn get_query_reattaches() {
        let (engine, local, client) = setup();
        let id = client.submit("SELECT 1").unwrap().execution_id().to_string();
        let mut query = client.get_query(&id).unwrap();
        let results = query.get_results().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(engine.submits(), 1);
        assert!(local.has(&format!("results-{id}")).unwrap());
    }

    #[test]
    fn execute_returns_results() {
        let (_, _, client) = setup();
        let results = client.execute("SELECT 1").unwrap();
        assert_eq!(results.column_names(), ["_col0"]);
    }

    #[test]
    fn using_overrides_leave_source_client_untouched() {
        let (engine, local, client) = setup();
        let derived = client.using(Overrides {
            database: Some("other".into()),
            cache: Some(CacheOptions::disabled()),
            max_backoff_secs: Some(5),
            ..Overrides::default()
        });
        assert_eq!(derived.context().database.as_deref(), Some("other"));
        assert_eq!(derived.backoff().max_secs(), 5);
        assert_eq!(client.context().database, None);
        assert!(client.cache().options().enabled);

        derived.execute("SELECT 1").unwrap();
        assert_eq!(local.size(), 0);

        // Stores are shared with the source client.
        client.execute("SELECT 1").unwrap();
        assert_eq!(local.size(), 2);
        assert_eq!(engine.submits(), 2);
    }

    #[test]
    fn custom_cacheable_predicate() {
        let (engine, local, client) = setup();
        let client = client.with_cacheable(|_| false);
        client.execute("SELECT 1").unwrap();
        client.execute("SELECT 1").unwrap();
        assert_eq!(engine.submits(), 2);
        assert_eq!(local.size(), 0);
    }

    #[test]
    fn toggles_change_behaviour_between_submissions() {
        let (engine, local, mut client) = setup();
        client.cache_options_mut().read = false;
        client.execute("SELECT 1").unwrap();
        client.execute("SELECT 1").unwrap();
        assert_eq!(engine.submits(), 2);
        // One execution key, overwritten, plus results of both executions.
        assert_eq!(local.size(), 3);

        client.cache_options_mut().read = true;
        client.execute("SELECT 1").unwrap();
        assert_eq!(engine.submits(), 2);
    }

    #[test]
    fn unreachable_cached_execution_is_resubmitted() {
        let (engine, local, client) = setup();
        let key = quarry_cache::execution_key(None, "SELECT 1");
        local.set(&key, "exec-gone").unwrap();

        let query = client.submit("SELECT 1").unwrap();
        assert_eq!(query.execution_id(), "exec-1");
        assert_eq!(local.get(&key).unwrap(), "exec-1");
        assert_eq!(engine.submits(), 1);
    }

    #[test]
    fn running_cached_execution_is_reused() {
        let (engine, _, client) = setup();
        engine.script([QueryState::Running, QueryState::Succeeded]);
        let first = client.submit("SELECT 1").unwrap();
        let second = client.submit("SELECT 1").unwrap();
        assert_eq!(first.execution_id(), second.execution_id());
        assert_eq!(engine.submits(), 1);
    }
}
