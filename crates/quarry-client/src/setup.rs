//! Assembles a client stack from configuration.

use std::sync::Arc;

use quarry_cache::{CacheError, CacheOptions, TieredCache};
use quarry_core::config::QuarryConfig;
use quarry_storage::{KeyValueStore, StoreRegistry};
use tracing::debug;

use crate::backoff::BackoffPolicy;
use crate::client::{CachingClient, QueryClient};
use crate::engine::{Engine, ExecutionContext};
use crate::sleep::Sleep;
use crate::wrappers::{KillOnInterrupt, Normalizing};
use crate::QueryResult;

/// Builds the full client stack described by `config`:
/// `KillOnInterrupt<Normalizing<CachingClient>>`, leaving out the layers
/// that are switched off.
///
/// Polls wait through `sleep`. Pass a [`crate::CancellationToken`] and keep a
/// clone of it to interrupt waits, e.g. from a Ctrl-C handler.
///
/// # Errors
///
/// Fails if a cache URI cannot be opened through `registry`.
pub fn setup(
    config: &QuarryConfig,
    engine: Arc<dyn Engine>,
    registry: &StoreRegistry,
    sleep: Arc<dyn Sleep>,
) -> QueryResult<Box<dyn QueryClient>> {
    let client = caching_client(config, engine, registry, sleep)?;
    Ok(decorate(config, client))
}

/// Builds the innermost caching client, before any decorator.
pub fn caching_client(
    config: &QuarryConfig,
    engine: Arc<dyn Engine>,
    registry: &StoreRegistry,
    sleep: Arc<dyn Sleep>,
) -> QueryResult<CachingClient> {
    let local = open_store(registry, config.cache.local.as_deref())?;
    let remote = open_store(registry, config.cache.remote.as_deref())?;
    let options = CacheOptions {
        enabled: config.cache.enabled,
        read: config.cache.read,
        write: config.cache.write,
        cache_failures: config.cache.cache_failures,
    };
    let cache = TieredCache::new(local, remote).with_options(options);
    debug!(?cache, "cache configured");

    let context = ExecutionContext {
        database: config.engine.database.clone(),
        workgroup: config.engine.workgroup.clone(),
        output_location: config.engine.output_location.clone(),
    };
    Ok(CachingClient::new(engine, cache)
        .with_context(context)
        .with_backoff(BackoffPolicy::new(config.polling.max_backoff_secs))
        .with_sleep(sleep))
}

/// Wraps `client` in the decorators enabled by `config`.
pub fn decorate<C: QueryClient + 'static>(config: &QuarryConfig, client: C) -> Box<dyn QueryClient> {
    match (config.normalize, config.kill_on_interrupt) {
        (true, true) => Box::new(KillOnInterrupt::new(Normalizing::new(client))),
        (true, false) => Box::new(Normalizing::new(client)),
        (false, true) => Box::new(KillOnInterrupt::new(client)),
        (false, false) => Box::new(client),
    }
}

fn open_store(
    registry: &StoreRegistry,
    uri: Option<&str>,
) -> QueryResult<Option<Arc<dyn KeyValueStore>>> {
    let Some(uri) = uri.filter(|u| !u.trim().is_empty()) else {
        return Ok(None);
    };
    let store = registry.open(uri).map_err(CacheError::from)?;
    Ok(Some(store))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
