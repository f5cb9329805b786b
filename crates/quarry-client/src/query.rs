//! A submitted execution: status polling, waiting, and result retrieval.

use std::fmt;
use std::sync::Arc;

use quarry_cache::TieredCache;
use quarry_core::sql::truncate_sql;
use quarry_core::{ExecutionInfo, ResultSet};
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::engine::Engine;
use crate::sleep::Sleep;
use crate::{QueryError, QueryResult};

/// Handle to one execution on the engine.
///
/// A terminal status and fetched results are kept for the lifetime of the
/// handle, so repeated calls never hit the engine twice. The handle is not
/// meant to be shared between threads.
pub struct PollingQuery {
    engine: Arc<dyn Engine>,
    execution_id: String,
    cache: TieredCache,
    backoff: BackoffPolicy,
    sleep: Arc<dyn Sleep>,
    cacheable: fn(&str) -> bool,
    kill_on_interrupt: bool,
    kill_attempted: bool,
    info: Option<ExecutionInfo>,
    results: Option<Arc<ResultSet>>,
}

impl fmt::Debug for PollingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingQuery")
            .field("execution_id", &self.execution_id)
            .field("state", &self.info.as_ref().map(|i| i.state))
            .field("kill_on_interrupt", &self.kill_on_interrupt)
            .finish_non_exhaustive()
    }
}

impl PollingQuery {
    pub(crate) fn new(
        engine: Arc<dyn Engine>,
        execution_id: String,
        cache: TieredCache,
        backoff: BackoffPolicy,
        sleep: Arc<dyn Sleep>,
        cacheable: fn(&str) -> bool,
    ) -> Self {
        Self {
            engine,
            execution_id,
            cache,
            backoff,
            sleep,
            cacheable,
            kill_on_interrupt: false,
            kill_attempted: false,
            info: None,
            results: None,
        }
    }

    /// The engine's execution handle.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn kill_on_interrupt(&self) -> bool {
        self.kill_on_interrupt
    }

    /// Whether an interrupted wait cancels the execution and keeps waiting
    /// for the cancellation to land, instead of returning at once.
    pub fn set_kill_on_interrupt(&mut self, enabled: bool) {
        self.kill_on_interrupt = enabled;
    }

    /// Current status of the execution.
    ///
    /// Once a terminal status was seen it is returned without asking the
    /// engine again.
    pub fn info(&mut self) -> QueryResult<&ExecutionInfo> {
        let info = match self.info.take() {
            Some(info) if info.is_finished() => info,
            _ => self.poll()?,
        };
        Ok(self.info.insert(info))
    }

    fn poll(&self) -> QueryResult<ExecutionInfo> {
        let info = self.engine.status(&self.execution_id)?;
        debug!(execution_id = %self.execution_id, state = %info.state, "polled execution");
        if info.is_finished() {
            info!(
                execution_id = %self.execution_id,
                sql = %truncate_sql(&info.sql, 80),
                "execution finished: {info}"
            );
        }
        Ok(info)
    }

    /// Waits until the execution finishes.
    ///
    /// Returns immediately if results are already available locally.
    ///
    /// # Errors
    ///
    /// [`QueryError::Failed`] if the execution failed or was cancelled.
    /// [`QueryError::Interrupted`] if the wait was interrupted and no
    /// cancellation was attempted, the cancellation request failed, or a
    /// second interruption arrived.
    pub fn join(&mut self) -> QueryResult<()> {
        if self.results.is_some() || self.cache.has_results(&self.execution_id) {
            debug!(execution_id = %self.execution_id, "results available, not waiting");
            return Ok(());
        }

        let mut delays = self.backoff.start();
        loop {
            let info = self.info()?;
            if info.is_finished() {
                info.check()?;
                return Ok(());
            }
            let state = info.state;

            let delay = delays.next_delay();
            debug!(
                execution_id = %self.execution_id,
                %state,
                delay_secs = delay.as_secs(),
                "waiting for execution"
            );
            if self.sleep.sleep(delay).is_ok() {
                continue;
            }

            if !self.kill_on_interrupt || self.kill_attempted {
                return Err(self.interrupted());
            }
            self.kill_attempted = true;
            warn!(execution_id = %self.execution_id, "interrupted, cancelling execution");
            if let Err(e) = self.kill() {
                warn!(execution_id = %self.execution_id, error = %e, "cancellation failed");
                return Err(self.interrupted());
            }
            delays = self.backoff.start();
        }
    }

    /// Returns the results, waiting for the execution if needed.
    ///
    /// Results are served from memory, then from the local cache, and only
    /// then fetched from the engine. Fetched results of cacheable statements
    /// are stored in the cache.
    pub fn get_results(&mut self) -> QueryResult<Arc<ResultSet>> {
        if let Some(results) = &self.results {
            return Ok(Arc::clone(results));
        }

        if let Some(results) = self.cache.load_results(&self.execution_id)? {
            return Ok(self.remember(results));
        }

        self.join()?;
        let results = self.engine.fetch_results(&self.execution_id)?;
        info!(execution_id = %self.execution_id, rows = results.len(), "results fetched");

        let cacheable = self.cacheable;
        if cacheable(&self.info()?.sql) {
            self.cache.save_results(&self.execution_id, &results);
        }
        Ok(self.remember(results))
    }

    /// Asks the engine to cancel the execution.
    pub fn kill(&mut self) -> QueryResult<()> {
        info!(execution_id = %self.execution_id, "cancelling execution");
        self.engine.cancel(&self.execution_id)
    }

    fn remember(&mut self, results: ResultSet) -> Arc<ResultSet> {
        let results = Arc::new(results);
        self.results = Some(Arc::clone(&results));
        results
    }

    fn interrupted(&self) -> QueryError {
        QueryError::Interrupted {
            execution_id: self.execution_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionContext;
    use crate::sleep::ScriptedSleep;
    use crate::testing::{FakeEngine, Request};
    use quarry_core::sql::is_cacheable;
    use quarry_core::QueryState;
    use quarry_storage::MemoryStore;

    fn query(engine: &Arc<FakeEngine>, sleep: &Arc<ScriptedSleep>, id: &str) -> PollingQuery {
        let cache = TieredCache::new(Some(Arc::new(MemoryStore::new())), None);
        PollingQuery::new(
            engine.clone(),
            id.to_string(),
            cache,
            BackoffPolicy::default(),
            sleep.clone(),
            is_cacheable,
        )
    }

    fn submit(engine: &FakeEngine, sql: &str) -> String {
        engine.submit(sql, &ExecutionContext::default()).unwrap()
    }

    #[test]
    fn join_polls_with_backoff_until_finished() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([
            QueryState::Pending,
            QueryState::Running,
            QueryState::Running,
            QueryState::Succeeded,
        ]);
        let sleep = Arc::new(ScriptedSleep::new());
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        query.join().unwrap();
        assert_eq!(sleep.delay_secs(), vec![1, 1, 2]);
        assert_eq!(engine.count(|r| matches!(r, Request::Status(_))), 4);
    }

    #[test]
    fn terminal_info_is_memoized() {
        let engine = Arc::new(FakeEngine::new());
        let sleep = Arc::new(ScriptedSleep::new());
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        assert_eq!(query.info().unwrap().state, QueryState::Succeeded);
        assert_eq!(query.info().unwrap().state, QueryState::Succeeded);
        query.join().unwrap();
        assert_eq!(engine.count(|r| matches!(r, Request::Status(_))), 1);
    }

    #[test]
    fn running_info_is_polled_again() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running, QueryState::Succeeded]);
        let sleep = Arc::new(ScriptedSleep::new());
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        assert_eq!(query.info().unwrap().state, QueryState::Running);
        assert_eq!(query.info().unwrap().state, QueryState::Succeeded);
        assert_eq!(engine.count(|r| matches!(r, Request::Status(_))), 2);
    }

    #[test]
    fn failed_execution_raises_failure() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running, QueryState::Failed]);
        engine.set_state_reason(Some("SYNTAX_ERROR"));
        let sleep = Arc::new(ScriptedSleep::new());
        let id = submit(&engine, "SELEC 1");

        let mut query = query(&engine, &sleep, &id);
        let err = query.get_results().unwrap_err();
        assert!(matches!(
            err,
            QueryError::Failed { state: QueryState::Failed, reason: Some(ref r), .. } if r == "SYNTAX_ERROR"
        ));
        assert_eq!(engine.count(|r| matches!(r, Request::Fetch(_))), 0);
    }

    #[test]
    fn get_results_is_idempotent() {
        let engine = Arc::new(FakeEngine::new());
        let sleep = Arc::new(ScriptedSleep::new());
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        let first = query.get_results().unwrap();
        let second = query.get_results().unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.count(|r| matches!(r, Request::Fetch(_))), 1);
        assert_eq!(engine.count(|r| matches!(r, Request::Status(_))), 1);
    }

    #[test]
    fn interruption_without_kill_propagates() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running]);
        let sleep = Arc::new(ScriptedSleep::interrupting([0]));
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        assert!(matches!(query.join(), Err(QueryError::Interrupted { .. })));
        assert_eq!(engine.count(|r| matches!(r, Request::Cancel(_))), 0);
    }

    #[test]
    fn interruption_cancels_then_waits_for_cancellation() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running]);
        let sleep = Arc::new(ScriptedSleep::interrupting([1]));
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        query.set_kill_on_interrupt(true);
        let err = query.join().unwrap_err();
        assert!(matches!(err, QueryError::Failed { state: QueryState::Cancelled, .. }));
        assert_eq!(engine.count(|r| matches!(r, Request::Cancel(_))), 1);
        // Running, Running (interrupted sleep), then Cancelled.
        assert_eq!(engine.count(|r| matches!(r, Request::Status(_))), 3);
        assert_eq!(sleep.delay_secs(), vec![1, 1]);
    }

    #[test]
    fn backoff_restarts_after_cancellation() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running]);
        engine.set_cancel_delay(3);
        let sleep = Arc::new(ScriptedSleep::interrupting([2]));
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        query.set_kill_on_interrupt(true);
        assert!(query.join().is_err());
        assert_eq!(sleep.delay_secs(), vec![1, 1, 2, 1, 1, 2]);
    }

    #[test]
    fn second_interruption_propagates() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running]);
        engine.set_cancel_delay(usize::MAX);
        let sleep = Arc::new(ScriptedSleep::interrupting([0, 1]));
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        query.set_kill_on_interrupt(true);
        assert!(matches!(query.join(), Err(QueryError::Interrupted { .. })));
        assert_eq!(engine.count(|r| matches!(r, Request::Cancel(_))), 1);
    }

    #[test]
    fn failed_cancellation_propagates_interruption() {
        let engine = Arc::new(FakeEngine::new());
        engine.script([QueryState::Running]);
        let sleep = Arc::new(ScriptedSleep::interrupting([0]));
        engine.fail_cancel(true);
        let id = submit(&engine, "SELECT 1");

        let mut query = query(&engine, &sleep, &id);
        query.set_kill_on_interrupt(true);
        assert!(matches!(query.join(), Err(QueryError::Interrupted { .. })));
        assert_eq!(engine.count(|r| matches!(r, Request::Cancel(_))), 1);
        assert_eq!(engine.count(|r| matches!(r, Request::Status(_))), 1);
    }

    #[test]
    fn non_cacheable_results_are_not_stored() {
        let engine = Arc::new(FakeEngine::new());
        let sleep = Arc::new(ScriptedSleep::new());
        let id = submit(&engine, "CREATE TABLE t (x int)");

        let mut query = query(&engine, &sleep, &id);
        query.get_results().unwrap();
        assert!(!query.cache.has_results(&id));
    }
}
