//! Client decorators. Each wraps any [`QueryClient`] and adds one behaviour.

use quarry_core::sql::normalize_sql;

use crate::client::{QueryClient, SubmitOptions};
use crate::query::PollingQuery;
use crate::QueryResult;

// ---------------------------------------------------------------------------
// Normalizing
// ---------------------------------------------------------------------------

/// Normalizes SQL formatting before handing statements to the inner client,
/// so that reformatted statements share a cache key.
#[derive(Debug, Clone)]
pub struct Normalizing<C> {
    inner: C,
}

impl<C: QueryClient> Normalizing<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: QueryClient> QueryClient for Normalizing<C> {
    fn submit_with(&self, sql: &str, options: SubmitOptions) -> QueryResult<PollingQuery> {
        self.inner.submit_with(&normalize_sql(sql), options)
    }

    fn get_query(&self, execution_id: &str) -> QueryResult<PollingQuery> {
        self.inner.get_query(execution_id)
    }
}

// ---------------------------------------------------------------------------
// KillOnInterrupt
// ---------------------------------------------------------------------------

/// Makes queries cancel their execution when waiting is interrupted, and
/// keep waiting until the cancellation is reported.
#[derive(Debug, Clone)]
pub struct KillOnInterrupt<C> {
    inner: C,
}

impl<C: QueryClient> KillOnInterrupt<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: QueryClient> QueryClient for KillOnInterrupt<C> {
    fn submit_with(&self, sql: &str, options: SubmitOptions) -> QueryResult<PollingQuery> {
        let mut query = self.inner.submit_with(sql, options)?;
        query.set_kill_on_interrupt(true);
        Ok(query)
    }

    fn get_query(&self, execution_id: &str) -> QueryResult<PollingQuery> {
        let mut query = self.inner.get_query(execution_id)?;
        query.set_kill_on_interrupt(true);
        Ok(query)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
