//! In-process engine double for tests.
//!
//! [`FakeEngine`] records every request it receives and walks each
//! execution through a scripted sequence of states, one state per status
//! call. The last scripted state repeats.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use quarry_core::{ExecutionInfo, QueryState, ResultSet};

use crate::engine::{Engine, ExecutionContext};
use crate::{QueryError, QueryResult};

/// Reason reported for executions cancelled through the engine.
pub const CANCELLED_REASON: &str = "Query cancelled by user";

/// One request received by a [`FakeEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Submit { sql: String, database: Option<String> },
    Status(String),
    Fetch(String),
    Cancel(String),
}

/// Scriptable engine recording its request log.
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

#[derive(Debug)]
struct FakeState {
    requests: Vec<Request>,
    executions: BTreeMap<String, FakeExecution>,
    submitted: u64,
    script: Vec<QueryState>,
    reason: Option<String>,
    results: ResultSet,
    cancel_delay: usize,
    fail_cancel: bool,
    unavailable: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            executions: BTreeMap::new(),
            submitted: 0,
            script: vec![QueryState::Succeeded],
            reason: None,
            results: default_results(),
            cancel_delay: 0,
            fail_cancel: false,
            unavailable: false,
        }
    }
}

#[derive(Debug)]
struct FakeExecution {
    sql: String,
    context: ExecutionContext,
    script: VecDeque<QueryState>,
    state: QueryState,
    reason: Option<String>,
    cancel_countdown: Option<usize>,
}

impl FakeExecution {
    /// Moves to the next scripted state, honouring a pending cancellation.
    fn advance(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(remaining) = self.cancel_countdown.as_mut() {
            if *remaining == 0 {
                self.state = QueryState::Cancelled;
                self.reason = Some(CANCELLED_REASON.to_string());
                return;
            }
            *remaining -= 1;
        }
        self.state = if self.script.len() > 1 {
            self.script.pop_front().unwrap_or(QueryState::Succeeded)
        } else {
            self.script.front().copied().unwrap_or(QueryState::Succeeded)
        };
    }

    fn info(&self, execution_id: &str) -> ExecutionInfo {
        let mut info = ExecutionInfo::new(execution_id, self.sql.clone(), self.state);
        info.database = self.context.database.clone();
        info.output_location = self.context.output_location.clone();
        if matches!(self.state, QueryState::Failed | QueryState::Cancelled) {
            info.state_reason = self.reason.clone();
        }
        if self.state.is_terminal() {
            info.scanned_bytes = 1_234_567;
            info.execution_time = std::time::Duration::from_millis(4_200);
        }
        info
    }
}

/// Results every execution returns unless configured otherwise.
fn default_results() -> ResultSet {
    ResultSet::new(
        vec!["_col0".to_string()],
        vec!["integer".to_string()],
        vec![vec![Some("1".to_string())]],
    )
    .unwrap_or_default()
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// States reported by subsequently submitted executions.
    pub fn script(&self, states: impl IntoIterator<Item = QueryState>) {
        let script: Vec<QueryState> = states.into_iter().collect();
        self.lock().script = if script.is_empty() {
            vec![QueryState::Succeeded]
        } else {
            script
        };
    }

    /// Reason attached to subsequently submitted executions that fail.
    pub fn set_state_reason(&self, reason: Option<&str>) {
        self.lock().reason = reason.map(str::to_string);
    }

    /// Results returned by every fetch.
    pub fn set_results(&self, results: ResultSet) {
        self.lock().results = results;
    }

    /// Number of status calls after a cancellation that still report the
    /// previous state.
    pub fn set_cancel_delay(&self, polls: usize) {
        self.lock().cancel_delay = polls;
    }

    /// Makes cancel requests fail.
    pub fn fail_cancel(&self, fail: bool) {
        self.lock().fail_cancel = fail;
    }

    /// Makes every request fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// All requests received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Number of recorded requests matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.lock().requests.iter().filter(|r| predicate(r)).count()
    }

    pub fn submits(&self) -> usize {
        self.count(|r| matches!(r, Request::Submit { .. }))
    }

    pub fn statuses(&self) -> usize {
        self.count(|r| matches!(r, Request::Status(_)))
    }

    pub fn fetches(&self) -> usize {
        self.count(|r| matches!(r, Request::Fetch(_)))
    }

    pub fn cancels(&self) -> usize {
        self.count(|r| matches!(r, Request::Cancel(_)))
    }

    /// Forgets the request log, keeping executions.
    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FakeState {
    fn check_available(&self) -> QueryResult<()> {
        if self.unavailable {
            return Err(QueryError::Engine("engine unavailable".to_string()));
        }
        Ok(())
    }

    fn execution(&mut self, execution_id: &str) -> QueryResult<&mut FakeExecution> {
        self.executions
            .get_mut(execution_id)
            .ok_or_else(|| QueryError::Engine(format!("unknown execution: {execution_id}")))
    }
}

impl Engine for FakeEngine {
    fn submit(&self, sql: &str, context: &ExecutionContext) -> QueryResult<String> {
        let mut state = self.lock();
        state.requests.push(Request::Submit {
            sql: sql.to_string(),
            database: context.database.clone(),
        });
        state.check_available()?;

        state.submitted += 1;
        let execution_id = format!("exec-{}", state.submitted);
        let execution = FakeExecution {
            sql: sql.to_string(),
            context: context.clone(),
            script: state.script.iter().copied().collect(),
            state: QueryState::Pending,
            reason: state.reason.clone(),
            cancel_countdown: None,
        };
        state.executions.insert(execution_id.clone(), execution);
        Ok(execution_id)
    }

    fn status(&self, execution_id: &str) -> QueryResult<ExecutionInfo> {
        let mut state = self.lock();
        state.requests.push(Request::Status(execution_id.to_string()));
        state.check_available()?;

        let execution = state.execution(execution_id)?;
        execution.advance();
        Ok(execution.info(execution_id))
    }

    fn fetch_results(&self, execution_id: &str) -> QueryResult<ResultSet> {
        let mut state = self.lock();
        state.requests.push(Request::Fetch(execution_id.to_string()));
        state.check_available()?;

        let current = state.execution(execution_id)?.state;
        if current != QueryState::Succeeded {
            return Err(QueryError::Engine(format!(
                "execution {execution_id} is {current}, results unavailable"
            )));
        }
        Ok(state.results.clone())
    }

    fn cancel(&self, execution_id: &str) -> QueryResult<()> {
        let mut state = self.lock();
        state.requests.push(Request::Cancel(execution_id.to_string()));
        state.check_available()?;
        if state.fail_cancel {
            return Err(QueryError::Engine("cancel rejected".to_string()));
        }

        let delay = state.cancel_delay;
        let execution = state.execution(execution_id)?;
        if !execution.state.is_terminal() && execution.cancel_countdown.is_none() {
            execution.cancel_countdown = Some(delay);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
