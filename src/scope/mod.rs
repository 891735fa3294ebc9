//! Request-scoped call accounting
//!
//! What this module provides
//! - An ambient, per-logical-request accumulator that follows code across
//!   every suspension point without being passed as a parameter
//!
//! Exports
//! - Models
//!   - `Attribution { request_id, session_id, task, app, endpoint }`
//!   - `ScopeHandle`: cloneable reference to the live accumulator
//! - Utils
//!   - `run_in_scope(attribution, future) -> (output, Vec<CallRecord>)`
//!   - `active_scope() -> Option<ScopeHandle>`
//!
//! Implementation strategy
//! - Scoped task-local storage (`tokio::task_local!`): the scope value is
//!   installed only for polls of the wrapped future, so logically-concurrent
//!   requests interleaved on one executor thread each see exactly their own
//!   scope, and code outside any scope sees none
//! - Records are appended under a mutex together with a per-scope sequence
//!   number claimed at call initiation; the list is ordered by that number
//!   when the scope closes, so completion interleaving cannot reorder it
//! - Nested `run_in_scope` calls shadow the outer scope for their own
//!   duration and keep their own records
//!
//! Testing strategy
//! - Interleave two scoped futures on one executor and assert each collects
//!   only its own records, in initiation order

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::CallRecord;

/// Caller-supplied labels identifying the logical request a scope serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub request_id: String,
    pub session_id: Option<String>,
    pub task: String,
    pub app: Option<String>,
    pub endpoint: String,
}

impl Attribution {
    pub fn new(
        request_id: impl Into<String>,
        task: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            task: task.into(),
            app: None,
            endpoint: endpoint.into(),
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn app(mut self, app: impl Into<String>) -> Self {
        self.app = Some(app.into());
        self
    }
}

#[derive(Debug)]
struct ScopeInner {
    attribution: Attribution,
    next_seq: AtomicU64,
    records: Mutex<Vec<(u64, CallRecord)>>,
}

/// Cloneable handle to the scope enclosing the currently executing code.
///
/// Interceptors capture a handle at call initiation, so a record still lands
/// in the right scope even if it is finalized while some other scope's code
/// happens to be running.
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    inner: Arc<ScopeInner>,
}

impl ScopeHandle {
    pub fn attribution(&self) -> &Attribution {
        &self.inner.attribution
    }

    /// Claims the initiation-order slot for a call about to be made.
    pub fn claim_seq(&self) -> u64 {
        self.inner.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Appends a finished record into its claimed slot.
    ///
    /// Appends from calls of the same scope issued without awaiting each
    /// other are all preserved; nothing is overwritten.
    pub fn append(&self, seq: u64, record: CallRecord) {
        self.inner.records.lock().unwrap().push((seq, record));
    }

    #[cfg(test)]
    fn record_count(&self) -> usize {
        self.inner.records.lock().unwrap().len()
    }
}

tokio::task_local! {
    static ACTIVE_SCOPE: Arc<ScopeInner>;
}

/// Returns the scope logically enclosing the currently executing code, or
/// `None` outside any scope (startup, background maintenance).
///
/// Never an error: instrumentation degrades to pass-through without a scope.
pub fn active_scope() -> Option<ScopeHandle> {
    ACTIVE_SCOPE
        .try_with(|inner| ScopeHandle {
            inner: inner.clone(),
        })
        .ok()
}

/// Runs `fut` inside a fresh scope and returns its output together with the
/// records accumulated while it ran.
///
/// The scope is ambient for every poll of `fut`, including nested helpers
/// that take no scope parameter, and survives every suspension point. An
/// inner `run_in_scope` gets its own independent scope; its records are not
/// merged into the outer one.
pub async fn run_in_scope<F>(attribution: Attribution, fut: F) -> (F::Output, Vec<CallRecord>)
where
    F: Future,
{
    let inner = Arc::new(ScopeInner {
        attribution,
        next_seq: AtomicU64::new(0),
        records: Mutex::new(Vec::new()),
    });
    debug!(request_id = %inner.attribution.request_id, task = %inner.attribution.task, "scope opened");

    let output = ACTIVE_SCOPE.scope(inner.clone(), fut).await;

    let mut entries = std::mem::take(&mut *inner.records.lock().unwrap());
    entries.sort_by_key(|(seq, _)| *seq);
    let records: Vec<CallRecord> = entries.into_iter().map(|(_, record)| record).collect();
    debug!(request_id = %inner.attribution.request_id, calls = records.len(), "scope closed");
    (output, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{build_record, CallOutcome, RequestMetrics};
    use std::time::Duration;

    fn test_record(tag: &str) -> CallRecord {
        let req = crate::provider::simple_request("sys", tag);
        build_record(
            &Attribution::new(tag, "t", "/e"),
            "openai",
            "gpt-4o",
            &RequestMetrics::from_request(&req),
            Duration::from_millis(1),
            false,
            0,
            CallOutcome::Success,
        )
    }

    #[tokio::test]
    async fn no_scope_outside_run_in_scope() {
        assert!(active_scope().is_none());
    }

    #[tokio::test]
    async fn scope_visible_inside_and_gone_after() {
        let attribution = Attribution::new("r1", "chat", "/chat").session("s1");
        let ((), records) = run_in_scope(attribution, async {
            let scope = active_scope().expect("scope should be active");
            assert_eq!(scope.attribution().request_id, "r1");
            assert_eq!(scope.attribution().session_id.as_deref(), Some("s1"));
        })
        .await;
        assert!(records.is_empty());
        assert!(active_scope().is_none());
    }

    #[tokio::test]
    async fn scope_survives_suspension_points() {
        let ((), _) = run_in_scope(Attribution::new("r1", "t", "/e"), async {
            assert!(active_scope().is_some());
            tokio::task::yield_now().await;
            assert!(active_scope().is_some());
            tokio::time::sleep(Duration::from_millis(1)).await;
            assert_eq!(active_scope().unwrap().attribution().request_id, "r1");
        })
        .await;
    }

    #[tokio::test]
    async fn records_come_back_in_initiation_order() {
        let ((), records) = run_in_scope(Attribution::new("r1", "t", "/e"), async {
            let scope = active_scope().unwrap();
            let first = scope.claim_seq();
            let second = scope.claim_seq();
            // Completions land out of order.
            scope.append(second, test_record("second"));
            scope.append(first, test_record("first"));
        })
        .await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].request_id, "first");
        assert_eq!(records[1].request_id, "second");
    }

    #[tokio::test]
    async fn nested_scopes_are_independent() {
        let (inner_records, outer_records) =
            run_in_scope(Attribution::new("outer", "t", "/e"), async {
                let outer = active_scope().unwrap();
                let seq = outer.claim_seq();
                outer.append(seq, test_record("outer-call"));

                let ((), inner_records) =
                    run_in_scope(Attribution::new("inner", "t", "/e"), async {
                        let inner = active_scope().unwrap();
                        assert_eq!(inner.attribution().request_id, "inner");
                        let seq = inner.claim_seq();
                        inner.append(seq, test_record("inner-call"));
                    })
                    .await;

                // Back in the outer scope after the inner one closed.
                assert_eq!(active_scope().unwrap().attribution().request_id, "outer");
                assert_eq!(active_scope().unwrap().record_count(), 1);
                inner_records
            })
            .await;

        assert_eq!(inner_records.len(), 1);
        assert_eq!(inner_records[0].request_id, "inner-call");
        assert_eq!(outer_records.len(), 1);
        assert_eq!(outer_records[0].request_id, "outer-call");
    }

    #[tokio::test]
    async fn interleaved_scopes_never_leak() {
        let a = run_in_scope(Attribution::new("a", "t", "/e"), async {
            let scope = active_scope().unwrap();
            let seq = scope.claim_seq();
            scope.append(seq, test_record("a1"));
            tokio::task::yield_now().await;
            assert_eq!(active_scope().unwrap().attribution().request_id, "a");
            let seq = scope.claim_seq();
            scope.append(seq, test_record("a2"));
        });
        let b = run_in_scope(Attribution::new("b", "t", "/e"), async {
            tokio::task::yield_now().await;
            let scope = active_scope().unwrap();
            assert_eq!(scope.attribution().request_id, "b");
            let seq = scope.claim_seq();
            scope.append(seq, test_record("b1"));
        });

        let (((), a_records), ((), b_records)) = tokio::join!(a, b);
        let a_tags: Vec<_> = a_records.iter().map(|r| r.request_id.as_str()).collect();
        let b_tags: Vec<_> = b_records.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(a_tags, vec!["a1", "a2"]);
        assert_eq!(b_tags, vec!["b1"]);
    }
}
