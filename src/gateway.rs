//! # Gateway Entry Point
//!
//! The single public entry for request handlers: run a block of
//! request-handling logic inside a scope and get back both its result and
//! every call record collected while it ran.
//!
//! Handlers that want live diagnostics read `call_records` off the returned
//! [`GatewayRun`]; handlers that only want logging ignore it: records reach
//! the durable log through the background queue either way.

use std::collections::HashSet;
use std::future::Future;

use async_trait::async_trait;

use crate::record::CallRecord;
use crate::scope::{run_in_scope, Attribution};

/// Result of one gateway-scoped run.
#[derive(Debug)]
pub struct GatewayRun<T> {
    /// Whatever the wrapped future produced
    pub result: T,

    /// Records of every instrumented call made inside the scope, in call
    /// initiation order
    pub call_records: Vec<CallRecord>,
}

/// Runs `fut` inside a fresh scope attributed with `attribution`.
///
/// Every instrumented generate/stream call made by `fut`, directly or
/// through arbitrarily nested helpers, is attributed to this run. Two
/// concurrent runs interleaved on one executor thread never see each
/// other's calls.
pub async fn run_with_gateway<F>(attribution: Attribution, fut: F) -> GatewayRun<F::Output>
where
    F: Future,
{
    let (result, call_records) = run_in_scope(attribution, fut).await;
    GatewayRun {
        result,
        call_records,
    }
}

/// Per-request verbosity preference, backed by an external user-preference
/// store. Callers consult it to decide whether to surface `call_records`
/// back to an end user.
#[async_trait]
pub trait VerbosityPrefs: Send + Sync {
    async fn is_verbose_enabled(&self, request_id: &str) -> bool;
}

/// In-memory preference set for tests and simple deployments.
#[derive(Debug, Default)]
pub struct MemoryVerbosity {
    enabled: HashSet<String>,
}

impl MemoryVerbosity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, request_id: impl Into<String>) {
        self.enabled.insert(request_id.into());
    }
}

#[async_trait]
impl VerbosityPrefs for MemoryVerbosity {
    async fn is_verbose_enabled(&self, request_id: &str) -> bool {
        self.enabled.contains(request_id)
    }
}
