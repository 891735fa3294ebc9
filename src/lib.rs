//! # LLM Gateway
//!
//! An instrumentation gateway for generative-text calls. Every call to a
//! model backend, single-shot or streamed, passes through one choke point
//! that attributes it to the logical request that initiated it, measures
//! size, estimated cost (integer microdollars), and duration without
//! retaining any call content, and surfaces the summary twice: back to the
//! calling code for live diagnostics, and to a durable call log for
//! analytics. The wrapped call's semantics are untouched, success or
//! failure.
//!
//! ## Core Concepts
//!
//! - **Scope**: the per-request accumulator, made ambient with scoped
//!   task-local storage so it follows a request across every suspension
//!   point without parameter threading, and never leaks between requests
//!   interleaved on one executor thread.
//! - **Interception by injection**: the backend is wrapped once
//!   ([`InstrumentLayer`] for single-shot, [`InstrumentedStreamProvider`]
//!   for streams) and the wrapped value is what the rest of the process is
//!   handed. The wrapper holds the original by value and only ever calls
//!   that, so it cannot re-intercept itself.
//! - **Fire-and-forget logging**: records reach the durable sink through a
//!   bounded background queue that never blocks or fails the caller; drops
//!   and sink errors are counted and warned, not raised.
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use llm_gateway::{
//!     fixed_completion, run_with_gateway, simple_request, spawn_log_worker, Attribution,
//!     InstrumentLayer, Layer, MemorySink, ProviderConfig, Service, ServiceExt,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = Arc::new(MemorySink::new());
//! let log = spawn_log_worker(sink.clone(), 64);
//!
//! // Wrap the backend once; hand the wrapped client to request handlers.
//! let mut client = InstrumentLayer::new(ProviderConfig::default(), log.clone())
//!     .layer(fixed_completion("Hello!"));
//!
//! let run = run_with_gateway(Attribution::new("req-1", "chat", "/v1/chat"), async {
//!     client
//!         .ready()
//!         .await?
//!         .call(simple_request("You are terse.", "Say hello"))
//!         .await
//! })
//! .await;
//!
//! let completion = run.result.unwrap();
//! assert_eq!(completion.text, "Hello!");
//! assert_eq!(run.call_records.len(), 1);
//! assert!(run.call_records[0].cost_microdollars > 0);
//!
//! // The durable log receives the same record through the background queue.
//! log.flush().await;
//! assert_eq!(sink.len(), 1);
//! # }
//! ```

pub mod config;
pub mod cost;
pub mod error;
pub mod gateway;
pub mod instrument;
pub mod provider;
pub mod record;
pub mod scope;
pub mod sink;
pub mod sqlite_sink;

// Public re-exports for convenience
pub use config::{GatewayConfig, ProviderConfig};
pub use cost::{estimate_cost, estimate_tokens, CHARS_PER_TOKEN};
pub use error::{GatewayError, Result};
pub use gateway::{run_with_gateway, GatewayRun, MemoryVerbosity, VerbosityPrefs};
pub use instrument::{
    Instrument, InstrumentLayer, InstrumentedStreamProvider, RecordHandle, RecordedStream,
};
pub use provider::{
    fixed_completion, simple_request, ChatMessage, Completion, FaultyProvider, FixedCompletion,
    FragmentStream, GenerateRequest, GenerateService, Role, ScriptedProvider, StreamProvider,
};
pub use record::{CallRecord, CallStatus};
pub use scope::{active_scope, run_in_scope, Attribution, ScopeHandle};
pub use sink::{
    spawn_log_worker, CallLogSink, LogHandle, MemorySink, NullSink, DEFAULT_LOG_QUEUE_CAPACITY,
};
pub use sqlite_sink::SqliteCallLog;

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_imports() {
        // Verify that all modules compile
        let _ = std::mem::size_of::<GatewayError>();
    }
}
