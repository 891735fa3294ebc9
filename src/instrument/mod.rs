//! Zero-interference instrumentation of model calls
//!
//! What this module provides
//! - The choke point every backend call passes through: it attributes the
//!   call to the active scope, measures size/cost/duration without keeping
//!   content, and hands the summary to the scope and the durable log,
//!   returning the backend's result (or error) to the caller unchanged
//!
//! Exports
//! - Layers
//!   - `InstrumentLayer` wrapping any single-shot `GenerateService`
//! - Services
//!   - `Instrument<S>`: the wrapped single-shot service
//! - Providers
//!   - `InstrumentedStreamProvider<P>` wrapping any `StreamProvider`; its
//!     streams are `RecordedStream` values with a `RecordHandle` side
//!     channel for the finished record
//!
//! Implementation strategy
//! - Interception is dependency injection, not rebinding: the layer captures
//!   the un-instrumented inner service by value and only ever calls that
//!   captured value, so re-interception cannot recurse
//! - The scope (and its initiation-order slot) is captured synchronously at
//!   call time; without an active scope the call passes straight through:
//!   no record, no log traffic, result untouched
//! - Input metrics come from the request, never from the response; the
//!   stream wrapper keeps only a running character count, no buffering
//! - A stream records once, at exhaustion or first error, then fuses; a
//!   stream dropped before exhaustion records nothing
//!
//! Composition
//! - `InstrumentLayer::new(provider_config, log).layer(backend)`
//! - `InstrumentedStreamProvider::new(backend, provider_config, log)`
//!
//! Testing strategy
//! - Scripted backends assert transparency, per-scope attribution, exact
//!   fragment re-yield, failure re-raising, and no-scope passthrough

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use tower::{BoxError, Layer, Service};
use tracing::debug;

use crate::config::ProviderConfig;
use crate::provider::{Completion, GenerateRequest, StreamProvider};
use crate::record::{build_record, CallOutcome, CallRecord, RequestMetrics};
use crate::scope::{active_scope, ScopeHandle};
use crate::sink::LogHandle;

/// Layer that instruments a single-shot generate service.
#[derive(Clone)]
pub struct InstrumentLayer {
    config: Arc<ProviderConfig>,
    log: LogHandle,
}

impl InstrumentLayer {
    pub fn new(config: ProviderConfig, log: LogHandle) -> Self {
        Self {
            config: Arc::new(config),
            log,
        }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = Instrument<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Instrument {
            inner,
            config: self.config.clone(),
            log: self.log.clone(),
        }
    }
}

/// Single-shot generate service with instrumentation around `call`.
#[derive(Clone)]
pub struct Instrument<S> {
    inner: S,
    config: Arc<ProviderConfig>,
    log: LogHandle,
}

impl<S> Service<GenerateRequest> for Instrument<S>
where
    S: Service<GenerateRequest, Response = Completion, Error = BoxError> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Completion;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Completion, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: GenerateRequest) -> Self::Future {
        let Some(scope) = active_scope() else {
            // Outside any scope the call passes through untouched.
            return Box::pin(self.inner.call(req));
        };
        let seq = scope.claim_seq();
        let metrics = RequestMetrics::from_request(&req);
        let model = resolve_model(&req, &self.config);
        let provider = self.config.provider.clone();
        let log = self.log.clone();
        let start = Instant::now();

        let fut = self.inner.call(req);
        Box::pin(async move {
            match fut.await {
                Ok(completion) => {
                    let record = build_record(
                        scope.attribution(),
                        &provider,
                        &model,
                        &metrics,
                        start.elapsed(),
                        false,
                        completion.text.chars().count() as u64,
                        CallOutcome::Success,
                    );
                    emit(&scope, seq, &log, record);
                    Ok(completion)
                }
                Err(err) => {
                    let record = build_record(
                        scope.attribution(),
                        &provider,
                        &model,
                        &metrics,
                        start.elapsed(),
                        false,
                        0,
                        CallOutcome::Failure {
                            error: err.to_string(),
                        },
                    );
                    emit(&scope, seq, &log, record);
                    // The caller sees exactly the error the backend raised.
                    Err(err)
                }
            }
        })
    }
}

fn resolve_model(req: &GenerateRequest, config: &ProviderConfig) -> String {
    req.model
        .clone()
        .unwrap_or_else(|| config.default_model.clone())
}

fn emit(scope: &ScopeHandle, seq: u64, log: &LogHandle, record: CallRecord) {
    debug!(
        call_id = %record.id,
        model = %record.model,
        status = ?record.status,
        cost_microdollars = record.cost_microdollars,
        duration_ms = record.duration_ms,
        "call recorded"
    );
    scope.append(seq, record.clone());
    log.submit(record);
}

/// Side channel for a stream's finished record.
///
/// Filled exactly once, after the consumer has fully drained the stream (or
/// the stream failed). Never filled for an abandoned stream.
#[derive(Debug, Clone, Default)]
pub struct RecordHandle {
    cell: Arc<OnceLock<CallRecord>>,
}

impl RecordHandle {
    pub fn get(&self) -> Option<CallRecord> {
        self.cell.get().cloned()
    }
}

struct CallContext {
    scope: ScopeHandle,
    seq: u64,
    metrics: RequestMetrics,
    provider: String,
    model: String,
    start: Instant,
    log: LogHandle,
}

/// A fragment stream that re-yields its input unchanged while accumulating
/// a running character count.
///
/// The record is finalized on the terminal item only; dropping the stream
/// early finalizes nothing, so abandoned streams leave no record.
pub struct RecordedStream<S> {
    inner: Pin<Box<S>>,
    ctx: Option<CallContext>,
    handle: RecordHandle,
    response_chars: u64,
    done: bool,
}

impl<S> RecordedStream<S> {
    fn passthrough(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            ctx: None,
            handle: RecordHandle::default(),
            response_chars: 0,
            done: false,
        }
    }

    fn instrumented(inner: S, ctx: CallContext) -> Self {
        Self {
            inner: Box::pin(inner),
            ctx: Some(ctx),
            handle: RecordHandle::default(),
            response_chars: 0,
            done: false,
        }
    }

    /// The side channel where the finished record appears.
    pub fn record_handle(&self) -> RecordHandle {
        self.handle.clone()
    }

    fn finish(&mut self, outcome: CallOutcome) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        let record = build_record(
            ctx.scope.attribution(),
            &ctx.provider,
            &ctx.model,
            &ctx.metrics,
            ctx.start.elapsed(),
            true,
            self.response_chars,
            outcome,
        );
        emit(&ctx.scope, ctx.seq, &ctx.log, record.clone());
        let _ = self.handle.cell.set(record);
    }
}

impl<S> Stream for RecordedStream<S>
where
    S: Stream<Item = Result<String, BoxError>>,
{
    type Item = Result<String, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(fragment))) => {
                this.response_chars += fragment.chars().count() as u64;
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                this.finish(CallOutcome::Failure {
                    error: err.to_string(),
                });
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                this.finish(CallOutcome::Success);
                Poll::Ready(None)
            }
        }
    }
}

/// Decorator that instruments every stream a provider opens.
pub struct InstrumentedStreamProvider<P> {
    inner: Arc<P>,
    config: Arc<ProviderConfig>,
    log: LogHandle,
}

impl<P> InstrumentedStreamProvider<P> {
    pub fn new(inner: P, config: ProviderConfig, log: LogHandle) -> Self {
        Self {
            inner: Arc::new(inner),
            config: Arc::new(config),
            log,
        }
    }
}

impl<P> StreamProvider for InstrumentedStreamProvider<P>
where
    P: StreamProvider,
{
    type Stream = RecordedStream<P::Stream>;

    fn stream(
        &self,
        req: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, BoxError>> + Send>> {
        // Scope and slot are captured at initiation, before any suspension.
        let scope = active_scope();
        let inner = self.inner.clone();
        let config = self.config.clone();
        let log = self.log.clone();

        Box::pin(async move {
            let Some(scope) = scope else {
                let stream = inner.stream(req).await?;
                return Ok(RecordedStream::passthrough(stream));
            };
            let seq = scope.claim_seq();
            let metrics = RequestMetrics::from_request(&req);
            let model = resolve_model(&req, &config);
            let provider = config.provider.clone();
            let start = Instant::now();

            match inner.stream(req).await {
                Ok(stream) => Ok(RecordedStream::instrumented(
                    stream,
                    CallContext {
                        scope,
                        seq,
                        metrics,
                        provider,
                        model,
                        start,
                        log,
                    },
                )),
                Err(err) => {
                    // Failed before the first fragment: still one record per attempt.
                    let record = build_record(
                        scope.attribution(),
                        &provider,
                        &model,
                        &metrics,
                        start.elapsed(),
                        true,
                        0,
                        CallOutcome::Failure {
                            error: err.to_string(),
                        },
                    );
                    emit(&scope, seq, &log, record);
                    Err(err)
                }
            }
        })
    }
}
