//! Model backend abstraction
//!
//! What this module provides
//! - The two invocation shapes of a generative-text backend, decoupled from
//!   any concrete network client
//!
//! Exports
//! - Models
//!   - `GenerateRequest { system, messages, max_output_tokens, temperature, model }`
//!   - `ChatMessage { role, content }`, `Completion { text }`
//! - Services
//!   - `GenerateService`: any `Service<GenerateRequest, Response=Completion, Error=BoxError>`
//! - Traits
//!   - `StreamProvider`: opens a finite, non-restartable fragment stream
//! - Utils
//!   - `simple_request(system, user)` request constructor
//!   - Scripted providers for tests: `ScriptedProvider`, `FaultyProvider`,
//!     `fixed_completion`
//!
//! Implementation strategy
//! - Real backends adapt their SDK types to these at the edge; the
//!   instrumentation layer only ever sees this interface
//! - Streams carry `Result<String, BoxError>` items so a backend can fail
//!   either before the first fragment (at open) or mid-sequence
//!
//! Testing strategy
//! - The scripted providers yield a fixed fragment sequence (optionally
//!   ending in an error) so interception can be asserted without a network

use std::future::Future;
use std::pin::Pin;

use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use tower::{BoxError, Service};

/// Role tag of one conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One role-tagged message of a request's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single model invocation, owned by the caller and immutable for the
/// duration of the call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// System instructions
    pub system: String,

    /// Ordered conversation messages
    pub messages: Vec<ChatMessage>,

    /// Maximum output size in tokens
    pub max_output_tokens: Option<u32>,

    /// Sampling temperature
    pub temperature: Option<f32>,

    /// Explicit model override; absent, the provider's default model applies
    pub model: Option<String>,
}

/// Convenience constructor for a one-user-message request.
pub fn simple_request(system: impl Into<String>, user: impl Into<String>) -> GenerateRequest {
    GenerateRequest {
        system: system.into(),
        messages: vec![ChatMessage::user(user)],
        ..Default::default()
    }
}

/// The complete text of a single-shot call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
}

/// Blanket alias for the single-shot generate capability.
pub trait GenerateService:
    Service<GenerateRequest, Response = Completion, Error = BoxError>
{
}
impl<T> GenerateService for T where
    T: Service<GenerateRequest, Response = Completion, Error = BoxError>
{
}

/// A boxed stream of text fragments whose concatenation is the generated
/// text. Finite and not restartable.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, BoxError>> + Send>>;

/// The streaming generate capability.
///
/// Kept abstract so tests can inject scripted providers; a real provider
/// adapts its SSE/streaming API to this interface at the edge.
pub trait StreamProvider: Send + Sync + 'static {
    type Stream: Stream<Item = Result<String, BoxError>> + Send + 'static;

    fn stream(
        &self,
        req: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, BoxError>> + Send>>;
}

/// A provider that always yields a fixed sequence of fragments.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    fragments: Vec<String>,
}

impl ScriptedProvider {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
        }
    }
}

impl StreamProvider for ScriptedProvider {
    type Stream = FragmentStream;

    fn stream(
        &self,
        _req: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, BoxError>> + Send>> {
        let items: Vec<Result<String, BoxError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        Box::pin(async move { Ok(Box::pin(stream::iter(items)) as FragmentStream) })
    }
}

/// A provider that yields its fragments and then fails mid-sequence.
#[derive(Debug, Clone)]
pub struct FaultyProvider {
    fragments: Vec<String>,
    error: String,
}

impl FaultyProvider {
    pub fn new<I, S>(fragments: I, error: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            error: error.into(),
        }
    }
}

impl StreamProvider for FaultyProvider {
    type Stream = FragmentStream;

    fn stream(
        &self,
        _req: GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream, BoxError>> + Send>> {
        let mut items: Vec<Result<String, BoxError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        items.push(Err(self.error.clone().into()));
        Box::pin(async move { Ok(Box::pin(stream::iter(items)) as FragmentStream) })
    }
}

/// Service returning a fixed completion for any request.
#[derive(Debug, Clone)]
pub struct FixedCompletion {
    text: String,
}

pub fn fixed_completion(text: impl Into<String>) -> FixedCompletion {
    FixedCompletion { text: text.into() }
}

impl Service<GenerateRequest> for FixedCompletion {
    type Response = Completion;
    type Error = BoxError;
    type Future = futures::future::Ready<Result<Completion, BoxError>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: GenerateRequest) -> Self::Future {
        futures::future::ready(Ok(Completion {
            text: self.text.clone(),
        }))
    }
}
