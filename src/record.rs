//! # Call Records
//!
//! The structured, content-free summary of one completed (or failed) model
//! call. A [`CallRecord`] carries attribution labels, size and cost
//! estimates, timing, and outcome. It never carries request or response body text.
//! The only content-derived string is a bounded preview of the system
//! instructions, kept for diagnostic display.
//!
//! Building a record is a pure computation over the request-side metrics
//! (taken before the call is made), the resolved provider/model, the
//! measured duration, and the outcome. Persistence and scope accounting are
//! the interceptor's job, not this module's.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cost::{estimate_cost, estimate_tokens_for_chars};
use crate::provider::GenerateRequest;
use crate::scope::Attribution;

/// Upper bound on the stored system-instruction preview, in characters.
pub const SYSTEM_PREVIEW_MAX: usize = 120;

/// Outcome of a call as stored in its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    Error,
}

/// One model call's structured metadata.
///
/// Immutable once built; serializable for the durable call log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Unique call identifier (UUIDv4)
    pub id: String,

    /// Attribution: the logical request this call belongs to
    pub request_id: String,
    pub session_id: Option<String>,
    pub task: String,
    pub app: Option<String>,
    pub endpoint: String,

    /// Resolved backend identity
    pub provider: String,
    pub model: String,

    /// Input size, measured from the request only
    pub request_chars: u64,
    pub request_tokens: u64,

    /// Output size; zero for failed single-shot calls
    pub response_chars: u64,
    pub response_tokens: u64,

    /// Request parameters worth keeping for analytics
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature scaled by 100 and rounded, kept integer in storage
    pub temperature_hundredths: Option<i32>,

    /// Estimated cost in microdollars (1 USD = 1_000_000)
    pub cost_microdollars: u64,

    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,

    pub status: CallStatus,
    pub error: Option<String>,

    /// Whether the call went through the streaming shape
    pub streamed: bool,

    /// Bounded preview of the system instructions, diagnostic display only
    pub system_preview: String,

    /// Number of conversation messages in the request
    pub message_count: usize,

    pub created_at: DateTime<Utc>,
}

/// Input-side measurements, taken from the request before it is handed to
/// the backend. Response content never feeds into these.
#[derive(Debug, Clone)]
pub struct RequestMetrics {
    pub request_chars: u64,
    pub request_tokens: u64,
    pub system_preview: String,
    pub message_count: usize,
    pub max_output_tokens: Option<u32>,
    pub temperature_hundredths: Option<i32>,
}

impl RequestMetrics {
    pub fn from_request(req: &GenerateRequest) -> Self {
        let request_chars = req.system.chars().count() as u64
            + req
                .messages
                .iter()
                .map(|m| m.content.chars().count() as u64)
                .sum::<u64>();
        Self {
            request_chars,
            request_tokens: estimate_tokens_for_chars(request_chars),
            system_preview: preview(&req.system),
            message_count: req.messages.len(),
            max_output_tokens: req.max_output_tokens,
            temperature_hundredths: req.temperature.map(quantize_temperature),
        }
    }
}

/// Terminal state of one call attempt.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success,
    Failure { error: String },
}

/// Quantizes a sampling temperature to integer hundredths (half-up).
pub fn quantize_temperature(temperature: f32) -> i32 {
    (temperature * 100.0).round() as i32
}

fn preview(text: &str) -> String {
    text.chars().take(SYSTEM_PREVIEW_MAX).collect()
}

/// Builds the record for one call attempt.
///
/// Success and failure go through this single constructor, so exactly one
/// record exists per attempt. `response_chars` is the completion's length
/// for single-shot successes, the running fragment total for streams, and
/// zero for failed single-shot calls.
pub fn build_record(
    attribution: &Attribution,
    provider: &str,
    model: &str,
    metrics: &RequestMetrics,
    duration: Duration,
    streamed: bool,
    response_chars: u64,
    outcome: CallOutcome,
) -> CallRecord {
    let response_tokens = estimate_tokens_for_chars(response_chars);
    let (status, error) = match outcome {
        CallOutcome::Success => (CallStatus::Ok, None),
        CallOutcome::Failure { error } => (CallStatus::Error, Some(error)),
    };
    CallRecord {
        id: Uuid::new_v4().to_string(),
        request_id: attribution.request_id.clone(),
        session_id: attribution.session_id.clone(),
        task: attribution.task.clone(),
        app: attribution.app.clone(),
        endpoint: attribution.endpoint.clone(),
        provider: provider.to_string(),
        model: model.to_string(),
        request_chars: metrics.request_chars,
        request_tokens: metrics.request_tokens,
        response_chars,
        response_tokens,
        max_output_tokens: metrics.max_output_tokens,
        temperature_hundredths: metrics.temperature_hundredths,
        cost_microdollars: estimate_cost(model, metrics.request_tokens, response_tokens),
        duration_ms: duration.as_millis() as u64,
        status,
        error,
        streamed,
        system_preview: metrics.system_preview.clone(),
        message_count: metrics.message_count,
        created_at: Utc::now(),
    }
}
