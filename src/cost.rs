//! # Cost Model for Generated-Text Calls
//!
//! Pure estimation helpers used by the call recorder: a character-ratio
//! token estimate and a static per-model price table.
//!
//! All monetary values are integer **microdollars** (one millionth of a US
//! dollar). Costs are summed across many calls and many scopes, and integer
//! arithmetic keeps those sums exact where repeated `f64` additions would
//! drift.
//!
//! Estimation must never get in the way of the call it is measuring:
//! unknown models price at zero, and nothing here can fail.
//!
//! ### Example
//!
//! ```rust
//! use llm_gateway::cost::{estimate_cost, estimate_tokens};
//!
//! let tokens = estimate_tokens("hello world");
//! assert_eq!(tokens, 3); // ceil(11 / 4)
//!
//! // One million input tokens costs exactly the tabulated input price.
//! assert_eq!(estimate_cost("gpt-4o", 1_000_000, 0), 2_500_000);
//! assert_eq!(estimate_cost("some-unknown-model", 1_000_000, 0), 0);
//! ```

/// Assumed characters-per-token ratio for the estimate.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Per-million-token prices for one model, in microdollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPricing {
    pub input_per_mtok: u64,
    pub output_per_mtok: u64,
}

/// Static price table, microdollars per million tokens.
///
/// Longer prefixes come before their parents so versioned ids
/// ("gpt-4o-2024-08-06", "gpt-4o-mini-2024-07-18") resolve to the right row.
const PRICING: &[(&str, ModelPricing)] = &[
    (
        "gpt-4o-mini",
        ModelPricing {
            input_per_mtok: 150_000,
            output_per_mtok: 600_000,
        },
    ),
    (
        "gpt-4o",
        ModelPricing {
            input_per_mtok: 2_500_000,
            output_per_mtok: 10_000_000,
        },
    ),
    (
        "gpt-4.1-mini",
        ModelPricing {
            input_per_mtok: 400_000,
            output_per_mtok: 1_600_000,
        },
    ),
    (
        "gpt-4.1",
        ModelPricing {
            input_per_mtok: 2_000_000,
            output_per_mtok: 8_000_000,
        },
    ),
    (
        "o3-mini",
        ModelPricing {
            input_per_mtok: 1_100_000,
            output_per_mtok: 4_400_000,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPricing {
            input_per_mtok: 800_000,
            output_per_mtok: 4_000_000,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input_per_mtok: 3_000_000,
            output_per_mtok: 15_000_000,
        },
    ),
    (
        "claude-opus-4",
        ModelPricing {
            input_per_mtok: 15_000_000,
            output_per_mtok: 75_000_000,
        },
    ),
];

/// Looks up pricing for a model id by longest-prefix match.
pub fn lookup_pricing(model: &str) -> Option<ModelPricing> {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
}

/// Estimates the token count of `text` as `ceil(chars / CHARS_PER_TOKEN)`.
///
/// Deterministic and infallible; empty text yields 0.
pub fn estimate_tokens(text: &str) -> u64 {
    estimate_tokens_for_chars(text.chars().count() as u64)
}

/// Token estimate for an already-counted number of characters.
///
/// Streaming calls accumulate a running character count and convert it once
/// at the end through this helper, so the two paths agree.
pub fn estimate_tokens_for_chars(chars: u64) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Estimated cost of a call in microdollars.
///
/// `round(input_tokens / 1e6 * input_price) + round(output_tokens / 1e6 *
/// output_price)`, computed with half-up integer rounding. Unknown models
/// cost 0 rather than failing.
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> u64 {
    match lookup_pricing(model) {
        Some(pricing) => {
            per_mtok(input_tokens, pricing.input_per_mtok)
                + per_mtok(output_tokens, pricing.output_per_mtok)
        }
        None => 0,
    }
}

fn per_mtok(tokens: u64, price_per_mtok: u64) -> u64 {
    (tokens * price_per_mtok + 500_000) / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("a"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(4000)), 1000);
    }

    #[test]
    fn test_token_estimate_counts_chars_not_bytes() {
        // Four characters, twelve bytes.
        assert_eq!(estimate_tokens("日本語字"), 1);
    }

    #[test]
    fn test_cost_is_tabulated_price_at_one_million_tokens() {
        assert_eq!(estimate_cost("gpt-4o", 1_000_000, 0), 2_500_000);
        assert_eq!(estimate_cost("gpt-4o", 0, 1_000_000), 10_000_000);
        assert_eq!(estimate_cost("claude-opus-4", 1_000_000, 0), 15_000_000);
    }

    #[test]
    fn test_unknown_model_costs_zero() {
        assert_eq!(estimate_cost("some-unknown-model", 1_000_000, 500_000), 0);
        assert_eq!(estimate_cost("", 42, 42), 0);
    }

    #[test]
    fn test_versioned_ids_resolve_by_prefix() {
        assert_eq!(
            lookup_pricing("gpt-4o-2024-08-06"),
            lookup_pricing("gpt-4o")
        );
        // The mini row must win over its "gpt-4o" parent prefix.
        assert_eq!(
            lookup_pricing("gpt-4o-mini-2024-07-18"),
            lookup_pricing("gpt-4o-mini")
        );
        assert_ne!(lookup_pricing("gpt-4o-mini"), lookup_pricing("gpt-4o"));
    }

    #[test]
    fn test_rounding_is_half_up() {
        // 1 token of gpt-4o input: 2.5 microdollars rounds to 3.
        assert_eq!(estimate_cost("gpt-4o", 1, 0), 3);
        // 1 token of gpt-4.1 input: 2.0 exactly.
        assert_eq!(estimate_cost("gpt-4.1", 1, 0), 2);
    }

    #[test]
    fn test_costs_sum_exactly() {
        let single = estimate_cost("gpt-4o-mini", 1_000, 1_000);
        let total: u64 = (0..1000).map(|_| single).sum();
        assert_eq!(total, single * 1000);
    }
}
