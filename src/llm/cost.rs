//! Cost estimation for LLM usage.
//!
//! Prices are USD per million tokens (input, output). Unknown models fall
//! back to a conservative default so estimates never read as free.

use super::client::Usage;

/// Fallback pricing for models not in the table.
const DEFAULT_PRICING: (f64, f64) = (3.0, 15.0);

/// Known model pricing, matched by substring of the model id.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1", 2.00, 8.00),
    ("claude-3.5-haiku", 0.80, 4.00),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-opus", 15.00, 75.00),
    ("gemini-2.0-flash", 0.10, 0.40),
    ("kimi-k2", 0.50, 1.50),
];

/// Returns `(input, output)` USD per million tokens for `model`.
pub fn model_pricing(model: &str) -> (f64, f64) {
    let model = model.to_lowercase();
    MODEL_PRICING
        .iter()
        .find(|(pattern, _, _)| model.contains(pattern))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_PRICING)
}

/// Estimates the USD cost of a completion.
pub fn estimate_cost_usd(model: &str, usage: &Usage) -> f64 {
    let (input, output) = model_pricing(model);
    (usage.prompt_tokens as f64 * input + usage.completion_tokens as f64 * output) / 1_000_000.0
}
