//! Template cache economics
//!
//! Decides the cache status of a run and the tokens/cost it avoided by
//! reusing a template instead of compiling a fresh packet.

use crate::model::{CacheStatus, Template, TokenPricing};

/// Cache fields stamped onto a receipt before it is hashed
#[derive(Debug, Clone, PartialEq)]
pub struct CacheAnnotation {
    pub cache_status: CacheStatus,
    pub template_id: Option<String>,
    pub baseline_prompt_tokens: u64,
    pub baseline_completion_tokens: u64,
    pub avoided_prompt_tokens: u64,
    pub avoided_completion_tokens: u64,
    pub avoided_cost: f64,
    pub token_pricing: TokenPricing,
    pub reuse_count_at_run_start: Option<u64>,
}

impl CacheAnnotation {
    /// Annotation for a packet with no `template_id`
    pub fn none(pricing: TokenPricing) -> Self {
        Self {
            cache_status: CacheStatus::None,
            template_id: None,
            baseline_prompt_tokens: 0,
            baseline_completion_tokens: 0,
            avoided_prompt_tokens: 0,
            avoided_completion_tokens: 0,
            avoided_cost: 0.0,
            token_pricing: pricing,
            reuse_count_at_run_start: None,
        }
    }
}

/// Assess a run at its start.
///
/// - no `template_id` → `NONE`
/// - `template_id` naming an unknown template → `MISS`, zero baselines
/// - known template with `reuse_count > 0` → `HIT`, baselines avoided
/// - known template never instantiated → `MISS`, baselines recorded but
///   nothing avoided
pub fn assess(
    template_id: Option<&str>,
    template: Option<&Template>,
    pricing: TokenPricing,
) -> CacheAnnotation {
    let Some(template_id) = template_id else {
        return CacheAnnotation::none(pricing);
    };

    let Some(template) = template else {
        return CacheAnnotation {
            cache_status: CacheStatus::Miss,
            template_id: Some(template_id.to_string()),
            ..CacheAnnotation::none(pricing)
        };
    };

    let hit = template.reuse_count > 0;
    let (avoided_prompt, avoided_completion) = if hit {
        (
            template.baseline_prompt_tokens,
            template.baseline_completion_tokens,
        )
    } else {
        (0, 0)
    };

    CacheAnnotation {
        cache_status: if hit {
            CacheStatus::Hit
        } else {
            CacheStatus::Miss
        },
        template_id: Some(template_id.to_string()),
        baseline_prompt_tokens: template.baseline_prompt_tokens,
        baseline_completion_tokens: template.baseline_completion_tokens,
        avoided_prompt_tokens: avoided_prompt,
        avoided_completion_tokens: avoided_completion,
        avoided_cost: avoided_cost(avoided_prompt, avoided_completion, &pricing),
        token_pricing: pricing,
        reuse_count_at_run_start: Some(template.reuse_count),
    }
}

/// `prompt/1000 * input_price + completion/1000 * output_price`
pub fn avoided_cost(prompt_tokens: u64, completion_tokens: u64, pricing: &TokenPricing) -> f64 {
    prompt_tokens as f64 / 1000.0 * pricing.input_price_per_1k
        + completion_tokens as f64 / 1000.0 * pricing.output_price_per_1k
}
