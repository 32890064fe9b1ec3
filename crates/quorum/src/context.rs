// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Context-window budgeting for phase prompts.
//!
//! Prompts are assembled from named segments. `Full` segments are never
//! dropped or shortened; `Trimmable` segments share whatever budget remains,
//! proportional to their size, each truncated with an explicit `[…]` marker.
//! Token counts use a cheap character heuristic (1 token ≈ 4 chars); the
//! budget is the provider's context window minus a reserved output allowance.

use serde::{Deserialize, Serialize};

/// Reserved output allowance subtracted from every provider budget.
pub const RESERVED_OUTPUT_TOKENS: usize = 4_096;

const TRUNCATION_MARKER: &str = " […]";

/// Priority of a prompt segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPriority {
    /// Must survive intact.
    Full,
    /// May be truncated to fit.
    Trimmable,
}

/// One named piece of a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub text: String,
    pub priority: SegmentPriority,
}

impl Segment {
    #[must_use]
    pub fn full(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            priority: SegmentPriority::Full,
        }
    }

    #[must_use]
    pub fn trimmable(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            priority: SegmentPriority::Trimmable,
        }
    }
}

/// Result of fitting segments into a budget.
#[derive(Debug, Clone)]
pub struct BudgetedPrompt {
    /// Concatenated prompt text, segment order preserved.
    pub text: String,
    /// Estimated token count of `text`.
    pub tokens: usize,
    /// Names of segments that were truncated.
    pub trimmed: Vec<String>,
    /// Set when `Full` segments alone exceed the budget.
    pub warning: Option<String>,
}

/// Estimate tokens with the 1-token-per-4-chars heuristic.
///
/// Intentionally approximate; whitespace runs collapse so formatting-heavy
/// prompts are not over-counted.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.split_whitespace().map(str::len).sum::<usize>()
        + text.split_whitespace().count().saturating_sub(1);
    chars.div_ceil(4)
}

/// Budget for one provider: context window minus the reserved output allowance.
#[must_use]
pub fn provider_budget(context_window: usize) -> usize {
    context_window.saturating_sub(RESERVED_OUTPUT_TOKENS)
}

/// Segments after fitting, structure preserved.
#[derive(Debug, Clone)]
pub struct FittedSegments {
    pub segments: Vec<Segment>,
    /// Names of segments that were truncated.
    pub trimmed: Vec<String>,
    /// Set when `Full` segments alone exceed the budget.
    pub warning: Option<String>,
}

/// Fit `segments` into `budget_tokens`, keeping the segment structure so
/// callers can reassemble prompts their own way.
///
/// If the `Full` segments alone exceed the budget everything is returned
/// unchanged with a warning; a `Full` segment is never dropped.
#[must_use]
pub fn fit_each(segments: &[Segment], budget_tokens: usize) -> FittedSegments {
    let full_tokens: usize = segments
        .iter()
        .filter(|s| s.priority == SegmentPriority::Full)
        .map(|s| estimate_tokens(&s.text))
        .sum();

    if full_tokens > budget_tokens {
        return FittedSegments {
            segments: segments.to_vec(),
            trimmed: Vec::new(),
            warning: Some(format!(
                "full segments need {full_tokens} tokens but the budget is {budget_tokens}"
            )),
        };
    }

    let trimmable_budget = budget_tokens - full_tokens;
    let trimmable_tokens: usize = segments
        .iter()
        .filter(|s| s.priority == SegmentPriority::Trimmable)
        .map(|s| estimate_tokens(&s.text))
        .sum();

    let mut trimmed = Vec::new();
    let mut fitted = Vec::with_capacity(segments.len());
    for segment in segments {
        match segment.priority {
            SegmentPriority::Full => fitted.push(segment.clone()),
            SegmentPriority::Trimmable => {
                if trimmable_tokens <= trimmable_budget {
                    fitted.push(segment.clone());
                    continue;
                }
                // Proportional share of the remaining budget.
                let own = estimate_tokens(&segment.text);
                let share = if trimmable_tokens == 0 {
                    0
                } else {
                    trimmable_budget * own / trimmable_tokens
                };
                if share >= own {
                    fitted.push(segment.clone());
                } else {
                    fitted.push(Segment {
                        name: segment.name.clone(),
                        text: truncate_to_tokens(&segment.text, share),
                        priority: segment.priority,
                    });
                    trimmed.push(segment.name.clone());
                }
            }
        }
    }
    FittedSegments {
        segments: fitted,
        trimmed,
        warning: None,
    }
}

/// Fit `segments` and join them into one prompt string.
#[must_use]
pub fn fit(segments: &[Segment], budget_tokens: usize) -> BudgetedPrompt {
    let fitted = fit_each(segments, budget_tokens);
    let text = join(fitted.segments.iter().map(|s| s.text.as_str()));
    let tokens = estimate_tokens(&text);
    BudgetedPrompt {
        text,
        tokens,
        trimmed: fitted.trimmed,
        warning: fitted.warning,
    }
}

fn join<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `text` to roughly `tokens` tokens on a word boundary and append the
/// truncation marker.
fn truncate_to_tokens(text: &str, tokens: usize) -> String {
    let target_chars = tokens * 4;
    if text.len() <= target_chars {
        return text.to_string();
    }
    let mut cut = 0;
    for (offset, _) in text.char_indices() {
        if offset > target_chars {
            break;
        }
        cut = offset;
    }
    // Back up to the previous word boundary.
    let head = &text[..cut];
    let boundary = head.rfind(char::is_whitespace).unwrap_or(cut);
    format!("{}{TRUNCATION_MARKER}", &text[..boundary])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_scales_with_length() {
        assert_eq!(estimate_tokens(""), 0);
        let short = estimate_tokens("one two three");
        let long = estimate_tokens(&"word ".repeat(100));
        assert!(long > short * 10);
    }

    #[test]
    fn test_everything_fits_untouched() {
        let segments = vec![
            Segment::full("question", "What is ownership?"),
            Segment::trimmable("history", "Earlier we discussed borrowing."),
        ];
        let result = fit(&segments, 10_000);
        assert!(result.trimmed.is_empty());
        assert!(result.warning.is_none());
        assert!(result.text.contains("ownership"));
        assert!(result.text.contains("borrowing"));
    }

    #[test]
    fn test_trimmable_segments_share_remainder_proportionally() {
        let segments = vec![
            Segment::full("question", "Q ".repeat(20)),
            Segment::trimmable("big", "alpha ".repeat(400)),
            Segment::trimmable("small", "beta ".repeat(100)),
        ];
        let result = fit(&segments, 300);
        assert_eq!(result.trimmed, vec!["big".to_string(), "small".to_string()]);
        assert!(result.text.contains("[…]"));
        // The bigger segment keeps a bigger share.
        let alpha = result.text.matches("alpha").count();
        let beta = result.text.matches("beta").count();
        assert!(alpha > beta);
        assert!(result.tokens <= 320, "tokens {} over budget", result.tokens);
    }

    #[test]
    fn test_full_segments_never_dropped() {
        let segments = vec![
            Segment::full("a", "x ".repeat(500)),
            Segment::full("b", "y ".repeat(500)),
        ];
        let result = fit(&segments, 100);
        assert!(result.warning.is_some());
        assert!(result.text.contains('x'));
        assert!(result.text.contains('y'));
        assert!(result.trimmed.is_empty());
    }

    #[test]
    fn test_truncation_marker_present() {
        let cut = truncate_to_tokens(&"lorem ipsum dolor ".repeat(50), 10);
        assert!(cut.ends_with("[…]"));
        assert!(cut.len() < 100);
    }

    #[test]
    fn test_provider_budget_reserves_output() {
        assert_eq!(provider_budget(128_000), 128_000 - RESERVED_OUTPUT_TOKENS);
        assert_eq!(provider_budget(1_000), 0);
    }
}
