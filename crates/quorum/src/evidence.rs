// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Structural evidence scoring over provider responses.
//!
//! A claim is a declarative sentence; a source is a parenthesized citation
//! or an "According to ..." / "Source: ..." attribution in the same
//! sentence. Sources are tiered A-F (statutory/primary down to none), each
//! tier carrying a weight. Cross-validation groups similar claims across
//! providers by stem overlap and marks groups corroborated or contradicted.
//!
//! This is structural scoring only: it measures sourcing discipline, not
//! factual correctness.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Source quality tier. `A` is statutory/primary, `F` is unsourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTier {
    A,
    B,
    C,
    D,
    F,
}

impl SourceTier {
    /// Weight used by `weighted_score`.
    #[must_use]
    pub fn weight(self) -> f64 {
        match self {
            SourceTier::A => 1.0,
            SourceTier::B => 0.8,
            SourceTier::C => 0.6,
            SourceTier::D => 0.4,
            SourceTier::F => 0.0,
        }
    }
}

/// One extracted claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub tier: SourceTier,
}

/// Evidence summary for one provider's response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderEvidence {
    pub provider: String,
    pub claims: Vec<Claim>,
    /// `supported claims / total claims`; 0 when no claims.
    pub evidence_score: f64,
    /// `Σ tier_weight / total claims`; 0 when no claims.
    pub weighted_score: f64,
}

/// A cross-provider group of similar claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimGroup {
    /// `(provider, claim text)` members.
    pub members: Vec<(String, String)>,
    pub corroborated: bool,
    pub contradicted: bool,
    pub best_tier: SourceTier,
}

/// Result of cross-validating all providers' claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CrossValidation {
    pub groups: Vec<ClaimGroup>,
    pub corroborated: usize,
    pub contradicted: usize,
}

/// Tuning knobs; the similarity threshold is deliberately configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// Stem-overlap Jaccard at or above which two claims share a group.
    pub similarity_threshold: f64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.35,
        }
    }
}

/// Vote-score multiplier applied per ranked provider in strict mode.
#[must_use]
pub fn strict_vote_factor(weighted_score: f64) -> f64 {
    0.5 + 0.5 * weighted_score.clamp(0.0, 1.0)
}

/// Split into sentences. A boundary is `.`/`!`/`?` outside parentheses,
/// followed by whitespace and an uppercase letter (or end of text); this
/// keeps abbreviations like "U.S.C." and parenthesized citations intact.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    for (pos, &(offset, c)) in bytes.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' | '!' | '?' | '\n' if depth == 0 => {
                let rest = bytes[pos + 1..]
                    .iter()
                    .map(|&(_, c)| c)
                    .find(|c| !c.is_whitespace());
                let boundary = match rest {
                    None => true,
                    Some(next) => c == '\n' || next.is_uppercase(),
                };
                if boundary {
                    let end = offset + c.len_utf8();
                    let sentence = text[start..end].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = end;
                }
            }
            _ => {}
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^()]{3,120})\)").unwrap_or_else(|_| Regex::new("$^").unwrap()))
}

fn attribution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:according to|source:|per)\s+([^,.:]{2,80})")
            .unwrap_or_else(|_| Regex::new("$^").unwrap())
    })
}

/// Classify a source string into a tier by lexical markers.
fn classify(source: &str) -> SourceTier {
    let s = source.to_lowercase();
    if s.contains("u.s.c") || s.contains('§') || s.contains(" v. ") || s.contains("statute")
        || s.contains("cfr") || s.contains("const.")
    {
        SourceTier::A
    } else if s.contains(".gov") || s.contains("journal") || s.contains("doi")
        || s.contains("court") || s.contains("official")
    {
        SourceTier::B
    } else if s.contains("news") || s.contains("report") || s.contains("times")
        || s.contains("reuters")
    {
        SourceTier::C
    } else if s.contains("blog") || s.contains("wiki") || s.contains("forum")
        || s.contains("reddit")
    {
        SourceTier::D
    } else {
        // Sourced but unrecognized publishers sit mid-tier.
        SourceTier::C
    }
}

/// Extract claims and score one response.
#[must_use]
pub fn score_response(provider: &str, text: &str) -> ProviderEvidence {
    let mut claims = Vec::new();
    for sentence in split_sentences(text) {
        // Declarative sentences only; questions and fragments are not claims.
        if sentence.ends_with('?') || sentence.split_whitespace().count() < 4 {
            continue;
        }
        let source = citation_re()
            .captures(sentence)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .or_else(|| {
                attribution_re()
                    .captures(sentence)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
            });
        let tier = source.as_deref().map_or(SourceTier::F, classify);
        claims.push(Claim {
            text: sentence.to_string(),
            source,
            tier,
        });
    }

    let total = claims.len();
    let supported = claims.iter().filter(|c| c.source.is_some()).count();
    let weighted: f64 = claims.iter().map(|c| c.tier.weight()).sum();
    ProviderEvidence {
        provider: provider.to_string(),
        claims,
        evidence_score: if total == 0 {
            0.0
        } else {
            supported as f64 / total as f64
        },
        weighted_score: if total == 0 { 0.0 } else { weighted / total as f64 },
    }
}

const NEGATION_TOKENS: &[&str] = &[
    "not", "no", "never", "cannot", "false", "isn't", "aren't", "won't", "doesn't", "without",
];

fn stems(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(|w| {
            // Crude suffix stripping keeps morphological variants together.
            let w = w.strip_suffix("ing").unwrap_or(w);
            let w = w.strip_suffix("ed").unwrap_or(w);
            let w = w.strip_suffix('s').unwrap_or(w);
            w.to_string()
        })
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn negative_polarity(text: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| NEGATION_TOKENS.contains(w))
        .count()
        % 2
        == 1
}

/// Group similar claims across providers and mark corroboration and
/// contradiction. A group is corroborated when shared by at least two
/// providers and contradicted when member polarities disagree.
#[must_use]
pub fn cross_validate(evidences: &[ProviderEvidence], config: &EvidenceConfig) -> CrossValidation {
    struct Group {
        representative: BTreeSet<String>,
        members: Vec<(String, String, SourceTier, bool)>,
    }
    let mut groups: Vec<Group> = Vec::new();

    for evidence in evidences {
        for claim in &evidence.claims {
            let claim_stems = stems(&claim.text);
            if claim_stems.is_empty() {
                continue;
            }
            let polarity = negative_polarity(&claim.text);
            let member = (
                evidence.provider.clone(),
                claim.text.clone(),
                claim.tier,
                polarity,
            );
            match groups
                .iter_mut()
                .find(|g| jaccard(&g.representative, &claim_stems) >= config.similarity_threshold)
            {
                Some(group) => group.members.push(member),
                None => groups.push(Group {
                    representative: claim_stems,
                    members: vec![member],
                }),
            }
        }
    }

    let mut out = CrossValidation::default();
    for group in groups {
        let providers: BTreeSet<&str> =
            group.members.iter().map(|(p, _, _, _)| p.as_str()).collect();
        let corroborated = providers.len() >= 2;
        let contradicted = group.members.iter().any(|(_, _, _, p)| *p)
            && group.members.iter().any(|(_, _, _, p)| !*p);
        let best_tier = group
            .members
            .iter()
            .map(|(_, _, tier, _)| *tier)
            .min()
            .unwrap_or(SourceTier::F);
        if corroborated {
            out.corroborated += 1;
        }
        if contradicted {
            out.contradicted += 1;
        }
        out.groups.push(ClaimGroup {
            members: group
                .members
                .into_iter()
                .map(|(p, t, _, _)| (p, t))
                .collect(),
            corroborated,
            contradicted,
            best_tier,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_and_tiers_extracted() {
        let text = "The statute of limitations is three years (28 U.S.C. § 1658). \
                    Filing later is still possible in equity. \
                    Is that always true? \
                    According to the Federal Register, agencies may extend deadlines.";
        let evidence = score_response("gpt", text);
        assert_eq!(evidence.claims.len(), 3); // question excluded
        assert_eq!(evidence.claims[0].tier, SourceTier::A);
        assert_eq!(evidence.claims[1].tier, SourceTier::F);
        assert!(evidence.claims[2].source.as_deref().unwrap().contains("Federal Register"));
        assert!((evidence.evidence_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_score_uses_tier_weights() {
        let text = "Alpha holds under the statute (29 U.S.C. § 201). \
                    Beta was reported widely (Reuters news desk).";
        let evidence = score_response("gpt", text);
        assert_eq!(evidence.claims.len(), 2);
        assert!((evidence.weighted_score - (1.0 + 0.6) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_response_scores_zero() {
        let evidence = score_response("gpt", "Short. No?");
        assert_eq!(evidence.claims.len(), 0);
        assert_eq!(evidence.evidence_score, 0.0);
        assert_eq!(evidence.weighted_score, 0.0);
    }

    #[test]
    fn test_cross_validation_corroborates_shared_claims() {
        let a = score_response("gpt", "The deadline for filing the claim is three years under current rules.");
        let b = score_response(
            "claude",
            "Under the current rules the filing deadline for a claim is three years.",
        );
        let result = cross_validate(&[a, b], &EvidenceConfig::default());
        assert_eq!(result.corroborated, 1);
        assert!(result.groups[0].corroborated);
    }

    #[test]
    fn test_cross_validation_detects_contradiction() {
        let a = score_response("gpt", "The remedy period is not extended under the current filing rules.");
        let b = score_response("claude", "The remedy period is extended under the current filing rules.");
        let result = cross_validate(&[a, b], &EvidenceConfig::default());
        assert_eq!(result.contradicted, 1);
    }

    #[test]
    fn test_best_tier_is_group_minimum() {
        let a = score_response(
            "gpt",
            "According to the circuit court, the holding controls here today.",
        );
        let b = score_response(
            "claude",
            "The holding controls here per the circuit court opinion today (blog post).",
        );
        let result = cross_validate(&[a, b], &EvidenceConfig::default());
        assert_eq!(result.groups.len(), 1);
        // Court attribution outranks the blog citation.
        assert_eq!(result.groups[0].best_tier, SourceTier::B);
    }

    #[test]
    fn test_strict_factor_range() {
        assert_eq!(strict_vote_factor(0.0), 0.5);
        assert_eq!(strict_vote_factor(1.0), 1.0);
        assert_eq!(strict_vote_factor(5.0), 1.0);
    }
}
