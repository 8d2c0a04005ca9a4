//! Model adapter registry.
//!
//! Static lookup from a model identifier to the attention pattern its family
//! uses and the compression threshold that works well for it. The table is
//! read-only process-wide configuration; lookup is total and never fails —
//! unrecognized identifiers fall back to a causal default.

use serde::Serialize;

/// How a model family's attention attends over the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttentionKind {
    Causal,
    Bidirectional,
    SlidingWindow,
    Sparse,
}

impl std::fmt::Display for AttentionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionKind::Causal => write!(f, "causal"),
            AttentionKind::Bidirectional => write!(f, "bidirectional"),
            AttentionKind::SlidingWindow => write!(f, "sliding-window"),
            AttentionKind::Sparse => write!(f, "sparse"),
        }
    }
}

/// Attention pattern and compression recommendation for one model family.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelAttentionPattern {
    /// Family substring matched against the model identifier.
    pub model_family: &'static str,

    pub attention: AttentionKind,

    /// Window length for sliding-window attention.
    pub window_size: Option<usize>,

    /// Named sparsity layout for sparse attention.
    pub sparsity_pattern: Option<&'static str>,

    /// Attention-mass threshold that keeps quality acceptable for this
    /// family, in (0, 1].
    pub recommended_threshold: f64,
}

/// Fallback for unknown identifiers: causal attention, threshold 0.90.
pub const DEFAULT_PATTERN: ModelAttentionPattern = ModelAttentionPattern {
    model_family: "default",
    attention: AttentionKind::Causal,
    window_size: None,
    sparsity_pattern: None,
    recommended_threshold: 0.90,
};

const PATTERNS: &[ModelAttentionPattern] = &[
    ModelAttentionPattern {
        model_family: "llama",
        attention: AttentionKind::Causal,
        window_size: None,
        sparsity_pattern: None,
        recommended_threshold: 0.90,
    },
    ModelAttentionPattern {
        model_family: "mistral",
        attention: AttentionKind::SlidingWindow,
        window_size: Some(4096),
        sparsity_pattern: None,
        recommended_threshold: 0.92,
    },
    ModelAttentionPattern {
        model_family: "qwen",
        attention: AttentionKind::Causal,
        window_size: None,
        sparsity_pattern: None,
        recommended_threshold: 0.90,
    },
    ModelAttentionPattern {
        model_family: "phi",
        attention: AttentionKind::Causal,
        window_size: None,
        sparsity_pattern: None,
        recommended_threshold: 0.88,
    },
    ModelAttentionPattern {
        model_family: "gpt",
        attention: AttentionKind::Causal,
        window_size: None,
        sparsity_pattern: None,
        recommended_threshold: 0.90,
    },
    ModelAttentionPattern {
        model_family: "longformer",
        attention: AttentionKind::Sparse,
        window_size: Some(512),
        sparsity_pattern: Some("global-window"),
        recommended_threshold: 0.95,
    },
    ModelAttentionPattern {
        model_family: "bigbird",
        attention: AttentionKind::Sparse,
        window_size: None,
        sparsity_pattern: Some("block-random"),
        recommended_threshold: 0.95,
    },
    ModelAttentionPattern {
        model_family: "roberta",
        attention: AttentionKind::Bidirectional,
        window_size: None,
        sparsity_pattern: None,
        recommended_threshold: 0.85,
    },
    ModelAttentionPattern {
        model_family: "bert",
        attention: AttentionKind::Bidirectional,
        window_size: None,
        sparsity_pattern: None,
        recommended_threshold: 0.85,
    },
];

/// Look up the attention pattern for a model identifier.
///
/// Matching is case-insensitive on family substrings ("Llama-3-70B-Instruct"
/// matches "llama"). More specific families are listed before their prefixes
/// ("roberta" before "bert"), first match wins. Unknown identifiers get
/// [`DEFAULT_PATTERN`].
pub fn lookup(model_id: &str) -> ModelAttentionPattern {
    let lowered = model_id.to_lowercase();
    PATTERNS
        .iter()
        .find(|p| lowered.contains(p.model_family))
        .copied()
        .unwrap_or(DEFAULT_PATTERN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_families() {
        assert_eq!(lookup("meta-llama/Llama-3-70B").attention, AttentionKind::Causal);
        assert_eq!(
            lookup("mistralai/Mistral-7B-v0.3").attention,
            AttentionKind::SlidingWindow
        );
        assert_eq!(lookup("mistral-7b").window_size, Some(4096));
        assert_eq!(
            lookup("google-bert/bert-base-uncased").attention,
            AttentionKind::Bidirectional
        );
        assert_eq!(
            lookup("bigbird-roberta-large").sparsity_pattern,
            Some("block-random")
        );
    }

    #[test]
    fn test_first_match_wins_in_listed_order() {
        // "roberta" contains "bert" as a substring; the table lists roberta
        // before bert so RoBERTa models do not resolve to plain BERT.
        let pattern = lookup("FacebookAI/roberta-base");
        assert_eq!(pattern.model_family, "roberta");
    }

    #[test]
    fn test_unknown_model_falls_back_to_default() {
        let pattern = lookup("totally-novel-architecture-9000");
        assert_eq!(pattern.model_family, "default");
        assert_eq!(pattern.attention, AttentionKind::Causal);
        assert_eq!(pattern.recommended_threshold, 0.90);
    }

    #[test]
    fn test_lookup_never_panics_on_odd_input() {
        for id in ["", " ", "💥", "GPT-4", "LLAMA"] {
            let pattern = lookup(id);
            assert!(pattern.recommended_threshold > 0.0 && pattern.recommended_threshold <= 1.0);
        }
    }

    #[test]
    fn test_thresholds_are_valid_for_every_entry() {
        for pattern in PATTERNS {
            assert!(
                pattern.recommended_threshold > 0.0 && pattern.recommended_threshold <= 1.0,
                "bad threshold for {}",
                pattern.model_family
            );
        }
    }
}
