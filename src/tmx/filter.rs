use serde::Serialize;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::CleanError;

use super::extract::AlignedUnit;
use super::report::{round_score, RemovalReason, RemovalRecord};

/// Minimum cosine similarity a source/target pair needs to stay. Always within [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
pub struct SimilarityThreshold(f32);

impl SimilarityThreshold {
    pub const DEFAULT: f32 = 0.6;

    pub fn new(value: f32) -> Result<Self, CleanError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(CleanError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for SimilarityThreshold {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
    pub retained: Vec<AlignedUnit>,
    pub removals: Vec<RemovalRecord>,
    /// Unrounded score per input unit, index-aligned with the filter's input.
    pub scores: Vec<f32>,
}

/// Drops pairs whose source and target embeddings are less similar than `threshold`.
///
/// Sources and targets are embedded in one batch each. A score equal to the threshold keeps the
/// pair. Either every unit gets a decision or the call fails.
pub fn filter<E: Embedder + ?Sized>(
    retained: Vec<AlignedUnit>,
    threshold: SimilarityThreshold,
    embedder: &E,
) -> Result<FilterOutcome, CleanError> {
    if retained.is_empty() {
        return Ok(FilterOutcome {
            retained,
            ..FilterOutcome::default()
        });
    }

    let sources: Vec<String> = retained.iter().map(|u| u.source.trim().to_string()).collect();
    let targets: Vec<String> = retained.iter().map(|u| u.target.trim().to_string()).collect();

    let source_vecs = embed_checked(embedder, &sources, "source")?;
    let target_vecs = embed_checked(embedder, &targets, "target")?;

    let mut scores = Vec::with_capacity(retained.len());
    for (i, (s, t)) in source_vecs.iter().zip(target_vecs.iter()).enumerate() {
        if s.len() != t.len() {
            return Err(CleanError::EmbeddingContract(format!(
                "unit {i}: source vector has {} dimensions, target vector has {}",
                s.len(),
                t.len()
            )));
        }
        scores.push(cosine_similarity(s, t));
    }

    let mut removals = Vec::new();
    let mut kept = Vec::with_capacity(retained.len());
    for (unit, score) in retained.into_iter().zip(scores.iter().copied()) {
        if score < threshold.value() {
            removals.push(RemovalRecord {
                unit_index: unit.index,
                unit_id: unit.id.clone(),
                source: Some(unit.key().to_string()),
                reason: RemovalReason::LowSimilarity,
                score: Some(round_score(score)),
            });
        } else {
            kept.push(unit);
        }
    }

    Ok(FilterOutcome {
        retained: kept,
        removals,
        scores,
    })
}

fn embed_checked<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[String],
    side: &str,
) -> Result<Vec<Vec<f32>>, CleanError> {
    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(CleanError::EmbeddingContract(format!(
            "{side} batch: expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::EmbedError;

    /// Maps known texts to fixed vectors; unknown texts embed to the zero vector.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, [f32; 2])]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Embedder for TableEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![0.0, 0.0]))
                .collect())
        }
    }

    struct Offline;

    impl Embedder for Offline {
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Unavailable("model file missing".into()))
        }
    }

    struct Short;

    impl Embedder for Short {
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(vec![vec![1.0]])
        }
    }

    fn aligned(index: usize, source: &str, target: &str) -> AlignedUnit {
        AlignedUnit {
            index,
            id: Some(index.to_string()),
            source_lang: None,
            target_lang: None,
            source: source.to_string(),
            target: target.to_string(),
        }
    }

    #[test]
    fn threshold_rejects_out_of_range_values() {
        assert!(SimilarityThreshold::new(0.0).is_ok());
        assert!(SimilarityThreshold::new(1.0).is_ok());
        assert!(matches!(
            SimilarityThreshold::new(1.5),
            Err(CleanError::InvalidThreshold(v)) if v == 1.5
        ));
        assert!(SimilarityThreshold::new(-0.1).is_err());
        assert!(SimilarityThreshold::new(f32::NAN).is_err());
        assert_eq!(SimilarityThreshold::default().value(), 0.6);
    }

    #[test]
    fn empty_input_skips_the_embedder() {
        let embedder = TableEmbedder::new(&[]);
        let out = filter(Vec::new(), SimilarityThreshold::default(), &embedder).expect("filter");
        assert!(out.retained.is_empty());
        assert!(out.removals.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn embeds_sources_and_targets_in_two_batches() {
        let embedder = TableEmbedder::new(&[("a", [1.0, 0.0]), ("b", [1.0, 0.0])]);
        let units = (0..50).map(|i| aligned(i, "a", "b")).collect();
        let out = filter(units, SimilarityThreshold::default(), &embedder).expect("filter");
        assert_eq!(out.retained.len(), 50);
        assert_eq!(embedder.calls(), 2);
    }

    #[test]
    fn score_equal_to_threshold_is_kept() {
        // cos([1, 0], [3, 4]) = 3 / 5 exactly.
        let embedder = TableEmbedder::new(&[("src", [1.0, 0.0]), ("tgt", [3.0, 4.0])]);
        let at = SimilarityThreshold::new(0.6).expect("threshold");
        let out = filter(vec![aligned(0, "src", "tgt")], at, &embedder).expect("filter");
        assert_eq!(out.retained.len(), 1);
        assert_eq!(out.scores, vec![0.6]);

        let above = SimilarityThreshold::new(0.600_001).expect("threshold");
        let out = filter(vec![aligned(0, "src", "tgt")], above, &embedder).expect("filter");
        assert!(out.retained.is_empty());
        assert_eq!(out.removals[0].score, Some(0.6));
    }

    #[test]
    fn low_similarity_pairs_are_removed_in_order() {
        let embedder = TableEmbedder::new(&[
            ("Hello", [1.0, 0.0]),
            ("Bonjour", [0.9, 0.435_889_9]),
            ("Goodbye", [1.0, 0.0]),
            ("Au revoir", [0.3, 0.953_939_2]),
            ("Yes", [0.0, 1.0]),
            ("Oui", [0.0, 2.0]),
        ]);
        let units = vec![
            aligned(0, "Hello", "Bonjour"),
            aligned(2, " Goodbye ", "Au revoir"),
            aligned(5, "Yes", "Oui"),
        ];
        let t = SimilarityThreshold::new(0.5).expect("threshold");
        let out = filter(units, t, &embedder).expect("filter");
        let kept: Vec<usize> = out.retained.iter().map(|u| u.index).collect();
        assert_eq!(kept, vec![0, 5]);
        assert_eq!(out.removals.len(), 1);
        assert_eq!(out.removals[0].unit_index, 2);
        assert_eq!(out.removals[0].source.as_deref(), Some("Goodbye"));
        assert_eq!(out.removals[0].score, Some(0.3));
    }

    #[test]
    fn zero_vectors_score_zero_and_are_dropped() {
        let embedder = TableEmbedder::new(&[("Hello", [1.0, 0.0])]);
        let t = SimilarityThreshold::new(0.1).expect("threshold");
        let out = filter(vec![aligned(0, "Hello", "")], t, &embedder).expect("filter");
        assert!(out.retained.is_empty());
        assert_eq!(out.removals[0].score, Some(0.0));
    }

    #[test]
    fn embedder_failures_fail_the_whole_call() {
        let err = filter(vec![aligned(0, "a", "b")], SimilarityThreshold::default(), &Offline)
            .err()
            .expect("error");
        assert!(matches!(err, CleanError::EmbeddingUnavailable(_)));

        let units = vec![aligned(0, "a", "b"), aligned(1, "c", "d")];
        let err = filter(units, SimilarityThreshold::default(), &Short)
            .err()
            .expect("error");
        assert!(matches!(err, CleanError::EmbeddingContract(_)));
    }
}
