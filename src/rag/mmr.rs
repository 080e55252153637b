//! Maximal Marginal Relevance re-ranking.
//!
//! MMR = λ × relevance(query, doc) - (1-λ) × max(similarity(doc, selected))
//!
//! λ = 1.0: pure relevance, λ = 0.0: pure diversity.

use crate::vector_math::{cosine_similarity, l2_norm};

/// Candidate for MMR re-ranking.
#[derive(Debug, Clone)]
pub struct MmrCandidate {
    /// Position in the caller's candidate list.
    pub index: usize,
    /// Relevance to the query under the collection's metric.
    pub relevance: f32,
    pub vector: Vec<f32>,
}

/// Re-ranks `candidates` (sorted by relevance, highest first) and returns up to
/// `k` candidate indices in selection order.
///
/// The first pick is always the most relevant candidate.
pub fn mmr_rerank(candidates: &[MmrCandidate], k: usize, lambda: f32) -> Vec<usize> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let lambda = lambda.clamp(0.0, 1.0);
    let k = k.min(candidates.len());
    let norms: Vec<f32> = candidates.iter().map(|c| l2_norm(&c.vector)).collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (1..candidates.len()).collect();
    selected.push(0);

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let max_similarity = selected
                .iter()
                .map(|&chosen| redundancy(candidates, &norms, idx, chosen))
                .fold(f32::NEG_INFINITY, f32::max);
            let score =
                lambda * candidates[idx].relevance - (1.0 - lambda) * max_similarity;

            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
        .into_iter()
        .map(|idx| candidates[idx].index)
        .collect()
}

fn redundancy(candidates: &[MmrCandidate], norms: &[f32], left: usize, right: usize) -> f32 {
    if norms[left] <= f32::EPSILON || norms[right] <= f32::EPSILON {
        return 0.0;
    }
    cosine_similarity(&candidates[left].vector, &candidates[right].vector).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: usize, relevance: f32, vector: Vec<f32>) -> MmrCandidate {
        MmrCandidate {
            index,
            relevance,
            vector,
        }
    }

    #[test]
    fn empty_inputs_return_nothing() {
        assert!(mmr_rerank(&[], 3, 0.5).is_empty());
        assert!(mmr_rerank(&[candidate(0, 1.0, vec![1.0])], 0, 0.5).is_empty());
    }

    #[test]
    fn first_pick_is_most_relevant_even_for_pure_diversity() {
        let candidates = vec![
            candidate(7, 0.9, vec![1.0, 0.0]),
            candidate(3, 0.8, vec![0.0, 1.0]),
        ];
        let picked = mmr_rerank(&candidates, 1, 0.0);
        assert_eq!(picked, vec![7]);
    }

    #[test]
    fn penalizes_near_duplicates() {
        let candidates = vec![
            candidate(0, 0.95, vec![1.0, 0.0, 0.0]),
            candidate(1, 0.94, vec![0.99, 0.01, 0.0]),
            candidate(2, 0.60, vec![0.0, 1.0, 0.0]),
        ];

        let picked = mmr_rerank(&candidates, 2, 0.5);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn lambda_one_keeps_relevance_order() {
        let candidates = vec![
            candidate(0, 0.95, vec![1.0, 0.0]),
            candidate(1, 0.94, vec![1.0, 0.0]),
            candidate(2, 0.10, vec![0.0, 1.0]),
        ];

        let picked = mmr_rerank(&candidates, 3, 1.0);
        assert_eq!(picked, vec![0, 1, 2]);
    }
}
