// Maximal-marginal-relevance re-ranking of the chunks the store returned

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Greedy maximal marginal relevance selection.
///
/// Each step picks the candidate maximising
/// `lambda * sim(query, c) - (1 - lambda) * max(sim(c, already_selected))`,
/// so `lambda = 1` is plain similarity ranking and `lambda = 0` maximises
/// diversity. Returns indices into `candidates` in selection order.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[&[f32]],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best: Option<(usize, f32)> = None;
        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(candidates[idx], candidates[s]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((pos, score));
            }
        }
        match best {
            Some((pos, _)) => selected.push(remaining.remove(pos)),
            None => break,
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_mmr_skips_near_duplicates() {
        let query = [1.0, 0.0, 0.0];
        let best = [0.95, 0.312, 0.0];
        let duplicate = [0.94, 0.34, 0.0];
        let different = [0.8, -0.3, 0.52];
        let picked = maximal_marginal_relevance(&query, &[&best[..], &duplicate[..], &different[..]], 2, 0.5);
        assert_eq!(picked, vec![0, 2]);
    }

    #[test]
    fn test_mmr_with_lambda_one_is_similarity_order() {
        let query = [1.0, 0.0, 0.0];
        let best = [0.95, 0.312, 0.0];
        let duplicate = [0.94, 0.34, 0.0];
        let different = [0.8, -0.3, 0.52];
        let picked = maximal_marginal_relevance(&query, &[&best[..], &duplicate[..], &different[..]], 2, 1.0);
        assert_eq!(picked, vec![0, 1]);
    }

    #[test]
    fn test_mmr_never_returns_more_than_available() {
        let query = [1.0, 0.0];
        let only = [1.0, 0.0];
        assert_eq!(maximal_marginal_relevance(&query, &[&only[..]], 5, 0.5), vec![0]);
    }
}
