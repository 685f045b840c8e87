use async_trait::async_trait;

use crate::llm::EmbeddingClient;

/// Pluggable relevance policy consulted by the pipeline before a candidate
/// result is fetched. Policies err on the side of keeping a candidate.
#[async_trait]
pub trait RelevancePolicy: Send + Sync {
    async fn is_relevant(&self, text: &str, goal: &str) -> bool;
}

/// Default policy: keep a candidate when it shares at least one substantial
/// keyword with the goal. Goals with no substantial keywords keep everything.
pub struct KeywordRelevance {
    min_keyword_len: usize,
}

impl Default for KeywordRelevance {
    fn default() -> Self {
        Self { min_keyword_len: 4 }
    }
}

#[async_trait]
impl RelevancePolicy for KeywordRelevance {
    async fn is_relevant(&self, text: &str, goal: &str) -> bool {
        let text = text.to_lowercase();
        let goal = goal.to_lowercase();
        let keywords: Vec<&str> = goal
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= self.min_keyword_len)
            .collect();

        if keywords.is_empty() {
            return true;
        }
        keywords.iter().any(|keyword| text.contains(keyword))
    }
}

/// Embedding-backed policy: cosine similarity against the goal. When either
/// embedding comes back empty (capability unavailable or failing) the policy
/// allows everything rather than starving the pipeline.
pub struct EmbeddingRelevance<E> {
    embeddings: E,
    threshold: f32,
}

const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

impl<E> EmbeddingRelevance<E> {
    pub fn new(embeddings: E) -> Self {
        Self {
            embeddings,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[async_trait]
impl<E: EmbeddingClient> RelevancePolicy for EmbeddingRelevance<E> {
    async fn is_relevant(&self, text: &str, goal: &str) -> bool {
        let text_vec = self.embeddings.embed(text).await;
        let goal_vec = self.embeddings.embed(goal).await;
        if text_vec.is_empty() || goal_vec.is_empty() {
            return true;
        }
        cosine_similarity(&text_vec, &goal_vec) >= self.threshold
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyword_policy_matches_shared_terms() {
        let policy = KeywordRelevance::default();
        assert!(
            policy
                .is_relevant("Groundwater depletion in arid basins", "groundwater levels")
                .await
        );
        assert!(
            !policy
                .is_relevant("Celebrity gossip roundup", "groundwater levels")
                .await
        );
    }

    #[tokio::test]
    async fn keyword_policy_allows_all_for_vague_goals() {
        let policy = KeywordRelevance::default();
        // No token of length >= 4 in the goal.
        assert!(policy.is_relevant("anything at all", "why is it").await);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_guards_against_zero_and_mismatched_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    struct FixedEmbeddings {
        vector: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbeddings {
        async fn embed(&self, _text: &str) -> Vec<f32> {
            self.vector.clone()
        }
    }

    #[tokio::test]
    async fn embedding_policy_allows_all_when_capability_fails() {
        let policy = EmbeddingRelevance::new(FixedEmbeddings { vector: Vec::new() });
        assert!(policy.is_relevant("totally unrelated", "the goal").await);
    }

    #[tokio::test]
    async fn embedding_policy_accepts_similar_vectors() {
        let policy = EmbeddingRelevance::new(FixedEmbeddings {
            vector: vec![0.3, 0.7, 0.1],
        });
        // Identical embeddings for text and goal: similarity 1.0.
        assert!(policy.is_relevant("text", "goal").await);
    }
}
