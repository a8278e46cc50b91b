//! 하이브리드 검색 - 벡터 + BM25 점수 통합
//!
//! 두 인덱스의 결과를 각각 top_k * fetch_factor 만큼 가져온 뒤
//! 가중 합으로 하나의 순위를 만듭니다.
//!
//! - `MinMax`: 리스트별 min-max 정규화 후 가중 합 (기본값)
//! - `ReciprocalRank`: 순위 기반 RRF 가중 합
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

use super::lexical::LexicalIndex;
use super::types::ChunkId;
use super::vector::{ScoredChunk, VectorIndex};

/// 가중치 합 허용 오차
const WEIGHT_TOLERANCE: f32 = 1e-6;

// ============================================================================
// Types
// ============================================================================

/// 벡터/키워드 가중치 (합이 1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    vector: f32,
    lexical: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.5,
            lexical: 0.5,
        }
    }
}

impl FusionWeights {
    pub fn new(vector: f32, lexical: f32) -> Result<Self> {
        let weights = Self { vector, lexical };
        weights.validate()?;
        Ok(weights)
    }

    /// 벡터 가중치만 지정 (키워드 = 1 - vector)
    pub fn from_vector_weight(vector: f32) -> Result<Self> {
        Self::new(vector, 1.0 - vector)
    }

    pub fn vector_only() -> Self {
        Self {
            vector: 1.0,
            lexical: 0.0,
        }
    }

    pub fn lexical_only() -> Self {
        Self {
            vector: 0.0,
            lexical: 1.0,
        }
    }

    pub fn vector(&self) -> f32 {
        self.vector
    }

    pub fn lexical(&self) -> f32 {
        self.lexical
    }

    pub fn validate(&self) -> Result<()> {
        for (name, w) in [("vector", self.vector), ("lexical", self.lexical)] {
            if !(0.0..=1.0).contains(&w) {
                return Err(RetrievalError::input(format!(
                    "{} weight must be within [0, 1], got {}",
                    name, w
                )));
            }
        }
        if (self.vector + self.lexical - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(RetrievalError::input(format!(
                "fusion weights must sum to 1, got {} + {}",
                self.vector, self.lexical
            )));
        }
        Ok(())
    }
}

/// 점수 통합 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FusionStrategy {
    /// 리스트별 min-max 정규화 후 가중 합
    #[default]
    MinMax,
    /// RRF: w / (k + rank)
    ReciprocalRank { k: f32 },
}

/// 하이브리드 검색 설정
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// 리스트별 추가 조회 배수
    pub fetch_factor: usize,
    pub strategy: FusionStrategy,
    /// CLI/기본 hybrid 가중치
    pub weights: FusionWeights,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            fetch_factor: 3,
            strategy: FusionStrategy::default(),
            weights: FusionWeights::default(),
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_factor == 0 {
            return Err(RetrievalError::input("fetch_factor must be at least 1"));
        }
        if let FusionStrategy::ReciprocalRank { k } = self.strategy {
            if !k.is_finite() || k < 0.0 {
                return Err(RetrievalError::input(format!("rrf k must be >= 0, got {}", k)));
            }
        }
        self.weights.validate()
    }
}

/// 결과가 어느 검색에서 나왔는지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    /// 벡터 검색만
    Vector,
    /// BM25 키워드 검색만
    Lexical,
    /// 양쪽 모두
    Hybrid,
}

impl std::fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMethod::Vector => write!(f, "vector"),
            SearchMethod::Lexical => write!(f, "lexical"),
            SearchMethod::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// 통합 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    pub chunk_id: ChunkId,
    /// 통합 점수 (높을수록 좋음)
    pub score: f32,
    pub method: SearchMethod,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 같은 청크 집합으로 만든 두 인덱스를 빌려서 사용합니다.
pub struct HybridRetriever<'a> {
    vector: &'a VectorIndex,
    lexical: &'a LexicalIndex,
    fetch_factor: usize,
    strategy: FusionStrategy,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(vector: &'a VectorIndex, lexical: &'a LexicalIndex, config: &FusionConfig) -> Self {
        Self {
            vector,
            lexical,
            fetch_factor: config.fetch_factor.max(1),
            strategy: config.strategy,
        }
    }

    /// 하이브리드 검색
    ///
    /// 가중치가 0인 쪽은 조회하지 않으므로 `query_vector`는
    /// 벡터 가중치가 0보다 클 때만 필요합니다.
    pub fn query(
        &self,
        query_vector: Option<&[f32]>,
        text: &str,
        top_k: usize,
        weights: FusionWeights,
    ) -> Result<Vec<FusedHit>> {
        weights.validate()?;
        let fetch_k = top_k.saturating_mul(self.fetch_factor);

        let vector_hits = if weights.vector > 0.0 {
            let query_vector = query_vector.ok_or_else(|| {
                RetrievalError::input("hybrid query with a vector weight needs a query vector")
            })?;
            self.vector.query(query_vector, fetch_k)?
        } else {
            vec![]
        };

        let lexical_hits = if weights.lexical > 0.0 {
            self.lexical.query(text, fetch_k)
        } else {
            vec![]
        };

        tracing::debug!(
            "Fusing {} vector + {} lexical candidates",
            vector_hits.len(),
            lexical_hits.len()
        );

        Ok(fuse(&vector_hits, &lexical_hits, weights, self.strategy, top_k))
    }
}

/// 후보별 중간 점수
#[derive(Default)]
struct Candidate {
    vector: Option<f64>,
    lexical: Option<f64>,
}

/// 두 랭킹 리스트 통합
///
/// 통합 점수 내림차순, 동점이면 키워드 점수 내림차순, 그다음 청크 ID 오름차순.
pub fn fuse(
    vector_hits: &[ScoredChunk],
    lexical_hits: &[ScoredChunk],
    weights: FusionWeights,
    strategy: FusionStrategy,
    top_k: usize,
) -> Vec<FusedHit> {
    let (vector_scores, lexical_scores) = match strategy {
        FusionStrategy::MinMax => (min_max(vector_hits), min_max(lexical_hits)),
        FusionStrategy::ReciprocalRank { k } => {
            (reciprocal_rank(vector_hits, k), reciprocal_rank(lexical_hits, k))
        }
    };

    let mut candidates: BTreeMap<ChunkId, Candidate> = BTreeMap::new();
    for (id, score) in vector_scores {
        candidates.entry(id).or_default().vector = Some(score);
    }
    for (id, score) in lexical_scores {
        candidates.entry(id).or_default().lexical = Some(score);
    }

    let w_v = weights.vector as f64;
    let w_l = weights.lexical as f64;

    let mut fused: Vec<(ChunkId, f64, f64, SearchMethod)> = candidates
        .into_iter()
        .map(|(id, c)| {
            let v = c.vector.unwrap_or(0.0);
            let l = c.lexical.unwrap_or(0.0);
            let method = match (c.vector.is_some(), c.lexical.is_some()) {
                (true, true) => SearchMethod::Hybrid,
                (true, false) => SearchMethod::Vector,
                _ => SearchMethod::Lexical,
            };
            (id, w_v * v + w_l * l, l, method)
        })
        .collect();

    fused.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then_with(|| b.2.total_cmp(&a.2))
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(top_k);

    fused
        .into_iter()
        .map(|(chunk_id, score, _, method)| FusedHit {
            chunk_id,
            score: score as f32,
            method,
        })
        .collect()
}

/// min-max 정규화 (후보가 하나이거나 범위가 0이면 1.0)
fn min_max(hits: &[ScoredChunk]) -> Vec<(ChunkId, f64)> {
    let finite = hits
        .iter()
        .map(|h| h.score as f64)
        .filter(|s| s.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
        (lo.min(s), hi.max(s))
    });
    let range = max - min;

    hits.iter()
        .map(|h| {
            let s = h.score as f64;
            let normalized = if !s.is_finite() {
                0.0
            } else if range > 0.0 {
                (s - min) / range
            } else {
                1.0
            };
            (h.chunk_id, normalized)
        })
        .collect()
}

/// RRF 점수: 1 / (k + rank), rank는 1부터
fn reciprocal_rank(hits: &[ScoredChunk], k: f32) -> Vec<(ChunkId, f64)> {
    hits.iter()
        .enumerate()
        .map(|(rank, h)| (h.chunk_id, 1.0 / (k as f64 + rank as f64 + 1.0)))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::lexical::Bm25Params;
    use crate::knowledge::types::{Chunk, Metadata};
    use crate::knowledge::vector::Similarity;
    use proptest::prelude::*;

    fn hit(chunk_id: ChunkId, score: f32) -> ScoredChunk {
        ScoredChunk { chunk_id, score }
    }

    fn ids(hits: &[FusedHit]) -> Vec<ChunkId> {
        hits.iter().map(|h| h.chunk_id).collect()
    }

    #[test]
    fn test_weights_validation() {
        assert!(FusionWeights::new(0.3, 0.7).is_ok());
        assert!(FusionWeights::new(0.5, 0.6).is_err());
        assert!(FusionWeights::new(-0.5, 1.5).is_err());
        assert!(FusionWeights::from_vector_weight(0.25).is_ok());
        assert!(FusionWeights::from_vector_weight(1.5).is_err());
    }

    #[test]
    fn test_min_max_normalization() {
        let normalized = min_max(&[hit(1, 0.9), hit(2, 0.5), hit(3, 0.1)]);
        assert_eq!(normalized[0], (1, 1.0));
        assert!((normalized[1].1 - 0.5).abs() < 1e-6);
        assert_eq!(normalized[2], (3, 0.0));

        // 후보 하나 / 범위 0
        assert_eq!(min_max(&[hit(7, 0.2)]), vec![(7, 1.0)]);
        assert_eq!(min_max(&[hit(1, 3.0), hit(2, 3.0)]), vec![(1, 1.0), (2, 1.0)]);
    }

    #[test]
    fn test_rrf_score_calculation() {
        // RRF 스코어 공식 테스트: 1 / (k + rank)
        let scores = reciprocal_rank(&[hit(4, 0.9), hit(2, 0.8), hit(9, 0.1)], 60.0);

        // 1위: 1 / 61 ≈ 0.0164
        assert!((scores[0].1 - 0.0164).abs() < 0.001);
        // 순위가 높을수록 스코어가 높음
        assert!(scores[0].1 > scores[2].1);
    }

    #[test]
    fn test_fuse_combines_and_tags_method() {
        let vector = [hit(1, 0.9), hit(2, 0.1)];
        let lexical = [hit(2, 5.0), hit(3, 1.0)];
        let fused = fuse(&vector, &lexical, FusionWeights::default(), FusionStrategy::MinMax, 10);

        // 1: 0.5*1 = 0.5, 2: 0.5*0 + 0.5*1 = 0.5, 3: 0
        // 1과 2 동점 -> 키워드 점수가 높은 2가 먼저
        assert_eq!(ids(&fused), vec![2, 1, 3]);
        assert_eq!(fused[0].method, SearchMethod::Hybrid);
        assert_eq!(fused[1].method, SearchMethod::Vector);
        assert_eq!(fused[2].method, SearchMethod::Lexical);
    }

    #[test]
    fn test_fuse_truncates_to_top_k() {
        let vector = [hit(1, 0.9), hit(2, 0.5), hit(3, 0.1)];
        let fused = fuse(&vector, &[], FusionWeights::vector_only(), FusionStrategy::MinMax, 2);
        assert_eq!(ids(&fused), vec![1, 2]);
    }

    #[test]
    fn test_rrf_strategy() {
        let vector = [hit(1, 0.9), hit(2, 0.8)];
        let lexical = [hit(2, 3.0), hit(1, 1.0)];
        let fused = fuse(
            &vector,
            &lexical,
            FusionWeights::default(),
            FusionStrategy::ReciprocalRank { k: 60.0 },
            10,
        );
        // 점수 동일 -> 키워드 순위가 높은 2가 먼저
        assert_eq!(ids(&fused), vec![2, 1]);
        assert!((fused[0].score - fused[1].score).abs() < 1e-9);
    }

    fn chunk(id: ChunkId, text: &str) -> Chunk {
        Chunk {
            id,
            document_index: id as usize,
            sequence_index: 0,
            text: text.to_string(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_retriever_single_sided_weights() {
        let chunks = vec![
            chunk(0, "rust ownership"),
            chunk(1, "python typing"),
            chunk(2, "rust async runtime"),
        ];
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]];
        let vector = VectorIndex::build(chunks.clone(), vectors, 2, Similarity::Cosine).unwrap();
        let lexical = LexicalIndex::build(&chunks, Bm25Params::default()).unwrap();
        let retriever = HybridRetriever::new(&vector, &lexical, &FusionConfig::default());

        let q = [1.0, 0.1];
        let by_vector = retriever
            .query(Some(&q), "rust", 2, FusionWeights::vector_only())
            .unwrap();
        let raw_vector: Vec<ChunkId> =
            vector.query(&q, 2).unwrap().iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids(&by_vector), raw_vector);

        let by_lexical = retriever.query(None, "rust", 2, FusionWeights::lexical_only()).unwrap();
        let raw_lexical: Vec<ChunkId> =
            lexical.query("rust", 2).iter().map(|h| h.chunk_id).collect();
        assert_eq!(ids(&by_lexical), raw_lexical);
        assert!(by_lexical.iter().all(|h| h.method == SearchMethod::Lexical));
    }

    #[test]
    fn test_retriever_requires_query_vector() {
        let chunks = vec![chunk(0, "a")];
        let vector =
            VectorIndex::build(chunks.clone(), vec![vec![1.0]], 1, Similarity::Cosine).unwrap();
        let lexical = LexicalIndex::build(&chunks, Bm25Params::default()).unwrap();
        let retriever = HybridRetriever::new(&vector, &lexical, &FusionConfig::default());

        assert!(matches!(
            retriever.query(None, "a", 1, FusionWeights::default()),
            Err(RetrievalError::Input(_))
        ));
    }

    fn ranked_list() -> impl Strategy<Value = Vec<ScoredChunk>> {
        prop::collection::btree_map(0u64..40, -10.0f32..10.0, 0..20).prop_map(|scores| {
            let mut hits: Vec<ScoredChunk> = scores.into_iter().map(|(id, s)| hit(id, s)).collect();
            hits.sort_by(crate::knowledge::vector::rank_order);
            hits
        })
    }

    proptest! {
        #[test]
        fn prop_fused_ranking_is_ordered(
            vector in ranked_list(),
            lexical in ranked_list(),
            w in 0.0f32..=1.0,
            top_k in 1usize..15,
        ) {
            let weights = FusionWeights::from_vector_weight(w).unwrap();
            let fused = fuse(&vector, &lexical, weights, FusionStrategy::MinMax, top_k);

            prop_assert!(fused.len() <= top_k);
            prop_assert!(fused.windows(2).all(|p| p[0].score >= p[1].score));
            let unique: std::collections::BTreeSet<ChunkId> =
                fused.iter().map(|h| h.chunk_id).collect();
            prop_assert_eq!(unique.len(), fused.len());
        }

        #[test]
        fn prop_single_sided_weights_reproduce_ranking(
            list in ranked_list(),
            top_k in 1usize..15,
        ) {
            let expected: Vec<ChunkId> = list.iter().take(top_k).map(|h| h.chunk_id).collect();

            let weights = FusionWeights::vector_only();
            let fused = fuse(&list, &[], weights, FusionStrategy::MinMax, top_k);
            prop_assert_eq!(ids(&fused), expected.clone());

            let weights = FusionWeights::lexical_only();
            let fused = fuse(&[], &list, weights, FusionStrategy::MinMax, top_k);
            prop_assert_eq!(ids(&fused), expected);
        }
    }
}
