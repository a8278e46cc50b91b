//! Lexical Index - BM25 키워드 검색
//!
//! 청크별 단어 빈도, 단어별 문서 빈도, 평균 청크 길이를 보관하고
//! Okapi BM25로 점수를 매깁니다.
//!
//! ```text
//! idf(t)   = ln(1 + (N - df + 0.5) / (df + 0.5))
//! score(q) = Σ idf(t) · tf·(k1+1) / (tf + k1·(1 - b + b·dl/avgdl))
//! ```
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

use super::manifest::{ArtifactDigest, Manifest};
use super::persist::{read_artifact, sha256_hex, write_atomic};
use super::tokenizer::tokenize;
use super::types::{Chunk, ChunkId};
use super::vector::{canonical_score, rank_order, ScoredChunk};

pub const LEXICAL_FILE: &str = "lexical.json";

// ============================================================================
// BM25 Parameters
// ============================================================================

/// BM25 자유 파라미터
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// 단어 빈도 포화 (보통 1.2 ~ 2.0)
    pub k1: f32,
    /// 길이 정규화 강도 (0 ~ 1)
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(RetrievalError::input(format!("bm25 k1 must be >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(RetrievalError::input(format!(
                "bm25 b must be within [0, 1], got {}",
                self.b
            )));
        }
        Ok(())
    }
}

/// 포스팅 (청크 위치 + 단어 빈도)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    tf: u32,
}

// ============================================================================
// LexicalIndex
// ============================================================================

/// BM25 역색인
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalIndex {
    params: Bm25Params,
    /// 위치별 청크 ID
    chunk_ids: Vec<ChunkId>,
    /// 위치별 토큰 수
    doc_lengths: Vec<u32>,
    /// 단어 -> 포스팅 (위치 오름차순)
    postings: BTreeMap<String, Vec<Posting>>,
    #[serde(skip)]
    avg_doc_length: f32,
}

impl LexicalIndex {
    /// 청크 목록으로 인덱스 생성
    pub fn build(chunks: &[Chunk], params: Bm25Params) -> Result<Self> {
        params.validate()?;
        if chunks.len() > u32::MAX as usize {
            return Err(RetrievalError::input("too many chunks for the lexical index"));
        }

        let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        let mut doc_lengths = Vec::with_capacity(chunks.len());
        let mut chunk_ids = Vec::with_capacity(chunks.len());

        for (pos, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize(&chunk.text);
            doc_lengths.push(tokens.len() as u32);
            chunk_ids.push(chunk.id);

            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *frequencies.entry(token).or_insert(0) += 1;
            }
            for (term, tf) in frequencies {
                postings.entry(term).or_default().push(Posting { doc: pos as u32, tf });
            }
        }

        let mut index = Self {
            params,
            chunk_ids,
            doc_lengths,
            postings,
            avg_doc_length: 0.0,
        };
        index.refresh_stats();
        Ok(index)
    }

    fn refresh_stats(&mut self) {
        let total: u64 = self.doc_lengths.iter().map(|&l| l as u64).sum();
        self.avg_doc_length = if self.doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / self.doc_lengths.len() as f32
        };
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    /// 인덱싱된 청크 수
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    pub fn avg_doc_length(&self) -> f32 {
        self.avg_doc_length
    }

    /// 단어의 문서 빈도
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map(Vec::len).unwrap_or(0)
    }

    /// 역문서 빈도 (항상 양수)
    fn idf(&self, df: usize) -> f32 {
        let n = self.chunk_ids.len() as f32;
        let df = df as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 검색
    ///
    /// 모르는 단어는 0점, 0점 청크는 결과에서 제외됩니다.
    pub fn query(&self, text: &str, top_k: usize) -> Vec<ScoredChunk> {
        if self.avg_doc_length == 0.0 {
            return vec![];
        }

        let Bm25Params { k1, b } = self.params;
        let terms: BTreeSet<String> = tokenize(text).into_iter().collect();
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in &terms {
            let Some(postings) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(postings.len());

            for posting in postings {
                let tf = posting.tf as f32;
                let dl = self.doc_lengths[posting.doc as usize] as f32;
                let norm = k1 * (1.0 - b + b * dl / self.avg_doc_length);
                *scores.entry(posting.doc).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut ranked: Vec<ScoredChunk> = scores
            .into_iter()
            .map(|(doc, score)| ScoredChunk {
                chunk_id: self.chunk_ids[doc as usize],
                score: canonical_score(score),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        ranked.sort_by(rank_order);
        ranked.truncate(top_k);
        ranked
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RetrievalError::input(format!("failed to encode lexical index: {}", e)))
    }

    /// 역직렬화 + 정합성 검증
    pub fn decode(dir: &Path, bytes: &[u8]) -> Result<Self> {
        let path = dir.join(LEXICAL_FILE);
        let mut index: Self = serde_json::from_slice(bytes).map_err(|e| {
            RetrievalError::corruption(&path, format!("invalid lexical index: {}", e))
        })?;

        if index.chunk_ids.len() != index.doc_lengths.len() {
            return Err(RetrievalError::corruption(
                &path,
                format!(
                    "{} chunk ids but {} length records",
                    index.chunk_ids.len(),
                    index.doc_lengths.len()
                ),
            ));
        }
        let n = index.chunk_ids.len() as u32;
        if index.postings.values().flatten().any(|p| p.doc >= n || p.tf == 0) {
            return Err(RetrievalError::corruption(&path, "posting refers to an unknown chunk"));
        }
        index
            .params
            .validate()
            .map_err(|e| RetrievalError::corruption(&path, e.to_string()))?;

        index.refresh_stats();
        Ok(index)
    }

    /// 디렉토리에 저장 (원자적)
    pub fn save(&self, dir: &Path) -> Result<ArtifactDigest> {
        let bytes = self.encode()?;
        write_atomic(&dir.join(LEXICAL_FILE), &bytes)?;
        Ok(ArtifactDigest::new(LEXICAL_FILE, sha256_hex(&bytes)))
    }

    /// 디렉토리에서 로드 - 매니페스트의 체크섬/개수와 일치해야 함
    pub fn load(dir: &Path, manifest: &Manifest) -> Result<Self> {
        let bytes = read_artifact(dir, LEXICAL_FILE)?;
        manifest.verify_checksum(dir, LEXICAL_FILE, &bytes)?;

        let index = Self::decode(dir, &bytes)?;
        if index.len() != manifest.chunk_count {
            return Err(RetrievalError::corruption(
                dir.join(LEXICAL_FILE),
                format!(
                    "{} lexical entries but manifest records {} chunks",
                    index.len(),
                    manifest.chunk_count
                ),
            ));
        }
        Ok(index)
    }

    /// 같은 청크 순서로 만들어졌는지 확인
    pub fn is_aligned_with(&self, chunks: &[Chunk]) -> bool {
        self.chunk_ids.len() == chunks.len()
            && self.chunk_ids.iter().zip(chunks).all(|(id, c)| *id == c.id)
    }
}

// ============================================================================
// Tests
// ============================================================================
