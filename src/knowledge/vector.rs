//! Vector Index - 청크 임베딩 최근접 이웃 검색
//!
//! 전수 비교(flat) 방식으로 항상 정확하고 결정적인 순위를 반환합니다.
//! 벡터와 청크 메타데이터는 같은 위치로 정렬되어 함께 보관됩니다.
//!
//! 디스크 포맷:
//! - `vectors.bin`: magic `AVEC` + version + metric + dimension + count + f32 LE 페이로드
//! - `chunks.jsonl`: 청크 레코드 한 줄씩 (vectors.bin과 같은 순서)

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

use super::manifest::{ArtifactDigest, Manifest};
use super::persist::{read_artifact, sha256_hex, write_atomic};
use super::types::{Chunk, ChunkId};

pub const VECTORS_FILE: &str = "vectors.bin";
pub const CHUNKS_FILE: &str = "chunks.jsonl";

const MAGIC: &[u8; 4] = b"AVEC";
const FORMAT_VERSION: u32 = 1;
/// magic(4) + version(4) + metric(1) + dimension(4) + count(8)
const HEADER_LEN: usize = 21;

// ============================================================================
// Similarity
// ============================================================================

/// 유사도 척도 (인덱스 생성 시 고정)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    /// 코사인 유사도 (-1.0 ~ 1.0)
    #[default]
    Cosine,
    /// 음의 유클리드 거리 제곱 (0이 최대)
    NegativeSquaredEuclidean,
}

impl Similarity {
    fn code(self) -> u8 {
        match self {
            Similarity::Cosine => 0,
            Similarity::NegativeSquaredEuclidean => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Similarity::Cosine),
            1 => Some(Similarity::NegativeSquaredEuclidean),
            _ => None,
        }
    }
}

/// 검색 결과 (청크 ID + 점수)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// NaN은 최하위로, -0.0은 0.0으로 정규화 (total_cmp 정렬용)
pub(crate) fn canonical_score(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score + 0.0
    }
}

/// 점수 내림차순, 동점이면 청크 ID 오름차순
pub(crate) fn rank_order(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

// ============================================================================
// VectorIndex
// ============================================================================

/// 벡터 인덱스
#[derive(Debug, Clone)]
pub struct VectorIndex {
    similarity: Similarity,
    dimension: usize,
    chunks: Vec<Chunk>,
    /// 평탄화된 벡터 (chunks.len() * dimension)
    vectors: Vec<f32>,
    /// 코사인 계산용 노름 (저장하지 않고 재계산)
    norms: Vec<f32>,
}

impl VectorIndex {
    /// 청크와 벡터로 인덱스 생성
    ///
    /// 청크 ID는 오름차순으로 유일해야 하며, 모든 벡터는 `dimension` 길이여야 합니다.
    pub fn build(
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
        dimension: usize,
        similarity: Similarity,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrievalError::input("vector dimension must be greater than 0"));
        }
        if chunks.is_empty() {
            return Err(RetrievalError::input("cannot build a vector index without chunks"));
        }
        if chunks.len() != vectors.len() {
            return Err(RetrievalError::input(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if chunks.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(RetrievalError::input("chunk ids must be unique and ascending"));
        }

        let mut flat = Vec::with_capacity(chunks.len() * dimension);
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            if vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                    context: format!("chunk {}", chunk.id),
                });
            }
            flat.extend_from_slice(vector);
        }

        Ok(Self::from_parts(chunks, flat, dimension, similarity))
    }

    /// 기존 인덱스 뒤에 청크를 덧붙인 새 인덱스
    ///
    /// 추가 청크의 ID는 기존 최댓값보다 커야 합니다. 유사도와 차원은 그대로 유지됩니다.
    pub fn extended(&self, chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self> {
        let appended = Self::build(chunks, vectors, self.dimension, self.similarity)?;
        if let (Some(last), Some(first)) = (self.chunks.last(), appended.chunks.first()) {
            if first.id <= last.id {
                return Err(RetrievalError::input(format!(
                    "appended chunk id {} must be greater than {}",
                    first.id, last.id
                )));
            }
        }

        let mut chunks = Vec::with_capacity(self.chunks.len() + appended.chunks.len());
        chunks.extend_from_slice(&self.chunks);
        chunks.extend(appended.chunks);
        let mut vectors = Vec::with_capacity(self.vectors.len() + appended.vectors.len());
        vectors.extend_from_slice(&self.vectors);
        vectors.extend(appended.vectors);

        Ok(Self::from_parts(chunks, vectors, self.dimension, self.similarity))
    }

    fn from_parts(
        chunks: Vec<Chunk>,
        vectors: Vec<f32>,
        dimension: usize,
        similarity: Similarity,
    ) -> Self {
        let norms = vectors.chunks_exact(dimension).map(l2_norm).collect();
        Self {
            similarity,
            dimension,
            chunks,
            vectors,
            norms,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 위치 정렬된 청크 목록
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// ID로 청크 조회
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks
            .binary_search_by_key(&id, |c| c.id)
            .ok()
            .map(|pos| &self.chunks[pos])
    }

    /// 저장된 벡터 조회
    pub fn vector(&self, id: ChunkId) -> Option<&[f32]> {
        let pos = self.chunks.binary_search_by_key(&id, |c| c.id).ok()?;
        Some(&self.vectors[pos * self.dimension..(pos + 1) * self.dimension])
    }

    /// 유사도 검색
    ///
    /// 유사도 내림차순, 동점이면 청크 ID 오름차순으로 최대 `top_k`개를 반환합니다.
    pub fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
                context: "query vector".to_string(),
            });
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<ScoredChunk> = self
            .vectors
            .chunks_exact(self.dimension)
            .zip(&self.norms)
            .zip(&self.chunks)
            .map(|((candidate, &norm), chunk)| ScoredChunk {
                chunk_id: chunk.id,
                score: canonical_score(self.score(vector, query_norm, candidate, norm)),
            })
            .collect();

        scored.sort_by(rank_order);
        scored.truncate(top_k);
        Ok(scored)
    }

    fn score(
        &self,
        query: &[f32],
        query_norm: f32,
        candidate: &[f32],
        candidate_norm: f32,
    ) -> f32 {
        match self.similarity {
            Similarity::Cosine => {
                if query_norm == 0.0 || candidate_norm == 0.0 {
                    return 0.0;
                }
                dot(query, candidate) / (query_norm * candidate_norm)
            }
            Similarity::NegativeSquaredEuclidean => -query
                .iter()
                .zip(candidate)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>(),
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// 벡터/청크 아티팩트 직렬화
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut vectors = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        vectors.extend_from_slice(MAGIC);
        vectors.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        vectors.push(self.similarity.code());
        vectors.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        vectors.extend_from_slice(&(self.chunks.len() as u64).to_le_bytes());
        for value in &self.vectors {
            vectors.extend_from_slice(&value.to_le_bytes());
        }

        let mut chunks = Vec::new();
        for chunk in &self.chunks {
            serde_json::to_writer(&mut chunks, chunk).map_err(|e| {
                RetrievalError::input(format!("failed to encode chunk {}: {}", chunk.id, e))
            })?;
            chunks.push(b'\n');
        }

        Ok((vectors, chunks))
    }

    /// 아티팩트 역직렬화 + 정합성 검증
    ///
    /// `dir`은 에러 메시지용 경로입니다.
    pub fn decode(dir: &Path, vectors: &[u8], chunks: &[u8]) -> Result<Self> {
        let vectors_path = dir.join(VECTORS_FILE);
        let corrupt = |reason: String| RetrievalError::corruption(&vectors_path, reason);

        if vectors.len() < HEADER_LEN || &vectors[..4] != MAGIC {
            return Err(corrupt("missing vector header".to_string()));
        }
        let version = read_u32(&vectors[4..8]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported vector format version {}", version)));
        }
        let similarity = Similarity::from_code(vectors[8])
            .ok_or_else(|| corrupt(format!("unknown similarity code {}", vectors[8])))?;
        let dimension = read_u32(&vectors[9..13]) as usize;
        let count = read_u64(&vectors[13..21]) as usize;

        if dimension == 0 {
            return Err(corrupt("dimension is 0".to_string()));
        }
        let payload = &vectors[HEADER_LEN..];
        let expected_len = count.checked_mul(dimension).and_then(|n| n.checked_mul(4));
        if expected_len != Some(payload.len()) {
            return Err(corrupt(format!(
                "payload holds {} bytes, expected {} vectors of dimension {}",
                payload.len(),
                count,
                dimension
            )));
        }
        let flat: Vec<f32> = payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let chunks_path = dir.join(CHUNKS_FILE);
        let text = std::str::from_utf8(chunks).map_err(|e| {
            RetrievalError::corruption(&chunks_path, format!("invalid UTF-8: {}", e))
        })?;
        let records = text
            .lines()
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str::<Chunk>(line).map_err(|e| {
                    RetrievalError::corruption(&chunks_path, format!("line {}: {}", i + 1, e))
                })
            })
            .collect::<Result<Vec<Chunk>>>()?;

        if records.len() != count {
            return Err(RetrievalError::corruption(
                &chunks_path,
                format!("{} chunk records but {} vectors", records.len(), count),
            ));
        }
        if records.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(RetrievalError::corruption(
                &chunks_path,
                "chunk ids are not unique and ascending",
            ));
        }

        Ok(Self::from_parts(records, flat, dimension, similarity))
    }

    /// 디렉토리에 아티팩트 저장 (파일별 원자적 기록)
    pub fn save(&self, dir: &Path) -> Result<Vec<ArtifactDigest>> {
        let (vectors, chunks) = self.encode()?;
        write_atomic(&dir.join(VECTORS_FILE), &vectors)?;
        write_atomic(&dir.join(CHUNKS_FILE), &chunks)?;

        Ok(vec![
            ArtifactDigest::new(VECTORS_FILE, sha256_hex(&vectors)),
            ArtifactDigest::new(CHUNKS_FILE, sha256_hex(&chunks)),
        ])
    }

    /// 디렉토리에서 로드 - 매니페스트의 차원/개수/체크섬과 일치해야 함
    pub fn load(dir: &Path, manifest: &Manifest) -> Result<Self> {
        let vectors = read_artifact(dir, VECTORS_FILE)?;
        let chunks = read_artifact(dir, CHUNKS_FILE)?;
        manifest.verify_checksum(dir, VECTORS_FILE, &vectors)?;
        manifest.verify_checksum(dir, CHUNKS_FILE, &chunks)?;

        let index = Self::decode(dir, &vectors, &chunks)?;

        if index.dimension != manifest.vector_dimension {
            return Err(RetrievalError::corruption(
                dir.join(VECTORS_FILE),
                format!(
                    "vector dimension {} does not match manifest dimension {}",
                    index.dimension, manifest.vector_dimension
                ),
            ));
        }
        if index.len() != manifest.chunk_count {
            return Err(RetrievalError::corruption(
                dir.join(VECTORS_FILE),
                format!(
                    "{} vectors but manifest records {} chunks",
                    index.len(),
                    manifest.chunk_count
                ),
            ));
        }
        if index.similarity != manifest.similarity {
            return Err(RetrievalError::corruption(
                dir.join(VECTORS_FILE),
                "similarity metric does not match manifest",
            ));
        }

        Ok(index)
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 길이가 다르거나 영벡터가 포함되면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (norm_a * norm_b)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

// ============================================================================
// Tests
// ============================================================================
