//! 로컬 해싱 임베딩 (feature hashing)
//!
//! 토큰마다 FNV-1a 해시로 차원과 부호를 정하고 L2 정규화합니다.
//! 네트워크 없이 결정적인 벡터를 만들기 때문에 오프라인 인덱싱과
//! 테스트에 사용합니다.
//!
//! ref: https://en.wikipedia.org/wiki/Feature_hashing

use async_trait::async_trait;

use crate::error::{Result, RetrievalError};
use crate::knowledge::tokenize;

use super::{EmbeddingKind, EmbeddingProvider};

pub const DEFAULT_HASHING_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 해싱 임베딩
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedding {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RetrievalError::input("hashing dimension must be greater than 0"));
        }
        Ok(Self {
            dimension,
            model_id: format!("hashing-{}", dimension),
        })
    }

    /// 텍스트 하나를 벡터로 변환 (토큰이 없으면 영벡터)
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(FNV_PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn kind(&self) -> EmbeddingKind {
        EmbeddingKind::Hashing
    }
}
