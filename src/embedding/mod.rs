//! 임베딩 모듈 - 텍스트 벡터화 프로바이더
//!
//! 검색 엔진은 `EmbeddingProvider` 트레이트만 사용합니다.
//! 실제 백엔드는 `EmbeddingBackend` 설정으로 한 번만 선택됩니다.
//!
//! - `Hashing`: 로컬 feature hashing (오프라인, 결정적)
//! - `Gemini`: Google Gemini 임베딩 API
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = EmbeddingBackend::default().into_provider()?;
//! let vectors = embedder.embed_batch(&["Hello, world!".to_string()]).await?;
//! ```

mod gemini;
mod hashing;

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

pub use gemini::{GeminiConfig, GeminiEmbedding};
pub use hashing::{HashingEmbedding, DEFAULT_HASHING_DIMENSION};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 입력 순서대로 텍스트 하나당 벡터 하나를 반환하며,
/// 한 인스턴스의 벡터 차원은 항상 같습니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 배치 임베딩 (문서용)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::permanent("provider returned no embedding"))
    }

    /// 검색 쿼리 임베딩 (프로바이더가 쿼리 전용 모드를 쓸 수 있음)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 매니페스트에 기록되는 모델 식별자
    fn model_id(&self) -> &str;

    /// 백엔드 종류
    fn kind(&self) -> EmbeddingKind;
}

// ============================================================================
// Backend selection
// ============================================================================

/// 백엔드 종류 태그 (매니페스트에 기록, CLI 선택지)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    /// 로컬 해싱 임베딩 (API 키 불필요)
    Hashing,
    /// Google Gemini API
    Gemini,
}

/// 임베딩 백엔드 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// 로컬 해싱 임베딩
    Hashing {
        #[serde(default = "default_hashing_dimension")]
        dimension: usize,
    },
    /// Google Gemini API
    Gemini(GeminiConfig),
}

fn default_hashing_dimension() -> usize {
    DEFAULT_HASHING_DIMENSION
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        EmbeddingBackend::Hashing {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

impl EmbeddingBackend {
    pub fn kind(&self) -> EmbeddingKind {
        match self {
            EmbeddingBackend::Hashing { .. } => EmbeddingKind::Hashing,
            EmbeddingBackend::Gemini(_) => EmbeddingKind::Gemini,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EmbeddingBackend::Hashing { dimension } => {
                if *dimension == 0 {
                    return Err(RetrievalError::input("hashing dimension must be greater than 0"));
                }
                Ok(())
            }
            EmbeddingBackend::Gemini(config) => config.validate(),
        }
    }

    /// 프로바이더 인스턴스 생성
    pub fn into_provider(self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.validate()?;
        let provider: Arc<dyn EmbeddingProvider> = match self {
            EmbeddingBackend::Hashing { dimension } => Arc::new(HashingEmbedding::new(dimension)?),
            EmbeddingBackend::Gemini(config) => Arc::new(GeminiEmbedding::new(config)?),
        };

        tracing::info!(
            "Using embedding model {} (dimension: {})",
            provider.model_id(),
            provider.dimension()
        );
        Ok(provider)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_json() {
        let backend: EmbeddingBackend = serde_json::from_str(r#"{"kind":"hashing"}"#).unwrap();
        assert_eq!(backend, EmbeddingBackend::default());

        let json = r#"{"kind":"gemini","model":"text-embedding-004","dimension":256}"#;
        let backend: EmbeddingBackend = serde_json::from_str(json).unwrap();
        match backend {
            EmbeddingBackend::Gemini(config) => {
                assert_eq!(config.dimension, 256);
                assert!(config.api_key.is_none());
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_default_provider_embeds() {
        let provider = EmbeddingBackend::default().into_provider().unwrap();
        assert_eq!(provider.dimension(), DEFAULT_HASHING_DIMENSION);
        assert_eq!(provider.kind(), EmbeddingKind::Hashing);

        let vector = provider.embed("hello world").await.unwrap();
        assert_eq!(vector.len(), DEFAULT_HASHING_DIMENSION);
        assert_eq!(provider.embed_query("hello world").await.unwrap(), vector);
    }

    #[test]
    fn test_gemini_without_key_is_rejected() {
        let backend = EmbeddingBackend::Gemini(GeminiConfig::default());
        assert!(matches!(backend.into_provider(), Err(RetrievalError::Input(_))));
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        assert!(EmbeddingBackend::Hashing { dimension: 0 }.into_provider().is_err());
    }
}
