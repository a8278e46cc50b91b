//! 검색 엔진 설정
//!
//! 모든 필드에 기본값이 있으므로 JSON 설정 파일에는 바꾸고 싶은 값만 적으면 됩니다.
//!
//! ```json
//! {
//!   "chunking": { "chunk_size": 500, "chunk_overlap": 100 },
//!   "embedding": { "backend": { "kind": "gemini", "dimension": 768 } },
//!   "fusion": { "strategy": { "kind": "reciprocal_rank", "k": 60 } }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingBackend;
use crate::error::{Result, RetrievalError};
use crate::knowledge::{Bm25Params, ChunkConfig, FusionConfig, Similarity};

/// 데이터 디렉토리 이름
const APP_DIR: &str = "anno-vecdb";

/// 기본 인덱스 디렉토리
///
/// `{data_local_dir}/anno-vecdb/index`
pub fn default_index_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("index")
}

// ============================================================================
// RetrievalConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub chunking: ChunkConfig,
    pub embedding: EmbeddingSettings,
    pub similarity: Similarity,
    pub bm25: Bm25Params,
    pub fusion: FusionConfig,
}

impl RetrievalConfig {
    /// JSON 설정 파일 로드
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| RetrievalError::input(format!("invalid config {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        self.bm25.validate()?;
        self.fusion.validate()
    }
}

/// 임베딩 실행 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    /// 프로바이더 호출당 텍스트 수
    pub batch_size: usize,
    /// 동시에 진행하는 배치 수
    pub concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            batch_size: 32,
            concurrency: 4,
            retry: RetryConfig::default(),
        }
    }
}

impl EmbeddingSettings {
    /// 백엔드 자격 증명은 프로바이더 생성 시점에 확인합니다.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RetrievalError::input("embedding batch_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(RetrievalError::input("embedding concurrency must be at least 1"));
        }
        self.retry.validate()
    }
}

/// 일시적 임베딩 실패 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 2000,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// 재시도 없음 (테스트용)
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(RetrievalError::input(
                "max_backoff_ms must be >= initial_backoff_ms",
            ));
        }
        Ok(())
    }

    /// `attempt`번째 실패 후 대기 시간 (0부터)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::FusionStrategy;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embedding.batch_size, 32);
        assert_eq!(config.fusion.fetch_factor, 3);
        assert_eq!(config.similarity, Similarity::Cosine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "chunking": { "chunk_size": 20, "chunk_overlap": 5 },
                "similarity": "negative_squared_euclidean",
                "fusion": { "strategy": { "kind": "reciprocal_rank", "k": 10 } }
            }"#,
        )
        .unwrap();

        let config = RetrievalConfig::from_file(&path).unwrap();
        assert_eq!(config.chunking, ChunkConfig::new(20, 5).unwrap());
        assert_eq!(config.similarity, Similarity::NegativeSquaredEuclidean);
        assert_eq!(config.fusion.strategy, FusionStrategy::ReciprocalRank { k: 10.0 });
        assert_eq!(config.embedding, EmbeddingSettings::default());
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let invalid = r#"{ "chunking": { "chunk_size": 10, "chunk_overlap": 10 } }"#;
        std::fs::write(&path, invalid).unwrap();
        assert!(matches!(
            RetrievalConfig::from_file(&path),
            Err(RetrievalError::Input(_))
        ));

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(RetrievalConfig::from_file(&path), Err(RetrievalError::Input(_))));
    }

    #[test]
    fn test_backoff_is_capped() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(0), Duration::from_millis(2000));
        assert_eq!(retry.backoff(1), Duration::from_millis(4000));
        assert_eq!(retry.backoff(10), Duration::from_millis(30_000));
        assert_eq!(retry.backoff(100), Duration::from_millis(30_000));
    }

    #[test]
    fn test_default_index_dir() {
        assert!(default_index_dir().ends_with("anno-vecdb/index"));
    }
}
