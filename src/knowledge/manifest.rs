//! 인덱스 매니페스트 - 빌드 조건 기록 및 로드 시 호환성 검증

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingKind;
use crate::error::{Result, RetrievalError};

use super::chunker::ChunkConfig;
use super::lexical::Bm25Params;
use super::persist::{read_artifact, sha256_hex, write_atomic};
use super::vector::Similarity;

pub const MANIFEST_FILE: &str = "manifest.json";

/// 현재 디스크 포맷 버전
pub const FORMAT_VERSION: u32 = 1;

/// 아티팩트 파일 체크섬
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDigest {
    pub name: &'static str,
    pub sha256: String,
}

impl ArtifactDigest {
    pub fn new(name: &'static str, sha256: String) -> Self {
        Self { name, sha256 }
    }
}

/// 인덱스 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub embedding_kind: EmbeddingKind,
    pub embedding_model_id: String,
    pub vector_dimension: usize,
    pub similarity: Similarity,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunk_count: usize,
    pub build_timestamp: DateTime<Utc>,
    pub bm25: Bm25Params,
    /// 파일명 -> SHA-256 (저장 시 채워짐)
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

impl Manifest {
    /// 빌드 직후 매니페스트 생성 (체크섬은 저장 시 기록)
    pub fn new(
        embedding_kind: EmbeddingKind,
        embedding_model_id: impl Into<String>,
        vector_dimension: usize,
        similarity: Similarity,
        chunking: ChunkConfig,
        chunk_count: usize,
        bm25: Bm25Params,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            embedding_kind,
            embedding_model_id: embedding_model_id.into(),
            vector_dimension,
            similarity,
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
            chunk_count,
            build_timestamp: Utc::now(),
            bm25,
            checksums: BTreeMap::new(),
        }
    }

    /// 청킹 설정
    pub fn chunking(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }

    /// 체크섬 기록
    pub fn record_digests(&mut self, digests: impl IntoIterator<Item = ArtifactDigest>) {
        for digest in digests {
            self.checksums.insert(digest.name.to_string(), digest.sha256);
        }
    }

    /// 아티팩트 체크섬 검증
    pub fn verify_checksum(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        let path = dir.join(name);
        let expected = self
            .checksums
            .get(name)
            .ok_or_else(|| RetrievalError::corruption(&path, "no checksum recorded in manifest"))?;

        let actual = sha256_hex(bytes);
        if &actual != expected {
            return Err(RetrievalError::corruption(
                &path,
                format!("checksum mismatch (expected {}, got {})", expected, actual),
            ));
        }
        Ok(())
    }

    /// 요청한 임베딩 프로바이더와 호환되는지 확인
    pub fn validate_provider(
        &self,
        dir: &Path,
        kind: EmbeddingKind,
        model_id: &str,
        dimension: usize,
    ) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);

        if self.format_version != FORMAT_VERSION {
            return Err(RetrievalError::corruption(
                &path,
                format!(
                    "unsupported format version {} (expected {})",
                    self.format_version, FORMAT_VERSION
                ),
            ));
        }
        if self.embedding_kind != kind || self.embedding_model_id != model_id {
            return Err(RetrievalError::corruption(
                &path,
                format!(
                    "index was built with {:?} model '{}', but the store uses {:?} model '{}'",
                    self.embedding_kind, self.embedding_model_id, kind, model_id
                ),
            ));
        }
        if self.vector_dimension != dimension {
            return Err(RetrievalError::corruption(
                &path,
                format!(
                    "index dimension {} does not match provider dimension {}",
                    self.vector_dimension, dimension
                ),
            ));
        }
        Ok(())
    }

    /// 매니페스트 읽기
    pub fn load(dir: &Path) -> Result<Self> {
        let bytes = read_artifact(dir, MANIFEST_FILE)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RetrievalError::corruption(dir.join(MANIFEST_FILE), format!("invalid manifest: {}", e))
        })
    }

    /// 매니페스트 기록 (원자적)
    pub fn save(&self, dir: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| RetrievalError::input(format!("failed to encode manifest: {}", e)))?;
        write_atomic(&dir.join(MANIFEST_FILE), &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Manifest {
        Manifest::new(
            EmbeddingKind::Hashing,
            "hashing-64",
            64,
            Similarity::Cosine,
            ChunkConfig::default(),
            4,
            Bm25Params::default(),
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut manifest = sample();
        manifest.record_digests([ArtifactDigest::new("vectors.bin", "abc".to_string())]);
        manifest.save(dir.path()).unwrap();

        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.embedding_kind, EmbeddingKind::Hashing);

        let json = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(json.contains(r#""embedding_kind": "hashing""#));
        assert_eq!(loaded.chunking(), ChunkConfig::default());
    }

    #[test]
    fn test_validate_provider() {
        let dir = TempDir::new().unwrap();
        let manifest = sample();

        let kind = EmbeddingKind::Hashing;

        assert!(manifest.validate_provider(dir.path(), kind, "hashing-64", 64).is_ok());
        assert!(matches!(
            manifest.validate_provider(dir.path(), kind, "text-embedding-004", 64),
            Err(RetrievalError::IndexCorruption { .. })
        ));
        assert!(matches!(
            manifest.validate_provider(dir.path(), EmbeddingKind::Gemini, "hashing-64", 64),
            Err(RetrievalError::IndexCorruption { .. })
        ));
        assert!(matches!(
            manifest.validate_provider(dir.path(), kind, "hashing-64", 128),
            Err(RetrievalError::IndexCorruption { .. })
        ));
    }

    #[test]
    fn test_verify_checksum() {
        let dir = TempDir::new().unwrap();
        let mut manifest = sample();
        manifest.record_digests([ArtifactDigest::new("lexical.json", sha256_hex(b"{}"))]);

        assert!(manifest.verify_checksum(dir.path(), "lexical.json", b"{}").is_ok());
        assert!(manifest.verify_checksum(dir.path(), "lexical.json", b"{ }").is_err());
        assert!(manifest.verify_checksum(dir.path(), "vectors.bin", b"").is_err());
    }

    #[test]
    fn test_load_invalid_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"not json").unwrap();
        assert!(matches!(
            Manifest::load(dir.path()),
            Err(RetrievalError::IndexCorruption { .. })
        ));
    }
}
