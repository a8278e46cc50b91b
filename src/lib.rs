//! anno-vecdb - 하이브리드 검색 인덱스
//!
//! 임베딩 벡터 검색과 BM25 키워드 검색을 결합한
//! 로컬 검색 인덱스 빌더입니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let config = RetrievalConfig::default();
//! let provider = config.embedding.backend.clone().into_provider()?;
//! let store = RetrievalStore::new(provider, config)?;
//! store.build(&documents, ChunkConfig::default()).await?;
//! let hits = store.query("검색어", 4, SearchMode::Hybrid(FusionWeights::default())).await?;
//! ```

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod source;

// Re-exports
pub use config::{default_index_dir, EmbeddingSettings, RetrievalConfig, RetryConfig};
pub use embedding::{
    EmbeddingBackend, EmbeddingKind, EmbeddingProvider, GeminiConfig, GeminiEmbedding,
    HashingEmbedding,
};
pub use error::{Result, RetrievalError};
pub use knowledge::{
    BuildReport, Chunk, ChunkConfig, ChunkId, Document, FusionConfig, FusionStrategy,
    FusionWeights, Manifest, QueryHit, RetrievalStore, SearchMethod, SearchMode, Similarity,
    StoreState, StoreStats,
};
pub use source::{
    collect_documents, DelimitedFileSource, DocumentSource, FileTreeSource, MetadataExtractor,
    TranscriptSource, WebPageSource,
};
