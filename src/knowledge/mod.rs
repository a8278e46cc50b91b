//! Knowledge 모듈 - 하이브리드 검색 엔진 코어
//!
//! - Chunker: grapheme 단위 고정 윈도우 분할
//! - VectorIndex: 임베딩 전수 비교 검색
//! - LexicalIndex: BM25 키워드 검색
//! - Hybrid: 두 검색 결과의 가중 통합
//! - Store: 빌드/저장/로드/쿼리 파사드

mod chunker;
mod hybrid;
mod lexical;
mod manifest;
mod persist;
mod store;
mod tokenizer;
mod types;
mod vector;

// Re-exports
pub use chunker::{ChunkConfig, GraphemeChunker};
pub use hybrid::{
    fuse, FusedHit, FusionConfig, FusionStrategy, FusionWeights, HybridRetriever, SearchMethod,
};
pub use lexical::{Bm25Params, LexicalIndex, LEXICAL_FILE};
pub use manifest::{ArtifactDigest, Manifest, FORMAT_VERSION, MANIFEST_FILE};
pub use store::{
    BuildReport, IndexSnapshot, QueryHit, RetrievalStore, SearchMode, StoreState, StoreStats,
};
pub use tokenizer::{is_cjk, tokenize};
pub use types::{Chunk, ChunkId, Document, Metadata};
pub use vector::{
    cosine_similarity, ScoredChunk, Similarity, VectorIndex, CHUNKS_FILE, VECTORS_FILE,
};
