//! Retrieval Store - 검색 엔진 파사드
//!
//! 청킹 → 임베딩 → 벡터/BM25 인덱스 생성, 저장/로드, 쿼리를 담당합니다.
//!
//! ## 상태
//! ```text
//! Empty ──build──▶ Building ──▶ Ready ──save──▶ Saving ──▶ Ready
//! Ready ──add_documents──▶ Building ──▶ Ready
//! Empty | Ready ──load──▶ Loading ──▶ Ready
//! ```
//!
//! 인덱스는 불변 스냅샷(`IndexSnapshot`)으로 교체됩니다. 쿼리는 스냅샷의
//! `Arc`만 복제해서 락 없이 실행되므로, 빌드/로드 중에도 이전 스냅샷을
//! 일관되게 봅니다. build/add_documents/save/load는 서로 배타적으로 실행됩니다.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::config::RetrievalConfig;
use crate::embedding::{EmbeddingKind, EmbeddingProvider};
use crate::error::{Result, RetrievalError};

use super::chunker::{ChunkConfig, GraphemeChunker};
use super::hybrid::{FusionWeights, HybridRetriever, SearchMethod};
use super::lexical::LexicalIndex;
use super::manifest::Manifest;
use super::persist::write_dir;
use super::types::{Chunk, ChunkId, Document, Metadata};
use super::vector::{ScoredChunk, VectorIndex};

// ============================================================================
// Types
// ============================================================================

/// 저장소 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    Empty,
    Building,
    Ready,
    Saving,
    Loading,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreState::Empty => "empty",
            StoreState::Building => "building",
            StoreState::Ready => "ready",
            StoreState::Saving => "saving",
            StoreState::Loading => "loading",
        };
        f.write_str(name)
    }
}

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    /// 벡터 유사도만
    Vector,
    /// BM25만
    Lexical,
    /// 가중 통합
    Hybrid(FusionWeights),
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub chunk_id: ChunkId,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
    pub method: SearchMethod,
}

/// 빌드 결과 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    /// 이번에 처리한 문서 수
    pub document_count: usize,
    /// 인덱스 전체 청크 수
    pub chunk_count: usize,
    /// 이번에 추가된 청크 수
    pub added_chunk_count: usize,
    pub dimension: usize,
    pub batch_count: usize,
    pub elapsed_ms: u128,
}

/// 저장소 통계
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub state: StoreState,
    pub chunk_count: usize,
    pub dimension: usize,
    pub model_id: String,
    pub built_at: Option<DateTime<Utc>>,
}

/// 불변 인덱스 스냅샷 (같은 청크 집합으로 만든 두 인덱스 + 매니페스트)
#[derive(Debug)]
pub struct IndexSnapshot {
    vector: VectorIndex,
    lexical: LexicalIndex,
    manifest: Manifest,
}

impl IndexSnapshot {
    pub fn vector(&self) -> &VectorIndex {
        &self.vector
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunk_count(&self) -> usize {
        self.vector.len()
    }

    fn hit(&self, chunk_id: ChunkId, score: f32, method: SearchMethod) -> Result<QueryHit> {
        let chunk = self.vector.chunk(chunk_id).ok_or_else(|| {
            RetrievalError::corruption(
                "<in-memory index>",
                format!("chunk {} is missing from the vector index", chunk_id),
            )
        })?;
        Ok(QueryHit {
            chunk_id,
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            score,
            method,
        })
    }

    fn hits(&self, scored: Vec<ScoredChunk>, method: SearchMethod) -> Result<Vec<QueryHit>> {
        scored
            .into_iter()
            .map(|s| self.hit(s.chunk_id, s.score, method))
            .collect()
    }
}

struct Inner {
    state: StoreState,
    snapshot: Option<Arc<IndexSnapshot>>,
}

// ============================================================================
// Phase Guard
// ============================================================================

/// 진행 중 상태 표시
///
/// commit 없이 drop되면 (에러 또는 future 취소) 이전 상태로 돌아갑니다.
struct PhaseGuard<'a> {
    inner: &'a RwLock<Inner>,
    previous: StoreState,
    committed: bool,
}

impl<'a> PhaseGuard<'a> {
    fn begin(inner: &'a RwLock<Inner>, phase: StoreState) -> Result<Self> {
        let mut guard = inner.write().map_err(|e| RetrievalError::Lock(e.to_string()))?;
        let previous = guard.state;
        guard.state = phase;
        tracing::debug!("Store state: {} -> {}", previous, phase);

        Ok(Self {
            inner,
            previous,
            committed: false,
        })
    }

    /// 새 스냅샷으로 교체하고 Ready 전환
    fn commit(mut self, snapshot: Arc<IndexSnapshot>) -> Result<()> {
        let mut guard = self.inner.write().map_err(|e| RetrievalError::Lock(e.to_string()))?;
        guard.snapshot = Some(snapshot);
        guard.state = StoreState::Ready;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!("Store state: {} -> {} (rolled back)", guard.state, self.previous);
        guard.state = self.previous;
    }
}

// ============================================================================
// RetrievalStore
// ============================================================================

/// 검색 저장소
pub struct RetrievalStore {
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
    inner: RwLock<Inner>,
    /// build/save/load 직렬화
    exclusive: tokio::sync::Mutex<()>,
}

impl RetrievalStore {
    /// 빈 저장소 생성
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            provider,
            config,
            inner: RwLock::new(Inner {
                state: StoreState::Empty,
                snapshot: None,
            }),
            exclusive: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// 현재 상태
    pub fn state(&self) -> StoreState {
        match self.inner.read() {
            Ok(inner) => inner.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    /// 현재 스냅샷 (없으면 QueryBeforeReady)
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        let inner = self.inner.read().map_err(|e| RetrievalError::Lock(e.to_string()))?;
        inner
            .snapshot
            .clone()
            .ok_or(RetrievalError::QueryBeforeReady { state: inner.state })
    }

    /// 저장소 통계
    pub fn stats(&self) -> StoreStats {
        let state = self.state();
        match self.snapshot() {
            Ok(snapshot) => StoreStats {
                state,
                chunk_count: snapshot.chunk_count(),
                dimension: snapshot.vector.dimension(),
                model_id: snapshot.manifest.embedding_model_id.clone(),
                built_at: Some(snapshot.manifest.build_timestamp),
            },
            Err(_) => StoreStats {
                state,
                chunk_count: 0,
                dimension: self.provider.dimension(),
                model_id: self.provider.model_id().to_string(),
                built_at: None,
            },
        }
    }

    // ------------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------------

    /// 문서로 인덱스 생성
    ///
    /// 전부 성공해야 새 스냅샷으로 교체됩니다. 실패하거나 취소되면
    /// 이전 상태와 스냅샷이 그대로 남습니다.
    pub async fn build(
        &self,
        documents: &[Document],
        chunking: ChunkConfig,
    ) -> Result<BuildReport> {
        let chunker = GraphemeChunker::new(chunking)?;
        check_documents(documents)?;

        let _exclusive = self.exclusive.lock().await;
        self.index_documents(&chunker, documents, None).await
    }

    /// 기존 인덱스에 문서 추가
    ///
    /// 청크 ID는 현재 최댓값 다음부터 이어지고, 청킹 설정은 기존 인덱스를
    /// 따릅니다. 인덱스가 없으면 설정의 청킹으로 새로 생성합니다.
    /// 교체 방식은 `build`와 같습니다.
    pub async fn add_documents(&self, documents: &[Document]) -> Result<BuildReport> {
        check_documents(documents)?;

        let _exclusive = self.exclusive.lock().await;
        let base = self.snapshot().ok();
        let chunking = match &base {
            Some(snapshot) => snapshot.manifest.chunking(),
            None => self.config.chunking,
        };
        let chunker = GraphemeChunker::new(chunking)?;
        self.index_documents(&chunker, documents, base).await
    }

    /// 청킹 → 임베딩 → 인덱스 생성 → 스냅샷 교체 (`exclusive` 잠금 상태에서 호출)
    async fn index_documents(
        &self,
        chunker: &GraphemeChunker,
        documents: &[Document],
        base: Option<Arc<IndexSnapshot>>,
    ) -> Result<BuildReport> {
        let guard = PhaseGuard::begin(&self.inner, StoreState::Building)?;
        let started = Instant::now();
        let chunking = *chunker.config();

        // 1. 청킹 (기존 인덱스가 있으면 ID와 문서 위치를 이어서 부여)
        let (mut next_id, first_document) = match &base {
            Some(snapshot) => next_positions(snapshot.vector.chunks()),
            None => (0, 0),
        };
        let mut chunks: Vec<Chunk> = Vec::new();
        for (offset, document) in documents.iter().enumerate() {
            let split = chunker.split(first_document + offset, document, next_id);
            next_id += split.len() as ChunkId;
            chunks.extend(split);
        }
        tracing::info!(
            "Indexing {} documents, {} chunks (size={}, overlap={}, existing={})",
            documents.len(),
            chunks.len(),
            chunking.chunk_size,
            chunking.chunk_overlap,
            base.as_ref().map_or(0, |s| s.chunk_count())
        );

        // 2. 임베딩
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (vectors, batch_count) = self.embed_all(&texts).await?;

        let dimension = self.provider.dimension();
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            if vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                    context: format!("chunk {}", chunk.id),
                });
            }
        }

        // 3. 인덱스 생성 (CPU 작업)
        let added = chunks.len();
        let (similarity, bm25) = match &base {
            Some(snapshot) => (snapshot.vector.similarity(), snapshot.lexical.params()),
            None => (self.config.similarity, self.config.bm25),
        };
        let (vector, lexical) = tokio::task::spawn_blocking(move || -> Result<_> {
            let vector = match &base {
                Some(snapshot) => snapshot.vector.extended(chunks, vectors)?,
                None => VectorIndex::build(chunks, vectors, dimension, similarity)?,
            };
            let lexical = LexicalIndex::build(vector.chunks(), bm25)?;
            Ok((vector, lexical))
        })
        .await
        .map_err(|e| RetrievalError::Task(e.to_string()))??;

        let manifest = Manifest::new(
            self.provider.kind(),
            self.provider.model_id(),
            dimension,
            similarity,
            chunking,
            vector.len(),
            bm25,
        );
        let report = BuildReport {
            document_count: documents.len(),
            chunk_count: vector.len(),
            added_chunk_count: added,
            dimension,
            batch_count,
            elapsed_ms: started.elapsed().as_millis(),
        };

        guard.commit(Arc::new(IndexSnapshot {
            vector,
            lexical,
            manifest,
        }))?;

        tracing::info!(
            "Index ready: {} chunks (+{}), dimension {} ({} ms)",
            report.chunk_count,
            report.added_chunk_count,
            report.dimension,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// 배치 단위 병렬 임베딩 (결과는 입력 순서로 복원)
    async fn embed_all(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        let settings = &self.config.embedding;
        let batches: Vec<Vec<String>> = texts
            .chunks(settings.batch_size)
            .map(<[String]>::to_vec)
            .collect();
        let batch_count = batches.len();

        let mut results: Vec<(usize, Vec<Vec<f32>>)> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| self.embed_batch_at(index, batch_count, batch))
            .buffer_unordered(settings.concurrency)
            .try_collect()
            .await?;

        results.sort_by_key(|(index, _)| *index);
        let vectors = results.into_iter().flat_map(|(_, v)| v).collect();
        Ok((vectors, batch_count))
    }

    async fn embed_batch_at(
        &self,
        index: usize,
        batch_count: usize,
        batch: Vec<String>,
    ) -> Result<(usize, Vec<Vec<f32>>)> {
        tracing::debug!(
            "Embedding batch {}/{} ({} texts)",
            index + 1,
            batch_count,
            batch.len()
        );
        let vectors = self.with_retry(|| self.provider.embed_batch(&batch)).await?;
        if vectors.len() != batch.len() {
            return Err(RetrievalError::permanent(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        Ok((index, vectors))
    }

    /// 일시적 실패는 지수 백오프로 재시도
    async fn with_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = self.config.embedding.retry;
        let mut attempt = 0;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < retry.max_retries => {
                    let backoff = retry.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Embedding failed ({}), retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        retry.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 검색
    ///
    /// 점수 내림차순으로 최대 `top_k`개를 반환합니다.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        mode: SearchMode,
    ) -> Result<Vec<QueryHit>> {
        if top_k == 0 {
            return Err(RetrievalError::input("top_k must be at least 1"));
        }
        if text.trim().is_empty() {
            return Err(RetrievalError::input("query text is empty"));
        }
        let snapshot = self.snapshot()?;

        match mode {
            SearchMode::Vector => {
                let query_vector = self.embed_query(text).await?;
                let scored = snapshot.vector.query(&query_vector, top_k)?;
                snapshot.hits(scored, SearchMethod::Vector)
            }
            SearchMode::Lexical => {
                let scored = snapshot.lexical.query(text, top_k);
                snapshot.hits(scored, SearchMethod::Lexical)
            }
            SearchMode::Hybrid(weights) => {
                weights.validate()?;
                let query_vector = if weights.vector() > 0.0 {
                    Some(self.embed_query(text).await?)
                } else {
                    None
                };

                let retriever =
                    HybridRetriever::new(&snapshot.vector, &snapshot.lexical, &self.config.fusion);
                retriever
                    .query(query_vector.as_deref(), text, top_k, weights)?
                    .into_iter()
                    .map(|hit| snapshot.hit(hit.chunk_id, hit.score, hit.method))
                    .collect()
            }
        }
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.with_retry(|| self.provider.embed_query(text)).await
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// 디렉토리에 저장
    ///
    /// staging 디렉토리에 전부 기록한 뒤 교체하므로, 실패해도 기존
    /// 디렉토리는 그대로 남습니다.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let _exclusive = self.exclusive.lock().await;
        let snapshot = self.snapshot().map_err(|_| RetrievalError::NotReady {
            operation: "save",
            state: self.state(),
        })?;
        let guard = PhaseGuard::begin(&self.inner, StoreState::Saving)?;

        let target = path.to_path_buf();
        let to_write = Arc::clone(&snapshot);
        tokio::task::spawn_blocking(move || write_snapshot(&to_write, &target))
            .await
            .map_err(|e| RetrievalError::Task(e.to_string()))??;

        guard.commit(snapshot)?;
        tracing::info!("Index saved to {:?}", path);
        Ok(())
    }

    /// 디렉토리에서 로드
    ///
    /// 매니페스트가 현재 프로바이더(모델, 차원)와 맞지 않거나 아티팩트가
    /// 손상되면 IndexCorruption을 반환하고 상태는 바뀌지 않습니다.
    pub async fn load(&self, path: &Path) -> Result<Manifest> {
        let _exclusive = self.exclusive.lock().await;
        let guard = PhaseGuard::begin(&self.inner, StoreState::Loading)?;

        let source = path.to_path_buf();
        let kind = self.provider.kind();
        let model_id = self.provider.model_id().to_string();
        let dimension = self.provider.dimension();
        let snapshot = tokio::task::spawn_blocking(move || {
            read_snapshot(&source, kind, &model_id, dimension)
        })
        .await
        .map_err(|e| RetrievalError::Task(e.to_string()))??;

        let manifest = snapshot.manifest.clone();
        guard.commit(Arc::new(snapshot))?;

        tracing::info!(
            "Index loaded from {:?}: {} chunks ({})",
            path,
            manifest.chunk_count,
            manifest.embedding_model_id
        );
        Ok(manifest)
    }
}

fn write_snapshot(snapshot: &IndexSnapshot, target: &Path) -> Result<()> {
    write_dir(target, |staging| {
        let mut manifest = snapshot.manifest.clone();
        manifest.record_digests(snapshot.vector.save(staging)?);
        manifest.record_digests([snapshot.lexical.save(staging)?]);
        // 매니페스트는 마지막에 기록
        manifest.save(staging)
    })
}

/// 빈 문서가 있으면 작업 전에 거부
fn check_documents(documents: &[Document]) -> Result<()> {
    if documents.is_empty() {
        return Err(RetrievalError::input("no documents to index"));
    }
    if let Some(pos) = documents.iter().position(|d| d.content.is_empty()) {
        return Err(RetrievalError::input(format!("document {} has no content", pos)));
    }
    Ok(())
}

/// 다음 청크 ID와 문서 위치
fn next_positions(chunks: &[Chunk]) -> (ChunkId, usize) {
    let next_id = chunks.iter().map(|c| c.id + 1).max().unwrap_or(0);
    let next_document = chunks.iter().map(|c| c.document_index + 1).max().unwrap_or(0);
    (next_id, next_document)
}

fn read_snapshot(
    dir: &Path,
    kind: EmbeddingKind,
    model_id: &str,
    dimension: usize,
) -> Result<IndexSnapshot> {
    if !dir.is_dir() {
        return Err(RetrievalError::corruption(dir, "index directory not found"));
    }

    let manifest = Manifest::load(dir)?;
    manifest.validate_provider(dir, kind, model_id, dimension)?;

    let vector = VectorIndex::load(dir, &manifest)?;
    let lexical = LexicalIndex::load(dir, &manifest)?;
    if !lexical.is_aligned_with(vector.chunks()) {
        return Err(RetrievalError::corruption(
            PathBuf::from(dir),
            "lexical index and chunk records are not aligned",
        ));
    }
    if lexical.params() != manifest.bm25 {
        return Err(RetrievalError::corruption(
            PathBuf::from(dir),
            "lexical index parameters do not match manifest",
        ));
    }

    Ok(IndexSnapshot {
        vector,
        lexical,
        manifest,
    })
}

// ============================================================================
// Tests
// ============================================================================
