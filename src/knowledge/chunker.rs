//! Text Chunking Module
//!
//! 문서를 고정 크기 + 오버랩 윈도우로 분할합니다.
//!
//! 측정 단위는 확장 grapheme cluster 입니다. 청크 경계가 항상 grapheme
//! 경계에 놓이므로 멀티바이트 문자나 결합 문자 시퀀스가 잘리지 않습니다.
//! ref: https://unicode.org/reports/tr29/

use std::ops::Range;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Result, RetrievalError};

use super::types::{Chunk, ChunkId, Document};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 청크 크기 (grapheme 수)
    pub chunk_size: usize,
    /// 인접 청크 간 오버랩 (grapheme 수)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// `0 <= overlap < chunk_size`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RetrievalError::input("chunk_size must be greater than 0"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RetrievalError::input(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// 청크 시작 위치 간격
    pub fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

// ============================================================================
// GraphemeChunker
// ============================================================================

/// 고정 윈도우 청커
///
/// 청크 i는 `i * (chunk_size - overlap)` 위치에서 시작하고,
/// 마지막 청크는 남은 길이만큼만 담습니다 (패딩 없음).
#[derive(Debug, Clone)]
pub struct GraphemeChunker {
    config: ChunkConfig,
}

impl GraphemeChunker {
    /// 설정 검증 후 생성
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 청크의 바이트 범위 목록
    pub fn spans(&self, text: &str) -> Vec<Range<usize>> {
        // grapheme 시작 오프셋 + 끝 오프셋
        let bounds: Vec<usize> = text
            .grapheme_indices(true)
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let count = bounds.len() - 1;

        if count == 0 {
            return vec![];
        }
        if count <= self.config.chunk_size {
            return vec![0..text.len()];
        }

        let step = self.config.step();
        let mut spans = Vec::with_capacity(count / step + 1);
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(count);
            spans.push(bounds[start]..bounds[end]);
            if end == count {
                break;
            }
            start += step;
        }

        spans
    }

    /// 문서를 청크로 분할
    ///
    /// `first_id`부터 순차적으로 ID를 부여하며, 메타데이터는 부모 문서에서 상속됩니다.
    pub fn split(
        &self,
        document_index: usize,
        document: &Document,
        first_id: ChunkId,
    ) -> Vec<Chunk> {
        self.spans(&document.content)
            .into_iter()
            .map(|span| &document.content[span])
            .filter(|text| !text.is_empty())
            .enumerate()
            .map(|(sequence_index, text)| Chunk {
                id: first_id + sequence_index as ChunkId,
                document_index,
                sequence_index,
                text: text.to_string(),
                metadata: document.metadata.clone(),
            })
            .collect()
    }

    /// 청크 목록에서 원문 복원 (오버랩 제거 후 연결)
    pub fn reassemble<S: AsRef<str>>(&self, chunks: &[S]) -> String {
        let mut text = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk = chunk.as_ref();
            if i == 0 {
                text.push_str(chunk);
            } else {
                let skip = chunk
                    .grapheme_indices(true)
                    .nth(self.config.chunk_overlap)
                    .map(|(offset, _)| offset)
                    .unwrap_or(chunk.len());
                text.push_str(&chunk[skip..]);
            }
        }
        text
    }
}

// ============================================================================
// Tests
// ============================================================================
