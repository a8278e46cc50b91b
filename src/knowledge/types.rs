//! 코어 데이터 타입 - 문서와 청크

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 청크 식별자 (빌드 단위로 0부터 순차 부여)
pub type ChunkId = u64;

/// 메타데이터 (키 순서가 고정되도록 BTreeMap 사용)
pub type Metadata = BTreeMap<String, String>;

/// 입력 문서
///
/// 문서 소스가 생성하며, 코어에 전달된 이후에는 변경되지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// 메타데이터 항목 추가 (빌더 스타일)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 인덱싱 단위 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 인덱스 전체에서 유일한 ID
    pub id: ChunkId,
    /// 원본 문서 위치 (빌드 입력 순서 기준)
    pub document_index: usize,
    /// 문서 내 청크 순번 (0-based)
    pub sequence_index: usize,
    /// 청크 텍스트 (비어있지 않음)
    pub text: String,
    /// 부모 문서 메타데이터 그대로
    pub metadata: Metadata,
}
