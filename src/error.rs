//! 에러 타입
//!
//! 검색 엔진 코어의 모든 실패는 `RetrievalError`로 표현됩니다.
//! CLI 쪽은 anyhow로 감싸서 사용합니다.

use std::path::PathBuf;

use thiserror::Error;

use crate::knowledge::StoreState;

/// 검색 엔진 에러
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 잘못된 입력 (빈 문서, 청크 파라미터 오류 등) - 작업 시작 전에 거부
    #[error("invalid input: {0}")]
    Input(String),

    /// 임베딩 프로바이더 호출 실패
    #[error("embedding failed: {message}")]
    Embedding { message: String, transient: bool },

    /// 임베딩 차원 불일치
    #[error("dimension mismatch ({context}): expected {expected}, got {actual}")]
    DimensionMismatch {
        expected: usize,
        actual: usize,
        context: String,
    },

    /// 저장된 인덱스 손상 또는 호환 불가
    #[error("index at {path:?} is unusable: {reason}")]
    IndexCorruption { path: PathBuf, reason: String },

    /// Ready 상태가 아닐 때 쿼리 호출
    #[error("query issued before the store is ready (state: {state})")]
    QueryBeforeReady { state: StoreState },

    /// Ready 상태가 필요한 다른 작업 호출
    #[error("cannot {operation} while the store is {state}")]
    NotReady {
        operation: &'static str,
        state: StoreState,
    },

    /// 문서 소스 로딩 실패
    #[error("document source failed: {0}")]
    Source(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("lock poisoned: {0}")]
    Lock(String),

    /// 백그라운드 작업 실패 (panic 또는 런타임 종료)
    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;

impl RetrievalError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// 재시도 가능한 임베딩 에러 (429, 5xx, 네트워크)
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            transient: true,
        }
    }

    /// 재시도해도 의미 없는 임베딩 에러
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            transient: false,
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::IndexCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 재시도 대상 여부
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Embedding { transient: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RetrievalError::transient("429").is_transient());
        assert!(!RetrievalError::permanent("400").is_transient());
        assert!(!RetrievalError::input("bad").is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = RetrievalError::DimensionMismatch {
            expected: 768,
            actual: 384,
            context: "chunk 3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch (chunk 3): expected 768, got 384"
        );

        let err = RetrievalError::QueryBeforeReady {
            state: StoreState::Empty,
        };
        assert!(err.to_string().contains("empty"));
    }
}
