//! 문서 소스 - 검색 엔진 입력(`Document`) 생성
//!
//! 소스마다 별도 타입으로 구현하고, 명시적으로 생성해서 사용합니다.
//!
//! - `FileTreeSource`: 디렉토리(여러 개 가능)의 텍스트/PDF 파일
//! - `DelimitedFileSource`: CSV/TSV 파일 또는 디렉토리의 행 (일반 / Q&A)
//! - `TranscriptSource`: SRT/WebVTT 자막
//! - `WebPageSource`: 웹 페이지 본문

mod delimited;
mod files;
mod pdf;
mod transcript;
mod web;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::knowledge::{Document, Metadata};

pub use delimited::{DelimitedFileSource, DelimitedMode, DEFAULT_DELIMITED_EXTENSION};
pub use files::FileTreeSource;
pub use pdf::extract_pdf_pages;
pub use transcript::{parse_subtitles, TranscriptSource};
pub use web::{ScrapedPage, WebPageSource};

/// 문서 생성기 트레이트
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// 문서 목록 생성
    async fn get_documents(&self) -> Result<Vec<Document>>;

    /// 로그용 이름
    fn name(&self) -> &str;
}

/// 사용자 정의 메타데이터 추출 함수
///
/// (본문, 파일 경로)를 받아 추가 메타데이터를 돌려줍니다. 같은 키는
/// 소스가 넣은 기본값(`source`, `filename` 등)을 덮어씁니다.
#[derive(Clone)]
pub struct MetadataExtractor(Arc<dyn Fn(&str, &Path) -> Metadata + Send + Sync>);

impl MetadataExtractor {
    pub fn new<F>(extract: F) -> Self
    where
        F: Fn(&str, &Path) -> Metadata + Send + Sync + 'static,
    {
        Self(Arc::new(extract))
    }

    /// 추출 결과를 문서 메타데이터에 병합
    pub fn apply(&self, document: &mut Document, path: &Path) {
        let extracted = (self.0)(&document.content, path);
        document.metadata.extend(extracted);
    }
}

impl fmt::Debug for MetadataExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MetadataExtractor(..)")
    }
}

/// 여러 소스를 순서대로 모두 읽기
pub async fn collect_documents(sources: &[Box<dyn DocumentSource>]) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for source in sources {
        let loaded = source.get_documents().await?;
        tracing::info!("Loaded {} documents from {}", loaded.len(), source.name());
        documents.extend(loaded);
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_metadata_extractor_overrides_base_keys() {
        let extractor = MetadataExtractor::new(|content, path| {
            let mut metadata = Metadata::new();
            metadata.insert("length".to_string(), content.len().to_string());
            metadata.insert("source".to_string(), path.display().to_string().to_uppercase());
            metadata
        });

        let mut document = Document::new("hello")
            .with_metadata("source", "docs/a.txt")
            .with_metadata("filename", "a.txt");
        extractor.apply(&mut document, &PathBuf::from("docs/a.txt"));

        assert_eq!(document.metadata["length"], "5");
        assert_eq!(document.metadata["source"], "DOCS/A.TXT");
        assert_eq!(document.metadata["filename"], "a.txt");
        assert_eq!(format!("{:?}", extractor), "MetadataExtractor(..)");
    }
}
