//! 자막(트랜스크립트) 소스 - SRT / WebVTT
//!
//! 큐 번호, 타임스탬프, 태그를 제거하고 대사만 이어 붙입니다.
//! 자동 생성 자막처럼 같은 줄이 연속으로 반복되면 한 번만 남깁니다.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::error::{Result, RetrievalError};
use crate::knowledge::Document;

use super::{DocumentSource, MetadataExtractor};

/// 자막 파일 소스
#[derive(Debug, Clone)]
pub struct TranscriptSource {
    paths: Vec<PathBuf>,
    metadata_extractor: Option<MetadataExtractor>,
}

impl TranscriptSource {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            metadata_extractor: None,
        }
    }

    /// 대사 본문과 자막 경로로 메타데이터를 추가
    pub fn with_metadata_extractor(mut self, extractor: MetadataExtractor) -> Self {
        self.metadata_extractor = Some(extractor);
        self
    }

    fn load(&self, path: &Path) -> Result<Option<Document>> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Source(format!("Failed to read transcript {:?}: {}", path, e))
        })?;

        let (text, cue_count) = parse_subtitles(&raw)?;
        if text.is_empty() {
            tracing::warn!("Transcript {:?} has no text", path);
            return Ok(None);
        }

        let video_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut document = Document::new(text)
            .with_metadata("source", path.to_string_lossy())
            .with_metadata("video_id", video_id)
            .with_metadata("cue_count", cue_count.to_string());
        if let Some(extractor) = &self.metadata_extractor {
            extractor.apply(&mut document, path);
        }
        Ok(Some(document))
    }
}

/// 자막 본문을 평문으로 변환
///
/// (텍스트, 큐 개수)를 반환합니다.
pub fn parse_subtitles(raw: &str) -> Result<(String, usize)> {
    let timing = Regex::new(r"^\s*(?:\d+:)?\d{1,2}:\d{2}[.,]\d{3}\s*-->")
        .map_err(|e| RetrievalError::Source(e.to_string()))?;
    let markup = Regex::new(r"<[^>]*>|\{\\[^}]*\}")
        .map_err(|e| RetrievalError::Source(e.to_string()))?;

    let raw = raw.trim_start_matches('\u{feff}');
    let mut lines: Vec<String> = Vec::new();
    let mut cue_count = 0;
    // WEBVTT 헤더, NOTE/STYLE 블록은 빈 줄까지 건너뜀
    let mut skipping_block = false;

    for line in raw.lines() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            skipping_block = false;
            continue;
        }
        if skipping_block {
            continue;
        }
        if trimmed.starts_with("WEBVTT")
            || trimmed.starts_with("NOTE")
            || trimmed == "STYLE"
            || trimmed == "REGION"
        {
            skipping_block = true;
            continue;
        }
        if timing.is_match(trimmed) {
            cue_count += 1;
            continue;
        }
        // SRT 큐 번호
        if trimmed.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let text = markup.replace_all(trimmed, "");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() || lines.last() == Some(&text) {
            continue;
        }
        lines.push(text);
    }

    Ok((lines.join(" "), cue_count))
}

#[async_trait]
impl DocumentSource for TranscriptSource {
    async fn get_documents(&self) -> Result<Vec<Document>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut documents = Vec::new();
            for path in &this.paths {
                if let Some(document) = this.load(path)? {
                    documents.push(document);
                }
            }
            Ok(documents)
        })
        .await
        .map_err(|e| RetrievalError::Task(e.to_string()))?
    }

    fn name(&self) -> &str {
        "transcript"
    }
}
