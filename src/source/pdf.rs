//! PDF 텍스트 추출
//!
//! pdf-extract 크레이트로 텍스트를 뽑은 뒤 페이지별로 나눕니다.

use std::path::Path;

use regex::Regex;

use crate::error::{Result, RetrievalError};

/// PDF에서 페이지별 텍스트 추출
///
/// (페이지 번호, 텍스트) 목록을 반환합니다. 페이지 번호는 1부터 시작하며,
/// 텍스트가 없는 PDF(스캔 문서 등)는 빈 목록입니다.
pub fn extract_pdf_pages(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path)
        .map_err(|e| RetrievalError::Source(format!("Failed to read PDF {:?}: {}", path, e)))?;

    let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
        RetrievalError::Source(format!("Failed to extract text from PDF {:?}: {}", path, e))
    })?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text)
        .into_iter()
        .enumerate()
        .map(|(i, page)| (i + 1, page))
        .collect())
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // "--- Page 1 ---" 형태의 구분자
    if let Ok(page_pattern) = Regex::new(r"(?m)^\s*[-=]+\s*(?:Page\s*)?\d+\s*[-=]+\s*$") {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}
