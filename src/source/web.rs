//! 웹 페이지 소스 - URL 본문 추출
//!
//! article > main > body 순서로 본문 영역을 찾아 태그를 제거한 텍스트를 사용합니다.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{Result, RetrievalError};
use crate::knowledge::Document;

use super::DocumentSource;

/// 본문으로 인정하는 최소 길이
const MIN_CONTENT_LEN: usize = 100;

/// 스크랩된 페이지
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: Url,
    pub title: Option<String>,
    /// 본문 텍스트 (HTML 태그 제거됨)
    pub content: String,
}

/// 웹 페이지 소스
pub struct WebPageSource {
    urls: Vec<Url>,
    client: reqwest::Client,
}

impl WebPageSource {
    /// URL 목록 검증 후 생성 (http/https만 허용)
    pub fn new<I, S>(urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = urls
            .into_iter()
            .map(|raw| parse_url(raw.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("anno-vecdb/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RetrievalError::Source(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { urls, client })
    }

    /// URL 하나 가져오기
    pub async fn scrape(&self, url: &Url) -> Result<ScrapedPage> {
        tracing::info!("Scraping: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RetrievalError::Source(format!("Failed to fetch {}: {}", url, e)))?;

        let html = response
            .text()
            .await
            .map_err(|e| RetrievalError::Source(format!("Failed to read {}: {}", url, e)))?;

        Ok(parse_page(url.clone(), &html))
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| RetrievalError::input(format!("invalid URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RetrievalError::input(format!("unsupported URL scheme '{}': {}", other, raw))),
    }
}

/// HTML에서 제목과 본문 추출
pub(crate) fn parse_page(url: Url, html: &str) -> ScrapedPage {
    let document = Html::parse_document(html);
    ScrapedPage {
        url,
        title: extract_title(&document),
        content: extract_content(&document),
    }
}

/// 제목 추출 (<title>, 없으면 <h1>)
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let selector = Selector::parse(tag).ok()?;
        let title = document.select(&selector).next()?.text().collect::<String>();
        let title = title.trim();
        (!title.is_empty()).then(|| title.to_string())
    })
}

/// 본문 추출 (우선순위: article > main > body)
fn extract_content(document: &Html) -> String {
    let selectors = ["article", "main", "[role=main]", ".content", "#content", "body"];

    for selector in selectors {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element_text(&element);
            if text.len() > MIN_CONTENT_LEN {
                return text;
            }
        }
    }

    // 폴백: 짧더라도 body 전체
    Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next().map(|e| element_text(&e)))
        .unwrap_or_default()
}

/// 요소 텍스트 (script/style 제외, 공백 정리)
fn element_text(element: &ElementRef) -> String {
    let mut text = String::new();

    for node in element.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };
        let inside_code = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript"))
                .unwrap_or(false)
        });
        if inside_code {
            continue;
        }
        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    match Regex::new(r"\s+") {
        Ok(re) => re.replace_all(&text, " ").trim().to_string(),
        Err(_) => text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

#[async_trait]
impl DocumentSource for WebPageSource {
    async fn get_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(self.urls.len());

        for url in &self.urls {
            let page = self.scrape(url).await?;
            if page.content.is_empty() {
                tracing::warn!("No content extracted from {}", url);
                continue;
            }

            let mut document = Document::new(page.content).with_metadata("source", url.as_str());
            if let Some(title) = page.title {
                document = document.with_metadata("title", title);
            }
            documents.push(document);
        }

        Ok(documents)
    }

    fn name(&self) -> &str {
        "web"
    }
}
