//! Google Gemini 임베딩
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings
//!
//! `batchEmbedContents` 한 번에 최대 100개 텍스트를 보냅니다.
//! 재시도는 호출하는 쪽(store)이 담당하며, 여기서는 실패를
//! 일시적/영구적으로 분류만 합니다.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Result, RetrievalError};

use super::{EmbeddingKind, EmbeddingProvider};

/// Gemini API 기본 주소
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// 기본 모델
pub const DEFAULT_MODEL: &str = "text-embedding-004";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// batchEmbedContents 요청당 최대 텍스트 수
const MAX_BATCH: usize = 100;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// Config
// ============================================================================

/// Gemini 백엔드 설정
///
/// API 키는 명시적으로 전달해야 합니다 (설정 파일에는 기록하지 않음).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    /// 출력 차원 (outputDimensionality)
    pub dimension: usize,
    pub base_url: String,
    pub timeout_secs: u64,
    /// 분당 최대 요청 수 (무료 티어: 60)
    pub requests_per_minute: u32,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            requests_per_minute: 60,
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

impl GeminiConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(RetrievalError::input(
                "Gemini backend needs an API key.\n\
                 Get your API key at: https://aistudio.google.com/app/apikey",
            ));
        }
        if self.model.trim().is_empty() {
            return Err(RetrievalError::input("Gemini model must not be empty"));
        }
        if self.dimension == 0 {
            return Err(RetrievalError::input("Gemini dimension must be greater than 0"));
        }
        if self.requests_per_minute == 0 {
            return Err(RetrievalError::input("requests_per_minute must be greater than 0"));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            RetrievalError::input(format!("invalid base_url '{}': {}", self.base_url, e))
        })?;
        Ok(())
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Rate Limiter with minimum delay between requests
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: window / max_requests.max(1),
            last_request: None,
        }
    }

    /// 요청 가능 여부 확인 및 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                let wait_time = self.min_delay - elapsed;
                tracing::debug!("Min delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        // 2. 윈도우 밖의 오래된 요청 제거
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. Rate limit 초과 시 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'a str,
    content: EmbedContent<'a>,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

/// 임베딩 용도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// 429, 5xx는 재시도 대상
fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    /// `models/{model}`
    model_path: String,
    model: String,
    dimension: usize,
    endpoint: String,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiEmbedding {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.api_key.unwrap_or_default();

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                RetrievalError::permanent(format!("Failed to create HTTP client: {}", e))
            })?;

        let model_path = format!("models/{}", config.model.trim_start_matches("models/"));
        let endpoint = format!(
            "{}/{}:batchEmbedContents",
            config.base_url.trim_end_matches('/'),
            model_path
        );

        Ok(Self {
            api_key,
            client,
            model_path,
            model: config.model,
            dimension: config.dimension,
            endpoint,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                config.requests_per_minute,
                RATE_LIMIT_WINDOW,
            ))),
        })
    }

    fn request_body<'a>(&'a self, texts: &'a [String], task: TaskType) -> BatchEmbedRequest<'a> {
        BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedRequest {
                    model: &self.model_path,
                    content: EmbedContent {
                        parts: vec![EmbedPart { text }],
                    },
                    task_type: task.as_str(),
                    output_dimensionality: Some(self.dimension),
                })
                .collect(),
        }
    }

    async fn embed_with_task(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(MAX_BATCH) {
            vectors.extend(self.call(group, task).await?);
        }
        Ok(vectors)
    }

    /// API 1회 호출
    async fn call(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f32>>> {
        {
            let mut limiter = self.rate_limiter.lock().await;
            limiter.acquire().await;
        }

        // API 키는 URL이 아닌 헤더로 전송
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(texts, task))
            .send()
            .await
            .map_err(|e| {
                RetrievalError::transient(format!("Failed to send embedding request: {}", e))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                RetrievalError::transient(format!("Failed to read response body: {}", e))
            })?;

        if !status.is_success() {
            let message = match serde_json::from_str::<GeminiError>(&body) {
                Ok(error) => format!(
                    "Gemini API error ({} {}): {}",
                    status, error.error.status, error.error.message
                ),
                Err(_) => format!("Gemini API error ({}): {}", status, body),
            };
            return Err(if is_transient_status(status) {
                RetrievalError::transient(message)
            } else {
                RetrievalError::permanent(message)
            });
        }

        parse_response(&body, texts.len())
    }
}

fn parse_response(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let parsed: BatchEmbedResponse = serde_json::from_str(body).map_err(|e| {
        RetrievalError::permanent(format!("Failed to parse embedding response: {}", e))
    })?;

    if parsed.embeddings.len() != expected {
        return Err(RetrievalError::permanent(format!(
            "Gemini returned {} embeddings for {} texts",
            parsed.embeddings.len(),
            expected
        )));
    }
    Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        tracing::debug!("Embedding {} texts with {}", texts.len(), self.model);
        self.embed_with_task(texts, TaskType::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(&[text.to_string()], TaskType::Query)
            .await?
            .pop()
            .ok_or_else(|| RetrievalError::permanent("Gemini returned no query embedding"))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> EmbeddingKind {
        EmbeddingKind::Gemini
    }
}

// ============================================================================
// Tests
// ============================================================================
