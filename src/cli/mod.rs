//! CLI 모듈
//!
//! anno-vecdb CLI 명령어 정의 및 구현
//!
//! - `from-text`, `from-csv`, `from-transcript`, `from-url`: 문서 수집 → 인덱스 생성 → 저장
//!   (`--append`면 기존 인덱스에 추가)
//! - `query`: 저장된 인덱스 로드 → 검색
//! - `status`: 매니페스트 확인

use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{default_index_dir, RetrievalConfig};
use crate::embedding::{EmbeddingBackend, EmbeddingKind, GeminiConfig};
use crate::knowledge::{FusionWeights, Manifest, RetrievalStore, SearchMethod, SearchMode};
use crate::source::{
    collect_documents, DelimitedFileSource, DocumentSource, FileTreeSource, TranscriptSource,
    WebPageSource, DEFAULT_DELIMITED_EXTENSION,
};

/// API 키 환경변수 (우선순위 순)
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "anno-vecdb")]
#[command(version, about = "벡터 + BM25 하이브리드 검색 인덱스", long_about = None)]
pub struct Cli {
    /// 디버그 로그 출력
    #[arg(long, global = true)]
    pub debug: bool,

    /// JSON 설정 파일
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 인덱스 디렉토리 (기본: 데이터 디렉토리/anno-vecdb/index)
    #[arg(long, global = true)]
    pub index_dir: Option<PathBuf>,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Default, Args)]
pub struct BackendArgs {
    /// 임베딩 백엔드
    #[arg(long, global = true, value_enum)]
    pub backend: Option<EmbeddingKind>,

    /// 임베딩 모델 (gemini)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// 임베딩 차원
    #[arg(long, global = true)]
    pub dimension: Option<usize>,
}

impl BackendArgs {
    fn is_set(&self) -> bool {
        self.backend.is_some() || self.model.is_some() || self.dimension.is_some()
    }
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// 청크 크기 (grapheme 수)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// 청크 오버랩 (grapheme 수)
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// 기존 인덱스에 추가 (청킹/백엔드는 기존 인덱스를 따름)
    #[arg(long, conflicts_with_all = ["chunk_size", "chunk_overlap"])]
    pub append: bool,
}

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Vector,
    Lexical,
    Hybrid,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 디렉토리의 텍스트/PDF 파일로 인덱스 생성
    FromText {
        /// 수집할 디렉토리 (여러 개 가능)
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// 확장자 (반복 가능)
        #[arg(long = "ext", default_values_t = vec!["txt".to_string()])]
        extensions: Vec<String>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// CSV/TSV 파일 또는 디렉토리로 인덱스 생성
    FromCsv {
        /// CSV 파일, 또는 CSV 파일이 있는 디렉토리 (하위 디렉토리 제외)
        path: PathBuf,

        /// 디렉토리 모드에서 읽을 확장자
        #[arg(long, default_value = DEFAULT_DELIMITED_EXTENSION)]
        ext: String,

        /// 본문으로 사용할 열 (쉼표 구분)
        #[arg(long, value_delimiter = ',')]
        content_columns: Vec<String>,

        /// 메타데이터로 사용할 열 (쉼표 구분)
        #[arg(long, value_delimiter = ',')]
        metadata_columns: Vec<String>,

        /// 구분자 (기본: ',')
        #[arg(long, default_value_t = ',')]
        delimiter: char,

        /// Q&A 모드: 질문 열
        #[arg(long, requires = "answer_column")]
        question_column: Option<String>,

        /// Q&A 모드: 답 열
        #[arg(long, requires = "question_column")]
        answer_column: Option<String>,

        /// Q&A 모드에서 답을 본문에 넣지 않음
        #[arg(long)]
        question_only: bool,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// SRT/WebVTT 자막으로 인덱스 생성
    FromTranscript {
        /// 자막 파일
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// 웹 페이지로 인덱스 생성
    FromUrl {
        /// URL 목록
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// 인덱스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short = 'k', long, default_value = "4")]
        top_k: usize,

        /// 검색 모드
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: ModeArg,

        /// hybrid 모드의 벡터 가중치 (키워드 = 1 - 값)
        #[arg(long)]
        vector_weight: Option<f32>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 인덱스 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => RetrievalConfig::from_file(path)
            .with_context(|| format!("설정 파일 로드 실패: {:?}", path))?,
        None => RetrievalConfig::default(),
    };
    let index_dir = cli.index_dir.clone().unwrap_or_else(default_index_dir);

    match cli.command {
        Commands::FromText {
            dirs,
            extensions,
            build,
        } => {
            let source = FileTreeSource::from_roots(dirs).with_extensions(extensions);
            cmd_build(Box::new(source), config, &cli.backend, &build, &index_dir).await
        }
        Commands::FromCsv {
            path,
            ext,
            content_columns,
            metadata_columns,
            delimiter,
            question_column,
            answer_column,
            question_only,
            build,
        } => {
            if !delimiter.is_ascii() {
                bail!("구분자는 ASCII 문자여야 합니다: {:?}", delimiter);
            }
            let source = match (question_column, answer_column) {
                (Some(question), Some(answer)) => {
                    DelimitedFileSource::question_answer(path, question, answer)
                        .embed_answer(!question_only)
                }
                _ => {
                    if content_columns.is_empty() {
                        bail!(
                            "--content-columns 또는 --question-column/--answer-column을 \
                             지정해야 합니다"
                        );
                    }
                    DelimitedFileSource::new(path, content_columns)
                }
            }
            .with_metadata_columns(metadata_columns)
            .with_delimiter(delimiter as u8)
            .with_extension(ext);

            cmd_build(Box::new(source), config, &cli.backend, &build, &index_dir).await
        }
        Commands::FromTranscript { files, build } => {
            let source = TranscriptSource::new(files);
            cmd_build(Box::new(source), config, &cli.backend, &build, &index_dir).await
        }
        Commands::FromUrl { urls, build } => {
            let source = WebPageSource::new(&urls).context("URL 확인 실패")?;
            cmd_build(Box::new(source), config, &cli.backend, &build, &index_dir).await
        }
        Commands::Query {
            query,
            top_k,
            mode,
            vector_weight,
            json,
        } => {
            let explicit_backend = cli.config.is_some() || cli.backend.is_set();
            cmd_query(
                &query,
                top_k,
                mode,
                vector_weight,
                json,
                config,
                explicit_backend.then_some(&cli.backend),
                &index_dir,
            )
            .await
        }
        Commands::Status => cmd_status(&index_dir),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱스 생성 명령어 (from-*)
async fn cmd_build(
    source: Box<dyn DocumentSource>,
    mut config: RetrievalConfig,
    backend: &BackendArgs,
    build: &BuildArgs,
    index_dir: &Path,
) -> Result<()> {
    if let Some(size) = build.chunk_size {
        config.chunking.chunk_size = size;
    }
    if let Some(overlap) = build.chunk_overlap {
        config.chunking.chunk_overlap = overlap;
    }

    // --append: 기존 인덱스의 백엔드를 그대로 사용 (플래그가 있으면 플래그 우선)
    let existing = if build.append && index_dir.exists() {
        Some(Manifest::load(index_dir).context("기존 인덱스를 읽을 수 없습니다")?)
    } else {
        None
    };
    let selected = match &existing {
        Some(manifest) if !backend.is_set() => backend_for_manifest(manifest),
        _ => apply_backend_args(config.embedding.backend, backend),
    };
    config.embedding.backend = with_api_key(selected)?;
    config.validate().context("잘못된 설정")?;

    let provider = config.embedding.backend.clone().into_provider()?;
    let chunking = config.chunking;

    println!("[*] 문서 수집 중 ({})...", source.name());
    let documents = collect_documents(&[source]).await.context("문서 수집 실패")?;
    if documents.is_empty() {
        println!("[!] 수집된 문서가 없습니다.");
        return Ok(());
    }
    println!("[*] 문서 {} 건 수집", documents.len());

    let store = RetrievalStore::new(provider, config)?;
    let report = match existing {
        Some(manifest) => {
            store.load(index_dir).await.context("기존 인덱스 로드 실패")?;
            println!("[*] 기존 인덱스(청크 {} 개)에 추가 중...", manifest.chunk_count);
            store
                .add_documents(&documents)
                .await
                .context("인덱스 추가 실패")?
        }
        None => {
            println!(
                "[*] 인덱스 생성 중 (청크 크기 {}, 오버랩 {})...",
                chunking.chunk_size, chunking.chunk_overlap
            );
            store
                .build(&documents, chunking)
                .await
                .context("인덱스 생성 실패")?
        }
    };

    store.save(index_dir).await.context("인덱스 저장 실패")?;

    println!(
        "[OK] 청크 {} 개 인덱싱 완료 (추가 {}, 차원 {}, {} ms)",
        report.chunk_count, report.added_chunk_count, report.dimension, report.elapsed_ms
    );
    println!("     저장 위치: {}", index_dir.display());
    Ok(())
}

/// 검색 명령어 (query)
#[allow(clippy::too_many_arguments)]
async fn cmd_query(
    query: &str,
    top_k: usize,
    mode: ModeArg,
    vector_weight: Option<f32>,
    json: bool,
    mut config: RetrievalConfig,
    backend: Option<&BackendArgs>,
    index_dir: &Path,
) -> Result<()> {
    // 백엔드를 지정하지 않았으면 인덱스를 만든 모델을 그대로 사용
    let backend = match backend {
        Some(args) => apply_backend_args(config.embedding.backend, args),
        None => {
            let manifest = Manifest::load(index_dir).context("인덱스를 찾을 수 없습니다")?;
            backend_for_manifest(&manifest)
        }
    };
    config.embedding.backend = with_api_key(backend)?;

    let search_mode = match mode {
        ModeArg::Vector => SearchMode::Vector,
        ModeArg::Lexical => SearchMode::Lexical,
        ModeArg::Hybrid => SearchMode::Hybrid(match vector_weight {
            Some(w) => FusionWeights::from_vector_weight(w)?,
            None => config.fusion.weights,
        }),
    };

    let provider = config.embedding.backend.clone().into_provider()?;
    let store = RetrievalStore::new(provider, config)?;
    store.load(index_dir).await.context("인덱스 로드 실패")?;

    let hits = store.query(query, top_k, search_mode).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let method_str = match hit.method {
            SearchMethod::Vector => "VEC",
            SearchMethod::Lexical => "LEX",
            SearchMethod::Hybrid => "HYB",
        };

        println!(
            "{}. [{}] [점수: {:.4}] Chunk #{}",
            i + 1,
            method_str,
            hit.score,
            hit.chunk_id
        );
        if let Some(source) = hit.metadata.get("source") {
            println!("   출처: {}", source);
        }
        println!("   내용: {}", truncate_text(&hit.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(index_dir: &Path) -> Result<()> {
    println!("anno-vecdb v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 인덱스 디렉토리: {}", index_dir.display());

    if api_key_from_env().is_some() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정 (gemini 백엔드 사용 시 필요)");
    }

    if !index_dir.exists() {
        println!("[!] 인덱스가 없습니다. from-text 등으로 먼저 생성하세요.");
        return Ok(());
    }

    match Manifest::load(index_dir) {
        Ok(manifest) => {
            println!("[OK] 청크: {} 개", manifest.chunk_count);
            println!(
                "     임베딩: {:?} {} (차원 {}, {:?})",
                manifest.embedding_kind,
                manifest.embedding_model_id,
                manifest.vector_dimension,
                manifest.similarity
            );
            println!(
                "     청킹: 크기 {}, 오버랩 {}",
                manifest.chunk_size, manifest.chunk_overlap
            );
            let built = manifest.build_timestamp.format("%Y-%m-%d %H:%M:%S UTC");
            println!("     생성: {}", built);
            println!("     크기: {}", format_bytes(directory_size(index_dir)));
        }
        Err(e) => println!("[!] 매니페스트를 읽을 수 없습니다: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// CLI 플래그로 백엔드 설정 덮어쓰기
fn apply_backend_args(current: EmbeddingBackend, args: &BackendArgs) -> EmbeddingBackend {
    let mut backend = match (args.backend, current) {
        (Some(EmbeddingKind::Hashing), EmbeddingBackend::Gemini(_)) => EmbeddingBackend::default(),
        (Some(EmbeddingKind::Gemini), EmbeddingBackend::Hashing { .. }) => {
            EmbeddingBackend::Gemini(GeminiConfig::default())
        }
        (_, current) => current,
    };

    match &mut backend {
        EmbeddingBackend::Hashing { dimension } => {
            if let Some(d) = args.dimension {
                *dimension = d;
            }
        }
        EmbeddingBackend::Gemini(config) => {
            if let Some(d) = args.dimension {
                config.dimension = d;
            }
            if let Some(model) = &args.model {
                config.model = model.clone();
            }
        }
    }
    backend
}

/// 매니페스트에 기록된 백엔드 종류와 모델로 백엔드 구성
fn backend_for_manifest(manifest: &Manifest) -> EmbeddingBackend {
    match manifest.embedding_kind {
        EmbeddingKind::Hashing => EmbeddingBackend::Hashing {
            dimension: manifest.vector_dimension,
        },
        EmbeddingKind::Gemini => EmbeddingBackend::Gemini(GeminiConfig {
            model: manifest.embedding_model_id.clone(),
            dimension: manifest.vector_dimension,
            ..GeminiConfig::default()
        }),
    }
}

/// gemini 백엔드에 환경변수의 API 키 채우기
fn with_api_key(backend: EmbeddingBackend) -> Result<EmbeddingBackend> {
    Ok(match backend {
        EmbeddingBackend::Gemini(config) if config.api_key.is_none() => {
            let api_key = api_key_from_env().context(
                "API 키가 설정되지 않았습니다.\n\n\
                 설정 방법:\n  \
                 export GEMINI_API_KEY=your-api-key\n  \
                 또는\n  \
                 export GOOGLE_AI_API_KEY=your-api-key\n\n\
                 API 키 발급: https://aistudio.google.com/app/apikey",
            )?;
            EmbeddingBackend::Gemini(config.with_api_key(api_key))
        }
        other => other,
    })
}

/// API 키 로드 (GEMINI_API_KEY > GOOGLE_AI_API_KEY)
fn api_key_from_env() -> Option<String> {
    API_KEY_VARS.iter().find_map(|name| {
        std::env::var(name).ok().filter(|key| !key.is_empty()).map(|key| {
            tracing::debug!("Using API key from {}", name);
            key
        })
    })
}

/// 디렉토리 내 파일 크기 합계
fn directory_size(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len() as usize)
                .sum()
        })
        .unwrap_or(0)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Bm25Params, ChunkConfig, Similarity};
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query_command() {
        let cli = Cli::try_parse_from([
            "anno-vecdb",
            "query",
            "cat",
            "-k",
            "3",
            "--mode",
            "lexical",
            "--backend",
            "hashing",
        ])
        .unwrap();

        assert_eq!(cli.backend.backend, Some(EmbeddingKind::Hashing));
        match cli.command {
            Commands::Query { query, top_k, mode, .. } => {
                assert_eq!(query, "cat");
                assert_eq!(top_k, 3);
                assert_eq!(mode, ModeArg::Lexical);
            }
            _ => panic!("expected query command"),
        }
    }

    #[test]
    fn test_parse_csv_columns() {
        let cli = Cli::try_parse_from([
            "anno-vecdb",
            "from-csv",
            "data.csv",
            "--content-columns",
            "title,body",
            "--chunk-size",
            "500",
        ])
        .unwrap();

        match cli.command {
            Commands::FromCsv {
                content_columns,
                build,
                delimiter,
                ext,
                ..
            } => {
                assert_eq!(content_columns, vec!["title", "body"]);
                assert_eq!(build.chunk_size, Some(500));
                assert!(!build.append);
                assert_eq!(delimiter, ',');
                assert_eq!(ext, "csv");
            }
            _ => panic!("expected from-csv command"),
        }
    }

    #[test]
    fn test_parse_text_dirs_and_csv_directory() {
        let cli = Cli::try_parse_from([
            "anno-vecdb",
            "from-text",
            "docs",
            "notes",
            "--ext",
            "md",
            "--append",
        ])
        .unwrap();
        match cli.command {
            Commands::FromText {
                dirs,
                extensions,
                build,
            } => {
                assert_eq!(dirs, vec![PathBuf::from("docs"), PathBuf::from("notes")]);
                assert_eq!(extensions, vec!["md"]);
                assert!(build.append);
            }
            _ => panic!("expected from-text command"),
        }

        assert!(Cli::try_parse_from(["anno-vecdb", "from-text"]).is_err());
        assert!(Cli::try_parse_from([
            "anno-vecdb",
            "from-text",
            "docs",
            "--append",
            "--chunk-size",
            "10"
        ])
        .is_err());

        let cli = Cli::try_parse_from([
            "anno-vecdb",
            "from-csv",
            "exports",
            "--ext",
            "tsv",
            "--content-columns",
            "text",
        ])
        .unwrap();
        match cli.command {
            Commands::FromCsv { path, ext, .. } => {
                assert_eq!(path, PathBuf::from("exports"));
                assert_eq!(ext, "tsv");
            }
            _ => panic!("expected from-csv command"),
        }
    }

    #[test]
    fn test_apply_backend_args() {
        let args = BackendArgs {
            backend: Some(EmbeddingKind::Gemini),
            model: Some("gemini-embedding-001".to_string()),
            dimension: Some(1536),
        };
        match apply_backend_args(EmbeddingBackend::default(), &args) {
            EmbeddingBackend::Gemini(config) => {
                assert_eq!(config.model, "gemini-embedding-001");
                assert_eq!(config.dimension, 1536);
            }
            other => panic!("unexpected backend: {:?}", other),
        }

        let args = BackendArgs {
            dimension: Some(128),
            ..BackendArgs::default()
        };
        assert_eq!(
            apply_backend_args(EmbeddingBackend::default(), &args),
            EmbeddingBackend::Hashing { dimension: 128 }
        );
    }

    #[test]
    fn test_backend_for_manifest() {
        let manifest = Manifest::new(
            EmbeddingKind::Hashing,
            "hashing-64",
            64,
            Similarity::Cosine,
            ChunkConfig::default(),
            1,
            Bm25Params::default(),
        );
        assert_eq!(
            backend_for_manifest(&manifest),
            EmbeddingBackend::Hashing { dimension: 64 }
        );

        let manifest = Manifest::new(
            EmbeddingKind::Gemini,
            "text-embedding-004",
            768,
            Similarity::Cosine,
            ChunkConfig::default(),
            1,
            Bm25Params::default(),
        );
        match backend_for_manifest(&manifest) {
            EmbeddingBackend::Gemini(config) => {
                assert_eq!(config.model, "text-embedding-004");
                assert_eq!(config.dimension, 768);
            }
            other => panic!("unexpected backend: {:?}", other),
        }

        // 모델 이름이 아니라 기록된 종류로 결정
        let manifest = Manifest::new(
            EmbeddingKind::Gemini,
            "hashing-lookalike",
            256,
            Similarity::Cosine,
            ChunkConfig::default(),
            1,
            Bm25Params::default(),
        );
        assert!(matches!(backend_for_manifest(&manifest), EmbeddingBackend::Gemini(_)));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        assert_eq!(truncate_text(korean, 5), "안녕하세요...");
    }
}
