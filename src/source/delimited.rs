//! 구분자 파일 소스 (CSV/TSV)
//!
//! 행마다 문서 하나를 만듭니다. 경로가 디렉토리면 그 안(하위 디렉토리 제외)의
//! 지정 확장자 파일을 이름순으로 모두 읽습니다.
//!
//! - 일반 모드: 지정한 열을 `열이름: 값` 줄로 이어서 본문 생성
//! - Q&A 모드: `question: ...\nanswer: ...` 본문, 질문/답이 빈 행은 건너뜀

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Result, RetrievalError};
use crate::knowledge::Document;

use super::DocumentSource;

/// 디렉토리 모드 기본 확장자
pub const DEFAULT_DELIMITED_EXTENSION: &str = "csv";

/// 행 → 문서 변환 방식
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelimitedMode {
    /// 본문으로 쓸 열 목록
    Columns { content_columns: Vec<String> },
    /// 질문/답 열
    QuestionAnswer {
        question_column: String,
        answer_column: String,
        /// false면 질문만 본문에 포함
        embed_answer: bool,
    },
}

/// CSV/TSV 소스
#[derive(Debug, Clone)]
pub struct DelimitedFileSource {
    path: PathBuf,
    mode: DelimitedMode,
    metadata_columns: Vec<String>,
    delimiter: u8,
    /// 디렉토리 모드 확장자 (소문자, 점 없이)
    extension: String,
}

impl DelimitedFileSource {
    /// 일반 모드 (쉼표 구분)
    pub fn new<I, S>(path: impl Into<PathBuf>, content_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            mode: DelimitedMode::Columns {
                content_columns: content_columns.into_iter().map(Into::into).collect(),
            },
            metadata_columns: vec![],
            delimiter: b',',
            extension: DEFAULT_DELIMITED_EXTENSION.to_string(),
        }
    }

    /// Q&A 모드
    pub fn question_answer(
        path: impl Into<PathBuf>,
        question_column: impl Into<String>,
        answer_column: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            mode: DelimitedMode::QuestionAnswer {
                question_column: question_column.into(),
                answer_column: answer_column.into(),
                embed_answer: true,
            },
            metadata_columns: vec![],
            delimiter: b',',
            extension: DEFAULT_DELIMITED_EXTENSION.to_string(),
        }
    }

    pub fn with_metadata_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// 디렉토리 모드에서 읽을 확장자 (".tsv", "tsv" 모두 허용)
    pub fn with_extension(mut self, extension: impl AsRef<str>) -> Self {
        self.extension = extension.as_ref().trim_start_matches('.').to_lowercase();
        self
    }

    /// Q&A 모드에서 답을 본문에 넣을지
    pub fn embed_answer(mut self, embed: bool) -> Self {
        if let DelimitedMode::QuestionAnswer { embed_answer, .. } = &mut self.mode {
            *embed_answer = embed;
        }
        self
    }

    fn read(&self) -> Result<Vec<Document>> {
        if !self.path.is_dir() {
            return self.read_file(&self.path);
        }

        let files = self.directory_files()?;
        if files.is_empty() {
            tracing::warn!("No *.{} files in {:?}", self.extension, self.path);
        }
        let mut documents = Vec::new();
        for file in &files {
            documents.extend(self.read_file(file)?);
        }
        Ok(documents)
    }

    /// 디렉토리 바로 아래의 대상 파일 (이름순)
    fn directory_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.path).map_err(|e| {
            RetrievalError::Source(format!("Failed to read directory {:?}: {}", self.path, e))
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
                .unwrap_or(false);
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<Document>> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(|e| source_error(path, e))?;

        let headers: HashMap<String, usize> = reader
            .headers()
            .map_err(|e| source_error(path, e))?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();

        self.check_columns(path, &headers)?;

        let source = path.to_string_lossy().into_owned();
        let mut documents = Vec::new();

        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| source_error(path, e))?;
            let field = |column: &str| -> Option<&str> {
                headers.get(column).and_then(|&i| record.get(i)).map(str::trim)
            };

            let mut document = match &self.mode {
                DelimitedMode::Columns { content_columns } => {
                    let content = content_columns
                        .iter()
                        .filter_map(|column| {
                            field(column).map(|value| format!("{}: {}", column, value))
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    Document::new(content)
                }
                DelimitedMode::QuestionAnswer {
                    question_column,
                    answer_column,
                    embed_answer,
                } => {
                    let (Some(question), Some(answer)) =
                        (field(question_column), field(answer_column))
                    else {
                        continue;
                    };
                    if question.is_empty() || answer.is_empty() {
                        tracing::debug!("Skipping row {} without question or answer", row);
                        continue;
                    }
                    let content = if *embed_answer {
                        format!("question: {}\nanswer: {}", question, answer)
                    } else {
                        question.to_string()
                    };
                    Document::new(content)
                        .with_metadata("question", question)
                        .with_metadata("answer", answer)
                }
            };

            if document.content.is_empty() {
                continue;
            }

            document = document
                .with_metadata("source", source.as_str())
                .with_metadata("row", row.to_string());
            for column in &self.metadata_columns {
                if let Some(value) = field(column) {
                    document = document.with_metadata(column.as_str(), value);
                }
            }
            documents.push(document);
        }

        Ok(documents)
    }

    /// 필요한 열이 헤더에 있는지 확인
    fn check_columns(&self, path: &Path, headers: &HashMap<String, usize>) -> Result<()> {
        let required: Vec<&String> = match &self.mode {
            DelimitedMode::Columns { content_columns } => {
                if !content_columns.iter().any(|c| headers.contains_key(c)) {
                    return Err(RetrievalError::Source(format!(
                        "{:?} has none of the content columns {:?}",
                        path, content_columns
                    )));
                }
                for column in content_columns.iter().filter(|c| !headers.contains_key(*c)) {
                    tracing::warn!("Column '{}' not found in {:?}", column, path);
                }
                vec![]
            }
            DelimitedMode::QuestionAnswer {
                question_column,
                answer_column,
                ..
            } => vec![question_column, answer_column],
        };

        for column in required {
            if !headers.contains_key(column) {
                return Err(RetrievalError::Source(format!(
                    "{:?} has no column '{}'",
                    path, column
                )));
            }
        }
        Ok(())
    }
}

fn source_error(path: &Path, e: csv::Error) -> RetrievalError {
    RetrievalError::Source(format!("Failed to read {:?}: {}", path, e))
}

#[async_trait]
impl DocumentSource for DelimitedFileSource {
    async fn get_documents(&self) -> Result<Vec<Document>> {
        let this = self.clone();
        let documents = tokio::task::spawn_blocking(move || this.read())
            .await
            .map_err(|e| RetrievalError::Task(e.to_string()))??;

        tracing::info!("Loaded {} rows from {:?}", documents.len(), self.path);
        Ok(documents)
    }

    fn name(&self) -> &str {
        "delimited"
    }
}
