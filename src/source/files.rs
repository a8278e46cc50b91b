//! 파일 트리 소스
//!
//! 디렉토리를 재귀적으로 훑어서 지정한 확장자의 파일을 문서로 만듭니다.
//! .gitignore 패턴을 존중하며, PDF는 페이지마다 문서 하나가 됩니다.
//! 루트 디렉토리를 여러 개 주면 지정한 순서대로 읽습니다.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ignore::WalkBuilder;

use crate::error::{Result, RetrievalError};
use crate::knowledge::Document;

use super::pdf::extract_pdf_pages;
use super::{DocumentSource, MetadataExtractor};

/// 파일 트리 소스
#[derive(Debug, Clone)]
pub struct FileTreeSource {
    roots: Vec<PathBuf>,
    /// 소문자, 점 없이 (예: "txt")
    extensions: Vec<String>,
    respect_gitignore: bool,
    include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    max_file_size: u64,
    metadata_extractor: Option<MetadataExtractor>,
}

impl FileTreeSource {
    /// 기본: `.txt` 파일만, .gitignore 존중, 숨김 파일 제외, 10MB 제한
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_roots([root])
    }

    /// 여러 루트 디렉토리 (설정은 `new`와 같음)
    pub fn from_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            extensions: vec!["txt".to_string()],
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024,
            metadata_extractor: None,
        }
    }

    /// 수집할 확장자 지정 (".md", "md" 모두 허용)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn respect_gitignore(mut self, respect: bool) -> Self {
        self.respect_gitignore = respect;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// 파일 본문과 경로로 메타데이터를 추가
    pub fn with_metadata_extractor(mut self, extractor: MetadataExtractor) -> Self {
        self.metadata_extractor = Some(extractor);
        self
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// 대상 파일 목록 (루트 순서, 루트 안에서는 경로순)
    fn collect_paths(&self) -> Result<Vec<PathBuf>> {
        if self.roots.is_empty() {
            return Err(RetrievalError::input("no directories to read"));
        }
        if let Some(missing) = self.roots.iter().find(|root| !root.is_dir()) {
            return Err(RetrievalError::Source(format!("Directory not found: {:?}", missing)));
        }

        let mut paths = Vec::new();
        for root in &self.roots {
            paths.extend(self.walk(root));
        }
        Ok(paths)
    }

    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(root)
            .hidden(!self.include_hidden)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .require_git(false)
            .build();

        let mut paths = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            if !self.matches_extension(path) {
                continue;
            }
            if self.max_file_size > 0 {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if size > self.max_file_size {
                    tracing::debug!("Skipping large file: {:?} ({} bytes)", path, size);
                    continue;
                }
            }
            paths.push(path.to_path_buf());
        }

        paths.sort();
        paths
    }

    /// 파일 하나를 문서로 변환 (추출기 적용)
    fn load_file(&self, path: &Path) -> Vec<Document> {
        let mut documents = self.read_file(path);
        if let Some(extractor) = &self.metadata_extractor {
            for document in &mut documents {
                extractor.apply(document, path);
            }
        }
        documents
    }

    /// 파일 읽기 (읽을 수 없으면 건너뜀)
    fn read_file(&self, path: &Path) -> Vec<Document> {
        let source = path.to_string_lossy().into_owned();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("pdf"))
            .unwrap_or(false);

        if is_pdf {
            return match extract_pdf_pages(path) {
                Ok(pages) => pages
                    .into_iter()
                    .map(|(page, text)| {
                        Document::new(text)
                            .with_metadata("source", source.as_str())
                            .with_metadata("filename", filename.as_str())
                            .with_metadata("page", page.to_string())
                    })
                    .collect(),
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", path, e);
                    vec![]
                }
            };
        }

        match std::fs::read_to_string(path) {
            Ok(content) if content.is_empty() => {
                tracing::debug!("Skipping empty file: {:?}", path);
                vec![]
            }
            Ok(content) => vec![Document::new(content)
                .with_metadata("source", source)
                .with_metadata("filename", filename)],
            Err(e) => {
                tracing::warn!("Skipping unreadable file {:?}: {}", path, e);
                vec![]
            }
        }
    }
}

#[async_trait]
impl DocumentSource for FileTreeSource {
    async fn get_documents(&self) -> Result<Vec<Document>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let paths = this.collect_paths()?;
            let documents: Vec<Document> = paths.iter().flat_map(|p| this.load_file(p)).collect();
            tracing::info!(
                "Collected {} documents from {} files in {:?}",
                documents.len(),
                paths.len(),
                this.roots
            );
            Ok(documents)
        })
        .await
        .map_err(|e| RetrievalError::Task(e.to_string()))?
    }

    fn name(&self) -> &str {
        "files"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.txt"), "second file").unwrap();
        fs::write(dir.path().join("a.txt"), "first file").unwrap();
        fs::write(dir.path().join("notes.md"), "# markdown").unwrap();
        fs::write(dir.path().join("empty.txt"), "").unwrap();
        fs::write(dir.path().join("binary.txt"), [0xff, 0xfe, 0x00]).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), "nested file").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_collects_text_files_in_path_order() {
        let dir = tree();
        let documents = FileTreeSource::new(dir.path()).get_documents().await.unwrap();

        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["first file", "second file", "nested file"]);
        assert_eq!(documents[0].metadata.get("filename").map(String::as_str), Some("a.txt"));
        assert!(documents[0].metadata["source"].ends_with("a.txt"));
    }

    #[tokio::test]
    async fn test_extension_filter() {
        let dir = tree();
        let documents = FileTreeSource::new(dir.path())
            .with_extensions([".md"])
            .get_documents()
            .await
            .unwrap();

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].content, "# markdown");
    }

    #[tokio::test]
    async fn test_respects_gitignore() {
        let dir = tree();
        fs::write(dir.path().join(".gitignore"), "nested/\n").unwrap();

        let documents = FileTreeSource::new(dir.path()).get_documents().await.unwrap();
        assert_eq!(documents.len(), 2);

        let documents = FileTreeSource::new(dir.path())
            .respect_gitignore(false)
            .get_documents()
            .await
            .unwrap();
        assert_eq!(documents.len(), 3);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let dir = tree();
        let documents = FileTreeSource::new(dir.path())
            .max_file_size(10)
            .get_documents()
            .await
            .unwrap();

        // "first file"(10 bytes)만 통과
        assert_eq!(documents.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let result = FileTreeSource::new("/nonexistent/dir").get_documents().await;
        assert!(matches!(result, Err(RetrievalError::Source(_))));
    }

    #[tokio::test]
    async fn test_multiple_roots_in_given_order() {
        let first = tree();
        let second = TempDir::new().unwrap();
        fs::write(second.path().join("z.txt"), "other root").unwrap();

        let documents = FileTreeSource::from_roots([second.path(), first.path()])
            .get_documents()
            .await
            .unwrap();
        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["other root", "first file", "second file", "nested file"]);

        let missing = first.path().join("missing");
        let result = FileTreeSource::from_roots([first.path(), missing.as_path()])
            .get_documents()
            .await;
        assert!(matches!(result, Err(RetrievalError::Source(_))));

        let result = FileTreeSource::from_roots(Vec::<PathBuf>::new()).get_documents().await;
        assert!(matches!(result, Err(RetrievalError::Input(_))));
    }

    #[tokio::test]
    async fn test_metadata_extractor_merges_over_base() {
        let dir = tree();
        let extractor = MetadataExtractor::new(|content, path| {
            let mut metadata = crate::knowledge::Metadata::new();
            metadata.insert("words".to_string(), content.split_whitespace().count().to_string());
            if path.ends_with("a.txt") {
                metadata.insert("filename".to_string(), "renamed".to_string());
            }
            metadata
        });

        let documents = FileTreeSource::new(dir.path())
            .with_metadata_extractor(extractor)
            .get_documents()
            .await
            .unwrap();

        assert_eq!(documents[0].metadata["words"], "2");
        assert_eq!(documents[0].metadata["filename"], "renamed");
        assert_eq!(documents[1].metadata["filename"], "b.txt");
        assert!(documents[1].metadata["source"].ends_with("b.txt"));
    }
}
