//! 디스크 영속화 유틸리티
//!
//! - 파일: 임시 파일에 쓰고 fsync 후 rename (부분 기록 상태가 보이지 않음)
//! - 디렉토리: 형제 staging 디렉토리에 전부 기록한 뒤 교체

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, RetrievalError};

/// 파일을 원자적으로 기록
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = sibling(path, "tmp");

    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    Ok(())
}

/// 아티팩트 파일 읽기 (실패 시 IndexCorruption)
pub fn read_artifact(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let path = dir.join(name);
    fs::read(&path)
        .map_err(|e| RetrievalError::corruption(&path, format!("unreadable artifact: {}", e)))
}

/// SHA-256 hex digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// 저장 대상 경로 정리
///
/// `.`, `..`처럼 마지막 이름이 없는 경로는 실제 경로로 바꿉니다.
/// 루트 디렉토리는 대상으로 쓸 수 없습니다.
pub fn resolve_target(target: &Path) -> Result<PathBuf> {
    let cleaned: PathBuf = target.components().collect();
    if cleaned.file_name().is_some() {
        return Ok(cleaned);
    }

    let resolved = fs::canonicalize(&cleaned)
        .map_err(|e| RetrievalError::input(format!("invalid index path {:?}: {}", target, e)))?;
    if resolved.file_name().is_none() {
        return Err(RetrievalError::input(format!(
            "{:?} cannot be used as an index directory",
            target
        )));
    }
    Ok(resolved)
}

/// staging 디렉토리에 기록한 뒤 대상 위치로 교체
///
/// `write`나 교체가 실패하면 staging 디렉토리를 지우고, 기존 대상은 그대로 둡니다.
pub fn write_dir<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let target = resolve_target(target)?;
    let staging = create_staging_dir(&target)?;

    let written = write(&staging).and_then(|()| commit_dir(&staging, &target));
    if written.is_err() {
        discard_dir(&staging);
    }
    written
}

/// 대상 디렉토리 옆에 staging 디렉토리 생성
fn create_staging_dir(target: &Path) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let staging = sibling(target, "staging");
    fs::create_dir(&staging)?;
    Ok(staging)
}

/// staging 디렉토리를 대상 위치로 교체
///
/// 기존 디렉토리는 옆으로 옮겨 두었다가 교체가 끝난 뒤 삭제합니다.
/// 교체에 실패하면 기존 디렉토리를 원위치시킵니다.
fn commit_dir(staging: &Path, target: &Path) -> Result<()> {
    if !target.exists() {
        fs::rename(staging, target)?;
        return Ok(());
    }

    let backup = sibling(target, "old");
    fs::rename(target, &backup)?;

    if let Err(e) = fs::rename(staging, target) {
        if let Err(restore) = fs::rename(&backup, target) {
            tracing::error!("Failed to restore previous index {:?}: {}", target, restore);
        }
        return Err(e.into());
    }

    if let Err(e) = fs::remove_dir_all(&backup) {
        tracing::warn!("Failed to remove previous index {:?}: {}", backup, e);
    }

    Ok(())
}

/// 실패한 staging 디렉토리 정리
fn discard_dir(dir: &Path) {
    if dir.exists() {
        if let Err(e) = fs::remove_dir_all(dir) {
            tracing::warn!("Failed to clean up {:?}: {}", dir, e);
        }
    }
}

/// `.{name}.{uuid}.{suffix}` 형태의 형제 경로
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!(".{}.{}.{}", name, Uuid::new_v4().simple(), suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        // 임시 파일이 남지 않아야 함
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_commit_dir_swaps_existing() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("index");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("old.txt"), b"old").unwrap();

        let staging = create_staging_dir(&target).unwrap();
        fs::write(staging.join("new.txt"), b"new").unwrap();
        commit_dir(&staging, &target).unwrap();

        assert!(target.join("new.txt").exists());
        assert!(!target.join("old.txt").exists());
        assert!(!staging.exists());
        // 백업 디렉토리도 정리되어야 함
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_commit_dir_creates_new() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("nested").join("index");

        let staging = create_staging_dir(&target).unwrap();
        fs::write(staging.join("f"), b"x").unwrap();
        commit_dir(&staging, &target).unwrap();

        assert!(target.join("f").exists());
    }

    #[test]
    fn test_commit_dir_restores_previous_on_failure() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("index");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("old.txt"), b"old").unwrap();

        // 존재하지 않는 staging → 교체 실패
        let result = commit_dir(&root.path().join("missing"), &target);
        assert!(matches!(result, Err(RetrievalError::Io(_))));

        assert_eq!(fs::read(target.join("old.txt")).unwrap(), b"old");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_dir_failure_keeps_target_and_cleans_staging() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("index");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("old.txt"), b"old").unwrap();

        let result = write_dir(&target, |staging| {
            write_atomic(&staging.join("new.txt"), b"new")?;
            Err(RetrievalError::input("interrupted"))
        });
        assert!(matches!(result, Err(RetrievalError::Input(_))));

        assert_eq!(fs::read(target.join("old.txt")).unwrap(), b"old");
        assert!(!target.join("new.txt").exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_dir_success() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("index");

        write_dir(&target, |staging| write_atomic(&staging.join("a"), b"a")).unwrap();
        assert_eq!(fs::read(target.join("a")).unwrap(), b"a");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_resolve_target() {
        let root = TempDir::new().unwrap();
        let index = root.path().join("index");
        fs::create_dir(&index).unwrap();

        assert_eq!(resolve_target(&index.join(".")).unwrap(), index);
        assert_eq!(
            resolve_target(&index.join("..")).unwrap(),
            fs::canonicalize(root.path()).unwrap()
        );
        assert!(matches!(
            resolve_target(Path::new("/")),
            Err(RetrievalError::Input(_))
        ));
        assert!(matches!(
            resolve_target(&root.path().join("missing").join("..")),
            Err(RetrievalError::Input(_))
        ));
    }

    #[test]
    fn test_read_artifact_missing_is_corruption() {
        let dir = TempDir::new().unwrap();
        let err = read_artifact(dir.path(), "missing.bin").unwrap_err();
        assert!(matches!(err, RetrievalError::IndexCorruption { .. }));
    }
}
