//! Upload of report/CSV folders to a remote folder store.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::store::{csv_files_in, write_atomic};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("local directory not found: {path}")]
    MissingLocalDir { path: PathBuf },
    #[error("invalid remote folder name: {0:?}")]
    InvalidFolder(String),
    #[error("remote I/O error on {path}: {source}")]
    Remote {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote side of an upload: named folders holding named files.
pub trait RemoteFolderStore {
    /// Creates `folder` when absent; returns whether it was created.
    fn ensure_folder(&self, folder: &str) -> Result<bool, UploadError>;
    /// Stores `bytes` as `folder/name`, replacing any file of the same name.
    fn upload_replace(&self, folder: &str, name: &str, bytes: &[u8]) -> Result<(), UploadError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub folder: String,
    pub folder_created: bool,
    pub uploaded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl UploadReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Uploads every CSV directly inside `local_dir` to `folder`. A file that
/// fails is recorded and the rest still go up.
pub fn upload_csv_directory(
    local_dir: &Path,
    folder: &str,
    store: &dyn RemoteFolderStore,
) -> Result<UploadReport, UploadError> {
    if !local_dir.is_dir() {
        return Err(UploadError::MissingLocalDir {
            path: local_dir.to_path_buf(),
        });
    }

    let folder_created = store.ensure_folder(folder)?;
    let mut report = UploadReport {
        folder: folder.to_string(),
        folder_created,
        ..UploadReport::default()
    };

    for path in csv_files_in(local_dir) {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let outcome = fs::read(&path)
            .map_err(|source| UploadError::Remote {
                path: path.clone(),
                source,
            })
            .and_then(|bytes| store.upload_replace(folder, &name, &bytes));

        match outcome {
            Ok(()) => {
                info!(
                    component = "cloud",
                    event = "upload.file.done",
                    folder,
                    file = %name
                );
                report.uploaded.push(name);
            }
            Err(err) => {
                warn!(
                    component = "cloud",
                    event = "upload.file.failed",
                    folder,
                    file = %name,
                    error = %err
                );
                report.failed.push((name, err.to_string()));
            }
        }
    }

    info!(
        component = "cloud",
        event = "upload.complete",
        folder,
        uploaded = report.uploaded.len(),
        failed = report.failed.len()
    );
    Ok(report)
}

/// Remote store backed by a locally mounted or synced directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRemote {
    root: PathBuf,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn folder_path(&self, folder: &str) -> Result<PathBuf, UploadError> {
        let trimmed = folder.trim();
        let valid = !trimmed.is_empty()
            && !trimmed.contains(['/', '\\'])
            && trimmed != "."
            && trimmed != "..";
        if !valid {
            return Err(UploadError::InvalidFolder(folder.to_string()));
        }
        Ok(self.root.join(trimmed))
    }
}

impl RemoteFolderStore for DirectoryRemote {
    fn ensure_folder(&self, folder: &str) -> Result<bool, UploadError> {
        let path = self.folder_path(folder)?;
        if path.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&path).map_err(|source| UploadError::Remote {
            path: path.clone(),
            source,
        })?;
        Ok(true)
    }

    fn upload_replace(&self, folder: &str, name: &str, bytes: &[u8]) -> Result<(), UploadError> {
        let path = self.folder_path(folder)?.join(name);
        write_atomic(&path, bytes).map_err(|source| UploadError::Remote { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn uploads_csv_files_and_replaces_existing() {
        let local = tempdir().unwrap();
        let remote_root = tempdir().unwrap();
        fs::write(local.path().join("a.csv"), "x\n1\n").unwrap();
        fs::write(local.path().join("b.csv"), "y\n2\n").unwrap();
        fs::write(local.path().join("notes.txt"), "skip").unwrap();
        let remote = DirectoryRemote::new(remote_root.path());

        let first = upload_csv_directory(local.path(), "datos_unificados", &remote).unwrap();
        assert!(first.folder_created);
        assert_eq!(first.uploaded, vec!["a.csv", "b.csv"]);

        fs::write(local.path().join("a.csv"), "x\n9\n").unwrap();
        let second = upload_csv_directory(local.path(), "datos_unificados", &remote).unwrap();
        assert!(!second.folder_created);
        assert!(second.is_success());
        assert_eq!(
            fs::read_to_string(remote_root.path().join("datos_unificados/a.csv")).unwrap(),
            "x\n9\n"
        );
        assert!(!remote_root.path().join("datos_unificados/notes.txt").exists());
    }

    #[test]
    fn missing_local_dir_is_an_error() {
        let remote_root = tempdir().unwrap();
        let remote = DirectoryRemote::new(remote_root.path());
        let err =
            upload_csv_directory(Path::new("/definitely/not/here"), "f", &remote).unwrap_err();
        assert!(matches!(err, UploadError::MissingLocalDir { .. }));
    }

    #[test]
    fn folder_names_cannot_escape_the_root() {
        let remote = DirectoryRemote::new("/tmp/unused");
        assert!(matches!(
            remote.ensure_folder("../etc"),
            Err(UploadError::InvalidFolder(_))
        ));
    }
}
