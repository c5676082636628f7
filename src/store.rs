//! On-disk page store: `proyecto_<id>/<device_code>/<start_date>/<page>.csv`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

use crate::timestamp::format_date;

const PROJECT_DIR_PREFIX: &str = "proyecto_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    pub project_id: String,
    pub path: PathBuf,
    pub devices: Vec<DeviceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub code: String,
    pub path: PathBuf,
    pub date_folders: Vec<DateFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFolder {
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<PathBuf>,
}

impl DeviceEntry {
    pub fn files(&self) -> impl Iterator<Item = (&DateFolder, &Path)> {
        self.date_folders.iter().flat_map(|folder| {
            folder
                .files
                .iter()
                .map(move |file| (folder, file.as_path()))
        })
    }

    pub fn file_count(&self) -> usize {
        self.date_folders.iter().map(|folder| folder.files.len()).sum()
    }
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(format!("{PROJECT_DIR_PREFIX}{project_id}"))
    }

    pub fn device_dir(&self, project_id: &str, device_code: &str) -> PathBuf {
        self.project_dir(project_id).join(device_code)
    }

    pub fn page_dir(&self, project_id: &str, device_code: &str, start_date: NaiveDate) -> PathBuf {
        self.device_dir(project_id, device_code)
            .join(format_date(start_date))
    }

    /// Enumerates projects, devices, date folders and their CSV files in name order.
    pub fn scan(&self) -> Vec<ProjectEntry> {
        let mut projects = Vec::new();
        for project_path in sorted_subdirs(&self.root) {
            let Some(project_id) = dir_name(&project_path)
                .and_then(|name| name.strip_prefix(PROJECT_DIR_PREFIX).map(str::to_string))
            else {
                continue;
            };

            let devices = sorted_subdirs(&project_path)
                .into_iter()
                .filter_map(|device_path| {
                    let code = dir_name(&device_path)?.to_string();
                    let date_folders = sorted_subdirs(&device_path)
                        .into_iter()
                        .filter_map(|date_path| {
                            Some(DateFolder {
                                name: dir_name(&date_path)?.to_string(),
                                files: csv_files_in(&date_path),
                                path: date_path,
                            })
                        })
                        .collect();
                    Some(DeviceEntry {
                        code,
                        path: device_path,
                        date_folders,
                    })
                })
                .collect();

            projects.push(ProjectEntry {
                project_id,
                path: project_path,
                devices,
            });
        }
        projects
    }
}

/// Page file name keyed by the page's newest insertion date, or by capture
/// time when the page carries no usable insertion date.
pub fn page_file_name(
    device_code: &str,
    page_number: usize,
    newest_insertion: Option<NaiveDate>,
    captured_at: NaiveDateTime,
) -> String {
    let key = match newest_insertion {
        Some(date) => date.format("%Y%m%d").to_string(),
        None => captured_at.format("%Y%m%d_%H%M%S").to_string(),
    };
    format!("{device_code}_paquete_{page_number:03}_{key}.csv")
}

/// First free path for `file_name` in `dir`; existing pages are never replaced.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, extension)) => (stem, format!(".{extension}")),
        None => (file_name, String::new()),
    };
    (1u32..)
        .map(|suffix| dir.join(format!("{stem}_{suffix}{extension}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            )
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(tmp_path, path)?;
    Ok(())
}

/// CSV files anywhere below `dir`, sorted by path.
pub fn csv_files_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut out = csv_files_in(dir);
    for sub in sorted_subdirs(dir) {
        out.extend(csv_files_recursive(&sub));
    }
    out.sort();
    out
}

pub fn csv_files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = read_dir_paths(dir)
        .into_iter()
        .filter(|path| path.is_file() && has_csv_extension(path))
        .collect();
    files.sort();
    files
}

pub fn has_csv_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = read_dir_paths(dir)
        .into_iter()
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect(),
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    component = "store",
                    event = "store.scan.dir_unreadable",
                    path = %dir.display(),
                    error = %err
                );
            }
            Vec::new()
        }
    }
}

fn dir_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|name| name.to_str())
}
