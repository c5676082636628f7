//! Device list persistence and acquisition settings.

use std::env;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::timestamp::{parse_instant, Instant};

pub const DEFAULT_API_BASE_URL: &str = "https://api-sensores.cmasccp.cl/listarUltimasMediciones";

/// Project id as written in the device list.
///
/// The JSON value is kept so a save writes back the same type (`7` stays a
/// number, `"07"` stays a string); paths and queries use the text form.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectId {
    raw: Value,
    text: String,
}

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn from_value(raw: Value) -> Result<Self, String> {
        let text = match &raw {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            other => return Err(format!("project id must be a string or number, got {other}")),
        };
        Ok(Self { raw, text })
    }
}

impl From<&str> for ProjectId {
    fn from(text: &str) -> Self {
        Self {
            raw: Value::from(text),
            text: text.to_string(),
        }
    }
}

impl From<u64> for ProjectId {
    fn from(number: u64) -> Self {
        Self {
            raw: Value::from(number),
            text: number.to_string(),
        }
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for ProjectId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProjectId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Self::from_value(Value::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}

/// One entry of the device list file.
///
/// Field names follow the on-disk JSON contract; anything else found in an
/// entry is carried through untouched when the list is saved back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "proyecto")]
    pub project: ProjectId,
    #[serde(rename = "codigo_interno")]
    pub internal_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(
        rename = "ultima_fecha",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_synced: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceConfig {
    pub fn new(project: impl Into<ProjectId>, internal_code: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            internal_code: internal_code.into(),
            api_url: None,
            last_synced: None,
            extra: Map::new(),
        }
    }

    pub fn project_id(&self) -> &str {
        self.project.as_str()
    }

    pub fn label(&self) -> String {
        format!("{}@proyecto_{}", self.internal_code, self.project)
    }

    /// Custom endpoint when configured and non-blank, otherwise `default_url`.
    pub fn endpoint<'a>(&'a self, default_url: &'a str) -> &'a str {
        self.api_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(default_url)
    }

    pub fn persisted_checkpoint(&self) -> Option<&str> {
        self.last_synced.as_deref()
    }

    /// Records a new watermark, never moving it backwards.
    pub fn advance_watermark(&mut self, candidate: Instant) -> bool {
        let current = self.last_synced.as_deref().and_then(parse_instant);
        match current {
            Some(current) if current >= candidate => false,
            _ => {
                self.last_synced = Some(candidate.format_canonical());
                true
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("device list not found at {path}")]
    NotFound { path: PathBuf },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed device list {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Ordered device list loaded for one run and saved back at its end.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRegistry {
    path: PathBuf,
    pub devices: Vec<DeviceConfig>,
}

impl DeviceRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let devices =
            serde_json::from_str(&text).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            devices,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the list back in place through a temp file and rename.
    pub fn save(&self) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        let mut body = serde_json::to_string_pretty(&self.devices).map_err(|source| {
            ConfigError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        body.push('\n');

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "devices.json".to_string());
        let tmp_path = self.path.with_file_name(format!("{file_name}.tmp"));
        {
            let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
            file.write_all(body.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub data_root: PathBuf,
    pub devices_path: PathBuf,
    pub api_base_url: String,
    pub page_size: usize,
    pub max_iterations: u32,
    pub max_consecutive_skips: u32,
    pub max_malformed_pages: u32,
    pub http_timeout_ms: u64,
    pub page_delay_ms: u64,
    pub fallback_start: NaiveDate,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("datos"),
            devices_path: PathBuf::from("devices.json"),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            page_size: 100,
            max_iterations: 50,
            max_consecutive_skips: 10,
            max_malformed_pages: 5,
            http_timeout_ms: 180_000,
            page_delay_ms: 1_000,
            fallback_start: fallback_epoch(),
        }
    }
}

pub fn fallback_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2005, 10, 23).unwrap_or(NaiveDate::MIN)
}

pub fn acquisition_config_from_env() -> AcquisitionConfig {
    let mut config = AcquisitionConfig::default();

    if let Some(root) = env_text("SENSORSYNC_DATA_ROOT") {
        config.data_root = PathBuf::from(root);
    }
    if let Some(path) = env_text("SENSORSYNC_DEVICES_PATH") {
        config.devices_path = PathBuf::from(path);
    }
    if let Some(url) = env_text("SENSORSYNC_API_URL") {
        config.api_base_url = url;
    }
    if let Some(size) = env_parse::<usize>("SENSORSYNC_PAGE_SIZE").filter(|size| *size > 0) {
        config.page_size = size;
    }
    if let Some(cap) = env_parse::<u32>("SENSORSYNC_MAX_PAGES").filter(|cap| *cap > 0) {
        config.max_iterations = cap;
    }
    if let Some(timeout) = env_parse::<u64>("SENSORSYNC_HTTP_TIMEOUT_MS") {
        config.http_timeout_ms = timeout;
    }
    if let Some(delay) = env_parse::<u64>("SENSORSYNC_PAGE_DELAY_MS") {
        config.page_delay_ms = delay;
    }
    if let Some(start) = env_text("SENSORSYNC_FALLBACK_START")
        .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())
    {
        config.fallback_start = start;
    }

    config
}

/// Locations used by the offline tools (unify, reports, upload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub unified_dir: PathBuf,
    pub workbooks_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub remote_root: Option<PathBuf>,
    pub remote_folder: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            unified_dir: PathBuf::from("datos_unificados"),
            workbooks_dir: PathBuf::from("workbooks"),
            reports_dir: PathBuf::from("reports"),
            remote_root: None,
            remote_folder: "datos_unificados".to_string(),
        }
    }
}

pub fn output_config_from_env() -> OutputConfig {
    let mut config = OutputConfig::default();

    if let Some(dir) = env_text("SENSORSYNC_UNIFIED_DIR") {
        config.unified_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_text("SENSORSYNC_WORKBOOKS_DIR") {
        config.workbooks_dir = PathBuf::from(dir);
    }
    if let Some(dir) = env_text("SENSORSYNC_REPORTS_DIR") {
        config.reports_dir = PathBuf::from(dir);
    }
    config.remote_root = env_text("SENSORSYNC_REMOTE_ROOT").map(PathBuf::from);
    if let Some(folder) = env_text("SENSORSYNC_REMOTE_FOLDER") {
        config.remote_folder = folder;
    }

    config
}

fn env_text(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_text(key).and_then(|value| value.parse().ok())
}
