//! Start-date resolution for a device's next fetch cycle.
//!
//! Priority:
//! 1. persisted checkpoint in the device list: that exact date
//! 2. newest insertion instant in the device's local page files: the day after
//! 3. the configured fallback epoch

use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::DeviceConfig;
use crate::dataset::Dataset;
use crate::store::csv_files_recursive;
use crate::timestamp::{next_day, parse_instant, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartSource {
    PersistedCheckpoint,
    LocalFiles { newest_insertion: Instant },
    FallbackEpoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStart {
    pub date: NaiveDate,
    pub source: StartSource,
}

pub fn resolve_start(
    device: &DeviceConfig,
    device_dir: &Path,
    fallback: NaiveDate,
) -> ResolvedStart {
    if let Some(raw) = device.persisted_checkpoint() {
        match parse_instant(raw) {
            // The API's offset paging skips records already seen on that date,
            // so the checkpoint date itself is queried again.
            Some(checkpoint) => {
                let resolved = ResolvedStart {
                    date: checkpoint.date(),
                    source: StartSource::PersistedCheckpoint,
                };
                log_resolved(device, &resolved);
                return resolved;
            }
            None => warn!(
                component = "checkpoint",
                event = "checkpoint.persisted.unparseable",
                device = %device.label(),
                raw
            ),
        }
    }

    if let Some(newest_insertion) = newest_local_insertion(&device.internal_code, device_dir) {
        if let Some(date) = next_day(newest_insertion.date()) {
            let resolved = ResolvedStart {
                date,
                source: StartSource::LocalFiles { newest_insertion },
            };
            log_resolved(device, &resolved);
            return resolved;
        }
    }

    let resolved = ResolvedStart {
        date: fallback,
        source: StartSource::FallbackEpoch,
    };
    log_resolved(device, &resolved);
    resolved
}

/// Newest insertion instant across the device's page files under `device_dir`.
///
/// Only files whose name starts with the device code are read; a file that
/// cannot be read or has no insertion column is logged and skipped.
pub fn newest_local_insertion(device_code: &str, device_dir: &Path) -> Option<Instant> {
    let mut newest: Option<Instant> = None;

    for path in csv_files_recursive(device_dir) {
        let matches_device = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(device_code))
            .unwrap_or(false);
        if !matches_device {
            continue;
        }

        let dataset = match Dataset::read_csv(&path) {
            Ok(dataset) => dataset,
            Err(err) => {
                warn!(
                    component = "checkpoint",
                    event = "checkpoint.scan.file_skipped",
                    path = %path.display(),
                    error = %err
                );
                continue;
            }
        };

        let Some(column) = dataset.schema().inserted_at else {
            debug!(
                component = "checkpoint",
                event = "checkpoint.scan.no_insertion_column",
                path = %path.display()
            );
            continue;
        };

        let file_max = dataset.column(column.index).filter_map(parse_instant).max();
        newest = newest.max(file_max);
    }

    newest
}

fn log_resolved(device: &DeviceConfig, resolved: &ResolvedStart) {
    let source = match resolved.source {
        StartSource::PersistedCheckpoint => "persisted_checkpoint",
        StartSource::LocalFiles { .. } => "local_files",
        StartSource::FallbackEpoch => "fallback_epoch",
    };
    info!(
        component = "checkpoint",
        event = "checkpoint.resolved",
        device = %device.label(),
        start_date = %resolved.date,
        source
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_page(dir: &Path, name: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn persisted_checkpoint_is_used_as_is() {
        let temp = tempdir().unwrap();
        let mut device = DeviceConfig::new("1", "EMMA-01");
        device.last_synced = Some("2025-01-10T18:30:00".to_string());
        write_page(
            &temp.path().join("2025-01-01"),
            "EMMA-01_paquete_001_20250120.csv",
            "fecha,fecha_insercion\n2025-01-20,2025-01-20T00:00:00\n",
        );

        let resolved = resolve_start(&device, temp.path(), ymd(2005, 10, 23));
        assert_eq!(resolved.date, ymd(2025, 1, 10));
        assert_eq!(resolved.source, StartSource::PersistedCheckpoint);
    }

    #[test]
    fn date_only_checkpoint_is_accepted() {
        let temp = tempdir().unwrap();
        let mut device = DeviceConfig::new("1", "EMMA-01");
        device.last_synced = Some("2025-01-10".to_string());

        let resolved = resolve_start(&device, temp.path(), ymd(2005, 10, 23));
        assert_eq!(resolved.date, ymd(2025, 1, 10));
    }

    #[test]
    fn local_files_resolve_to_day_after_newest_insertion() {
        let temp = tempdir().unwrap();
        let device = DeviceConfig::new("1", "EMMA-01");
        let folder = temp.path().join("2025-01-01");
        write_page(
            &folder,
            "EMMA-01_paquete_001_20250103.csv",
            "fecha,fecha_insercion\n2025-01-02,2025-01-03T23:59:59\n2025-01-02,garbage\n",
        );
        write_page(
            &folder,
            "EMMA-01_paquete_002_20250105.csv",
            "fecha,fecha_insercion\n2025-01-04,2025-01-05T08:00:00\n",
        );
        write_page(
            &folder,
            "OTHER-09_paquete_001_20250301.csv",
            "fecha,fecha_insercion\n2025-03-01,2025-03-01T00:00:00\n",
        );

        let resolved = resolve_start(&device, temp.path(), ymd(2005, 10, 23));
        assert_eq!(resolved.date, ymd(2025, 1, 6));
        assert!(matches!(resolved.source, StartSource::LocalFiles { .. }));
    }

    #[test]
    fn unreadable_files_are_skipped_individually() {
        let temp = tempdir().unwrap();
        let device = DeviceConfig::new("1", "EMMA-01");
        let folder = temp.path().join("2025-01-01");
        write_page(&folder, "EMMA-01_paquete_001_x.csv", "");
        write_page(&folder, "EMMA-01_paquete_002_x.csv", "a,b\n1,2\n");
        fs::write(folder.join("EMMA-01_paquete_003_x.csv"), [0xff, 0xfe, 0x00]).unwrap();
        write_page(
            &folder,
            "EMMA-01_paquete_004_20250201.csv",
            "fecha_insercion\n2025-02-01T00:00:00\n",
        );

        let resolved = resolve_start(&device, temp.path(), ymd(2005, 10, 23));
        assert_eq!(resolved.date, ymd(2025, 2, 2));
    }

    #[test]
    fn no_checkpoint_and_no_files_uses_fallback_epoch() {
        let temp = tempdir().unwrap();
        let device = DeviceConfig::new("1", "EMMA-01");
        let resolved = resolve_start(&device, &temp.path().join("missing"), ymd(2005, 10, 23));
        assert_eq!(resolved.date, ymd(2005, 10, 23));
        assert_eq!(resolved.source, StartSource::FallbackEpoch);
    }

    #[test]
    fn unparseable_checkpoint_falls_through_to_local_scan() {
        let temp = tempdir().unwrap();
        let mut device = DeviceConfig::new("1", "EMMA-01");
        device.last_synced = Some("last tuesday".to_string());

        let resolved = resolve_start(&device, temp.path(), ymd(2005, 10, 23));
        assert_eq!(resolved.source, StartSource::FallbackEpoch);
    }
}
