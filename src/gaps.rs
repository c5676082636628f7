//! Missing-day detection and causality checks over stored pages.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::dataset::{Dataset, DatasetSchema};
use crate::report::TableSpec;
use crate::store::StoreLayout;
use crate::timestamp::{format_date, next_day, Instant};

/// Missing dates keyed by `(device_code, source_file)`.
pub type GapMap = BTreeMap<(String, String), BTreeSet<NaiveDate>>;

/// A record measured after it was inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CausalityViolation {
    pub row_index: usize,
    pub device_code: String,
    pub measured_at: Instant,
    pub inserted_at: Instant,
}

pub fn has_gap_columns(schema: &DatasetSchema) -> bool {
    schema.measured_at.is_some() && schema.inserted_at.is_some() && schema.device_code.is_some()
}

/// Records whose measurement instant is strictly later than their insertion
/// instant. Rows without both instants are ignored; a missing device code is
/// reported as empty.
pub fn find_causality_violations(dataset: &Dataset) -> Vec<CausalityViolation> {
    if !has_gap_columns(&dataset.schema()) {
        return Vec::new();
    }
    dataset
        .records()
        .filter_map(|record| {
            let measured_at = record.measured_at?;
            let inserted_at = record.inserted_at?;
            (measured_at > inserted_at).then(|| CausalityViolation {
                row_index: record.row_index,
                device_code: record.device_code.unwrap_or_default().to_string(),
                measured_at,
                inserted_at,
            })
        })
        .collect()
}

/// Calendar days with no valid record between each device's first and last
/// valid measurement date. Devices without gaps are absent from the map.
pub fn find_gaps(dataset: &Dataset, source_file: &str) -> GapMap {
    let mut gaps = GapMap::new();
    if !has_gap_columns(&dataset.schema()) {
        return gaps;
    }

    let mut present: BTreeMap<&str, BTreeSet<NaiveDate>> = BTreeMap::new();
    for record in dataset.records() {
        let (Some(measured_at), Some(inserted_at), Some(device_code)) =
            (record.measured_at, record.inserted_at, record.device_code)
        else {
            continue;
        };
        if measured_at > inserted_at {
            continue;
        }
        present
            .entry(device_code)
            .or_default()
            .insert(measured_at.date());
    }

    for (device_code, dates) in present {
        let missing = missing_dates(&dates);
        if !missing.is_empty() {
            gaps.insert((device_code.to_string(), source_file.to_string()), missing);
        }
    }
    gaps
}

/// Dates absent from `present` within its own min..=max range.
pub fn missing_dates(present: &BTreeSet<NaiveDate>) -> BTreeSet<NaiveDate> {
    let (Some(first), Some(last)) = (present.first(), present.last()) else {
        return BTreeSet::new();
    };

    let mut missing = BTreeSet::new();
    let mut day = *first;
    while day < *last {
        if !present.contains(&day) {
            missing.insert(day);
        }
        match next_day(day) {
            Some(next) => day = next,
            None => break,
        }
    }
    missing
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDay {
    pub folder: String,
    pub file: String,
    pub device_code: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureDated {
    pub folder: String,
    pub file: String,
    pub device_code: String,
    pub measured_at: Instant,
    pub inserted_at: Instant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapAudit {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub missing_days: Vec<MissingDay>,
    pub future_dated: Vec<FutureDated>,
}

impl GapAudit {
    /// Distinct `(folder, file, device)` groups with at least one missing day.
    pub fn groups_with_gaps(&self) -> usize {
        self.missing_days
            .iter()
            .map(|row| (&row.folder, &row.file, &row.device_code))
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn missing_days_table(&self) -> TableSpec {
        TableSpec::new(
            "Missing Days",
            ["Folder", "File", "Device", "Missing Date"],
            self.missing_days
                .iter()
                .map(|row| {
                    vec![
                        row.folder.clone(),
                        row.file.clone(),
                        row.device_code.clone(),
                        format_date(row.date),
                    ]
                })
                .collect(),
        )
    }

    pub fn future_dated_table(&self) -> TableSpec {
        TableSpec::new(
            "Future Dated",
            ["Folder", "File", "Device", "Measured At", "Inserted At"],
            self.future_dated
                .iter()
                .map(|row| {
                    vec![
                        row.folder.clone(),
                        row.file.clone(),
                        row.device_code.clone(),
                        row.measured_at.format_canonical(),
                        row.inserted_at.format_canonical(),
                    ]
                })
                .collect(),
        )
    }
}

/// Runs gap and causality detection over every page file in the store.
/// Unreadable files and files lacking the required columns are counted as
/// skipped and do not stop the audit.
pub fn audit_store(layout: &StoreLayout) -> GapAudit {
    let mut audit = GapAudit::default();

    for project in layout.scan() {
        for device in &project.devices {
            for (folder, path) in device.files() {
                audit_file(&mut audit, &folder.name, path);
            }
        }
    }

    info!(
        component = "gaps",
        event = "gaps.audit.complete",
        files_scanned = audit.files_scanned,
        files_skipped = audit.files_skipped,
        missing_days = audit.missing_days.len(),
        future_dated = audit.future_dated.len()
    );
    audit
}

fn audit_file(audit: &mut GapAudit, folder: &str, path: &Path) {
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let dataset = match Dataset::read_csv(path) {
        Ok(dataset) => dataset,
        Err(err) => {
            warn!(
                component = "gaps",
                event = "gaps.file.unreadable",
                path = %path.display(),
                error = %err
            );
            audit.files_skipped += 1;
            return;
        }
    };
    if !has_gap_columns(&dataset.schema()) {
        warn!(
            component = "gaps",
            event = "gaps.file.missing_columns",
            path = %path.display()
        );
        audit.files_skipped += 1;
        return;
    }
    audit.files_scanned += 1;

    for violation in find_causality_violations(&dataset) {
        audit.future_dated.push(FutureDated {
            folder: folder.to_string(),
            file: file.clone(),
            device_code: violation.device_code,
            measured_at: violation.measured_at,
            inserted_at: violation.inserted_at,
        });
    }

    for ((device_code, _), dates) in find_gaps(&dataset, &file) {
        for date in dates {
            audit.missing_days.push(MissingDay {
                folder: folder.to_string(),
                file: file.clone(),
                device_code: device_code.clone(),
                date,
            });
        }
    }
}
