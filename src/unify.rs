//! Per-project consolidation of stored pages into one table.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use crate::dataset::{ColumnRef, Dataset, DatasetError};
use crate::store::{write_atomic, DeviceEntry, ProjectEntry, StoreLayout};
use crate::timestamp::{max_instant, min_instant, parse_instant, Instant};

pub const CONTEXT_COLUMNS: [&str; 4] = ["project", "device", "date_folder", "source_file"];
pub const SUMMARY_FILE_NAME: &str = "unification_summary.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub device: String,
    pub date_folder: String,
    pub file: String,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSummary {
    pub project_id: String,
    pub output_path: PathBuf,
    pub records: usize,
    pub devices: usize,
    pub date_folders: usize,
    pub first_insertion: Option<Instant>,
    pub last_insertion: Option<Instant>,
    pub files: Vec<SourceFile>,
}

pub fn unified_file_name(project_id: &str) -> String {
    format!("proyecto_{project_id}_unificado.csv")
}

/// Writes one unified CSV per project with data plus the summary file.
/// Projects without any readable, non-empty page are left out.
pub fn unify_projects(
    layout: &StoreLayout,
    output_dir: &Path,
) -> Result<Vec<ProjectSummary>, DatasetError> {
    fs::create_dir_all(output_dir)?;

    let mut summaries = Vec::new();
    for project in layout.scan() {
        if let Some(summary) = unify_project(&project, output_dir)? {
            summaries.push(summary);
        }
    }

    if !summaries.is_empty() {
        let text = render_summary(&summaries);
        write_atomic(&output_dir.join(SUMMARY_FILE_NAME), text.as_bytes())?;
    }

    info!(
        component = "unify",
        event = "unify.complete",
        projects = summaries.len(),
        records = summaries.iter().map(|s| s.records).sum::<usize>()
    );
    Ok(summaries)
}

fn unify_project(
    project: &ProjectEntry,
    output_dir: &Path,
) -> Result<Option<ProjectSummary>, DatasetError> {
    let mut parts = Vec::new();
    let mut files = Vec::new();

    for device in &project.devices {
        read_device_pages(&project.project_id, device, &mut parts, &mut files);
    }
    if parts.is_empty() {
        info!(
            component = "unify",
            event = "unify.project.empty",
            project = %project.project_id
        );
        return Ok(None);
    }

    let mut unified = Dataset::concat(parts);
    sort_by_insertion_then_measurement(&mut unified);
    unified.move_columns_last(&CONTEXT_COLUMNS);

    let output_path = output_dir.join(unified_file_name(&project.project_id));
    unified.write_csv(&output_path)?;

    let (first_insertion, last_insertion) = match unified.schema().inserted_at {
        Some(column) => (
            min_instant(unified.column(column.index)),
            max_instant(unified.column(column.index)),
        ),
        None => (None, None),
    };

    let summary = ProjectSummary {
        project_id: project.project_id.clone(),
        output_path,
        records: unified.len(),
        devices: files.iter().map(|f| &f.device).collect::<BTreeSet<_>>().len(),
        date_folders: files.iter().map(|f| &f.date_folder).collect::<BTreeSet<_>>().len(),
        first_insertion,
        last_insertion,
        files,
    };
    info!(
        component = "unify",
        event = "unify.project.written",
        project = %summary.project_id,
        records = summary.records,
        files = summary.files.len(),
        path = %summary.output_path.display()
    );
    Ok(Some(summary))
}

fn read_device_pages(
    project_id: &str,
    device: &DeviceEntry,
    parts: &mut Vec<Dataset>,
    files: &mut Vec<SourceFile>,
) {
    for (folder, path) in device.files() {
        let mut dataset = match Dataset::read_csv(path) {
            Ok(dataset) => dataset,
            Err(err) => {
                warn!(
                    component = "unify",
                    event = "unify.file.skipped",
                    path = %path.display(),
                    error = %err
                );
                continue;
            }
        };
        if dataset.is_empty() {
            continue;
        }

        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        for (column, value) in CONTEXT_COLUMNS.iter().zip([
            project_id,
            device.code.as_str(),
            folder.name.as_str(),
            file.as_str(),
        ]) {
            dataset.push_constant_column(column, value);
        }

        files.push(SourceFile {
            device: device.code.clone(),
            date_folder: folder.name.clone(),
            file,
            records: dataset.len(),
        });
        parts.push(dataset);
    }
}

/// Stable ascending sort on (insertion, measurement); unparseable instants last.
pub fn sort_by_insertion_then_measurement(dataset: &mut Dataset) {
    let schema = dataset.schema();
    if schema.inserted_at.is_none() && schema.measured_at.is_none() {
        return;
    }
    let instant = |row: &[String], column: Option<ColumnRef>| {
        let parsed = column.and_then(|column| parse_instant(&row[column.index]));
        (parsed.is_none(), parsed)
    };
    dataset.sort_rows_by_key(|row| {
        (
            instant(row, schema.inserted_at),
            instant(row, schema.measured_at),
        )
    });
}

fn render_summary(summaries: &[ProjectSummary]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "DATA UNIFICATION REPORT");
    let _ = writeln!(text, "Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(text, "{}\n", "=".repeat(50));

    for summary in summaries {
        let period = |instant: Option<Instant>| {
            instant
                .map(|instant| instant.naive().format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "N/A".to_string())
        };
        let output_name = summary
            .output_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let _ = writeln!(text, "PROJECT {}", summary.project_id);
        let _ = writeln!(text, "File: {output_name}");
        let _ = writeln!(text, "Records: {}", summary.records);
        let _ = writeln!(text, "Files processed: {}", summary.files.len());
        let _ = writeln!(text, "Devices: {}", summary.devices);
        let _ = writeln!(text, "Date folders: {}", summary.date_folders);
        let _ = writeln!(
            text,
            "Period: {} -> {}",
            period(summary.first_insertion),
            period(summary.last_insertion)
        );
        let _ = writeln!(text, "\nFiles:");
        for file in &summary.files {
            let _ = writeln!(
                text,
                "  - {}/{}/{} ({} records)",
                file.device, file.date_folder, file.file, file.records
            );
        }
        let _ = writeln!(text, "\n{}\n", "-".repeat(30));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CsvShape;

    #[test]
    fn sort_orders_by_insertion_then_measurement_with_invalid_last() {
        let mut dataset = Dataset::from_csv_str(
            "fecha,fecha_insercion,id\n\
2025-01-02,2025-01-03,a\n\
2025-01-01,garbage,b\n\
2025-01-02,2025-01-01,c\n\
2025-01-01,2025-01-01,d\n",
            CsvShape::Strict,
        )
        .unwrap();

        sort_by_insertion_then_measurement(&mut dataset);
        let order: Vec<&str> = dataset.column(2).collect();
        assert_eq!(order, vec!["d", "c", "a", "b"]);
    }

    #[test]
    fn unified_file_names_follow_project_id() {
        assert_eq!(unified_file_name("14"), "proyecto_14_unificado.csv");
    }
}
