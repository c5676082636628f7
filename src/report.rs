//! Report documents and the renderers that write them.
//!
//! Builders turn datasets into a [`ReportDocument`] (header lines plus
//! tables); a [`DocumentRenderer`] decides the on-disk format.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use crate::dataset::{is_null, parse_number, Dataset, DatasetError};
use crate::quality::{
    column_completeness, descriptive_stats, interval_profile, score_variables, IntervalStats,
};
use crate::store::{csv_files_in, write_atomic, DeviceEntry, StoreLayout};
use crate::timestamp::{format_date, max_instant, min_instant, parse_instant, Instant};
use crate::unify::sort_by_insertion_then_measurement;

pub const ROWS_PER_PAGE: usize = 35;
const TEXT_CELL_WIDTH: usize = 32;
const FORM_FEED: char = '\u{000C}';

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),
    #[error("input directory not found: {path}")]
    MissingInput { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Start this table on a new page.
    pub page_break: bool,
}

impl TableSpec {
    pub fn new<H: Into<String>>(
        title: impl Into<String>,
        headers: impl IntoIterator<Item = H>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            title: title.into(),
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
            page_break: false,
        }
    }

    pub fn from_dataset(title: impl Into<String>, dataset: &Dataset) -> Self {
        Self::new(title, dataset.headers().iter().cloned(), dataset.rows().to_vec())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Splits into page-sized tables; every page after the first breaks the page.
    pub fn paginate(&self, rows_per_page: usize) -> Vec<TableSpec> {
        let rows_per_page = rows_per_page.max(1);
        if self.rows.len() <= rows_per_page {
            return vec![self.clone()];
        }

        self.rows
            .chunks(rows_per_page)
            .enumerate()
            .map(|(page, chunk)| {
                let first = page * rows_per_page + 1;
                let last = first + chunk.len() - 1;
                TableSpec {
                    title: format!("{} - Page {} (Rows {first}-{last})", self.title, page + 1),
                    headers: self.headers.clone(),
                    rows: chunk.to_vec(),
                    page_break: page > 0,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportDocument {
    pub title: String,
    pub lines: Vec<String>,
    pub tables: Vec<TableSpec>,
}

impl ReportDocument {
    pub fn table(&self, title: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|table| table.title == title)
    }
}

pub trait DocumentRenderer {
    /// Output path name for a document stem.
    fn output_name(&self, stem: &str) -> String;
    fn render(&self, document: &ReportDocument, path: &Path) -> Result<(), ReportError>;
}

/// One CSV per table inside a folder, plus `document.txt` for the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSheetsRenderer;

impl DocumentRenderer for CsvSheetsRenderer {
    fn output_name(&self, stem: &str) -> String {
        format!("{stem}_sheets")
    }

    fn render(&self, document: &ReportDocument, path: &Path) -> Result<(), ReportError> {
        fs::create_dir_all(path)?;

        let mut header = format!("{}\n", document.title);
        for line in &document.lines {
            header.push_str(line);
            header.push('\n');
        }
        write_atomic(&path.join("document.txt"), header.as_bytes())?;

        for (index, table) in document.tables.iter().enumerate() {
            let file_name = format!("{:02}_{}.csv", index + 1, sheet_slug(&table.title));
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record(&table.headers)?;
            for row in &table.rows {
                writer.write_record(row)?;
            }
            let bytes = writer
                .into_inner()
                .map_err(|err| ReportError::Io(err.into_error()))?;
            write_atomic(&path.join(file_name), &bytes)?;
        }
        Ok(())
    }
}

/// Fixed-width plain text; page breaks become form feeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextReportRenderer;

impl DocumentRenderer for TextReportRenderer {
    fn output_name(&self, stem: &str) -> String {
        format!("{stem}.txt")
    }

    fn render(&self, document: &ReportDocument, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(path, render_text(document).as_bytes())?;
        Ok(())
    }
}

pub fn render_text(document: &ReportDocument) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", document.title);
    let _ = writeln!(out, "{}", "=".repeat(document.title.chars().count()));
    for line in &document.lines {
        let _ = writeln!(out, "{line}");
    }

    for table in &document.tables {
        if table.page_break {
            out.push(FORM_FEED);
        }
        let _ = writeln!(out, "\n{}", table.title);
        let widths: Vec<usize> = (0..table.headers.len())
            .map(|column| {
                std::iter::once(&table.headers[column])
                    .chain(table.rows.iter().filter_map(|row| row.get(column)))
                    .map(|cell| cell.chars().count().min(TEXT_CELL_WIDTH))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        write_text_row(&mut out, &table.headers, &widths);
        let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
        write_text_row(&mut out, &rule, &widths);
        for row in &table.rows {
            write_text_row(&mut out, row, &widths);
        }
    }
    out
}

fn write_text_row(out: &mut String, cells: &[String], widths: &[usize]) {
    let line: Vec<String> = widths
        .iter()
        .enumerate()
        .map(|(column, &width)| {
            let cell = cells.get(column).map(String::as_str).unwrap_or("");
            let clipped: String = if cell.chars().count() > width {
                cell.chars().take(width.saturating_sub(3)).chain("...".chars()).collect()
            } else {
                cell.to_string()
            };
            format!("{clipped:<width$}")
        })
        .collect();
    let _ = writeln!(out, "{}", line.join(" | ").trim_end());
}

fn sheet_slug(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    slug.split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Data, Summary and Columns sheets for one CSV.
pub fn build_workbook(dataset: &Dataset, source_name: &str) -> ReportDocument {
    let summary_rows = vec![
        vec!["Total Records".to_string(), dataset.len().to_string()],
        vec!["Total Columns".to_string(), dataset.headers().len().to_string()],
        vec!["Data Period".to_string(), data_period(dataset)],
        vec!["Source File".to_string(), source_name.to_string()],
        vec![
            "Conversion Time".to_string(),
            Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        ],
    ];

    let column_rows = dataset
        .headers()
        .iter()
        .enumerate()
        .map(|(index, name)| {
            let present: Vec<&str> = dataset.column(index).filter(|cell| !is_null(cell)).collect();
            let unique: BTreeSet<&str> = present.iter().copied().collect();
            vec![
                name.clone(),
                infer_column_type(&present).to_string(),
                unique.len().to_string(),
                (dataset.len() - present.len()).to_string(),
                format!("{:.2}", column_completeness(dataset, index)),
            ]
        })
        .collect();

    ReportDocument {
        title: source_name.to_string(),
        lines: Vec::new(),
        tables: vec![
            TableSpec::from_dataset("Data", dataset),
            TableSpec::new("Summary", ["Metric", "Value"], summary_rows),
            TableSpec::new(
                "Columns",
                ["Column", "Data Type", "Unique Values", "Null Values", "Completeness %"],
                column_rows,
            ),
        ],
    }
}

fn data_period(dataset: &Dataset) -> String {
    let schema = dataset.schema();
    for column in [schema.measured_at, schema.inserted_at].into_iter().flatten() {
        if let (Some(first), Some(last)) = (
            min_instant(dataset.column(column.index)),
            max_instant(dataset.column(column.index)),
        ) {
            return format!("{} to {}", first.date(), last.date());
        }
    }
    "Not available".to_string()
}

fn infer_column_type(present: &[&str]) -> &'static str {
    if present.is_empty() {
        "empty"
    } else if present.iter().all(|cell| cell.trim().parse::<i64>().is_ok()) {
        "integer"
    } else if present.iter().all(|cell| parse_number(cell).is_some()) {
        "float"
    } else if present.iter().all(|cell| parse_instant(cell).is_some()) {
        "datetime"
    } else {
        "text"
    }
}

/// Per-file contribution to a device report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFileInfo {
    pub date_folder: String,
    pub file: String,
    pub records: usize,
}

/// Device report: header, file list, quality, statistics, interval profile
/// and the full data split into pages.
pub fn build_device_report(
    project_id: &str,
    device_code: &str,
    dataset: &Dataset,
    files: &[SourceFileInfo],
) -> ReportDocument {
    let mut lines = vec![format!(
        "Project {project_id} | Generated {}",
        Local::now().format("%d/%m/%Y %H:%M:%S")
    )];
    if let Some(column) = dataset.schema().inserted_at {
        if let (Some(first), Some(last)) = (
            min_instant(dataset.column(column.index)),
            max_instant(dataset.column(column.index)),
        ) {
            lines.push(format!("First insertion: {}", display_instant(first)));
            lines.push(format!("Last insertion: {}", display_instant(last)));
        }
    }
    lines.push(format!("Device code: {device_code}"));
    let folders: BTreeSet<&str> = files.iter().map(|f| f.date_folder.as_str()).collect();
    lines.push(format!(
        "{} files processed | {} records | {} date folders",
        files.len(),
        files.iter().map(|f| f.records).sum::<usize>(),
        folders.len()
    ));

    let mut tables = vec![TableSpec::new(
        "Files",
        ["File", "Date Folder", "Records"],
        files
            .iter()
            .map(|f| vec![f.file.clone(), f.date_folder.clone(), f.records.to_string()])
            .collect(),
    )];

    let quality_rows: Vec<Vec<String>> = score_variables(dataset)
        .into_iter()
        .map(|record| {
            vec![
                record.variable,
                format!("{:.1}", record.completeness),
                format!("{:.1}", record.consistency),
                format!("{:.0}", record.stability),
                format!("{:.1}", record.continuity),
                format!("{:.1}", record.score),
                record.classification.as_str().to_string(),
                record.outliers.to_string(),
                record
                    .coefficient_of_variation
                    .map(|cv| format!("{cv:.1}"))
                    .unwrap_or_else(|| "N/A".to_string()),
            ]
        })
        .collect();
    tables.push(TableSpec::new(
        "Quality Metrics",
        [
            "Variable",
            "Completeness %",
            "Consistency %",
            "Stability",
            "Continuity %",
            "Score",
            "Class",
            "Outliers",
            "CV %",
        ],
        quality_rows,
    ));

    let stats_rows: Vec<Vec<String>> = descriptive_stats(dataset)
        .into_iter()
        .map(|stats| {
            vec![
                stats.variable,
                stats.count.to_string(),
                format!("{:.4}", stats.mean),
                format!("{:.4}", stats.median),
                format!("{:.4}", stats.mode),
                optional(stats.std, 4),
                optional(stats.variance, 4),
                format!("{:.4}", stats.min),
                format!("{:.4}", stats.max),
                format!("{:.4}", stats.q1),
                format!("{:.4}", stats.q3),
            ]
        })
        .collect();
    tables.push(TableSpec::new(
        "Descriptive Statistics",
        [
            "Variable", "Count", "Mean", "Median", "Mode", "Std Dev", "Variance", "Min", "Max",
            "Q1", "Q3",
        ],
        stats_rows,
    ));

    if let Some(profile) = interval_profile(dataset) {
        tables.push(TableSpec::new(
            "Sampling Profile",
            ["Metric", "Value"],
            vec![
                vec!["Days with data".to_string(), profile.days().to_string()],
                vec!["Measurements".to_string(), profile.measurements.to_string()],
                vec!["Mean per day".to_string(), format!("{:.2}", profile.mean_per_day)],
                vec!["Min per day".to_string(), profile.min_per_day.to_string()],
                vec!["Max per day".to_string(), profile.max_per_day.to_string()],
            ],
        ));
        tables.push(interval_table(
            profile.measured_intervals.as_ref(),
            profile.inserted_intervals.as_ref(),
        ));
        tables.push(TableSpec::new(
            "Measurements per Day",
            ["Date", "Count"],
            profile
                .per_day
                .iter()
                .map(|(date, count)| vec![format_date(*date), count.to_string()])
                .collect(),
        ));
    }

    let mut data_pages = TableSpec::from_dataset("Full Data", dataset).paginate(ROWS_PER_PAGE);
    if let Some(first) = data_pages.first_mut() {
        first.page_break = true;
    }
    tables.extend(data_pages);

    ReportDocument {
        title: format!("DATA REPORT - {}", device_code.to_uppercase()),
        lines,
        tables,
    }
}

fn interval_table(measured: Option<&IntervalStats>, inserted: Option<&IntervalStats>) -> TableSpec {
    let cell = |stats: Option<&IntervalStats>, pick: fn(&IntervalStats) -> f64| {
        stats
            .map(|stats| format!("{:.2}", pick(stats)))
            .unwrap_or_else(|| "N/A".to_string())
    };
    let row = |label: &str, pick: fn(&IntervalStats) -> f64| {
        vec![label.to_string(), cell(measured, pick), cell(inserted, pick)]
    };

    TableSpec::new(
        "Interval Statistics (minutes)",
        ["Statistic", "Measurement", "Insertion"],
        vec![
            vec![
                "Intervals".to_string(),
                measured.map(|s| s.count.to_string()).unwrap_or_else(|| "0".to_string()),
                inserted.map(|s| s.count.to_string()).unwrap_or_else(|| "0".to_string()),
            ],
            row("Mean", |s| s.mean),
            row("Median", |s| s.median),
            row("Std Dev", |s| s.std.unwrap_or(0.0)),
            row("Min", |s| s.min),
            row("Max", |s| s.max),
            row("Q1", |s| s.q1),
            row("Q3", |s| s.q3),
        ],
    )
}

fn optional(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|value| format!("{value:.decimals$}"))
        .unwrap_or_else(|| "N/A".to_string())
}

fn display_instant(instant: Instant) -> String {
    instant.naive().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn device_report_stem(project_id: &str, device_code: &str) -> String {
    format!("reporte_{device_code}_proyecto_{project_id}")
}

/// Reads a device's pages into one dataset tagged with `date_folder` and
/// `source_file`. Unreadable files are logged and left out.
pub fn load_device_dataset(device: &DeviceEntry) -> (Dataset, Vec<SourceFileInfo>) {
    let mut parts = Vec::new();
    let mut files = Vec::new();

    for (folder, path) in device.files() {
        match Dataset::read_csv(path) {
            Ok(mut dataset) => {
                let file = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default();
                dataset.push_constant_column("date_folder", &folder.name);
                dataset.push_constant_column("source_file", &file);
                files.push(SourceFileInfo {
                    date_folder: folder.name.clone(),
                    file,
                    records: dataset.len(),
                });
                parts.push(dataset);
            }
            Err(err) => warn!(
                component = "report",
                event = "report.file.skipped",
                path = %path.display(),
                error = %err
            ),
        }
    }

    let mut dataset = Dataset::concat(parts);
    sort_by_insertion_then_measurement(&mut dataset);
    (dataset, files)
}

/// One device report per device in the store. A device whose report fails to
/// render is logged and skipped.
pub fn generate_device_reports(
    layout: &StoreLayout,
    output_dir: &Path,
    renderer: &dyn DocumentRenderer,
) -> Result<Vec<PathBuf>, ReportError> {
    fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    for project in layout.scan() {
        for device in &project.devices {
            let (dataset, files) = load_device_dataset(device);
            if files.is_empty() {
                continue;
            }
            let document = build_device_report(&project.project_id, &device.code, &dataset, &files);
            let path = output_dir.join(
                renderer.output_name(&device_report_stem(&project.project_id, &device.code)),
            );
            match renderer.render(&document, &path) {
                Ok(()) => {
                    info!(
                        component = "report",
                        event = "report.device.written",
                        project = %project.project_id,
                        device = %device.code,
                        records = dataset.len(),
                        path = %path.display()
                    );
                    written.push(path);
                }
                Err(err) => warn!(
                    component = "report",
                    event = "report.device.failed",
                    project = %project.project_id,
                    device = %device.code,
                    error = %err
                ),
            }
        }
    }
    Ok(written)
}

/// One workbook per CSV file directly inside `input_dir`.
pub fn generate_workbooks(
    input_dir: &Path,
    output_dir: &Path,
    renderer: &dyn DocumentRenderer,
) -> Result<Vec<PathBuf>, ReportError> {
    if !input_dir.is_dir() {
        return Err(ReportError::MissingInput {
            path: input_dir.to_path_buf(),
        });
    }
    fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();

    for source in csv_files_in(input_dir) {
        let Some(stem) = source.file_stem().map(|stem| stem.to_string_lossy().to_string()) else {
            continue;
        };
        let source_name = source
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        let result = Dataset::read_csv(&source)
            .map_err(ReportError::from)
            .and_then(|dataset| {
                let path = output_dir.join(renderer.output_name(&stem));
                renderer.render(&build_workbook(&dataset, &source_name), &path)?;
                Ok((path, dataset.len()))
            });
        match result {
            Ok((path, records)) => {
                info!(
                    component = "report",
                    event = "report.workbook.written",
                    source = %source_name,
                    records,
                    path = %path.display()
                );
                written.push(path);
            }
            Err(err) => warn!(
                component = "report",
                event = "report.workbook.failed",
                source = %source_name,
                error = %err
            ),
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CsvShape;

    fn table_with_rows(count: usize) -> TableSpec {
        TableSpec::new(
            "Full Data",
            ["n"],
            (0..count).map(|n| vec![n.to_string()]).collect(),
        )
    }

    #[test]
    fn paginate_splits_into_fixed_row_budgets() {
        let pages = table_with_rows(80).paginate(ROWS_PER_PAGE);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].rows.len(), 35);
        assert_eq!(pages[2].rows.len(), 10);
        assert_eq!(pages[1].title, "Full Data - Page 2 (Rows 36-70)");
        assert!(!pages[0].page_break);
        assert!(pages[1].page_break);

        let single = table_with_rows(35).paginate(ROWS_PER_PAGE);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].title, "Full Data");
    }

    #[test]
    fn workbook_profiles_columns() {
        let dataset = Dataset::from_csv_str(
            "fecha,temp,label\n2025-01-01T00:00:00,1.5,a\n2025-01-03T00:00:00,,a\n",
            CsvShape::Strict,
        )
        .unwrap();
        let workbook = build_workbook(&dataset, "proyecto_1_unificado.csv");

        let summary = workbook.table("Summary").unwrap();
        assert_eq!(summary.rows[2], vec!["Data Period", "2025-01-01 to 2025-01-03"]);
        let columns = workbook.table("Columns").unwrap();
        assert_eq!(columns.rows[0][1], "datetime");
        assert_eq!(columns.rows[1], vec!["temp", "float", "1", "1", "50.00"]);
        assert_eq!(columns.rows[2][2], "1");
    }

    #[test]
    fn text_renderer_separates_pages_with_form_feed() {
        let document = ReportDocument {
            title: "DATA REPORT - EMMA-01".to_string(),
            lines: vec!["Device code: EMMA-01".to_string()],
            tables: table_with_rows(40).paginate(ROWS_PER_PAGE),
        };
        let text = render_text(&document);
        assert_eq!(text.matches(FORM_FEED).count(), 1);
        assert!(text.contains("Full Data - Page 1 (Rows 1-35)"));
    }

    #[test]
    fn device_report_contains_quality_and_paged_data() {
        let mut csv = String::from("fecha,fecha_insercion,codigo_interno,temp\n");
        for minute in 0..40 {
            csv.push_str(&format!(
                "2025-01-01T00:{minute:02}:00,2025-01-01T00:{minute:02}:30,EMMA-01,{}\n",
                if minute % 2 == 0 { 90 } else { 110 }
            ));
        }
        let dataset = Dataset::from_csv_str(&csv, CsvShape::Strict).unwrap();
        let files = vec![SourceFileInfo {
            date_folder: "2025-01-01".to_string(),
            file: "EMMA-01_paquete_001_20250101.csv".to_string(),
            records: 40,
        }];

        let report = build_device_report("1", "emma-01", &dataset, &files);
        assert_eq!(report.title, "DATA REPORT - EMMA-01");
        let quality = report.table("Quality Metrics").unwrap();
        assert_eq!(quality.rows.len(), 1);
        assert_eq!(quality.rows[0][0], "temp");
        assert_eq!(quality.rows[0][6], "EXCELENTE");
        let data_pages = report
            .tables
            .iter()
            .filter(|table| table.title.starts_with("Full Data"))
            .count();
        assert_eq!(data_pages, 2);
    }
}
