//! Tabular measurement data as received from the API or read back from the store.
//!
//! A dataset keeps every cell as text so pages can be written back verbatim;
//! typed access goes through [`DatasetSchema`] (core columns) and
//! [`Dataset::variable_columns`] (numeric extension columns).

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::timestamp::{parse_instant, Instant};

pub const MEASURED_AT_COLUMN: &str = "fecha";
pub const INSERTED_AT_COLUMN: &str = "fecha_insercion";
pub const DEVICE_CODE_COLUMN: &str = "codigo_interno";
pub const PROJECT_ID_COLUMN: &str = "id_proyecto";

/// Columns never scored as variables: identifiers, timestamps, descriptive
/// metadata and the context columns added by unification and reporting.
pub const NON_VARIABLE_COLUMNS: [&str; 16] = [
    MEASURED_AT_COLUMN,
    INSERTED_AT_COLUMN,
    PROJECT_ID_COLUMN,
    DEVICE_CODE_COLUMN,
    "id_sesion",
    "sesion_descripcion",
    "fecha_inicio",
    "ubicacion",
    "dispositivo_descripcion",
    "Carpeta",
    "Archivo",
    "fecha_insercion_dt",
    "project",
    "device",
    "date_folder",
    "source_file",
];

const NULL_TOKENS: [&str; 8] = ["", "nan", "NaN", "NA", "N/A", "null", "NULL", "None"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV payload has no header row")]
    MissingHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvShape {
    /// Every row must match the header width.
    Strict,
    /// Short rows are padded and long rows truncated.
    Lenient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRef {
    pub index: usize,
    pub name: &'static str,
}

/// Core-column capabilities of one dataset, resolved once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatasetSchema {
    pub measured_at: Option<ColumnRef>,
    pub inserted_at: Option<ColumnRef>,
    pub device_code: Option<ColumnRef>,
    pub project_id: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord<'a> {
    pub row_index: usize,
    pub measured_at: Option<Instant>,
    pub inserted_at: Option<Instant>,
    pub device_code: Option<&'a str>,
    pub project_id: Option<&'a str>,
    pub extensions: Vec<(&'a str, &'a str)>,
}

impl DatasetSchema {
    pub fn resolve(dataset: &Dataset) -> Self {
        let find = |name: &'static str| {
            dataset
                .headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
                .map(|index| ColumnRef { index, name })
        };

        Self {
            measured_at: find(MEASURED_AT_COLUMN),
            inserted_at: find(INSERTED_AT_COLUMN),
            device_code: find(DEVICE_CODE_COLUMN),
            project_id: find(PROJECT_ID_COLUMN),
        }
    }

    fn is_core(&self, index: usize) -> bool {
        [
            self.measured_at,
            self.inserted_at,
            self.device_code,
            self.project_id,
        ]
        .iter()
        .flatten()
        .any(|column| column.index == index)
    }
}

impl Dataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows.into_iter().map(|row| fit_row(row, width)).collect();
        Self { headers, rows }
    }

    pub fn from_csv_str(text: &str, shape: CsvShape) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(matches!(shape, CsvShape::Lenient))
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.trim_start_matches('\u{feff}').to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(|header| header.trim().is_empty()) {
            return Err(DatasetError::MissingHeader);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self::new(headers, rows))
    }

    pub fn read_csv(path: &Path) -> Result<Self, DatasetError> {
        let text = fs::read_to_string(path)?;
        Self::from_csv_str(&text, CsvShape::Lenient)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DatasetError> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[index].as_str())
    }

    pub fn schema(&self) -> DatasetSchema {
        DatasetSchema::resolve(self)
    }

    /// Appends a column holding the same value on every row.
    pub fn push_constant_column(&mut self, name: &str, value: &str) {
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(value.to_string());
        }
    }

    pub fn records(&self) -> impl Iterator<Item = MeasurementRecord<'_>> + '_ {
        let schema = self.schema();
        self.rows.iter().enumerate().map(move |(row_index, row)| {
            let text = move |column: Option<ColumnRef>| {
                column
                    .map(|column| row[column.index].trim())
                    .filter(|value| !is_null(value))
            };
            let instant =
                move |column: Option<ColumnRef>| column.and_then(|c| parse_instant(&row[c.index]));

            MeasurementRecord {
                row_index,
                measured_at: instant(schema.measured_at),
                inserted_at: instant(schema.inserted_at),
                device_code: text(schema.device_code),
                project_id: text(schema.project_id),
                extensions: self
                    .headers
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| !schema.is_core(*index))
                    .map(|(index, header)| (header.as_str(), row[index].as_str()))
                    .collect(),
            }
        })
    }

    /// Extension columns eligible for scoring: outside the non-variable set
    /// and numeric in every non-null cell.
    pub fn variable_columns(&self) -> Vec<String> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !NON_VARIABLE_COLUMNS.contains(&header.trim()))
            .filter(|(index, _)| {
                self.column(*index)
                    .all(|cell| is_null(cell) || parse_number(cell).is_some())
            })
            .map(|(_, header)| header.clone())
            .collect()
    }

    /// Reorders rows by `key`; the sort is stable.
    pub fn sort_rows_by_key<K: Ord>(&mut self, mut key: impl FnMut(&[String]) -> K) {
        self.rows.sort_by_key(|row| key(row));
    }

    /// Moves the named columns to the end, keeping the relative order of the rest.
    pub fn move_columns_last(&mut self, names: &[&str]) {
        let mut order: Vec<usize> = (0..self.headers.len())
            .filter(|index| !names.contains(&self.headers[*index].as_str()))
            .collect();
        for name in names {
            if let Some(index) = self.column_index(name) {
                order.push(index);
            }
        }

        self.headers = order.iter().map(|index| self.headers[*index].clone()).collect();
        for row in &mut self.rows {
            *row = order.iter().map(|index| row[*index].clone()).collect();
        }
    }

    /// Row-wise union; headers are merged in first-seen order and absent
    /// cells are left empty.
    pub fn concat(parts: Vec<Dataset>) -> Dataset {
        let mut headers: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for part in &parts {
            for header in &part.headers {
                if seen.insert(header.clone()) {
                    headers.push(header.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(parts.iter().map(Dataset::len).sum());
        for part in parts {
            let positions: Vec<usize> = part
                .headers
                .iter()
                .map(|header| {
                    headers
                        .iter()
                        .position(|merged| merged == header)
                        .unwrap_or_default()
                })
                .collect();
            for row in part.rows {
                let mut merged = vec![String::new(); headers.len()];
                for (cell, position) in row.into_iter().zip(&positions) {
                    merged[*position] = cell;
                }
                rows.push(merged);
            }
        }

        Dataset { headers, rows }
    }
}

pub fn is_null(cell: &str) -> bool {
    NULL_TOKENS.contains(&cell.trim())
}

/// Numeric coercion for a single cell; null tokens and non-finite values are `None`.
pub fn parse_number(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if is_null(trimmed) {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

fn fit_row(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "fecha,fecha_insercion,codigo_interno,id_proyecto,temperatura,estado\n\
2025-01-01T00:00:00,2025-01-01T00:05:00,EMMA-01,1,21.5,ok\n\
2025-01-01T00:10:00,2025-01-01T00:15:00,EMMA-01,1,,ok\n";

    #[test]
    fn schema_resolves_core_columns_once() {
        let dataset = Dataset::from_csv_str(PAGE, CsvShape::Strict).unwrap();
        let schema = dataset.schema();
        assert_eq!(schema.measured_at.map(|c| c.index), Some(0));
        assert_eq!(schema.inserted_at.map(|c| c.index), Some(1));
        assert_eq!(schema.device_code.map(|c| c.index), Some(2));
        assert_eq!(schema.project_id.map(|c| c.index), Some(3));

        let bare = Dataset::from_csv_str("a,b\n1,2\n", CsvShape::Strict).unwrap();
        assert_eq!(bare.schema(), DatasetSchema::default());
    }

    #[test]
    fn records_split_core_fields_from_extensions() {
        let dataset = Dataset::from_csv_str(PAGE, CsvShape::Strict).unwrap();
        let records: Vec<_> = dataset.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_code, Some("EMMA-01"));
        assert_eq!(records[0].project_id, Some("1"));
        assert_eq!(
            records[0].extensions,
            vec![("temperatura", "21.5"), ("estado", "ok")]
        );
        assert!(records[1].measured_at < records[1].inserted_at);
    }

    #[test]
    fn variable_columns_require_numeric_cells() {
        let dataset = Dataset::from_csv_str(PAGE, CsvShape::Strict).unwrap();
        assert_eq!(dataset.variable_columns(), vec!["temperatura".to_string()]);
    }

    #[test]
    fn strict_shape_rejects_ragged_rows_lenient_pads_them() {
        let ragged = "a,b,c\n1,2,3\n4,5,6,7\n";
        assert!(matches!(
            Dataset::from_csv_str(ragged, CsvShape::Strict),
            Err(DatasetError::Csv(_))
        ));

        let short = Dataset::from_csv_str("a,b,c\n1\n", CsvShape::Lenient).unwrap();
        assert_eq!(short.rows()[0], vec!["1", "", ""]);
    }

    #[test]
    fn concat_unions_headers_in_first_seen_order() {
        let left = Dataset::from_csv_str("a,b\n1,2\n", CsvShape::Strict).unwrap();
        let right = Dataset::from_csv_str("b,c\n3,4\n", CsvShape::Strict).unwrap();
        let merged = Dataset::concat(vec![left, right]);

        assert_eq!(merged.headers(), ["a", "b", "c"]);
        assert_eq!(merged.rows()[0], vec!["1", "2", ""]);
        assert_eq!(merged.rows()[1], vec!["", "3", "4"]);
    }

    #[test]
    fn move_columns_last_keeps_remaining_order() {
        let mut dataset = Dataset::from_csv_str("x,a,y,b\n1,2,3,4\n", CsvShape::Strict).unwrap();
        dataset.move_columns_last(&["x", "y"]);
        assert_eq!(dataset.headers(), ["a", "b", "x", "y"]);
        assert_eq!(dataset.rows()[0], vec!["2", "4", "1", "3"]);
    }

    #[test]
    fn parse_number_treats_null_tokens_and_nan_as_missing() {
        assert_eq!(parse_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("abc"), None);
    }
}
