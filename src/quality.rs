//! Per-variable data-quality scoring, descriptive statistics and the
//! sampling-interval profile of a device dataset.
//!
//! Quantiles use linear interpolation between closest ranks and standard
//! deviations are sample (n - 1) deviations.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::dataset::{is_null, parse_number, Dataset};
use crate::timestamp::{parse_instant, Instant};

pub const COMPLETENESS_WEIGHT: f64 = 30.0;
pub const CONSISTENCY_WEIGHT: f64 = 30.0;
pub const STABILITY_WEIGHT: f64 = 25.0;
pub const CONTINUITY_WEIGHT: f64 = 15.0;

const IQR_FENCE: f64 = 1.5;
const CONTINUITY_TOLERANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Classification {
    Deficiente,
    Aceptable,
    Buena,
    Excelente,
}

impl Classification {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Excelente
        } else if score >= 80.0 {
            Self::Buena
        } else if score >= 70.0 {
            Self::Aceptable
        } else {
            Self::Deficiente
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excelente => "EXCELENTE",
            Self::Buena => "BUENA",
            Self::Aceptable => "ACEPTABLE",
            Self::Deficiente => "DEFICIENTE",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityRecord {
    pub variable: String,
    pub total: usize,
    pub valid: usize,
    pub completeness: f64,
    pub consistency: f64,
    pub outliers: usize,
    /// Coefficient of variation in percent; `None` with fewer than two values.
    pub coefficient_of_variation: Option<f64>,
    pub stability: f64,
    pub continuity: f64,
    pub score: f64,
    pub classification: Classification,
}

/// Scores every variable column of `dataset`. Columns with no valid values
/// are skipped; the others are scored independently.
pub fn score_variables(dataset: &Dataset) -> Vec<QualityRecord> {
    let continuity = continuity_score(dataset);
    let mut records = Vec::new();

    for variable in dataset.variable_columns() {
        let Some(index) = dataset.column_index(&variable) else {
            continue;
        };
        let total = dataset.len();
        let values: Vec<f64> = dataset.column(index).filter_map(parse_number).collect();
        match score_values(&variable, total, &values, continuity) {
            Some(record) => records.push(record),
            None => debug!(
                component = "quality",
                event = "quality.variable.skipped",
                variable = %variable,
                total
            ),
        }
    }

    records
}

/// Scores one variable given its valid values and the dataset continuity.
pub fn score_values(
    variable: &str,
    total: usize,
    values: &[f64],
    continuity: f64,
) -> Option<QualityRecord> {
    if values.is_empty() || total == 0 {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let valid = sorted.len();

    let completeness = valid as f64 / total as f64 * 100.0;
    let outliers = count_outliers(&sorted)?;
    let consistency = (valid - outliers) as f64 / valid as f64 * 100.0;
    let coefficient_of_variation = coefficient_of_variation(&sorted);
    let stability = stability_band(coefficient_of_variation);
    let score = composite_score(completeness, consistency, stability, continuity);

    Some(QualityRecord {
        variable: variable.to_string(),
        total,
        valid,
        completeness,
        consistency,
        outliers,
        coefficient_of_variation,
        stability,
        continuity,
        score,
        classification: Classification::from_score(score),
    })
}

pub fn composite_score(
    completeness: f64,
    consistency: f64,
    stability: f64,
    continuity: f64,
) -> f64 {
    (COMPLETENESS_WEIGHT * completeness
        + CONSISTENCY_WEIGHT * consistency
        + STABILITY_WEIGHT * stability
        + CONTINUITY_WEIGHT * continuity)
        / 100.0
}

/// Discrete stability score for a coefficient of variation (percent).
/// An undefined coefficient falls in the lowest band.
pub fn stability_band(coefficient_of_variation: Option<f64>) -> f64 {
    match coefficient_of_variation {
        Some(cv) if cv <= 15.0 => 100.0,
        Some(cv) if cv <= 30.0 => 80.0,
        Some(cv) if cv <= 50.0 => 60.0,
        _ => 30.0,
    }
}

/// `std / mean * 100`, or 0 when the mean is exactly 0 (even for a single
/// value, whose standard deviation is undefined).
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    if mean == 0.0 {
        return Some(0.0);
    }
    let std = sample_std(values)?;
    Some(std / mean * 100.0)
}

fn count_outliers(sorted: &[f64]) -> Option<usize> {
    let q1 = quantile(sorted, 0.25)?;
    let q3 = quantile(sorted, 0.75)?;
    let iqr = q3 - q1;
    let lower = q1 - IQR_FENCE * iqr;
    let upper = q3 + IQR_FENCE * iqr;
    Some(
        sorted
            .iter()
            .filter(|value| **value < lower || **value > upper)
            .count(),
    )
}

/// Share of inter-measurement intervals within ±50% of the reference
/// interval (unique mode, else median). 100 when fewer than two
/// measurement instants are available.
pub fn continuity_score(dataset: &Dataset) -> f64 {
    let Some(column) = dataset.schema().measured_at else {
        return 100.0;
    };
    let mut instants: Vec<Instant> = dataset
        .column(column.index)
        .filter_map(parse_instant)
        .collect();
    instants.sort();

    let deltas = consecutive_deltas_ms(&instants);
    if deltas.is_empty() {
        return 100.0;
    }

    let Some(reference) = unique_mode(&deltas).or_else(|| median_ms(&deltas)) else {
        return 100.0;
    };
    let tolerance = reference.abs() * CONTINUITY_TOLERANCE;
    let normal = deltas
        .iter()
        .filter(|delta| (**delta as f64 - reference).abs() <= tolerance)
        .count();
    normal as f64 / deltas.len() as f64 * 100.0
}

fn consecutive_deltas_ms(sorted: &[Instant]) -> Vec<i64> {
    sorted
        .windows(2)
        .map(|pair| pair[1].millis_since(pair[0]))
        .collect()
}

fn unique_mode(deltas: &[i64]) -> Option<f64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for delta in deltas {
        *counts.entry(*delta).or_default() += 1;
    }
    let best = counts.values().copied().max()?;
    let mut modes = counts.iter().filter(|(_, count)| **count == best);
    let (mode, _) = modes.next()?;
    if modes.next().is_some() {
        return None;
    }
    Some(*mode as f64)
}

fn median_ms(deltas: &[i64]) -> Option<f64> {
    let mut sorted: Vec<f64> = deltas.iter().map(|delta| *delta as f64).collect();
    sorted.sort_by(f64::total_cmp);
    quantile(&sorted, 0.5)
}

/// Linear-interpolation quantile of an ascending slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = mean(values)?;
    let squares: f64 = values.iter().map(|value| (value - mean).powi(2)).sum();
    Some(squares / (values.len() - 1) as f64)
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptiveStats {
    pub variable: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    /// Smallest of the most frequent values.
    pub mode: f64,
    pub std: Option<f64>,
    pub variance: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

pub fn descriptive_stats(dataset: &Dataset) -> Vec<DescriptiveStats> {
    dataset
        .variable_columns()
        .into_iter()
        .filter_map(|variable| {
            let index = dataset.column_index(&variable)?;
            let values: Vec<f64> = dataset.column(index).filter_map(parse_number).collect();
            summarize(&variable, &values)
        })
        .collect()
}

pub fn summarize(variable: &str, values: &[f64]) -> Option<DescriptiveStats> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let min = *sorted.first()?;
    let max = *sorted.last()?;

    Some(DescriptiveStats {
        variable: variable.to_string(),
        count: sorted.len(),
        mean: mean(&sorted)?,
        median: quantile(&sorted, 0.5)?,
        mode: smallest_mode(&sorted)?,
        std: sample_std(&sorted),
        variance: sample_variance(&sorted),
        min,
        max,
        q1: quantile(&sorted, 0.25)?,
        q3: quantile(&sorted, 0.75)?,
    })
}

fn smallest_mode(sorted: &[f64]) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    let mut index = 0;
    while index < sorted.len() {
        let value = sorted[index];
        let run = sorted[index..].iter().take_while(|other| **other == value).count();
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((value, run));
        }
        index += run;
    }
    best.map(|(value, _)| value)
}

/// Summary of consecutive-instant intervals, in minutes.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntervalProfile {
    pub measurements: usize,
    pub per_day: BTreeMap<NaiveDate, usize>,
    pub mean_per_day: f64,
    pub min_per_day: usize,
    pub max_per_day: usize,
    pub measured_intervals: Option<IntervalStats>,
    pub inserted_intervals: Option<IntervalStats>,
}

impl IntervalProfile {
    pub fn days(&self) -> usize {
        self.per_day.len()
    }
}

/// Daily counts and interval statistics over rows that carry both a valid
/// measurement and insertion instant. `None` when the dataset lacks either
/// column or no row qualifies.
pub fn interval_profile(dataset: &Dataset) -> Option<IntervalProfile> {
    let schema = dataset.schema();
    if schema.measured_at.is_none() || schema.inserted_at.is_none() {
        warn!(
            component = "quality",
            event = "quality.interval_profile.missing_columns",
            has_measured = schema.measured_at.is_some(),
            has_inserted = schema.inserted_at.is_some()
        );
        return None;
    }

    let pairs: Vec<(Instant, Instant)> = dataset
        .records()
        .filter_map(|record| Some((record.measured_at?, record.inserted_at?)))
        .collect();
    if pairs.is_empty() {
        return None;
    }

    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for (measured, _) in &pairs {
        *per_day.entry(measured.date()).or_default() += 1;
    }
    let min_per_day = per_day.values().copied().min().unwrap_or_default();
    let max_per_day = per_day.values().copied().max().unwrap_or_default();
    let mean_per_day = pairs.len() as f64 / per_day.len() as f64;

    let mut measured: Vec<Instant> = pairs.iter().map(|(measured, _)| *measured).collect();
    let mut inserted: Vec<Instant> = pairs.iter().map(|(_, inserted)| *inserted).collect();
    measured.sort();
    inserted.sort();

    Some(IntervalProfile {
        measurements: pairs.len(),
        per_day,
        mean_per_day,
        min_per_day,
        max_per_day,
        measured_intervals: interval_stats(&measured),
        inserted_intervals: interval_stats(&inserted),
    })
}

fn interval_stats(sorted: &[Instant]) -> Option<IntervalStats> {
    let mut minutes: Vec<f64> = consecutive_deltas_ms(sorted)
        .into_iter()
        .map(|delta| delta as f64 / 60_000.0)
        .collect();
    minutes.sort_by(f64::total_cmp);

    Some(IntervalStats {
        count: minutes.len(),
        mean: mean(&minutes)?,
        median: quantile(&minutes, 0.5)?,
        std: sample_std(&minutes),
        min: *minutes.first()?,
        max: *minutes.last()?,
        q1: quantile(&minutes, 0.25)?,
        q3: quantile(&minutes, 0.75)?,
    })
}

/// Fraction of non-null cells in a column, in percent.
pub fn column_completeness(dataset: &Dataset, index: usize) -> f64 {
    if dataset.is_empty() {
        return 0.0;
    }
    let present = dataset.column(index).filter(|cell| !is_null(cell)).count();
    present as f64 / dataset.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::CsvShape;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_close(quantile(&sorted, 0.25).unwrap(), 1.75);
        assert_close(quantile(&sorted, 0.5).unwrap(), 2.5);
        assert_close(quantile(&sorted, 0.75).unwrap(), 3.25);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn stability_bands_are_inclusive_at_upper_edge() {
        assert_eq!(stability_band(Some(10.0)), 100.0);
        assert_eq!(stability_band(Some(15.0)), 100.0);
        assert_eq!(stability_band(Some(30.0)), 80.0);
        assert_eq!(stability_band(Some(40.0)), 60.0);
        assert_eq!(stability_band(Some(50.0)), 60.0);
        assert_eq!(stability_band(Some(50.1)), 30.0);
        assert_eq!(stability_band(None), 30.0);
    }

    #[test]
    fn classification_bands_are_inclusive_at_lower_edge() {
        assert_eq!(Classification::from_score(90.0), Classification::Excelente);
        assert_eq!(Classification::from_score(89.99), Classification::Buena);
        assert_eq!(Classification::from_score(80.0), Classification::Buena);
        assert_eq!(Classification::from_score(70.0), Classification::Aceptable);
        assert_eq!(Classification::from_score(69.9), Classification::Deficiente);
    }

    #[test]
    fn composite_weights_each_factor() {
        assert_close(composite_score(100.0, 100.0, 100.0, 100.0), 100.0);
        assert_close(composite_score(100.0, 100.0, 60.0, 100.0), 90.0);
        assert_close(composite_score(0.0, 0.0, 60.0, 0.0), 15.0);
    }

    #[test]
    fn outliers_reduce_consistency() {
        let record = score_values("t", 6, &[10.0, 10.0, 11.0, 11.0, 12.0, 100.0], 100.0).unwrap();
        assert_eq!(record.outliers, 1);
        assert_close(record.consistency, 5.0 / 6.0 * 100.0);
    }

    #[test]
    fn zero_mean_yields_zero_cv() {
        assert_eq!(coefficient_of_variation(&[-1.0, 1.0]), Some(0.0));
        assert_eq!(coefficient_of_variation(&[5.0]), None);
        assert_eq!(coefficient_of_variation(&[]), None);
    }

    #[test]
    fn single_zero_reading_is_fully_stable() {
        assert_eq!(coefficient_of_variation(&[0.0]), Some(0.0));
        let record = score_values("t", 1, &[0.0], 100.0).unwrap();
        assert_eq!(record.stability, 100.0);

        let single = score_values("t", 1, &[4.0], 100.0).unwrap();
        assert_eq!(single.stability, 30.0);
    }

    #[test]
    fn continuity_counts_intervals_near_the_mode() {
        let csv = "fecha,v\n\
2025-01-01T00:00:00,1\n\
2025-01-01T00:10:00,1\n\
2025-01-01T00:20:00,1\n\
2025-01-01T00:30:00,1\n\
2025-01-01T02:00:00,1\n";
        let dataset = Dataset::from_csv_str(csv, CsvShape::Strict).unwrap();
        assert_close(continuity_score(&dataset), 75.0);
    }

    #[test]
    fn continuity_defaults_to_full_without_enough_instants() {
        let no_column = Dataset::from_csv_str("v\n1\n2\n", CsvShape::Strict).unwrap();
        assert_eq!(continuity_score(&no_column), 100.0);

        let single =
            Dataset::from_csv_str("fecha,v\n2025-01-01,1\nbad,2\n", CsvShape::Strict).unwrap();
        assert_eq!(continuity_score(&single), 100.0);
    }

    #[test]
    fn continuity_falls_back_to_median_without_unique_mode() {
        // intervals 10, 10, 40, 40 min: no unique mode, median 25, tolerance 12.5
        let csv = "fecha\n\
2025-01-01T00:00:00\n\
2025-01-01T00:10:00\n\
2025-01-01T00:20:00\n\
2025-01-01T01:00:00\n\
2025-01-01T01:40:00\n";
        let dataset = Dataset::from_csv_str(csv, CsvShape::Strict).unwrap();
        assert_close(continuity_score(&dataset), 0.0);
    }

    #[test]
    fn descriptive_stats_match_reference_values() {
        let stats = summarize("v", &[4.0, 1.0, 2.0, 2.0, 3.0, 3.0]).unwrap();
        assert_eq!(stats.count, 6);
        assert_close(stats.mean, 2.5);
        assert_close(stats.median, 2.5);
        assert_eq!(stats.mode, 2.0);
        assert_close(stats.variance.unwrap(), 1.1);
        assert_close(stats.q1, 2.0);
        assert_close(stats.q3, 3.0);
        assert_eq!((stats.min, stats.max), (1.0, 4.0));
        assert_eq!(summarize("v", &[]), None);
    }

    #[test]
    fn interval_profile_groups_days_and_intervals() {
        let csv = "fecha,fecha_insercion\n\
2025-01-01T00:00:00,2025-01-01T00:05:00\n\
2025-01-01T00:30:00,2025-01-01T00:35:00\n\
2025-01-02T00:00:00,2025-01-02T00:05:00\n\
bad,2025-01-02T00:10:00\n";
        let dataset = Dataset::from_csv_str(csv, CsvShape::Strict).unwrap();
        let profile = interval_profile(&dataset).unwrap();

        assert_eq!(profile.measurements, 3);
        assert_eq!(profile.days(), 2);
        assert_eq!((profile.min_per_day, profile.max_per_day), (1, 2));
        assert_close(profile.mean_per_day, 1.5);
        let measured = profile.measured_intervals.unwrap();
        assert_eq!(measured.count, 2);
        assert_close(measured.min, 30.0);
        assert_close(measured.max, 1410.0);
    }
}
