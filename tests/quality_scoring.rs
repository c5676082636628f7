use sensorsync::{
    continuity_score, descriptive_stats, interval_profile, score_variables, Classification,
    CsvShape, Dataset,
};

fn dataset(text: &str) -> Dataset {
    Dataset::from_csv_str(text, CsvShape::Strict).expect("fixture CSV should parse")
}

fn approx(left: f64, right: f64) -> bool {
    (left - right).abs() < 1e-6
}

#[test]
fn steady_hourly_series_scores_excellent() {
    let data = dataset(
        "fecha,fecha_insercion,codigo_interno,temperatura\n\
         2025-01-01T00:00:00,2025-01-01T00:00:05,EMMA-01,90\n\
         2025-01-01T01:00:00,2025-01-01T01:00:05,EMMA-01,110\n\
         2025-01-01T02:00:00,2025-01-01T02:00:05,EMMA-01,90\n\
         2025-01-01T03:00:00,2025-01-01T03:00:05,EMMA-01,110\n",
    );

    let records = score_variables(&data);

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.variable, "temperatura");
    assert!(approx(record.completeness, 100.0));
    assert!(approx(record.consistency, 100.0));
    assert_eq!(record.outliers, 0);
    assert!(approx(record.stability, 100.0));
    assert!(approx(record.continuity, 100.0));
    assert!(approx(record.score, 100.0));
    assert_eq!(record.classification, Classification::Excelente);
    assert_eq!(record.classification.as_str(), "EXCELENTE");
}

#[test]
fn wide_swings_drop_stability_but_stay_excellent() {
    let data = dataset(
        "fecha,codigo_interno,humedad\n\
         2025-01-01T00:00:00,EMMA-01,60\n\
         2025-01-01T01:00:00,EMMA-01,140\n\
         2025-01-01T02:00:00,EMMA-01,60\n\
         2025-01-01T03:00:00,EMMA-01,140\n",
    );

    let record = &score_variables(&data)[0];

    let cv = record.coefficient_of_variation.expect("four values give a CV");
    assert!(cv > 30.0 && cv <= 50.0);
    assert!(approx(record.stability, 60.0));
    assert!(approx(record.score, 90.0));
    assert_eq!(record.classification, Classification::Excelente);
}

#[test]
fn empty_variable_is_skipped_and_others_still_scored() {
    let data = dataset(
        "fecha,codigo_interno,presion,viento\n\
         2025-01-01T00:00:00,EMMA-01,,3\n\
         2025-01-01T01:00:00,EMMA-01,NaN,4\n\
         2025-01-01T02:00:00,EMMA-01,,3\n",
    );

    let records = score_variables(&data);

    let names: Vec<&str> = records.iter().map(|r| r.variable.as_str()).collect();
    assert_eq!(names, vec!["viento"]);
}

#[test]
fn partially_missing_values_lower_completeness() {
    let data = dataset(
        "fecha,codigo_interno,presion\n\
         2025-01-01T00:00:00,EMMA-01,1010\n\
         2025-01-01T01:00:00,EMMA-01,\n\
         2025-01-01T02:00:00,EMMA-01,1011\n\
         2025-01-01T03:00:00,EMMA-01,1012\n",
    );

    let record = &score_variables(&data)[0];

    assert_eq!(record.total, 4);
    assert_eq!(record.valid, 3);
    assert!(approx(record.completeness, 75.0));
}

#[test]
fn one_long_gap_costs_a_quarter_of_continuity() {
    let data = dataset(
        "fecha,codigo_interno,temperatura\n\
         2025-01-01T00:00:00,EMMA-01,1\n\
         2025-01-01T01:00:00,EMMA-01,1\n\
         2025-01-01T02:00:00,EMMA-01,1\n\
         2025-01-01T03:00:00,EMMA-01,1\n\
         2025-01-01T10:00:00,EMMA-01,1\n",
    );

    assert!(approx(continuity_score(&data), 75.0));
}

#[test]
fn descriptive_and_interval_views_cover_the_same_rows() {
    let data = dataset(
        "fecha,fecha_insercion,codigo_interno,temperatura\n\
         2025-01-01T00:00:00,2025-01-01T00:10:00,EMMA-01,10\n\
         2025-01-01T00:30:00,2025-01-01T00:40:00,EMMA-01,12\n\
         2025-01-02T00:00:00,2025-01-02T00:10:00,EMMA-01,14\n",
    );

    let stats = descriptive_stats(&data);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].count, 3);
    assert!(approx(stats[0].mean, 12.0));
    assert!(approx(stats[0].min, 10.0));
    assert!(approx(stats[0].max, 14.0));

    let profile = interval_profile(&data).expect("fecha column is present");
    assert_eq!(profile.measurements, 3);
    assert_eq!(profile.days(), 2);
}
