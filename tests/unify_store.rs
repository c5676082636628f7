use std::fs;
use std::path::Path;

use sensorsync::{
    unified_file_name, unify_projects, CsvShape, Dataset, StoreLayout, SUMMARY_FILE_NAME,
};
use tempfile::tempdir;

fn write_page(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

#[test]
fn projects_are_unified_sorted_and_annotated() {
    let store = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_page(
        store.path(),
        "proyecto_7/EMMA-01/2025-01-01/EMMA-01_paquete_001_20250102.csv",
        "fecha,fecha_insercion,codigo_interno,temperatura\n\
         2025-01-02T00:00:00,2025-01-02T00:00:05,EMMA-01,21\n\
         2025-01-01T00:00:00,2025-01-01T00:00:05,EMMA-01,20\n",
    );
    write_page(
        store.path(),
        "proyecto_7/EMMA-02/2025-01-01/EMMA-02_paquete_001_20250101.csv",
        "fecha,fecha_insercion,codigo_interno,humedad\n\
         2025-01-01T12:00:00,2025-01-01T12:00:05,EMMA-02,55\n",
    );
    write_page(
        store.path(),
        "proyecto_9/EMMA-09/2025-01-01/EMMA-09_paquete_001_20250101.csv",
        "fecha,fecha_insercion,codigo_interno\n",
    );

    let summaries = unify_projects(&StoreLayout::new(store.path()), output.path()).unwrap();

    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.project_id, "7");
    assert_eq!(summary.records, 3);
    assert_eq!(summary.devices, 2);
    assert_eq!(summary.date_folders, 1);
    assert_eq!(
        summary.first_insertion.unwrap().format_canonical(),
        "2025-01-01T00:00:05"
    );
    assert_eq!(
        summary.last_insertion.unwrap().format_canonical(),
        "2025-01-02T00:00:05"
    );

    let path = output.path().join(unified_file_name("7"));
    assert_eq!(summary.output_path, path);
    let unified = Dataset::from_csv_str(&fs::read_to_string(&path).unwrap(), CsvShape::Strict)
        .unwrap();
    assert_eq!(
        unified.headers(),
        [
            "fecha",
            "fecha_insercion",
            "codigo_interno",
            "temperatura",
            "humedad",
            "project",
            "device",
            "date_folder",
            "source_file",
        ]
    );
    let inserted: Vec<&str> = unified.column(1).collect();
    assert_eq!(
        inserted,
        vec![
            "2025-01-01T00:00:05",
            "2025-01-01T12:00:05",
            "2025-01-02T00:00:05"
        ]
    );
    assert_eq!(unified.rows()[1][4], "55");
    assert_eq!(unified.rows()[1][3], "");
    assert_eq!(unified.rows()[1][6], "EMMA-02");

    let report = fs::read_to_string(output.path().join(SUMMARY_FILE_NAME)).unwrap();
    assert!(report.contains("PROJECT 7"));
    assert!(report.contains("Records: 3"));
    assert!(!report.contains("PROJECT 9"));
}

#[test]
fn empty_store_writes_no_files() {
    let store = tempdir().unwrap();
    let output = tempdir().unwrap();

    let summaries = unify_projects(&StoreLayout::new(store.path()), output.path()).unwrap();

    assert!(summaries.is_empty());
    assert!(!output.path().join(SUMMARY_FILE_NAME).exists());
}
