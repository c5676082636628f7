use chrono::Local;
use sensorsync::{
    acquisition_config_from_env, audit_store, init_logging, log_run_start, log_run_summary,
    logging_config_from_env, output_config_from_env, DocumentRenderer, ReportDocument,
    StoreLayout, TextReportRenderer,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start("sensor_gap_audit", &logging);

    let cfg = acquisition_config_from_env();
    let outputs = output_config_from_env();
    let layout = StoreLayout::new(&cfg.data_root);

    println!("Auditing stored pages under {}", cfg.data_root.display());
    let audit = audit_store(&layout);

    for row in &audit.future_dated {
        println!(
            "  future dated: {} | {} | measured {} | inserted {}",
            row.file, row.device_code, row.measured_at, row.inserted_at
        );
    }

    let mut artifacts = 0;
    if !audit.missing_days.is_empty() || !audit.future_dated.is_empty() {
        let stem = format!("missing_days_{}", Local::now().format("%Y%m%d_%H%M%S"));
        let document = ReportDocument {
            title: "Missing Days Audit".to_string(),
            lines: vec![
                format!("Files scanned: {}", audit.files_scanned),
                format!("Files skipped: {}", audit.files_skipped),
            ],
            tables: vec![audit.missing_days_table(), audit.future_dated_table()],
        };
        let renderer = TextReportRenderer;
        let path = outputs.reports_dir.join(renderer.output_name(&stem));
        renderer.render(&document, &path)?;
        println!("Report written: {}", path.display());
        artifacts = 1;
    } else {
        println!("No missing days or future-dated records found");
    }

    println!(
        "Files scanned: {} (skipped {}), device files with gaps: {}, missing days: {}, \
         future-dated records: {}",
        audit.files_scanned,
        audit.files_skipped,
        audit.groups_with_gaps(),
        audit.missing_days.len(),
        audit.future_dated.len()
    );
    println!("Reports written: {artifacts}");
    log_run_summary("sensor_gap_audit", artifacts);
    Ok(())
}
