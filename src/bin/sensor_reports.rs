use sensorsync::{
    acquisition_config_from_env, generate_device_reports, generate_workbooks, init_logging,
    log_run_start, log_run_summary, logging_config_from_env, output_config_from_env,
    CsvSheetsRenderer, StoreLayout, TextReportRenderer,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start("sensor_reports", &logging);

    let cfg = acquisition_config_from_env();
    let outputs = output_config_from_env();
    let layout = StoreLayout::new(&cfg.data_root);

    let workbooks = if outputs.unified_dir.is_dir() {
        generate_workbooks(&outputs.unified_dir, &outputs.workbooks_dir, &CsvSheetsRenderer)?
    } else {
        println!(
            "No unified data at {}; skipping workbooks",
            outputs.unified_dir.display()
        );
        Vec::new()
    };
    for path in &workbooks {
        println!("workbook: {}", path.display());
    }

    let reports = generate_device_reports(&layout, &outputs.reports_dir, &TextReportRenderer)?;
    for path in &reports {
        println!("device report: {}", path.display());
    }

    println!(
        "Workbooks written: {}, device reports written: {}",
        workbooks.len(),
        reports.len()
    );
    log_run_summary("sensor_reports", workbooks.len() + reports.len());
    Ok(())
}
