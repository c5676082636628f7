use sensorsync::{
    acquisition_config_from_env, init_logging, log_run_start, log_run_summary,
    logging_config_from_env, output_config_from_env, unify_projects, StoreLayout,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start("sensor_unify", &logging);

    let cfg = acquisition_config_from_env();
    let outputs = output_config_from_env();
    let layout = StoreLayout::new(&cfg.data_root);

    println!(
        "Unifying projects under {} into {}",
        cfg.data_root.display(),
        outputs.unified_dir.display()
    );
    let summaries = unify_projects(&layout, &outputs.unified_dir)?;

    for summary in &summaries {
        println!(
            "project {}: {} records from {} files ({} devices) -> {}",
            summary.project_id,
            summary.records,
            summary.files.len(),
            summary.devices,
            summary.output_path.display()
        );
    }
    println!(
        "Unified files written: {} ({} records)",
        summaries.len(),
        summaries.iter().map(|s| s.records).sum::<usize>()
    );
    log_run_summary("sensor_unify", summaries.len());
    Ok(())
}
