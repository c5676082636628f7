use sensorsync::{
    acquisition_config_from_env, init_logging, log_acquisition_settings, log_run_start,
    log_run_summary, logging_config_from_env, run_acquisition, ReqwestPageSource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start("sensor_sync", &logging);

    let cfg = acquisition_config_from_env();
    log_acquisition_settings(&cfg);

    println!(
        "Syncing devices from {} into {} (page size {}, at most {} pages per device)",
        cfg.devices_path.display(),
        cfg.data_root.display(),
        cfg.page_size,
        cfg.max_iterations
    );

    let source = ReqwestPageSource::new(cfg.http_timeout_ms)?;
    let summary = run_acquisition(&cfg, &source);

    if let Some(err) = &summary.config_error {
        println!("Device list problem: {err}");
    }
    for device in &summary.devices {
        let watermark = device
            .watermark
            .map(|instant| instant.format_canonical())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} start={} ({:?}) pages={} records={} end={} watermark={}{}",
            device.device,
            device.start_date,
            device.start_source,
            device.pages_written.len(),
            device.records,
            device.termination.as_str(),
            watermark,
            device
                .error
                .as_deref()
                .map(|err| format!(" error={err}"))
                .unwrap_or_default()
        );
    }

    let pages = summary.pages_written();
    println!(
        "Files written: {pages} ({} records, {} devices, {} failed)",
        summary.records(),
        summary.devices.len(),
        summary.failed_devices()
    );
    log_run_summary("sensor_sync", pages);
    Ok(())
}
