use sensorsync::{
    init_logging, log_run_start, log_run_summary, logging_config_from_env,
    output_config_from_env, upload_csv_directory, DirectoryRemote,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_run_start("sensor_upload", &logging);

    let outputs = output_config_from_env();
    let Some(remote_root) = outputs.remote_root.clone() else {
        println!("SENSORSYNC_REMOTE_ROOT is not set; nothing uploaded");
        println!("Files uploaded: 0");
        log_run_summary("sensor_upload", 0);
        return Ok(());
    };

    println!(
        "Uploading CSV files from {} to {}/{}",
        outputs.unified_dir.display(),
        remote_root.display(),
        outputs.remote_folder
    );
    let remote = DirectoryRemote::new(remote_root);
    let report = upload_csv_directory(&outputs.unified_dir, &outputs.remote_folder, &remote)?;

    if report.folder_created {
        println!("Created remote folder {}", report.folder);
    }
    for (file, err) in &report.failed {
        println!("  failed: {file}: {err}");
    }
    println!(
        "Files uploaded: {} (failed {})",
        report.uploaded.len(),
        report.failed.len()
    );
    log_run_summary("sensor_upload", report.uploaded.len());
    Ok(())
}
