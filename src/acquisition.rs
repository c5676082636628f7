//! Multi-device acquisition run: load the device list, fetch each device in
//! order, advance watermarks, save the list once.

use std::path::PathBuf;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::checkpoint::{resolve_start, StartSource};
use crate::config::{AcquisitionConfig, DeviceRegistry};
use crate::fetcher::{fetch_cycle, CycleTermination, PageSource};
use crate::store::StoreLayout;
use crate::timestamp::Instant;

#[derive(Debug)]
pub struct DeviceOutcome {
    pub device: String,
    pub start_date: NaiveDate,
    pub start_source: StartSource,
    pub pages_written: Vec<PathBuf>,
    pub records: usize,
    pub termination: CycleTermination,
    pub watermark: Option<Instant>,
    pub watermark_advanced: bool,
    pub error: Option<String>,
}

impl DeviceOutcome {
    pub fn has_new_data(&self) -> bool {
        !self.pages_written.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AcquisitionSummary {
    pub devices: Vec<DeviceOutcome>,
    /// Set when the device list could not be loaded or saved.
    pub config_error: Option<String>,
}

impl AcquisitionSummary {
    pub fn pages_written(&self) -> usize {
        self.devices.iter().map(|device| device.pages_written.len()).sum()
    }

    pub fn records(&self) -> usize {
        self.devices.iter().map(|device| device.records).sum()
    }

    pub fn failed_devices(&self) -> usize {
        self.devices
            .iter()
            .filter(|device| device.termination == CycleTermination::Failed)
            .count()
    }
}

pub fn run_acquisition(cfg: &AcquisitionConfig, source: &dyn PageSource) -> AcquisitionSummary {
    let mut registry = match DeviceRegistry::load(&cfg.devices_path) {
        Ok(registry) => registry,
        Err(err) => {
            error!(
                component = "acquisition",
                event = "acquisition.config.unavailable",
                path = %cfg.devices_path.display(),
                error = %err
            );
            return AcquisitionSummary {
                devices: Vec::new(),
                config_error: Some(err.to_string()),
            };
        }
    };

    let layout = StoreLayout::new(&cfg.data_root);
    let mut summary = AcquisitionSummary::default();
    let mut watermarks_changed = false;

    info!(
        component = "acquisition",
        event = "acquisition.start",
        devices = registry.devices.len(),
        data_root = %cfg.data_root.display()
    );

    for device in registry.devices.iter_mut() {
        let device_dir = layout.device_dir(device.project_id(), &device.internal_code);
        let start = resolve_start(device, &device_dir, cfg.fallback_start);
        let report = fetch_cycle(device, start.date, cfg, source, &layout);

        let watermark_advanced = match report.watermark_update() {
            Some(candidate) => device.advance_watermark(candidate),
            None => false,
        };
        watermarks_changed |= watermark_advanced;

        if report.pages_written.is_empty() && report.failure.is_none() {
            info!(
                component = "acquisition",
                event = "acquisition.device.no_new_data",
                device = %device.label()
            );
        }
        if let Some(err) = &report.failure {
            warn!(
                component = "acquisition",
                event = "acquisition.device.failed",
                device = %device.label(),
                pages_kept = report.pages_written.len(),
                error = %err
            );
        }

        summary.devices.push(DeviceOutcome {
            device: device.label(),
            start_date: start.date,
            start_source: start.source,
            records: report.records,
            termination: report.termination,
            watermark: report.watermark,
            watermark_advanced,
            error: report.failure.as_ref().map(ToString::to_string),
            pages_written: report.pages_written,
        });
    }

    if watermarks_changed {
        if let Err(err) = registry.save() {
            error!(
                component = "acquisition",
                event = "acquisition.config.save_failed",
                path = %registry.path().display(),
                error = %err
            );
            summary.config_error = Some(err.to_string());
        }
    }

    info!(
        component = "acquisition",
        event = "acquisition.complete",
        devices = summary.devices.len(),
        pages = summary.pages_written(),
        records = summary.records(),
        failed = summary.failed_devices()
    );
    summary
}
