//! Sensor measurement acquisition and data-quality reporting.
//!
//! Current implemented scope:
//! - incremental, checkpointed page download per device into a CSV store
//! - gap and causality audit over stored pages
//! - per-project unification, workbooks and per-device quality reports
//! - folder upload to a remote store

mod acquisition;
mod checkpoint;
mod cloud;
mod config;
mod dataset;
mod fetcher;
mod gaps;
mod observability;
mod quality;
mod report;
mod store;
mod timestamp;
mod unify;

pub use acquisition::{run_acquisition, AcquisitionSummary, DeviceOutcome};
pub use checkpoint::{newest_local_insertion, resolve_start, ResolvedStart, StartSource};
pub use cloud::{
    upload_csv_directory, DirectoryRemote, RemoteFolderStore, UploadError, UploadReport,
};
pub use config::{
    acquisition_config_from_env, fallback_epoch, output_config_from_env, AcquisitionConfig,
    ConfigError, DeviceConfig, DeviceRegistry, OutputConfig, ProjectId, DEFAULT_API_BASE_URL,
};
pub use dataset::{
    is_null, parse_number, ColumnRef, CsvShape, Dataset, DatasetError, DatasetSchema,
    MeasurementRecord, DEVICE_CODE_COLUMN, INSERTED_AT_COLUMN, MEASURED_AT_COLUMN,
    NON_VARIABLE_COLUMNS, PROJECT_ID_COLUMN,
};
pub use fetcher::{
    classify_response, fetch_cycle, CycleReport, CycleTermination, FetchError, Page, PageCursor,
    PageOutcome, PageRequest, PageSource, RawPage, ReqwestPageSource, MEASUREMENT_TABLE,
    SKIPPABLE_STATUSES,
};
pub use gaps::{
    audit_store, find_causality_violations, find_gaps, has_gap_columns, missing_dates,
    CausalityViolation, FutureDated, GapAudit, GapMap, MissingDay,
};
pub use observability::{
    init_logging, log_acquisition_settings, log_run_start, log_run_summary,
    logging_config_from_env, LogFormat, LoggingConfig, LoggingInitError,
};
pub use quality::{
    coefficient_of_variation, column_completeness, composite_score, continuity_score,
    descriptive_stats, interval_profile, quantile, sample_std, sample_variance, score_values,
    score_variables, stability_band, summarize, Classification, DescriptiveStats,
    IntervalProfile, IntervalStats, QualityRecord,
};
pub use report::{
    build_device_report, build_workbook, device_report_stem, generate_device_reports,
    generate_workbooks, load_device_dataset, render_text, CsvSheetsRenderer, DocumentRenderer,
    ReportDocument, ReportError, SourceFileInfo, TableSpec, TextReportRenderer, ROWS_PER_PAGE,
};
pub use store::{
    csv_files_in, csv_files_recursive, page_file_name, unique_path, write_atomic, DateFolder,
    DeviceEntry, ProjectEntry, StoreLayout,
};
pub use timestamp::{
    format_date, max_instant, min_instant, next_day, parse_date, parse_instant, Instant,
};
pub use unify::{
    sort_by_insertion_then_measurement, unified_file_name, unify_projects, ProjectSummary,
    SourceFile, CONTEXT_COLUMNS, SUMMARY_FILE_NAME,
};
