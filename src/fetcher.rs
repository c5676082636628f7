//! Paginated download of one device's measurements.
//!
//! A cycle walks `offset = 0, limit, 2 * limit, ...` against the measurement
//! API. Every response is classified into a [`PageOutcome`] and the cursor
//! applies one policy per outcome:
//!
//! | outcome                      | action                                        |
//! |------------------------------|-----------------------------------------------|
//! | rows, `len == limit`         | yield page, advance offset                    |
//! | rows, `len < limit`          | yield page, end cycle (`TerminalPage`)        |
//! | empty body / zero rows       | end cycle (`Exhausted`)                       |
//! | HTTP 404 / 524               | advance offset, bounded by consecutive skips  |
//! | body is not well-formed CSV  | advance offset, bounded by malformed count    |
//! | transport error, other HTTP  | end cycle (`Failed`)                          |

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AcquisitionConfig, DeviceConfig};
use crate::dataset::{CsvShape, Dataset, DatasetError};
use crate::store::{page_file_name, unique_path, write_atomic, StoreLayout};
use crate::timestamp::{format_date, parse_instant, Instant};

pub const MEASUREMENT_TABLE: &str = "datos";
pub const SKIPPABLE_STATUSES: [u16; 2] = [404, 524];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("invalid API URL {url}: {message}")]
    InvalidUrl { url: String, message: String },
    #[error("HTTP request failed for {url}: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected HTTP status {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("failed to persist page {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One page request; `base_url` is the device's endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub base_url: String,
    pub project_id: String,
    pub device_code: String,
    pub start_date: NaiveDate,
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("tabla", MEASUREMENT_TABLE.to_string()),
            ("order_by", "fecha_insercion".to_string()),
            ("disp.id_proyecto", self.project_id.clone()),
            ("limite", self.limit.to_string()),
            ("offset", self.offset.to_string()),
            ("disp.codigo_interno", self.device_code.clone()),
            ("fecha_inicio", format_date(self.start_date)),
            ("formato", "csv".to_string()),
        ]
    }

    pub fn url(&self) -> Result<reqwest::Url, FetchError> {
        let mut url =
            reqwest::Url::parse(&self.base_url).map_err(|err| FetchError::InvalidUrl {
                url: self.base_url.clone(),
                message: err.to_string(),
            })?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in self.query_pairs() {
                query.append_pair(key, &value);
            }
        }
        Ok(url)
    }
}

/// Response as received: any HTTP status, body as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub status: u16,
    pub body: String,
}

impl RawPage {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// HTTP seam for the fetch cycle. Only transport failures are errors; every
/// HTTP status comes back as a [`RawPage`].
pub trait PageSource {
    fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, FetchError>;
}

pub struct ReqwestPageSource {
    client: reqwest::blocking::Client,
}

impl ReqwestPageSource {
    pub fn new(timeout_ms: u64) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| FetchError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl PageSource for ReqwestPageSource {
    fn fetch_page(&self, request: &PageRequest) -> Result<RawPage, FetchError> {
        let url = request.url()?;
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "text/csv")
            .send()
            .map_err(|err| FetchError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|err| FetchError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        Ok(RawPage { status, body })
    }
}

/// A validated page with at least one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based position derived from the offset.
    pub number: usize,
    pub offset: usize,
    pub body: String,
    pub dataset: Dataset,
    pub max_inserted_at: Option<Instant>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }
}

#[derive(Debug)]
pub enum PageOutcome {
    Rows { dataset: Dataset, body: String },
    Exhausted,
    Skip { status: u16 },
    Malformed(DatasetError),
    Fatal(FetchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTermination {
    Exhausted,
    TerminalPage,
    IterationCap,
    TooManySkips,
    TooManyMalformedPages,
    Failed,
}

impl CycleTermination {
    /// Whether pages gathered before the termination may advance the watermark.
    pub fn keeps_progress(self) -> bool {
        !matches!(self, Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::TerminalPage => "terminal_page",
            Self::IterationCap => "iteration_cap",
            Self::TooManySkips => "too_many_skips",
            Self::TooManyMalformedPages => "too_many_malformed_pages",
            Self::Failed => "failed",
        }
    }
}

pub fn classify_response(
    response: Result<RawPage, FetchError>,
    request: &PageRequest,
) -> PageOutcome {
    let raw = match response {
        Ok(raw) => raw,
        Err(err) => return PageOutcome::Fatal(err),
    };

    if SKIPPABLE_STATUSES.contains(&raw.status) {
        return PageOutcome::Skip { status: raw.status };
    }
    if raw.status != 200 {
        let url = request
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|_| request.base_url.clone());
        return PageOutcome::Fatal(FetchError::UnexpectedStatus {
            url,
            status: raw.status,
        });
    }

    let trimmed = raw.body.trim();
    if trimmed.is_empty() {
        return PageOutcome::Exhausted;
    }
    match Dataset::from_csv_str(trimmed, CsvShape::Strict) {
        Ok(dataset) if dataset.is_empty() => PageOutcome::Exhausted,
        Ok(dataset) => PageOutcome::Rows {
            dataset,
            body: raw.body,
        },
        Err(err) => PageOutcome::Malformed(err),
    }
}

/// Lazy page sequence for one cycle. Each `next()` issues at most one
/// successful request; once it returns `None` the cycle is over and
/// [`PageCursor::termination`] says why.
pub struct PageCursor<'a> {
    source: &'a dyn PageSource,
    base_url: String,
    project_id: String,
    device_code: String,
    start_date: NaiveDate,
    limit: usize,
    max_iterations: u32,
    max_consecutive_skips: u32,
    max_malformed_pages: u32,
    page_delay: Duration,
    offset: usize,
    iterations: u32,
    consecutive_skips: u32,
    malformed_pages: u32,
    termination: Option<CycleTermination>,
    failure: Option<FetchError>,
}

impl<'a> PageCursor<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        device: &DeviceConfig,
        start_date: NaiveDate,
        cfg: &AcquisitionConfig,
    ) -> Self {
        Self {
            source,
            base_url: device.endpoint(&cfg.api_base_url).to_string(),
            project_id: device.project_id().to_string(),
            device_code: device.internal_code.clone(),
            start_date,
            limit: cfg.page_size.max(1),
            max_iterations: cfg.max_iterations,
            max_consecutive_skips: cfg.max_consecutive_skips,
            max_malformed_pages: cfg.max_malformed_pages,
            page_delay: Duration::from_millis(cfg.page_delay_ms),
            offset: 0,
            iterations: 0,
            consecutive_skips: 0,
            malformed_pages: 0,
            termination: None,
            failure: None,
        }
    }

    pub fn termination(&self) -> Option<CycleTermination> {
        self.termination
    }

    pub fn take_failure(&mut self) -> Option<FetchError> {
        self.failure.take()
    }

    pub fn requests_issued(&self) -> u32 {
        self.iterations
    }

    fn request(&self) -> PageRequest {
        PageRequest {
            base_url: self.base_url.clone(),
            project_id: self.project_id.clone(),
            device_code: self.device_code.clone(),
            start_date: self.start_date,
            offset: self.offset,
            limit: self.limit,
        }
    }

    fn finish(&mut self, termination: CycleTermination) {
        debug!(
            component = "fetcher",
            event = "fetch.cycle.terminated",
            device = %self.device_code,
            termination = termination.as_str(),
            offset = self.offset,
            requests = self.iterations
        );
        self.termination = Some(termination);
    }
}

impl Iterator for PageCursor<'_> {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        loop {
            if self.termination.is_some() {
                return None;
            }
            if self.iterations >= self.max_iterations {
                warn!(
                    component = "fetcher",
                    event = "fetch.cycle.iteration_cap",
                    device = %self.device_code,
                    max_iterations = self.max_iterations
                );
                self.finish(CycleTermination::IterationCap);
                return None;
            }
            if self.iterations > 0 && !self.page_delay.is_zero() {
                std::thread::sleep(self.page_delay);
            }
            self.iterations += 1;

            let request = self.request();
            debug!(
                component = "fetcher",
                event = "fetch.page.request",
                device = %self.device_code,
                offset = request.offset,
                limit = request.limit
            );

            match classify_response(self.source.fetch_page(&request), &request) {
                PageOutcome::Rows { dataset, body } => {
                    self.consecutive_skips = 0;
                    let max_inserted_at = dataset.schema().inserted_at.and_then(|column| {
                        dataset.column(column.index).filter_map(parse_instant).max()
                    });
                    let page = Page {
                        number: self.offset / self.limit + 1,
                        offset: self.offset,
                        body,
                        dataset,
                        max_inserted_at,
                    };
                    if page.len() < self.limit {
                        self.finish(CycleTermination::TerminalPage);
                    } else {
                        self.offset += self.limit;
                    }
                    return Some(page);
                }
                PageOutcome::Exhausted => {
                    self.finish(CycleTermination::Exhausted);
                    return None;
                }
                PageOutcome::Skip { status } => {
                    self.consecutive_skips += 1;
                    warn!(
                        component = "fetcher",
                        event = "fetch.page.skipped",
                        device = %self.device_code,
                        offset = self.offset,
                        status,
                        consecutive = self.consecutive_skips
                    );
                    if self.consecutive_skips > self.max_consecutive_skips {
                        self.finish(CycleTermination::TooManySkips);
                        return None;
                    }
                    self.offset += self.limit;
                }
                PageOutcome::Malformed(err) => {
                    self.malformed_pages += 1;
                    warn!(
                        component = "fetcher",
                        event = "fetch.page.malformed",
                        device = %self.device_code,
                        offset = self.offset,
                        malformed_pages = self.malformed_pages,
                        error = %err
                    );
                    if self.malformed_pages > self.max_malformed_pages {
                        self.finish(CycleTermination::TooManyMalformedPages);
                        return None;
                    }
                    self.offset += self.limit;
                }
                PageOutcome::Fatal(err) => {
                    warn!(
                        component = "fetcher",
                        event = "fetch.cycle.failed",
                        device = %self.device_code,
                        offset = self.offset,
                        error = %err
                    );
                    self.failure = Some(err);
                    self.finish(CycleTermination::Failed);
                    return None;
                }
            }
        }
    }
}

/// Result of one device's fetch cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub start_date: NaiveDate,
    pub pages_written: Vec<PathBuf>,
    pub records: usize,
    pub requests: u32,
    pub watermark: Option<Instant>,
    pub termination: CycleTermination,
    pub failure: Option<FetchError>,
}

impl CycleReport {
    /// Watermark candidate to persist, if the cycle produced one and kept it.
    pub fn watermark_update(&self) -> Option<Instant> {
        if self.termination.keeps_progress() {
            self.watermark
        } else {
            None
        }
    }
}

/// Runs one fetch cycle from offset 0, persisting each page before the next
/// request is issued.
pub fn fetch_cycle(
    device: &DeviceConfig,
    start_date: NaiveDate,
    cfg: &AcquisitionConfig,
    source: &dyn PageSource,
    layout: &StoreLayout,
) -> CycleReport {
    let page_dir = layout.page_dir(device.project_id(), &device.internal_code, start_date);
    let mut cursor = PageCursor::new(source, device, start_date, cfg);
    let mut pages_written = Vec::new();
    let mut records = 0usize;
    let mut watermark: Option<Instant> = None;
    let mut persist_failure = None;

    info!(
        component = "fetcher",
        event = "fetch.cycle.start",
        device = %device.label(),
        start_date = %start_date,
        endpoint = device.endpoint(&cfg.api_base_url)
    );

    for page in cursor.by_ref() {
        match persist_page(&page, &device.internal_code, &page_dir) {
            Ok(path) => {
                info!(
                    component = "fetcher",
                    event = "fetch.page.persisted",
                    device = %device.label(),
                    page = page.number,
                    rows = page.len(),
                    path = %path.display()
                );
                records += page.len();
                watermark = watermark.max(page.max_inserted_at);
                pages_written.push(path);
            }
            Err(err) => {
                warn!(
                    component = "fetcher",
                    event = "fetch.page.persist_failed",
                    device = %device.label(),
                    page = page.number,
                    error = %err
                );
                persist_failure = Some(err);
                break;
            }
        }
    }

    let (termination, failure) = match persist_failure {
        Some(err) => (CycleTermination::Failed, Some(err)),
        None => (
            cursor.termination().unwrap_or(CycleTermination::Failed),
            cursor.take_failure(),
        ),
    };

    let report = CycleReport {
        start_date,
        pages_written,
        records,
        requests: cursor.requests_issued(),
        watermark,
        termination,
        failure,
    };
    info!(
        component = "fetcher",
        event = "fetch.cycle.complete",
        device = %device.label(),
        pages = report.pages_written.len(),
        records = report.records,
        requests = report.requests,
        termination = report.termination.as_str(),
        watermark = report.watermark.map(|w| w.format_canonical()).unwrap_or_default()
    );
    report
}

fn persist_page(page: &Page, device_code: &str, page_dir: &Path) -> Result<PathBuf, FetchError> {
    std::fs::create_dir_all(page_dir).map_err(|source| FetchError::Persist {
        path: page_dir.to_path_buf(),
        source,
    })?;
    let name = page_file_name(
        device_code,
        page.number,
        page.max_inserted_at.map(Instant::date),
        Local::now().naive_local(),
    );
    let path = unique_path(page_dir, &name);
    write_atomic(&path, page.body.as_bytes()).map_err(|source| FetchError::Persist {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}
