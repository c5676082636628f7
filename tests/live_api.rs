#![cfg(feature = "live-api-tests")]

use chrono::{Duration, Local};
use sensorsync::{
    classify_response, PageOutcome, PageRequest, PageSource, ReqwestPageSource,
    DEFAULT_API_BASE_URL,
};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[test]
fn live_api_answers_first_page_with_csv_or_end_of_data() {
    let source = ReqwestPageSource::new(30_000).expect("HTTP client should build");
    let request = PageRequest {
        base_url: env_or("SENSORSYNC_API_URL", DEFAULT_API_BASE_URL),
        project_id: env_or("SENSORSYNC_LIVE_PROJECT", "1"),
        device_code: env_or("SENSORSYNC_LIVE_DEVICE", "EMMA-01"),
        start_date: (Local::now() - Duration::days(2)).date_naive(),
        offset: 0,
        limit: 5,
    };

    let raw = source.fetch_page(&request);
    match classify_response(raw, &request) {
        PageOutcome::Rows { dataset, .. } => {
            assert!(dataset.len() <= 5);
            assert!(dataset.column_index("fecha_insercion").is_some());
        }
        PageOutcome::Exhausted | PageOutcome::Skip { .. } => {}
        other => panic!("unexpected live outcome: {other:?}"),
    }
}
