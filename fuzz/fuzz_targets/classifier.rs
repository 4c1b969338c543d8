#![no_main]

use libfuzzer_sys::fuzz_target;
use reqwest::header::{HeaderMap, HeaderValue};

use subscout::classifier::Classifier;
use subscout::classifier::rules::QUOTA_HEADER;
use subscout::fetcher::SubResponse;
use subscout::links::extract_links;

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data).to_string();

    // Reuse the first line as a quota header so header parsing is covered too
    let mut headers = HeaderMap::new();
    if let Some(line) = body.lines().next() {
        if let Ok(value) = HeaderValue::from_str(line) {
            headers.insert(QUOTA_HEADER, value);
        }
    }

    let response = SubResponse::ok("https://example.com/sub", headers, body.clone());

    // Neither stage may panic regardless of input
    let _ = Classifier::default().classify_response(&response);
    let _ = extract_links(&body, &["//t.me/"]);
});
