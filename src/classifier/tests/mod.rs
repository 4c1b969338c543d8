use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use std::fs;

use crate::classifier::rules::QUOTA_HEADER;
use crate::classifier::{ClassificationInfo, Classifier, SubscriptionKind};
use crate::fetcher::types::SubResponse;

fn fixture(name: &str) -> String {
    fs::read_to_string(format!("src/classifier/tests/fixtures/{}", name))
        .expect("Failed to read test fixture")
}

fn quota_headers(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(QUOTA_HEADER, HeaderValue::from_static(value));
    headers
}

fn classify(headers: HeaderMap, body: &str) -> Option<(SubscriptionKind, ClassificationInfo)> {
    let response = SubResponse::ok("https://sub.example.com/api/v1/client", headers, body);
    Classifier::default()
        .classify_response(&response)
        .map(|r| (r.kind, r.info.expect("rules always attach info")))
}

#[test]
fn test_quota_subscription() {
    let headers = quota_headers("upload=1000000000; download=2000000000; total=10000000000");
    let result = classify(headers, &fixture("nodes_base64.txt"));

    assert_eq!(
        result,
        Some((SubscriptionKind::Quota, ClassificationInfo::RemainingGb(6.52)))
    );
}

#[test]
fn test_quota_short_circuits_structured_config() {
    let headers = quota_headers("upload=0; download=0; total=1073741824");
    let result = classify(headers, &fixture("clash.yaml"));

    assert_eq!(result.map(|(kind, _)| kind), Some(SubscriptionKind::Quota));
}

#[test]
fn test_exhausted_quota_falls_through() {
    let headers = quota_headers("upload=6000; download=4000; total=10000");
    let result = classify(headers, &fixture("clash.yaml"));

    assert_eq!(
        result.map(|(kind, _)| kind),
        Some(SubscriptionKind::StructuredConfig)
    );
}

#[test]
fn test_structured_config() {
    // proxy-groups entries carry `- name:` too and are counted
    let result = classify(HeaderMap::new(), &fixture("clash.yaml"));

    assert_eq!(
        result,
        Some((
            SubscriptionKind::StructuredConfig,
            ClassificationInfo::Nodes {
                count: 4,
                encoded: false
            }
        ))
    );
}

#[test]
fn test_structured_config_two_entries() {
    let body = "proxies:\n- name: a\n  server: a.example\n- name: b\n  server: b.example\n";
    let result = classify(HeaderMap::new(), body);

    assert_eq!(
        result,
        Some((
            SubscriptionKind::StructuredConfig,
            ClassificationInfo::Nodes {
                count: 2,
                encoded: false
            }
        ))
    );
}

#[test]
fn test_encoded_node_list() {
    let result = classify(HeaderMap::new(), &fixture("nodes_base64.txt"));

    assert_eq!(
        result,
        Some((
            SubscriptionKind::EncodedNodeList,
            ClassificationInfo::Nodes {
                count: 2,
                encoded: true
            }
        ))
    );
}

#[test]
fn test_encoded_vmess_counts_each_node_once() {
    let body = STANDARD.encode("vmess://first-node-payload\nvmess://second-node-payload\n");
    let result = classify(HeaderMap::new(), &body);

    assert_eq!(
        result,
        Some((
            SubscriptionKind::EncodedNodeList,
            ClassificationInfo::Nodes {
                count: 2,
                encoded: true
            }
        ))
    );
}

#[test]
fn test_raw_node_list() {
    let result = classify(HeaderMap::new(), &fixture("raw_nodes.txt"));

    assert_eq!(
        result,
        Some((
            SubscriptionKind::RawNodeList,
            ClassificationInfo::Nodes {
                count: 3,
                encoded: false
            }
        ))
    );
}

#[test]
fn test_unrecognised_page_is_unclassified() {
    assert_eq!(classify(HeaderMap::new(), &fixture("landing.html")), None);
}

#[test]
fn test_trivial_body_is_unclassified_even_with_quota() {
    let headers = quota_headers("upload=0; download=0; total=10000000000");
    assert_eq!(classify(headers, "  ok \n"), None);
}

#[test]
fn test_non_200_is_unclassified() {
    let classifier = Classifier::default();
    let result = classifier.classify(
        "https://sub.example.com/",
        StatusCode::ACCEPTED,
        &HeaderMap::new(),
        &fixture("clash.yaml"),
    );
    assert!(result.is_none());
}

#[test]
fn test_classification_is_idempotent() {
    let classifier = Classifier::default();
    let bodies = [
        fixture("clash.yaml"),
        fixture("nodes_base64.txt"),
        fixture("raw_nodes.txt"),
        fixture("landing.html"),
    ];

    for body in &bodies {
        let response = SubResponse::ok("https://sub.example.com/", HeaderMap::new(), body.clone());
        let first = classifier.classify_response(&response);
        let second = classifier.classify_response(&response);
        assert_eq!(first, second);
    }
}

#[test]
fn test_default_rule_order() {
    assert_eq!(
        Classifier::default().rule_names(),
        vec![
            "reject_trivial",
            "quota_header",
            "structured_config",
            "encoded_body",
            "raw_node_list"
        ]
    );
}

#[cfg(feature = "fuzz")]
mod fuzz {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_classify_never_panics(body in ".*", header in "[a-z0-9=; ]*") {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&header) {
                headers.insert(QUOTA_HEADER, value);
            }
            let _ = Classifier::default().classify("https://example.com", StatusCode::OK, &headers, &body);
        }
    }
}
