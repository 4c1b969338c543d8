pub mod model;
pub mod rules;

#[cfg(test)]
mod tests;

pub use model::{Bucket, ClassificationInfo, ClassificationResult, SubscriptionKind};
pub use rules::{ClassificationRule, RuleInput, RuleOutcome};

use reqwest::{StatusCode, header::HeaderMap};
use tracing::{debug, info};

use crate::fetcher::types::SubResponse;

const PREVIEW_CHARS: usize = 100;

/// Ordered chain of [`ClassificationRule`]s. The first rule that matches or
/// rejects decides; rule order is evidence strength.
pub struct Classifier {
    rules: Vec<Box<dyn ClassificationRule>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(vec![
            Box::new(rules::RejectTrivial),
            Box::new(rules::QuotaHeader),
            Box::new(rules::StructuredConfig),
            Box::new(rules::EncodedBody),
            Box::new(rules::RawNodeList),
        ])
    }
}

impl Classifier {
    pub fn new(rules: Vec<Box<dyn ClassificationRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn classify(
        &self,
        url: &str,
        status: StatusCode,
        headers: &HeaderMap,
        body: &str,
    ) -> Option<ClassificationResult> {
        if status != StatusCode::OK {
            return None;
        }

        let input = RuleInput { headers, body };
        for rule in &self.rules {
            match rule.apply(&input) {
                RuleOutcome::Matched(kind, info) => {
                    debug!(url, rule = rule.name(), %kind, %info, "classified");
                    return Some(ClassificationResult {
                        url: url.to_string(),
                        kind,
                        info: Some(info),
                    });
                }
                RuleOutcome::Reject => {
                    debug!(url, rule = rule.name(), "body empty or too short");
                    return None;
                }
                RuleOutcome::Continue => {}
            }
        }

        if body.chars().count() > PREVIEW_CHARS {
            info!(
                url,
                length = body.chars().count(),
                preview = %preview(body),
                "content does not match a known subscription format"
            );
        }
        None
    }

    pub fn classify_response(&self, response: &SubResponse) -> Option<ClassificationResult> {
        self.classify(
            &response.url,
            response.status,
            &response.headers,
            &response.body,
        )
    }
}

/// First characters of `body` on a single line.
fn preview(body: &str) -> String {
    body.chars()
        .take(PREVIEW_CHARS)
        .collect::<String>()
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}
