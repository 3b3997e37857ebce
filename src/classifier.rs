use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::ClassifierConfig;

/// Maps raw question text to a Bloom's Taxonomy level.
#[async_trait]
pub trait BtlClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<i64>;

    fn name(&self) -> &'static str;
}

/// Calls an external prediction service: `POST {url}` with `{"text": ...}`,
/// expecting `{"label": n}` back. A request that outlives `timeout` fails.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    label: i64,
}

impl RemoteClassifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl BtlClassifier for RemoteClassifier {
    async fn classify(&self, text: &str) -> Result<i64> {
        info!(
            classifier = self.name(),
            url = %self.url,
            text_length = text.len(),
            "Requesting BTL prediction"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                classifier = self.name(),
                status = %status,
                error = %error_text,
                "BTL prediction request failed"
            );
            return Err(anyhow::anyhow!("classifier request failed: {}", error_text));
        }

        let prediction: PredictResponse = response.json().await?;
        Ok(prediction.label)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Offline classifier keyed on Bloom action verbs.
///
/// Each level's verbs are counted; the level with the most hits wins, the
/// higher level on ties. Text with no recognised verb is level 1.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

const LEVEL_VERBS: [&[&str]; 6] = [
    &[
        "define", "list", "recall", "name", "identify", "state", "what", "who", "when", "label",
        "memorize", "repeat",
    ],
    &[
        "explain", "describe", "summarize", "summarise", "classify", "discuss", "interpret",
        "paraphrase", "why", "outline",
    ],
    &[
        "apply", "solve", "use", "calculate", "demonstrate", "compute", "implement", "execute",
        "illustrate",
    ],
    &[
        "analyze", "analyse", "compare", "contrast", "differentiate", "examine", "distinguish",
        "categorize", "infer",
    ],
    &[
        "evaluate", "justify", "assess", "critique", "judge", "argue", "defend", "recommend",
        "appraise", "test",
    ],
    &[
        "design", "create", "construct", "develop", "formulate", "propose", "compose", "invent",
        "plan", "devise",
    ],
];

fn word_pattern() -> &'static Regex {
    static WORDS: OnceLock<Regex> = OnceLock::new();
    WORDS.get_or_init(|| Regex::new(r"[a-z]+").expect("static regex"))
}

impl KeywordClassifier {
    pub fn predict(&self, text: &str) -> i64 {
        let lowered = text.to_lowercase();
        let mut hits = [0usize; 6];
        for word in word_pattern().find_iter(&lowered) {
            for (level, verbs) in LEVEL_VERBS.iter().enumerate() {
                if verbs.contains(&word.as_str()) {
                    hits[level] += 1;
                }
            }
        }

        let mut best = 0;
        for level in 0..hits.len() {
            if hits[level] > 0 && hits[level] >= hits[best] {
                best = level;
            }
        }
        best as i64 + 1
    }
}

#[async_trait]
impl BtlClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<i64> {
        Ok(self.predict(text))
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

/// Factory for creating classifiers based on configuration
pub struct ClassifierFactory;

impl ClassifierFactory {
    pub fn create(config: &ClassifierConfig) -> Result<Arc<dyn BtlClassifier>> {
        match &config.url {
            Some(url) => {
                info!(
                    url = %url,
                    timeout_seconds = config.timeout_seconds,
                    "Using remote BTL classifier"
                );
                Ok(Arc::new(RemoteClassifier::new(
                    url.clone(),
                    Duration::from_secs(config.timeout_seconds),
                )?))
            }
            None => {
                info!("CLASSIFIER_URL not set, using keyword BTL classifier");
                Ok(Arc::new(KeywordClassifier))
            }
        }
    }
}
