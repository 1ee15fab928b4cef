//! Text classification for unstructured pages
//!
//! The keyword classifier scores blocks by scholarship-keyword density. The
//! HTTP classifier asks an OpenAI-compatible chat endpoint instead and falls
//! back to keywords whenever the endpoint fails.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::types::{Classification, ExtractionError};
use crate::config::ClassifierConfig;
use crate::util::truncate_str;

/// Decides whether a block of text describes a scholarship
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ExtractionError>;

    fn name(&self) -> &str;
}

/// Words that mark a block as being about a scholarship at all
const CORE_KEYWORDS: &[&str] = &[
    "scholarship",
    "scholarships",
    "fellowship",
    "fellowships",
    "grant",
    "stipend",
    "bursary",
    "scheme",
    "award",
];

/// Supporting words that raise the density score
const SUPPORT_KEYWORDS: &[&str] = &[
    "eligibility",
    "eligible",
    "apply",
    "deadline",
    "amount",
    "students",
    "student",
    "financial",
    "tuition",
    "merit",
    "income",
    "annum",
    "rs",
    "inr",
    "₹",
    "lakh",
    "last",
    "date",
    "education",
    "benefit",
];

/// Keyword-density classifier; deterministic and always available
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    /// Keyword hits per 100 words required
    density: f32,
}

impl KeywordClassifier {
    pub fn new(density: f32) -> Self {
        Self { density }
    }

    pub fn score(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !(c.is_alphanumeric() || c == '₹'))
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Classification {
                is_scholarship: false,
                confidence: 0.0,
            };
        }

        let core = words.iter().filter(|w| CORE_KEYWORDS.contains(w)).count();
        let support = words.iter().filter(|w| SUPPORT_KEYWORDS.contains(w)).count();
        let density = (core + support) as f32 * 100.0 / words.len() as f32;
        let confidence = (density / (self.density * 4.0)).min(1.0);

        Classification {
            is_scholarship: core > 0 && density >= self.density,
            confidence,
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default().keyword_density)
    }
}

#[async_trait]
impl TextClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ExtractionError> {
        Ok(self.score(text))
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

const SYSTEM_PROMPT: &str = "You classify web page fragments from Indian education portals. \
Answer with exactly one word: YES if the text describes a specific scholarship, fellowship \
or education grant that students can apply for, otherwise NO.";

/// OpenAI-compatible chat classifier with keyword fallback
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    fallback: KeywordClassifier,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ExtractionError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| ExtractionError::Classifier("no classifier endpoint configured".to_string()))?;
        info!("Initializing HTTP classifier: endpoint={}, model={}", endpoint, config.model);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if let Some(key) = &api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key))
                    .map_err(|e| ExtractionError::Classifier(format!("Invalid API key format: {}", e)))?,
            );
        } else if endpoint.contains("openai.com") {
            warn!("No API key provided for {}", endpoint);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| ExtractionError::Classifier(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            fallback: KeywordClassifier::new(config.keyword_density),
        })
    }

    async fn ask(&self, text: &str) -> Result<bool, ExtractionError> {
        let excerpt = truncate_str(text, 2000);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &excerpt,
                },
            ],
            temperature: 0.0,
            max_tokens: 3,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionError::Classifier(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Classifier(format!("HTTP error ({})", status)));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Classifier(format!("Failed to parse response: {}", e)))?;
        let answer = reply
            .choices
            .first()
            .map(|c| c.message.content.trim().to_uppercase())
            .ok_or_else(|| ExtractionError::Classifier("empty response".to_string()))?;
        Ok(answer.starts_with("YES"))
    }
}

#[async_trait]
impl TextClassifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ExtractionError> {
        match self.ask(text).await {
            Ok(is_scholarship) => Ok(Classification {
                is_scholarship,
                confidence: 0.9,
            }),
            Err(e) => {
                debug!("Classifier fell back to keywords: {}", e);
                Ok(self.fallback.score(text))
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Classifier selected by configuration
pub fn from_config(config: &ClassifierConfig) -> Box<dyn TextClassifier> {
    if config.endpoint.is_some() {
        match HttpClassifier::new(config) {
            Ok(c) => return Box::new(c),
            Err(e) => warn!("HTTP classifier unavailable, using keywords: {}", e),
        }
    }
    Box::new(KeywordClassifier::new(config.keyword_density))
}
