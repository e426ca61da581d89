use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::keys::{ApiKey, KeyRotator};
use super::types::{ApiError, GenerateContentRequest, GenerateContentResponse, GenerationConfig};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const QUOTA_HINTS: [&str; 6] = [
    "quota",
    "rate limit",
    "rate-limit",
    "too many requests",
    "exceeded",
    "exhausted",
];

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("no Gemini API keys configured (set GEMINI_KEYS)")]
    NoKeys,

    #[error("all Gemini API keys are exhausted")]
    AllKeysExhausted,

    #[error("API quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Normalizes free-text queries into English for the retrieval backends.
#[async_trait]
pub trait Translator: Send + Sync {
    /// English rendition of `text`; English input comes back unchanged.
    async fn translate(&self, text: &str) -> Result<String, TranslateError>;

    /// Extra phrasings of `text` (a paraphrase and a context-augmented query).
    async fn expand(&self, text: &str) -> Result<Vec<String>, TranslateError>;
}

#[derive(Debug)]
pub struct GeminiTranslator {
    http: Client,
    keys: KeyRotator,
    model: String,
    base_url: String,
}

impl GeminiTranslator {
    pub fn new(http: Client, keys: KeyRotator, model: &str) -> Result<Self, TranslateError> {
        if keys.is_empty() {
            return Err(TranslateError::NoKeys);
        }
        let model = match model.trim() {
            "" => DEFAULT_MODEL.to_string(),
            m => m.to_string(),
        };
        Ok(Self {
            http,
            keys,
            model,
            base_url: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, keys: KeyRotator, base_url: &str) -> Self {
        Self {
            http,
            keys,
            model: DEFAULT_MODEL.to_string(),
            base_url: base_url.to_string(),
        }
    }

    pub fn keys(&self) -> &KeyRotator {
        &self.keys
    }

    /// Run `request` with one key per attempt; quota failures retire the key
    /// and move on to the next one.
    async fn generate(&self, request: &GenerateContentRequest) -> Result<String, TranslateError> {
        loop {
            let key = self.keys.next_key().ok_or(TranslateError::AllKeysExhausted)?;
            match self.generate_with_key(&key, request).await {
                Err(TranslateError::QuotaExceeded(message)) => {
                    warn!(%message, "Gemini key hit its quota, rotating");
                    self.keys.mark_exhausted(&key);
                }
                other => return other,
            }
        }
    }

    async fn generate_with_key(
        &self,
        key: &ApiKey,
        request: &GenerateContentRequest,
    ) -> Result<String, TranslateError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);

        debug_assert!(
            url.starts_with("https://") || cfg!(test),
            "API key must only be sent over HTTPS"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", key.expose())
            .header("User-Agent", crate::USER_AGENT)
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TranslateError::QuotaExceeded("HTTP 429".to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<GenerateContentResponse>(&text)
                && let Some(err) = &body.error
            {
                let classified = classify_api_error(err);
                warn!(error = %classified, "Gemini API error");
                return Err(classified);
            }
            let snippet: String = text.chars().take(200).collect();
            warn!(status = %status, "Gemini API error (no structured body)");
            return Err(TranslateError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}: {snippet}"),
            });
        }

        let body: GenerateContentResponse = response.json().await?;
        if let Some(err) = &body.error {
            let classified = classify_api_error(err);
            warn!(error = %classified, "Gemini API error in 200 response");
            return Err(classified);
        }

        debug!(model = %self.model, "gemini generation complete");
        body.first_text().ok_or(TranslateError::EmptyResponse)
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let prompt = format!(
            "You are a translator to English.\n\
             - If the input is already English, return it unchanged.\n\
             - Otherwise, translate it to natural, fluent English.\n\
             - Output only the final text with no quotes or extra words.\n\
             Input:\n{text}\nOutput:"
        );
        self.generate(&GenerateContentRequest::prompt(prompt, None))
            .await
    }

    async fn expand(&self, text: &str) -> Result<Vec<String>, TranslateError> {
        let paraphrase = format!(
            "You are a video retrieval expert. Generate a single English paraphrase of the given \
             query that maintains the same intent but uses different wording.\n\
             Input:\n{text}\n\nParaphrase:"
        );
        let augment = format!(
            "You are a video retrieval expert. Generate a single English query that adds a little \
             more context to the given query to improve retrieval accuracy. Add relevant visual \
             details, scene context, or temporal information.\n\
             Input:\n{text}\n\nAugmented:"
        );

        let mut variants = Vec::with_capacity(2);
        for (prompt, max_output_tokens) in [(paraphrase, 64), (augment, 96)] {
            let config = GenerationConfig {
                temperature: 0.7,
                max_output_tokens,
            };
            let out = self
                .generate(&GenerateContentRequest::prompt(prompt, Some(config)))
                .await?;
            variants.push(out.trim_matches('"').trim().to_string());
        }
        Ok(variants)
    }
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_HINTS.iter().any(|hint| lower.contains(hint))
}

fn classify_api_error(err: &ApiError) -> TranslateError {
    let message = err
        .message
        .clone()
        .unwrap_or_else(|| "Unknown error".to_string());

    match err.code {
        Some(429) => TranslateError::QuotaExceeded(message),
        Some(403) if is_quota_message(&message) => TranslateError::QuotaExceeded(message),
        Some(code) => TranslateError::Api { code, message },
        None if is_quota_message(&message) => TranslateError::QuotaExceeded(message),
        None => TranslateError::Api {
            code: 0,
            message: format!("Unknown error (no status code): {message}"),
        },
    }
}
