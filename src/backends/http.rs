use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{BackendError, BackendQuery, ImageInput, SearchBackend, normalize_hits};
use crate::fusion::{Method, RankedList};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const ERROR_SNIPPET_LEN: usize = 200;

#[derive(Debug, Serialize)]
struct SearchPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_b64: Option<String>,
    top_k: usize,
}

impl<'a> SearchPayload<'a> {
    fn new(query: &'a BackendQuery, top_k: usize) -> Self {
        let mut payload = Self {
            query: None,
            image_path: None,
            image_b64: None,
            top_k,
        };
        match query {
            BackendQuery::Text(text) => payload.query = Some(text.as_str()),
            BackendQuery::Image(ImageInput::Path(p)) => {
                payload.image_path = Some(p.to_string_lossy().into_owned());
            }
            BackendQuery::Image(ImageInput::Bytes(bytes)) => {
                payload.image_b64 = Some(STANDARD.encode(bytes));
            }
        }
        payload
    }
}

/// Remote retrieval service speaking `POST <endpoint>` with a JSON payload.
///
/// The response is either `{"results": [{"id", "score"}, ...]}` or the bare array.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    method: Method,
    endpoint: Url,
}

impl HttpBackend {
    pub fn new(http: Client, method: Method, endpoint: Url) -> Self {
        Self {
            http,
            method,
            endpoint,
        }
    }
}

#[async_trait]
impl SearchBackend for HttpBackend {
    async fn search(&self, query: &BackendQuery, top_k: usize) -> Result<RankedList, BackendError> {
        let payload = SearchPayload::new(query, top_k);

        let response = self
            .http
            .post(self.endpoint.clone())
            .header("User-Agent", crate::USER_AGENT)
            .json(&payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(ERROR_SNIPPET_LEN).collect();
            warn!(method = %self.method, status = %status, "backend error");
            return Err(BackendError::Status {
                code: status.as_u16(),
                message: snippet,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        let hits = extract_hits(&body)?;
        let ranked = normalize_hits(hits);
        debug!(
            method = %self.method,
            raw = hits.len(),
            kept = ranked.len(),
            "backend search complete"
        );
        Ok(ranked)
    }
}

fn extract_hits(body: &Value) -> Result<&[Value], BackendError> {
    match body {
        Value::Array(hits) => Ok(hits),
        Value::Object(obj) => match obj.get("results") {
            Some(Value::Array(hits)) => Ok(hits),
            Some(Value::Null) | None => Ok(&[]),
            Some(_) => Err(BackendError::Decode("`results` is not an array".into())),
        },
        _ => Err(BackendError::Decode(
            "expected an object or an array of hits".into(),
        )),
    }
}
