use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    pub fn prompt(text: impl Into<String>, generation_config: Option<GenerationConfig>) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: text.into() }],
                role: None,
            }],
            generation_config,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    pub candidates: Option<Vec<Candidate>>,
    pub error: Option<ApiError>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated and trimmed.
    pub fn first_text(&self) -> Option<String> {
        let content = self.candidates.as_ref()?.first()?.content.as_ref()?;
        let text: String = content.parts.iter().map(|p| p.text.as_str()).collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: Option<u16>,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_camel_case_config() {
        let req = GenerateContentRequest::prompt(
            "hi",
            Some(GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 64,
            }),
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 64);
        assert!(v["contents"][0].get("role").is_none());
    }

    #[test]
    fn first_text_joins_parts_and_trims() {
        let resp: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": " a red "}, {"text": "car\n"}]}}]
        }))
        .unwrap();
        assert_eq!(resp.first_text().as_deref(), Some("a red car"));
    }

    #[test]
    fn first_text_none_when_blank_or_missing() {
        let blank: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "  "}]}}]
        }))
        .unwrap();
        let missing: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(blank.first_text(), None);
        assert_eq!(missing.first_text(), None);
    }
}
