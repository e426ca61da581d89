mod errors;
mod params;

pub use params::{
    AddWeightConfigParams, GroupingParam, ImageModelParam, ImageParam, ImageSearchParams,
    SearchParams, WeightConfigsParams,
};

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use errors::{search_to_mcp_error, serialize_error};

use crate::fusion::Method;
use crate::search::Orchestrator;

/// MCP server handler exposing keyframe search and weight configuration tools.
#[derive(Clone)]
pub struct Retrieval {
    orchestrator: Arc<Orchestrator>,
    tool_router: ToolRouter<Self>,
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value).map_err(serialize_error)?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

#[tool_router]
impl Retrieval {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "search",
        description = "Search video keyframes by text. One query runs every enabled method (CLIP H14/bigG14, BEiT-3, SigLIP2, image captions, OCR, web images) and fuses the rankings; 2-3 queries find keyframe sequences from the same video in that order; ASR text searches speech transcripts. Returns JSON with per-method and fused rankings of keyframe ids, plus an `error` field when some methods failed."
    )]
    async fn search(
        &self,
        Parameters(params): Parameters<SearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params.into_request();
        info!(
            slots = request.slots.len(),
            asr = request.asr.is_some(),
            use_trans = request.use_trans,
            "tool:search"
        );

        let outcome = self
            .orchestrator
            .search(&request)
            .await
            .map_err(search_to_mcp_error)?;

        if let Some(error) = outcome.error() {
            warn!(mode = ?outcome.mode(), %error, "search returned partial results");
        }
        json_result(&outcome)
    }

    #[tool(
        name = "image_search",
        description = "Search video keyframes by example image (file path or base64) with SigLIP2 or CLIP H14. With 2-3 images, each is searched separately and the hits are matched into in-order sequences from the same video."
    )]
    async fn image_search(
        &self,
        Parameters(params): Parameters<ImageSearchParams>,
    ) -> Result<CallToolResult, McpError> {
        let request = params
            .into_request()
            .map_err(|e| McpError::invalid_params(e, None))?;
        info!(images = request.images.len(), model = ?request.model, "tool:image_search");

        let outcome = self
            .orchestrator
            .search_by_image(&request)
            .await
            .map_err(search_to_mcp_error)?;
        json_result(&outcome)
    }

    #[tool(
        name = "weight_configs",
        description = "Inspect fusion weight configurations. Without arguments lists every configuration name; with `name` returns that configuration's weights; with `active_methods` returns the configuration the search would pick for that method set."
    )]
    async fn weight_configs(
        &self,
        Parameters(params): Parameters<WeightConfigsParams>,
    ) -> Result<CallToolResult, McpError> {
        let weights = self.orchestrator.weights();

        if let Some(name) = params.name.as_deref().map(str::trim) {
            let details = weights.config_details(name).ok_or_else(|| {
                McpError::invalid_params(format!("unknown weight config '{name}'"), None)
            })?;
            return json_result(&json!({ "name": name, "weights": details }));
        }

        if let Some(active) = params.active_methods {
            for method in &active {
                method
                    .parse::<Method>()
                    .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
            }
            let (name, suggested) = weights.suggest(&active);
            return json_result(&json!({ "name": name, "weights": suggested }));
        }

        json_result(&json!({ "configs": weights.available_configs() }))
    }

    #[tool(
        name = "add_weight_config",
        description = "Register a named fusion weight configuration ({method: weight}) for this server process. An existing configuration with the same name is replaced; configurations are never removed."
    )]
    async fn add_weight_config(
        &self,
        Parameters(params): Parameters<AddWeightConfigParams>,
    ) -> Result<CallToolResult, McpError> {
        let (name, weights) = params
            .validate()
            .map_err(|e| McpError::invalid_params(e, None))?;
        info!(name = %name, methods = weights.len(), "tool:add_weight_config");

        self.orchestrator.weights().add_config(name.clone(), weights);
        Ok(CallToolResult::success(vec![Content::text(format!(
            "weight config '{name}' registered"
        ))]))
    }
}

#[tool_handler]
impl ServerHandler for Retrieval {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "keyframe-fusion".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "keyframe-fusion searches video keyframes across several retrieval models and fuses their rankings (search, image_search), and manages fusion weights (weight_configs, add_weight_config)."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
