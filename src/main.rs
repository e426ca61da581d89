mod backends;
mod config;
mod dispatch;
mod fusion;
mod search;
mod tools;
mod translate;

pub const USER_AGENT: &str = concat!(
    "keyframe-fusion/",
    env!("CARGO_PKG_VERSION"),
    " (MCP Server)"
);

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Client;
use rmcp::{ServiceExt, transport::stdio};
use tracing::{info, warn};

use backends::{Backends, HttpBackend, SearchBackend};
use config::Settings;
use fusion::{LocalityIndex, WeightTable};
use search::Orchestrator;
use tools::Retrieval;
use translate::{GeminiTranslator, KeyRotator};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_orchestrator(
    settings: &Settings,
    http: Client,
) -> Result<Orchestrator, Box<dyn std::error::Error>> {
    let backends: Backends = settings
        .backend_endpoints()?
        .into_iter()
        .map(|(method, endpoint)| {
            info!(method = %method, endpoint = %endpoint, "backend configured");
            let backend: Arc<dyn SearchBackend> =
                Arc::new(HttpBackend::new(http.clone(), method, endpoint));
            (method, backend)
        })
        .collect();
    if backends.is_empty() {
        warn!("no backends configured, every search will come back empty");
    }

    let weights = WeightTable::curated();
    if let Some(path) = &settings.weights_file {
        let added = weights.extend_from_file(path)?;
        info!(added, path = %path.display(), "weight configs loaded");
    }

    let locality = LocalityIndex::build(&settings.metadata_path, &settings.locality_marker);

    let mut orchestrator = Orchestrator::new(backends, Arc::new(weights), Arc::new(locality))
        .with_top_k(settings.top_k())
        .with_dispatch_limits(settings.dispatch_limits())
        .with_max_concurrency(settings.max_concurrency);

    match GeminiTranslator::new(
        http,
        KeyRotator::new(settings.gemini_keys.iter().cloned()),
        &settings.gemini_model,
    ) {
        Ok(translator) => {
            info!(keys = translator.keys().len(), "query translation enabled");
            orchestrator = orchestrator.with_translator(Arc::new(translator));
        }
        Err(e) => warn!("translation not available, queries are searched as given: {e}"),
    }

    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keyframe_fusion=info".parse()?),
        )
        .init();

    let settings = Settings::parse();
    settings.validate()?;

    info!("starting keyframe-fusion MCP server");

    let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
    let orchestrator = build_orchestrator(&settings, http)?;

    let service = Retrieval::new(Arc::new(orchestrator))
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("failed to start server: {e}"))?;

    service.waiting().await?;
    info!("server stopped");
    Ok(())
}
