//! Pipeline binary entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use pipeline::config::parse_steps;
use pipeline::services::{GeminiClient, HttpPublisher, LocalArtifactStore, LocalOnlyPublisher, RealReferenceLoader};
use pipeline::{BatchRunner, PipelineConfig, PipelineServices, PublishAdapter, items};
use shared::logging::{self, TracingEndpoint};

/// Generate lookbook imagery for a batch of garments
#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Generates and publishes derivative product imagery under a shared request budget")]
struct Args {
    /// JSON file holding an array of items
    #[arg(long)]
    items: PathBuf,

    /// Index of the first item to process (after de-duplication)
    #[arg(long, default_value = "0")]
    start: usize,

    /// Maximum number of items to process
    #[arg(long)]
    limit: Option<usize>,

    /// Directory for generated artifacts (overrides OUTPUT_DIR)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Where to write the JSON report
    #[arg(long, default_value = "report.json")]
    report: PathBuf,

    /// Comma-separated step kinds (overrides GENERATION_STEPS)
    #[arg(long)]
    steps: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Tracing endpoint URL
    #[arg(long)]
    trace_ep: Option<String>,

    /// Model used for image steps
    #[arg(long)]
    image_model: Option<String>,

    /// Model used for the scene call
    #[arg(long)]
    scene_model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let trace_endpoint = args.trace_ep.clone().map(TracingEndpoint::new);
    logging::init_tracing(trace_endpoint, Some(&args.log_level));

    let mut config = PipelineConfig::from_env().context("Invalid configuration")?;
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(steps) = &args.steps {
        config.steps = parse_steps(steps)?;
    }

    let Some(api_key) = config.credentials.api_key.clone() else {
        bail!("GEMINI_API_KEY (or GOOGLE_API_KEY) must be set");
    };

    let mut client = GeminiClient::new(api_key);
    if args.scene_model.is_some() || args.image_model.is_some() {
        client = client.with_models(
            args.scene_model
                .clone()
                .unwrap_or_else(|| pipeline::services::gemini_client::DEFAULT_SCENE_MODEL.to_string()),
            args.image_model
                .clone()
                .unwrap_or_else(|| pipeline::services::gemini_client::DEFAULT_IMAGE_MODEL.to_string()),
        );
    }

    let publisher: Arc<dyn PublishAdapter> = match &config.credentials.publish_endpoint {
        Some(endpoint) => Arc::new(HttpPublisher::new(
            endpoint.clone(),
            config.credentials.publish_token.clone(),
            config.retry.call_timeout,
        )?),
        None => {
            tracing::warn!("PUBLISH_ENDPOINT not set, artifacts will only be stored locally");
            Arc::new(LocalOnlyPublisher)
        }
    };

    let items_dir = args.items.parent().map(PathBuf::from).unwrap_or_default();
    let services = PipelineServices {
        client: Arc::new(client),
        publisher,
        references: Arc::new(RealReferenceLoader::new()?.with_base_dir(items_dir)),
        artifacts: Arc::new(LocalArtifactStore::new(&config.output_dir)),
    };

    let items = items::load_items(&args.items).await?;
    let runner = BatchRunner::from_config(&config, services)?;
    let run_id = runner.run_id().to_string();

    logging::log_startup(
        &run_id,
        &format!(
            "{} item(s) from {}, output {}, {}/min {}/day",
            items.len(),
            args.items.display(),
            config.output_dir.display(),
            config.budget.per_minute,
            config.budget.per_day
        ),
    );

    let outcome = runner.run(&items, args.start, args.limit).await;
    let (report, abort) = match outcome {
        Ok(report) => (report, None),
        Err(abort) => (abort.report, Some(abort.source)),
    };

    items::write_report(&args.report, &report)
        .await
        .with_context(|| format!("Failed to write report to {}", args.report.display()))?;

    for (item_id, urls) in report.published_rows() {
        let rendered: Vec<String> = urls
            .iter()
            .map(|(kind, url)| format!("{kind}={}", url.as_deref().unwrap_or("-")))
            .collect();
        tracing::info!(run = %run_id, "{}: {}", item_id, rendered.join(" "));
    }

    match abort {
        Some(source) => {
            logging::log_shutdown(&run_id, &format!("aborted: {source}"));
            logging::flush_traces().await;
            bail!("Run aborted with {} item(s) reported: {source}", report.entries.len());
        }
        None => {
            logging::log_shutdown(&run_id, "completed");
            logging::flush_traces().await;
            Ok(())
        }
    }
}
