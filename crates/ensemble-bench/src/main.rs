use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use mle_ensemble::benchmark::summarize_targets;
use mle_ensemble::events::{EnsembleEvent, EventBusExt, EventFilter};
use mle_ensemble::{Dataset, EnsembleConfig, EnsembleExecutor, EventBus, VotingMethod};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Benchmark a model ensemble on synthetic classification data.
#[derive(Debug, Parser)]
#[command(name = "ensemble-bench", version)]
struct Args {
    /// TOML config; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Voting strategy (majority, weighted, stacking, bayesian)
    #[arg(short, long)]
    strategy: Option<String>,

    /// Number of models when the config lists none
    #[arg(long)]
    ensemble_size: Option<usize>,

    #[arg(long, default_value = "synthetic")]
    task: String,

    #[arg(long, default_value_t = 300)]
    samples: usize,

    #[arg(long, default_value_t = 8)]
    features: usize,

    #[arg(long, default_value_t = 3)]
    classes: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write tracker metrics as JSON to this path
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EnsembleConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let mut config = EnsembleConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    if let Some(name) = &args.strategy {
        config.voting_strategy = VotingMethod::from(name.as_str());
    }
    if let Some(size) = args.ensemble_size {
        config.ensemble_size = size;
    }
    config.seed = args.seed;
    config.validate().context("Invalid ensemble config")?;

    let dataset = Dataset::make_classification(args.samples, args.features, args.classes, args.seed)
        .context("Failed to generate dataset")?;
    info!(
        task = %args.task,
        samples = dataset.n_samples(),
        features = dataset.n_features(),
        classes = dataset.n_classes(),
        strategy = %config.voting_strategy,
        models = config.model_count(),
        "Ensemble benchmark starting"
    );

    let bus = EventBus::new().shared();
    let mut events = bus.subscribe_filtered(EventFilter::new().types(vec!["voting_fallback", "agent_failed"]));
    let problems = tokio::spawn(async move {
        let mut count = 0u32;
        loop {
            match events.recv().await {
                Ok(EnsembleEvent::VotingFallback { strategy, reason, .. }) => {
                    warn!(%strategy, %reason, "Voting fell back");
                    count += 1;
                }
                Ok(EnsembleEvent::AgentFailed { agent_id, operation, error, .. }) => {
                    warn!(%agent_id, %operation, %error, "Agent failed");
                    count += 1;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        count
    });

    let mut executor = EnsembleExecutor::new(config, bus);
    let result = executor.execute_ensemble_benchmark(&args.task, &dataset).await;

    if let Some(path) = &args.export {
        executor
            .tracker_mut()
            .export_metrics_to_file(path)
            .with_context(|| format!("Failed to export metrics to {}", path.display()))?;
    }
    let released = executor.cleanup().await?;
    drop(executor);

    // The bus closes once the executor is gone.
    let problem_count = problems.await.unwrap_or(0);

    println!("{}", serde_json::to_string_pretty(&result.metrics.to_sections())?);
    if !result.target_results.is_empty() {
        println!("{}", summarize_targets(&result.target_results));
    }

    info!(released, problems = problem_count, success = result.success, "Done");
    if !result.success {
        anyhow::bail!(
            "Benchmark failed: {}",
            result.error_message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}
