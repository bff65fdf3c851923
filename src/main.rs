use anyhow::{Context, Result};
use clap::Parser;
use retina_diagnosis::{config::Config, web::serve};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retina-diagnosis")]
#[command(about = "Retina fundus image validation and disease classification service")]
struct Args {
    /// Server bind address
    #[arg(long, env = "RETINA_BIND", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Number of worker threads
    #[arg(long, env = "RETINA_WORKERS")]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "RETINA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Directory holding the checkpoint and the label reference file
    #[arg(long, env = "RETINA_MODELS_DIR", default_value = "Model")]
    models_dir: String,

    /// Checkpoint path (defaults to <models-dir>/mobile_retina_vit.onnx)
    #[arg(long, env = "RETINA_MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Label reference CSV (defaults to <models-dir>/train_data.csv)
    #[arg(long, env = "RETINA_LABELS_PATH")]
    labels_path: Option<PathBuf>,

    /// TOML file overriding validator, classifier, server and onnx settings
    #[arg(long, env = "RETINA_CONFIG")]
    config: Option<PathBuf>,

    /// Enable development mode
    #[arg(long)]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting retina diagnosis service...");
    tracing::info!("Bind address: {}", args.bind);
    tracing::info!("Models directory: {}", args.models_dir);

    let mut config = Config::new(args.bind, args.models_dir, args.workers, args.dev)?;
    config.model_file = args.model_path;
    config.labels_file = args.labels_path;
    if let Some(path) = args.config {
        tracing::info!("Loading overrides from {}", path.display());
        config = config.with_file(&path)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.max(1))
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(config))?;

    Ok(())
}
