//! PointFlow - command line entry point
//!
//! Runs a JSON pipeline description, or lists the available stages and
//! their options.

use anyhow::Context;
use clap::Parser;
use pointflow::config::{default_config_path, EngineConfig, LoggingConfig};
use pointflow::pipeline::{PipelineReader, StageFactory};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pointflow", version, about, long_about = None)]
struct Cli {
    /// Pipeline description (JSON) to run
    pipeline: Option<PathBuf>,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List every available stage type
    #[arg(long)]
    drivers: bool,

    /// Show the options accepted by a stage type
    #[arg(long, value_name = "STAGE")]
    options: Option<String>,

    /// Override the configured chunk size
    #[arg(long)]
    chunk_size: Option<usize>,
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    let (file_layer, guard) = match &logging.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("log_file {:?} has no file name", path))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config.as_ref() {
        Some(path) => EngineConfig::load(path)?,
        None => default_config_path()
            .map(EngineConfig::load_or_default)
            .unwrap_or_default(),
    };
    if let Some(chunk_size) = cli.chunk_size {
        config.execution.chunk_size = chunk_size;
        config.validate()?;
    }

    let _guard = init_logging(&config.logging)?;
    let factory = StageFactory::from_config(&config);

    if cli.drivers {
        for info in factory.list() {
            println!("{:<20} {} [{}]", info.name, info.description, info.origin);
        }
        return Ok(());
    }

    if let Some(stage) = cli.options.as_deref() {
        for option in factory.option_help(stage)? {
            println!(
                "{:<16} {:<12} {}",
                option.name, option.default, option.description
            );
        }
        return Ok(());
    }

    let path = cli
        .pipeline
        .context("no pipeline given; pass a JSON pipeline file, --drivers or --options")?;
    tracing::info!("Running pipeline {}", path.display());

    let mut pipeline = PipelineReader::with_config(&factory, &config).read_file(&path)?;
    let summary = pipeline.run()?;

    for (writer, count) in &summary.committed {
        println!("{}: {} points", writer, count);
    }
    tracing::info!(
        "Read {} points in {} chunks ({:.2?})",
        summary.points_read,
        summary.chunks,
        summary.elapsed
    );
    Ok(())
}
