//! DataPipe-RS - Main Entry Point
//!
//! Usage: `datapipe <pipeline-file> [--log-dir DIR]`
//!
//! Loads a `.json` or `.toml` pipeline definition, runs it to completion and
//! exits non-zero if the pipeline failed.

use anyhow::{bail, Context};
use datapipe_rs::{AdaptorRegistry, Pipeline, PipelineFile};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

struct Args {
    pipeline_file: PathBuf,
    log_dir: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut pipeline_file = None;
    let mut log_dir = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-dir" => {
                let dir = args.next().context("--log-dir needs a directory")?;
                log_dir = Some(PathBuf::from(dir));
            }
            "-h" | "--help" => {
                println!("usage: datapipe <pipeline-file> [--log-dir DIR]");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option '{}'", other),
            other => {
                if pipeline_file.replace(PathBuf::from(other)).is_some() {
                    bail!("only one pipeline file may be given");
                }
            }
        }
    }

    Ok(Args {
        pipeline_file: pipeline_file.context("usage: datapipe <pipeline-file> [--log-dir DIR]")?,
        log_dir,
    })
}

/// Console logging, plus a daily-rolling file when `log_dir` is set. The
/// returned guard must live until exit so buffered lines are written.
fn init_logging(log_dir: Option<&PathBuf>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,datapipe_rs=debug"))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "datapipe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let _log_guard = init_logging(args.log_dir.as_ref());

    tracing::info!("Starting DataPipe-RS {}", datapipe_rs::pipeline::VERSION);

    let file = PipelineFile::load(&args.pipeline_file)
        .with_context(|| format!("loading {}", args.pipeline_file.display()))?;
    let engine = file.engine_config();
    let registry = AdaptorRegistry::with_builtins();

    let mut pipeline = Pipeline::build(file.pipeline.into_node(), &registry, engine)
        .context("building pipeline")?;
    pipeline.run().context("pipeline failed")?;

    tracing::info!("Shutting down...");
    Ok(())
}
