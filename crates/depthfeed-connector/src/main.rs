/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Running depth feed pipeline with graceful shutdown and exit codes (0 clean, 1 failure, 2 config)
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use depthfeed_adapter::BinanceClient;
use depthfeed_connector::{ConnectorConfig, EnvApiKey, Orchestrator, SnapshotFetcher};

const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "depthfeed-connector", version, about = "Order book depth feed connector")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    /// Also write logs to a daily-rolling file in this directory
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let _log_guard = match init_tracing(&args.log_level, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("depthfeed-connector: {err:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting depthfeed-connector"
    );

    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %format!("{err:#}"), "configuration rejected");
            eprintln!("depthfeed-connector: {err:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    info!(
        symbol = %config.symbol,
        socket_path = %config.socket_path.display(),
        queue_capacity = config.queue_capacity,
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return ExitCode::SUCCESS;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("depthfeed-connector: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ConnectorConfig) -> Result<()> {
    let client = BinanceClient::with_config_and_base_url(config.http_client_config(), &config.rest_url)
        .context("build REST client")?;
    let fetcher = SnapshotFetcher::new(client, config.http_client_config().timeout)
        .with_api_key(&EnvApiKey::new(&config.api_key_env));
    let sink = build_sink(&config)?;

    let orchestrator = Orchestrator::from_config(&config);
    setup_signal_handlers(orchestrator.shutdown_token());

    let summary = match orchestrator.run(fetcher, sink).await {
        Ok(summary) => summary,
        Err(err) => {
            error!(component = %err.component(), error = %err, "pipeline failed");
            return Err(anyhow::Error::new(err).context("pipeline failed"));
        }
    };

    info!(
        forwarded = summary.forwarded,
        forwarder_restarts = summary.forwarder_restarts,
        "shutdown complete"
    );
    Ok(())
}

#[cfg(unix)]
fn build_sink(config: &ConnectorConfig) -> Result<Box<dyn depthfeed_connector::EventSink>> {
    Ok(Box::new(depthfeed_connector::UnixSocketSink::new(&config.socket_path)))
}

#[cfg(not(unix))]
fn build_sink(config: &ConnectorConfig) -> Result<Box<dyn depthfeed_connector::EventSink>> {
    Err(anyhow!(
        "unix socket sink {} is not available on this platform",
        config.socket_path.display()
    ))
}

fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "depthfeed-connector.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|err| anyhow!(err))
                .context("initialize tracing subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .map_err(|err| anyhow!(err))
                .context("initialize tracing subscriber")?;
            Ok(None)
        }
    }
}

fn load_config(path: &Path) -> Result<ConnectorConfig> {
    let config = ConnectorConfig::from_file(path).context("load config")?;
    config.validate().context("validate config")?;
    Ok(config)
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
