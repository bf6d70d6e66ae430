mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(about = "Records outbound requests into a bounded log")]
struct Cli {
    /// Path to the YAML config file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Drive the capture pipeline from recorded notifications (JSON lines)
    Replay {
        #[arg(long)]
        events: PathBuf,
    },
    /// Export the log as a JSON snapshot
    Export {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print one line per logged request
    List,
    /// Remove every entry from the log
    Clear,
}

fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).unwrap_or_else(|err| {
            eprintln!("Failed to load config from {}: {err}", path.display());
            process::exit(1);
        }),
        None => Config::default(),
    };

    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics_config) = &config.common.metrics {
        init_metrics(metrics_config);
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|err| {
            tracing::error!("could not build tokio runtime: {err}");
            process::exit(1);
        });

    let result = rt.block_on(async {
        match cli.command {
            CliCommand::Replay { events } => {
                let report = commands::replay(&config, &events).await?;
                println!(
                    "notifications: {}, committed: {}, failed: {}, expired: {}, skipped lines: {}",
                    report.summary.notifications,
                    report.summary.committed,
                    report.summary.failed,
                    report.summary.expired,
                    report.skipped_lines
                );
            }
            CliCommand::Export { output } => {
                let count = commands::export(&config, output.as_deref()).await?;
                tracing::info!(entries = count, "exported request log");
            }
            CliCommand::List => {
                for line in commands::list(&config).await? {
                    println!("{line}");
                }
            }
            CliCommand::Clear => commands::clear(&config).await?,
        }
        Ok::<_, commands::CommandError>(())
    });

    if let Err(err) = result {
        tracing::error!("{err}");
        process::exit(1);
    }
}

/// Logs go to stderr so that exports on stdout stay machine readable. When a
/// Sentry DSN is configured, events are forwarded there as well; the returned
/// guard flushes them on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(metrics_config: &MetricsConfig) {
    let recorder = StatsdBuilder::from(
        metrics_config.statsd_host.as_str(),
        metrics_config.statsd_port,
    )
    .build(Some("reqlog"));

    match recorder {
        Ok(recorder) => {
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("a metrics recorder is already installed");
                return;
            }
            shared::metrics_defs::describe_all(capture::ALL_METRICS);
        }
        Err(err) => tracing::error!("failed to initialize statsd metrics: {err}"),
    }
}
