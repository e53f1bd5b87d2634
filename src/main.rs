use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rampload::config::Config;
use rampload::config_validation::RangeValidator;
use rampload::context::RunContext;
use rampload::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use rampload::report::{
    format_report, write_json, Verdict, EXIT_CONFIG_ERROR, EXIT_RUNTIME_FAILURE, EXIT_SUCCESS,
};
use rampload::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "rampload", version, about = "Staged HTTP load generator")]
struct Cli {
    /// Log output format (overrides LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the run described by a YAML file
    Run {
        config: PathBuf,

        /// Fail with exit code 99 when failed/total exceeds this fraction
        #[arg(long)]
        max_error_rate: Option<f64>,

        /// Write the final summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,

        /// Serve Prometheus metrics on this port while running
        #[arg(long)]
        metrics_port: Option<u16>,

        /// Print the final Prometheus text exposition after the summary
        #[arg(long)]
        print_metrics: bool,
    },

    /// Parse and validate a run file, then print the plan
    Validate { config: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: Option<LogFormat>) {
    let format = format.unwrap_or_else(|| match std::env::var("LOG_FORMAT") {
        Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Text,
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// First Ctrl+C drains gracefully; a second one exits immediately.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        return;
    }
    warn!("Received Ctrl+C, stopping gracefully (press again to abort)");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(EXIT_RUNTIME_FAILURE);
    }
}

fn load_config(path: &Path) -> Option<Config> {
    match Config::from_file(path) {
        Ok(config) => Some(config),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Configuration error");
            eprintln!("Configuration error in {}: {}", path.display(), e);
            None
        }
    }
}

fn validate(path: PathBuf) -> i32 {
    match load_config(&path) {
        Some(config) => {
            println!("{} is valid.\n", path.display());
            print!("{}", config.describe());
            EXIT_SUCCESS
        }
        None => EXIT_CONFIG_ERROR,
    }
}

async fn run(
    path: PathBuf,
    max_error_rate: Option<f64>,
    summary_json: Option<PathBuf>,
    metrics_port: Option<u16>,
    print_metrics: bool,
) -> i32 {
    let Some(mut config) = load_config(&path) else {
        return EXIT_CONFIG_ERROR;
    };

    if let Some(rate) = max_error_rate {
        if let Err(e) = RangeValidator::validate_f64(rate, 0.0, 1.0, "--max-error-rate") {
            eprintln!("Configuration error: {}", e);
            return EXIT_CONFIG_ERROR;
        }
        config.max_error_rate = Some(rate);
    }
    if metrics_port.is_some() {
        config.metrics_port = metrics_port;
    }
    config.log_summary();

    if let Err(e) = register_metrics() {
        error!(error = %e, "Failed to register Prometheus metrics");
        return EXIT_RUNTIME_FAILURE;
    }

    let ctx = match RunContext::from_config(&config) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let registry = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    if let Some(port) = config.metrics_port {
        let registry = registry.clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    tokio::spawn(handle_ctrl_c(ctx.cancel_token().clone()));

    let report = match Scheduler::new(ctx).run().await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Run failed");
            return EXIT_RUNTIME_FAILURE;
        }
    };

    let verdict = Verdict::evaluate(&report.summary, config.max_error_rate);
    println!("{}", format_report(&report, &verdict));

    if let Some(path) = summary_json {
        match write_json(&path, &report, &verdict) {
            Ok(()) => info!(path = %path.display(), "Wrote JSON summary"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to write JSON summary");
                return EXIT_RUNTIME_FAILURE;
            }
        }
    }

    if print_metrics {
        println!("\n--- FINAL METRICS ---\n{}", gather_metrics_string(&registry));
        println!("--- END OF FINAL METRICS ---\n");
    }

    verdict.exit_code()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let code = match cli.command {
        Command::Validate { config } => validate(config),
        Command::Run {
            config,
            max_error_rate,
            summary_json,
            metrics_port,
            print_metrics,
        } => run(config, max_error_rate, summary_json, metrics_port, print_metrics).await,
    };

    std::process::exit(code);
}
