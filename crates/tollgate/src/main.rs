//! Tollgate - Entry point

use std::path::PathBuf;

use anyhow::Context;
use tollgate::{build_server, AppState};
use tollgate_config::{ConfigLoader, TollgateConfig};
use tollgate_server::DrainOutcome;
use tollgate_telemetry::init_telemetry;

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("tollgate {}", tollgate::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Tollgate - Rate-limited user service

USAGE:
    tollgate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES (also read from .env):
    TOLLGATE_HTTP_ADDR                Bind address (default: 0.0.0.0:7171)
    TOLLGATE_SHUTDOWN_TIMEOUT         Drain deadline in seconds (default: 5)
    TOLLGATE_REQUEST_TIMEOUT          Handler timeout in seconds (default: 30)
    TOLLGATE_RATE_LIMIT_ENABLED       Enable admission control (default: true)
    TOLLGATE_RATE_LIMIT_CAPACITY      Token bucket burst size (default: 5)
    TOLLGATE_RATE_LIMIT_REFILL_RATE   Tokens per second (default: 1.0)
    TOLLGATE_LOG_LEVEL                Log filter (default: info)
    TOLLGATE_LOG_FORMAT               json or pretty (default: json)
    TOLLGATE_OAUTH_CLIENT_ID          OAuth client ID
    TOLLGATE_OAUTH_CLIENT_SECRET      OAuth client secret
    TOLLGATE_OAUTH_REDIRECT_URL       OAuth redirect URL

EXAMPLES:
    # Run with configuration file
    tollgate --config /etc/tollgate/tollgate.toml

    # Run with environment variables
    TOLLGATE_HTTP_ADDR=127.0.0.1:8080 tollgate
"
    );
}

fn load_config(args: &Args) -> Result<TollgateConfig, tollgate_config::ConfigError> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path)?;
    }
    loader.with_dotenv().with_env().load()
}

async fn run(config: TollgateConfig) -> anyhow::Result<()> {
    let prometheus = init_telemetry(&config.telemetry_config())
        .context("failed to initialize telemetry")?;

    tracing::info!(
        version = tollgate::VERSION,
        http_addr = %config.server.http_addr,
        rate_limit = config.rate_limit.enabled,
        capacity = config.rate_limit.capacity,
        refill_rate = config.rate_limit.refill_rate,
        "Starting Tollgate"
    );

    let state = AppState::new(&config, prometheus).context("invalid configuration")?;
    let server = build_server(&config, &state).context("invalid configuration")?;

    let report = server.run().await?;

    match report.outcome {
        DrainOutcome::Clean => tracing::info!(
            in_flight = report.in_flight_at_signal,
            drain_ms = report.drain_duration.as_millis() as u64,
            "Tollgate stopped"
        ),
        DrainOutcome::Forced { abandoned } => tracing::warn!(
            in_flight = report.in_flight_at_signal,
            abandoned,
            drain_ms = report.drain_duration.as_millis() as u64,
            "Tollgate stopped with abandoned connections"
        ),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Logging is configured from the file, so load errors go to stderr.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        let message = format!("{e:#}");
        tracing::error!(error = %message, "Tollgate failed");
        eprintln!("Error: {message}");
        std::process::exit(1);
    }
}
