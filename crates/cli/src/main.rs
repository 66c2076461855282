mod heartbeat;
mod run;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "mirrelay", about = "mirrelay — chat mirror relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Explicit config file path (overrides discovery).
    #[arg(long, global = true, env = "MIRRELAY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay: watcher, sender, and heartbeat (default).
    Run,
    /// List the sources configured in the backend.
    Sources,
    /// Validate the configuration and exit.
    CheckConfig,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    let config = match cli.config {
        Some(ref path) => mirrelay_config::load_config(path)?,
        None => mirrelay_config::discover_and_load(),
    };

    match cli.command {
        None | Some(Commands::Run) => {
            config.validate().map_err(anyhow::Error::msg)?;
            info!(version = env!("CARGO_PKG_VERSION"), "mirrelay starting");
            run::run(config).await
        },
        Some(Commands::Sources) => {
            config.validate().map_err(anyhow::Error::msg)?;
            let api = mirrelay_api::ApiClient::new(&config.backend)?;
            let sources = api.list_sources().await?;
            if sources.is_empty() {
                eprintln!("no sources configured");
            }
            for source in sources {
                println!(
                    "{}\t{}\t{}\t{}",
                    source.id,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.name,
                    source.url
                );
            }
            Ok(())
        },
        Some(Commands::CheckConfig) => match config.validate() {
            Ok(()) => {
                println!("configuration ok");
                Ok(())
            },
            Err(e) => {
                eprintln!("configuration invalid: {e}");
                std::process::exit(1);
            },
        },
    }
}
