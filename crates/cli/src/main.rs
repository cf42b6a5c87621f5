use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    murmur_config::MurmurConfig,
    murmur_messages::MessageStore,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "murmur", about = "Murmur: presence and direct-message relay")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (toml, yaml or json). Discovered when omitted.
    #[arg(long, global = true, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Overrides `server.port` and `PORT`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the stored conversation between two users as JSON.
    History { user_a: String, user_b: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (secrets omitted).
    Show,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// File (explicit or discovered) first, then environment overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<MurmurConfig> {
    let mut config = match &cli.config {
        Some(path) => murmur_config::load_config(path)?,
        None => murmur_config::discover_and_load(),
    };
    murmur_config::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = resolve_config(&cli)?;

    match cli.command {
        Commands::Gateway { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            info!(version = env!("CARGO_PKG_VERSION"), "murmur starting");
            murmur_gateway::start_gateway(config).await
        },
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
        Commands::History { user_a, user_b } => {
            let store = murmur_gateway::open_store(&config).await?;
            let messages = store.history(&user_a, &user_b).await?;
            println!("{}", serde_json::to_string_pretty(&messages)?);
            Ok(())
        },
    }
}
