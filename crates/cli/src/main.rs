use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use jrx_client::ClientConfig;
use jrx_transport::FallbackMode;
use std::path::PathBuf;

mod render;
mod watch;

#[derive(Parser)]
#[command(name = "jrx")]
#[command(about = "Headless JRX client", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for HTML)
    #[arg(long, global = true)]
    quiet: bool,

    /// TOML file with `[runtime]` and `[transport]` tables (defaults come
    /// from JRX_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Id of the app root element
    #[arg(long, global = true)]
    app_root: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page against a state snapshot and print the HTML
    Render(RenderArgs),

    /// Follow a live server and print the app root after every batch
    Watch(WatchArgs),
}

#[derive(Args)]
struct RenderArgs {
    /// Server-rendered page
    page: PathBuf,

    /// JSON object of state keys to apply after hydration
    #[arg(long)]
    state: Option<PathBuf>,

    /// Raw inbound messages (batches or deltas) applied in order after the state
    #[arg(long = "message")]
    messages: Vec<PathBuf>,

    /// Print only the app root's content instead of the whole document
    #[arg(long)]
    fragment: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// Server base URL, e.g. http://127.0.0.1:8080
    #[arg(long)]
    server: Option<String>,

    /// Route to open
    #[arg(long, default_value = "/")]
    path: String,

    /// Channel used once the socket is given up
    #[arg(long, value_enum)]
    fallback: Option<FallbackFlag>,

    /// Skip the socket and start on the fallback channel
    #[arg(long)]
    no_socket: bool,

    /// Polling interval (ms)
    #[arg(long)]
    poll_ms: Option<u64>,
}

#[derive(Copy, Clone, ValueEnum)]
enum FallbackFlag {
    Push,
    Polling,
}

impl FallbackFlag {
    const fn as_domain(self) -> FallbackMode {
        match self {
            FallbackFlag::Push => FallbackMode::Push,
            FallbackFlag::Polling => FallbackMode::Polling,
        }
    }
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ClientConfig::from_env(),
    };
    if let Some(root) = &cli.app_root {
        config.runtime.app_root = root.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Render(args) => {
            let html = render::run(&args, config.runtime)?;
            println!("{html}");
        }
        Commands::Watch(args) => {
            if let Some(server) = &args.server {
                config.transport.base_url = server.clone();
            }
            if let Some(fallback) = args.fallback {
                config.transport.fallback = fallback.as_domain();
            }
            if args.no_socket {
                config.transport.socket_enabled = false;
            }
            if let Some(ms) = args.poll_ms {
                config.transport.poll_interval_ms = ms;
            }
            config
                .validate()
                .map_err(anyhow::Error::msg)
                .context("Invalid configuration")?;
            watch::run(&args.path, config).await?;
        }
    }

    Ok(())
}
