//! Polly CLI

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use polly::config::{Config, Mode};
use polly::network::NetworkHandler;
use polly::proxy::HttpProxy;
use polly::recording::PersistGuard;
use polly::replay::MatchPolicy;
use polly::storage::SessionStore;
use polly::Result;

/// Polly - record HTTP traffic into a HAR session and replay it
#[derive(Debug, Parser)]
#[command(name = "polly")]
#[command(version)]
struct Cli {
    /// Session name; the file is <dir>/<session>.har
    #[arg(short, long)]
    session: String,

    /// Operating mode: record or replay [default: replay]
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Port to listen on [default: 1234]
    #[arg(short, long)]
    port: Option<u16>,

    /// Replay matching policy: content or ordinal [default: content]
    #[arg(long)]
    policy: Option<MatchPolicy>,

    /// Directory holding session files [default: .]
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// TOML config file for upstreams and limits
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Config file (or defaults) with command-line flags applied on top
    fn into_config(self) -> Result<Config> {
        let mut config = match self.config {
            Some(path) => {
                info!("Loading config from: {}", path.display());
                Config::from_file(&path)?
            }
            None => Config::default(),
        };

        config.session = self.session;
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(dir) = self.dir {
            config.session_dir = dir;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,polly=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config()?;
    config.validate()?;

    info!(
        "Starting polly in {} mode (session '{}', policy {})",
        config.mode, config.session, config.policy
    );

    let store = Arc::new(match config.mode {
        Mode::Replay => SessionStore::load(&config.session_dir, &config.session)?,
        Mode::Record => SessionStore::create_empty(&config.session_dir, &config.session),
    });

    let proxy = Arc::new(HttpProxy::new(&config, Arc::clone(&store))?);
    let listener = NetworkHandler::bind(config.listen_addr()).await?;

    // Armed only once the port is ours, so a failed start never overwrites a session
    let guard = PersistGuard::new(config.mode, Arc::clone(&store));

    let handler = NetworkHandler::new(Arc::clone(&proxy));
    let served = handler.serve(listener).await;

    if let Some(stats) = proxy.match_stats() {
        info!(
            "Replay finished: {} hits, {} misses, {} exchanges unused",
            stats.hits, stats.misses, stats.remaining
        );
    }

    let persisted = guard.finish();
    shutdown_outcome(served, persisted)
}

/// Serve error wins; a persist error hidden behind it is still logged
fn shutdown_outcome(served: Result<()>, persisted: Result<()>) -> Result<()> {
    match (served, persisted) {
        (Err(serve_error), Err(persist_error)) => {
            error!("Failed to persist session: {}", persist_error);
            Err(serve_error)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}
