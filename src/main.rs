use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use feedwatch::config::Config;
use feedwatch::engine::Engine;
use feedwatch::feed::Fetcher;
use feedwatch::scheduler::TokioScheduler;
use feedwatch::sink::{render_latest, StdoutSink};
use feedwatch::storage::{JsonFile, SubscriptionStore};
use feedwatch::util::strip_control_chars;

/// Get the config directory path (~/.config/feedwatch/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedwatch");
    Ok(config_dir)
}

#[derive(Parser, Debug)]
#[command(
    name = "feedwatch",
    version,
    about = "Poll RSS/Atom feeds on cron schedules and deliver only new items"
)]
struct Args {
    /// Config file (default: ~/.config/feedwatch/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subscriber identity to act as (default: `default_subscriber` from config)
    #[arg(long, value_name = "ID", global = true)]
    subscriber: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Schedule every subscription and deliver updates to stdout until Ctrl-C
    Run,

    /// Manage RSSHub endpoints
    Rsshub {
        #[command(subcommand)]
        action: RsshubCommand,
    },

    /// Subscribe to an RSSHub route: add <endpoint_idx> <route> <cron>
    Add {
        endpoint: usize,
        route: String,
        /// Five cron fields, quoted together or given separately
        #[arg(required = true, num_args = 1..=5)]
        cron: Vec<String>,
    },

    /// Subscribe to a feed URL: add-url <url> <cron>
    AddUrl {
        url: String,
        /// Five cron fields, quoted together or given separately
        #[arg(required = true, num_args = 1..=5)]
        cron: Vec<String>,
    },

    /// List your subscriptions
    List,

    /// Unsubscribe from the subscription at <idx>
    Remove { index: usize },

    /// Show the newest item of the subscription at <idx>
    Get { index: usize },
}

#[derive(Subcommand, Debug)]
enum RsshubCommand {
    /// Add an endpoint base URL
    Add { url: String },
    /// List endpoints
    List,
    /// Remove the endpoint at <idx>
    Remove { index: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries delivered messages
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        eprintln!("Created config directory: {}", config_dir.display());
    }

    // SEC-007: Set directory permissions on Unix (user-only access)
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(&config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(&config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let subscriber = args
        .subscriber
        .clone()
        .unwrap_or_else(|| config.default_subscriber.clone());

    let data_path = config.data_path(&config_dir);
    let store = SubscriptionStore::open(JsonFile::new(&data_path))
        .with_context(|| format!("Failed to open state file {}", data_path.display()))?;
    let fetcher = Fetcher::from_config(&config).context("Failed to build HTTP client")?;
    let scheduler = Arc::new(TokioScheduler::new());
    let engine = Engine::new(
        Arc::new(store),
        fetcher,
        Arc::new(StdoutSink::new()),
        scheduler.clone(),
    );

    match args.command {
        Command::Run => {
            let jobs = engine.start();
            eprintln!("Watching {jobs} subscription(s). Press Ctrl-C to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            scheduler.shutdown();
            tracing::info!("Shutting down");
        }

        Command::Rsshub { action } => match action {
            RsshubCommand::Add { url } => {
                engine.add_endpoint(&url)?;
                println!("Endpoint added.");
            }
            RsshubCommand::List => {
                println!("RSSHub endpoints:");
                for (index, url) in engine.list_endpoints().iter().enumerate() {
                    println!("{index}: {url}");
                }
            }
            RsshubCommand::Remove { index } => {
                let url = engine.remove_endpoint(index)?;
                println!("Removed endpoint {url}");
            }
        },

        Command::Add {
            endpoint,
            route,
            cron,
        } => {
            let info = engine
                .subscribe_via_route(&subscriber, endpoint, &route, &cron.join(" "))
                .await?;
            println!(
                "Subscribed. Channel info:\nTitle: {}\nDescription: {}",
                strip_control_chars(&info.title),
                strip_control_chars(&info.description)
            );
        }

        Command::AddUrl { url, cron } => {
            let info = engine
                .subscribe_via_url(&subscriber, &url, &cron.join(" "))
                .await?;
            println!(
                "Subscribed. Channel info:\nTitle: {}\nDescription: {}",
                strip_control_chars(&info.title),
                strip_control_chars(&info.description)
            );
        }

        Command::List => {
            println!("Subscribed channels:");
            for (index, summary) in engine.list_subscriptions(&subscriber).iter().enumerate() {
                println!(
                    "{index}. {} - {}",
                    strip_control_chars(&summary.title),
                    strip_control_chars(&summary.description)
                );
            }
        }

        Command::Remove { index } => {
            let url = engine.unsubscribe(&subscriber, index)?;
            println!("Unsubscribed from {url}");
        }

        Command::Get { index } => match engine.poll_on_demand(&subscriber, index).await? {
            Some(item) => print!("{}", strip_control_chars(&render_latest(&item))),
            None => println!("No items in this feed."),
        },
    }

    Ok(())
}
