//! dovepub - peer synchronization daemon for a personal append-only log.
//! Keeps connections to configured pubs, serves inbound websocket peers and
//! gossips for records that are referenced but not yet held.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dovepub::config::{ConfigStore, JsonConfigFile, CONFIG_PATH};
use dovepub::engine::{Engine, EngineSettings, DEFAULT_PORT};
use dovepub::parser::token::is_token;
use dovepub::store::{LocalStore, RecordStore};
use tracing::info;

const DEFAULT_APP: &str = "apds";

#[derive(Parser, Debug)]
#[command(author, version, about, args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Store namespace to run the engine with
    app: Option<String>,

    /// Websocket server port (falls back to $PORT, then 48080)
    #[arg(long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short = 'v', long = "log", global = true)]
    verbose: bool,

    /// Peer/follow configuration document
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding the record stores
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a pub peer
    Addpub { url: String },
    /// Remove a pub peer
    Rmpub { url: String },
    /// Follow one or more authors
    Follow { keys: Vec<String> },
    /// Unfollow one or more authors
    Unfollow { keys: Vec<String> },
    /// Print the opened log as JSON
    Log { app: Option<String> },
    /// Print a blob by hash, or the latest envelope for an author key
    Get { app: String, hash: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = JsonConfigFile::new(&args.config);

    match &args.command {
        Some(Command::Addpub { url }) => {
            let mut cfg = config.load()?;
            if cfg.add_pub(url) {
                config.save(&cfg)?;
                println!("Added pub: {}", url);
            } else {
                println!("Pub already present: {}", url);
            }
            Ok(())
        }
        Some(Command::Rmpub { url }) => {
            let mut cfg = config.load()?;
            if cfg.remove_pub(url) {
                config.save(&cfg)?;
                println!("Removed pub: {}", url);
            } else {
                println!("Pub not found: {}", url);
            }
            Ok(())
        }
        Some(Command::Follow { keys }) => edit_follows(&config, keys, true),
        Some(Command::Unfollow { keys }) => edit_follows(&config, keys, false),
        Some(Command::Log { app }) => {
            let store = LocalStore::start(&args.data_dir, app.as_deref().unwrap_or(DEFAULT_APP))?;
            println!("{}", serde_json::to_string_pretty(&store.query()?)?);
            Ok(())
        }
        Some(Command::Get { app, hash }) => {
            let store = LocalStore::start(&args.data_dir, app)?;
            match lookup(&store, hash) {
                Some(found) => println!("{}", found),
                None => {
                    println!("NOT FOUND");
                    std::process::exit(2);
                }
            }
            Ok(())
        }
        None => run(&args, config).await,
    }
}

fn edit_follows(config: &JsonConfigFile, keys: &[String], follow: bool) -> Result<()> {
    if keys.is_empty() {
        println!("Usage:");
        println!("  dovepub follow <pubkey> [more...]");
        println!("  dovepub unfollow <pubkey> [more...]");
        std::process::exit(1);
    }
    let mut cfg = config.load()?;
    let mut changed = false;
    for key in keys {
        if follow {
            if cfg.follow(key) {
                changed = true;
                println!("Followed: {}", key);
            } else {
                println!("Already following: {}", key);
            }
        } else if cfg.unfollow(key) {
            changed = true;
            println!("Unfollowed: {}", key);
        } else {
            println!("Not following: {}", key);
        }
    }
    if changed {
        config.save(&cfg)?;
    }
    Ok(())
}

/// Author keys resolve to their newest envelope, anything else to a blob.
fn lookup(store: &LocalStore, hash: &str) -> Option<String> {
    if is_token(hash) {
        if let Ok(Some(latest)) = store.get_latest(hash) {
            return Some(latest.sig);
        }
    }
    store.get(hash).ok().flatten()
}

async fn run(args: &Args, config: JsonConfigFile) -> Result<()> {
    let app = args.app.clone().unwrap_or_else(|| DEFAULT_APP.to_string());
    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(DEFAULT_PORT);

    let store: Arc<dyn RecordStore> = Arc::new(LocalStore::start(&args.data_dir, &app)?);
    let settings = EngineSettings { port, ..EngineSettings::default() };
    let engine = Engine::new(store, Arc::new(config), settings)?;
    let addr = engine.start().await?;
    info!("Engine started with store \"{}\" on {}", app, addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    engine.shutdown();

    let snap = engine.snapshot();
    println!("\n╔═══════════════════════════════════════════════════════════════════════╗");
    println!("║                        DOVEPUB SHUTDOWN SUMMARY                       ║");
    println!("╚═══════════════════════════════════════════════════════════════════════╝");
    println!("  Log Entries Held:        {}", snap.have);
    println!("  Still Missing:           {}", snap.missing);
    println!("  Blobs From Pubs:         {}", snap.pub_blobs);
    println!("  Blobs From Sessions:     {}", snap.session_blobs);
    println!("-------------------------------------------------------------------------");
    println!("  Store:                   {}", app);
    println!("  Status:                  Clean Exit\n");

    Ok(())
}
