//! # Knowledge Cache CLI (`kc`)
//!
//! Creates, inspects, syncs, and queries named knowledge caches.
//!
//! ## Usage
//!
//! ```bash
//! kc --config ./config/kc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kc caches` | List caches with their type and autosync state |
//! | `kc add-local <path> --name <cache>` | Build a cache from a file or directory |
//! | `kc add-sharepoint <link> --name <cache>` | Build a cache from a SharePoint sharing link |
//! | `kc autosync <cache> on\|off` | Toggle autosync on a SharePoint cache |
//! | `kc ask <cache> "<question>"` | Activate (autosync if enabled) and print passages |
//! | `kc sync <cache>` | Activate and force a remote check |
//! | `kc show <cache>` | Print the stored config summary |
//! | `kc completions <shell>` | Print shell completions |
//!
//! Graph credentials are read from `TENANT_ID`, `CLIENT_ID`, and
//! `CLIENT_SECRET`; a `.env` file in the working directory is loaded first.

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use knowledge_cache::config::{self, Config};
use knowledge_cache::knowledge::ChunkingBuilder;
use knowledge_cache::sharepoint::SharePointClient;
use knowledge_cache::store::CacheStore;
use knowledge_cache::sync::{Orchestrator, Session, SyncOutcome};

/// Knowledge Cache CLI: document knowledge bases with SharePoint autosync.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "kc",
    about = "Knowledge Cache: named document knowledge bases with SharePoint autosync",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List caches in the store.
    Caches,

    /// Build a cache from a local file or directory.
    AddLocal {
        /// File or directory to index.
        path: PathBuf,

        /// Cache name.
        #[arg(long)]
        name: String,
    },

    /// Build a cache from a SharePoint folder sharing link.
    ///
    /// Autosync is on unless `--no-autosync` is given.
    AddSharepoint {
        /// Sharing link to a folder or file.
        link: String,

        /// Cache name.
        #[arg(long)]
        name: String,

        /// Do not check the remote folder when the cache is activated.
        #[arg(long)]
        no_autosync: bool,
    },

    /// Turn autosync on or off for a SharePoint cache.
    Autosync {
        cache: String,
        state: Toggle,
    },

    /// Ask a question against a cache.
    ///
    /// Activates the cache first, which runs autosync when enabled.
    Ask {
        cache: String,
        question: String,

        /// Number of passages (defaults to `retrieval.final_limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Activate a cache and check its remote folder regardless of autosync.
    Sync { cache: String },

    /// Show a cache's stored configuration.
    Show { cache: String },

    /// Print shell completions to stdout.
    Completions { shell: Shell },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

fn orchestrator(cfg: &Config) -> anyhow::Result<Orchestrator> {
    let remote = SharePointClient::new(&cfg.sharepoint)?;
    let builder = ChunkingBuilder::new(cfg)?;
    Ok(Orchestrator::new(
        CacheStore::new(&cfg.store.root),
        Arc::new(remote),
        Arc::new(builder),
    )
    .with_local_config(cfg.local.clone()))
}

fn print_outcome(cache: &str, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Failed(_) => eprintln!("{}: {}", cache, outcome),
        _ => println!("{}: {}", cache, outcome),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "kc", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let store = CacheStore::new(&cfg.store.root);

    match cli.command {
        Commands::Caches => {
            let names = store.list_caches()?;
            if names.is_empty() {
                println!("No caches in {}", store.root().display());
            }
            for name in names {
                match store.read_config(&name) {
                    Some(c) => {
                        let kind = c.kind.map(|k| k.to_string()).unwrap_or_else(|| "?".into());
                        let badge = if c.is_sharepoint() && c.autosync { " [autosync]" } else { "" };
                        println!("{:<24} {}{}", name, kind, badge);
                    }
                    None => println!("{:<24} (no config)", name),
                }
            }
        }
        Commands::AddLocal { path, name } => {
            let report = orchestrator(&cfg)?.create_from_local(&name, &path).await?;
            println!("{}", report);
        }
        Commands::AddSharepoint {
            link,
            name,
            no_autosync,
        } => {
            let report = orchestrator(&cfg)?
                .create_from_sharepoint(&name, &link, !no_autosync)
                .await?;
            println!("{}", report);
        }
        Commands::Autosync { cache, state } => {
            let enabled = matches!(state, Toggle::On);
            orchestrator(&cfg)?.set_autosync(&cache, enabled)?;
            println!("{}: autosync {}", cache, if enabled { "on" } else { "off" });
        }
        Commands::Ask {
            cache,
            question,
            limit,
        } => {
            let orch = orchestrator(&cfg)?;
            let mut session = Session::new();
            let outcome = orch.activate(&mut session, &cache).await?;
            print_outcome(&cache, &outcome);

            let limit = limit.unwrap_or(cfg.retrieval.final_limit);
            let passages = orch.ask(&session, &question, limit).await?;
            if passages.is_empty() {
                println!("No matching passages.");
            }
            for (i, p) in passages.iter().enumerate() {
                println!("\n[{}] chunk {} (score {:.3})", i + 1, p.chunk_index, p.score);
                println!("{}", p.text.trim());
            }
        }
        Commands::Sync { cache } => {
            let orch = orchestrator(&cfg)?;
            let mut session = Session::new();
            let outcome = match orch.activate(&mut session, &cache).await? {
                SyncOutcome::Skipped(_) => orch.resync(&mut session).await?,
                SyncOutcome::Failed(e) => return Err(e.into()),
                checked => checked,
            };
            print_outcome(&cache, &outcome);
        }
        Commands::Show { cache } => {
            let c = store
                .read_config(&cache)
                .ok_or_else(|| anyhow::anyhow!("cache not found: {}", cache))?;
            println!("name:      {}", cache);
            println!(
                "type:      {}",
                c.kind.map(|k| k.to_string()).unwrap_or_else(|| "?".into())
            );
            if let Some(link) = c.share_link() {
                println!("link:      {}", link);
            }
            if let Some(src) = &c.source {
                if let Some(path) = src.path.as_deref().or(src.filename.as_deref()) {
                    println!("source:    {}", path);
                }
            }
            println!("autosync:  {}", c.autosync);
            println!("files:     {}", c.manifest.count);
            if let Some(at) = c.updated_at {
                println!("updated:   {}", at.to_rfc3339());
            }
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
