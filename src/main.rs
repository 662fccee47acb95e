//! # AAS Catalog CLI (`aasc`)
//!
//! The `aasc` binary drives the scan/index engine from the command line.
//!
//! ## Usage
//!
//! ```bash
//! aasc --config ./config/aasc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aasc init` | Create the index backend and register configured endpoints |
//! | `aasc endpoints list` | List registered endpoints |
//! | `aasc endpoints add <name> <url> --kind <kind>` | Register an endpoint |
//! | `aasc endpoints remove <name>` | Remove an endpoint and its documents |
//! | `aasc scan <endpoint>` | Scan one endpoint (or `all`) and update the index |
//! | `aasc stats` | Show document counts per endpoint |
//! | `aasc keywords "<text>"` | Extract dictionary keywords from text |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use aas_catalog::config::{self, Config};
use aas_catalog::coordinator::Coordinator;
use aas_catalog::keywords::KeywordDirectory;
use aas_catalog::models::{Endpoint, EndpointKind};
use aas_catalog::store::{open_store, select_backend, IndexStore, StoreSelection};

/// Requester identity recorded on tasks started from this binary.
const OWNER: &str = "cli";

/// AAS Catalog CLI — scan and index Asset Administration Shell
/// repositories.
#[derive(Parser)]
#[command(
    name = "aasc",
    about = "AAS Catalog — scan and index Asset Administration Shell repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aasc.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index backend and register the configured endpoints.
    ///
    /// Idempotent: running it again re-registers endpoints and leaves
    /// indexed documents untouched.
    Init,

    /// Manage registered endpoints.
    Endpoints {
        #[command(subcommand)]
        action: EndpointAction,
    },

    /// Scan an endpoint and apply the results to the index.
    ///
    /// Pass `all` to scan every registered endpoint; scans run
    /// concurrently, one worker per endpoint.
    Scan {
        /// Endpoint name, or `all`.
        endpoint: String,
    },

    /// Show document counts.
    Stats {
        /// Restrict the count to one endpoint.
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Extract dictionary keywords from free text.
    Keywords {
        /// The text to scan against the configured dictionary.
        text: String,
    },
}

#[derive(Subcommand)]
enum EndpointAction {
    /// List registered endpoints.
    List,
    /// Register (or replace) an endpoint.
    Add {
        name: String,
        url: String,
        /// Protocol kind: `directory` or `aas-api`.
        #[arg(long)]
        kind: EndpointKind,
        #[arg(long, default_value = "v3")]
        version: String,
        /// Request header as `Name=value`; may be repeated.
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Remove an endpoint and every document indexed from it.
    Remove { name: String },
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid NAME=value header: '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Resolve the configured index URL, falling back to the embedded file
/// store when the scheme names no known backend.
async fn open_configured_store(config: &Config) -> Result<Arc<dyn IndexStore>> {
    let selection = match select_backend(&config.index.url) {
        StoreSelection::Unsupported(url) => {
            warn!(
                url = %url,
                fallback = config::DEFAULT_INDEX_URL,
                "unsupported index backend url, using the embedded file store"
            );
            select_backend(config::DEFAULT_INDEX_URL)
        }
        selection => selection,
    };
    open_store(selection).await
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aasc=info,aas_catalog=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_configured_store(&cfg).await?;
            for endpoint in cfg.endpoints.iter().map(|e| e.to_endpoint()) {
                store.put_endpoint(&endpoint).await?;
            }
            println!("Index initialized ({} endpoints).", cfg.endpoints.len());
        }
        Commands::Endpoints { action } => {
            let store = open_configured_store(&cfg).await?;
            run_endpoints(&cfg, store, action).await?;
        }
        Commands::Scan { endpoint } => {
            let store = open_configured_store(&cfg).await?;
            run_scan(&cfg, store, &endpoint).await?;
        }
        Commands::Stats { endpoint } => {
            let store = open_configured_store(&cfg).await?;
            let total = store.count_documents(endpoint.as_deref()).await?;
            match endpoint {
                Some(name) => println!("{:<16} {}", name, total),
                None => {
                    for ep in store.list_endpoints().await? {
                        let count = store.count_documents(Some(&ep.name)).await?;
                        println!("{:<16} {}", ep.name, count);
                    }
                    println!("{:<16} {}", "total", total);
                }
            }
        }
        Commands::Keywords { text } => {
            let Some(path) = cfg.keywords.path.clone() else {
                anyhow::bail!("no keyword dictionary configured (keywords.path)");
            };
            let directory = KeywordDirectory::load(path);
            directory.ready().await?;
            let found = directory.contained_keywords(&text);
            if found.is_empty() {
                println!("No keywords.");
            } else {
                println!("{}", KeywordDirectory::join_bounded(&found, ", ", 512));
            }
        }
    }

    Ok(())
}

async fn run_endpoints(
    cfg: &Config,
    store: Arc<dyn IndexStore>,
    action: EndpointAction,
) -> Result<()> {
    match action {
        EndpointAction::List => {
            let endpoints = store.list_endpoints().await?;
            if endpoints.is_empty() {
                println!("No endpoints registered.");
                return Ok(());
            }
            println!("{:<16} {:<12} URL", "NAME", "KIND");
            for ep in endpoints {
                println!("{:<16} {:<12} {}", ep.name, ep.kind.as_str(), ep.url);
            }
        }
        EndpointAction::Add {
            name,
            url,
            kind,
            version,
            headers,
        } => {
            let headers: HashMap<String, String> = headers.into_iter().collect();
            store
                .put_endpoint(&Endpoint {
                    name: name.clone(),
                    url,
                    kind,
                    version,
                    schedule: None,
                    headers: (!headers.is_empty()).then_some(headers),
                })
                .await?;
            println!("Endpoint '{}' registered.", name);
        }
        EndpointAction::Remove { name } => {
            let mut coordinator = Coordinator::new(store, cfg.scan.channel_capacity);
            coordinator
                .remove_endpoint(&name, OWNER)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("Endpoint '{}' removed.", name);
        }
    }
    Ok(())
}

async fn run_scan(cfg: &Config, store: Arc<dyn IndexStore>, target: &str) -> Result<()> {
    let endpoints = if target == "all" {
        store.list_endpoints().await?
    } else {
        match store.get_endpoint(target).await? {
            Some(ep) => vec![ep],
            None => anyhow::bail!(
                "Unknown endpoint: '{}'. Register it with `aasc endpoints add` or run `aasc init`.",
                target
            ),
        }
    };
    if endpoints.is_empty() {
        anyhow::bail!("No endpoints registered. Run `aasc init` first.");
    }

    let mut coordinator = Coordinator::new(store, cfg.scan.channel_capacity);

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling running scans");
            shutdown.cancel();
        }
    });

    for endpoint in &endpoints {
        coordinator
            .start_scan(endpoint, OWNER)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    }

    let mut summaries = coordinator.run_until_idle().await;
    summaries.sort_by(|a, b| a.endpoint_name.cmp(&b.endpoint_name));
    for summary in &summaries {
        println!("scan {}", summary.endpoint_name);
        println!("  added: {}", summary.added);
        println!("  updated: {}", summary.updated);
        println!("  removed: {}", summary.removed);
        for message in &summary.messages {
            println!("  note: {}", message);
        }
    }
    println!("ok");
    Ok(())
}
