use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use ixsync_apply::{export, load_definitions, sync, validate, PlanOptions, SyncOptions};
use ixsync_client::{CouchbaseStore, StoreConfig};
use ixsync_core::{HookRegistry, Validators};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ixsyncctl", version, about = "Declarative GSI index synchronization")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Cluster address: http(s)://host[:port], couchbase(s)://host or a bare host
    #[arg(long, global = true, env = "IXSYNC_CLUSTER", default_value = "http://localhost:8091")]
    cluster: String,

    #[arg(short = 'u', long, global = true, env = "IXSYNC_USERNAME", default_value = "Administrator")]
    username: String,

    #[arg(short = 'p', long, global = true, env = "IXSYNC_PASSWORD", hide_env_values = true, default_value = "")]
    password: String,

    /// Query service endpoint (default: cluster host on 8093/18093)
    #[arg(long = "query-url", global = true, env = "IXSYNC_QUERY_URL")]
    query_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring a bucket's indexes in line with definition files
    Sync {
        bucket: String,
        /// Definition files or directories; `-` reads stdin
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Skip mutations that would make an index unavailable
        #[arg(long, action = ArgAction::SetTrue)]
        safe: bool,
        /// Print the plan without changing anything
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
        /// Seconds to wait for each phase's indexes to come online
        #[arg(long = "build-timeout", env = "IXSYNC_BUILD_TIMEOUT", default_value_t = 300)]
        build_timeout: u64,
        /// Milliseconds to pause after each phase before building
        #[arg(long = "settle-delay", env = "IXSYNC_SETTLE_DELAY", default_value_t = 2000)]
        settle_delay: u64,
    },
    /// Check definition files; with --bucket also have the cluster parse them
    Validate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Print definitions for every index in a bucket
    Export {
        bucket: String,
    },
}

fn init_tracing() {
    let env = std::env::var("IXSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("IXSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid IXSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

fn connect(cli: &Cli, bucket: &str) -> Result<CouchbaseStore> {
    let mut cfg = StoreConfig::new(&cli.cluster, cli.username.clone(), cli.password.clone(), bucket)
        .with_context(|| format!("invalid cluster address '{}'", cli.cluster))?;
    if let Some(q) = &cli.query_url {
        cfg = cfg.with_query_url(q).with_context(|| format!("invalid query url '{}'", q))?;
    }
    info!(cluster = %cfg.cluster, query = %cfg.query, bucket = %bucket, "connecting");
    CouchbaseStore::new(cfg).context("failed to build HTTP client")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let validators = Validators::new();
    let hooks = HookRegistry::new();

    match &cli.command {
        Commands::Sync { bucket, paths, safe, dry_run, build_timeout, settle_delay } => {
            let set = load_definitions(paths, &validators, &hooks).context("loading definitions")?;
            info!(definitions = set.definitions.len(), "loaded definitions");
            let store = connect(&cli, bucket)?;
            let options = SyncOptions {
                safe: *safe,
                dry_run: *dry_run,
                is_secure: store.is_secure(),
                plan: PlanOptions {
                    settle_delay: Duration::from_millis(*settle_delay),
                    build_timeout: Duration::from_secs(*build_timeout),
                },
            };
            let mut stdout = io::stdout();
            tokio::select! {
                res = sync(&store, set.definitions, &options, &mut stdout) => {
                    let outcome = res.context("sync failed")?;
                    if cli.output == Output::Json {
                        println!(
                            "{}",
                            serde_json::json!({
                                "planned": outcome.planned,
                                "skipped_unsafe": outcome.skipped_unsafe,
                                "executed": outcome.summary.as_ref().map(|s| s.executed),
                            })
                        );
                    }
                    if outcome.skipped_unsafe > 0 {
                        warn!(skipped = outcome.skipped_unsafe, "unsafe mutations were left out");
                    }
                }
                _ = signal::ctrl_c() => {
                    warn!("interrupted; the current phase may be partially applied");
                    anyhow::bail!("interrupted");
                }
            }
        }
        Commands::Validate { paths, bucket } => {
            let mut set = load_definitions(paths, &validators, &hooks).context("loading definitions")?;
            let store = bucket.as_deref().map(|b| connect(&cli, b)).transpose()?;
            validate(store.as_ref(), &mut set.definitions).await.context("validation failed")?;
            match cli.output {
                Output::Human => println!("{} definitions valid", set.definitions.len()),
                Output::Json => println!("{}", serde_json::to_string_pretty(&set.definitions)?),
            }
        }
        Commands::Export { bucket } => {
            let store = connect(&cli, bucket)?;
            let patches = export(&store).await.context("export failed")?;
            let mut out = io::stdout().lock();
            match cli.output {
                Output::Human => {
                    for p in &patches {
                        writeln!(out, "---")?;
                        serde_yaml::to_writer(&mut out, p)?;
                    }
                }
                Output::Json => writeln!(out, "{}", serde_json::to_string_pretty(&patches)?)?,
            }
        }
    }
    Ok(())
}
