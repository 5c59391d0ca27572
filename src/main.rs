//! Scavenger Prover CLI
//!
//! A command-line tool for mining the Scavenger reward service with many
//! identities.
//!
//! # Commands
//!
//! - `terms` / `challenge` / `rate` - Query the service
//! - `add` / `list` - Manage identities
//! - `init` / `register` / `start` / `close` - Drive identity lifecycles
//! - `mine` - Mine with registered identities until interrupted
//! - `solo` - Run one identity's continuous worker loop
//! - `benchmark` - Run performance benchmark

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use scavenger::events::{IdentityEvent, MinerEvent, MiningCompleted};
use scavenger::identity::IdentityId;
use scavenger::orchestrator::OrchestratorSettings;
use scavenger::rpc::ProtocolClient;
use scavenger::store::{IdentityStore, JsonFileStore};
use scavenger::wallet::CredentialFile;
use scavenger::worker::{MiningWorker, WorkerIdentity};
use scavenger::{compute_digest, config, puzzle, BatchReport, MinerConfig, MiningOrchestrator};

#[derive(Parser)]
#[command(name = "scavenger")]
#[command(version = "0.1.0")]
#[command(about = "Multi-identity miner for the Scavenger reward service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.scavenger/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Custom versioned API endpoint
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Custom legacy API endpoint
    #[arg(long, global = true)]
    legacy_url: Option<String>,

    /// Custom identity store path
    #[arg(long, global = true)]
    identities: Option<PathBuf>,

    /// Custom wallet credentials path
    #[arg(long, global = true)]
    wallets: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(clap::Args)]
struct Targets {
    /// Identity ids
    ids: Vec<IdentityId>,

    /// Every stored identity
    #[arg(long, conflicts_with = "ids")]
    all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current terms and conditions
    Terms,

    /// Show the global challenge summary
    Challenge,

    /// Show the work-to-reward rate
    Rate,

    /// Create new identities
    Add {
        /// How many to create
        #[arg(short, long, default_value = "1")]
        count: u32,

        /// Name prefix
        #[arg(long, default_value = "miner")]
        prefix: String,
    },

    /// List stored identities
    List,

    /// Provision wallets
    Init(Targets),

    /// Register wallet addresses with the service
    Register(Targets),

    /// Open wallet sessions
    Start(Targets),

    /// Stop mining and close wallet sessions
    Close(Targets),

    /// Mine with registered identities until Ctrl-C
    Mine {
        #[command(flatten)]
        targets: Targets,

        /// Advisory thread count per identity (default: number of CPU cores)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Start a new attempt after each completed one
        #[arg(long)]
        repeat: bool,
    },

    /// Run the continuous worker loop for one identity until Ctrl-C
    Solo {
        /// Identity id
        id: IdentityId,
    },

    /// Run performance benchmark
    Benchmark {
        /// Number of digests to compute
        #[arg(short, long, default_value = "100000")]
        count: u32,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = tokio::runtime::Runtime::new()
        .map_err(anyhow::Error::from)
        .and_then(|runtime| runtime.block_on(run(cli)));

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scavenger={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct App {
    config: MinerConfig,
    client: Arc<ProtocolClient>,
    store: Arc<JsonFileStore>,
}

impl App {
    async fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
        let mut config = if config_path.exists() {
            MinerConfig::load(&config_path)?
        } else {
            MinerConfig::default()
        };
        if let Some(url) = &cli.api_url {
            config.api.api_url = url.clone();
        }
        if let Some(url) = &cli.legacy_url {
            config.api.legacy_url = url.clone();
        }
        if let Some(path) = &cli.identities {
            config.storage.identities_path = path.clone();
        }
        if let Some(path) = &cli.wallets {
            config.storage.wallets_path = path.clone();
        }

        let client = Arc::new(ProtocolClient::new(config.api.clone())?);
        let store = Arc::new(
            JsonFileStore::open(&config.storage.identities_path)
                .await
                .with_context(|| {
                    format!(
                        "opening identity store {}",
                        config.storage.identities_path.display()
                    )
                })?,
        );
        Ok(Self {
            config,
            client,
            store,
        })
    }

    fn orchestrator(&self) -> anyhow::Result<MiningOrchestrator> {
        let wallet = CredentialFile::load(&self.config.storage.wallets_path)?;
        if wallet.is_empty() {
            warn!(path = %wallet.path().display(), "no wallet credentials on file");
        }
        Ok(MiningOrchestrator::new(
            self.client.clone(),
            self.store.clone(),
            Arc::new(wallet),
            OrchestratorSettings::from(&self.config.mining),
        ))
    }

    async fn resolve(&self, targets: &Targets) -> anyhow::Result<Vec<IdentityId>> {
        if targets.all {
            return Ok(self.store.list().await?.into_iter().map(|i| i.id).collect());
        }
        if targets.ids.is_empty() {
            anyhow::bail!("Name at least one identity id, or pass --all");
        }
        Ok(targets.ids.clone())
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let app = App::load(&cli).await?;

    match &cli.command {
        Commands::Terms => cmd_terms(&app).await,
        Commands::Challenge => cmd_challenge(&app).await,
        Commands::Rate => cmd_rate(&app).await,
        Commands::Add { count, prefix } => cmd_add(&app, *count, prefix).await,
        Commands::List => cmd_list(&app).await,
        Commands::Init(targets) => {
            let ids = app.resolve(targets).await?;
            report(app.orchestrator()?.initialize_many(&ids).await)
        }
        Commands::Register(targets) => {
            let ids = app.resolve(targets).await?;
            report(app.orchestrator()?.register_many(&ids).await)
        }
        Commands::Start(targets) => {
            let ids = app.resolve(targets).await?;
            report(app.orchestrator()?.start_many(&ids).await)
        }
        Commands::Close(targets) => {
            let ids = app.resolve(targets).await?;
            report(app.orchestrator()?.close_many(&ids).await)
        }
        Commands::Mine {
            targets,
            threads,
            repeat,
        } => cmd_mine(&app, targets, *threads, *repeat).await,
        Commands::Solo { id } => cmd_solo(&app, *id).await,
        Commands::Benchmark { count } => cmd_benchmark(*count),
    }
}

fn report(report: BatchReport) -> anyhow::Result<()> {
    println!("{}", report);
    for (id, error) in report.failures() {
        println!("  #{}: {}", id, error);
    }
    if report.attempted() > 0 && report.succeeded() == 0 {
        anyhow::bail!("every {} attempt failed", report.operation);
    }
    Ok(())
}

async fn cmd_terms(app: &App) -> anyhow::Result<()> {
    let terms = app.client.fetch_terms().await?;
    println!("Version: {}", terms.version);
    println!("\n{}", terms.terms);
    if !terms.message.is_empty() {
        println!("\nMessage to sign:\n{}", terms.message);
    }
    Ok(())
}

async fn cmd_challenge(app: &App) -> anyhow::Result<()> {
    let summary = app.orchestrator()?.build_challenge_summary().await;
    println!("Status:            {} ({})", summary.miner_status, summary.status);
    println!("Challenge:         {}", or_na(&summary.challenge_id));
    println!("Day / number:      {} / {}", summary.day, summary.challenge_number);
    println!(
        "Difficulty:        {} bits{}",
        summary.difficulty_bits,
        summary
            .difficulty_category
            .map(|c| format!(" ({})", c))
            .unwrap_or_default()
    );
    println!("Difficulty target: {}", or_na(&summary.difficulty_hex));
    println!("Latest submission: {}", summary.latest_submission_age);
    println!("Next challenge in: {}", summary.next_challenge_in);
    Ok(())
}

async fn cmd_rate(app: &App) -> anyhow::Result<()> {
    let rate = app.client.fetch_rate().await?;
    println!("Rate: {}", rate.rate);
    println!("As of: {}", rate.timestamp);
    Ok(())
}

async fn cmd_add(app: &App, count: u32, prefix: &str) -> anyhow::Result<()> {
    let existing = app.store.list().await?.len();
    for n in 0..count as usize {
        let identity = app
            .store
            .create(&format!("{}-{}", prefix, existing + n + 1))
            .await?;
        println!("Created #{} {}", identity.id, identity.name);
    }
    println!("Stored in: {}", app.store.path().display());
    Ok(())
}

async fn cmd_list(app: &App) -> anyhow::Result<()> {
    let identities = app.store.list().await?;
    if identities.is_empty() {
        println!("No identities. Create some with 'scavenger add'");
        return Ok(());
    }

    println!(
        "{:>4}  {:<16} {:<16} {:<4} {:>12} {:>5}  ADDRESS",
        "ID", "NAME", "STATE", "REG", "HASHES", "SOLS"
    );
    for identity in identities {
        println!(
            "{:>4}  {:<16} {:<16} {:<4} {:>12} {:>5}  {}",
            identity.id,
            identity.name,
            identity.state.label(),
            if identity.registered { "yes" } else { "no" },
            identity.total_hashes,
            identity.solutions_found,
            or_na(&identity.wallet_address)
        );
    }
    Ok(())
}

async fn cmd_mine(
    app: &App,
    targets: &Targets,
    threads: Option<usize>,
    repeat: bool,
) -> anyhow::Result<()> {
    let ids = app.resolve(targets).await?;
    let orchestrator = app.orchestrator()?;
    let thread_hint = threads
        .or(app.config.mining.threads)
        .unwrap_or_else(num_cpus::get);
    let solution_delay = app.config.mining.worker_settings().solution_delay;

    let mut events = orchestrator.subscribe();
    report(orchestrator.start_mining_many(&ids, thread_hint).await)?;
    if orchestrator.active_ids().await.is_empty() {
        return Ok(());
    }
    println!("Mining... press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                let stopped = orchestrator.stop_all().await;
                println!("Stopped {} worker(s)", stopped);
                break;
            }
            received = events.recv() => match received {
                Ok(IdentityEvent { identity_id, event: MinerEvent::Progress(p) }) => {
                    println!(
                        "#{} {:.2} H/s | hashes {} | nonce {}",
                        identity_id, p.hash_rate, p.hash_count, p.current_nonce
                    );
                }
                Ok(IdentityEvent { identity_id, event: MinerEvent::Completed(c) }) => {
                    print_completion(identity_id, &c);
                    orchestrator.wait_idle(identity_id).await;
                    if repeat && !c.is_cancelled() {
                        tokio::time::sleep(solution_delay).await;
                        let identity = orchestrator.store().get(identity_id).await?;
                        if let Err(e) = orchestrator.start_mining(&identity, thread_hint).await {
                            println!("#{} could not restart: {}", identity_id, e);
                        }
                    }
                    if orchestrator.active_ids().await.is_empty() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    Ok(())
}

async fn cmd_solo(app: &App, id: IdentityId) -> anyhow::Result<()> {
    let identity = app.store.get(id).await?;
    if !identity.registered {
        anyhow::bail!("Identity #{} is not registered. Run 'scavenger register {}'", id, id);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut worker = MiningWorker::new(
        app.client.clone(),
        WorkerIdentity::from(&identity),
        app.config.mining.worker_settings(),
        tx,
    );
    println!("Worker: {}", worker.worker_id());
    worker.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(MinerEvent::Progress(p)) => {
                    println!("{:.2} H/s | hashes {} | nonce {}", p.hash_rate, p.hash_count, p.current_nonce);
                }
                Some(MinerEvent::Completed(c)) => print_completion(id, &c),
                None => break,
            }
        }
    }

    println!("\nStopping...");
    worker.stop().await;
    println!("Total hashes: {}", worker.total_hashes());
    Ok(())
}

fn print_completion(id: IdentityId, completed: &MiningCompleted) {
    let nonce = completed.nonce.as_deref().unwrap_or("-");
    if completed.success {
        let tx = completed
            .receipt
            .as_ref()
            .map(|r| r.tx_hash.as_str())
            .unwrap_or("-");
        println!(
            "#{} solution accepted: nonce {} | {} hashes in {:.1}s | tx {}",
            id,
            nonce,
            completed.total_hashes,
            completed.duration.as_secs_f64(),
            tx
        );
    } else {
        println!(
            "#{} attempt ended: {} | nonce {} | {} hashes in {:.1}s",
            id,
            completed.error_message.as_deref().unwrap_or("unknown"),
            nonce,
            completed.total_hashes,
            completed.duration.as_secs_f64()
        );
    }
}

fn cmd_benchmark(count: u32) -> anyhow::Result<()> {
    println!("Running benchmark with {} digests...", count);

    let challenge = "benchmark challenge payload";
    let start = Instant::now();

    for nonce in 0..count {
        let _ = compute_digest(challenge, &nonce.to_string());
    }

    let elapsed = start.elapsed();
    let hashrate = count as f64 / elapsed.as_secs_f64();

    println!("\nResults:");
    println!("  Total digests: {}", count);
    println!("  Time elapsed: {:.2}s", elapsed.as_secs_f64());
    println!("  Hashrate: {:.2} H/s", hashrate);

    println!("\nPuzzle parameters:");
    println!("  Digest size: {} bits", puzzle::DIGEST_BITS);
    println!("  Transform exponent: {}", puzzle::TRANSFORM_EXPONENT);
    println!(
        "  Additive constant: 10^{}",
        puzzle::ADDITIVE_CONSTANT_DECIMALS
    );

    Ok(())
}

fn or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}
