//! CLI for driving the migration wizard from a terminal
//!
//! # Usage
//!
//! ```bash
//! # Show phase status for a store pair
//! bridge-migrate --source-key shop.example.com --target-key abc123 status
//!
//! # Migrate categories, then products of one category
//! bridge-migrate --source-key shop.example.com --target-key abc123 migrate categories
//! bridge-migrate --source-key shop.example.com --target-key abc123 migrate products --category 15
//!
//! # Finish the phase and move on
//! bridge-migrate --source-key shop.example.com --target-key abc123 complete 1
//! ```
//!
//! Credentials come from flags or the `WC_*` / `BC_*` environment variables.

use anyhow::Context;
use bridge_rs::clients::{
    BigCommerceClient, SourceCredentials, TargetCredentials, WooCommerceClient,
};
use bridge_rs::config::Config;
use bridge_rs::migration::{
    BatchExecutor, DependencyMappings, EntityKind, PhaseRunner, RunRequest,
};
use bridge_rs::progress::{encode, FnSink, ProgressEvent};
use bridge_rs::storage::open_store;
use bridge_rs::throttle::TargetThrottle;
use bridge_rs::wizard::{Phase, PhaseData, TransitionOutcome, WizardSession};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser)]
#[command(name = "bridge-migrate")]
#[command(about = "Run and inspect WooCommerce to BigCommerce migrations", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Source store identifier
    #[arg(long, env = "BRIDGE_SOURCE_KEY")]
    source_key: String,

    /// Target store identifier
    #[arg(long, env = "BRIDGE_TARGET_KEY")]
    target_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the wizard state
    Status,
    /// Navigate to a phase
    Goto {
        /// Phase number (1-4)
        phase: u8,
    },
    /// Mark a phase as started
    Start { phase: u8 },
    /// Mark a phase as complete
    Complete {
        phase: u8,
        /// JSON file with phase data to merge
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Skip an optional phase
    Skip { phase: u8 },
    /// Discard all progress for this store pair
    Reset,
    /// Migrate one entity type
    Migrate(MigrateArgs),
}

#[derive(Args)]
struct MigrateArgs {
    /// categories, products, customers, orders, coupons, reviews, pages or posts
    entity: EntityKind,

    #[command(flatten)]
    source: SourceArgs,

    #[command(flatten)]
    target: TargetArgs,

    /// Source IDs already migrated, in addition to the stored ones
    #[arg(long, value_delimiter = ',')]
    resume_ids: Vec<u64>,

    /// JSON file with category/product/customer ID mappings
    #[arg(long)]
    mappings: Option<PathBuf>,

    /// Only migrate products of this category
    #[arg(long)]
    category: Option<u64>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Args)]
struct SourceArgs {
    /// WooCommerce site URL
    #[arg(long, env = "WC_URL")]
    source_url: String,

    #[arg(long, env = "WC_CONSUMER_KEY")]
    consumer_key: String,

    #[arg(long, env = "WC_CONSUMER_SECRET", hide_env_values = true)]
    consumer_secret: String,

    /// WordPress user for pages and posts
    #[arg(long, env = "WP_USERNAME")]
    wp_username: Option<String>,

    #[arg(long, env = "WP_APP_PASSWORD", hide_env_values = true)]
    wp_app_password: Option<String>,
}

#[derive(Args)]
struct TargetArgs {
    #[arg(long, env = "BC_STORE_HASH")]
    store_hash: String,

    #[arg(long, env = "BC_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    #[arg(long, env = "BC_API_BASE")]
    api_base: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable lines
    Text,
    /// `data: <json>` records, as served by the HTTP API
    Sse,
}

fn print_event(format: OutputFormat, event: &ProgressEvent) {
    match format {
        OutputFormat::Sse => print!("{}", encode(event)),
        OutputFormat::Text => match event {
            ProgressEvent::Started {
                entity,
                total,
                already_migrated,
            } => println!(
                "Migrating {} {} ({} already migrated)",
                total, entity, already_migrated
            ),
            ProgressEvent::Progress {
                completed,
                total,
                current,
            } => println!(
                "  [{}/{}] {}",
                completed,
                total,
                current.as_deref().unwrap_or("resumed items")
            ),
            ProgressEvent::Complete {
                stats,
                migrated_ids,
                ..
            } => {
                println!(
                    "✓ Done: {} successful, {} skipped ({} resumed), {} failed; {} ids recorded",
                    stats.successful,
                    stats.skipped,
                    stats.resumed,
                    stats.failed,
                    migrated_ids.len()
                );
                for warning in &stats.warnings {
                    println!("  ! {}", warning);
                }
            }
            ProgressEvent::Error { message } => eprintln!("✗ {}", message),
        },
    }
}

fn print_outcome(outcome: &TransitionOutcome) {
    match outcome {
        TransitionOutcome::Applied => println!("✓ Applied"),
        TransitionOutcome::Rejected { reason } => println!("✗ Rejected: {}", reason),
    }
}

fn print_status(session: &WizardSession) {
    let state = session.state();
    println!("Wizard {} -> {}\n", state.source_key, state.target_key);
    println!("{:<3} {:<20} {:<12} {:<10}", "", "Phase", "Status", "Required");
    println!("{:-<48}", "");

    for phase in Phase::ALL {
        let marker = if phase == state.current_phase { "→" } else { "" };
        println!(
            "{:<3} {:<20} {:<12} {:<10}",
            marker,
            phase.to_string(),
            session.status(phase).to_string(),
            if phase.is_required() { "yes" } else { "no" }
        );
        for kind in phase.entities() {
            let progress = state.progress(kind);
            if progress.migrated_ids.is_empty() && progress.stats.is_none() {
                continue;
            }
            println!(
                "      {:<12} {} migrated, {} mapped",
                kind.to_string(),
                progress.migrated_ids.len(),
                progress.id_mapping.len()
            );
        }
    }
}

fn parse_phase(phase: u8) -> anyhow::Result<Phase> {
    Ok(Phase::try_from(phase)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    config.logging.init()?;

    let store = open_store(&config).await?;
    let mut session = WizardSession::open(store, &cli.source_key, &cli.target_key).await?;

    match cli.command {
        Commands::Status => print_status(&session),
        Commands::Goto { phase } => print_outcome(&session.go_to_phase(parse_phase(phase)?).await?),
        Commands::Start { phase } => print_outcome(&session.start_phase(parse_phase(phase)?).await?),
        Commands::Complete { phase, data } => {
            let data = match data {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    Some(serde_json::from_str::<PhaseData>(&raw)?)
                }
                None => None,
            };
            print_outcome(&session.complete_phase(parse_phase(phase)?, data).await?)
        }
        Commands::Skip { phase } => print_outcome(&session.skip_phase(parse_phase(phase)?).await?),
        Commands::Reset => {
            print_outcome(&session.reset().await?);
        }
        Commands::Migrate(args) => migrate(&config, session, args).await?,
    }

    Ok(())
}

async fn migrate(config: &Config, session: WizardSession, args: MigrateArgs) -> anyhow::Result<()> {
    let mappings = match &args.mappings {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str::<DependencyMappings>(&raw)?
        }
        None => DependencyMappings::default(),
    };

    let source = WooCommerceClient::new(SourceCredentials {
        url: args.source.source_url,
        consumer_key: args.source.consumer_key,
        consumer_secret: args.source.consumer_secret,
        wp_username: args.source.wp_username,
        wp_app_password: args.source.wp_app_password,
    });
    let target = BigCommerceClient::new(TargetCredentials {
        store_hash: args.target.store_hash,
        access_token: args.target.access_token,
        api_base: args.target.api_base,
    });
    let throttle = TargetThrottle::new(&config.throttle);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current item");
            ctrl_c.cancel();
        }
    });

    let executor = BatchExecutor::new(&source, &target, &throttle)
        .with_page_size(config.migration.page_size);
    let runner = PhaseRunner::new(executor, config.migration.batch_size);
    let request = RunRequest {
        scope: args.category,
        resume: args.resume_ids,
        mappings,
        batch_size: args.batch_size,
    };

    let format = args.format;
    let sink = FnSink(move |event: ProgressEvent| print_event(format, &event));
    let session = Mutex::new(session);

    let report = runner
        .run(&session, args.entity, &request, &sink, &cancel)
        .await?;

    if report.cancelled {
        anyhow::bail!("migration cancelled; progress so far has been saved");
    }
    Ok(())
}
