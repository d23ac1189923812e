//! `cohortd`: admin tool for a Cohort participant registry.
//!
//! Opens the registry in the configured data directory, runs one command
//! and prints the result as JSON.
//!
//! # Usage
//!
//! ```text
//! cohortd hpo add 1 PITT                         # register an HPO
//! cohortd participant create --provider-link '[...]'
//! cohortd participant update 123456789 --provider-link '[...]'
//! cohortd participant history 123456789
//! cohortd order create 123456789 -i 'sys|A1' -s '1ED10:EDTA tube'
//! cohortd config set current_config '{"k": [1]}'
//! cohortd config active-at current_config 1700000000000
//! cohortd changes --after 10                     # change feed
//! cohortd benchmark -n 1000 -t 4                 # in-memory throughput
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cohort_config::{CONFIG_SINGLETON_KEY, ConfigCache};
use cohort_registry::{IdGenerator, RandomIdGenerator, Registry};
use cohort_store::Store;
use cohort_types::{
    BiobankId, Clock, Hpo, HpoId, LogPosition, NewBiobankOrder, NewParticipant, OrderIdentifier,
    OrderSample, ParticipantId, SystemClock, Timestamp,
};
use serde::Serialize;
use tracing::{debug, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "cohortd", version, about = "Cohort participant registry admin tool")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory.
    #[arg(short, long, global = true, env = "COHORT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Participant operations.
    Participant {
        #[command(subcommand)]
        action: ParticipantCommands,
    },

    /// Biobank order operations.
    Order {
        #[command(subcommand)]
        action: OrderCommands,
    },

    /// Health provider organization directory.
    Hpo {
        #[command(subcommand)]
        action: HpoCommands,
    },

    /// Participant summaries.
    Summary {
        #[command(subcommand)]
        action: SummaryCommands,
    },

    /// Stored configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show committed writes after a log position.
    Changes {
        /// Only show writes after this position.
        #[arg(long, default_value = "0")]
        after: u64,

        /// Maximum number of entries.
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },

    /// Insert and update participants in memory and report throughput.
    Benchmark {
        /// Number of participants to insert (each is then updated once).
        #[arg(short = 'n', long, default_value = "1000")]
        count: usize,

        /// Number of writer threads.
        #[arg(short, long, default_value = "4")]
        threads: usize,
    },
}

#[derive(Subcommand)]
enum ParticipantCommands {
    /// Register a participant. Ids are generated unless both are given.
    Create {
        #[arg(long)]
        participant_id: Option<u32>,
        #[arg(long)]
        biobank_id: Option<u32>,
        /// JSON list of provider links.
        #[arg(long)]
        provider_link: Option<String>,
    },
    /// Change a participant's provider link.
    Update {
        id: u32,
        /// New JSON list of provider links.
        #[arg(long, conflicts_with = "clear_provider_link")]
        provider_link: Option<String>,
        /// Remove the provider link.
        #[arg(long)]
        clear_provider_link: bool,
    },
    /// Show the current version.
    Get { id: u32 },
    /// Show every version, oldest first.
    History { id: u32 },
    /// Show one past version.
    Version { id: u32, version: u32 },
    /// Participants changed after a log position.
    Sync {
        #[arg(long, default_value = "0")]
        after: u64,
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// List every assigned biobank id.
    BiobankIds,
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Place an order for a participant.
    Create {
        participant_id: u32,
        #[arg(long)]
        order_id: Option<String>,
        /// Defaults to `Patient/<participant_id>`.
        #[arg(long)]
        subject: Option<String>,
        /// Order time in milliseconds since the epoch; defaults to now.
        #[arg(long)]
        created: Option<u64>,
        /// `system|value`; repeatable.
        #[arg(short, long = "identifier")]
        identifiers: Vec<String>,
        /// `test:description`; repeatable.
        #[arg(short, long = "sample")]
        samples: Vec<String>,
    },
    Get { order_id: String },
    History { order_id: String },
    /// Orders placed for a participant.
    List { participant_id: u32 },
}

#[derive(Subcommand)]
enum HpoCommands {
    Add { id: u32, name: String },
    List,
}

#[derive(Subcommand)]
enum SummaryCommands {
    Get { participant_id: u32 },
    /// Summaries of every participant in an HPO.
    ByHpo { hpo_id: u32 },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show a whole configuration blob.
    Get {
        #[arg(default_value = CONFIG_SINGLETON_KEY)]
        key: String,
    },
    /// Replace a configuration blob with the given JSON.
    Set { key: String, json: String },
    /// Show one setting of the main configuration.
    Setting { name: String },
    /// Show the blob that was active at an instant (milliseconds).
    ActiveAt { key: String, at: u64 },
    /// Show every committed value of a key.
    History { key: String },
    /// List required settings that are missing.
    Check,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    setup_tracing(&config.log.level);

    match cli.command {
        Commands::Benchmark { count, threads } => cmd_benchmark(&config, count, threads),
        command => {
            let registry = open_registry(&config, false)?;
            run(&registry, command)
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_registry(config: &CliConfig, force_memory: bool) -> Result<Registry> {
    let store = if force_memory || config.is_memory() {
        info!("using in-memory store");
        Store::in_memory()
    } else {
        let path = config.storage.data_dir.join("db");
        std::fs::create_dir_all(&config.storage.data_dir)
            .context("failed to create data directory")?;
        debug!(path = %path.display(), "opening store");
        Store::open(&path)
            .with_context(|| format!("cannot open registry at {}", path.display()))?
    };
    let store = Arc::new(store);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache = Arc::new(ConfigCache::with_ttl(
        Arc::clone(&store),
        Arc::clone(&clock),
        config.cache_ttl(),
    ));
    let ids: Arc<dyn IdGenerator> = match config.registry.id_seed {
        Some(seed) => Arc::new(RandomIdGenerator::seeded(seed)),
        None => Arc::new(RandomIdGenerator::new()),
    };
    Ok(Registry::new(store, cache, clock, ids, config.write_options()))
}

fn run(registry: &Registry, command: Commands) -> Result<()> {
    match command {
        Commands::Participant { action } => cmd_participant(registry, action),
        Commands::Order { action } => cmd_order(registry, action),
        Commands::Hpo { action } => cmd_hpo(registry, action),
        Commands::Summary { action } => cmd_summary(registry, action),
        Commands::Config { action } => cmd_config(registry.config(), action),
        Commands::Changes { after, limit } => {
            let changes = registry
                .store()
                .changes_since(LogPosition::new(after), limit)?;
            print_json(&changes)
        }
        Commands::Benchmark { .. } => bail!("benchmark runs on its own in-memory registry"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// -----------------------------------------------------------------------
// cohortd participant
// -----------------------------------------------------------------------

fn cmd_participant(registry: &Registry, action: ParticipantCommands) -> Result<()> {
    let participants = registry.participants();
    match action {
        ParticipantCommands::Create {
            participant_id,
            biobank_id,
            provider_link,
        } => {
            let participant = participants.insert(NewParticipant {
                participant_id: participant_id.map(ParticipantId::new),
                biobank_id: biobank_id.map(BiobankId::new),
                provider_link,
            })?;
            print_json(&participant)
        }
        ParticipantCommands::Update {
            id,
            provider_link,
            clear_provider_link,
        } => {
            let mut participant = participants.get_required(ParticipantId::new(id))?;
            if clear_provider_link {
                participant.provider_link = None;
            } else if provider_link.is_some() {
                participant.provider_link = provider_link;
            }
            print_json(&participants.update(&participant)?)
        }
        ParticipantCommands::Get { id } => {
            print_json(&participants.get_required(ParticipantId::new(id))?)
        }
        ParticipantCommands::History { id } => {
            let history = participants
                .history(ParticipantId::new(id))
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&history)
        }
        ParticipantCommands::Version { id, version } => {
            match participants.get_version(ParticipantId::new(id), version)? {
                Some(record) => print_json(&record),
                None => bail!("participant {id} has no version {version}"),
            }
        }
        ParticipantCommands::Sync { after, limit } => {
            print_json(&participants.sync_after(LogPosition::new(after), limit)?)
        }
        ParticipantCommands::BiobankIds => {
            let mut ids: Vec<u32> = participants
                .valid_biobank_ids()?
                .into_iter()
                .map(|id| id.get())
                .collect();
            ids.sort_unstable();
            print_json(&ids)
        }
    }
}

// -----------------------------------------------------------------------
// cohortd order
// -----------------------------------------------------------------------

fn cmd_order(registry: &Registry, action: OrderCommands) -> Result<()> {
    let orders = registry.orders();
    match action {
        OrderCommands::Create {
            participant_id,
            order_id,
            subject,
            created,
            identifiers,
            samples,
        } => {
            let new = NewBiobankOrder {
                order_id,
                subject: subject.unwrap_or_else(|| format!("Patient/{participant_id}")),
                created: created
                    .map(Timestamp::from_millis)
                    .unwrap_or_else(|| SystemClock.now()),
                identifiers: identifiers
                    .iter()
                    .map(|s| parse_identifier(s))
                    .collect::<Result<_>>()?,
                samples: samples
                    .iter()
                    .map(|s| parse_sample(s))
                    .collect::<Result<_>>()?,
            };
            print_json(&orders.insert(ParticipantId::new(participant_id), new)?)
        }
        OrderCommands::Get { order_id } => print_json(&orders.get_required(&order_id)?),
        OrderCommands::History { order_id } => {
            let history = orders.history(&order_id).collect::<Result<Vec<_>, _>>()?;
            print_json(&history)
        }
        OrderCommands::List { participant_id } => {
            print_json(&orders.list_for_participant(ParticipantId::new(participant_id))?)
        }
    }
}

/// `system|value`
fn parse_identifier(s: &str) -> Result<OrderIdentifier> {
    let Some((system, value)) = s.split_once('|') else {
        bail!("identifier {s:?} must look like system|value");
    };
    Ok(OrderIdentifier {
        system: system.to_string(),
        value: value.to_string(),
    })
}

/// `test:description`
fn parse_sample(s: &str) -> Result<OrderSample> {
    let Some((test, description)) = s.split_once(':') else {
        bail!("sample {s:?} must look like test:description");
    };
    Ok(OrderSample {
        test: test.trim().to_string(),
        description: description.trim().to_string(),
    })
}

// -----------------------------------------------------------------------
// cohortd hpo / summary
// -----------------------------------------------------------------------

fn cmd_hpo(registry: &Registry, action: HpoCommands) -> Result<()> {
    match action {
        HpoCommands::Add { id, name } => {
            let hpo = Hpo {
                hpo_id: HpoId::new(id),
                name,
            };
            registry.hpos().insert(&hpo)?;
            print_json(&hpo)
        }
        HpoCommands::List => print_json(&registry.hpos().list()?),
    }
}

fn cmd_summary(registry: &Registry, action: SummaryCommands) -> Result<()> {
    match action {
        SummaryCommands::Get { participant_id } => {
            let id = ParticipantId::new(participant_id);
            match registry.summaries().get(id)? {
                Some(summary) => print_json(&summary),
                None => bail!("no summary for participant {id}"),
            }
        }
        SummaryCommands::ByHpo { hpo_id } => {
            print_json(&registry.summaries().list_by_hpo(HpoId::new(hpo_id))?)
        }
    }
}

// -----------------------------------------------------------------------
// cohortd config
// -----------------------------------------------------------------------

fn cmd_config(cache: &ConfigCache, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Get { key } => print_json(&cache.get(&key)?),
        ConfigCommands::Set { key, json } => {
            let value: serde_json::Value =
                serde_json::from_str(&json).context("configuration must be valid JSON")?;
            let record = cache.store_config(&key, value)?;
            info!(%key, version = record.version, "stored configuration");
            print_json(&record)
        }
        ConfigCommands::Setting { name } => print_json(&cache.get_setting_json(&name, None)?),
        ConfigCommands::ActiveAt { key, at } => {
            print_json(&cache.get_config_active_at(&key, Timestamp::from_millis(at))?)
        }
        ConfigCommands::History { key } => print_json(&cache.dao().history(&key)?),
        ConfigCommands::Check => {
            let missing = cache.check_required()?;
            if missing.is_empty() {
                println!("All required settings are present.");
                Ok(())
            } else {
                bail!("missing required settings: {}", missing.join(", "))
            }
        }
    }
}

// -----------------------------------------------------------------------
// cohortd benchmark
// -----------------------------------------------------------------------

fn cmd_benchmark(config: &CliConfig, count: usize, threads: usize) -> Result<()> {
    let threads = threads.max(1);
    let registry = open_registry(config, true)?;
    let participants = registry.participants();

    let start = Instant::now();
    let inserted: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let share = count / threads + usize::from(t < count % threads);
                s.spawn(move || {
                    (0..share)
                        .map(|_| participants.insert(NewParticipant::default()))
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("benchmark thread panicked"))
            .collect::<Result<Vec<_>, _>>()
    })?
    .into_iter()
    .flatten()
    .collect();
    let insert_elapsed = start.elapsed();

    let start = Instant::now();
    std::thread::scope(|s| {
        let handles: Vec<_> = inserted
            .chunks(inserted.len().div_ceil(threads).max(1))
            .map(|chunk| {
                s.spawn(move || {
                    chunk
                        .iter()
                        .try_for_each(|p| participants.update(p).map(|_| ()))
                })
            })
            .collect();
        handles
            .into_iter()
            .try_for_each(|h| h.join().expect("benchmark thread panicked"))
    })?;
    let update_elapsed = start.elapsed();

    let rate = |n: usize, secs: f64| if secs > 0.0 { n as f64 / secs } else { 0.0 };
    println!(
        "inserted {} participants in {:.2?} ({:.0}/s)",
        inserted.len(),
        insert_elapsed,
        rate(inserted.len(), insert_elapsed.as_secs_f64()),
    );
    println!(
        "updated {} participants in {:.2?} ({:.0}/s)",
        inserted.len(),
        update_elapsed,
        rate(inserted.len(), update_elapsed.as_secs_f64()),
    );
    println!("last log position: {}", registry.store().last_position());
    Ok(())
}
