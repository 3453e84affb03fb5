use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::{
    AccessGate, Embedding, IdentityResolver, MatchError, MatchResult, Metric, ResolverConfig,
};
use facegate_store::SqliteStore;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod config;
mod input;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate", about = "Face embedding enrollment and access control")]
struct Cli {
    /// TOML config file (default: $FACEGATE_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Distance metric: cosine or euclidean
    #[arg(long, global = true)]
    metric: Option<Metric>,

    /// Maximum accepted distance (default depends on the metric)
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user
    AddUser {
        /// Display name (must be unique)
        name: String,
    },
    /// Enroll one or more embedding samples for a user
    Enroll {
        /// User id or name
        user: String,
        /// Embedding JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Verify a capture sequence of embedding files
    Verify {
        /// Embedding JSON files, one per captured frame
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List enrolled users
    Users,
    /// Remove a user and all of their samples
    Remove {
        /// User id or name
        user: String,
    },
    /// Show recent access attempts
    Logs {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Print both distances between two embedding files
    Compare { a: PathBuf, b: PathBuf },
    /// Show configuration and gallery summary
    Status,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(metric) = cli.metric {
        config.metric = metric;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = Some(threshold);
    }
    let resolver_config = config.resolver_config()?;
    tracing::debug!(?config, "configuration loaded");

    run(cli.command, &config, resolver_config)
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))
}

fn run(command: Commands, config: &Config, resolver_config: ResolverConfig) -> Result<ExitCode> {
    match command {
        Commands::AddUser { name } => {
            let user = open_store(config)?.create_user(&name)?;
            print_json(&user)?;
        }
        Commands::Enroll { user, files } => {
            let loaded = files
                .iter()
                .map(|p| Ok((p.clone(), input::load(p)?)))
                .collect::<Result<Vec<_>>>()?;
            let samples = input::collect_samples(loaded)?;

            let store = open_store(config)?;
            let user = store.find_user(&user)?;
            let resolver = IdentityResolver::with_config(store, resolver_config)?;
            for embedding in &samples {
                resolver.enroll(&user.id, embedding)?;
            }
            let samples = resolver.store().backend().sample_count(&user.id)?;
            print_json(&serde_json::json!({
                "user_id": user.id,
                "name": user.name,
                "enrolled": files.len(),
                "samples": samples,
            }))?;
        }
        Commands::Verify { files } => {
            if files.len() > config.frames_per_verify {
                tracing::warn!(
                    given = files.len(),
                    used = config.frames_per_verify,
                    "too many frames; extra files ignored"
                );
            }
            let frames = files
                .iter()
                .take(config.frames_per_verify)
                .map(|p| input::load(p))
                .collect::<Result<Vec<_>>>()?;

            let resolver = IdentityResolver::with_config(open_store(config)?, resolver_config)?;
            return verify(&AccessGate::new(resolver), &frames);
        }
        Commands::Users => {
            let store = open_store(config)?;
            let users = store
                .list_users()?
                .into_iter()
                .map(|u| -> Result<serde_json::Value> {
                    let samples = store.sample_count(&u.id)?;
                    Ok(serde_json::json!({
                        "id": u.id,
                        "name": u.name,
                        "samples": samples,
                        "created_at": u.created_at,
                        "last_access": u.last_access,
                    }))
                })
                .collect::<Result<Vec<_>>>()?;
            print_json(&users)?;
        }
        Commands::Remove { user } => {
            let store = open_store(config)?;
            let user = store.find_user(&user)?;
            store.delete_user(&user.id)?;
            println!("Removed user {} ({})", user.name, user.id);
        }
        Commands::Logs { limit } => {
            print_json(&open_store(config)?.recent_attempts(limit)?)?;
        }
        Commands::Status => {
            let resolver = IdentityResolver::with_config(open_store(config)?, resolver_config)?;
            let gallery = resolver.store().refresh(false)?;
            print_json(&serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "db_path": config.db_path,
                "metric": resolver.metric(),
                "threshold": resolver.threshold(),
                "users": gallery.len(),
                "samples": gallery.sample_count(),
                "dimension": gallery.dim(),
            }))?;
        }
        Commands::Compare { a, b } => return compare(&a, &b, &resolver_config),
    }
    Ok(ExitCode::SUCCESS)
}

/// Exit status 0 on accept, 1 on reject, 2 when no decision could be made.
fn verify(gate: &AccessGate<SqliteStore>, frames: &[Option<Embedding>]) -> Result<ExitCode> {
    match gate.authenticate(&mut input::Precomputed, frames) {
        Ok(MatchResult::Accepted { user_id, distance }) => {
            let name = gate
                .resolver()
                .store()
                .backend()
                .user(&user_id)?
                .map(|u| u.name);
            print_json(&serde_json::json!({
                "accepted": true,
                "user_id": user_id,
                "name": name,
                "distance": distance,
            }))?;
            Ok(ExitCode::SUCCESS)
        }
        Ok(MatchResult::Rejected { best_distance }) => {
            print_json(&serde_json::json!({
                "accepted": false,
                "distance": best_distance,
            }))?;
            Ok(ExitCode::from(1))
        }
        Err(err) if err.is_capture_failure() => {
            eprintln!("No usable face: {err}. Try again.");
            Ok(ExitCode::from(2))
        }
        Err(MatchError::EmptyEnrollment) => {
            eprintln!("No users enrolled yet; run `facegate enroll` first.");
            Ok(ExitCode::from(2))
        }
        Err(err) => Err(err.into()),
    }
}

fn compare(a: &Path, b: &Path, config: &ResolverConfig) -> Result<ExitCode> {
    let (Some(a), Some(b)) = (input::load(a)?, input::load(b)?) else {
        bail!("{}", MatchError::NoFaceDetected);
    };
    let distance = config.metric.distance(&a, &b)?;
    print_json(&serde_json::json!({
        "cosine": Metric::Cosine.distance(&a, &b)?,
        "euclidean": Metric::Euclidean.distance(&a, &b)?,
        "metric": config.metric,
        "threshold": config.threshold,
        "match": distance < config.threshold,
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
