use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::Readiness;
use rollcall_engine::{
    AttendanceSink, Config, Dispatcher, Enrollment, EnrollmentState, JsonlSink, Recognizer,
    TracingNotifier,
};
use rollcall_store::{export_json, import_json, shared, DescriptorStore, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod replay;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enrolled identities
    List,
    /// Show one enrolled identity
    Show {
        /// Identity ID
        id: String,
    },
    /// Remove an enrolled identity
    Remove {
        /// Identity ID
        id: String,
    },
    /// Remove every enrolled identity
    Clear,
    /// Write all descriptors as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace all descriptors from a JSON export
    Import {
        /// File produced by `export`
        file: PathBuf,
    },
    /// Show store location, enrolled count and configuration
    Status,
    /// Enroll an identity from a replay feed
    Enroll {
        /// Identity ID (e.g., student number)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// JSON-lines replay file
        #[arg(long)]
        replay: PathBuf,
    },
    /// Run live recognition over a replay feed
    Recognize {
        /// JSON-lines replay file
        #[arg(long)]
        replay: PathBuf,
        /// Attendance session ID; without it matches are only reported
        #[arg(long)]
        session: Option<String>,
        /// Append attendance records to this JSON-lines file
        #[arg(long)]
        attendance_log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("invalid configuration")?;

    match cli.command {
        Commands::List => list(&open_store(&config)?)?,
        Commands::Show { id } => {
            let store = open_store(&config)?;
            let Some(d) = store.get(&id)? else {
                bail!("no face enrolled for {id}");
            };
            println!("Identity:  {}", d.identity_id);
            println!("Name:      {}", d.display_name);
            println!("Enrolled:  {}", d.enrolled_at.to_rfc3339());
            println!("Updated:   {}", d.last_updated_at.to_rfc3339());
            println!("Dimension: {}", d.embedding.values().len());
        }
        Commands::Remove { id } => {
            if open_store(&config)?.remove(&id)? {
                println!("Removed {id}");
            } else {
                bail!("no face enrolled for {id}");
            }
        }
        Commands::Clear => {
            let removed = open_store(&config)?.clear()?;
            println!("Removed {removed} enrolled face(s)");
        }
        Commands::Export { output } => {
            let json = export_json(&open_store(&config)?)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let imported = import_json(&mut open_store(&config)?, &json)?;
            println!("Imported {imported} enrolled face(s)");
        }
        Commands::Status => {
            let store = open_store(&config)?;
            println!("Store:            {}", config.db_path.display());
            println!("Enrolled:         {}", store.count()?);
            println!("Match threshold:  {}", config.match_threshold);
            println!(
                "Enrollment:       {} samples, {} ms apart",
                config.enroll_samples,
                config.enroll_sample_delay.as_millis()
            );
            println!("Poll interval:    {} ms", config.poll_interval.as_millis());
        }
        Commands::Enroll { id, name, replay } => enroll(&config, &id, &name, &replay).await?,
        Commands::Recognize {
            replay,
            session,
            attendance_log,
        } => recognize(&config, &replay, session, attendance_log).await?,
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open store {}", config.db_path.display()))
}

fn list(store: &dyn DescriptorStore) -> Result<()> {
    let descriptors = store.all()?;
    if descriptors.is_empty() {
        println!("No faces enrolled");
        return Ok(());
    }
    println!("{:<16} {:<24} {:<26}", "ID", "NAME", "UPDATED");
    for d in descriptors {
        println!(
            "{:<16} {:<24} {:<26}",
            d.identity_id,
            d.display_name,
            d.last_updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

async fn enroll(config: &Config, id: &str, name: &str, replay: &std::path::Path) -> Result<()> {
    let store = shared(open_store(config)?);
    let readiness = Readiness::new();
    let (feed, provider) = replay::load(replay, &readiness).await?;

    let enrollment = Enrollment::new(
        Arc::new(provider),
        Arc::new(feed),
        readiness,
        store,
        config.enrollment(),
    );

    let mut states = enrollment.subscribe();
    let progress = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if matches!(state, EnrollmentState::Capturing { .. }) {
                eprintln!("[{:>3.0}%] {}", state.progress(), state.message());
            }
        }
    });

    let capture = enrollment.start(id, name);
    tokio::pin!(capture);
    let outcome = tokio::select! {
        outcome = &mut capture => outcome,
        _ = tokio::signal::ctrl_c() => {
            enrollment.cancel();
            capture.await
        }
    };
    progress.abort();

    let Some(outcome) = outcome else {
        bail!("enrollment already in progress");
    };
    if !outcome.success {
        bail!("{}", outcome.message);
    }
    println!("{}", outcome.message);
    Ok(())
}

async fn recognize(
    config: &Config,
    replay: &std::path::Path,
    session: Option<String>,
    attendance_log: Option<PathBuf>,
) -> Result<()> {
    let store = shared(open_store(config)?);
    let readiness = Readiness::new();
    let (feed, provider) = replay::load(replay, &readiness).await?;
    let feed = Arc::new(feed);

    let sink: Option<Arc<dyn AttendanceSink>> = match attendance_log {
        Some(path) => Some(Arc::new(JsonlSink::new(path))),
        None => None,
    };
    if sink.is_some() && session.is_none() {
        tracing::warn!("--attendance-log without --session; nothing will be recorded");
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let dispatcher = tokio::spawn(Dispatcher::new(sink, Arc::new(TracingNotifier)).run(events_rx));

    let recognizer = Arc::new(Recognizer::new(
        Arc::new(provider),
        feed.clone(),
        readiness,
        store,
        config.recognition(),
        events_tx,
    ));
    if let Err(err) = recognizer.start(session) {
        let n = err.notification();
        bail!(
            "{}{}",
            n.message,
            n.description.map(|d| format!(": {d}")).unwrap_or_default()
        );
    }

    let run = tokio::spawn(Arc::clone(&recognizer).run());
    let mut poll = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if feed.is_exhausted() && !recognizer.is_processing() {
                    tracing::info!(frames = feed.frame_count(), "replay exhausted");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    recognizer.stop();
    run.await.context("recognition loop panicked")?;
    let session = recognizer.session();
    drop(recognizer);
    let stats = dispatcher.await.context("dispatcher panicked")?;

    println!(
        "Session {}: {} recognized, {} recorded, {} failed",
        session.session_id.as_deref().unwrap_or("-"),
        session.seen_identities.len(),
        stats.recorded,
        stats.failed
    );
    for m in session.recent_matches.iter().rev() {
        println!(
            "  {:<16} {:<24} {:>5.1}%  {}",
            m.matched.identity_id,
            m.matched.display_name,
            m.matched.confidence,
            m.recognized_at.format("%H:%M:%S")
        );
    }
    Ok(())
}
