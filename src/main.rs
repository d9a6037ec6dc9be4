mod config;
mod csv;
mod db;
mod dispatch;
mod error;
mod model;
mod parser;
mod provider;
mod roster;
mod scraper;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Settings;
use crate::db::{SqliteStore, StateStore};
use crate::dispatch::runner::{self, Control, RunEnd};
use crate::dispatch::{Dispatcher, Phase, RunPlan, Step};
use crate::model::{Batching, Pacing, Rotation};
use crate::provider::{BridgeProvider, PageProvider, ReplayProvider};
use crate::roster::Roster;
use crate::scraper::Scraper;

#[derive(Parser)]
#[command(name = "bulk_messenger", about = "Group member scraper and paced bulk sender")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scroll the member list and collect contacts until the end (Ctrl-C stops)
    Scrape {
        /// Replay saved snapshot files instead of talking to the bridge
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Collect whatever is visible right now, without scrolling
    Snapshot {
        #[arg(long)]
        replay: Option<PathBuf>,
    },
    /// Show collected contacts
    Contacts {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Write collected contacts to CSV
    ExportContacts {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Use unsaved contacts with a known number as the send list
    Promote,
    /// Load the send list from a .csv, .tsv or .txt file (Name, Company, Phone)
    Import { file: PathBuf },
    /// Write the send list to CSV
    ExportTargets {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Start sending to the current send list (Ctrl-C pauses, SIGTERM stops)
    Send {
        /// Message template; [Name] and [Company] are filled per contact
        #[arg(short, long = "template", required = true)]
        templates: Vec<String>,
        /// Min delay between messages in seconds
        #[arg(long, default_value = "5")]
        min: u64,
        /// Max delay between messages in seconds
        #[arg(long, default_value = "15")]
        max: u64,
        #[arg(long, value_enum, default_value_t = Rotation::Random)]
        rotation: Rotation,
        /// Take a break after this many sent messages
        #[arg(long)]
        break_after: Option<u32>,
        /// Break length in seconds
        #[arg(long, default_value = "60")]
        break_secs: u64,
    },
    /// Continue a paused or interrupted run
    Resume,
    /// Abort the saved run, keeping its results. A live `send` stops before its next message
    Stop,
    /// Show run progress and counters
    Status,
    /// Write run results to CSV
    ExportResults {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Forget contacts, send list and run state
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let result = match cli.command {
        Commands::Scrape { replay } => {
            let store = open_store(&settings)?;
            let provider = open_provider(&settings, replay.as_deref())?;
            let mut scraper = Scraper::new(provider, store, settings.scrape_settle())?;

            let handle = scraper.handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.stop();
                }
            });

            let pb = ProgressBar::new_spinner();
            pb.enable_steady_tick(Duration::from_millis(120));
            let stats = scraper
                .run(|stats, roster| {
                    let s = roster.summary();
                    pb.set_message(format!(
                        "pass {} | {} contacts ({} admins, {} unsaved)",
                        stats.passes, s.total, s.admins, s.unsaved
                    ));
                })
                .await;
            pb.finish_and_clear();
            let stats = stats?;

            let reason = if stats.end_reached { "end of list" } else { "stopped" };
            println!(
                "Scraped {} passes ({}): {} new, {} updated, {} total.",
                stats.passes, reason, stats.added, stats.upgraded, stats.total
            );
            Ok(())
        }
        Commands::Snapshot { replay } => {
            let store = open_store(&settings)?;
            let provider = open_provider(&settings, replay.as_deref())?;
            let mut scraper = Scraper::new(provider, store, settings.scrape_settle())?;
            let merged = scraper.capture_once().await?;
            if !merged.changed() {
                println!("Nothing new on screen.");
            }
            println!(
                "Added {} new. Total: {}",
                merged.added,
                scraper.roster().len()
            );
            Ok(())
        }
        Commands::Contacts { limit } => {
            let store = open_store(&settings)?;
            let roster = Roster::from_records(store.load_roster()?);
            if roster.is_empty() {
                println!("No contacts yet. Run 'scrape' first.");
                return Ok(());
            }

            println!(
                "{:>4} | {:<24} | {:<8} | {:<16} | {:<30}",
                "#", "Name", "Status", "Phone", "About"
            );
            println!("{}", "-".repeat(94));
            for (i, c) in roster.records().iter().take(limit).enumerate() {
                println!(
                    "{:>4} | {:<24} | {:<8} | {:<16} | {:<30}",
                    i + 1,
                    truncate(&c.name, 24),
                    c.status_label(),
                    c.phone.as_str(),
                    truncate(&c.about, 30)
                );
            }

            let s = roster.summary();
            println!(
                "\n{} contacts | {} admins | {} unsaved",
                s.total, s.admins, s.unsaved
            );
            Ok(())
        }
        Commands::ExportContacts { output } => {
            let store = open_store(&settings)?;
            let contacts = store.load_roster()?;
            if contacts.is_empty() {
                bail!("No contacts to export");
            }
            write_file(&output, &csv::contacts_csv(&contacts))?;
            println!("Exported {} contacts to {}", contacts.len(), output.display());
            Ok(())
        }
        Commands::Promote => {
            let store = open_store(&settings)?;
            let targets = Roster::from_records(store.load_roster()?).promote();
            if targets.is_empty() {
                bail!("No unsaved contacts with phone numbers to transfer");
            }
            store.save_targets(&targets)?;
            println!("Transferred {} contacts for sending", targets.len());
            Ok(())
        }
        Commands::Import { file } => {
            let Some(delimiter) = csv::delimiter_for(&file) else {
                bail!("Unsupported file type: {} (use .csv, .tsv or .txt)", file.display());
            };
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let targets = csv::parse_targets(&text, delimiter);
            let store = open_store(&settings)?;
            store.save_targets(&targets)?;
            println!("Loaded {} contacts", targets.len());
            Ok(())
        }
        Commands::ExportTargets { output } => {
            let store = open_store(&settings)?;
            let targets = store.load_targets()?;
            write_file(&output, &csv::targets_csv(&targets))?;
            println!("Exported {} contacts to {}", targets.len(), output.display());
            Ok(())
        }
        Commands::Send {
            templates,
            min,
            max,
            rotation,
            break_after,
            break_secs,
        } => {
            let store = open_store(&settings)?;
            let targets = store.load_targets()?;
            let batching = match break_after {
                Some(n) => Batching {
                    enabled: true,
                    break_after: n,
                    break_seconds: break_secs,
                },
                None => Batching::default(),
            };
            let plan = RunPlan {
                targets,
                templates,
                pacing: Pacing {
                    min_seconds: min,
                    max_seconds: max,
                },
                rotation,
                batching,
            };

            let mut d = dispatcher(&settings, store)?;
            d.start(plan)?;
            run_dispatch(&mut d).await
        }
        Commands::Resume => {
            let mut d = dispatcher(&settings, open_store(&settings)?)?;
            match d.restore()? {
                Phase::Running => {}
                Phase::Paused => d.resume()?,
                Phase::Idle | Phase::Completed => {
                    println!("No active run to resume. {}", d.state().progress_text());
                    return Ok(());
                }
            }
            run_dispatch(&mut d).await
        }
        Commands::Stop => {
            let mut d = dispatcher(&settings, open_store(&settings)?)?;
            d.restore()?;
            d.stop()?;
            println!(
                "Stopped at {} of {}",
                d.state().cursor,
                d.state().targets.len()
            );
            Ok(())
        }
        Commands::Status => {
            let store = open_store(&settings)?;
            let Some(state) = store.load_run()? else {
                println!("No run recorded.");
                return Ok(());
            };
            let phase = if state.running && state.paused {
                "paused"
            } else if state.running {
                "running"
            } else {
                "idle"
            };
            println!("State:     {}", phase);
            println!("Progress:  {}", state.progress_text());
            println!("Cursor:    {} / {}", state.cursor, state.targets.len());
            println!("Remaining: {}", state.remaining());
            println!("Processed: {}", state.stats.total());
            println!("Sent:      {}", state.stats.sent);
            println!("Failed:    {}", state.stats.failed);
            println!("Invalid:   {}", state.stats.invalid);
            println!("Not found: {}", state.stats.not_found);
            Ok(())
        }
        Commands::ExportResults { output } => {
            let store = open_store(&settings)?;
            let results = store.load_run()?.map(|s| s.results).unwrap_or_default();
            if results.is_empty() {
                bail!("No results to export");
            }
            write_file(&output, &csv::results_csv(&results))?;
            println!("Exported {} results to {}", results.len(), output.display());
            Ok(())
        }
        Commands::Clear => {
            open_store(&settings)?.clear()?;
            println!("Cleared contacts, send list and run state.");
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_store(settings: &Settings) -> anyhow::Result<SqliteStore> {
    SqliteStore::connect(&settings.db_path)
        .with_context(|| format!("Failed to open {}", settings.db_path.display()))
}

fn open_provider(settings: &Settings, replay: Option<&Path>) -> anyhow::Result<Box<dyn PageProvider>> {
    Ok(match replay {
        Some(dir) => Box::new(ReplayProvider::open(dir)?),
        None => Box::new(BridgeProvider::new(
            &settings.bridge_url,
            settings.bridge_timeout(),
        )?),
    })
}

fn dispatcher(
    settings: &Settings,
    store: SqliteStore,
) -> anyhow::Result<Dispatcher<Box<dyn PageProvider>, SqliteStore, StdRng>> {
    let provider = open_provider(settings, None)?;
    Ok(Dispatcher::new(provider, store, StdRng::from_entropy())
        .with_failure_delay(settings.failure_delay()))
}

async fn run_dispatch<P, S, R>(d: &mut Dispatcher<P, S, R>) -> anyhow::Result<()>
where
    P: PageProvider,
    S: StateStore,
    R: Rng,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    watch_signals(tx)?;

    let pb = ProgressBar::new(d.state().targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_position(d.state().cursor as u64);

    let end = runner::drive(d, &mut rx, |step, state| {
        pb.set_position(state.cursor as u64);
        match step {
            Step::Break(delay) => {
                pb.set_message(format!("Taking a break for {} seconds...", delay.as_secs()))
            }
            _ => pb.set_message(state.progress_text()),
        }
    })
    .await;
    pb.finish_and_clear();

    match end? {
        RunEnd::Completed(stats) => println!(
            "Completed! Sent: {}, Failed: {}",
            stats.sent,
            stats.unsuccessful()
        ),
        RunEnd::Paused => println!(
            "Paused at {} of {}. Run 'resume' to continue.",
            d.state().cursor,
            d.state().targets.len()
        ),
        RunEnd::Stopped => println!("Sending stopped. {}", d.state().progress_text()),
    }
    Ok(())
}

/// Ctrl-C pauses the run (continue it with `resume`); SIGTERM stops it.
fn watch_signals(tx: mpsc::UnboundedSender<Control>) -> anyhow::Result<()> {
    let pause_tx = tx.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received Ctrl+C, pausing");
            let _ = pause_tx.send(Control::Pause);
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::spawn(async move {
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM, stopping");
                let _ = tx.send(Control::Stop);
            }
        });
    }

    Ok(())
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
