//! sortq CLI — operator interface to the sorter engine.

use clap::{Args, Parser, Subcommand};
use sortq::config::Config;
use sortq::engine::Engine;
use sortq::model::{
    ClaimRequest, DEFAULT_LINES_PER_CLAIM, HistoryEntry, Identity, LineId, Role, SettingsPatch,
};
use sortq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "sortq", about = "Team line queue with dedup and batch claims")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Identity context for the operation. Authentication happens upstream;
/// the CLI trusts what it is told.
#[derive(Args)]
struct IdentityArgs {
    /// Team the operation is scoped to
    #[arg(long)]
    team: String,
    /// Acting user id
    #[arg(long)]
    user: String,
    /// Display name recorded on claims (defaults to the user id)
    #[arg(long)]
    name: Option<String>,
    /// Caller role: admin or member
    #[arg(long, default_value = "member")]
    role: Role,
}

impl IdentityArgs {
    fn into_identity(self) -> Identity {
        Identity::new(self.team, self.user, self.name.unwrap_or_default(), self.role)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Claim a batch of lines from the queue into history
    Claim {
        #[command(flatten)]
        identity: IdentityArgs,
        /// How many lines to claim (team settings cap this further)
        #[arg(long, default_value_t = DEFAULT_LINES_PER_CLAIM)]
        count: u32,
    },
    /// Claim history operations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Team claim policy
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Show engine events
    Events {
        /// Only events after this sequence number
        #[arg(long, default_value_t = 0)]
        since: u64,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Submit lines to the queue (reads stdin when no lines are given)
    Add {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Lines to queue, one per argument
        lines: Vec<String>,
    },
    /// Preview the dedup filter without queueing anything
    Dedupe {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Candidate lines, one per argument
        lines: Vec<String>,
    },
    /// List the team's queue, newest first
    List {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Remove a queued line (full UUID or prefix)
    Remove {
        #[command(flatten)]
        identity: IdentityArgs,
        id: String,
    },
    /// Remove every queued line for the team (admin)
    Clear {
        #[command(flatten)]
        identity: IdentityArgs,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List claimed lines, newest first
    List {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Maximum entries to show
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Search claimed lines by content substring
    Search {
        #[command(flatten)]
        identity: IdentityArgs,
        query: String,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show the team's effective claim policy
    Show {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Update the claim policy (admin)
    Set {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Lines handed out per claim, 1..=15
        #[arg(long)]
        lines_per_claim: Option<u32>,
        /// Minutes between one user's claims, 1..=1440
        #[arg(long)]
        cooldown_minutes: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_telemetry(TelemetryConfig {
        log_level: config.log_level.clone(),
    })?;

    let engine = Engine::open(&config.db_path)?;

    match cli.command {
        Command::Queue { action } => match action {
            QueueAction::Add { identity, lines } => {
                let input = read_input(lines)?;
                cmd_queue_add(&engine, &identity.into_identity(), &input)
            }
            QueueAction::Dedupe { identity, lines } => {
                let input = read_input(lines)?;
                cmd_queue_dedupe(&engine, &identity.into_identity(), &input)
            }
            QueueAction::List { identity } => cmd_queue_list(&engine, &identity.into_identity()),
            QueueAction::Remove { identity, id } => {
                cmd_queue_remove(&engine, &identity.into_identity(), &id)
            }
            QueueAction::Clear { identity } => cmd_queue_clear(&engine, &identity.into_identity()),
        },
        Command::Claim { identity, count } => cmd_claim(&engine, &identity.into_identity(), count),
        Command::History { action } => match action {
            HistoryAction::List { identity, limit } => {
                cmd_history_list(&engine, &identity.into_identity(), limit)
            }
            HistoryAction::Search { identity, query } => {
                cmd_history_search(&engine, &identity.into_identity(), &query)
            }
        },
        Command::Settings { action } => match action {
            SettingsAction::Show { identity } => {
                cmd_settings_show(&engine, &identity.into_identity())
            }
            SettingsAction::Set {
                identity,
                lines_per_claim,
                cooldown_minutes,
            } => cmd_settings_set(
                &engine,
                &identity.into_identity(),
                lines_per_claim,
                cooldown_minutes,
            ),
        },
        Command::Events { since } => cmd_events(&engine, since),
    }
}

/// Joined argument lines, or all of stdin when none were given.
fn read_input(lines: Vec<String>) -> anyhow::Result<String> {
    if lines.is_empty() {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(lines.join("\n"))
    }
}

fn cmd_queue_add(engine: &Engine, identity: &Identity, input: &str) -> anyhow::Result<()> {
    let outcome = engine.enqueue(identity, input)?;
    println!(
        "Queued {} line(s), {} duplicate(s) dropped",
        outcome.added.len(),
        outcome.duplicates()
    );
    Ok(())
}

fn cmd_queue_dedupe(engine: &Engine, identity: &Identity, input: &str) -> anyhow::Result<()> {
    let report = engine.preview(identity, input)?;

    if report.submitted == 0 {
        println!("No lines entered.");
        return Ok(());
    }
    if report.unique.is_empty() {
        println!("All {} line(s) already exist.", report.submitted);
        return Ok(());
    }

    for line in &report.unique {
        println!("{line}");
    }
    println!(
        "\n{} of {} line(s) would be queued",
        report.unique.len(),
        report.submitted
    );
    Ok(())
}

fn cmd_queue_list(engine: &Engine, identity: &Identity) -> anyhow::Result<()> {
    let lines = engine.list_queue(identity)?;

    if lines.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    // Header
    println!("{:<8}  {:<12}  {:<16}  CONTENT", "ID", "ADDED_BY", "ADDED");
    println!("{}", "-".repeat(100));

    for line in &lines {
        println!(
            "{:<8}  {:<12}  {:<16}  {}",
            line.id,
            truncate(line.added_by.as_str(), 12),
            line.added_at.format("%Y-%m-%d %H:%M"),
            truncate(&line.content, 60)
        );
    }

    println!("\n{} line(s) queued", lines.len());
    Ok(())
}

fn cmd_queue_remove(engine: &Engine, identity: &Identity, id_str: &str) -> anyhow::Result<()> {
    // Support prefix matching — find the queued line whose ID starts with the given string
    let id = if id_str.len() < 36 {
        let lines = engine.list_queue(identity)?;
        let matches: Vec<_> = lines
            .iter()
            .filter(|line| line.id.0.to_string().starts_with(id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no queued line matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} queued lines match prefix '{id_str}' — be more specific"),
        }
    } else {
        LineId(uuid::Uuid::parse_str(id_str)?)
    };

    engine.remove_line(identity, id)?;
    println!("Removed {id}");
    Ok(())
}

fn cmd_queue_clear(engine: &Engine, identity: &Identity) -> anyhow::Result<()> {
    let removed = engine.clear_queue(identity)?;
    println!("Cleared {removed} line(s)");
    Ok(())
}

fn cmd_claim(engine: &Engine, identity: &Identity, count: u32) -> anyhow::Result<()> {
    let outcome = engine.claim(identity, ClaimRequest::new(count))?;

    println!("Claimed {} line(s):", outcome.claimed_count);
    for entry in &outcome.lines {
        println!("  {}", entry.content);
    }
    Ok(())
}

fn cmd_history_list(
    engine: &Engine,
    identity: &Identity,
    limit: Option<u32>,
) -> anyhow::Result<()> {
    let entries = engine.list_history(identity, limit)?;
    print_history(&entries, "No claimed lines yet.")
}

fn cmd_history_search(engine: &Engine, identity: &Identity, query: &str) -> anyhow::Result<()> {
    let entries = engine.search_history(identity, query)?;
    print_history(&entries, "No matching entries found.")
}

fn print_history(entries: &[HistoryEntry], empty_msg: &str) -> anyhow::Result<()> {
    if entries.is_empty() {
        println!("{empty_msg}");
        return Ok(());
    }

    println!(
        "{:<8}  {:<16}  {:<16}  CONTENT",
        "ID", "CLAIMED_BY", "CLAIMED"
    );
    println!("{}", "-".repeat(100));

    for entry in entries {
        println!(
            "{:<8}  {:<16}  {:<16}  {}",
            entry.id,
            truncate(&entry.claimed_by_name, 16),
            entry.claimed_at.format("%Y-%m-%d %H:%M"),
            truncate(&entry.content, 60)
        );
    }

    println!("\n{} entr(ies)", entries.len());
    Ok(())
}

fn cmd_settings_show(engine: &Engine, identity: &Identity) -> anyhow::Result<()> {
    let settings = engine.get_settings(identity)?;

    println!("Team:              {}", settings.team_id);
    println!("Lines per claim:   {}", settings.lines_per_claim);
    println!("Cooldown minutes:  {}", settings.cooldown_minutes);
    println!("Updated:           {}", settings.updated_at);
    Ok(())
}

fn cmd_settings_set(
    engine: &Engine,
    identity: &Identity,
    lines_per_claim: Option<u32>,
    cooldown_minutes: Option<u32>,
) -> anyhow::Result<()> {
    let patch = SettingsPatch {
        lines_per_claim,
        cooldown_minutes,
    };
    if patch.is_empty() {
        anyhow::bail!("nothing to update: provide --lines-per-claim or --cooldown-minutes");
    }

    let settings = engine.update_settings(identity, patch)?;
    println!(
        "Settings updated: {} line(s) per claim, {} minute cooldown",
        settings.lines_per_claim, settings.cooldown_minutes
    );
    Ok(())
}

fn cmd_events(engine: &Engine, since: u64) -> anyhow::Result<()> {
    let events = engine.get_events_since(since)?;

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    for event in &events {
        println!(
            "{:<6}  {}  {}",
            event.seq,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            serde_json::to_string(&event.kind)?
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s.to_string()
    }
}
