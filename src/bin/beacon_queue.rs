//! Operator tool for a node's persisted outbound queue.
//!
//! Commands:
//! - `stats [--json]` - pending entries per priority and dead-letter count
//! - `list` - pending entries in draw order
//! - `dead-letters` - entries that will not be retried, newest first
//! - `enqueue --priority <p> --channel <c> --text <t>` - queue an entry by hand
//! - `encode-sms ...` / `decode-sms <text>` - work with `BCN|` status bodies
use anyhow::{anyhow, Context, Result};
use beacon_link::channel::ChannelPreference;
use beacon_link::queue::{OutboundQueue, Priority, QueueEntry, QueuePayload, QueueStore};
use beacon_link::sms::{self, SmsPayload, StatusCode};
use beacon_link::{BeaconConfig, SystemClock};
use chrono::{DateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beacon-queue")]
#[command(about = "Inspect and edit a beacon node's outbound queue")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Node configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Queue database; overrides `queue.database_path` from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue statistics
    Stats {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// List pending entries in the order they will be sent
    List,
    /// List dead-lettered entries
    DeadLetters,
    /// Queue a text entry
    Enqueue {
        /// panic, status, check-in, message or telemetry
        #[arg(short, long, default_value = "message")]
        priority: String,
        /// any, data, mesh, sms or satellite
        #[arg(long, default_value = "any")]
        channel: String,
        #[arg(short, long)]
        text: String,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Render a status SMS body
    EncodeSms {
        #[arg(long)]
        id: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// OK, MV, NA, UR, DT or MED
        #[arg(long, default_value = "OK")]
        status: String,
        /// Unix seconds; defaults to now
        #[arg(long, allow_hyphen_values = true)]
        timestamp: Option<i64>,
    },
    /// Parse a status SMS body
    DecodeSms { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::EncodeSms {
            id,
            lat,
            lon,
            status,
            timestamp,
        } => encode_sms(id, lat, lon, &status, timestamp),
        Commands::DecodeSms { text } => decode_sms(&text),
        command => {
            let config = load_config(cli.config.as_ref())?;
            let queue = open_queue(&config, cli.db).await?;
            let result = run_queue_command(&queue, command).await;
            queue.close().await;
            result
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BeaconConfig> {
    match path {
        Some(path) => BeaconConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(BeaconConfig::default()),
    }
}

async fn open_queue(config: &BeaconConfig, db: Option<PathBuf>) -> Result<OutboundQueue> {
    let path = db
        .or_else(|| config.queue.database_path.clone())
        .ok_or_else(|| anyhow!("no queue database given (use --db or queue.database_path)"))?;

    let store = QueueStore::open(&path)
        .await
        .with_context(|| format!("failed to open queue database {}", path.display()))?;
    let queue = OutboundQueue::open(store, config.queue.queue_config(), Arc::new(SystemClock)).await?;
    Ok(queue)
}

async fn run_queue_command(queue: &OutboundQueue, command: Commands) -> Result<()> {
    match command {
        Commands::Stats { json } => {
            let stats = queue.stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Pending entries:  {}", stats.total_pending());
            for priority in Priority::ALL {
                println!("  {:<10} {}", priority.as_str(), stats.pending(priority));
            }
            println!("Dead letters:     {}", stats.dead_letters);
        }

        Commands::List => {
            let entries = queue.next_batch().await;
            if entries.is_empty() {
                println!("Queue is empty");
            }
            for entry in &entries {
                print_entry(entry);
            }
        }

        Commands::DeadLetters => {
            let dead = queue.dead_letters().await?;
            if dead.is_empty() {
                println!("No dead letters");
            }
            for letter in &dead {
                println!(
                    "{}  {}  {:<9} attempts {}/{}  {}",
                    format_millis(letter.dead_at),
                    letter.entry.id,
                    letter.entry.priority.as_str(),
                    letter.entry.attempts,
                    letter.entry.max_attempts,
                    letter.reason
                );
            }
        }

        Commands::Enqueue {
            priority,
            channel,
            text,
            max_attempts,
        } => {
            let priority: Priority = priority.parse()?;
            let channel: ChannelPreference = channel.parse()?;

            let receipt = queue.enqueue(priority, text, channel, max_attempts).await?;
            if receipt.is_queued() {
                println!("Queued {} ({} via {})", receipt.entry.id, priority, channel);
            } else {
                println!("Queue full: {} was not kept", receipt.entry.id);
            }
            if let Some(evicted) = receipt.evicted.filter(|dead| dead.entry.id != receipt.entry.id) {
                println!("Evicted {} ({})", evicted.entry.id, evicted.entry.priority);
            }
        }

        Commands::EncodeSms { .. } | Commands::DecodeSms { .. } => {}
    }
    Ok(())
}

fn print_entry(entry: &QueueEntry) {
    let payload = match &entry.payload {
        QueuePayload::Text(text) => text.clone(),
        QueuePayload::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
    };
    println!(
        "{}  {:<9} {:<9} attempts {}/{}  {}  {}",
        entry.id,
        entry.priority.as_str(),
        entry.channel.as_str(),
        entry.attempts,
        entry.max_attempts,
        format_millis(entry.created_at),
        payload
    );
    if let Some(error) = entry.last_error() {
        println!("    last error: {}", error);
    }
}

fn encode_sms(id: String, lat: f64, lon: f64, status: &str, timestamp: Option<i64>) -> Result<()> {
    let status: StatusCode = status.parse()?;
    let timestamp = match timestamp {
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| anyhow!("timestamp {} is out of range", secs))?,
        None => Utc::now(),
    };

    let body = sms::encode(&SmsPayload::new(id, lat, lon, status, timestamp))?;
    println!("{}", body);
    Ok(())
}

fn decode_sms(text: &str) -> Result<()> {
    let payload = sms::decode(text)?;
    println!("Student:   {}", payload.student_id);
    println!("Position:  {}, {}", payload.latitude, payload.longitude);
    println!(
        "Status:    {}{}",
        payload.status,
        if payload.status.is_distress() { " (distress)" } else { "" }
    );
    println!("Time:      {}", payload.timestamp.to_rfc3339());
    Ok(())
}

fn format_millis(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
