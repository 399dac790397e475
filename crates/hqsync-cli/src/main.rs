//! hqsync command-line client
//!
//! Runs one client against a SQLite-backed durable store, performs a single
//! action, flushes pending saves and exits.
//!
//! ## Usage
//!
//! ```bash
//! hqsync teams --month 2025-01
//! hqsync hqs North
//! hqsync show --team North --hq Delhi
//! hqsync add --team North --hq Delhi --customer Acme --item Widget --qty 3 --value 120
//! hqsync delete --team North --hq Delhi INV-0190c5a2...
//! hqsync create-team East
//! hqsync create-hq East Kolkata
//! hqsync publish-summary
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hqsync_client::{LoopbackHub, SessionDeps, SqlitePersistence, SqliteStore, SyncClient, SyncConfig};
use hqsync_types::{HqRef, Month, Record, RecordDraft};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// File name of the durable store database, next to the local replica db.
const STORE_DB_FILE: &str = "store.sqlite";

#[derive(Parser, Debug)]
#[command(name = "hqsync")]
#[command(about = "Scoped record sync client")]
struct Args {
    /// Month to work on (YYYY-MM). Defaults to the current month.
    #[arg(short, long, value_parser = parse_month, global = true)]
    month: Option<Month>,

    /// Config file (RON). Defaults to the platform config dir.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Durable store database. Defaults to the platform data dir.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the month's teams
    Teams,
    /// List a team's HQs
    Hqs { team: String },
    /// Show the aggregated records of a selection
    Show {
        /// Team to select (repeatable)
        #[arg(long = "team", required = true)]
        teams: Vec<String>,
        /// HQ to select (repeatable, single team only)
        #[arg(long = "hq")]
        hqs: Vec<String>,
    },
    /// Add a record to one HQ
    Add {
        #[arg(long)]
        team: String,
        #[arg(long)]
        hq: String,
        #[arg(long)]
        customer: String,
        #[arg(long)]
        item: String,
        #[arg(long)]
        qty: i64,
        #[arg(long)]
        value: f64,
    },
    /// Delete one record by invoice number
    Delete {
        #[arg(long)]
        team: String,
        #[arg(long)]
        hq: String,
        invoice: String,
    },
    /// Add a team to the month
    CreateTeam { name: String },
    /// Create an HQ document under a team
    CreateHq { team: String, name: String },
    /// Write the month summary document
    PublishSummary,
}

fn parse_month(s: &str) -> std::result::Result<Month, String> {
    Month::parse(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.config.unwrap_or_else(SyncConfig::default_path);
    let config = SyncConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let local_db = config.local_db_path();
    let store_db = args.store.unwrap_or_else(|| local_db.with_file_name(STORE_DB_FILE));
    if let Some(parent) = store_db.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::open(&store_db).with_context(|| format!("opening {}", store_db.display()))?;
    let persistence =
        SqlitePersistence::open(&local_db).with_context(|| format!("opening {}", local_db.display()))?;

    let deps = SessionDeps::new(
        Arc::new(store),
        Arc::new(LoopbackHub::new()),
        Arc::new(persistence),
        config,
    );
    let month = args.month.unwrap_or_else(Month::current);
    let mut client = SyncClient::start(deps, month).await;

    let outcome = execute(&mut client, args.command).await;
    client.flush().await;
    client.shutdown().await;
    outcome
}

async fn execute(client: &mut SyncClient, command: Command) -> Result<()> {
    match command {
        Command::Teams => {
            for team in client.available_teams() {
                println!("{team}");
            }
        }
        Command::Hqs { team } => {
            if !client.catalog().has_team(&team) {
                bail!("unknown team {team}");
            }
            client.toggle_team(&team).await;
            for hq in client.available_hqs() {
                println!("{}", hq.name);
            }
        }
        Command::Show { teams, hqs } => {
            select(client, &teams, &hqs).await?;
            let records = client.data().to_vec();
            for record in &records {
                println!("{}", format_record(record));
            }
            let quality = client.quality();
            if quality.mistagged > 0 || quality.duplicates > 0 {
                tracing::warn!(
                    "{} mistagged, {} duplicate records in view",
                    quality.mistagged,
                    quality.duplicates
                );
            }
            eprintln!("{} records", records.len());
        }
        Command::Add {
            team,
            hq,
            customer,
            item,
            qty,
            value,
        } => {
            select(client, &[team], &[hq]).await?;
            let record = client.add_record(RecordDraft::new(customer, item, qty, value))?;
            println!("{}", record.invoice_no().unwrap_or_default());
        }
        Command::Delete { team, hq, invoice } => {
            select(client, &[team.clone()], &[hq.clone()]).await?;
            let removed = client.delete_invoice(&HqRef::new(team, hq), &invoice)?;
            println!("deleted {}", format_record(&removed));
        }
        Command::CreateTeam { name } => {
            client.create_team(&name).await?;
            println!("created team {name}");
        }
        Command::CreateHq { team, name } => {
            let placeholder = client.create_hq(&team, &name).await?;
            println!("created HQ {team}/{name} ({})", placeholder.invoice_no().unwrap_or_default());
        }
        Command::PublishSummary => {
            let outcome = client.publish_month_summary().await?;
            if outcome.included {
                println!("published {} records ({} bytes)", outcome.records, outcome.bytes);
            } else {
                println!(
                    "published metadata only: {} records would need {} bytes",
                    outcome.records, outcome.bytes
                );
            }
        }
    }
    Ok(())
}

async fn select(client: &mut SyncClient, teams: &[String], hqs: &[String]) -> Result<()> {
    for team in teams {
        if !client.catalog().has_team(team) {
            bail!("unknown team {team}");
        }
        client.toggle_team(team).await;
    }
    if hqs.is_empty() {
        return Ok(());
    }
    let [team] = teams else {
        bail!("--hq needs exactly one --team");
    };
    for hq in hqs {
        let hq = HqRef::new(team.as_str(), hq.as_str());
        if !client.catalog().has_hq(&hq) {
            bail!("unknown HQ {hq}");
        }
        client.toggle_hq(&hq).await;
    }
    Ok(())
}

fn format_record(record: &Record) -> String {
    let field = |name: &str| match record.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    };
    format!(
        "{}\t{}/{}\t{}\t{}\t{}\t{}",
        field("invoice_no"),
        field("sales_team"),
        field("hq"),
        field("customer"),
        field("item_name"),
        field("qty"),
        field("value"),
    )
}
