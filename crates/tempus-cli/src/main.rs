//! `tempus` — admin binary for the Tempus temporal store.
//!
//! Deployment glue around the store: runs the schema bootstrap, exports
//! and applies the structural layout, and inspects table state (current,
//! as-of, history, timeline). Bootstrap runs on every invocation — it is
//! idempotent, and nothing here may touch the store before it completes.
//!
//! # Usage
//!
//! ```
//! tempus --db app.sqlite init
//! tempus --db app.sqlite export --output layout.json
//! tempus --db staging.sqlite apply layout.json
//! tempus --db app.sqlite as-of items --at 2024-03-01T12:00:00Z
//! ```

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tempus_core::{layout::Layout, store::TemporalStore as _};
use tempus_store_sqlite::SqliteTemporalStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tempus", about = "Admin tool for the Tempus temporal store")]
struct Cli {
  /// Path to the SQLite database file.
  #[arg(short, long, env = "TEMPUS_DB")]
  db: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the store-level schema objects (idempotent).
  Init,

  /// List the tracked tables.
  Tables,

  /// Print the tracked-table layout as JSON.
  Export {
    /// Write to FILE instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
  },

  /// Recreate tracked tables from an exported layout file.
  Apply {
    /// Layout JSON produced by `tempus export`.
    file: PathBuf,
  },

  /// Print the current state of a tracked table.
  Current { table: String },

  /// Print table state as it existed at an instant.
  AsOf {
    table: String,
    /// RFC 3339 timestamp, e.g. 2024-03-01T12:00:00Z.
    #[arg(long)]
    at: DateTime<Utc>,
  },

  /// Print the full version chain of one entity.
  History { table: String, id: String },

  /// Print the instants at which one entity changed.
  Timeline { table: String, id: String },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let store = SqliteTemporalStore::open(&cli.db)
    .await
    .with_context(|| format!("opening store at {}", cli.db.display()))?;
  store
    .ensure_schemas()
    .await
    .context("schema bootstrap failed; aborting")?;

  match cli.command {
    Command::Init => {
      // ensure_schemas already ran; nothing further to do.
      println!("schemas ready at {}", cli.db.display());
    }

    Command::Tables => {
      let layout = store.export_layout().await?;
      for table in &layout.tables {
        println!("{} ({} columns)", table.name, table.columns.len());
      }
    }

    Command::Export { output } => {
      let layout = store.export_layout().await?;
      let json = layout.to_json()?;
      match output {
        Some(path) => std::fs::write(&path, json)
          .with_context(|| format!("writing layout to {}", path.display()))?,
        None => println!("{json}"),
      }
    }

    Command::Apply { file } => {
      let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading layout file {}", file.display()))?;
      let layout = Layout::from_json(&raw).context("parsing layout file")?;
      store.apply_layout(&layout).await?;
      println!("applied {} tracked table(s)", layout.tables.len());
    }

    Command::Current { table } => {
      let versions = store.current(&table).await?;
      println!("{}", serde_json::to_string_pretty(&versions)?);
    }

    Command::AsOf { table, at } => {
      let versions = store.as_of(&table, at).await?;
      println!("{}", serde_json::to_string_pretty(&versions)?);
    }

    Command::History { table, id } => {
      let versions = store.history_of(&table, &id).await?;
      println!("{}", serde_json::to_string_pretty(&versions)?);
    }

    Command::Timeline { table, id } => {
      let instants = store.timeline(&table, &id).await?;
      for instant in instants {
        println!("{}", instant.to_rfc3339());
      }
    }
  }

  Ok(())
}
