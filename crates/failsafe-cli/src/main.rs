//! Failsafe CLI
//!
//! The `failsafe` command inspects and clears the snapshots that failed
//! runs leave in a state directory.
//!
//! ## Commands
//!
//! - `list`: Show every stored snapshot
//! - `show`: Print one snapshot with its decoded values
//! - `clear`: Remove snapshots by key, by label, or all of them
//! - `config`: Print the resolved configuration

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use failsafe_core::{Codec, FailSafeConfig, JsonCodec, DEFAULT_LABEL};
use failsafe_state::{LocalStorage, SnapshotKey, StorageBackend};
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "failsafe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and clear fail-safe snapshots", long_about = None)]
struct Cli {
    /// State directory holding snapshot files
    #[arg(long, global = true, env = "FAILSAFE_STATE_DIR")]
    dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored snapshots
    List,

    /// Show one snapshot and its values
    Show {
        /// Snapshot key, e.g. savedstate.e0d922eb61462f5d
        key: String,
    },

    /// Remove snapshots
    Clear {
        /// Snapshot key to remove
        #[arg(
            conflicts_with_all = ["label", "all"],
            required_unless_present_any = ["label", "all"]
        )]
        key: Option<String>,

        /// Remove every snapshot stored under this label
        #[arg(long, conflicts_with = "all")]
        label: Option<String>,

        /// Remove every snapshot in the state directory
        #[arg(long)]
        all: bool,
    },

    /// Print the resolved configuration
    Config,
}

/// What `clear` removes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ClearTarget {
    Key(String),
    Label(String),
    All,
}

impl ClearTarget {
    fn from_args(key: Option<String>, label: Option<String>, all: bool) -> Result<Self> {
        match (key, label, all) {
            (Some(key), None, false) => Ok(ClearTarget::Key(key)),
            (None, Some(label), false) => Ok(ClearTarget::Label(label)),
            (None, None, true) => Ok(ClearTarget::All),
            _ => anyhow::bail!("pass exactly one of <KEY>, --label or --all"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    failsafe_core::init_tracing(cli.json, level);

    let mut config = FailSafeConfig::from_env();
    if let Some(dir) = cli.dir {
        config = config.with_state_dir(dir);
    }
    debug!(state_dir = %config.state_dir.display(), "resolved configuration");

    let stdout = io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::List => cmd_list(&open_storage(&config)?, &mut out),
        Commands::Show { key } => cmd_show(&open_storage(&config)?, &key, &mut out),
        Commands::Clear { key, label, all } => {
            let target = ClearTarget::from_args(key, label, all)?;
            cmd_clear(&open_storage(&config)?, &target, &mut out)
        }
        Commands::Config => cmd_config(&config, &mut out),
    }
}

fn open_storage(config: &FailSafeConfig) -> Result<LocalStorage> {
    LocalStorage::new(&config.state_dir).with_context(|| {
        format!(
            "Failed to open state directory {}",
            config.state_dir.display()
        )
    })
}

fn parse_key(key: &str) -> Result<SnapshotKey> {
    key.parse()
        .with_context(|| format!("Invalid snapshot key '{}'", key))
}

fn cmd_list(storage: &dyn StorageBackend, out: &mut impl Write) -> Result<()> {
    let keys = storage.list().context("Failed to list snapshots")?;

    if keys.is_empty() {
        writeln!(out, "No snapshots found")?;
        return Ok(());
    }

    for key in keys {
        match storage.load(&key) {
            Ok(snapshot) => writeln!(
                out,
                "{}  {}  {}  [{}]",
                key,
                key.label(),
                snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                snapshot.names.join(", ")
            )?,
            Err(e) => writeln!(out, "{}  {}  <corrupt: {}>", key, key.label(), e)?,
        }
    }

    Ok(())
}

fn cmd_show(storage: &dyn StorageBackend, key: &str, out: &mut impl Write) -> Result<()> {
    let key = parse_key(key)?;
    let snapshot = storage
        .load(&key)
        .with_context(|| format!("Failed to load snapshot {}", key))?;

    writeln!(out, "key      {}", snapshot.key)?;
    writeln!(out, "label    {}", snapshot.key.label())?;
    writeln!(out, "codec    {}", snapshot.codec)?;
    writeln!(
        out,
        "created  {}",
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(out, "names    [{}]", snapshot.names.join(", "))?;
    writeln!(out)?;

    let codec = JsonCodec::pretty();
    let ordered = snapshot.names.iter().chain(
        snapshot
            .values
            .keys()
            .filter(|name| !snapshot.names.contains(name)),
    );
    for name in ordered {
        let Some(encoded) = snapshot.values.get(name) else {
            writeln!(out, "{} = <not captured>", name)?;
            continue;
        };
        let decoded = if snapshot.codec == codec.name() {
            codec.decode(encoded.as_bytes()).ok()
        } else {
            None
        };
        match decoded {
            Some(value) => writeln!(out, "{} = {}", name, serde_json::to_string_pretty(&value)?)?,
            None => writeln!(out, "{} = 0x{}", name, hex::encode(encoded.as_bytes()))?,
        }
    }

    Ok(())
}

fn cmd_clear(storage: &dyn StorageBackend, target: &ClearTarget, out: &mut impl Write) -> Result<()> {
    let keys = match target {
        ClearTarget::Key(key) => {
            let key = parse_key(key)?;
            if storage.exists(&key)? {
                vec![key]
            } else {
                Vec::new()
            }
        }
        ClearTarget::Label(label) => storage
            .list()?
            .into_iter()
            .filter(|key| key.label() == label)
            .collect(),
        ClearTarget::All => storage.list()?,
    };

    for key in &keys {
        storage
            .clear(key)
            .with_context(|| format!("Failed to clear snapshot {}", key))?;
        debug!(key = %key, "snapshot cleared");
    }

    writeln!(out, "Cleared {} snapshot(s)", keys.len())?;
    Ok(())
}

fn cmd_config(config: &FailSafeConfig, out: &mut impl Write) -> Result<()> {
    writeln!(out, "state_dir  {}", config.state_dir.display())?;
    writeln!(
        out,
        "label      {}",
        config.label.as_deref().unwrap_or(DEFAULT_LABEL)
    )?;
    writeln!(out, "pretty     {}", config.pretty)?;
    Ok(())
}
