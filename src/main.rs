//! formsheet — sync a form-submission store with a spreadsheet mirror.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use formsheet::config::Config;
use formsheet::sync::{SyncCounts, Syncer};

#[derive(Parser)]
#[command(name = "formsheet", version, about = "Two-way sync between a form API and a spreadsheet mirror")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store connection settings in the config file
    Setup {
        /// Form API key
        #[arg(long)]
        api_key: Option<String>,
        /// Form ID
        #[arg(long)]
        form_id: Option<String>,
        /// Path to the spreadsheet mirror file
        #[arg(long)]
        sheet_path: Option<String>,
    },
    /// Sync remote entries into the spreadsheet mirror
    Pull {
        /// Path to the spreadsheet mirror file (overrides config)
        #[arg(long)]
        sheet_path: Option<String>,
    },
    /// Sync spreadsheet changes to the remote store
    Push {
        /// Path to the spreadsheet mirror file (overrides config)
        #[arg(long)]
        sheet_path: Option<String>,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Show sync status for both sides
    Status {
        /// Path to the spreadsheet mirror file (overrides config)
        #[arg(long)]
        sheet_path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("formsheet=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Command::Setup {
            api_key,
            form_id,
            sheet_path,
        } => setup(&mut config, api_key, form_id, sheet_path),
        Command::Pull { sheet_path } => {
            override_sheet_path(&mut config, sheet_path)?;
            pull(&config).await
        }
        Command::Push { sheet_path, yes } => {
            override_sheet_path(&mut config, sheet_path)?;
            push(&config, yes).await
        }
        Command::Status { sheet_path } => {
            override_sheet_path(&mut config, sheet_path)?;
            status(&config).await
        }
    }
}

fn override_sheet_path(config: &mut Config, sheet_path: Option<String>) -> Result<()> {
    if let Some(path) = sheet_path {
        config.sheet.path = path;
        config.save()?;
    }
    Ok(())
}

fn setup(
    config: &mut Config,
    api_key: Option<String>,
    form_id: Option<String>,
    sheet_path: Option<String>,
) -> Result<()> {
    if let Some(key) = api_key {
        config.forms.api_key = key;
    }
    if let Some(id) = form_id {
        config.forms.form_id = id;
    }
    if let Some(path) = sheet_path {
        config.sheet.path = path;
    }
    config.save()?;

    println!("Configuration saved to {}", Config::config_path()?.display());
    Ok(())
}

async fn pull(config: &Config) -> Result<()> {
    let syncer = Syncer::from_config(config)?;

    println!("Synchronizing from the form store to the spreadsheet...");
    let counts = syncer.pull().await?;
    print_counts(&counts);
    Ok(())
}

async fn push(config: &Config, yes: bool) -> Result<()> {
    let syncer = Syncer::from_config(config)?;

    if config.sync.confirm_push && !yes && !confirm("Push spreadsheet changes to the form store?")? {
        println!("Push cancelled.");
        return Ok(());
    }

    println!("Synchronizing from the spreadsheet to the form store...");
    let counts = syncer.push().await?;
    print_counts(&counts);
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let syncer = Syncer::from_config(config)?;
    let status = syncer.status().await;

    println!("Spreadsheet:       {}", config.sheet.path);
    println!("  - Exists:        {}", status.mirror_exists);
    if let Some(rows) = status.mirror_rows {
        println!("  - Row count:     {rows}");
    }
    println!("Form store:");
    println!("  - Reachable:     {}", status.remote_entries.is_some());
    if let Some(entries) = status.remote_entries {
        println!("  - Entry count:   {entries}");
    }
    match status.last_sync {
        Some(ts) => println!("Last synchronized: {}", ts.to_rfc3339()),
        None => println!("Last synchronized: Never"),
    }
    Ok(())
}

fn print_counts(counts: &SyncCounts) {
    println!("Synchronization complete:");
    println!("  - {} entries updated", counts.updated);
    println!("  - {} entries added", counts.inserted);
    println!("  - {} entries deleted", counts.deleted);
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (y/n): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}
