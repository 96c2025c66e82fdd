//! Instance Backup - Command line entry point
//!
//! Backs up and restores instance directories that are not currently running.

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Args, Parser, Subcommand};
use instance_backup::{
    config::Config, utils, BackupRecord, BackupService, DirectoryInstance, InstanceBackupSettings,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a backup of an instance directory
    Create(InstanceArgs),

    /// List existing backups
    List {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete one backup
    Delete {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Archive file name, as shown by `list`
        file_name: String,
    },

    /// Restore a backup into the instance directory
    Restore {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Archive file name, as shown by `list`
        file_name: String,
    },

    /// Apply the retention limit (--max-backups) now
    Prune(InstanceArgs),
}

#[derive(Args, Debug)]
struct InstanceArgs {
    /// Instance working directory
    #[arg(short, long, value_name = "DIR")]
    dir: PathBuf,

    /// Instance id (names the default backup directory)
    #[arg(long)]
    id: String,

    /// Instance nickname used in archive names (defaults to the id)
    #[arg(long)]
    name: Option<String>,

    /// Absolute directory for this instance's backups
    #[arg(long, value_name = "DIR")]
    backup_path: Option<PathBuf>,

    /// Number of backups to keep (0 keeps all)
    #[arg(long)]
    max_backups: Option<u32>,

    /// Do not stop the instance during backup
    #[arg(long)]
    no_cold_backup: bool,

    /// Filename encoding inside archives
    #[arg(long)]
    file_code: Option<String>,
}

impl InstanceArgs {
    fn instance(&self) -> DirectoryInstance {
        let settings = InstanceBackupSettings {
            backup_path: self.backup_path.clone(),
            use_cold_backup: !self.no_cold_backup,
            max_backup_count: self.max_backups,
            file_code: self.file_code.clone(),
        };
        DirectoryInstance::new(
            self.id.clone(),
            self.name.clone().unwrap_or_else(|| self.id.clone()),
            self.dir.clone(),
            settings,
        )
    }
}

fn format_timestamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_table(records: &[BackupRecord]) {
    if records.is_empty() {
        println!("No backups found");
        return;
    }
    println!("{:<20} {:>12}  {}", "CREATED", "SIZE", "FILE");
    for record in records {
        println!(
            "{:<20} {:>12}  {}",
            format_timestamp(record.timestamp),
            record.size,
            record.file_name
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.ansi)?;

    tracing::debug!("Starting instance-backup v{}", env!("CARGO_PKG_VERSION"));

    let service = BackupService::new(&config);

    match args.command {
        Command::Create(instance) => {
            let record = service.create_backup(Arc::new(instance.instance())).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::List { instance, json } => {
            let records = service.list_backups(&instance.instance()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_table(&records);
            }
        }
        Command::Delete { instance, file_name } => {
            service.delete_backup(&instance.instance(), &file_name).await?;
            println!("Deleted {}", file_name);
        }
        Command::Restore { instance, file_name } => {
            let entries = service.restore_backup(&instance.instance(), &file_name).await?;
            println!("Restored {} entries from {}", entries, file_name);
        }
        Command::Prune(instance) => {
            let removed = service.cleanup_old_backups(&instance.instance()).await?;
            println!("Removed {} old backup(s)", removed);
        }
    }

    Ok(())
}
