use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli_style;
use cli_style::{
    get_styles, print_empty_list, print_error, print_key_value, print_section_footer,
    print_section_header, print_success, print_warning, TableBuilder,
};

use sqlite_backup_scheduler::backup::{BackupManager, BackupScheduler, SchedulerStats};
use sqlite_backup_scheduler::config::{BackupConfig, CliConfig, FileConfig};

const VERSION: &str = concat!(env!("APP_VERSION"), "-", env!("GIT_HASH"));

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[command(
    styles = get_styles(),
    version = VERSION,
    about = "Periodic SQLite backups with bounded retention"
)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override command line flags.
    #[clap(long, global = true, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the live SQLite database. Auto-detected under the project root if omitted.
    #[clap(long, global = true, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Project root, defaults to the current directory.
    #[clap(long, global = true, value_parser = parse_path)]
    pub project_root: Option<PathBuf>,

    /// Directory holding the backups, defaults to `<project root>/backups_sqlite`.
    #[clap(long, global = true, value_parser = parse_path)]
    pub backup_dir: Option<PathBuf>,

    /// Seconds between backup cycles.
    #[clap(long, global = true, default_value_t = sqlite_backup_scheduler::config::DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// Number of database snapshots to keep.
    #[clap(long, global = true, default_value_t = sqlite_backup_scheduler::config::DEFAULT_MAX_BACKUPS)]
    pub max_backups: usize,

    /// Also append log lines to this file.
    #[clap(long, global = true, value_parser = parse_path)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one backup now, then keep backing up on the interval until Ctrl+C.
    Run,

    /// Run a single backup cycle and exit.
    BackupNow,

    /// Show the live database and backup directory state.
    Status {
        /// Print as JSON.
        #[clap(long)]
        json: bool,
    },

    /// List existing snapshots, newest first.
    List {
        /// Print as JSON.
        #[clap(long)]
        json: bool,
    },

    /// Replace the live database with the given snapshot.
    /// The current database is kept next to it with a `.pre-restore` suffix.
    Restore { name: String },

    /// Delete backups beyond the retention limits.
    Prune,
}

impl CliArgs {
    fn cli_config(&self) -> CliConfig {
        CliConfig {
            project_root: self.project_root.clone(),
            db_path: self.db_path.clone(),
            backup_dir: self.backup_dir.clone(),
            log_file: self.log_file.clone(),
            interval_secs: self.interval,
            max_backups: self.max_backups,
        }
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")
}

fn format_size(size: Option<u64>) -> String {
    match size {
        Some(size) => format!("{:#}", byte_unit::Byte::from(size)),
        None => "-".to_string(),
    }
}

fn print_stats(stats: &SchedulerStats) {
    print_key_value("Snapshots taken", &stats.total_snapshots.to_string());
    print_key_value(
        "Last snapshot",
        &stats
            .last_snapshot
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "never".to_string()),
    );
    print_key_value("Last size", &format_size(Some(stats.last_size)));
    print_key_value("Errors", &stats.errors.to_string());
}

async fn run_scheduler(config: BackupConfig) -> Result<()> {
    let scheduler = BackupScheduler::new(config)?;
    scheduler.start().await;
    info!("Backup scheduler running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Ctrl+C received");
    scheduler.stop().await;

    print_section_header("Final stats");
    print_stats(&scheduler.stats());
    print_section_footer();
    Ok(())
}

async fn backup_now(manager: Arc<BackupManager>) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || manager.backup_now()).await??;

    print_success(&format!(
        "Snapshot {} ({})",
        report.snapshot.file_name(),
        format_size(Some(report.snapshot.size_bytes))
    ));
    if let Some(archive) = &report.archive {
        print_success(&format!(
            "Archive {} ({} files, {})",
            archive.file_name(),
            archive.files_added,
            format_size(Some(archive.size_bytes))
        ));
    }
    if let Some(archive_error) = &report.archive_error {
        print_warning(&format!("Project archive failed: {}", archive_error));
    }
    if !report.metadata_written {
        print_warning("Metadata record could not be written");
    }
    if report.pruned > 0 {
        print_key_value("Pruned", &report.pruned.to_string());
    }
    Ok(())
}

fn print_status(manager: &BackupManager, json: bool) -> Result<()> {
    let status = manager.status(false);
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print_section_header("Database");
    print_key_value("Path", &status.db_path.display().to_string());
    if !status.db_exists {
        print_warning("Database file does not exist");
    }
    if let Some(info) = &status.db_info {
        print_key_value("Size", &format_size(Some(info.size_bytes)));
        if let Some(modified) = info.modified {
            print_key_value("Modified", &modified.to_rfc3339());
        }
        print_key_value("Tables", &info.tables.to_string());
        print_key_value("Records", &info.total_records.to_string());
    }
    print_section_footer();

    print_section_header("Backups");
    print_key_value("Directory", &status.backup_dir.display().to_string());
    print_key_value("Interval", &format!("{}s", status.interval_secs));
    print_key_value("Retention", &format!("{} snapshots", status.max_backups));
    print_key_value("Existing", &status.existing_backups.to_string());
    match &status.latest_backup {
        Some(latest) => {
            print_key_value("Latest", &latest.file);
            print_key_value("Created", &latest.created.to_rfc3339());
            print_key_value("Latest size", &format_size(latest.size_bytes));
        }
        None => print_empty_list("No backups yet"),
    }
    print_section_footer();
    Ok(())
}

fn print_listing(manager: &BackupManager, json: bool) -> Result<()> {
    let listing = manager.list_backups()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    print_section_header("Snapshots");
    if listing.is_empty() {
        print_empty_list("No backups found");
        print_section_footer();
        return Ok(());
    }
    print_section_footer();

    let mut table = TableBuilder::new(&["File", "Created", "Size", "Tables", "Records"]);
    for entry in &listing {
        let info = entry
            .record
            .as_ref()
            .and_then(|record| record.database.info.as_ref());
        table.add_row(vec![
            entry.filename.clone(),
            entry.created.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_size(entry.size_bytes),
            info.map(|i| i.tables.to_string()).unwrap_or_else(|| "-".into()),
            info.map(|i| i.total_records.to_string())
                .unwrap_or_else(|| "-".into()),
        ]);
    }
    table.print();
    Ok(())
}

fn restore(manager: &BackupManager, name: &str) -> Result<()> {
    let report = manager.restore(name)?;
    print_success(&format!(
        "Restored {} into {}",
        name,
        manager.config().db_path.display()
    ));
    if let Some(copy) = report.pre_restore_copy {
        print_key_value("Previous database", &copy.display().to_string());
    }
    Ok(())
}

fn prune(manager: &BackupManager) -> Result<()> {
    let report = manager.prune()?;
    if report.removed == 0 && report.temp_removed == 0 && report.failed.is_empty() {
        print_success("Nothing to prune");
    } else {
        print_success(&format!("Removed {} old backup files", report.removed));
    }
    if report.temp_removed > 0 {
        print_key_value(
            "Abandoned temporary files removed",
            &report.temp_removed.to_string(),
        );
    }
    for failure in &report.failed {
        print_warning(failure);
    }
    Ok(())
}

async fn dispatch(command: Command, config: BackupConfig) -> Result<()> {
    let open = |config: BackupConfig| -> Result<BackupManager> {
        Ok(BackupManager::new(config)?)
    };
    match command {
        Command::Run => run_scheduler(config).await,
        Command::BackupNow => backup_now(Arc::new(open(config)?)).await,
        Command::Status { json } => print_status(&open(config)?, json),
        Command::List { json } => print_listing(&open(config)?, json),
        Command::Restore { name } => restore(&open(config)?, &name),
        Command::Prune => prune(&open(config)?),
    }
}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = BackupConfig::resolve(&cli_args.cli_config(), file_config)?;

    init_logging(config.log_file.as_deref())?;
    if let Some(path) = &cli_args.config {
        info!("Loaded config file {:?}", path);
    }

    let stop_timeout = config.stop_timeout();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;
    let result = runtime.block_on(dispatch(cli_args.command, config));
    runtime.shutdown_timeout(stop_timeout);

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
