use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

use scripter::database::engine::{LogUpgradeLog, UpgradeLog};
use scripter::scripts::preview::DEFAULT_PREVIEW_LEN;

#[derive(Debug, Parser)]
#[command(name = "scripter")]
#[command(about = "Track and run SQL Server migration scripts", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML). Defaults to ./scripter.toml when present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQL Server connection string (ADO style)
    #[arg(long, global = true)]
    pub connection_string: Option<String>,

    /// Root folder holding the .sql scripts
    #[arg(long, global = true)]
    pub folder: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Echo log lines to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List executed and pending scripts
    Load,
    /// Run pending scripts, oldest first, stopping at the first failure
    Run(RunArgs),
    /// List every journal row
    History,
    /// Show the text of a journaled or on-disk script
    Preview(PreviewArgs),
    /// Check that the database is reachable
    TestConnection,
    /// Create or upgrade the journal table
    EnsureSchema,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run every pending script
    #[arg(long, conflicts_with = "files")]
    pub all: bool,

    /// File names of pending scripts to run
    #[arg(required_unless_present = "all")]
    pub files: Vec<String>,
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Journal row id
    #[arg(long, required_unless_present = "file", conflicts_with = "file")]
    pub id: Option<i32>,

    /// Script file name
    #[arg(long)]
    pub file: Option<String>,

    /// Maximum characters shown
    #[arg(long, default_value_t = DEFAULT_PREVIEW_LEN)]
    pub max_len: usize,
}

const SPINNER_TEMPLATE: &str = "[{elapsed_precise}] {spinner} {wide_msg}";
const STEADY_TICK_MS: u64 = 100;

/// Logs execution progress and mirrors it on a spinner, printing warnings and errors above it.
pub struct ConsoleUpgradeLog {
    bar: ProgressBar,
}

impl ConsoleUpgradeLog {
    pub fn new(visible: bool) -> Self {
        if !visible {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(SPINNER_TEMPLATE) {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(STEADY_TICK_MS));
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl UpgradeLog for ConsoleUpgradeLog {
    fn write_information(&self, message: &str) {
        LogUpgradeLog.write_information(message);
        self.bar.set_message(message.to_string());
    }

    fn write_warning(&self, message: &str) {
        LogUpgradeLog.write_warning(message);
        self.bar.println(format!("WARN  {}", message));
    }

    fn write_error(&self, message: &str) {
        LogUpgradeLog.write_error(message);
        self.bar.println(format!("ERROR {}", message));
    }
}
