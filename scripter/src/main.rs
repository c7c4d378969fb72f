mod cli;

use clap::Parser;
use log::{error, info};
use serde::Serialize;
use std::process::ExitCode;

use cli::{Cli, Commands, ConsoleUpgradeLog};
use scripter::api::scripts::{self, PreviewTarget};
use scripter::config::{AppConfig, ConfigOverrides};
use scripter::error::ConfigError;
use scripter::models::responses::{
    ApiResponse, HistoryResponse, LoadResponse, PreviewResponse, RunResponse,
};
use scripter::scripts::service::Selection;

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        connection_string: cli.connection_string.clone(),
        scripts_folder: cli.folder.clone(),
    };
    let cfg = match AppConfig::load(cli.config.as_deref(), &overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if let Err(e) = scripter::init_logging(cfg.log_dir.as_deref(), cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    info!(
        "[PHASE: initialization] scripter {} starting ({:?})",
        env!("CARGO_PKG_VERSION"),
        cli.command
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(dispatch(&cli, &cfg)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_FAILURE),
        Err(e) => {
            error!("[PHASE: shutdown] {:#}", e);
            let code = if e.downcast_ref::<ConfigError>().is_some() {
                EXIT_CONFIG
            } else {
                EXIT_FAILURE
            };
            if cli.json {
                print_json(&ApiResponse::<()>::fail(format!("{:#}", e)));
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::from(code)
        }
    }
}

/// Runs the command; `Ok(false)` means it completed but reported failure.
async fn dispatch(cli: &Cli, cfg: &AppConfig) -> anyhow::Result<bool> {
    match &cli.command {
        Commands::Load => {
            let response = scripts::load(cfg).await?;
            if cli.json {
                print_json(&ApiResponse::ok(&response));
            } else {
                print_load(&response);
            }
            Ok(true)
        }
        Commands::Run(args) => {
            let selection = if args.all {
                Selection::All
            } else {
                Selection::FileNames(args.files.clone())
            };
            let log = ConsoleUpgradeLog::new(!cli.json);
            let result = scripts::run(cfg, &selection, &log).await;
            log.finish();
            let response = result?;
            let success = response.success;
            if cli.json {
                print_json(&ApiResponse::ok(&response));
            } else {
                print_run(&response);
            }
            Ok(success)
        }
        Commands::History => {
            let response = scripts::history(cfg).await?;
            if cli.json {
                print_json(&ApiResponse::ok(&response));
            } else {
                print_history(&response);
            }
            Ok(true)
        }
        Commands::Preview(args) => {
            let target = match (&args.file, args.id) {
                (Some(name), _) => PreviewTarget::FileName(name.clone()),
                (None, Some(id)) => PreviewTarget::Id(id),
                (None, None) => anyhow::bail!("preview needs --id or --file"),
            };
            let response = scripts::preview(cfg, &target, args.max_len).await?;
            if cli.json {
                print_json(&ApiResponse::ok(&response));
            } else {
                print_preview(&response);
            }
            Ok(true)
        }
        Commands::TestConnection => {
            let result = scripts::test_connection(cfg).await;
            if cli.json {
                print_json(&ApiResponse::ok(&result));
            } else if result.success {
                println!(
                    "Connected to {} / {} (SQL Server {}) in {} ms",
                    result.server.as_deref().unwrap_or("?"),
                    result.database.as_deref().unwrap_or("?"),
                    result.version.as_deref().unwrap_or("?"),
                    result.elapsed_ms
                );
            } else {
                println!(
                    "Connection failed after {} ms: {}",
                    result.elapsed_ms,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(result.success)
        }
        Commands::EnsureSchema => {
            scripts::ensure_schema(cfg).await?;
            let table = cfg.journal_table()?.qualified();
            if cli.json {
                print_json(&ApiResponse::ok(&table));
            } else {
                println!("Journal table {} is up to date", table);
            }
            Ok(true)
        }
        Commands::PrintConfig => {
            let masked = cfg.masked();
            if cli.json {
                print_json(&ApiResponse::ok(&masked));
            } else {
                println!("{}", toml::to_string_pretty(&masked)?);
            }
            Ok(true)
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn print_load(response: &LoadResponse) {
    println!("Scripts folder: {}", response.scripts_folder);
    println!();
    println!("Executed ({}):", response.executed.len());
    for row in &response.executed {
        let applied = row
            .applied_utc
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<19}  {:<12}  {}",
            applied,
            row.release.as_deref().unwrap_or(""),
            row.script_name
        );
    }
    println!();
    println!("Pending ({}):", response.pending.len());
    for script in &response.pending {
        println!(
            "  {:<19}  {:<12}  {}",
            script.created_utc.format("%Y-%m-%d %H:%M:%S"),
            script.release.as_deref().unwrap_or(""),
            script.script_name
        );
    }
}

fn print_run(response: &RunResponse) {
    for id in &response.applied {
        println!("Applied  {}", id);
    }
    match (&response.failed, &response.error) {
        (Some(failed), Some(error)) => {
            println!("Failed   {}", failed);
            println!("         {}", error);
            println!("Stopped; remaining scripts were not run.");
        }
        _ if response.applied.is_empty() => println!("Nothing to run."),
        _ => println!("{} script(s) applied.", response.applied.len()),
    }
}

fn print_history(response: &HistoryResponse) {
    for row in &response.rows {
        let applied = row
            .applied_utc
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<19}  {:<40}  {:<16}  {}",
            row.id,
            applied,
            row.script_name,
            row.executed_by.as_deref().unwrap_or(""),
            row.path.as_deref().unwrap_or("")
        );
    }
}

fn print_preview(response: &PreviewResponse) {
    println!("-- {}", response.target);
    println!("{}", response.text);
}
