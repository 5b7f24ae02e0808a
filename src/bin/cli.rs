//! Prozorro Tender Monitor CLI
//!
//! Without a command the monitor runs on its cron schedule until Ctrl-C.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tender_monitor::{
    error::Result,
    models::Config,
    pipeline::{self, Monitor, Scheduler, TickState},
    utils::log as banner,
};

/// Prozorro Tender Monitor - translation tender notifications
#[derive(Parser, Debug)]
#[command(
    name = "tender-monitor",
    version,
    about = "Polls Prozorro for translation tenders and notifies a Telegram chat"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "monitor.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a test message and run a single check
    Test,

    #[command(external_subcommand)]
    Other(Vec<String>),
}

/// What the invocation asks for once command names are normalised.
#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Schedule,
    Test,
    Help,
    Unrecognized(String),
}

/// Command names are matched case-insensitively.
fn mode(command: Option<&Command>) -> Mode {
    match command {
        None => Mode::Schedule,
        Some(Command::Test) => Mode::Test,
        Some(Command::Other(args)) => {
            let name = args.first().cloned().unwrap_or_default();
            match name.to_lowercase().as_str() {
                "test" => Mode::Test,
                "help" => Mode::Help,
                _ => Mode::Unrecognized(name),
            }
        }
    }
}

fn print_unrecognized(what: &str) {
    println!("Unrecognized command: {what}");
    println!("Run `tender-monitor help` for usage.");
}

/// Initialize logging based on verbosity flag and config level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.print()?;
            } else {
                let given: Vec<String> = std::env::args().skip(1).collect();
                print_unrecognized(&given.join(" "));
            }
            return Ok(());
        }
    };

    let mode = mode(cli.command.as_ref());
    match &mode {
        Mode::Help => {
            Cli::command().print_help()?;
            return Ok(());
        }
        Mode::Unrecognized(name) => {
            print_unrecognized(name);
            return Ok(());
        }
        Mode::Schedule | Mode::Test => {}
    }

    // Logging comes up before the config is read so load warnings are visible;
    // the level from the file only applies when RUST_LOG is unset.
    let config = {
        let probe = Config::load_or_default(&cli.config);
        init_logging(cli.verbose, &probe.logging.level);
        Config::from_sources(&cli.config)
    };

    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }

    let monitor = Monitor::from_config(&config).await?;
    let scheduler = Scheduler::from_config(&config.schedule)?;

    match mode {
        Mode::Test => {
            let report = pipeline::run_test(&monitor).await;
            if report.state == TickState::Failed {
                log::warn!("Test check failed; see log above");
            }
        }
        Mode::Help | Mode::Unrecognized(_) => {}
        Mode::Schedule => {
            let next = scheduler
                .next_after(chrono::Utc::now())
                .map(|t| {
                    t.with_timezone(&config.schedule.tz().unwrap_or(chrono_tz::UTC))
                        .format("%d.%m.%Y %H:%M:%S %Z")
                        .to_string()
                })
                .unwrap_or_else(|| "never".to_string());

            banner::header("Prozorro Tender Monitor");
            banner::summary(
                "Configuration",
                &[
                    ("schedule", config.schedule.cron.clone()),
                    ("timezone", config.schedule.timezone.clone()),
                    ("lookback", format!("{}h", config.schedule.lookback_hours)),
                    ("CPV code", config.filter.cpv_code.clone()),
                    ("data file", config.storage.data_file.clone()),
                    ("next scheduled check", next),
                ],
            );

            scheduler.run(&monitor).await?;
        }
    }

    log::info!("Done!");
    Ok(())
}
