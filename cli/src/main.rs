use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use mailroom::{AppConfig, Context, Dispatcher, RunMode, RunReport};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "mailroom", about = "Mail invoices to their recipients")]
struct Cli {
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// Config file (default: mailroom.{toml,json,yaml} in the working directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Invoice folder, overriding the configured one
    #[arg(long, global = true)]
    folder: Option<PathBuf>,

    /// Recipient directory, overriding the configured one
    #[arg(long, global = true)]
    recipients: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and cache the credentials
    Login {
        /// Only use cached credentials, never prompt
        #[arg(long)]
        silent: bool,
    },
    /// List the invoices that would be dispatched
    Scan,
    /// Show the recipient for an invoice key
    Lookup {
        #[arg(value_name = "key")]
        key: String,
    },
    /// Resolve and build every message without sending
    DryRun {
        #[arg(long, value_parser = parse_sender)]
        sender: Option<String>,
    },
    /// Send every invoice
    Send {
        #[arg(long, value_parser = parse_sender)]
        sender: Option<String>,
    },
}

fn parse_sender(value: &str) -> Result<String, String> {
    let value = value.trim();
    if value.contains('@') {
        Ok(value.to_string())
    } else {
        Err(format!("'{value}' is not an email address"))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = match cli.verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("initializing logger")?;

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let folder = cli.folder.unwrap_or_else(|| config.invoice_folder.clone());
    let recipients = cli
        .recipients
        .unwrap_or_else(|| config.recipients_path.clone());

    let ctx = Context::default();

    match cli.command {
        Commands::Scan => {
            let scanner = mailroom::Scanner::new(&config.key_pattern, config.case_insensitive)?;
            let scan = scanner.scan(&folder, &ctx);
            let mut count = 0;
            for candidate in &scan {
                println!("{}\t{}", candidate.key, candidate.path.display());
                count += 1;
            }
            log::info!("{count} invoice(s) in {}", folder.display());
            Ok(exit_code(!scan.folder_missing()))
        }
        Commands::Lookup { key } => {
            let directory = mailroom::RecipientDirectory::load_from_sheet(
                &recipients,
                config.recipients_sheet.as_deref(),
                &ctx,
            );
            match directory.lookup(&key, &ctx) {
                Some(address) => {
                    println!("{address}");
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::FAILURE),
            }
        }
        Commands::Login { silent } => {
            let mut dispatcher =
                Dispatcher::from_config(&config, ctx).context("setting up sign-in")?;
            Ok(exit_code(dispatcher.authenticate(silent).await))
        }
        Commands::DryRun { sender } => {
            run(&config, ctx, RunMode::DryRun, folder, recipients, sender).await
        }
        Commands::Send { sender } => {
            run(&config, ctx, RunMode::RealSend, folder, recipients, sender).await
        }
    }
}

async fn run(
    config: &AppConfig,
    ctx: Context,
    mode: RunMode,
    folder: PathBuf,
    recipients: PathBuf,
    sender: Option<String>,
) -> Result<ExitCode> {
    let mut dispatcher = Dispatcher::from_config(config, ctx).context("setting up dispatch")?;
    let report = match dispatcher
        .run(mode, &folder, &recipients, sender.as_deref())
        .await
    {
        Ok(report) => report,
        Err(err) => {
            log::error!("{err}");
            return Ok(ExitCode::FAILURE);
        }
    };

    print_report(&report);
    Ok(exit_code(report.result.is_success()))
}

fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        let reason = outcome
            .error
            .map(|kind| format!(" ({kind})"))
            .unwrap_or_default();
        println!(
            "{:?}\t{}\t{}\t{}{}",
            outcome.status,
            outcome.key,
            outcome.recipient.as_deref().unwrap_or("-"),
            outcome.file_name(),
            reason
        );
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
