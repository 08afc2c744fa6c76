use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use pofo_core::{LinkConfig, LinkSession, SendOutcome, SysfsLines};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Atari Portfolio file transfer over GPIO", long_about = None)]
struct Args {
    /// Link configuration (TOML). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Link(LinkCommand),
    /// Write the default configuration to a file
    InitConfig { file: PathBuf },
}

/// Commands that talk to the Portfolio.
#[derive(Subcommand, Debug)]
enum LinkCommand {
    /// List files on the Portfolio
    List {
        /// DOS wildcard, e.g. C:\*.TXT
        #[arg(default_value = "C:\\*.*")]
        pattern: String,
    },
    /// Send a local file to the Portfolio
    Send {
        local: PathBuf,
        remote: String,
        /// Replace the remote file if it exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Retrieve a file from the Portfolio
    Retrieve { remote: String, local: PathBuf },
    /// Wait for the Portfolio file server to answer
    Sync {
        #[arg(long, default_value_t = 3)]
        attempts: usize,
    },
}

fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    match path {
        Some(path) => LinkConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(LinkConfig::default()),
    }
}

fn run_link(config: LinkConfig, command: LinkCommand) -> Result<()> {
    let lines = SysfsLines::new(&config.pins);
    let mut session = LinkSession::new(lines, config);
    session.enable()?;

    let result = run_command(&mut session, command);
    if let Err(e) = session.disable() {
        warn!("Failed to disable link: {}", e);
    }
    result
}

fn run_command(session: &mut LinkSession<SysfsLines>, command: LinkCommand) -> Result<()> {
    match command {
        LinkCommand::List { pattern } => {
            let names = session.list_files(&pattern)?;
            for name in &names {
                println!("{}", name);
            }
            info!("{} file(s)", names.len());
        }
        LinkCommand::Send {
            local,
            remote,
            overwrite,
        } => {
            let data = std::fs::read(&local)
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let modified = std::fs::metadata(&local)
                .and_then(|m| m.modified())
                .map(|t| DateTime::<Local>::from(t).naive_local())
                .unwrap_or_else(|_| Local::now().naive_local());
            match session.send_file(&remote, &data, overwrite, modified)? {
                SendOutcome::Created => info!("Created {}", remote),
                SendOutcome::Overwritten => info!("Overwrote {}", remote),
            }
        }
        LinkCommand::Retrieve { remote, local } => {
            let file = session.retrieve_file(&remote)?;
            std::fs::write(&local, &file.data)
                .with_context(|| format!("Failed to write {}", local.display()))?;
            info!(bytes = file.data.len(), "Saved {}", local.display());
        }
        LinkCommand::Sync { attempts } => {
            session.sync(attempts)?;
            info!("Server ready");
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    match args.command {
        // Needs no hardware.
        Command::InitConfig { file } => {
            config.save_to_file(&file)?;
            info!("Wrote {}", file.display());
            Ok(())
        }
        Command::Link(command) => run_link(config, command),
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
