//! mailvault - IMAP mailbox backup
//!
//! Usage:
//!   mailvault fetch-email <host> <user>   Back up every message of the mailbox
//!   mailvault list [--search TEXT]        List stored messages
//!   mailvault show <id>                   Show one stored message
//!   mailvault contacts [--search TEXT]    List stored contacts
//!   mailvault export <id>...              Export messages as .eml or .zip

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;

mod commands;

#[derive(Parser)]
#[command(name = "mailvault")]
#[command(about = "Back up an IMAP mailbox into a local database")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file (defaults to the configured or per-user location)
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    /// Config file (defaults to ~/.config/mailvault/mailvault.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every message of the mailbox and store it
    #[command(name = "fetch-email")]
    FetchEmail {
        /// IMAP server host name
        host: String,
        /// IMAP login name
        user: String,
    },
    /// List stored messages, oldest first
    List {
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Only messages whose subject or sender contains TEXT
        #[arg(short, long, value_name = "TEXT")]
        search: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show a stored message with its contacts and attachments
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// List stored contacts, ordered by address
    Contacts {
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Only contacts whose address or name contains TEXT
        #[arg(short, long, value_name = "TEXT")]
        search: Option<String>,
    },
    /// Export messages: one id gives an .eml file, several give a .zip
    Export {
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Output file or directory (defaults to the export's file name)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = commands::load_settings(cli.config.as_deref())?;
    let database = match cli.database {
        Some(path) => path,
        None => settings.database_path()?,
    };

    match cli.command {
        Commands::FetchEmail { host, user } => {
            commands::fetch_email(&settings, &database, &host, &user)
        }
        Commands::List {
            limit,
            offset,
            search,
            json,
        } => commands::list(&database, limit, offset, search.as_deref(), json),
        Commands::Show { id, json } => commands::show(&database, id, json),
        Commands::Contacts {
            limit,
            offset,
            search,
        } => commands::contacts(&database, limit, offset, search.as_deref()),
        Commands::Export { ids, output } => commands::export(&database, &ids, output.as_deref()),
    }
}
