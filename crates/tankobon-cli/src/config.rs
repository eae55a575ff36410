use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "tankobon")]
#[command(
    author,
    version,
    about = "Harvests manga series and English volume releases into PostgreSQL"
)]
#[command(after_help = "Examples:
  tankobon harvest
  tankobon harvest --once
  tankobon clean --min-severity 5
  tankobon clean --delete --yes
  tankobon stats")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Google Books API key; searches run anonymously without one
    #[arg(long, env = "GOOGLE_BOOKS_API_KEY")]
    pub google_books_api_key: Option<String>,

    /// Custom path to the TOML configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log at DEBUG level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Fill the store up to the series cap, then keep checking for new volumes
    #[command(after_help = "Examples:
  tankobon harvest          # Run until Ctrl-C / SIGTERM
  tankobon harvest --once   # One initial harvest plus one update pass")]
    Harvest {
        /// Run a single initial harvest and update pass, then exit
        #[arg(long)]
        once: bool,
    },
    /// Find and optionally delete volumes that do not belong to their series
    #[command(after_help = "Examples:
  tankobon clean                        # Dry run report
  tankobon clean --delete               # Delete outliers (asks for confirmation)
  tankobon clean --interactive --delete # Decide per volume")]
    Clean {
        /// Minimum severity for deletion; defaults to the config file value
        #[arg(long, value_name = "N")]
        min_severity: Option<u32>,

        /// Actually delete volumes instead of reporting
        #[arg(long)]
        delete: bool,

        /// Skip the DELETE confirmation prompt
        #[arg(long, requires = "delete")]
        yes: bool,

        /// Ask about each outlier
        #[arg(short, long)]
        interactive: bool,
    },
    /// Show database statistics
    Stats,
}
