//! UCP CLI
//!
//! Command-line interface for validating, running and verifying UCP
//! command packets

use clap::{Parser, Subcommand};
use ucp_core::logging_facility::{init, Profile};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "ucp")]
#[command(about = "UCP - Command packet execution engine", long_about = None)]
struct Cli {
    /// Human-readable logs instead of JSON lines (logs go to stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check a packet document without running it
    Validate(commands::validate::ValidateArgs),
    /// Execute a packet and emit its receipt
    Run(commands::run::RunArgs),
    /// Check a receipt's hash and, optionally, its packet binding
    Verify(commands::verify::VerifyArgs),
    /// Template cache operations
    Template(commands::template::TemplateArgs),
    /// Stored receipt queries
    Receipts(commands::receipts::ReceiptsArgs),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init(if cli.verbose {
        Profile::Development
    } else {
        Profile::Production
    });

    let result = match cli.command {
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Verify(args) => commands::verify::execute(args),
        Commands::Template(args) => commands::template::execute(args),
        Commands::Receipts(args) => commands::receipts::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
