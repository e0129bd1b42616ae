//! Stored receipt commands

use clap::{Args, Subcommand};
use std::path::PathBuf;

use ucp_store::ReceiptRepo;

use super::{write_json, CliResult, DEFAULT_DB};

#[derive(Debug, Args)]
pub struct ReceiptsArgs {
    #[arg(long, global = true, default_value = DEFAULT_DB)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: ReceiptsCommand,
}

#[derive(Debug, Subcommand)]
pub enum ReceiptsCommand {
    /// List stored receipts, newest first
    List {
        /// Only receipts of this packet
        #[arg(long)]
        packet: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one stored receipt after re-verifying its hash
    Show { receipt_id: String },
}

pub fn execute(args: ReceiptsArgs) -> CliResult {
    if !args.db.exists() {
        return Err(format!("no database at {}", args.db.display()).into());
    }
    let repo = ReceiptRepo::open(&args.db)?;

    match args.command {
        ReceiptsCommand::List { packet, limit } => {
            for summary in repo.list(packet.as_deref(), limit)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    summary.receipt_id, summary.packet_id, summary.status, summary.cache_status
                );
            }
        }
        ReceiptsCommand::Show { receipt_id } => match repo.get(&receipt_id)? {
            Some(receipt) => write_json(&receipt, None)?,
            None => return Err(format!("Receipt not found: {}", receipt_id).into()),
        },
    }
    Ok(())
}
