//! Receipt verification command

use clap::Args;
use std::path::PathBuf;

use ucp_core::receipt::{verify_packet_binding, verify_receipt_value};
use ucp_core::{validate, Receipt, ValidationOptions};

use super::{read_json, CliResult};

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Receipt document (JSON)
    pub receipt: PathBuf,

    /// Also check that the receipt was produced from this packet
    #[arg(long)]
    pub packet: Option<PathBuf>,
}

pub fn execute(args: VerifyArgs) -> CliResult {
    let document = read_json(&args.receipt)?;
    verify_receipt_value(&document)?;

    let receipt: Receipt = serde_json::from_value(document)?;
    if let Some(path) = &args.packet {
        // Hash the packet as the engine saw it, with defaults filled in
        let packet = validate(&read_json(path)?, &ValidationOptions::default()).map_err(|errors| {
            format!("{} is not a valid packet ({} error(s))", path.display(), errors.len())
        })?;
        verify_packet_binding(&receipt, &packet)?;
        println!(
            "receipt {} verified against packet {}",
            receipt.receipt_id, receipt.packet_id
        );
    } else {
        println!("receipt {} verified", receipt.receipt_id);
    }
    Ok(())
}
