//! Packet validation command

use clap::Args;
use std::path::PathBuf;

use ucp_core::rules::invariants::{find_duplicate_ids, find_undeclared_capabilities};
use ucp_core::{validate, ValidationOptions};
use ucp_engine::EngineConfig;

use super::{read_json, CliResult};

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Packet document (JSON)
    pub packet: PathBuf,

    /// Take depth and expression limits from this config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print defects as a JSON array instead of text
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: ValidateArgs) -> CliResult {
    let options = match &args.config {
        Some(path) => EngineConfig::load(path)?.validation_options(),
        None => ValidationOptions::default(),
    };
    let raw = read_json(&args.packet)?;

    let packet = match validate(&raw, &options) {
        Ok(packet) => packet,
        Err(errors) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&errors)?);
            } else {
                for error in &errors {
                    println!("{}", error);
                }
            }
            return Err(format!("{} validation error(s)", errors.len()).into());
        }
    };

    if args.json {
        println!("[]");
    } else {
        println!(
            "valid: {} ({} top-level operation(s))",
            packet.id,
            packet.operations.len()
        );
    }

    // Warnings only; these packets still run
    for (path, capability) in find_undeclared_capabilities(&packet) {
        eprintln!(
            "warning: {} uses capability '{}' not listed in required_capabilities",
            path, capability
        );
    }
    for (id, paths) in find_duplicate_ids(&packet) {
        eprintln!("warning: id '{}' is used at {}", id, paths.join(", "));
    }
    Ok(())
}
