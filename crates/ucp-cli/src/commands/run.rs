//! Packet run command
//!
//! Validates the packet, runs it through the template cache accountant and
//! prints (or writes) the receipt. With `--db` the local_storage capability,
//! the template cache and the receipt log all live in that SQLite file;
//! without it everything is in memory for the duration of the run.

use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ucp_core::{
    validate, InMemoryKvStore, InMemoryTemplateRepo, KvStore, LedgerSnapshot, TemplateRepository,
};
use ucp_engine::{
    AbortHandle, CapabilityRegistry, CollectingObserver, EngineConfig, ExecutionObserver,
    Interpreter, LogEntry, TemplateCacheAccountant,
};
use ucp_store::{ReceiptRepo, SqliteKvStore, SqliteTemplateRepo};

use super::{create_parent_dir, read_json, write_json, CliResult};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Packet document (JSON)
    pub packet: PathBuf,

    /// Engine config (TOML); UCP_* environment variables override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SQLite database for storage, templates and receipts
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Write the receipt here instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Write the run's own log entries (JSON array) here
    #[arg(long)]
    pub run_log: Option<PathBuf>,

    /// Run even if the packet's TTL has passed
    #[arg(long)]
    pub no_ttl: bool,

    /// Echo run log lines and progress to stderr
    #[arg(long)]
    pub progress: bool,
}

/// Collects the run log, optionally echoing it as it happens
struct ConsoleObserver {
    collected: CollectingObserver,
    echo: bool,
}

impl ExecutionObserver for ConsoleObserver {
    fn on_log(&self, entry: &LogEntry) {
        if self.echo {
            match &entry.node_path {
                Some(path) => eprintln!("[{:?}] {}: {}", entry.level, path, entry.message),
                None => eprintln!("[{:?}] {}", entry.level, entry.message),
            }
        }
        self.collected.on_log(entry);
    }

    fn on_progress(&self, completed: usize, total: usize) {
        if self.echo {
            eprintln!("progress {}/{}", completed, total);
        }
        self.collected.on_progress(completed, total);
    }

    fn on_token_update(&self, snapshot: &LedgerSnapshot) {
        self.collected.on_token_update(snapshot);
    }
}

fn load_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

pub async fn execute(args: RunArgs) -> CliResult {
    let mut config = load_config(args.config.as_deref())?;
    if args.no_ttl {
        config.ttl.enforce = false;
    }

    let raw = read_json(&args.packet)?;
    let packet = match validate(&raw, &config.validation_options()) {
        Ok(packet) => packet,
        Err(errors) => {
            for error in &errors {
                eprintln!("{}", error);
            }
            return Err(format!("{} validation error(s)", errors.len()).into());
        }
    };

    let store: Arc<dyn KvStore>;
    let templates: Arc<dyn TemplateRepository>;
    let mut receipts = None;
    match &args.db {
        Some(db) => {
            create_parent_dir(db)?;
            store = Arc::new(SqliteKvStore::open(db)?);
            templates = Arc::new(SqliteTemplateRepo::open(db)?);
            receipts = Some(ReceiptRepo::open(db)?);
        }
        None => {
            store = Arc::new(InMemoryKvStore::new());
            templates = Arc::new(InMemoryTemplateRepo::new());
        }
    }

    let registry = CapabilityRegistry::builtin(&config, store, None, None)?;
    let interpreter = Interpreter::from_config(Arc::new(registry), &config);
    let accountant = TemplateCacheAccountant::new(templates, config.pricing)
        .with_validation_options(config.validation_options());

    let abort = AbortHandle::new();
    let on_interrupt = abort.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!(event = "interrupt", "abort requested");
            on_interrupt.abort();
        }
    });

    let observer = ConsoleObserver {
        collected: CollectingObserver::new(),
        echo: args.progress,
    };
    let result = accountant
        .run(&interpreter, &packet, &observer, &abort)
        .await;
    watcher.abort();
    let receipt = result?;

    if let Some(repo) = &receipts {
        repo.save(&receipt)?;
    }
    if let Some(path) = &args.run_log {
        write_json(&observer.collected.logs(), Some(path))?;
    }
    write_json(&receipt, args.out.as_deref())?;

    match &receipt.failure {
        None => Ok(()),
        Some(failure) => Err(format!(
            "packet {} failed: {} {}",
            receipt.packet_id, failure.code, failure.message
        )
        .into()),
    }
}
