//! Template cache commands

use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ucp_core::model::{TemplateRegistration, TokenPricing};
use ucp_core::TemplateRepository;
use ucp_engine::TemplateCacheAccountant;
use ucp_store::SqliteTemplateRepo;

use super::{create_parent_dir, read_json, write_json, CliResult, DEFAULT_DB};

#[derive(Debug, Args)]
pub struct TemplateArgs {
    #[arg(long, global = true, default_value = DEFAULT_DB)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: TemplateCommand,
}

#[derive(Debug, Subcommand)]
pub enum TemplateCommand {
    /// Register a template from a registration document (JSON)
    Register { registration: PathBuf },
    /// Produce a fresh packet from a template, counting one reuse
    Instantiate {
        template_id: String,
        /// Write the packet here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List templates, newest first
    List,
    /// Print one template
    Show { template_id: String },
}

fn open_repo(db: &Path) -> CliResult<Arc<SqliteTemplateRepo>> {
    create_parent_dir(db)?;
    Ok(Arc::new(SqliteTemplateRepo::open(db)?))
}

pub fn execute(args: TemplateArgs) -> CliResult {
    let repo = open_repo(&args.db)?;
    // Pricing only matters for runs; registration and instantiation ignore it
    let accountant = TemplateCacheAccountant::new(repo.clone(), TokenPricing::default());

    match args.command {
        TemplateCommand::Register { registration } => {
            let registration: TemplateRegistration =
                serde_json::from_value(read_json(&registration)?)?;
            let template = accountant.register(registration)?;
            println!("{}", template.id);
        }
        TemplateCommand::Instantiate { template_id, out } => {
            let packet = accountant.instantiate(&template_id)?;
            write_json(&packet, out.as_deref())?;
        }
        TemplateCommand::List => {
            for template in repo.list()? {
                println!(
                    "{}\t{}\treuse={}\truns={}",
                    template.id, template.name, template.reuse_count, template.run_count
                );
            }
        }
        TemplateCommand::Show { template_id } => match repo.get(&template_id)? {
            Some(template) => write_json(&template, None)?,
            None => return Err(format!("Template not found: {}", template_id).into()),
        },
    }
    Ok(())
}
