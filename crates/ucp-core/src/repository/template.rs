use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::RepoResult;
use crate::errors::{ExError, ExErrorKind, UcpError};
use crate::model::Template;

/// Storage contract for templates
pub trait TemplateRepository: Send + Sync {
    /// Insert a new template; fails with `AlreadyExists` on id collision
    fn insert(&self, template: Template) -> RepoResult<()>;

    fn get(&self, id: &str) -> RepoResult<Option<Template>>;

    /// All templates, newest first
    fn list(&self) -> RepoResult<Vec<Template>>;

    /// Atomically increment `reuse_count`, returning the new value
    fn increment_reuse_count(&self, id: &str) -> RepoResult<u64>;

    /// Atomically increment `run_count` and set `last_used_at`, returning
    /// the new run count
    fn record_run(&self, id: &str, at: DateTime<Utc>) -> RepoResult<u64>;
}

pub(crate) fn not_found(id: &str) -> ExError {
    UcpError::TemplateNotFound {
        template_id: id.to_string(),
    }
    .into()
}

/// Process-local template repository
///
/// Counter updates happen under the write lock, so concurrent increments
/// never lose updates.
#[derive(Debug, Default)]
pub struct InMemoryTemplateRepo {
    templates: RwLock<HashMap<String, Template>>,
}

impl InMemoryTemplateRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> ExError {
        ExError::new(ExErrorKind::Concurrency)
            .with_op("template_repo")
            .with_message("template repository lock poisoned")
    }
}

impl TemplateRepository for InMemoryTemplateRepo {
    fn insert(&self, template: Template) -> RepoResult<()> {
        let mut templates = self.templates.write().map_err(|_| Self::poisoned())?;
        if templates.contains_key(&template.id) {
            return Err(UcpError::TemplateAlreadyExists {
                template_id: template.id,
            }
            .into());
        }
        templates.insert(template.id.clone(), template);
        Ok(())
    }

    fn get(&self, id: &str) -> RepoResult<Option<Template>> {
        let templates = self.templates.read().map_err(|_| Self::poisoned())?;
        Ok(templates.get(id).cloned())
    }

    fn list(&self) -> RepoResult<Vec<Template>> {
        let templates = self.templates.read().map_err(|_| Self::poisoned())?;
        let mut all: Vec<Template> = templates.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(all)
    }

    fn increment_reuse_count(&self, id: &str) -> RepoResult<u64> {
        let mut templates = self.templates.write().map_err(|_| Self::poisoned())?;
        let template = templates.get_mut(id).ok_or_else(|| not_found(id))?;
        template.reuse_count += 1;
        Ok(template.reuse_count)
    }

    fn record_run(&self, id: &str, at: DateTime<Utc>) -> RepoResult<u64> {
        let mut templates = self.templates.write().map_err(|_| Self::poisoned())?;
        let template = templates.get_mut(id).ok_or_else(|| not_found(id))?;
        template.run_count += 1;
        template.last_used_at = Some(at);
        Ok(template.run_count)
    }
}
