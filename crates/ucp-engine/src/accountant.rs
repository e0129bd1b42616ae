//! Template cache accountant
//!
//! Runs around the interpreter: registers and instantiates templates, and
//! stamps each templated run's receipt with its cache status and the
//! compilation cost it avoided.
//!
//! `reuse_count` moves only at instantiation. A run is a `HIT` when its
//! template had been instantiated at least once when the run began; runs
//! themselves are counted on `run_count`.

#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use ucp_core::economics::{assess, CacheAnnotation};
use ucp_core::errors::{ExError, UcpError};
use ucp_core::model::{Packet, Receipt, Template, TemplateRegistration, TokenPricing};
use ucp_core::receipt::build_receipt;
use ucp_core::rules::{validate_body, ValidationOptions};
use ucp_core::{log_op_end, log_op_error, log_op_start, TemplateRepository};

use crate::abort::AbortHandle;
use crate::interpreter::{now_ms, Interpreter};
use crate::observer::ExecutionObserver;

pub struct TemplateCacheAccountant {
    repo: Arc<dyn TemplateRepository>,
    pricing: TokenPricing,
    validation: ValidationOptions,
}

impl TemplateCacheAccountant {
    pub fn new(repo: Arc<dyn TemplateRepository>, pricing: TokenPricing) -> Self {
        Self {
            repo,
            pricing,
            validation: ValidationOptions::default(),
        }
    }

    pub fn with_validation_options(mut self, options: ValidationOptions) -> Self {
        self.validation = options;
        self
    }

    pub fn repository(&self) -> &Arc<dyn TemplateRepository> {
        &self.repo
    }

    /// Validate a template body and store it under a fresh id
    ///
    /// ## Errors
    ///
    /// Returns `ValidationFailed` for a malformed body, or the repository's
    /// error if the insert fails.
    pub fn register(&self, registration: TemplateRegistration) -> Result<Template, ExError> {
        log_op_start!("template_register", template_name = %registration.name);
        let start = Instant::now();

        let template = self.register_impl(registration).map_err(|e| {
            log_op_error!(
                "template_register",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64
            );
            e
        })?;

        log_op_end!(
            "template_register",
            duration_ms = start.elapsed().as_millis() as u64,
            template_id = %template.id
        );
        Ok(template)
    }

    fn register_impl(&self, registration: TemplateRegistration) -> Result<Template, ExError> {
        let body = validate_body(&registration.packet_body, &self.validation)
            .map_err(|errors| ExError::from(UcpError::Validation { errors }))?;
        let template = Template::new(Uuid::now_v7().to_string(), registration, body);
        self.repo.insert(template.clone())?;
        Ok(template)
    }

    /// Materialize a packet from a template
    ///
    /// The packet gets a fresh id, `issued_at = now` and `template_id`; the
    /// template's `reuse_count` is atomically incremented.
    ///
    /// ## Errors
    ///
    /// Returns `NotFound` for an unknown template id.
    pub fn instantiate(&self, template_id: &str) -> Result<Packet, ExError> {
        log_op_start!("template_instantiate", template_id = %template_id);
        let start = Instant::now();

        let packet = self.instantiate_impl(template_id).map_err(|e| {
            log_op_error!(
                "template_instantiate",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                template_id = %template_id
            );
            e
        })?;

        log_op_end!(
            "template_instantiate",
            duration_ms = start.elapsed().as_millis() as u64,
            template_id = %template_id,
            packet_id = %packet.id
        );
        Ok(packet)
    }

    fn instantiate_impl(&self, template_id: &str) -> Result<Packet, ExError> {
        let template = self.repo.get(template_id)?.ok_or_else(|| {
            ExError::from(UcpError::TemplateNotFound {
                template_id: template_id.to_string(),
            })
        })?;
        let reuse_count = self.repo.increment_reuse_count(template_id)?;
        tracing::debug!(template_id, reuse_count, "template reuse recorded");

        Ok(template.packet_body.into_packet(
            Uuid::now_v7().to_string(),
            Some(now_ms()),
            Some(template_id.to_string()),
        ))
    }

    /// Cache annotation for a run of `packet` starting now
    ///
    /// ## Errors
    ///
    /// Returns the repository's error if the template cannot be read.
    pub fn assess(&self, packet: &Packet) -> Result<CacheAnnotation, ExError> {
        let template = match packet.template_id.as_deref() {
            Some(id) => self.repo.get(id)?,
            None => None,
        };
        Ok(assess(
            packet.template_id.as_deref(),
            template.as_ref(),
            self.pricing,
        ))
    }

    /// Run a packet through `interpreter` and build its annotated receipt.
    ///
    /// The cache status is decided before the run starts. Afterwards the
    /// template's `run_count` is bumped; failing to record that is logged
    /// and does not discard the receipt.
    ///
    /// ## Errors
    ///
    /// Returns an error if the template cannot be read or the receipt
    /// cannot be hashed. Run failures are inside the receipt.
    pub async fn run(
        &self,
        interpreter: &Interpreter,
        packet: &Packet,
        observer: &dyn ExecutionObserver,
        abort: &AbortHandle,
    ) -> Result<Receipt, ExError> {
        log_op_start!("accounted_run", packet_id = %packet.id);
        let start = Instant::now();

        let receipt = self
            .run_impl(interpreter, packet, observer, abort)
            .await
            .map_err(|e| {
                log_op_error!(
                    "accounted_run",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    packet_id = %packet.id
                );
                e
            })?;

        log_op_end!(
            "accounted_run",
            duration_ms = start.elapsed().as_millis() as u64,
            packet_id = %packet.id,
            cache_status = ?receipt.cache_status
        );
        Ok(receipt)
    }

    async fn run_impl(
        &self,
        interpreter: &Interpreter,
        packet: &Packet,
        observer: &dyn ExecutionObserver,
        abort: &AbortHandle,
    ) -> Result<Receipt, ExError> {
        let annotation = self.assess(packet)?;
        let template_known = annotation.reuse_count_at_run_start.is_some();

        let outcome = interpreter.run(packet, observer, abort).await;
        let receipt = build_receipt(packet, outcome, annotation)
            .map_err(|e| ExError::from(e).with_packet_id(packet.id.clone()))?;

        if let (true, Some(template_id)) = (template_known, packet.template_id.as_deref()) {
            if let Err(e) = self.repo.record_run(template_id, Utc::now()) {
                tracing::warn!(
                    template_id,
                    err.code = e.code(),
                    "failed to record template run: {}",
                    e.message()
                );
            }
        }
        Ok(receipt)
    }
}
