//! Request-level operations: upload, complement generation, downloads.

use crate::audit::{AuditEvent, AuditLog};
use crate::{Artifact, ArtifactKind, InvoiceRecord, NewComplement, Store, StoreError};
use cfdi_core::catalog::{FiscalDefaults, CFDI_USE_PAYMENTS};
use cfdi_core::complement::DATE_FORMAT;
use cfdi_core::parsing::{compute_sha256_hex, Field};
use cfdi_core::{
    normalize, CfdiError, Extractor, FallbackPolicy, FiscalContext, FiscalWarning,
    PaymentComplement, PaymentParams,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use stamping::{stamp_complement, StampError, StampingClient};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{0}")]
    NotFound(String),

    #[error("invoice {0} is already paid")]
    AlreadyPaid(u64),

    #[error("an invoice with UUID {0} already exists")]
    DuplicateUuid(String),

    #[error("invoice could not be read: {0}")]
    Extraction(#[from] CfdiError),

    #[error("stamping failed: {0}")]
    Stamp(#[from] StampError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => WorkflowError::NotFound(e.to_string()),
            StoreError::AlreadyPaid(id) => WorkflowError::AlreadyPaid(id),
            StoreError::DuplicateUuid(uuid) => WorkflowError::DuplicateUuid(uuid),
            other => WorkflowError::Store(other),
        }
    }
}

impl WorkflowError {
    /// Status a front end should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            WorkflowError::NotFound(_) => 404,
            WorkflowError::AlreadyPaid(_) | WorkflowError::DuplicateUuid(_) => 409,
            WorkflowError::Extraction(_) | WorkflowError::Stamp(StampError::Render(_)) => 422,
            WorkflowError::Stamp(_) => 502,
            WorkflowError::Store(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub defaults: FiscalDefaults,
    pub policy: FallbackPolicy,
    pub audit_log: PathBuf,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            defaults: FiscalDefaults::default(),
            policy: FallbackPolicy::GenerateDefaults,
            audit_log: PathBuf::from("audit.jsonl"),
        }
    }
}

/// Receiver fiscal data supplied with a complement request. Anything left
/// out comes from the configured defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalOverrides {
    pub expedition_place: Option<String>,
    pub receiver_tax_zip_code: Option<String>,
    pub fiscal_regime_code: Option<String>,
    pub cfdi_use_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplementRequest {
    pub invoice_id: u64,
    #[serde(default)]
    pub payment: PaymentParams,
    #[serde(default)]
    pub fiscal: FiscalOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Uploaded {
    pub record: InvoiceRecord,
    /// Fields that were not found in the document and got generated.
    pub defaulted: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub complement: PaymentComplement,
    pub warnings: Vec<FiscalWarning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplementSummary {
    pub id: u64,
    pub invoice_id: u64,
    pub invoice_uuid: String,
    pub external_id: String,
    pub fiscal_uuid: String,
    pub status: &'static str,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub pdf_file: Option<String>,
    pub xml_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceListing {
    pub record: InvoiceRecord,
    pub complement: Option<PaymentComplement>,
}

pub struct Workflow {
    store: Store,
    client: Arc<dyn StampingClient + 'static>,
    extractor: Extractor,
    defaults: FiscalDefaults,
    audit: AuditLog,
}

impl Workflow {
    pub fn new(store: Store, client: Arc<dyn StampingClient + 'static>, settings: WorkflowSettings) -> Self {
        Self {
            store,
            client,
            extractor: Extractor::new(settings.policy),
            defaults: settings.defaults,
            audit: AuditLog::new(settings.audit_log),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn upload(&self, content: &[u8]) -> Result<Uploaded> {
        let upload_key = self.store.save_upload(content)?;
        let extraction = self.extractor.extract(content).map_err(|e| {
            tracing::warn!(upload_key = %upload_key, error = %e, "upload rejected");
            e
        })?;
        let record = self
            .store
            .create_invoice(extraction.invoice, Some(upload_key))?;

        let hash = compute_sha256_hex(&String::from_utf8_lossy(content));
        self.audit.record(
            AuditEvent::new("invoice_uploaded")
                .with_invoice(record.id, &record.invoice.uuid)
                .with_hash(hash),
        );

        Ok(Uploaded {
            record,
            defaulted: extraction.defaulted,
        })
    }

    fn fiscal_context(&self, record: &InvoiceRecord, overrides: &FiscalOverrides) -> FiscalContext {
        let receiver_rfc = record.invoice.receiver_rfc.clone();
        let default_regime = if cfdi_core::models::is_generic_rfc(&receiver_rfc) {
            &self.defaults.receiver_fiscal_regime_generic
        } else {
            &self.defaults.receiver_fiscal_regime_normal
        };
        FiscalContext {
            receiver_rfc,
            expedition_place: overrides
                .expedition_place
                .clone()
                .unwrap_or_else(|| self.defaults.expedition_place.clone()),
            receiver_tax_zip_code: overrides
                .receiver_tax_zip_code
                .clone()
                .unwrap_or_else(|| self.defaults.receiver_tax_zip_code.clone()),
            fiscal_regime_code: overrides
                .fiscal_regime_code
                .clone()
                .unwrap_or_else(|| default_regime.clone()),
            cfdi_use_code: overrides
                .cfdi_use_code
                .clone()
                .unwrap_or_else(|| CFDI_USE_PAYMENTS.to_string()),
        }
    }

    /// Stamp and persist the payment complement settling one invoice.
    ///
    /// Nothing is written when the provider fails. A paid invoice is
    /// rejected before any remote call.
    pub async fn generate_complement(&self, request: ComplementRequest) -> Result<Generated> {
        let record = self.store.get_invoice(request.invoice_id)?;
        if record.invoice.paid {
            return Err(WorkflowError::AlreadyPaid(record.id));
        }

        let normalized = normalize(self.fiscal_context(&record, &request.fiscal), &self.defaults);
        for warning in &normalized.warnings {
            tracing::warn!(invoice_id = record.id, field = warning.field, "{}", warning.message);
        }

        let stamped = match stamp_complement(
            self.client.as_ref(),
            &record.invoice,
            &request.payment,
            &normalized.context,
        )
        .await
        {
            Ok(stamped) => stamped,
            Err(e) => {
                tracing::error!(invoice_id = record.id, error = %e, "payment complement failed");
                self.audit.record(
                    AuditEvent::new("complement_failed")
                        .with_invoice(record.id, &record.invoice.uuid)
                        .with_error(e.to_string()),
                );
                return Err(e.into());
            }
        };

        let payment = stamped.payload.payment();
        let new = NewComplement {
            amount: payment.map(|p| p.amount).unwrap_or(record.invoice.total),
            payment_date: payment
                .and_then(|p| NaiveDateTime::parse_from_str(&p.date, DATE_FORMAT).ok())
                .unwrap_or_else(|| Utc::now().naive_utc()),
            payment_method_code: payment
                .map(|p| p.payment_form.clone())
                .unwrap_or_default(),
            currency: stamped.payload.currency.clone(),
            external_id: stamped.external_id,
            fiscal_uuid: stamped.fiscal_uuid,
            provider_uuid: stamped.provider_uuid,
            pdf_blob: stamped.pdf_blob,
            xml_content: stamped.xml_content,
        };
        let complement = self.store.record_complement(record.id, new)?;

        self.audit.record(
            AuditEvent::new("complement_stamped")
                .with_invoice(record.id, &record.invoice.uuid)
                .with_complement(complement.id, &complement.external_id, &complement.fiscal_uuid),
        );

        Ok(Generated {
            complement,
            warnings: normalized.warnings,
        })
    }

    pub fn download(&self, complement_id: u64, kind: ArtifactKind) -> Result<Artifact> {
        Ok(self.store.artifact(complement_id, kind)?)
    }

    pub fn summary(&self, complement_id: u64) -> Result<ComplementSummary> {
        let complement = self.store.get_complement(complement_id)?;
        let invoice = self.store.get_invoice(complement.invoice_id)?;
        Ok(ComplementSummary {
            id: complement.id,
            invoice_id: complement.invoice_id,
            invoice_uuid: invoice.invoice.uuid,
            pdf_file: complement
                .pdf_blob
                .as_ref()
                .map(|_| ArtifactKind::Pdf.file_name(&complement.external_id)),
            xml_file: complement
                .xml_content
                .as_ref()
                .map(|_| ArtifactKind::Xml.file_name(&complement.external_id)),
            external_id: complement.external_id,
            fiscal_uuid: complement.fiscal_uuid,
            status: "generated",
            amount: complement.amount,
            currency: complement.currency,
            created_at: complement.created_at,
        })
    }

    /// Invoices newest first, each with its complement if one exists.
    pub fn list(&self) -> Result<Vec<InvoiceListing>> {
        self.store
            .list_invoices()?
            .into_iter()
            .map(|record| {
                let complement = self.store.complement_for_invoice(record.id)?;
                Ok(InvoiceListing { record, complement })
            })
            .collect()
    }
}
