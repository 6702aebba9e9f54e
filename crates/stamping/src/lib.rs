//! Remote stamping of CFDI payloads.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cfdi_core::{
    build_ingress, build_payment_complement, CfdiError, CfdiPayload, FiscalContext, Invoice,
    PaymentParams,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod facturama;
pub mod mock;

#[derive(Debug, Error)]
pub enum StampError {
    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider did not answer in time")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("provider response carries no fiscal UUID")]
    MissingFiscalUuid,

    /// The ingress CFDI could not be stamped, so no payment was sent.
    #[error("ingress CFDI was not stamped: {0}")]
    Ingress(#[source] Box<StampError>),

    #[error(transparent)]
    Render(#[from] CfdiError),
}

impl From<reqwest::Error> for StampError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StampError::Timeout
        } else if e.is_decode() {
            StampError::InvalidResponse(e.to_string())
        } else {
            StampError::Transport(e.to_string())
        }
    }
}

/// A CFDI accepted and stamped by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedCfdi {
    /// Provider-side document id.
    pub id: String,
    pub fiscal_uuid: String,
    /// XML echoed back by the provider, when it sends one.
    pub content: Option<String>,
}

#[async_trait]
pub trait StampingClient: Send + Sync {
    async fn create_cfdi(&self, payload: &CfdiPayload) -> Result<CreatedCfdi, StampError>;
    async fn fetch_pdf(&self, id: &str) -> Result<Vec<u8>, StampError>;
}

/// Result of [`stamp_complement`], ready to be persisted.
#[derive(Debug, Clone)]
pub struct StampedComplement {
    pub external_id: String,
    pub fiscal_uuid: String,
    /// Set when an ingress CFDI was stamped during this call.
    pub provider_uuid: Option<String>,
    /// Base64 PDF; `None` when the download failed.
    pub pdf_blob: Option<String>,
    pub xml_content: Option<String>,
    pub payload: CfdiPayload,
}

/// Stamp the payment complement for `invoice`.
///
/// An invoice that has never been stamped by the provider gets an ingress
/// CFDI first; its fiscal UUID becomes the related document of the
/// complement. A failed PDF download does not fail the call.
pub async fn stamp_complement(
    client: &dyn StampingClient,
    invoice: &Invoice,
    params: &PaymentParams,
    ctx: &FiscalContext,
) -> Result<StampedComplement, StampError> {
    let mut invoice = invoice.clone();
    let mut provider_uuid = None;

    if !invoice.has_provider_uuid() {
        let ingress = build_ingress(&invoice, ctx)?;
        let created = client
            .create_cfdi(&ingress)
            .await
            .map_err(|e| StampError::Ingress(Box::new(e)))?;
        tracing::info!(
            invoice_uuid = %invoice.uuid,
            fiscal_uuid = %created.fiscal_uuid,
            "ingress CFDI stamped"
        );
        invoice.provider_uuid = Some(created.fiscal_uuid.clone());
        provider_uuid = Some(created.fiscal_uuid);
    }

    let payload = build_payment_complement(&invoice, params, ctx)?;
    let created = client.create_cfdi(&payload).await?;
    tracing::info!(
        external_id = %created.id,
        fiscal_uuid = %created.fiscal_uuid,
        "payment complement stamped"
    );

    let pdf_blob = match client.fetch_pdf(&created.id).await {
        Ok(bytes) => Some(STANDARD.encode(bytes)),
        Err(e) => {
            tracing::warn!(external_id = %created.id, error = %e, "PDF download failed");
            None
        }
    };

    Ok(StampedComplement {
        external_id: created.id,
        fiscal_uuid: created.fiscal_uuid,
        provider_uuid,
        pdf_blob,
        xml_content: created.content,
        payload,
    })
}
