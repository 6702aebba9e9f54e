use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// RFC used for anonymous domestic buyers ("público en general").
pub const GENERIC_RFC_DOMESTIC: &str = "XAXX010101000";
/// RFC used for anonymous foreign buyers.
pub const GENERIC_RFC_FOREIGN: &str = "XEXX010101000";

pub fn is_generic_rfc(rfc: &str) -> bool {
    rfc == GENERIC_RFC_DOMESTIC || rfc == GENERIC_RFC_FOREIGN
}

/// Canonical invoice record extracted from an uploaded CFDI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// SAT fiscal folio taken from the uploaded document.
    pub uuid: String,
    pub customer: String,
    pub issue_date: NaiveDate,
    pub subtotal: Decimal,
    pub total: Decimal,
    pub issuer_rfc: String,
    pub receiver_rfc: String,
    #[serde(default)]
    pub paid: bool,
    /// Fiscal UUID assigned when the provider stamped an ingress CFDI for
    /// this invoice. `None` until the first complement request.
    #[serde(default)]
    pub provider_uuid: Option<String>,
}

impl Invoice {
    /// UUID the payment complement must reference.
    pub fn stamped_uuid(&self) -> &str {
        self.provider_uuid.as_deref().unwrap_or(&self.uuid)
    }

    pub fn has_provider_uuid(&self) -> bool {
        self.provider_uuid.is_some()
    }
}

/// Transient fiscal data for the receiver of a CFDI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalContext {
    pub receiver_rfc: String,
    /// Zip code where the CFDI is issued ("LugarExpedicion").
    pub expedition_place: String,
    pub receiver_tax_zip_code: String,
    pub fiscal_regime_code: String,
    pub cfdi_use_code: String,
}

impl FiscalContext {
    pub fn is_generic(&self) -> bool {
        is_generic_rfc(&self.receiver_rfc)
    }
}

/// Payment event data supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentParams {
    /// Defaults to the invoice total.
    pub amount: Option<Decimal>,
    /// SAT payment form ("FormaDePagoP"), e.g. "03" for wire transfer.
    pub payment_form: Option<String>,
    pub payment_date: Option<NaiveDateTime>,
    pub currency: Option<String>,
    pub exchange_rate: Option<Decimal>,
    /// Overrides the generated `CP-XXXXXXXX` folio.
    pub folio: Option<String>,
}

/// Stamped payment complement as persisted after a successful provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentComplement {
    pub id: u64,
    pub invoice_id: u64,
    /// Provider-side document id.
    pub external_id: String,
    pub fiscal_uuid: String,
    /// Base64 of the rendered PDF, if the provider returned one.
    pub pdf_blob: Option<String>,
    pub xml_content: Option<String>,
    pub amount: Decimal,
    pub payment_date: NaiveDateTime,
    pub payment_method_code: String,
    pub currency: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
