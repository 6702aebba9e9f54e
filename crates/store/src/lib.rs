//! Persistent invoices, payment complements and raw uploads on sled.

pub mod audit;
pub mod workflow;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use cfdi_core::{Invoice, PaymentComplement};
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub use audit::{AuditEvent, AuditLog};
pub use workflow::{Workflow, WorkflowError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invoice {0} already has a payment complement")]
    AlreadyPaid(u64),

    #[error("an invoice with UUID {0} already exists")]
    DuplicateUuid(String),

    #[error("corrupt stored artifact: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    fn not_found(kind: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

fn abort<T>(e: StoreError) -> std::result::Result<T, ConflictableTransactionError<StoreError>> {
    Err(ConflictableTransactionError::Abort(e))
}

fn tx_error(e: TransactionError<StoreError>) -> StoreError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}

fn key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: u64,
    pub invoice: Invoice,
    /// Key of the raw XML in the uploads tree.
    pub upload_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Provider result to persist against an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct NewComplement {
    pub external_id: String,
    pub fiscal_uuid: String,
    /// Fiscal UUID of an ingress CFDI stamped for the invoice.
    pub provider_uuid: Option<String>,
    pub pdf_blob: Option<String>,
    pub xml_content: Option<String>,
    pub amount: Decimal,
    pub payment_date: NaiveDateTime,
    pub payment_method_code: String,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Pdf,
    Xml,
}

impl ArtifactKind {
    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "application/pdf",
            ArtifactKind::Xml => "application/xml",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Xml => "xml",
        }
    }

    pub fn file_name(&self, external_id: &str) -> String {
        format!("complemento_pago_{}.{}", external_id, self.extension())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(ArtifactKind::Pdf),
            "xml" => Ok(ArtifactKind::Xml),
            other => Err(format!("unknown artifact format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub content_type: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct Store {
    db: Db,
    invoices: Tree,
    invoice_uuids: Tree,
    complements: Tree,
    complement_by_invoice: Tree,
    uploads: Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store removed on drop.
    pub fn temporary() -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            invoices: db.open_tree("invoices")?,
            invoice_uuids: db.open_tree("invoice_uuids")?,
            complements: db.open_tree("complements")?,
            complement_by_invoice: db.open_tree("complement_by_invoice")?,
            uploads: db.open_tree("uploads")?,
            db,
        })
    }

    fn generate_id(&self) -> Result<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    /// Keep the raw upload; returns its timestamp key.
    pub fn save_upload(&self, content: &[u8]) -> Result<String> {
        let upload_key = format!(
            "{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            self.generate_id()?
        );
        self.uploads.insert(upload_key.as_bytes(), content)?;
        self.db.flush()?;
        tracing::debug!(upload_key = %upload_key, size = content.len(), "upload stored");
        Ok(upload_key)
    }

    pub fn upload(&self, upload_key: &str) -> Result<Vec<u8>> {
        self.uploads
            .get(upload_key.as_bytes())?
            .map(|v| v.to_vec())
            .ok_or_else(|| StoreError::not_found("upload", upload_key))
    }

    pub fn create_invoice(&self, invoice: Invoice, upload_key: Option<String>) -> Result<InvoiceRecord> {
        let record = InvoiceRecord {
            id: self.generate_id()?,
            invoice,
            upload_key,
            created_at: Utc::now(),
        };
        let id_key = key(record.id);
        let bytes = serde_json::to_vec(&record)?;
        let uuid = record.invoice.uuid.clone();

        (&self.invoices, &self.invoice_uuids)
            .transaction(|(invoices, uuids)| {
                if uuids.get(uuid.as_bytes())?.is_some() {
                    return abort(StoreError::DuplicateUuid(uuid.clone()));
                }
                invoices.insert(&id_key[..], bytes.clone())?;
                uuids.insert(uuid.as_bytes(), &id_key[..])?;
                Ok(())
            })
            .map_err(tx_error)?;
        self.db.flush()?;

        tracing::info!(invoice_id = record.id, uuid = %record.invoice.uuid, "invoice stored");
        Ok(record)
    }

    pub fn get_invoice(&self, id: u64) -> Result<InvoiceRecord> {
        let bytes = self
            .invoices
            .get(key(id))?
            .ok_or_else(|| StoreError::not_found("invoice", id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn find_invoice_by_uuid(&self, uuid: &str) -> Result<Option<InvoiceRecord>> {
        match self.invoice_uuids.get(uuid.as_bytes())? {
            Some(id_key) => {
                let bytes = self
                    .invoices
                    .get(id_key)?
                    .ok_or_else(|| StoreError::not_found("invoice", uuid))?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn list_invoices(&self) -> Result<Vec<InvoiceRecord>> {
        let mut out = Vec::new();
        for item in self.invoices.iter().rev() {
            let (_k, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    /// Persist a stamped complement and mark its invoice paid, atomically.
    pub fn record_complement(&self, invoice_id: u64, new: NewComplement) -> Result<PaymentComplement> {
        let complement = PaymentComplement {
            id: self.generate_id()?,
            invoice_id,
            external_id: new.external_id,
            fiscal_uuid: new.fiscal_uuid,
            pdf_blob: new.pdf_blob,
            xml_content: new.xml_content,
            amount: new.amount,
            payment_date: new.payment_date,
            payment_method_code: new.payment_method_code,
            currency: new.currency,
            created_at: Utc::now(),
        };
        let invoice_key = key(invoice_id);
        let complement_key = key(complement.id);
        let complement_bytes = serde_json::to_vec(&complement)?;
        let provider_uuid = new.provider_uuid;

        (&self.invoices, &self.complements, &self.complement_by_invoice)
            .transaction(|(invoices, complements, by_invoice)| {
                let Some(bytes) = invoices.get(&invoice_key[..])? else {
                    return abort(StoreError::not_found("invoice", invoice_id));
                };
                let mut record: InvoiceRecord = match serde_json::from_slice(&bytes) {
                    Ok(r) => r,
                    Err(e) => return abort(e.into()),
                };
                if record.invoice.paid || by_invoice.get(&invoice_key[..])?.is_some() {
                    return abort(StoreError::AlreadyPaid(invoice_id));
                }

                record.invoice.paid = true;
                if provider_uuid.is_some() {
                    record.invoice.provider_uuid = provider_uuid.clone();
                }
                let updated = match serde_json::to_vec(&record) {
                    Ok(b) => b,
                    Err(e) => return abort(e.into()),
                };

                invoices.insert(&invoice_key[..], updated)?;
                complements.insert(&complement_key[..], complement_bytes.clone())?;
                by_invoice.insert(&invoice_key[..], &complement_key[..])?;
                Ok(())
            })
            .map_err(tx_error)?;
        self.db.flush()?;

        tracing::info!(
            invoice_id,
            complement_id = complement.id,
            fiscal_uuid = %complement.fiscal_uuid,
            "payment complement recorded"
        );
        Ok(complement)
    }

    pub fn get_complement(&self, id: u64) -> Result<PaymentComplement> {
        let bytes = self
            .complements
            .get(key(id))?
            .ok_or_else(|| StoreError::not_found("payment complement", id))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn complement_for_invoice(&self, invoice_id: u64) -> Result<Option<PaymentComplement>> {
        let Some(complement_key) = self.complement_by_invoice.get(key(invoice_id))? else {
            return Ok(None);
        };
        let bytes = self
            .complements
            .get(complement_key)?
            .ok_or_else(|| StoreError::not_found("payment complement for invoice", invoice_id))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Newest first.
    pub fn list_complements(&self) -> Result<Vec<PaymentComplement>> {
        let mut out = Vec::new();
        for item in self.complements.iter().rev() {
            let (_k, v) = item?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    pub fn artifact(&self, complement_id: u64, kind: ArtifactKind) -> Result<Artifact> {
        let complement = self.get_complement(complement_id)?;
        let bytes = match kind {
            ArtifactKind::Pdf => {
                let blob = complement
                    .pdf_blob
                    .as_deref()
                    .ok_or_else(|| StoreError::not_found("PDF for complement", complement_id))?;
                STANDARD
                    .decode(blob)
                    .map_err(|e| StoreError::Decode(e.to_string()))?
            }
            ArtifactKind::Xml => complement
                .xml_content
                .clone()
                .ok_or_else(|| StoreError::not_found("XML for complement", complement_id))?
                .into_bytes(),
        };

        Ok(Artifact {
            content_type: kind.content_type(),
            file_name: kind.file_name(&complement.external_id),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn invoice(uuid: &str) -> Invoice {
        Invoice {
            uuid: uuid.to_string(),
            customer: "Acme SA".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            subtotal: dec!(100.00),
            total: dec!(116.00),
            issuer_rfc: "AAA010101AAA".to_string(),
            receiver_rfc: "XAXX010101000".to_string(),
            paid: false,
            provider_uuid: None,
        }
    }

    fn stamped(pdf: Option<&[u8]>) -> NewComplement {
        NewComplement {
            external_id: "MOCK-CP-0123456789".to_string(),
            fiscal_uuid: "0A0B0C0D-1111-4222-8333-444455556666".to_string(),
            provider_uuid: Some("FFFFFFFF-0000-4000-8000-000000000001".to_string()),
            pdf_blob: pdf.map(|b| STANDARD.encode(b)),
            xml_content: Some("<cfdi:Comprobante/>".to_string()),
            amount: dec!(116.00),
            payment_date: NaiveDate::from_ymd_opt(2024, 2, 1)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .unwrap(),
            payment_method_code: "03".to_string(),
            currency: "MXN".to_string(),
        }
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let store = Store::temporary().unwrap();
        store.create_invoice(invoice("U-1"), None).unwrap();
        let err = store.create_invoice(invoice("U-1"), None).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUuid(ref u) if u == "U-1"));
        assert_eq!(store.list_invoices().unwrap().len(), 1);
    }

    #[test]
    fn listing_is_newest_first() {
        let store = Store::temporary().unwrap();
        let a = store.create_invoice(invoice("U-1"), None).unwrap();
        let b = store.create_invoice(invoice("U-2"), None).unwrap();
        let ids: Vec<u64> = store.list_invoices().unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
        assert_eq!(
            store.find_invoice_by_uuid("U-2").unwrap().map(|r| r.id),
            Some(b.id)
        );
    }

    #[test]
    fn complement_flips_paid_and_keeps_provider_uuid() {
        let store = Store::temporary().unwrap();
        let rec = store.create_invoice(invoice("U-1"), None).unwrap();
        let complement = store.record_complement(rec.id, stamped(Some(b"%PDF".as_slice()))).unwrap();

        let after = store.get_invoice(rec.id).unwrap();
        assert!(after.invoice.paid);
        assert_eq!(
            after.invoice.provider_uuid.as_deref(),
            Some("FFFFFFFF-0000-4000-8000-000000000001")
        );
        assert_eq!(store.complement_for_invoice(rec.id).unwrap(), Some(complement));
    }

    #[test]
    fn second_complement_is_rejected_atomically() {
        let store = Store::temporary().unwrap();
        let rec = store.create_invoice(invoice("U-1"), None).unwrap();
        store.record_complement(rec.id, stamped(None)).unwrap();

        let err = store.record_complement(rec.id, stamped(None)).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyPaid(id) if id == rec.id));
        assert_eq!(store.list_complements().unwrap().len(), 1);
    }

    #[test]
    fn complement_for_unknown_invoice_is_not_found() {
        let store = Store::temporary().unwrap();
        let err = store.record_complement(42, stamped(None)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "invoice", .. }));
        assert!(store.list_complements().unwrap().is_empty());
    }

    #[test]
    fn artifacts_decode_and_name() {
        let store = Store::temporary().unwrap();
        let rec = store.create_invoice(invoice("U-1"), None).unwrap();
        let c = store.record_complement(rec.id, stamped(Some(b"%PDF-1.4".as_slice()))).unwrap();

        let pdf = store.artifact(c.id, ArtifactKind::Pdf).unwrap();
        assert_eq!(pdf.content_type, "application/pdf");
        assert_eq!(pdf.bytes, b"%PDF-1.4");
        assert_eq!(pdf.file_name, "complemento_pago_MOCK-CP-0123456789.pdf");

        let xml = store.artifact(c.id, ArtifactKind::Xml).unwrap();
        assert_eq!(xml.content_type, "application/xml");
        assert_eq!(xml.bytes, b"<cfdi:Comprobante/>");
    }

    #[test]
    fn missing_pdf_is_not_found() {
        let store = Store::temporary().unwrap();
        let rec = store.create_invoice(invoice("U-1"), None).unwrap();
        let c = store.record_complement(rec.id, stamped(None)).unwrap();
        assert!(matches!(
            store.artifact(c.id, ArtifactKind::Pdf),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.artifact(c.id + 100, ArtifactKind::Xml),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn uploads_round_trip() {
        let store = Store::temporary().unwrap();
        let k = store.save_upload(b"<xml/>").unwrap();
        assert_eq!(store.upload(&k).unwrap(), b"<xml/>");
        assert!(matches!(store.upload("nope"), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn artifact_kind_parses() {
        assert_eq!("PDF".parse::<ArtifactKind>().unwrap(), ArtifactKind::Pdf);
        assert_eq!("xml".parse::<ArtifactKind>().unwrap(), ArtifactKind::Xml);
        assert!("zip".parse::<ArtifactKind>().is_err());
    }
}
