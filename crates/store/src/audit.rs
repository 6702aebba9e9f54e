use crate::StoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub invoice_id: Option<u64>,
    pub invoice_uuid: Option<String>,
    pub upload_hash: Option<String>,
    pub complement_id: Option<u64>,
    pub external_id: Option<String>,
    pub fiscal_uuid: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            invoice_id: None,
            invoice_uuid: None,
            upload_hash: None,
            complement_id: None,
            external_id: None,
            fiscal_uuid: None,
            error: None,
        }
    }

    pub fn with_invoice(mut self, id: u64, uuid: &str) -> Self {
        self.invoice_id = Some(id);
        self.invoice_uuid = Some(uuid.to_string());
        self
    }

    pub fn with_hash(mut self, hash: String) -> Self {
        self.upload_hash = Some(hash);
        self
    }

    pub fn with_complement(mut self, id: u64, external_id: &str, fiscal_uuid: &str) -> Self {
        self.complement_id = Some(id);
        self.external_id = Some(external_id.to_string());
        self.fiscal_uuid = Some(fiscal_uuid.to_string());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Append-only JSONL audit trail.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, event: &AuditEvent) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(event_type = %event.event_type, invoice_id = ?event.invoice_id, "Audit event written");
        Ok(())
    }

    /// Write and only log a failure; the audit trail never fails a request.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(&event) {
            tracing::warn!(event_type = %event.event_type, error = %e, "audit event not written");
        }
    }

    pub fn read_all(&self) -> Result<Vec<AuditEvent>, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(StoreError::from))
            .collect()
    }
}
