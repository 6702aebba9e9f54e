use super::{CreatedCfdi, StampError, StampingClient};
use async_trait::async_trait;
use cfdi_core::xml::{render_cfdi, TaxStamp};
use cfdi_core::CfdiPayload;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Offline provider that stamps everything it receives.
#[derive(Clone)]
pub struct MockClient {
    latency: Duration,
    rejection: Option<(u16, String)>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(200),
            rejection: None,
        }
    }
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    /// A provider that answers every create request with `status`.
    pub fn rejecting(status: u16, body: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::ZERO,
            rejection: Some((status, body.into())),
        })
    }
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
        .to_uppercase()
}

fn mock_pdf(id: &str) -> Vec<u8> {
    format!(
        "%PDF-1.4\n\
         1 0 obj <</Type /Catalog /Pages 2 0 R>> endobj\n\
         2 0 obj <</Type /Pages /Kids [] /Count 0>> endobj\n\
         % {id}\n\
         trailer <</Root 1 0 R>>\n\
         %%EOF\n"
    )
    .into_bytes()
}

#[async_trait]
impl StampingClient for MockClient {
    async fn create_cfdi(&self, payload: &CfdiPayload) -> Result<CreatedCfdi, StampError> {
        // simulate network latency
        sleep(self.latency).await;

        if let Some((status, body)) = &self.rejection {
            return Err(StampError::Http {
                status: *status,
                body: body.clone(),
            });
        }

        let id = format!("MOCK-{}-{}", payload.serie, random_suffix(10));
        let stamp = TaxStamp {
            uuid: uuid::Uuid::new_v4().to_string().to_uppercase(),
            stamped_at: chrono::Local::now().naive_local(),
        };
        let content = render_cfdi(payload, Some(&stamp))?;

        tracing::info!(id = %id, fiscal_uuid = %stamp.uuid, "mock CFDI stamped");

        Ok(CreatedCfdi {
            id,
            fiscal_uuid: stamp.uuid,
            content: Some(content),
        })
    }

    async fn fetch_pdf(&self, id: &str) -> Result<Vec<u8>, StampError> {
        Ok(mock_pdf(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_has_header_and_trailer() {
        let pdf = String::from_utf8(mock_pdf("MOCK-CP-ABC")).unwrap();
        assert!(pdf.starts_with("%PDF-1.4"));
        assert!(pdf.contains("MOCK-CP-ABC"));
        assert!(pdf.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn suffix_is_uppercase_alphanumeric() {
        let s = random_suffix(10);
        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
