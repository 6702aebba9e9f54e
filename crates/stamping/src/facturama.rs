use super::{CreatedCfdi, StampError, StampingClient};
use async_trait::async_trait;
use cfdi_core::CfdiPayload;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const SANDBOX_URL: &str = "https://apisandbox.facturama.mx";

#[derive(Debug, Clone)]
pub struct FacturamaSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub connect_timeout: Duration,
    /// Bound on the whole exchange once connected.
    pub read_timeout: Duration,
}

impl FacturamaSettings {
    pub fn new(base_url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct FacturamaClient {
    base_url: String,
    username: String,
    password: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: Option<String>,
    complement: Option<ResponseComplement>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseComplement {
    tax_stamp: Option<ResponseTaxStamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResponseTaxStamp {
    uuid: Option<String>,
}

impl FacturamaClient {
    pub fn new(settings: FacturamaSettings) -> Result<Arc<Self>, StampError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.read_timeout)
            .build()?;
        Ok(Arc::new(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            username: settings.username,
            password: settings.password,
            http_client,
        }))
    }

    async fn failure(resp: reqwest::Response) -> StampError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        tracing::error!(status, body = %body, "Facturama request failed");
        StampError::Http { status, body }
    }
}

#[async_trait]
impl StampingClient for FacturamaClient {
    async fn create_cfdi(&self, payload: &CfdiPayload) -> Result<CreatedCfdi, StampError> {
        let url = format!("{}/api/3/cfdis", self.base_url);

        let resp = self
            .http_client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(payload)
            .send()
            .await?;

        if !matches!(resp.status().as_u16(), 200 | 201) {
            return Err(Self::failure(resp).await);
        }

        let body = resp.text().await?;
        let created: CreateResponse = serde_json::from_str(&body)
            .map_err(|e| StampError::InvalidResponse(e.to_string()))?;

        let id = created
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StampError::InvalidResponse("missing Id".to_string()))?;
        let fiscal_uuid = created
            .complement
            .and_then(|c| c.tax_stamp)
            .and_then(|t| t.uuid)
            .filter(|u| !u.is_empty())
            .ok_or(StampError::MissingFiscalUuid)?;

        tracing::info!(id = %id, fiscal_uuid = %fiscal_uuid, serie = %payload.serie, "CFDI created in Facturama");

        Ok(CreatedCfdi {
            id,
            fiscal_uuid,
            content: created.content,
        })
    }

    async fn fetch_pdf(&self, id: &str) -> Result<Vec<u8>, StampError> {
        let url = format!("{}/api/lite/cfdi/{}/pdf", self.base_url, id);

        let resp = self
            .http_client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::failure(resp).await);
        }

        let bytes = resp.bytes().await?;
        tracing::debug!(id = %id, size = bytes.len(), "PDF downloaded");
        Ok(bytes.to_vec())
    }
}
