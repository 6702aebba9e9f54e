use anyhow::{Context, Result};
use cfdi_core::{FallbackPolicy, FiscalDefaults};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "cfdi-pagos";
const KEYCHAIN_SERVICE: &str = "mx.cfdi-pagos.credentials";

/// Keychain entry holding the provider password.
pub const PROVIDER_PASSWORD_KEY: &str = "facturama_password";
/// Takes precedence over the keychain when set.
pub const PROVIDER_PASSWORD_ENV: &str = "FACTURAMA_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub fiscal: FiscalConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mock,
    Facturama,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_base_url(),
            username: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://apisandbox.facturama.mx".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    60
}

/// Issuer-side values substituted when a request leaves them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalConfig {
    #[serde(default = "default_zip")]
    pub expedition_place: String,
    #[serde(default = "default_zip")]
    pub receiver_tax_zip_code: String,
}

impl Default for FiscalConfig {
    fn default() -> Self {
        Self {
            expedition_place: default_zip(),
            receiver_tax_zip_code: default_zip(),
        }
    }
}

fn default_zip() -> String {
    FiscalDefaults::default().expedition_place
}

impl FiscalConfig {
    pub fn defaults(&self) -> FiscalDefaults {
        FiscalDefaults {
            expedition_place: self.expedition_place.clone(),
            receiver_tax_zip_code: self.receiver_tax_zip_code.clone(),
            ..FiscalDefaults::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Generate values for fields missing from an upload instead of
    /// rejecting it.
    #[serde(default = "default_true")]
    pub lenient_defaults: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            lenient_defaults: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl ExtractionConfig {
    pub fn policy(&self) -> FallbackPolicy {
        if self.lenient_defaults {
            FallbackPolicy::GenerateDefaults
        } else {
            FallbackPolicy::FailClosed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Relative paths resolve against `data_dir`.
    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            audit_log: default_audit_log(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".cfdi_pagos")
}

fn default_audit_log() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        if self.audit_log.is_absolute() {
            self.audit_log.clone()
        } else {
            self.data_dir.join(&self.audit_log)
        }
    }
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

pub fn load_path(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let cfg: AppConfig = confy::load_path(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(cfg)
}

pub fn store_path(path: impl AsRef<Path>, cfg: &AppConfig) -> Result<()> {
    let path = path.as_ref();
    confy::store_path(path, cfg)
        .with_context(|| format!("Failed to store config to {}", path.display()))?;
    Ok(())
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

/// Provider password from the environment, falling back to the keychain.
pub fn provider_password() -> Result<String> {
    match std::env::var(PROVIDER_PASSWORD_ENV) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => get_secret(PROVIDER_PASSWORD_KEY).with_context(|| {
            format!("Provider password not found; set {PROVIDER_PASSWORD_ENV} or store it in the keychain")
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.provider.kind, ProviderKind::Mock);
        assert_eq!(cfg.provider.base_url, "https://apisandbox.facturama.mx");
        assert_eq!(cfg.provider.connect_timeout_secs, 30);
        assert_eq!(cfg.provider.read_timeout_secs, 60);
        assert_eq!(cfg.fiscal.defaults(), FiscalDefaults::default());
        assert_eq!(cfg.extraction.policy(), FallbackPolicy::GenerateDefaults);
        assert_eq!(cfg.storage.audit_log_path(), PathBuf::from(".cfdi_pagos/audit.jsonl"));
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfdi-pagos.toml");

        let mut cfg = AppConfig::default();
        cfg.provider.kind = ProviderKind::Facturama;
        cfg.provider.username = Some("pruebas".to_string());
        cfg.fiscal.expedition_place = "11590".to_string();
        cfg.extraction.lenient_defaults = false;
        store_path(&path, &cfg).unwrap();

        let loaded = load_path(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.extraction.policy(), FallbackPolicy::FailClosed);
        assert_eq!(loaded.fiscal.defaults().expedition_place, "11590");
    }

    #[test]
    fn missing_sections_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[provider]\nkind = \"facturama\"\nusername = \"demo\"\n").unwrap();

        let loaded = load_path(&path).unwrap();
        assert_eq!(loaded.provider.kind, ProviderKind::Facturama);
        assert_eq!(loaded.provider.read_timeout_secs, 60);
        assert_eq!(loaded.fiscal, FiscalConfig::default());
        assert!(loaded.extraction.lenient_defaults);
    }

    #[test]
    fn absolute_audit_log_is_kept() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("data"),
            audit_log: PathBuf::from("/var/log/cfdi.jsonl"),
        };
        assert_eq!(storage.audit_log_path(), PathBuf::from("/var/log/cfdi.jsonl"));
        assert_eq!(storage.db_path(), PathBuf::from("data/db"));
    }
}
