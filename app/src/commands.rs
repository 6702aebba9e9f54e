use anyhow::{Context, Result};
use cfdi_core::catalog::{self, Catalog};
use cfdi_core::PaymentParams;
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Args, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use store::workflow::{ComplementRequest, FiscalOverrides};
use store::{ArtifactKind, Workflow, WorkflowError};
use walkdir::WalkDir;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn request_error(e: WorkflowError) -> anyhow::Error {
    let status = e.http_status();
    anyhow::Error::new(e).context(format!("request failed ({status})"))
}

/// Every `.xml` file under `dir`, sorted by path.
pub fn scan_folder(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    let mut result = Vec::new();
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let p = entry.path();
            if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
                if ext.eq_ignore_ascii_case("xml") {
                    result.push(p.to_path_buf());
                }
            }
        }
    }
    result.sort();
    Ok(result)
}

#[derive(Args)]
pub struct UploadArgs {
    /// CFDI file or directory
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct UploadReport {
    path: String,
    invoice_id: Option<u64>,
    uuid: Option<String>,
    defaulted: Vec<&'static str>,
    error: Option<String>,
}

pub fn upload(workflow: &Workflow, args: UploadArgs) -> Result<()> {
    let paths = if args.path.is_dir() {
        scan_folder(&args.path)?
    } else {
        vec![args.path]
    };

    let mut reports = Vec::new();
    for p in paths {
        let content = std::fs::read(&p).with_context(|| format!("Failed to read {}", p.display()))?;
        let report = match workflow.upload(&content) {
            Ok(uploaded) => {
                tracing::info!(invoice_id = uploaded.record.id, path = %p.display(), "uploaded invoice");
                UploadReport {
                    path: p.display().to_string(),
                    invoice_id: Some(uploaded.record.id),
                    uuid: Some(uploaded.record.invoice.uuid),
                    defaulted: uploaded.defaulted.iter().map(|f| f.as_str()).collect(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(path = %p.display(), error = %e, "upload failed");
                UploadReport {
                    path: p.display().to_string(),
                    invoice_id: None,
                    uuid: None,
                    defaulted: Vec::new(),
                    error: Some(format!("{} ({})", e, e.http_status())),
                }
            }
        };
        reports.push(report);
    }
    print_json(&reports)
}

pub fn list(workflow: &Workflow) -> Result<()> {
    let listing = workflow.list().map_err(request_error)?;
    print_json(&listing)
}

fn parse_payment_date(raw: &str) -> std::result::Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS, got {raw:?}"))
}

#[derive(Args)]
pub struct PayArgs {
    invoice_id: u64,

    /// Amount paid; defaults to the invoice total
    #[arg(long)]
    amount: Option<Decimal>,

    /// SAT payment form, e.g. 03 for wire transfer
    #[arg(long)]
    payment_form: Option<String>,

    /// Payment date (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
    #[arg(long, value_parser = parse_payment_date)]
    date: Option<NaiveDateTime>,

    #[arg(long)]
    currency: Option<String>,

    #[arg(long)]
    exchange_rate: Option<Decimal>,

    #[arg(long)]
    folio: Option<String>,

    #[arg(long)]
    expedition_place: Option<String>,

    #[arg(long)]
    tax_zip_code: Option<String>,

    #[arg(long)]
    fiscal_regime: Option<String>,

    #[arg(long)]
    cfdi_use: Option<String>,
}

impl From<PayArgs> for ComplementRequest {
    fn from(args: PayArgs) -> Self {
        ComplementRequest {
            invoice_id: args.invoice_id,
            payment: PaymentParams {
                amount: args.amount,
                payment_form: args.payment_form,
                payment_date: args.date,
                currency: args.currency,
                exchange_rate: args.exchange_rate,
                folio: args.folio,
            },
            fiscal: FiscalOverrides {
                expedition_place: args.expedition_place,
                receiver_tax_zip_code: args.tax_zip_code,
                fiscal_regime_code: args.fiscal_regime,
                cfdi_use_code: args.cfdi_use,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct PayReport {
    complement_id: u64,
    invoice_id: u64,
    external_id: String,
    fiscal_uuid: String,
    amount: Decimal,
    warnings: Vec<String>,
}

pub async fn pay(workflow: &Workflow, args: PayArgs) -> Result<()> {
    let generated = workflow
        .generate_complement(args.into())
        .await
        .map_err(request_error)?;
    let c = generated.complement;
    print_json(&PayReport {
        complement_id: c.id,
        invoice_id: c.invoice_id,
        external_id: c.external_id,
        fiscal_uuid: c.fiscal_uuid,
        amount: c.amount,
        warnings: generated.warnings.iter().map(|w| w.to_string()).collect(),
    })
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Format {
    Pdf,
    Xml,
}

impl From<Format> for ArtifactKind {
    fn from(f: Format) -> Self {
        match f {
            Format::Pdf => ArtifactKind::Pdf,
            Format::Xml => ArtifactKind::Xml,
        }
    }
}

#[derive(Args)]
pub struct DownloadArgs {
    complement_id: u64,

    #[arg(value_enum)]
    format: Format,

    /// Output file; defaults to the provider file name in the current directory
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub fn download(workflow: &Workflow, args: DownloadArgs) -> Result<()> {
    let artifact = workflow
        .download(args.complement_id, args.format.into())
        .map_err(request_error)?;
    let path = args.output.unwrap_or_else(|| PathBuf::from(&artifact.file_name));
    std::fs::write(&path, &artifact.bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), content_type = artifact.content_type, "artifact written");
    Ok(())
}

#[derive(Args)]
pub struct ShowArgs {
    complement_id: u64,
}

pub fn show(workflow: &Workflow, args: ShowArgs) -> Result<()> {
    let summary = workflow.summary(args.complement_id).map_err(request_error)?;
    print_json(&summary)
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CatalogName {
    Regimes,
    PaymentForms,
    PaymentMethods,
    CfdiUses,
}

impl From<CatalogName> for Catalog {
    fn from(name: CatalogName) -> Self {
        match name {
            CatalogName::Regimes => Catalog::FiscalRegime,
            CatalogName::PaymentForms => Catalog::PaymentForm,
            CatalogName::PaymentMethods => Catalog::PaymentMethod,
            CatalogName::CfdiUses => Catalog::CfdiUse,
        }
    }
}

#[derive(Args)]
pub struct CatalogArgs {
    /// Only this catalog
    #[arg(value_enum)]
    name: Option<CatalogName>,
}

pub fn catalog(args: CatalogArgs) -> Result<()> {
    let selected: Vec<Catalog> = match args.name {
        Some(name) => vec![name.into()],
        None => Catalog::ALL.to_vec(),
    };
    for c in selected {
        println!("{}", c.title());
        for (code, label) in catalog::entries(c) {
            println!("  {code:<5} {label}");
        }
    }
    Ok(())
}

#[derive(Args)]
pub struct CredentialsArgs {
    #[command(subcommand)]
    action: CredentialsAction,
}

#[derive(Subcommand)]
enum CredentialsAction {
    /// Store the provider password
    Set { password: String },
    /// Remove the stored provider password
    Delete,
}

pub fn credentials(args: CredentialsArgs) -> Result<()> {
    match args.action {
        CredentialsAction::Set { password } => {
            config::store_secret(config::PROVIDER_PASSWORD_KEY, &password)?;
            tracing::info!("Provider password stored in keychain");
        }
        CredentialsAction::Delete => {
            config::delete_secret(config::PROVIDER_PASSWORD_KEY)?;
            tracing::info!("Provider password removed from keychain");
        }
    }
    Ok(())
}
