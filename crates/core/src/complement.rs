//! Provider payloads for the ingress CFDI and the payment complement.
//!
//! Field names follow the provider's CFDI 4.0 JSON schema (API v3).

use chrono::{Local, NaiveDateTime};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalog::{
    CFDI_USE_NO_FISCAL_EFFECT, PAYMENT_FORM_TO_BE_DEFINED, PAYMENT_FORM_TRANSFER, REGIME_GENERIC,
    REGIME_NORMAL,
};
use crate::error::{CfdiError, Result};
use crate::models::{FiscalContext, Invoice, PaymentParams};
use crate::parsing::round_currency;

pub const DEFAULT_CURRENCY: &str = "MXN";
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// CFDI use sent on ingress invoices when the receiver has fiscal effects.
const INGRESS_CFDI_USE: &str = "G01";
const IVA_RATE: Decimal = Decimal::from_parts(16, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfdiType {
    /// Ingreso.
    #[serde(rename = "I")]
    Ingress,
    /// Pago.
    #[serde(rename = "P")]
    Payment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfdiPayload {
    pub name_id: u32,
    pub date: String,
    pub serie: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folio: Option<String>,
    pub currency: String,
    pub expedition_place: String,
    pub exportation: String,
    pub cfdi_type: CfdiType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_form: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    pub issuer: Issuer,
    pub receiver: Receiver,
    pub items: Vec<Item>,
    #[serde(rename = "Complemento", skip_serializing_if = "Option::is_none")]
    pub complement: Option<PaymentsComplement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Issuer {
    pub rfc: String,
    pub fiscal_regime: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Receiver {
    pub rfc: String,
    pub name: String,
    pub cfdi_use: String,
    pub tax_zip_code: String,
    pub fiscal_regime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub product_code: String,
    pub identification_number: String,
    pub description: String,
    pub unit: String,
    pub unit_code: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub unit_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub quantity: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    pub tax_object: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taxes: Vec<Tax>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tax {
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub base: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
    pub is_retention: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PaymentsComplement {
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payment {
    pub date: String,
    pub payment_form: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub exchange_rate: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub related_documents: Vec<RelatedDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelatedDocument {
    pub uuid: String,
    pub currency: String,
    pub payment_method: String,
    pub partiality_number: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub previous_balance_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_paid: Decimal,
    #[serde(rename = "ImpSaldoInsoluto", with = "rust_decimal::serde::float")]
    pub remaining_balance: Decimal,
    pub tax_object: String,
}

impl CfdiPayload {
    /// The single payment of a complement payload.
    pub fn payment(&self) -> Option<&Payment> {
        self.complement.as_ref().and_then(|c| c.payments.first())
    }
}

fn cfdi_use_for(ctx: &FiscalContext, requested: &str) -> String {
    if ctx.fiscal_regime_code == REGIME_GENERIC {
        CFDI_USE_NO_FISCAL_EFFECT.to_string()
    } else {
        requested.to_string()
    }
}

/// The uploaded invoice's issuer is the party receiving the payment.
fn issuer(invoice: &Invoice) -> Issuer {
    Issuer {
        rfc: invoice.issuer_rfc.clone(),
        fiscal_regime: REGIME_NORMAL.to_string(),
    }
}

fn receiver(invoice: &Invoice, ctx: &FiscalContext, cfdi_use: String) -> Receiver {
    Receiver {
        rfc: ctx.receiver_rfc.clone(),
        name: invoice.customer.clone(),
        cfdi_use,
        tax_zip_code: ctx.receiver_tax_zip_code.clone(),
        fiscal_regime: ctx.fiscal_regime_code.clone(),
    }
}

pub fn generate_folio() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("CP-{suffix}")
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Assemble the payment complement (CFDI type P) settling `invoice`.
///
/// `ctx` is expected to be normalized already. The related document
/// points at [`Invoice::stamped_uuid`].
pub fn build_payment_complement(
    invoice: &Invoice,
    params: &PaymentParams,
    ctx: &FiscalContext,
) -> Result<CfdiPayload> {
    let date = params.payment_date.unwrap_or_else(now).format(DATE_FORMAT).to_string();
    let currency = params
        .currency
        .clone()
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    let amount = params.amount.unwrap_or(invoice.total);
    let remaining_balance = invoice
        .total
        .checked_sub(amount)
        .ok_or(CfdiError::AmountOutOfRange(amount))?;

    let related = RelatedDocument {
        uuid: invoice.stamped_uuid().to_string(),
        currency: DEFAULT_CURRENCY.to_string(),
        payment_method: "PUE".to_string(),
        partiality_number: 1,
        previous_balance_amount: invoice.total,
        amount_paid: amount,
        remaining_balance,
        tax_object: "02".to_string(),
    };

    Ok(CfdiPayload {
        name_id: 1,
        date: date.clone(),
        serie: "CP".to_string(),
        folio: Some(params.folio.clone().unwrap_or_else(generate_folio)),
        currency: currency.clone(),
        expedition_place: ctx.expedition_place.clone(),
        exportation: "01".to_string(),
        cfdi_type: CfdiType::Payment,
        payment_form: None,
        payment_method: None,
        issuer: issuer(invoice),
        receiver: receiver(invoice, ctx, cfdi_use_for(ctx, &ctx.cfdi_use_code)),
        items: vec![Item {
            product_code: "84111506".to_string(),
            identification_number: "CP001".to_string(),
            description: "Pago".to_string(),
            unit: "ACT".to_string(),
            unit_code: "ACT".to_string(),
            unit_price: Decimal::ZERO,
            quantity: Decimal::ONE,
            subtotal: Decimal::ZERO,
            tax_object: "01".to_string(),
            taxes: Vec::new(),
            total: Decimal::ZERO,
        }],
        complement: Some(PaymentsComplement {
            payments: vec![Payment {
                date,
                payment_form: params
                    .payment_form
                    .clone()
                    .unwrap_or_else(|| PAYMENT_FORM_TRANSFER.to_string()),
                currency,
                exchange_rate: params.exchange_rate.unwrap_or(Decimal::ONE),
                amount,
                related_documents: vec![related],
            }],
        }),
    })
}

/// Assemble the ingress CFDI (type I) used to obtain a provider fiscal UUID
/// for an invoice uploaded from elsewhere. Payment form is left "to be
/// defined" and the method deferred so a complement can settle it.
pub fn build_ingress(invoice: &Invoice, ctx: &FiscalContext) -> Result<CfdiPayload> {
    let subtotal = invoice.subtotal;
    let (tax, total) = subtotal
        .checked_mul(IVA_RATE)
        .map(round_currency)
        .and_then(|tax| subtotal.checked_add(tax).map(|total| (tax, total)))
        .ok_or(CfdiError::AmountOutOfRange(subtotal))?;

    Ok(CfdiPayload {
        name_id: 1,
        date: now().format(DATE_FORMAT).to_string(),
        serie: "A".to_string(),
        folio: None,
        currency: DEFAULT_CURRENCY.to_string(),
        expedition_place: ctx.expedition_place.clone(),
        exportation: "01".to_string(),
        cfdi_type: CfdiType::Ingress,
        payment_form: Some(PAYMENT_FORM_TO_BE_DEFINED.to_string()),
        payment_method: Some("PPD".to_string()),
        issuer: issuer(invoice),
        receiver: receiver(invoice, ctx, cfdi_use_for(ctx, INGRESS_CFDI_USE)),
        items: vec![Item {
            product_code: "01010101".to_string(),
            identification_number: "SERV001".to_string(),
            description: "Servicios profesionales".to_string(),
            unit: "E48".to_string(),
            unit_code: "E48".to_string(),
            unit_price: subtotal,
            quantity: Decimal::ONE,
            subtotal,
            tax_object: "02".to_string(),
            taxes: vec![Tax {
                total: tax,
                name: "IVA".to_string(),
                base: subtotal,
                rate: IVA_RATE,
                is_retention: false,
            }],
            total,
        }],
        complement: None,
    })
}
