use chrono::{NaiveDate, Utc};
use rand::Rng;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::error::{CfdiError, Result};
use crate::models::{Invoice, GENERIC_RFC_DOMESTIC};
use crate::patterns::{self, capture};

pub const CFDI_NAMESPACES: [&str; 2] = ["http://www.sat.gob.mx/cfd/3", "http://www.sat.gob.mx/cfd/4"];
pub const TFD_NAMESPACE: &str = "http://www.sat.gob.mx/TimbreFiscalDigital";

/// 16% IVA applied when a total has to be derived from a subtotal.
pub const VAT_FACTOR: Decimal = Decimal::from_parts(116, 0, 0, false, 2);

/// Largest amount accepted from an upload: 999,999,999,999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(276_447_231, 23_283, 0, false, 2);

pub fn compute_sha256_hex(xml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(xml.as_bytes());
    let bytes = hasher.finalize();
    hex::encode(bytes)
}

pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Uuid,
    Customer,
    IssueDate,
    Subtotal,
    Total,
    IssuerRfc,
    ReceiverRfc,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Uuid => "uuid",
            Field::Customer => "customer",
            Field::IssueDate => "issue_date",
            Field::Subtotal => "subtotal",
            Field::Total => "total",
            Field::IssuerRfc => "issuer_rfc",
            Field::ReceiverRfc => "receiver_rfc",
        }
    }

    /// Fields that may not be synthesized when defaults are disabled.
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Field::IssuerRfc | Field::ReceiverRfc)
    }
}

/// Fields recovered by one strategy; `None` means not found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialInvoice {
    pub uuid: Option<String>,
    pub customer: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub subtotal: Option<Decimal>,
    pub total: Option<Decimal>,
    pub issuer_rfc: Option<String>,
    pub receiver_rfc: Option<String>,
}

impl PartialInvoice {
    fn fill_from(&mut self, other: PartialInvoice) {
        self.uuid = self.uuid.take().or(other.uuid);
        self.customer = self.customer.take().or(other.customer);
        self.issue_date = self.issue_date.take().or(other.issue_date);
        self.subtotal = self.subtotal.take().or(other.subtotal);
        self.total = self.total.take().or(other.total);
        self.issuer_rfc = self.issuer_rfc.take().or(other.issuer_rfc);
        self.receiver_rfc = self.receiver_rfc.take().or(other.receiver_rfc);
    }

    pub fn missing(&self) -> Vec<Field> {
        let mut out = Vec::new();
        if self.uuid.is_none() {
            out.push(Field::Uuid);
        }
        if self.customer.is_none() {
            out.push(Field::Customer);
        }
        if self.issue_date.is_none() {
            out.push(Field::IssueDate);
        }
        if self.subtotal.is_none() {
            out.push(Field::Subtotal);
        }
        if self.total.is_none() {
            out.push(Field::Total);
        }
        if self.issuer_rfc.is_none() {
            out.push(Field::IssuerRfc);
        }
        if self.receiver_rfc.is_none() {
            out.push(Field::ReceiverRfc);
        }
        out
    }
}

/// One way of reading invoice fields out of uploaded text.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the strategy cannot handle the input at all.
    fn scan(&self, text: &str) -> Option<PartialInvoice>;
}

/// Namespace-aware reader for CFDI 3.x and 4.0 documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredExtractor;

fn is_cfdi_element(node: &roxmltree::Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node
            .tag_name()
            .namespace()
            .map(|ns| CFDI_NAMESPACES.contains(&ns))
            .unwrap_or(false)
}

fn find_child<'a, 'input: 'a>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|c| is_cfdi_element(c, name))
}

/// CFDI 3.2 used lower camel case attribute names; 3.3 and 4.0 use Pascal case.
fn attr(node: roxmltree::Node, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| node.attribute(*n))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Negative or out of range amounts count as not found.
fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|d| !d.is_sign_negative() && *d <= MAX_AMOUNT)
}

/// `2024-01-15T10:20:30` and `2024-01-15` both yield the date portion.
fn parse_issue_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.trim().split('T').next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

impl ExtractionStrategy for StructuredExtractor {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn scan(&self, text: &str) -> Option<PartialInvoice> {
        let doc = match roxmltree::Document::parse(text) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::debug!(error = %e, "input is not well-formed XML");
                return None;
            }
        };
        let root = doc.root_element();
        if !is_cfdi_element(&root, "Comprobante") {
            tracing::debug!(root = %root.tag_name().name(), "root element is not a CFDI Comprobante");
            return None;
        }

        let receptor = find_child(root, "Receptor");
        let emisor = find_child(root, "Emisor");
        let stamp = root.descendants().find(|n| {
            n.is_element()
                && n.tag_name().name() == "TimbreFiscalDigital"
                && n.tag_name().namespace() == Some(TFD_NAMESPACE)
        });

        Some(PartialInvoice {
            uuid: stamp.and_then(|n| attr(n, &["UUID"])),
            customer: receptor.and_then(|n| attr(n, &["Nombre", "nombre"])),
            issue_date: attr(root, &["Fecha", "fecha"]).and_then(|s| parse_issue_date(&s)),
            subtotal: attr(root, &["SubTotal", "subTotal"]).and_then(|s| parse_amount(&s)),
            total: attr(root, &["Total", "total"]).and_then(|s| parse_amount(&s)),
            issuer_rfc: emisor.and_then(|n| attr(n, &["Rfc", "rfc"])),
            receiver_rfc: receptor.and_then(|n| attr(n, &["Rfc", "rfc"])),
        })
    }
}

/// Pattern scan over raw text; works on truncated or malformed documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct LenientExtractor;

impl ExtractionStrategy for LenientExtractor {
    fn name(&self) -> &'static str {
        "lenient"
    }

    fn scan(&self, text: &str) -> Option<PartialInvoice> {
        let uuid = capture(&patterns::UUID_ATTR, text)
            .or_else(|| capture(&patterns::ID_DOCUMENTO_ATTR, text))
            .or_else(|| capture(&patterns::BARE_UUID, text));

        Some(PartialInvoice {
            uuid,
            customer: capture(&patterns::RECEPTOR_NOMBRE, text),
            issue_date: capture(&patterns::FECHA, text).and_then(|s| parse_issue_date(&s)),
            subtotal: capture(&patterns::SUBTOTAL, text).and_then(|s| parse_amount(&s)),
            total: capture(&patterns::TOTAL, text).and_then(|s| parse_amount(&s)),
            issuer_rfc: capture(&patterns::EMISOR_RFC, text),
            receiver_rfc: capture(&patterns::RECEPTOR_RFC, text),
        })
    }
}

/// What to do with fields no strategy resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Synthesize plausible values (prototype behaviour).
    #[default]
    GenerateDefaults,
    /// Reject the upload when a mandatory field is missing.
    FailClosed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub invoice: Invoice,
    /// Fields filled with generated values.
    pub defaulted: Vec<Field>,
}

pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    policy: FallbackPolicy,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(FallbackPolicy::GenerateDefaults)
    }
}

impl Extractor {
    /// Structured parsing first, pattern scan for whatever it left unresolved.
    pub fn new(policy: FallbackPolicy) -> Self {
        Self {
            strategies: vec![Box::new(StructuredExtractor), Box::new(LenientExtractor)],
            policy,
        }
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>, policy: FallbackPolicy) -> Self {
        Self { strategies, policy }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    fn resolve(&self, input: &[u8]) -> PartialInvoice {
        let text = String::from_utf8_lossy(input);
        let text = text.trim_start_matches('\u{feff}');

        let mut found = PartialInvoice::default();
        for strategy in &self.strategies {
            if found.missing().is_empty() {
                break;
            }
            if let Some(partial) = strategy.scan(text) {
                tracing::debug!(strategy = strategy.name(), "extraction strategy applied");
                found.fill_from(partial);
            }
        }
        found
    }

    pub fn extract(&self, input: &[u8]) -> Result<Extraction> {
        let found = self.resolve(input);
        if self.policy == FallbackPolicy::FailClosed {
            let mandatory: Vec<Field> =
                found.missing().into_iter().filter(Field::is_mandatory).collect();
            if !mandatory.is_empty() {
                return Err(CfdiError::MissingFields(mandatory));
            }
            if let (Some(subtotal), Some(total)) = (found.subtotal, found.total) {
                if total < subtotal {
                    return Err(CfdiError::InconsistentAmounts { subtotal, total });
                }
            }
        }
        Ok(complete(found))
    }
}

/// Drops a total below its subtotal so it is derived again.
fn reconcile_amounts(found: &mut PartialInvoice) {
    if let (Some(subtotal), Some(total)) = (found.subtotal, found.total) {
        if total < subtotal {
            tracing::warn!(%subtotal, %total, "total below subtotal, deriving total");
            found.total = None;
        }
    }
}

fn complete(mut found: PartialInvoice) -> Extraction {
    reconcile_amounts(&mut found);
    let missing = found.missing();
    if !missing.is_empty() {
        tracing::warn!(
            fields = %missing.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(","),
            "generating defaults for unresolved invoice fields"
        );
    }
    Extraction {
        invoice: fill_defaults(found),
        defaulted: missing,
    }
}

fn random_subtotal() -> Decimal {
    let cents: i64 = rand::thread_rng().gen_range(100_000..=500_000);
    Decimal::new(cents, 2)
}

fn with_vat(subtotal: Decimal) -> Option<Decimal> {
    subtotal.checked_mul(VAT_FACTOR).map(round_currency)
}

fn random_amounts() -> (Decimal, Decimal) {
    let s = random_subtotal();
    (s, round_currency(s * VAT_FACTOR))
}

fn fill_defaults(found: PartialInvoice) -> Invoice {
    let derived = match (found.subtotal, found.total) {
        (Some(s), Some(t)) => Some((s, t)),
        (Some(s), None) => with_vat(s).map(|t| (s, t)),
        (None, Some(t)) => t.checked_div(VAT_FACTOR).map(|s| (round_currency(s), t)),
        (None, None) => None,
    };
    let (subtotal, total) = derived.unwrap_or_else(random_amounts);

    Invoice {
        uuid: found
            .uuid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string().to_uppercase()),
        customer: found.customer.unwrap_or_else(|| {
            format!("Cliente {}", rand::thread_rng().gen_range(1000..10000))
        }),
        issue_date: found.issue_date.unwrap_or_else(|| Utc::now().date_naive()),
        subtotal,
        total,
        issuer_rfc: found
            .issuer_rfc
            .unwrap_or_else(|| GENERIC_RFC_DOMESTIC.to_string()),
        receiver_rfc: found
            .receiver_rfc
            .unwrap_or_else(|| GENERIC_RFC_DOMESTIC.to_string()),
        paid: false,
        provider_uuid: None,
    }
}

/// Best-effort extraction that never fails.
pub fn extract(input: &[u8]) -> Invoice {
    complete(Extractor::default().resolve(input)).invoice
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_issue_date_with_and_without_time() {
        assert_eq!(
            parse_issue_date("2024-01-15T10:20:30"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_issue_date("2024-01-15"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_issue_date("15/01/2024"), None);
    }

    #[test]
    fn subtotal_derived_from_total() {
        let inv = fill_defaults(PartialInvoice {
            total: Some(dec!(116.00)),
            ..Default::default()
        });
        assert_eq!(inv.subtotal, dec!(100.00));
        assert_eq!(inv.total, dec!(116.00));
    }

    #[test]
    fn total_derived_from_subtotal() {
        let inv = fill_defaults(PartialInvoice {
            subtotal: Some(dec!(8620.69)),
            ..Default::default()
        });
        assert_eq!(inv.total, dec!(10000.00));
    }

    #[test]
    fn total_below_subtotal_is_derived_again() {
        let ext = complete(PartialInvoice {
            subtotal: Some(dec!(100.00)),
            total: Some(dec!(50.00)),
            ..Default::default()
        });
        assert_eq!(ext.invoice.subtotal, dec!(100.00));
        assert_eq!(ext.invoice.total, dec!(116.00));
        assert!(ext.defaulted.contains(&Field::Total));
        assert!(!ext.defaulted.contains(&Field::Subtotal));
    }

    #[test]
    fn amounts_outside_range_are_not_parsed() {
        assert_eq!(parse_amount(" 116.00 "), Some(dec!(116.00)));
        assert_eq!(parse_amount("999999999999.99"), Some(MAX_AMOUNT));
        assert_eq!(parse_amount("1000000000000.00"), None);
        assert_eq!(parse_amount("79228162514264337593543950335"), None);
        assert_eq!(parse_amount("-50.00"), None);
    }

    #[test]
    fn largest_subtotal_derives_total_without_overflow() {
        let inv = fill_defaults(PartialInvoice {
            subtotal: Some(MAX_AMOUNT),
            ..Default::default()
        });
        assert_eq!(inv.total, dec!(1159999999999.99));
    }

    #[test]
    fn fill_from_keeps_existing_values() {
        let mut a = PartialInvoice {
            uuid: Some("first".into()),
            ..Default::default()
        };
        a.fill_from(PartialInvoice {
            uuid: Some("second".into()),
            customer: Some("Acme".into()),
            ..Default::default()
        });
        assert_eq!(a.uuid.as_deref(), Some("first"));
        assert_eq!(a.customer.as_deref(), Some("Acme"));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = compute_sha256_hex("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
