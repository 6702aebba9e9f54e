//! SAT catalog codes accepted by the stamping provider.
//!
//! Only the subset of each catalog this workflow issues is listed; codes
//! outside it are treated as unknown by the normalizer.

use serde::{Deserialize, Serialize};

/// "Sin obligaciones fiscales", the only regime valid for generic RFCs.
pub const REGIME_GENERIC: &str = "616";
/// "General de Ley Personas Morales".
pub const REGIME_NORMAL: &str = "601";
/// "Sin efectos fiscales".
pub const CFDI_USE_NO_FISCAL_EFFECT: &str = "S01";
/// "Pagos", the use code for payment complements.
pub const CFDI_USE_PAYMENTS: &str = "CP01";
/// "Transferencia electrónica de fondos".
pub const PAYMENT_FORM_TRANSFER: &str = "03";
/// "Por definir".
pub const PAYMENT_FORM_TO_BE_DEFINED: &str = "99";

const FISCAL_REGIMES: &[(&str, &str)] = &[
    ("601", "General de Ley Personas Morales"),
    ("603", "Personas Morales con Fines no Lucrativos"),
    ("605", "Sueldos y Salarios"),
    ("612", "Personas Físicas con Actividades Empresariales y Profesionales"),
    ("616", "Sin obligaciones fiscales"),
    ("621", "Incorporación Fiscal"),
    ("625", "Régimen Simplificado de Confianza"),
];

const PAYMENT_FORMS: &[(&str, &str)] = &[
    ("01", "Efectivo"),
    ("02", "Cheque nominativo"),
    ("03", "Transferencia electrónica de fondos"),
    ("04", "Tarjeta de crédito"),
    ("05", "Monedero electrónico"),
    ("06", "Dinero electrónico"),
    ("28", "Tarjeta de débito"),
    ("29", "Tarjeta de servicios"),
    ("99", "Por definir"),
];

const PAYMENT_METHODS: &[(&str, &str)] = &[
    ("PUE", "Pago en una sola exhibición"),
    ("PPD", "Pago en parcialidades o diferido"),
];

const CFDI_USES: &[(&str, &str)] = &[
    ("G01", "Adquisición de mercancías"),
    ("G03", "Gastos en general"),
    ("P01", "Por definir"),
    ("S01", "Sin efectos fiscales"),
    ("CP01", "Pagos"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Catalog {
    FiscalRegime,
    PaymentForm,
    PaymentMethod,
    CfdiUse,
}

impl Catalog {
    pub const ALL: [Catalog; 4] = [
        Catalog::FiscalRegime,
        Catalog::PaymentForm,
        Catalog::PaymentMethod,
        Catalog::CfdiUse,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            Catalog::FiscalRegime => "Fiscal regimes",
            Catalog::PaymentForm => "Payment forms",
            Catalog::PaymentMethod => "Payment methods",
            Catalog::CfdiUse => "CFDI uses",
        }
    }
}

pub fn entries(catalog: Catalog) -> &'static [(&'static str, &'static str)] {
    match catalog {
        Catalog::FiscalRegime => FISCAL_REGIMES,
        Catalog::PaymentForm => PAYMENT_FORMS,
        Catalog::PaymentMethod => PAYMENT_METHODS,
        Catalog::CfdiUse => CFDI_USES,
    }
}

fn lookup(table: &'static [(&'static str, &'static str)], code: &str) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, label)| *label)
}

pub fn regime_label(code: &str) -> Option<&'static str> {
    lookup(FISCAL_REGIMES, code)
}

pub fn payment_form_label(code: &str) -> Option<&'static str> {
    lookup(PAYMENT_FORMS, code)
}

pub fn payment_method_label(code: &str) -> Option<&'static str> {
    lookup(PAYMENT_METHODS, code)
}

pub fn cfdi_use_label(code: &str) -> Option<&'static str> {
    lookup(CFDI_USES, code)
}

pub fn is_known_regime(code: &str) -> bool {
    regime_label(code).is_some()
}

/// Default values substituted by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalDefaults {
    pub expedition_place: String,
    pub receiver_tax_zip_code: String,
    pub receiver_fiscal_regime_normal: String,
    pub receiver_fiscal_regime_generic: String,
}

impl Default for FiscalDefaults {
    fn default() -> Self {
        Self {
            expedition_place: "78000".to_string(),
            receiver_tax_zip_code: "78000".to_string(),
            receiver_fiscal_regime_normal: REGIME_NORMAL.to_string(),
            receiver_fiscal_regime_generic: REGIME_GENERIC.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(regime_label("616"), Some("Sin obligaciones fiscales"));
        assert_eq!(payment_form_label("03"), Some("Transferencia electrónica de fondos"));
        assert_eq!(payment_method_label("PPD"), Some("Pago en parcialidades o diferido"));
        assert_eq!(cfdi_use_label("S01"), Some("Sin efectos fiscales"));
        assert_eq!(regime_label("999"), None);
    }

    #[test]
    fn defaults_are_catalog_members() {
        let d = FiscalDefaults::default();
        assert!(is_known_regime(&d.receiver_fiscal_regime_normal));
        assert!(is_known_regime(&d.receiver_fiscal_regime_generic));
        assert!(cfdi_use_label(CFDI_USE_NO_FISCAL_EFFECT).is_some());
        assert!(cfdi_use_label(CFDI_USE_PAYMENTS).is_some());
        assert!(payment_form_label(PAYMENT_FORM_TRANSFER).is_some());
    }

    #[test]
    fn every_catalog_has_entries() {
        for catalog in Catalog::ALL {
            assert!(!entries(catalog).is_empty(), "{}", catalog.title());
        }
    }
}
