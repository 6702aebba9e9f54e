mod rules;

use crate::catalog::FiscalDefaults;
use crate::models::FiscalContext;
use serde::Serialize;
use std::fmt;

/// A correction applied by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiscalWarning {
    /// Name of the corrected field.
    pub field: &'static str,
    pub message: String,
}

impl FiscalWarning {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FiscalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub context: FiscalContext,
    pub warnings: Vec<FiscalWarning>,
}

/// Correct receiver fiscal data so the provider accepts it.
///
/// Never fails: every rule runs, in order, against the output of the
/// previous one, and each correction is reported as a warning.
pub fn normalize(context: FiscalContext, defaults: &FiscalDefaults) -> Normalized {
    let mut context = context;
    let mut warnings = Vec::new();

    let checks: [rules::Rule; 4] = [
        rules::generic_rfc_expedition_place,
        rules::generic_rfc_regime,
        rules::tax_zip_code_format,
        rules::known_regime,
    ];
    for check in checks {
        if let Some(w) = check(&mut context, defaults) {
            warnings.push(w);
        }
    }

    Normalized { context, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(rfc: &str, place: &str, zip: &str, regime: &str) -> FiscalContext {
        FiscalContext {
            receiver_rfc: rfc.into(),
            expedition_place: place.into(),
            receiver_tax_zip_code: zip.into(),
            fiscal_regime_code: regime.into(),
            cfdi_use_code: "CP01".into(),
        }
    }

    #[test]
    fn valid_context_passes_untouched() {
        let input = ctx("XIA123456789", "11590", "78000", "601");
        let out = normalize(input.clone(), &FiscalDefaults::default());
        assert_eq!(out.context, input);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn generic_rfc_gets_zip_and_regime_forced() {
        let out = normalize(
            ctx("XAXX010101000", "11590", "64000", "601"),
            &FiscalDefaults::default(),
        );
        assert_eq!(out.context.expedition_place, "64000");
        assert_eq!(out.context.fiscal_regime_code, "616");
        let fields: Vec<_> = out.warnings.iter().map(|w| w.field).collect();
        assert_eq!(fields, vec!["expedition_place", "fiscal_regime_code"]);
    }

    #[test]
    fn bad_zip_replaced_by_default() {
        let out = normalize(
            ctx("XIA123456789", "11590", "7800", "601"),
            &FiscalDefaults::default(),
        );
        assert_eq!(out.context.receiver_tax_zip_code, "78000");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].field, "receiver_tax_zip_code");
    }

    #[test]
    fn generic_rfc_with_bad_zip_keeps_places_aligned() {
        let out = normalize(
            ctx("XEXX010101000", "11590", "abc", "601"),
            &FiscalDefaults::default(),
        );
        assert_eq!(out.context.receiver_tax_zip_code, "78000");
        assert_eq!(out.context.expedition_place, "78000");
        assert_eq!(out.warnings.len(), 3);
    }

    #[test]
    fn unknown_regime_falls_back_by_rfc_kind() {
        let out = normalize(
            ctx("XIA123456789", "11590", "78000", "999"),
            &FiscalDefaults::default(),
        );
        assert_eq!(out.context.fiscal_regime_code, "601");
        assert_eq!(out.warnings[0].field, "fiscal_regime_code");
    }

    #[test]
    fn warnings_render_with_field() {
        let w = FiscalWarning::new("receiver_tax_zip_code", "must have 5 digits");
        assert_eq!(w.to_string(), "receiver_tax_zip_code: must have 5 digits");
    }
}
