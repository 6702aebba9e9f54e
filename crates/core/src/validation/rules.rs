use super::FiscalWarning;
use crate::catalog::{is_known_regime, FiscalDefaults, REGIME_GENERIC};
use crate::models::FiscalContext;

pub(super) type Rule = fn(&mut FiscalContext, &FiscalDefaults) -> Option<FiscalWarning>;

fn is_zip_code(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Generic RFCs must be issued from the receiver's own zip code.
pub(super) fn generic_rfc_expedition_place(
    ctx: &mut FiscalContext,
    _defaults: &FiscalDefaults,
) -> Option<FiscalWarning> {
    if !ctx.is_generic() || ctx.expedition_place == ctx.receiver_tax_zip_code {
        return None;
    }
    let warning = FiscalWarning::new(
        "expedition_place",
        format!(
            "generic RFC {} requires expedition place {} to equal tax zip code {}",
            ctx.receiver_rfc, ctx.expedition_place, ctx.receiver_tax_zip_code
        ),
    );
    ctx.expedition_place = ctx.receiver_tax_zip_code.clone();
    Some(warning)
}

pub(super) fn generic_rfc_regime(
    ctx: &mut FiscalContext,
    _defaults: &FiscalDefaults,
) -> Option<FiscalWarning> {
    if !ctx.is_generic() || ctx.fiscal_regime_code == REGIME_GENERIC {
        return None;
    }
    let warning = FiscalWarning::new(
        "fiscal_regime_code",
        format!(
            "generic RFC {} requires fiscal regime {} (was {})",
            ctx.receiver_rfc, REGIME_GENERIC, ctx.fiscal_regime_code
        ),
    );
    ctx.fiscal_regime_code = REGIME_GENERIC.to_string();
    Some(warning)
}

/// For generic RFCs the expedition place follows the replaced zip code so
/// the first rule still holds on the corrected output.
pub(super) fn tax_zip_code_format(
    ctx: &mut FiscalContext,
    defaults: &FiscalDefaults,
) -> Option<FiscalWarning> {
    if is_zip_code(&ctx.receiver_tax_zip_code) {
        return None;
    }
    let warning = FiscalWarning::new(
        "receiver_tax_zip_code",
        format!(
            "tax zip code {:?} must have 5 digits, using {}",
            ctx.receiver_tax_zip_code, defaults.receiver_tax_zip_code
        ),
    );
    ctx.receiver_tax_zip_code = defaults.receiver_tax_zip_code.clone();
    if ctx.is_generic() {
        ctx.expedition_place = ctx.receiver_tax_zip_code.clone();
    }
    Some(warning)
}

pub(super) fn known_regime(
    ctx: &mut FiscalContext,
    defaults: &FiscalDefaults,
) -> Option<FiscalWarning> {
    if is_known_regime(&ctx.fiscal_regime_code) {
        return None;
    }
    let replacement = if ctx.is_generic() {
        &defaults.receiver_fiscal_regime_generic
    } else {
        &defaults.receiver_fiscal_regime_normal
    };
    let warning = FiscalWarning::new(
        "fiscal_regime_code",
        format!(
            "fiscal regime {:?} is not valid, using {}",
            ctx.fiscal_regime_code, replacement
        ),
    );
    ctx.fiscal_regime_code = replacement.clone();
    Some(warning)
}
