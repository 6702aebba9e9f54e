//! Fiscal rules, invoice extraction and payment-complement assembly for
//! Mexican CFDI documents.

pub mod catalog;
pub mod complement;
pub mod error;
pub mod models;
pub mod parsing;
mod patterns;
pub mod validation;
pub mod xml;

pub use catalog::FiscalDefaults;
pub use complement::{build_ingress, build_payment_complement, CfdiPayload, CfdiType};
pub use error::CfdiError;
pub use models::{FiscalContext, Invoice, PaymentComplement, PaymentParams};
pub use parsing::{extract, Extraction, Extractor, FallbackPolicy};
pub use validation::{normalize, FiscalWarning, Normalized};
