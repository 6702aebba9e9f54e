use rust_decimal::Decimal;
use thiserror::Error;

use crate::parsing::Field;

#[derive(Debug, Error)]
pub enum CfdiError {
    /// Extraction ran with defaults disabled and mandatory fields were absent.
    #[error("missing mandatory fields: {}", join_fields(.0))]
    MissingFields(Vec<Field>),

    #[error("total {total} is lower than subtotal {subtotal}")]
    InconsistentAmounts { subtotal: Decimal, total: Decimal },

    #[error("amount {0} is out of range")]
    AmountOutOfRange(Decimal),

    #[error("XML error: {0}")]
    Xml(String),
}

fn join_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, CfdiError>;
