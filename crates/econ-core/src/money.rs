//! Cent rounding and the `DOUBLE` column conversions used by the SQL backends.

use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};

use crate::storage::StorageError;

/// Rounds to two fractional digits using banker's rounding.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp(2)
}

pub fn to_f64(value: Decimal) -> Result<f64, StorageError> {
    value
        .to_f64()
        .ok_or_else(|| StorageError::InvalidValue(value.to_string()))
}

/// Reads a `DOUBLE` back as a cent-precision decimal. Arithmetic done inside the
/// database (bulk adjustments) can leave binary noise behind, so the value is
/// normalised on the way out.
pub fn from_f64(value: f64) -> Result<Decimal, StorageError> {
    Decimal::from_f64(value)
        .map(round_cents)
        .ok_or_else(|| StorageError::InvalidValue(value.to_string()))
}
