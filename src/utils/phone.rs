//! Phone number normalization.
//!
//! The gateway accepts numbers in any human format ("+91 98765 43210") and
//! reduces them to the digit string WhatsApp expects: country code plus
//! subscriber number, no symbols, no leading zero. Validation happens before
//! any session is created, so a bad number never touches the store or disk.

use crate::error::{GatewayError, Result};

/// Minimum digits for a country code plus subscriber number.
const MIN_DIGITS: usize = 10;
/// E.164 upper bound.
const MAX_DIGITS: usize = 15;

/// Strip everything but digits and validate the result.
///
/// Idempotent: normalizing an already-normalized number returns it unchanged.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < MIN_DIGITS {
        return Err(GatewayError::InvalidPhoneNumber(format!(
            "expected at least {MIN_DIGITS} digits"
        )));
    }
    if digits.len() > MAX_DIGITS {
        return Err(GatewayError::InvalidPhoneNumber(format!(
            "expected at most {MAX_DIGITS} digits"
        )));
    }
    if digits.starts_with('0') {
        return Err(GatewayError::InvalidPhoneNumber(
            "leading zero is not a valid country code".to_string(),
        ));
    }

    Ok(digits)
}
