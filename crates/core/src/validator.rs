//! Recipient and amount checks run before any ledger mutation.

use crate::amount::{Amount, SCALE};
use crate::catalog::{MethodKind, MobileMoneyRules, NetworkEntry, Route};
use crate::error::LedgerError;

/// Validate `recipient` for the route's method family.
///
/// Returns the normalised recipient to store: the bare subscriber number
/// for mobile money, the trimmed address for crypto.
pub fn validate_recipient(route: &Route<'_>, recipient: &str) -> Result<String, LedgerError> {
    let method = route.method;
    match method.kind {
        MethodKind::MobileMoney => {
            let default_rules;
            let rules = match &method.mobile_money {
                Some(rules) => rules,
                None => {
                    default_rules = MobileMoneyRules::default();
                    &default_rules
                }
            };
            normalize_phone(recipient, rules).map_err(|reason| LedgerError::InvalidRecipient {
                method: method.id.clone(),
                reason,
            })
        }
        MethodKind::Crypto => {
            let address = recipient.trim();
            if address.is_empty() {
                return Err(LedgerError::InvalidRecipient {
                    method: method.id.clone(),
                    reason: "wallet address is empty",
                });
            }
            match route.address_pattern() {
                Some(pattern) if !pattern.is_match(address) => Err(LedgerError::InvalidRecipient {
                    method: method.id.clone(),
                    reason: "wallet address does not match the network format",
                }),
                _ => Ok(address.to_string()),
            }
        }
    }
}

/// Reduce a phone number to its subscriber digits and check the operator
/// prefix.
pub fn normalize_phone(raw: &str, rules: &MobileMoneyRules) -> Result<String, &'static str> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let national = if !rules.country_code.is_empty()
        && digits.len() == rules.country_code.len() + rules.digits
        && digits.starts_with(&rules.country_code)
    {
        &digits[rules.country_code.len()..]
    } else if !rules.trunk_prefix.is_empty()
        && digits.len() == rules.trunk_prefix.len() + rules.digits
        && digits.starts_with(&rules.trunk_prefix)
    {
        &digits[rules.trunk_prefix.len()..]
    } else {
        digits.as_str()
    };

    if national.len() != rules.digits {
        return Err("phone number must have exactly the subscriber digits");
    }
    if !rules
        .operator_prefixes
        .iter()
        .any(|prefix| national.starts_with(prefix.as_str()))
    {
        return Err("phone number has an unknown operator prefix");
    }
    Ok(national.to_string())
}

/// Validate an entered amount against the network's bounds, both in the
/// network's settlement currency.
///
/// The bounds are compared against the value as entered. Input carrying
/// more fractional digits than an [`Amount`] holds is refused, so the stored
/// amount is always exactly what the user typed.
pub fn validate_amount(network: &NetworkEntry, entered: f64) -> Result<Amount, LedgerError> {
    if !entered.is_finite() || entered < 0.0 {
        return Err(LedgerError::InvalidAmount("amount must be a finite, non-negative number"));
    }
    if entered == 0.0 {
        return Err(LedgerError::InvalidAmount("amount must be greater than zero"));
    }
    if entered < network.min_amount.to_f64() {
        return Err(LedgerError::BelowMinimum {
            min: network.min_amount,
            currency: network.currency.clone(),
        });
    }
    if entered > network.max_amount.to_f64() {
        return Err(LedgerError::AboveMaximum {
            max: network.max_amount,
            currency: network.currency.clone(),
        });
    }
    if !is_micro_precise(entered) {
        return Err(LedgerError::InvalidAmount("amount has more than six fractional digits"));
    }
    Amount::from_f64(entered).ok_or(LedgerError::InvalidAmount("amount is too large"))
}

/// Whether `value` lands on a micro-unit, up to float representation error.
fn is_micro_precise(value: f64) -> bool {
    let scaled = value * SCALE as f64;
    let slack = (scaled.abs() * 4.0 * f64::EPSILON).max(1e-3);
    (scaled - scaled.round()).abs() <= slack
}
