//! Fixed-rate conversion between the canonical ledger currency and the
//! settlement/display currencies of withdrawal networks.
//!
//! Rates are configured, never fetched: one rate per non-canonical currency,
//! expressed as units of that currency per one canonical unit.

use std::collections::HashMap;

use crate::amount::{Amount, SCALE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("unsupported currency `{0}`")]
    Unsupported(String),
    #[error("exchange rate for `{0}` must be greater than zero")]
    ZeroRate(String),
    #[error("converted amount overflows")]
    Overflow,
}

#[derive(Debug, Clone)]
pub struct CurrencyConverter {
    canonical: String,
    /// Upper-cased currency code -> units per canonical unit.
    rates: HashMap<String, Amount>,
}

impl CurrencyConverter {
    pub fn new<I, S>(canonical: &str, rates: I) -> Result<Self, ConversionError>
    where
        I: IntoIterator<Item = (S, Amount)>,
        S: AsRef<str>,
    {
        let canonical = canonical.trim().to_ascii_uppercase();
        let mut table = HashMap::new();
        for (code, rate) in rates {
            let code = code.as_ref().trim().to_ascii_uppercase();
            if code == canonical {
                continue;
            }
            if rate.is_zero() {
                return Err(ConversionError::ZeroRate(code));
            }
            table.insert(code, rate);
        }
        Ok(Self {
            canonical,
            rates: table,
        })
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn is_canonical(&self, currency: &str) -> bool {
        currency.trim().eq_ignore_ascii_case(&self.canonical)
    }

    pub fn supports(&self, currency: &str) -> bool {
        self.is_canonical(currency) || self.rate(currency).is_ok()
    }

    fn rate(&self, currency: &str) -> Result<Amount, ConversionError> {
        self.rates
            .get(&currency.trim().to_ascii_uppercase())
            .copied()
            .ok_or_else(|| ConversionError::Unsupported(currency.to_string()))
    }

    /// Convert an amount denominated in `currency` into canonical units.
    pub fn to_canonical(&self, amount: Amount, currency: &str) -> Result<Amount, ConversionError> {
        if self.is_canonical(currency) {
            return Ok(amount);
        }
        let rate = self.rate(currency)?;
        amount
            .mul_ratio(SCALE, rate.units())
            .ok_or(ConversionError::Overflow)
    }

    /// Convert a canonical amount into `currency` for display.
    pub fn to_display(&self, amount: Amount, currency: &str) -> Result<Amount, ConversionError> {
        if self.is_canonical(currency) {
            return Ok(amount);
        }
        let rate = self.rate(currency)?;
        amount
            .mul_ratio(rate.units(), SCALE)
            .ok_or(ConversionError::Overflow)
    }

    /// Worst-case round-trip error, in micro-units of `currency`, of
    /// `to_display(to_canonical(x))`.
    pub fn round_trip_tolerance(&self, currency: &str) -> Result<u64, ConversionError> {
        if self.is_canonical(currency) {
            return Ok(0);
        }
        Ok(self.rate(currency)?.units() / SCALE + 1)
    }
}
