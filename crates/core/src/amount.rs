//! Fixed-point monetary amounts.
//!
//! Every balance, bound, fee, and exchange rate in the ledger is an [`Amount`]:
//! an unsigned count of micro-units (six fractional digits). Being unsigned,
//! a balance can never be represented as negative, and all arithmetic is
//! checked so overflow surfaces as `None` instead of wrapping.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of fractional digits carried by an [`Amount`].
pub const DECIMALS: usize = 6;

/// Micro-units per whole unit.
pub const SCALE: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Whole units, saturating at the representable maximum.
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole.saturating_mul(SCALE))
    }

    pub const fn units(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Convert a user-entered float, rounding to the nearest micro-unit.
    ///
    /// Returns `None` for NaN, infinities, negatives, and values too large
    /// to represent.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let scaled = (value * SCALE as f64).round();
        if scaled >= u64::MAX as f64 {
            return None;
        }
        Some(Self(scaled as u64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// `self * numerator / denominator`, rounded half-up.
    ///
    /// Computed in 128-bit space; `None` on a zero denominator or when the
    /// result does not fit.
    pub fn mul_ratio(self, numerator: u64, denominator: u64) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        let den = u128::from(denominator);
        let product = u128::from(self.0) * u128::from(numerator);
        let rounded = (product + den / 2) / den;
        u64::try_from(rounded).ok().map(Self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.0 / SCALE,
            self.0 % SCALE,
            width = DECIMALS
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseAmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount `{0}` is not a decimal number")]
    Invalid(String),
    #[error("amount `{0}` has more than {DECIMALS} fractional digits")]
    TooPrecise(String),
    #[error("amount `{0}` is too large")]
    Overflow(String),
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseAmountError::Empty);
        }
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(ParseAmountError::Invalid(s.to_string()));
        }
        if frac.len() > DECIMALS {
            return Err(ParseAmountError::TooPrecise(s.to_string()));
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u64>()
                .map_err(|_| ParseAmountError::Overflow(s.to_string()))?
        };
        let mut frac_units = 0u64;
        for (i, b) in frac.bytes().enumerate() {
            frac_units += u64::from(b - b'0') * 10u64.pow((DECIMALS - 1 - i) as u32);
        }

        whole_units
            .checked_mul(SCALE)
            .and_then(|w| w.checked_add(frac_units))
            .map(Self)
            .ok_or_else(|| ParseAmountError::Overflow(s.to_string()))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct AmountVisitor;

impl Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative decimal number or decimal string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        v.checked_mul(SCALE)
            .map(Amount)
            .ok_or_else(|| E::custom(ParseAmountError::Overflow(v.to_string())))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        let v = u64::try_from(v).map_err(|_| E::custom("amount must not be negative"))?;
        self.visit_u64(v)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        Amount::from_f64(v).ok_or_else(|| E::custom(format!("invalid amount {v}")))
    }
}
