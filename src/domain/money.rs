//! Fixed-point currency amount.
//!
//! Stored as integer minor units (cents) to avoid the float-drift bugs that
//! plague naive `f64` ledgers. Parsing and pricing arithmetic sanitize
//! non-finite / negative inputs the same way the teacher's `TokenUsage`
//! price calculation does (`src/cost/types.rs::sanitize_price`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn from_major(value: f64) -> Self {
        let sanitized = if value.is_finite() { value } else { 0.0 };
        Self {
            cents: (sanitized * 100.0).round() as i64,
        }
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn as_f64(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }
}

impl TryFrom<f64> for Money {
    type Error = std::convert::Infallible;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Ok(Money::from_major(value))
    }
}

impl From<Money> for f64 {
    fn from(m: Money) -> f64 {
        m.as_f64()
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money::from_cents(self.cents + rhs.cents)
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money::from_cents(self.cents - rhs.cents)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_major_rounds_to_cents() {
        let m = Money::from_major(20.005);
        assert_eq!(m.cents(), 2001);
    }

    #[test]
    fn non_finite_input_sanitizes_to_zero() {
        assert_eq!(Money::from_major(f64::NAN).cents(), 0);
        assert_eq!(Money::from_major(f64::INFINITY).cents(), 0);
    }

    #[test]
    fn display_formats_two_decimals() {
        let m = Money::from_major(19.5);
        assert_eq!(m.to_string(), "19.50");
    }

    #[test]
    fn positivity_check() {
        assert!(Money::from_major(0.01).is_positive());
        assert!(!Money::from_major(0.0).is_positive());
        assert!(!Money::from_major(-5.0).is_positive());
    }
}
