use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Neg, Sub};
use std::time::Duration;

pub const STROOPS_PER_UNIT: u64 = 10_000_000;

/// A non-negative quantity of channel funds, in stroops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_stroops(stroops: u64) -> Self {
        Amount(stroops)
    }

    pub fn to_stroops(self) -> u64 {
        self.0
    }

    /// Parses a decimal string of whole units, e.g. `"1.25"`.
    /// Returns `None` if the string is not a valid representation or carries
    /// more than 7 fractional digits.
    pub fn from_units(units: &str) -> Option<Self> {
        let mut parts = units.split('.');
        let whole = parts.next()?.parse::<u64>().ok()?;
        let fraction = if let Some(frac_str) = parts.next() {
            if parts.next().is_some() {
                return None;
            }
            if frac_str.len() > 7 {
                return None;
            }
            let mut padded = frac_str.to_string();
            while padded.len() < 7 {
                padded.push('0');
            }
            padded.parse::<u64>().ok()?
        } else {
            0
        };
        let stroops = whole.checked_mul(STROOPS_PER_UNIT)?.checked_add(fraction)?;
        Some(Amount(stroops))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// The signed difference `self - other`.
    pub fn delta_from(self, other: Amount) -> Delta {
        Delta(self.0 as i64 - other.0 as i64)
    }

    pub fn checked_apply(self, delta: Delta) -> Option<Amount> {
        self.0.checked_add_signed(delta.0).map(Amount)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let whole = self.0 / STROOPS_PER_UNIT;
        let frac = self.0 % STROOPS_PER_UNIT;
        write!(f, "{whole}.{frac:07}")
    }
}

/// A signed change in channel funds, in stroops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Delta(i64);

impl Delta {
    pub const fn from_stroops(stroops: i64) -> Self {
        Delta(stroops)
    }

    pub fn to_stroops(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl From<Amount> for Delta {
    fn from(value: Amount) -> Self {
        Delta(value.to_stroops() as i64)
    }
}

impl Neg for Delta {
    type Output = Delta;

    fn neg(self) -> Self::Output {
        Delta(-self.0)
    }
}

/// A point in ledger time, in unix seconds as reported by the ledger driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerTime(u64);

impl LedgerTime {
    pub const fn from_unix(secs: u64) -> Self {
        LedgerTime(secs)
    }

    pub fn to_unix(self) -> u64 {
        self.0
    }

    pub fn after(self, other: LedgerTime) -> bool {
        self > other
    }

    pub fn before(self, other: LedgerTime) -> bool {
        self < other
    }
}

impl Add<Duration> for LedgerTime {
    type Output = LedgerTime;

    fn add(self, rhs: Duration) -> Self::Output {
        LedgerTime(self.0.saturating_add(rhs.as_secs()))
    }
}

impl Sub<Duration> for LedgerTime {
    type Output = LedgerTime;

    fn sub(self, rhs: Duration) -> Self::Output {
        LedgerTime(self.0.saturating_sub(rhs.as_secs()))
    }
}

impl Display for LedgerTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
