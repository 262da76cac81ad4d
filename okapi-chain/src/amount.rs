//! Strongly-typed zatoshi amounts.
//!
//! [`Amount`] is a signed number of zatoshis. Unlike the unconstrained
//! integers it wraps, constructing an [`Amount`] checks the money range, so
//! arithmetic on in-range values cannot silently overflow an `i64`.
//!
//! Fee deltas can be negative, so the full signed range up to
//! [`MAX_MONEY`] in either direction is allowed.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
};

use thiserror::Error;

/// The number of zatoshis in one coin.
pub const COIN: i64 = 100_000_000;

/// The maximum number of zatoshis that can ever exist: 21 million coins.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// A signed amount of zatoshis, in the range `-MAX_MONEY..=MAX_MONEY`.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64")]
#[serde(into = "i64")]
pub struct Amount(i64);

impl Amount {
    /// An amount of zero zatoshis.
    pub const ZERO: Amount = Amount(0);

    /// Creates an [`Amount`], panicking if `zatoshis` is outside the money
    /// range.
    ///
    /// Convenient for constants and tests; use [`Amount::try_from`] for
    /// untrusted values.
    pub const fn new(zatoshis: i64) -> Amount {
        assert!(zatoshis >= -MAX_MONEY && zatoshis <= MAX_MONEY);
        Amount(zatoshis)
    }

    /// Returns the number of zatoshis in this amount.
    pub const fn zatoshis(self) -> i64 {
        self.0
    }

    /// Returns `true` if this amount is negative.
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad_integral(self.0 >= 0, "", &self.0.to_string())
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Amount").field(&self.0).finish()
    }
}

/// Errors that can occur when converting into an [`Amount`].
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The value was outside `-MAX_MONEY..=MAX_MONEY`.
    #[error("{zatoshis} zatoshis is outside the money range")]
    OutOfRange {
        /// The out-of-range value.
        zatoshis: i64,
    },
}

impl TryFrom<i64> for Amount {
    type Error = Error;

    fn try_from(zatoshis: i64) -> Result<Amount, Error> {
        if (-MAX_MONEY..=MAX_MONEY).contains(&zatoshis) {
            Ok(Amount(zatoshis))
        } else {
            Err(Error::OutOfRange { zatoshis })
        }
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> i64 {
        amount.0
    }
}

// Aggregate sums over a pool of transactions are bounded by the money range
// times the pool size, which stays far inside `i64`, so plain arithmetic is
// used for the operator impls. Debug builds still catch overflow.

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        Amount(iter.map(|amount| amount.0).sum())
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl proptest::arbitrary::Arbitrary for Amount {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;

        (-MAX_MONEY..=MAX_MONEY).prop_map(Amount).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sub_round_trip() {
        let fee = Amount::new(1_000);
        let delta = Amount::new(250);

        assert_eq!(fee + delta - delta, fee);
        assert_eq!(fee + delta, Amount::new(1_250));
        assert_eq!(fee - delta, Amount::new(750));
    }

    #[test]
    fn negative_deltas_are_allowed() {
        let delta = Amount::try_from(-500).expect("negative amounts are in range");

        assert!(delta.is_negative());
        assert_eq!(-delta, Amount::new(500));
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert_eq!(
            Amount::try_from(MAX_MONEY + 1),
            Err(Error::OutOfRange {
                zatoshis: MAX_MONEY + 1
            })
        );
        assert_eq!(
            Amount::try_from(-MAX_MONEY - 1),
            Err(Error::OutOfRange {
                zatoshis: -MAX_MONEY - 1
            })
        );
    }

    #[test]
    fn sum_of_fees() {
        let fees = [Amount::new(100), Amount::new(200), Amount::new(300)];

        assert_eq!(fees.into_iter().sum::<Amount>(), Amount::new(600));
    }
}
