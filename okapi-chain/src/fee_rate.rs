//! Transaction fee rates.

use std::{fmt, ops::Add};

use crate::amount::Amount;

/// A fee rate in zatoshis per 1000 virtual bytes.
///
/// Working per kilo-virtual-byte keeps sub-zatoshi-per-byte rates
/// representable as integers, so rates never round through floats.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeRate(i64);

impl FeeRate {
    /// A fee rate of zero.
    pub const ZERO: FeeRate = FeeRate(0);

    /// Creates a fee rate of `zat_per_kvb` zatoshis per 1000 virtual bytes.
    pub const fn from_zat_per_kvb(zat_per_kvb: i64) -> FeeRate {
        FeeRate(zat_per_kvb)
    }

    /// Creates the fee rate implied by paying `fee` for `size` virtual bytes.
    ///
    /// Returns [`FeeRate::ZERO`] for zero-sized transactions, which cannot
    /// occur for well-formed transactions but keeps this constructor total.
    pub fn from_fee_and_size(fee: Amount, size: u64) -> FeeRate {
        if size == 0 {
            return FeeRate::ZERO;
        }

        let rate = fee.zatoshis() as i128 * 1000 / size as i128;

        FeeRate(rate as i64)
    }

    /// Returns the fee this rate charges for `size` virtual bytes.
    ///
    /// A strictly positive rate never charges zero for a non-empty
    /// transaction: fractional fees round up to one zatoshi.
    pub fn fee(self, size: u64) -> Amount {
        let fee = self.0 as i128 * size as i128 / 1000;
        let mut fee = fee as i64;

        if fee == 0 && size != 0 && self.0 > 0 {
            fee = 1;
        }

        Amount::new(fee)
    }

    /// Returns this rate in zatoshis per 1000 virtual bytes.
    pub const fn zat_per_kvb(self) -> i64 {
        self.0
    }
}

impl Add for FeeRate {
    type Output = FeeRate;

    fn add(self, rhs: FeeRate) -> FeeRate {
        FeeRate(self.0 + rhs.0)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} zat/kvB", self.0)
    }
}

impl fmt::Debug for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FeeRate").field(&self.to_string()).finish()
    }
}
