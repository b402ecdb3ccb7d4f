//! Trade direction: Buy or Sell

use std::fmt;

/// Direction of a trade order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Sign of the cash flow caused by a trade on this side: buys spend, sells raise.
    #[inline]
    pub fn cash_sign(self) -> i32 {
        match self {
            Side::Buy => -1,
            Side::Sell => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        f.pad(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cash_sign() {
        assert_eq!(Side::Buy.cash_sign(), -1);
        assert_eq!(Side::Sell.cash_sign(), 1);
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Side::Buy), "BUY");
        assert_eq!(format!("{}", Side::Sell), "SELL");
    }
}
