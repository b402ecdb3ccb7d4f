//! Point-in-time portfolio state: holdings, cash, and the tradable universe.

use rust_decimal::Decimal;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::types::InstrumentId;

/// A position valued in base currency.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Holding {
    instrument: InstrumentId,
    quantity: Decimal,
    unit_price: Decimal,
}

impl Holding {
    /// Create a holding. Quantity must be non-negative and price positive.
    pub fn new(instrument: InstrumentId, quantity: Decimal, unit_price: Decimal) -> Result<Self> {
        if quantity.is_sign_negative() && !quantity.is_zero() {
            return Err(Error::InvalidSnapshot(format!(
                "{instrument}: negative quantity {quantity}"
            )));
        }
        if unit_price <= Decimal::ZERO {
            return Err(Error::InvalidSnapshot(format!(
                "{instrument}: unit price must be positive, got {unit_price}"
            )));
        }
        if quantity.checked_mul(unit_price).is_none() {
            return Err(Error::InvalidSnapshot(format!(
                "{instrument}: {quantity} × {unit_price} is out of range"
            )));
        }
        Ok(Self {
            instrument,
            quantity,
            unit_price,
        })
    }

    #[inline]
    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    #[inline]
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    #[inline]
    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    /// Market value in base currency (quantity × unit price). Construction
    /// guarantees the product fits.
    #[inline]
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Immutable snapshot of one account: holdings in input order plus free cash.
///
/// The total value is computed once here and reused by every component of a
/// run, so all weights in a run share the same denominator.
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioSnapshot {
    holdings: Vec<Holding>,
    cash: Decimal,
    total_value: Decimal,
}

impl PortfolioSnapshot {
    /// Build a snapshot. Rejects negative cash and duplicate instruments.
    pub fn new(holdings: Vec<Holding>, cash: Decimal) -> Result<Self> {
        if cash.is_sign_negative() && !cash.is_zero() {
            return Err(Error::InvalidSnapshot(format!(
                "cash balance must be non-negative, got {cash}"
            )));
        }

        let mut seen = FxHashSet::default();
        for h in &holdings {
            if !seen.insert(h.instrument()) {
                return Err(Error::InvalidSnapshot(format!(
                    "duplicate holding: {}",
                    h.instrument()
                )));
            }
        }

        let total_value = holdings
            .iter()
            .map(Holding::market_value)
            .try_fold(cash, |acc, v| acc.checked_add(v))
            .ok_or_else(|| Error::InvalidSnapshot("total portfolio value overflows".into()))?;

        Ok(Self {
            holdings,
            cash,
            total_value,
        })
    }

    #[inline]
    pub fn holdings(&self) -> &[Holding] {
        &self.holdings
    }

    #[inline]
    pub fn cash(&self) -> Decimal {
        self.cash
    }

    /// Σ holding values + cash.
    #[inline]
    pub fn total_value(&self) -> Decimal {
        self.total_value
    }

    /// Look up the holding for an instrument.
    pub fn holding(&self, instrument: &InstrumentId) -> Option<&Holding> {
        self.holdings.iter().find(|h| h.instrument() == instrument)
    }

    /// Quantity held, zero when the instrument is not held.
    pub fn quantity_of(&self, instrument: &InstrumentId) -> Decimal {
        self.holding(instrument)
            .map(Holding::quantity)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Instruments the execution side can trade, with base-currency prices.
///
/// Held instruments are always tradable and priced from their holding.
/// Unheld instruments enter through quotes.
#[derive(Clone, Debug, Default)]
pub struct Universe {
    prices: FxHashMap<InstrumentId, Decimal>,
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Universe containing every instrument held in `snapshot`.
    pub fn from_snapshot(snapshot: &PortfolioSnapshot) -> Self {
        let prices = snapshot
            .holdings()
            .iter()
            .map(|h| (h.instrument().clone(), h.unit_price()))
            .collect();
        Self { prices }
    }

    /// Add quotes for further instruments. A quote never overrides the price of
    /// an instrument already in the universe.
    pub fn with_quotes<I>(mut self, quotes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (InstrumentId, Decimal)>,
    {
        for (instrument, price) in quotes {
            if price <= Decimal::ZERO {
                return Err(Error::InvalidSnapshot(format!(
                    "{instrument}: quoted price must be positive, got {price}"
                )));
            }
            self.prices.entry(instrument).or_insert(price);
        }
        Ok(self)
    }

    #[inline]
    pub fn contains(&self, instrument: &InstrumentId) -> bool {
        self.prices.contains_key(instrument)
    }

    #[inline]
    pub fn price(&self, instrument: &InstrumentId) -> Option<Decimal> {
        self.prices.get(instrument).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
