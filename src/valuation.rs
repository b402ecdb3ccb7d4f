//! Valuation: raw broker positions in any currency → base-currency holdings.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::snapshot::{Holding, PortfolioSnapshot};
use crate::types::{Currency, InstrumentId};

/// Decimal places kept on base-currency money: converted prices, cash and
/// order costs.
pub const MONEY_DP: u32 = 8;

/// A position as reported by the broker, priced in its listing currency.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawPosition {
    pub instrument: InstrumentId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub currency: Currency,
}

/// A price for an instrument that is not necessarily held.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawQuote {
    pub instrument: InstrumentId,
    pub unit_price: Decimal,
    pub currency: Currency,
}

/// A free cash balance in one currency.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CashBalance {
    pub currency: Currency,
    pub amount: Decimal,
}

/// FX rate table. A rate is the number of base-currency units per one unit
/// of the quoted currency. The base currency always converts at 1.
#[derive(Clone, Debug)]
pub struct FxRates {
    base: Currency,
    rates: FxHashMap<Currency, Decimal>,
}

impl FxRates {
    /// Rate table containing only the identity rate for `base`.
    pub fn new(base: Currency) -> Self {
        Self {
            base,
            rates: FxHashMap::default(),
        }
    }

    /// Add a rate. Rates must be positive; a rate for the base currency must be 1.
    pub fn with_rate(mut self, currency: Currency, rate: Decimal) -> Result<Self> {
        if rate <= Decimal::ZERO {
            return Err(Error::InvalidParams(format!(
                "FX rate for {currency} must be positive, got {rate}"
            )));
        }
        if currency == self.base && rate != Decimal::ONE {
            return Err(Error::InvalidParams(format!(
                "FX rate for base currency {currency} must be 1, got {rate}"
            )));
        }
        self.rates.insert(currency, rate);
        Ok(self)
    }

    #[inline]
    pub fn base(&self) -> &Currency {
        &self.base
    }

    /// Rate for `currency`, if known.
    pub fn rate(&self, currency: &Currency) -> Option<Decimal> {
        if *currency == self.base {
            return Some(Decimal::ONE);
        }
        self.rates.get(currency).copied()
    }

    /// Convert `amount` in `currency` to base currency, rounded to
    /// [`MONEY_DP`] places. `context` names the instrument (or cash line) for
    /// error reporting.
    pub fn to_base(&self, amount: Decimal, currency: &Currency, context: &str) -> Result<Decimal> {
        let rate = self.rate(currency).ok_or_else(|| Error::CurrencyUnavailable {
            instrument: context.to_string(),
            currency: currency.clone(),
        })?;
        let converted = amount.checked_mul(rate).ok_or_else(|| {
            Error::InvalidSnapshot(format!(
                "{context}: {amount} {currency} overflows at rate {rate}"
            ))
        })?;
        Ok(converted.round_dp(MONEY_DP))
    }
}

/// Convert raw positions into base-currency holdings, preserving order.
pub fn normalize_positions(raw: &[RawPosition], fx: &FxRates) -> Result<Vec<Holding>> {
    raw.iter()
        .map(|p| {
            let price = fx.to_base(p.unit_price, &p.currency, p.instrument.as_str())?;
            Holding::new(p.instrument.clone(), p.quantity, price)
        })
        .collect()
}

/// Sum all cash balances in base currency.
pub fn normalize_cash(balances: &[CashBalance], fx: &FxRates) -> Result<Decimal> {
    let mut total = Decimal::ZERO;
    for b in balances {
        let amount = fx.to_base(b.amount, &b.currency, "cash")?;
        total = total
            .checked_add(amount)
            .ok_or_else(|| Error::InvalidSnapshot("cash balances overflow".into()))?;
    }
    Ok(total)
}

/// Convert quotes into (instrument, base-currency price) pairs.
pub fn normalize_quotes(raw: &[RawQuote], fx: &FxRates) -> Result<Vec<(InstrumentId, Decimal)>> {
    raw.iter()
        .map(|q| {
            let price = fx.to_base(q.unit_price, &q.currency, q.instrument.as_str())?;
            Ok((q.instrument.clone(), price))
        })
        .collect()
}

/// Normalize positions and cash and assemble the snapshot.
pub fn build_snapshot(
    positions: &[RawPosition],
    cash: &[CashBalance],
    fx: &FxRates,
) -> Result<PortfolioSnapshot> {
    let holdings = normalize_positions(positions, fx)?;
    let cash = normalize_cash(cash, fx)?;
    PortfolioSnapshot::new(holdings, cash)
}
