//! TOML configuration loading and validation.

use std::path::Path;

use driftplan::{
    CostModel, Currency, FxRates, InstrumentId, LotSizes, PlanParams, RebalanceMode,
    UnlistedPolicy,
};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub cost: CostConfig,
    /// Base-currency units per one unit of each foreign currency.
    #[serde(default)]
    pub fx: FxHashMap<String, Decimal>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default = "default_base_currency")]
    pub base_currency: String,
}

fn default_base_currency() -> String {
    "EUR".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    pub tolerance: Decimal,
    pub mode: RebalanceMode,
    pub unlisted: UnlistedPolicy,
    pub min_trade_value: Decimal,
    pub lot_size: Decimal,
    /// Per-instrument lot sizes overriding `lot_size`.
    pub lot_sizes: FxHashMap<String, Decimal>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            tolerance: Decimal::new(1, 2),
            mode: RebalanceMode::default(),
            unlisted: UnlistedPolicy::default(),
            min_trade_value: Decimal::ZERO,
            lot_size: Decimal::ONE,
            lot_sizes: FxHashMap::default(),
        }
    }
}

impl RebalanceConfig {
    /// Engine parameters for these settings and cost schedule.
    pub fn plan_params(&self, cost: &CostConfig) -> PlanParams {
        let lot_sizes = self
            .lot_sizes
            .iter()
            .fold(LotSizes::uniform(self.lot_size), |lots, (id, lot)| {
                lots.with_override(InstrumentId::new(id.as_str()), *lot)
            });
        PlanParams {
            tolerance: self.tolerance,
            lot_sizes,
            cost_model: cost.model(),
            min_trade_value: self.min_trade_value,
            mode: self.mode,
        }
    }
}

/// Broker fee schedule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub fixed_fee: Decimal,
    pub commission_bps: Decimal,
    pub min_fee: Decimal,
}

impl CostConfig {
    pub fn model(&self) -> CostModel {
        CostModel {
            fixed_fee: self.fixed_fee,
            commission_bps: self.commission_bps,
            min_fee: self.min_fee,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
    pub audit_file: String,
    /// Default destination of submitted orders.
    pub orders_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "./logs".into(),
            audit_file: "audit.jsonl".into(),
            orders_file: "orders.jsonl".into(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.account.id.trim().is_empty() {
            return Err(Error::Config("account id must not be empty".into()));
        }
        if self.account.base_currency.trim().is_empty() {
            return Err(Error::Config("base_currency must not be empty".into()));
        }
        self.plan_params()
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;
        self.fx_rates().map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    pub fn base_currency(&self) -> Currency {
        Currency::new(&self.account.base_currency)
    }

    /// Engine parameters from the `[rebalance]` and `[cost]` tables.
    pub fn plan_params(&self) -> PlanParams {
        self.rebalance.plan_params(&self.cost)
    }

    /// FX table from the `[fx]` section.
    pub fn fx_rates(&self) -> driftplan::Result<FxRates> {
        let mut codes: Vec<(&String, &Decimal)> = self.fx.iter().collect();
        codes.sort();
        codes
            .into_iter()
            .try_fold(FxRates::new(self.base_currency()), |fx, (code, rate)| {
                fx.with_rate(Currency::new(code), *rate)
            })
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }

    /// Full path to the order file used when none is given on the command line.
    pub fn orders_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.orders_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn example_toml() -> &'static str {
        r#"
[account]
id = "degiro-main"
base_currency = "EUR"

[rebalance]
tolerance = 0.02
mode = "buy-only"
unlisted = "hold"
min_trade_value = 50
lot_size = 1

[rebalance.lot_sizes]
IWDA = 0.001

[cost]
fixed_fee = 2.50
commission_bps = 0
min_fee = 0

[fx]
USD = 0.92

[logging]
dir = "./logs"
audit_file = "audit.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.account.id, "degiro-main");
        assert_eq!(config.rebalance.tolerance, dec!(0.02));
        assert_eq!(config.rebalance.mode, RebalanceMode::BuyOnly);
        assert_eq!(config.rebalance.unlisted, UnlistedPolicy::Hold);
        assert_eq!(config.cost.fixed_fee, dec!(2.50));
        assert_eq!(config.fx["USD"], dec!(0.92));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml("[account]\nid = \"acc\"\n").unwrap();
        assert_eq!(config.base_currency(), Currency::new("EUR"));
        assert_eq!(config.rebalance.tolerance, dec!(0.01));
        assert_eq!(config.rebalance.mode, RebalanceMode::BuySell);
        assert_eq!(config.rebalance.unlisted, UnlistedPolicy::Divest);
        assert!(config.cost.model().is_zero());
        assert!(config.fx.is_empty());
    }

    #[test]
    fn plan_params_carry_lot_overrides() {
        let config = Config::from_toml(example_toml()).unwrap();
        let params = config.plan_params();
        assert_eq!(params.lot_sizes.get(&InstrumentId::new("IWDA")), dec!(0.001));
        assert_eq!(params.lot_sizes.get(&InstrumentId::new("VWCE")), dec!(1));
        assert_eq!(params.min_trade_value, dec!(50));
        assert_eq!(params.cost_model.compute_cost(dec!(1000)), dec!(2.50));
    }

    #[test]
    fn fx_rates_include_base_and_table() {
        let config = Config::from_toml(example_toml()).unwrap();
        let fx = config.fx_rates().unwrap();
        assert_eq!(fx.rate(&Currency::new("eur")), Some(dec!(1)));
        assert_eq!(fx.rate(&Currency::new("USD")), Some(dec!(0.92)));
        assert_eq!(fx.rate(&Currency::new("GBP")), None);
    }

    #[test]
    fn validate_catches_bad_tolerance() {
        let toml = example_toml().replace("tolerance = 0.02", "tolerance = 1.5");
        assert!(matches!(Config::from_toml(&toml), Err(Error::Config(_))));
    }

    #[test]
    fn validate_catches_negative_fee() {
        let toml = example_toml().replace("fixed_fee = 2.50", "fixed_fee = -1");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn validate_catches_zero_lot() {
        let toml = example_toml().replace("IWDA = 0.001", "IWDA = 0");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn validate_catches_bad_fx_rate() {
        let toml = example_toml().replace("USD = 0.92", "USD = 0");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn validate_catches_empty_account() {
        let toml = example_toml().replace("id = \"degiro-main\"", "id = \"\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn unknown_mode_is_parse_error() {
        let toml = example_toml().replace("\"buy-only\"", "\"sell-only\"");
        assert!(matches!(Config::from_toml(&toml), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn audit_path() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(
            config.audit_path(),
            std::path::PathBuf::from("./logs/audit.jsonl")
        );
        assert_eq!(
            config.orders_path(),
            std::path::PathBuf::from("./logs/orders.jsonl")
        );
    }
}
