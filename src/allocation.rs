//! Target allocation: nested target tables flattened to per-instrument fractions.
//!
//! A table is a list of nodes. A node is either an instrument with a weight or
//! a category with a weight and member nodes. Member weights are fractions of
//! their category, so each level must sum to one on its own:
//!
//! ```text
//! equity  0.6  ─┬─ IWDA 0.8   → 0.48
//!               └─ EMIM 0.2   → 0.12
//! bonds   0.4  ─── AGGH 1.0   → 0.40
//! ```
//!
//! Flattening walks the tree with an explicit work stack, checking each level
//! before descending, and multiplies weights along the path.

use rust_decimal::Decimal;
use rustc_hash::FxHashSet;

use crate::error::{Error, Result};
use crate::snapshot::{PortfolioSnapshot, Universe};
use crate::types::InstrumentId;

/// Tolerance on every sum-to-one check.
pub const WEIGHT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// One node of a target table.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum TargetNode {
    Category {
        category: String,
        weight: Decimal,
        members: Vec<TargetNode>,
    },
    Instrument {
        instrument: InstrumentId,
        weight: Decimal,
    },
}

impl TargetNode {
    pub fn instrument(id: &str, weight: Decimal) -> Self {
        TargetNode::Instrument {
            instrument: InstrumentId::new(id),
            weight,
        }
    }

    pub fn category(name: &str, weight: Decimal, members: Vec<TargetNode>) -> Self {
        TargetNode::Category {
            category: name.to_string(),
            weight,
            members,
        }
    }

    fn weight(&self) -> Decimal {
        match self {
            TargetNode::Category { weight, .. } | TargetNode::Instrument { weight, .. } => *weight,
        }
    }

    fn label(&self) -> String {
        match self {
            TargetNode::Category { category, .. } => category.clone(),
            TargetNode::Instrument { instrument, .. } => instrument.to_string(),
        }
    }
}

/// A declared target table (top-level nodes).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TargetTable {
    nodes: Vec<TargetNode>,
}

impl TargetTable {
    pub fn new(nodes: Vec<TargetNode>) -> Self {
        Self { nodes }
    }

    /// Flat table of instruments only.
    pub fn flat(pairs: &[(&str, Decimal)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|&(id, w)| TargetNode::instrument(id, w))
                .collect(),
        )
    }

    pub fn nodes(&self) -> &[TargetNode] {
        &self.nodes
    }

    /// Reduce the tree to instrument fractions, validating each level.
    ///
    /// Output is sorted by instrument id.
    pub fn flatten(&self) -> Result<Vec<TargetWeight>> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidAllocation("target table is empty".into()));
        }

        let mut out: Vec<TargetWeight> = Vec::new();
        let mut seen_instruments = FxHashSet::default();
        let mut seen_categories = FxHashSet::default();
        let mut stack: Vec<(&[TargetNode], Decimal, String)> =
            vec![(self.nodes.as_slice(), Decimal::ONE, "top level".to_string())];

        while let Some((level, scale, path)) = stack.pop() {
            check_level(level, &path)?;

            for node in level {
                match node {
                    TargetNode::Instrument { instrument, weight } => {
                        if !seen_instruments.insert(instrument.clone()) {
                            return Err(Error::InvalidAllocation(format!(
                                "duplicate instrument: {instrument}"
                            )));
                        }
                        out.push(TargetWeight {
                            instrument: instrument.clone(),
                            fraction: scale * weight,
                        });
                    }
                    TargetNode::Category {
                        category,
                        weight,
                        members,
                    } => {
                        if !seen_categories.insert(category.as_str()) {
                            return Err(Error::InvalidAllocation(format!(
                                "duplicate category: {category}"
                            )));
                        }
                        if members.is_empty() {
                            return Err(Error::InvalidAllocation(format!(
                                "category '{category}' has no members"
                            )));
                        }
                        stack.push((
                            members.as_slice(),
                            scale * weight,
                            format!("category '{category}'"),
                        ));
                    }
                }
            }
        }

        let total: Decimal = out.iter().map(|t| t.fraction).sum();
        check_sum(total, "flattened table")?;

        out.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        Ok(out)
    }
}

/// Every weight in [0, 1] and the level sums to one.
fn check_level(level: &[TargetNode], path: &str) -> Result<()> {
    for node in level {
        let w = node.weight();
        if w < Decimal::ZERO || w > Decimal::ONE {
            return Err(Error::InvalidAllocation(format!(
                "weight for {} ({w}) outside [0, 1] in {path}",
                node.label()
            )));
        }
    }
    let sum: Decimal = level.iter().map(TargetNode::weight).sum();
    check_sum(sum, path)
}

fn check_sum(sum: Decimal, path: &str) -> Result<()> {
    if (sum - Decimal::ONE).abs() > WEIGHT_EPSILON {
        return Err(Error::InvalidAllocation(format!(
            "weights in {path} sum to {sum}, expected 1"
        )));
    }
    Ok(())
}

/// Target fraction of total portfolio value for one instrument.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetWeight {
    pub instrument: InstrumentId,
    pub fraction: Decimal,
}

/// What to do with instruments that are held but absent from the target table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum UnlistedPolicy {
    /// Target weight 0: the whole position is a divestment candidate.
    #[default]
    Divest,
    /// Freeze at the current weight; listed targets share the remainder.
    Hold,
}

/// Flattened targets over the run's instrument set.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTargets {
    weights: Vec<TargetWeight>,
    unlisted: Vec<InstrumentId>,
    policy: UnlistedPolicy,
}

impl ResolvedTargets {
    /// All target weights, sorted by instrument, unlisted holdings included.
    pub fn weights(&self) -> &[TargetWeight] {
        &self.weights
    }

    /// Held instruments that were not in the table.
    pub fn unlisted(&self) -> &[InstrumentId] {
        &self.unlisted
    }

    pub fn policy(&self) -> UnlistedPolicy {
        self.policy
    }

    /// Target fraction for an instrument, zero when absent.
    pub fn weight_of(&self, instrument: &InstrumentId) -> Decimal {
        self.weights
            .binary_search_by(|t| t.instrument.cmp(instrument))
            .map(|i| self.weights[i].fraction)
            .unwrap_or(Decimal::ZERO)
    }

    /// Σ fractions.
    pub fn total(&self) -> Decimal {
        self.weights.iter().map(|t| t.fraction).sum()
    }
}

/// Flatten `table` and map it onto the snapshot's instrument set.
///
/// Fails with `InvalidAllocation` when the table is malformed, does not sum
/// to one, or names an instrument outside `universe`. Held instruments missing
/// from the table are handled according to `policy`.
pub fn resolve(
    table: &TargetTable,
    snapshot: &PortfolioSnapshot,
    universe: &Universe,
    policy: UnlistedPolicy,
) -> Result<ResolvedTargets> {
    let mut weights = table.flatten()?;

    let unknown: Vec<&str> = weights
        .iter()
        .filter(|t| !universe.contains(&t.instrument))
        .map(|t| t.instrument.as_str())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::InvalidAllocation(format!(
            "not tradable: {}",
            unknown.join(", ")
        )));
    }

    let listed: FxHashSet<&InstrumentId> = weights.iter().map(|t| &t.instrument).collect();
    let mut unlisted: Vec<(InstrumentId, Decimal)> = snapshot
        .holdings()
        .iter()
        .filter(|h| h.quantity() > Decimal::ZERO && !listed.contains(h.instrument()))
        .map(|h| (h.instrument().clone(), h.market_value()))
        .collect();
    unlisted.sort_by(|a, b| a.0.cmp(&b.0));

    let total = snapshot.total_value();
    match policy {
        UnlistedPolicy::Divest => {
            for (id, value) in &unlisted {
                log::warn!("{id} is held but not targeted: divesting {value}");
                weights.push(TargetWeight {
                    instrument: id.clone(),
                    fraction: Decimal::ZERO,
                });
            }
        }
        UnlistedPolicy::Hold => {
            let frozen: Vec<(InstrumentId, Decimal)> = unlisted
                .iter()
                .map(|(id, value)| {
                    let w = if total > Decimal::ZERO {
                        *value / total
                    } else {
                        Decimal::ZERO
                    };
                    (id.clone(), w)
                })
                .collect();
            let frozen_share: Decimal = frozen.iter().map(|(_, w)| *w).sum();
            if frozen_share >= Decimal::ONE {
                return Err(Error::InvalidAllocation(
                    "untargeted holdings make up the whole portfolio; nothing left to allocate"
                        .into(),
                ));
            }
            let remainder = Decimal::ONE - frozen_share;
            for t in &mut weights {
                t.fraction *= remainder;
            }
            for (id, w) in frozen {
                log::warn!("{id} is held but not targeted: holding at weight {w}");
                weights.push(TargetWeight {
                    instrument: id,
                    fraction: w,
                });
            }
        }
    }

    weights.sort_by(|a, b| a.instrument.cmp(&b.instrument));

    Ok(ResolvedTargets {
        weights,
        unlisted: unlisted.into_iter().map(|(id, _)| id).collect(),
        policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Holding;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> InstrumentId {
        InstrumentId::new(s)
    }

    fn snapshot(holdings: &[(&str, Decimal, Decimal)], cash: Decimal) -> PortfolioSnapshot {
        let holdings = holdings
            .iter()
            .map(|&(s, q, p)| Holding::new(id(s), q, p).unwrap())
            .collect();
        PortfolioSnapshot::new(holdings, cash).unwrap()
    }

    fn universe(snap: &PortfolioSnapshot, extra: &[&str]) -> Universe {
        Universe::from_snapshot(snap)
            .with_quotes(extra.iter().map(|s| (id(s), dec!(10))))
            .unwrap()
    }

    #[test]
    fn flat_table_sorted() {
        let table = TargetTable::flat(&[("B", dec!(0.3)), ("A", dec!(0.7))]);
        let flat = table.flatten().unwrap();
        assert_eq!(flat[0].instrument, id("A"));
        assert_eq!(flat[0].fraction, dec!(0.7));
        assert_eq!(flat[1].fraction, dec!(0.3));
    }

    #[test]
    fn nested_table_multiplies_weights() {
        let table = TargetTable::new(vec![
            TargetNode::category(
                "equity",
                dec!(0.6),
                vec![
                    TargetNode::instrument("IWDA", dec!(0.8)),
                    TargetNode::instrument("EMIM", dec!(0.2)),
                ],
            ),
            TargetNode::category("bonds", dec!(0.4), vec![TargetNode::instrument("AGGH", dec!(1))]),
        ]);
        let flat = table.flatten().unwrap();
        let get = |s: &str| flat.iter().find(|t| t.instrument == id(s)).unwrap().fraction;
        assert_eq!(get("IWDA"), dec!(0.48));
        assert_eq!(get("EMIM"), dec!(0.12));
        assert_eq!(get("AGGH"), dec!(0.4));
    }

    #[test]
    fn rejects_sum_below_and_above_one() {
        let low = TargetTable::flat(&[("A", dec!(0.6)), ("B", dec!(0.3))]);
        assert!(matches!(low.flatten(), Err(Error::InvalidAllocation(_))));
        let low = TargetTable::flat(&[("A", dec!(0.5)), ("B", dec!(0.45))]);
        assert!(low.flatten().is_err());
        let high = TargetTable::flat(&[("A", dec!(0.55)), ("B", dec!(0.5))]);
        assert!(high.flatten().is_err());
    }

    #[test]
    fn accepts_sum_within_epsilon() {
        let table = TargetTable::flat(&[("A", dec!(0.3333335)), ("B", dec!(0.6666660))]);
        assert!(table.flatten().is_ok());
    }

    #[test]
    fn rejects_inner_level_not_summing_to_one() {
        // Top level sums to one but the category members only cover 90%.
        let table = TargetTable::new(vec![
            TargetNode::instrument("A", dec!(0.5)),
            TargetNode::category(
                "bonds",
                dec!(0.5),
                vec![
                    TargetNode::instrument("B", dec!(0.6)),
                    TargetNode::instrument("C", dec!(0.3)),
                ],
            ),
        ]);
        let err = table.flatten().unwrap_err();
        assert!(err.to_string().contains("bonds"));
    }

    #[test]
    fn rejects_weight_out_of_range() {
        let table = TargetTable::flat(&[("A", dec!(1.2)), ("B", dec!(-0.2))]);
        assert!(table.flatten().is_err());
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let dup = TargetTable::flat(&[("A", dec!(0.5)), ("A", dec!(0.5))]);
        assert!(dup.flatten().is_err());
        assert!(TargetTable::default().flatten().is_err());
        let empty_cat = TargetTable::new(vec![
            TargetNode::instrument("A", dec!(1)),
            TargetNode::category("none", dec!(0), vec![]),
        ]);
        assert!(empty_cat.flatten().is_err());
    }

    #[test]
    fn rejects_untradable_target() {
        let snap = snapshot(&[("A", dec!(1), dec!(10))], dec!(0));
        let table = TargetTable::flat(&[("A", dec!(0.5)), ("ZZZ", dec!(0.5))]);
        let err =
            resolve(&table, &snap, &universe(&snap, &[]), UnlistedPolicy::Divest).unwrap_err();
        assert!(err.to_string().contains("ZZZ"));
    }

    #[test]
    fn divest_policy_adds_zero_targets() {
        let snap = snapshot(&[("A", dec!(1), dec!(10)), ("OLD", dec!(5), dec!(2))], dec!(0));
        let table = TargetTable::flat(&[("A", dec!(1))]);
        let resolved =
            resolve(&table, &snap, &universe(&snap, &[]), UnlistedPolicy::Divest).unwrap();
        assert_eq!(resolved.unlisted(), &[id("OLD")]);
        assert_eq!(resolved.weight_of(&id("OLD")), Decimal::ZERO);
        assert_eq!(resolved.weights().len(), 2);
        assert_eq!(resolved.total(), Decimal::ONE);
    }

    #[test]
    fn hold_policy_freezes_current_weight() {
        // OLD is 25% of a $40 portfolio; A and B split the remaining 75%.
        let snap = snapshot(&[("OLD", dec!(5), dec!(2))], dec!(30));
        let table = TargetTable::flat(&[("A", dec!(0.5)), ("B", dec!(0.5))]);
        let universe = universe(&snap, &["A", "B"]);
        let resolved = resolve(&table, &snap, &universe, UnlistedPolicy::Hold).unwrap();
        assert_eq!(resolved.weight_of(&id("OLD")), dec!(0.25));
        assert_eq!(resolved.weight_of(&id("A")), dec!(0.375));
        assert_eq!(resolved.weight_of(&id("B")), dec!(0.375));
        assert_eq!(resolved.policy(), UnlistedPolicy::Hold);
        assert!((resolved.total() - Decimal::ONE).abs() <= WEIGHT_EPSILON);
    }

    #[test]
    fn hold_policy_rejects_fully_frozen_portfolio() {
        let snap = snapshot(&[("OLD", dec!(5), dec!(2))], dec!(0));
        let table = TargetTable::flat(&[("A", dec!(1))]);
        let res = resolve(&table, &snap, &universe(&snap, &["A"]), UnlistedPolicy::Hold);
        assert!(matches!(res, Err(Error::InvalidAllocation(_))));
    }

    #[test]
    fn zero_quantity_holding_is_not_unlisted() {
        let snap = snapshot(&[("A", dec!(1), dec!(10)), ("GONE", dec!(0), dec!(3))], dec!(0));
        let table = TargetTable::flat(&[("A", dec!(1))]);
        let resolved =
            resolve(&table, &snap, &universe(&snap, &[]), UnlistedPolicy::Divest).unwrap();
        assert!(resolved.unlisted().is_empty());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn deserialize_nested_table() {
        let json = r#"[
            { "instrument": "IWDA", "weight": 0.6 },
            { "category": "bonds", "weight": 0.4, "members": [
                { "instrument": "AGGH", "weight": 0.5 },
                { "instrument": "IBGL", "weight": 0.5 }
            ]}
        ]"#;
        let table: TargetTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.nodes().len(), 2);
        let flat = table.flatten().unwrap();
        assert_eq!(flat.len(), 3);
    }
}
