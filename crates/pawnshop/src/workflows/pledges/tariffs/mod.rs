//! Tariff selection among overlapping, time-bounded rate rules.
//!
//! Resolution runs in two phases. The exact-fit phase keeps tariffs matching
//! the category, branch and loan bounds. When nothing fits, the fallback phase
//! ranks every active tariff in force on the date, so an approval only blocks
//! when no tariff is in force at all.

mod import;
mod ranking;

pub use import::{TariffCsvImporter, TariffImportError};
pub use ranking::SpecificityTier;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{BranchId, CategoryId, Money, Tariff};
use ranking::compare_candidates;

/// Inputs of a tariff lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffQuery {
    pub category_id: CategoryId,
    pub branch_id: BranchId,
    pub estimated_value: Money,
    pub as_of: NaiveDate,
}

/// Which phase produced a resolved tariff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPhase {
    ExactFit,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTariff {
    pub tariff: Tariff,
    pub tier: SpecificityTier,
    pub phase: ResolutionPhase,
}

/// Pick the single applicable tariff for `query`, or `None` when no active
/// tariff is in force on that date.
pub fn resolve<'a, I>(tariffs: I, query: &TariffQuery) -> Option<ResolvedTariff>
where
    I: IntoIterator<Item = &'a Tariff>,
{
    let in_force: Vec<&Tariff> = tariffs
        .into_iter()
        .filter(|tariff| tariff.is_effective_on(query.as_of))
        .collect();

    let exact_fit = in_force
        .iter()
        .copied()
        .filter(|tariff| tariff.applies_to(query.category_id, query.branch_id))
        .filter(|tariff| tariff.covers_amount(query.estimated_value))
        .min_by(|left, right| compare_candidates(left, right));

    let (tariff, phase) = match exact_fit {
        Some(tariff) => (tariff, ResolutionPhase::ExactFit),
        None => {
            let fallback = in_force
                .iter()
                .copied()
                .min_by(|left, right| compare_candidates(left, right))?;
            (fallback, ResolutionPhase::Fallback)
        }
    };

    Some(ResolvedTariff {
        tier: SpecificityTier::of(tariff),
        tariff: tariff.clone(),
        phase,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::pledges::domain::TariffId;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn tariff(id: i64, category: Option<i64>, branch: Option<i64>) -> Tariff {
        Tariff {
            id: TariffId(id),
            name: format!("tariff-{id}"),
            category_id: category.map(CategoryId),
            branch_id: branch.map(BranchId),
            loan_percent: dec!(50),
            interest_rate: dec!(8),
            min_loan: None,
            max_loan: None,
            effective_from: date(2024, 1, 1),
            effective_to: None,
            is_active: true,
            description: None,
        }
    }

    fn query(value: Money) -> TariffQuery {
        TariffQuery {
            category_id: CategoryId(1),
            branch_id: BranchId(1),
            estimated_value: value,
            as_of: date(2024, 6, 1),
        }
    }

    #[test]
    fn tiers_rank_category_before_branch() {
        let tariffs = vec![
            tariff(1, None, None),
            tariff(2, None, Some(1)),
            tariff(3, Some(1), None),
            tariff(4, Some(1), Some(1)),
        ];

        let mut remaining = tariffs.clone();
        let mut order = Vec::new();
        while let Some(resolved) = resolve(&remaining, &query(dec!(100))) {
            order.push((resolved.tariff.id.0, resolved.tier.rank()));
            remaining.retain(|tariff| tariff.id != resolved.tariff.id);
        }

        assert_eq!(order, vec![(4, 1), (3, 2), (2, 3), (1, 4)]);
    }

    #[test]
    fn newer_tariff_wins_within_a_tier() {
        let mut older = tariff(1, Some(1), None);
        older.effective_from = date(2024, 1, 1);
        let mut newer = tariff(2, Some(1), None);
        newer.effective_from = date(2024, 3, 1);

        let resolved = resolve(&[older, newer], &query(dec!(100))).expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(2));
    }

    #[test]
    fn identical_candidates_resolve_by_lowest_id() {
        let resolved = resolve(
            &[tariff(9, Some(1), Some(1)), tariff(3, Some(1), Some(1))],
            &query(dec!(100)),
        )
        .expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(3));
    }

    #[test]
    fn fallback_takes_any_tariff_in_force_for_other_category_or_branch() {
        let tariffs = vec![tariff(1, Some(1), Some(2)), tariff(2, None, Some(7))];
        let resolved = resolve(&tariffs, &query(dec!(1000))).expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(1));
        assert_eq!(resolved.phase, ResolutionPhase::Fallback);
        assert_eq!(resolved.tier, SpecificityTier::CategoryAndBranch);
    }

    #[test]
    fn nothing_resolves_without_a_tariff_in_force() {
        let mut expired = tariff(1, Some(1), Some(1));
        expired.effective_to = Some(date(2024, 5, 31));
        let mut inactive = tariff(2, None, None);
        inactive.is_active = false;
        let mut future = tariff(3, Some(2), None);
        future.effective_from = date(2024, 7, 1);

        assert!(resolve(&[expired, inactive, future], &query(dec!(100))).is_none());
        let empty: [Tariff; 0] = [];
        assert!(resolve(&empty, &query(dec!(100))).is_none());
    }

    #[test]
    fn exact_fit_still_prefers_a_matching_tariff() {
        let other_branch = tariff(1, Some(1), Some(2));
        let general = tariff(2, None, None);
        let resolved = resolve(&[other_branch, general], &query(dec!(100))).expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(2));
        assert_eq!(resolved.phase, ResolutionPhase::ExactFit);
    }

    #[test]
    fn expired_future_and_inactive_tariffs_are_skipped() {
        let mut expired = tariff(1, Some(1), Some(1));
        expired.effective_to = Some(date(2024, 5, 31));
        let mut future = tariff(2, Some(1), Some(1));
        future.effective_from = date(2024, 6, 2);
        let mut inactive = tariff(3, Some(1), Some(1));
        inactive.is_active = false;
        let general = tariff(4, None, None);

        let resolved =
            resolve(&[expired, future, inactive, general], &query(dec!(100))).expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(4));
        assert_eq!(resolved.phase, ResolutionPhase::ExactFit);
    }

    #[test]
    fn amount_bounds_demote_specific_tariff_during_exact_fit() {
        let mut specific = tariff(1, Some(1), Some(1));
        specific.max_loan = Some(dec!(500));
        let general = tariff(2, None, None);

        let resolved = resolve(&[specific, general], &query(dec!(1000))).expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(2));
        assert_eq!(resolved.phase, ResolutionPhase::ExactFit);
    }

    #[test]
    fn fallback_ignores_amount_bounds_but_keeps_ranking() {
        let mut specific = tariff(1, Some(1), Some(1));
        specific.min_loan = Some(dec!(5000));
        let mut general = tariff(2, None, None);
        general.max_loan = Some(dec!(10));

        let resolved = resolve(&[general, specific], &query(dec!(1000))).expect("resolved");
        assert_eq!(resolved.tariff.id, TariffId(1));
        assert_eq!(resolved.phase, ResolutionPhase::Fallback);
        assert_eq!(resolved.tier, SpecificityTier::CategoryAndBranch);
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut bounded = tariff(1, Some(1), Some(1));
        bounded.min_loan = Some(dec!(50));
        bounded.max_loan = Some(dec!(2000));
        let tariffs = [bounded];

        for value in [dec!(50), dec!(2000)] {
            let resolved = resolve(&tariffs, &query(value)).expect("resolved");
            assert_eq!(resolved.phase, ResolutionPhase::ExactFit);
        }
        let resolved = resolve(&tariffs, &query(dec!(2000.01))).expect("resolved");
        assert_eq!(resolved.phase, ResolutionPhase::Fallback);
    }
}
