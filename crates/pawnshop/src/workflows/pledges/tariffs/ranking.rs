use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::super::domain::Tariff;

/// Priority of a matching tariff; lower tiers win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecificityTier {
    CategoryAndBranch = 1,
    Category = 2,
    Branch = 3,
    General = 4,
}

impl SpecificityTier {
    /// Tier from which scopes the tariff pins down.
    pub fn of(tariff: &Tariff) -> Self {
        match (tariff.category_id.is_some(), tariff.branch_id.is_some()) {
            (true, true) => Self::CategoryAndBranch,
            (true, false) => Self::Category,
            (false, true) => Self::Branch,
            (false, false) => Self::General,
        }
    }

    pub const fn rank(self) -> u8 {
        self as u8
    }
}

/// Orders candidates best-first: tier ascending, then most recently effective.
/// Identifier breaks remaining ties so selection never depends on storage order.
pub(crate) fn compare_candidates(left: &Tariff, right: &Tariff) -> Ordering {
    SpecificityTier::of(left)
        .cmp(&SpecificityTier::of(right))
        .then_with(|| right.effective_from.cmp(&left.effective_from))
        .then_with(|| left.id.cmp(&right.id))
}
