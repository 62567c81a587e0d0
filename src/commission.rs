use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::rank::RankTable;
use crate::types::Currency;

/// Level-2 override: a flat share of the Level-1 commission, independent of
/// the Level-2 affiliate's rank.
pub const LEVEL2_PCT_OF_LEVEL1: Decimal = Decimal::from_parts(15, 0, 0, false, 0);

/// Unrounded commission amounts for one purchase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionBreakdown {
    pub currency: Currency,
    pub level1_rate: Decimal,
    pub level1_amount: Decimal,
    /// Percentage applied to `level1_amount`, not to the purchase amount.
    pub level2_rate: Decimal,
    pub level2_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct CommissionCalculator {
    ranks: Arc<RankTable>,
}

impl CommissionCalculator {
    pub fn new(ranks: Arc<RankTable>) -> Self {
        Self { ranks }
    }

    pub fn calculate(
        &self,
        purchase_amount: Decimal,
        level1_rank: &str,
        currency: Currency,
    ) -> LedgerResult<CommissionBreakdown> {
        if purchase_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "purchase amount must be > 0, got {purchase_amount}"
            )));
        }

        let level1_rate = self.ranks.commission_rate_for(level1_rank);
        let level1_amount = percent_of(purchase_amount, level1_rate);
        let level2_amount = percent_of(level1_amount, LEVEL2_PCT_OF_LEVEL1);

        Ok(CommissionBreakdown {
            currency,
            level1_rate,
            level1_amount,
            level2_rate: LEVEL2_PCT_OF_LEVEL1,
            level2_amount,
        })
    }
}

pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    amount * percent / Decimal::ONE_HUNDRED
}
