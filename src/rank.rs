//! Affiliate ranks and their Level-1 commission percentages.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Affiliate tier. Determines the Level-1 commission percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Starter,
    Associate,
    Executive,
    Director,
    President,
}

impl Rank {
    pub const ALL: [Rank; 5] = [
        Rank::Starter,
        Rank::Associate,
        Rank::Executive,
        Rank::Director,
        Rank::President,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Associate => "associate",
            Self::Executive => "executive",
            Self::Director => "director",
            Self::President => "president",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rank {
    type Err = String;

    /// Accepts both `director` and the stored `dlx-director` form, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let bare = normalized.strip_prefix("dlx-").unwrap_or(&normalized);
        Rank::ALL
            .into_iter()
            .find(|rank| rank.as_str() == bare)
            .ok_or_else(|| format!("unknown rank: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankInfo {
    pub display_name: &'static str,
    /// Level-1 commission percentage in [0, 100].
    pub commission_pct: Decimal,
}

/// Immutable rank → commission table, built once at startup.
#[derive(Debug, Clone)]
pub struct RankTable {
    ranks: HashMap<Rank, RankInfo>,
}

impl Default for RankTable {
    fn default() -> Self {
        let ranks = [
            (Rank::Starter, "DLX Starter", 20),
            (Rank::Associate, "DLX Associate", 25),
            (Rank::Executive, "DLX Executive", 30),
            (Rank::Director, "DLX Director", 35),
            (Rank::President, "DLX President", 45),
        ]
        .into_iter()
        .map(|(rank, display_name, pct)| {
            (
                rank,
                RankInfo {
                    display_name,
                    commission_pct: Decimal::from(pct),
                },
            )
        })
        .collect();
        Self { ranks }
    }
}

impl RankTable {
    pub fn info(&self, rank: Rank) -> Option<&RankInfo> {
        self.ranks.get(&rank)
    }

    /// Resolves a stored rank identifier. Unknown or stale identifiers fall
    /// back to [`Rank::Starter`].
    pub fn resolve(&self, rank: &str) -> Rank {
        rank.parse().unwrap_or(Rank::Starter)
    }

    /// Level-1 commission percentage for a rank identifier. Never fails.
    pub fn commission_rate_for(&self, rank: &str) -> Decimal {
        self.info(self.resolve(rank))
            .or_else(|| self.info(Rank::Starter))
            .map(|info| info.commission_pct)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn prefixed_and_bare_ids_resolve_alike() {
        let table = RankTable::default();
        assert_eq!(table.commission_rate_for("dlx-director"), dec!(35));
        assert_eq!(table.commission_rate_for("Director"), dec!(35));
        assert_eq!(table.commission_rate_for("dlx-president"), dec!(45));
    }

    #[test]
    fn unknown_rank_falls_back_to_starter() {
        let table = RankTable::default();
        assert_eq!(table.commission_rate_for("dlx-legend"), dec!(20));
        assert_eq!(table.commission_rate_for(""), dec!(20));
        assert_eq!(table.resolve("gold"), Rank::Starter);
    }

    #[test]
    fn rates_stay_within_bounds() {
        let table = RankTable::default();
        for rank in Rank::ALL {
            let pct = table.info(rank).unwrap().commission_pct;
            assert!(pct >= dec!(20) && pct <= dec!(45), "{rank} out of range");
        }
    }
}
