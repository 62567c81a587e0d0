//! Referral graph: upline resolution and signup attribution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::WalletLedger;
use crate::store::{Collection, DocumentStore, RetryPolicy, Txn, run_transaction};
use crate::types::{AffiliateStats, User};

/// Level-1 and Level-2 affiliates above a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferralChain {
    pub level1: Option<String>,
    pub level2: Option<String>,
}

impl ReferralChain {
    pub fn is_empty(&self) -> bool {
        self.level1.is_none()
    }
}

#[derive(Clone)]
pub struct ReferralChainResolver {
    store: Arc<dyn DocumentStore>,
}

impl ReferralChainResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Resolves the upline of `user_id` from a fresh snapshot.
    pub async fn resolve_chain(&self, user_id: &str) -> LedgerResult<ReferralChain> {
        let mut tx = Txn::begin(Arc::clone(&self.store));
        Self::resolve_chain_in(&mut tx, user_id).await
    }

    /// Resolves the upline through `tx`, so the reads join its read set.
    ///
    /// The user itself must exist. A `referred_by` pointing at a deleted user
    /// ends the chain at that point.
    pub async fn resolve_chain_in(tx: &mut Txn, user_id: &str) -> LedgerResult<ReferralChain> {
        let user: User = tx.require(Collection::Users, user_id).await?;
        let level1 = active_referrer(tx, &user).await?;
        let level2 = match &level1 {
            Some(l1) => active_referrer(tx, l1)
                .await?
                .filter(|l2| l2.id != user.id),
            None => None,
        };
        Ok(ReferralChain {
            level1: level1.map(|u| u.id),
            level2: level2.map(|u| u.id),
        })
    }
}

async fn active_referrer(tx: &mut Txn, user: &User) -> LedgerResult<Option<User>> {
    let Some(referrer_id) = user.referred_by.as_deref() else {
        return Ok(None);
    };
    if referrer_id == user.id {
        return Ok(None);
    }
    tx.get(Collection::Users, referrer_id).await
}

/// Index document enforcing referral-code uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferralCodeRecord {
    code: String,
    user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub id: String,
    #[serde(default = "default_rank")]
    pub rank: String,
    pub referral_code: String,
    /// Referral code entered at signup, if any.
    pub referred_by_code: Option<String>,
}

fn default_rank() -> String {
    "dlx-starter".to_string()
}

/// User registration with referral attribution.
#[derive(Clone)]
pub struct ReferralDirectory {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl ReferralDirectory {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Creates the user, their referral code and an empty wallet, and bumps
    /// the referral counters of the Level-1 and Level-2 affiliates.
    pub async fn register(&self, new_user: NewUser) -> LedgerResult<User> {
        let user = run_transaction(&self.store, self.retry, move |tx| {
            let new_user = new_user.clone();
            Box::pin(async move { register_in(tx, new_user).await })
        })
        .await?;
        info!(user_id = %user.id, referred_by = ?user.referred_by, "user registered");
        Ok(user)
    }

    pub async fn user(&self, user_id: &str) -> LedgerResult<User> {
        let mut tx = Txn::begin(Arc::clone(&self.store));
        tx.require(Collection::Users, user_id).await
    }
}

async fn register_in(tx: &mut Txn, new_user: NewUser) -> LedgerResult<User> {
    if tx.get::<User>(Collection::Users, &new_user.id).await?.is_some() {
        return Err(LedgerError::DuplicateRecord {
            collection: Collection::Users.to_string(),
            id: new_user.id,
        });
    }
    if tx
        .get::<ReferralCodeRecord>(Collection::ReferralCodes, &new_user.referral_code)
        .await?
        .is_some()
    {
        return Err(LedgerError::DuplicateRecord {
            collection: Collection::ReferralCodes.to_string(),
            id: new_user.referral_code,
        });
    }

    let referred_by = match new_user.referred_by_code.as_deref() {
        Some(code) => {
            let record: ReferralCodeRecord = tx
                .get(Collection::ReferralCodes, code)
                .await?
                .ok_or_else(|| LedgerError::InvalidReferralCode(code.to_string()))?;
            Some(credit_signup(tx, &record.user_id).await?)
        }
        None => None,
    };

    let user = User {
        id: new_user.id.clone(),
        rank: new_user.rank,
        referred_by,
        referral_code: new_user.referral_code.clone(),
        stats: AffiliateStats::default(),
        created_at: tx.now(),
    };
    tx.create(Collection::Users, &user.id, &user)?;
    tx.create(
        Collection::ReferralCodes,
        &user.referral_code,
        &ReferralCodeRecord {
            code: user.referral_code.clone(),
            user_id: user.id.clone(),
        },
    )?;
    WalletLedger::open(tx, &user.id)?;
    Ok(user)
}

/// Counts a new direct referral for `level1_id` and an indirect one for its referrer.
async fn credit_signup(tx: &mut Txn, level1_id: &str) -> LedgerResult<String> {
    let mut level1: User = tx.require(Collection::Users, level1_id).await?;
    level1.stats.direct_referrals += 1;
    tx.put(Collection::Users, &level1.id, &level1)?;

    if let Some(mut level2) = active_referrer(tx, &level1).await? {
        level2.stats.indirect_referrals += 1;
        tx.put(Collection::Users, &level2.id, &level2)?;
    }
    Ok(level1.id)
}
