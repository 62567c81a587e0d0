//! Wallet balance mutations.
//!
//! Every balance change goes through [`WalletLedger::apply`], which reads the
//! wallet inside the caller's [`Txn`], refuses to drive a slot below zero and
//! stages both the new wallet and a [`WalletEntry`] in the same transaction.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::store::{Collection, DocumentStore, RetryPolicy, Txn, run_transaction};
use crate::types::{BalanceSlot, EntryReason, Wallet, WalletEntry, round_money};

/// Why a delta is applied and which record it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerContext {
    pub reason: EntryReason,
    pub reference: String,
}

impl LedgerContext {
    pub fn new(reason: EntryReason, reference: impl Into<String>) -> Self {
        Self {
            reason,
            reference: reference.into(),
        }
    }
}

#[derive(Clone)]
pub struct WalletLedger {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl WalletLedger {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Applies a signed delta to one wallet slot inside `tx` and returns the new balance.
    ///
    /// The delta is rounded to two places first. A zero delta after rounding
    /// is rejected with [`LedgerError::InvalidAmount`]; a result below zero
    /// fails with [`LedgerError::InsufficientBalance`] and nothing is staged.
    pub async fn apply(
        tx: &mut Txn,
        user_id: &str,
        slot: BalanceSlot,
        delta: Decimal,
        ctx: &LedgerContext,
    ) -> LedgerResult<Decimal> {
        let slot = BalanceSlot::new(slot.currency, slot.subaccount)?;
        let delta = round_money(delta);
        if delta.is_zero() {
            return Err(LedgerError::InvalidAmount(format!(
                "zero delta for {user_id} {slot} ({})",
                ctx.reference
            )));
        }

        let mut wallet: Wallet = tx.require(Collection::Wallets, user_id).await?;
        let current = wallet.balance(slot);
        let new_balance = current + delta;
        if new_balance < Decimal::ZERO {
            return Err(LedgerError::InsufficientBalance {
                user_id: user_id.to_string(),
                currency: slot.currency,
                subaccount: slot.subaccount,
                available: current,
                required: -delta,
            });
        }

        let now = tx.now();
        *wallet.balance_mut(slot) = new_balance;
        wallet.updated_at = now;
        tx.put(Collection::Wallets, user_id, &wallet)?;

        let entry = WalletEntry {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            slot,
            delta,
            balance_after: new_balance,
            reason: ctx.reason,
            reference: ctx.reference.clone(),
            created_at: now,
        };
        tx.create(Collection::WalletEntries, &entry.id, &entry)?;

        debug!(user_id, %slot, %delta, %new_balance, reference = %ctx.reference, "staged wallet delta");
        Ok(new_balance)
    }

    /// Stages a new wallet for `user_id`, failing if one already exists.
    pub fn open(tx: &mut Txn, user_id: &str) -> LedgerResult<Wallet> {
        let wallet = Wallet::empty(user_id, tx.now());
        tx.create(Collection::Wallets, user_id, &wallet)?;
        Ok(wallet)
    }

    /// Applies a single delta in its own retried transaction.
    pub async fn apply_one(
        &self,
        user_id: &str,
        slot: BalanceSlot,
        delta: Decimal,
        ctx: LedgerContext,
    ) -> LedgerResult<Decimal> {
        let user_id = user_id.to_string();
        run_transaction(&self.store, self.retry, move |tx| {
            let user_id = user_id.clone();
            let ctx = ctx.clone();
            Box::pin(async move { Self::apply(tx, &user_id, slot, delta, &ctx).await })
        })
        .await
    }

    pub async fn wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        let mut tx = Txn::begin(Arc::clone(&self.store));
        tx.require(Collection::Wallets, user_id).await
    }

    /// Ledger lines recorded for a user, oldest first.
    pub async fn entries(&self, user_id: &str) -> LedgerResult<Vec<WalletEntry>> {
        let tx = Txn::begin(Arc::clone(&self.store));
        let mut entries: Vec<WalletEntry> = tx
            .query_eq(Collection::WalletEntries, "user_id", user_id)
            .await?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}
