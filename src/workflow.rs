//! Approval workflow for deposits, withdrawals, swaps and catalog purchases.
//!
//! Each transition runs as one document-store transaction: the request
//! status change, every wallet leg, every commission payout and the audit
//! entry commit together or not at all. Notifications go out after commit
//! and never affect the outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::commission::CommissionCalculator;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerContext, WalletLedger};
use crate::notify::{Notifier, NotifyTarget, notify_best_effort};
use crate::referral::ReferralChainResolver;
use crate::store::{Collection, DocumentStore, RetryPolicy, Txn, run_transaction};
use crate::types::{
    AuditAction, AuditLogEntry, BalanceSlot, CommissionEvent, Currency, EntryReason,
    FinancialRequest, Purchase, RequestDetails, RequestKind, RequestStatus, Subaccount, User,
    Wallet, round_money,
};

/// Events that move a request between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Approve,
    Reject,
    Complete,
    Succeed,
    Fail,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Complete => "complete",
            Self::Succeed => "settle",
            Self::Fail => "fail",
        }
    }

    fn applies_to(&self, kind: RequestKind) -> bool {
        match self {
            Self::Approve | Self::Reject | Self::Complete => {
                matches!(kind, RequestKind::Deposit | RequestKind::Withdrawal)
            }
            Self::Succeed | Self::Fail => kind == RequestKind::Swap,
        }
    }

    fn source(&self) -> RequestStatus {
        match self {
            Self::Complete => RequestStatus::Approved,
            _ => RequestStatus::Pending,
        }
    }

    fn target(&self) -> RequestStatus {
        match self {
            Self::Approve => RequestStatus::Approved,
            Self::Reject => RequestStatus::Rejected,
            Self::Complete => RequestStatus::Completed,
            Self::Succeed => RequestStatus::Success,
            Self::Fail => RequestStatus::Failed,
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Approve => AuditAction::RequestApproved,
            Self::Reject => AuditAction::RequestRejected,
            Self::Complete => AuditAction::RequestCompleted,
            Self::Succeed => AuditAction::SwapSucceeded,
            Self::Fail => AuditAction::SwapFailed,
        }
    }
}

/// Returns the status `request` moves to under `transition`.
///
/// A request that has already left the transition's source state is
/// [`LedgerError::AlreadyProcessed`]; a transition from the wrong lane or
/// one that skips a state is [`LedgerError::InvalidTransition`].
pub fn next_status(request: &FinancialRequest, transition: Transition) -> LedgerResult<RequestStatus> {
    let from = request.status;
    let invalid = || LedgerError::InvalidTransition {
        request_id: request.id.clone(),
        from,
        action: transition.as_str(),
    };

    if !transition.applies_to(request.kind()) {
        return Err(invalid());
    }
    if from == transition.source() {
        return Ok(transition.target());
    }
    if from == RequestStatus::Pending {
        return Err(invalid());
    }
    Err(LedgerError::AlreadyProcessed {
        request_id: request.id.clone(),
        status: from,
    })
}

/// A user submission before it is persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRequest {
    pub user_id: String,
    pub amount: Decimal,
    pub details: RequestDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub request: FinancialRequest,
    pub commissions: Vec<CommissionEvent>,
}

/// Marker stored per settled catalog order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub order_id: String,
    pub buyer_id: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub order_id: String,
    pub buyer_balance: Decimal,
    pub commissions: Vec<CommissionEvent>,
}

#[derive(Clone)]
pub struct RequestWorkflow {
    store: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
    calculator: CommissionCalculator,
    notifier: Arc<dyn Notifier>,
}

impl RequestWorkflow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
        calculator: CommissionCalculator,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            retry,
            calculator,
            notifier,
        }
    }

    /// Persists a new `pending` request. No balance moves until approval.
    pub async fn submit(&self, new_request: NewRequest) -> LedgerResult<FinancialRequest> {
        let new_request = validate(new_request)?;
        let request = run_transaction(&self.store, self.retry, move |tx| {
            let new_request = new_request.clone();
            Box::pin(async move { submit_in(tx, new_request).await })
        })
        .await?;

        info!(request_id = %request.id, kind = %request.kind(), amount = %request.amount, "request submitted");
        self.notify_detached(
            NotifyTarget::admins(),
            format!(
                "New {} request {} from {} for {}",
                request.kind(),
                request.id,
                request.user_id,
                request.amount
            ),
        );
        Ok(request)
    }

    /// Approves a pending deposit or withdrawal.
    ///
    /// A withdrawal debits inside the same transaction as the status change;
    /// when the balance is short the request stays `pending`. A deposit tied to
    /// an order also pays the depositor's Level-1 and Level-2 affiliates.
    pub async fn approve(&self, request_id: &str, reviewer: &str) -> LedgerResult<TransitionOutcome> {
        self.transition(request_id, reviewer, Transition::Approve, None)
            .await
    }

    pub async fn reject(
        &self,
        request_id: &str,
        reviewer: &str,
        reason: &str,
    ) -> LedgerResult<FinancialRequest> {
        self.transition(request_id, reviewer, Transition::Reject, Some(reason.to_string()))
            .await
            .map(|o| o.request)
    }

    /// Marks an approved deposit or withdrawal as fully settled off-platform.
    pub async fn complete(&self, request_id: &str, actor: &str) -> LedgerResult<FinancialRequest> {
        self.transition(request_id, actor, Transition::Complete, None)
            .await
            .map(|o| o.request)
    }

    /// Executes a pending swap: debits the source slot, credits the target slot.
    pub async fn settle_swap(&self, request_id: &str, actor: &str) -> LedgerResult<FinancialRequest> {
        self.transition(request_id, actor, Transition::Succeed, None)
            .await
            .map(|o| o.request)
    }

    pub async fn fail_swap(
        &self,
        request_id: &str,
        actor: &str,
        reason: &str,
    ) -> LedgerResult<FinancialRequest> {
        self.transition(request_id, actor, Transition::Fail, Some(reason.to_string()))
            .await
            .map(|o| o.request)
    }

    /// Debits the buyer's purchase balance and pays commissions for a catalog order.
    pub async fn settle_purchase(&self, purchase: Purchase) -> LedgerResult<PurchaseReceipt> {
        if round_money(purchase.amount) <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "purchase amount must be > 0, got {}",
                purchase.amount
            )));
        }
        let this = self.clone();
        let receipt = run_transaction(&self.store, self.retry, move |tx| {
            let this = this.clone();
            let purchase = purchase.clone();
            Box::pin(async move { this.settle_purchase_in(tx, purchase).await })
        })
        .await?;

        info!(order_id = %receipt.order_id, commissions = receipt.commissions.len(), "purchase settled");
        self.announce_commissions(&receipt.commissions);
        Ok(receipt)
    }

    pub async fn request(&self, request_id: &str) -> LedgerResult<FinancialRequest> {
        let mut tx = Txn::begin(Arc::clone(&self.store));
        tx.require(Collection::FinancialRequests, request_id).await
    }

    /// Pending requests of the given kinds, oldest first.
    pub async fn pending(&self, kinds: &[RequestKind]) -> LedgerResult<Vec<FinancialRequest>> {
        let tx = Txn::begin(Arc::clone(&self.store));
        let mut requests: Vec<FinancialRequest> = tx
            .query_eq(
                Collection::FinancialRequests,
                "status",
                RequestStatus::Pending.as_str(),
            )
            .await?;
        requests.retain(|r| kinds.contains(&r.kind()));
        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    pub async fn commissions_for_order(&self, order_id: &str) -> LedgerResult<Vec<CommissionEvent>> {
        let tx = Txn::begin(Arc::clone(&self.store));
        let mut events: Vec<CommissionEvent> = tx
            .query_eq(Collection::CommissionEvents, "order_id", order_id)
            .await?;
        events.sort_by_key(|e| e.level);
        Ok(events)
    }

    pub async fn audit_trail(&self, target_id: &str) -> LedgerResult<Vec<AuditLogEntry>> {
        let tx = Txn::begin(Arc::clone(&self.store));
        let mut entries: Vec<AuditLogEntry> = tx
            .query_eq(Collection::AuditLogs, "target_id", target_id)
            .await?;
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn transition(
        &self,
        request_id: &str,
        actor: &str,
        transition: Transition,
        reason: Option<String>,
    ) -> LedgerResult<TransitionOutcome> {
        let this = self.clone();
        let id = request_id.to_string();
        let actor_id = actor.to_string();
        let result = run_transaction(&self.store, self.retry, move |tx| {
            let this = this.clone();
            let id = id.clone();
            let actor_id = actor_id.clone();
            let reason = reason.clone();
            Box::pin(async move {
                this.transition_in(tx, &id, &actor_id, transition, reason.as_deref())
                    .await
            })
        })
        .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(request_id, action = transition.as_str(), code = e.code(), error = %e, "transition refused");
                return Err(e);
            }
        };

        let request = &outcome.request;
        info!(
            request_id,
            kind = %request.kind(),
            status = %request.status,
            actor,
            commissions = outcome.commissions.len(),
            "request transitioned"
        );
        self.notify_detached(
            NotifyTarget::User(request.user_id.clone()),
            format!(
                "Your {} request {} for {} is now {}",
                request.kind(),
                request.id,
                request.amount,
                request.status
            ),
        );
        self.announce_commissions(&outcome.commissions);
        Ok(outcome)
    }

    async fn transition_in(
        &self,
        tx: &mut Txn,
        request_id: &str,
        actor: &str,
        transition: Transition,
        reason: Option<&str>,
    ) -> LedgerResult<TransitionOutcome> {
        let mut request: FinancialRequest = tx
            .require(Collection::FinancialRequests, request_id)
            .await?;
        let before = request.status;
        let next = next_status(&request, transition)?;
        let mut commissions = Vec::new();

        match (transition, &request.details) {
            (Transition::Approve, RequestDetails::Withdrawal(d)) => {
                let ctx = LedgerContext::new(EntryReason::Withdrawal, request_id);
                WalletLedger::apply(tx, &request.user_id, d.slot, -request.amount, &ctx).await?;
            }
            (Transition::Approve, RequestDetails::Deposit(d)) => {
                let ctx = LedgerContext::new(EntryReason::Deposit, request_id);
                WalletLedger::apply(tx, &request.user_id, d.slot, request.amount, &ctx).await?;
                if let Some(order_id) = &d.order_id {
                    commissions = self
                        .pay_commissions(
                            tx,
                            order_id,
                            &request.user_id,
                            request.amount,
                            d.slot.currency,
                            actor,
                        )
                        .await?;
                }
            }
            (Transition::Succeed, RequestDetails::Swap(d)) => {
                let debit = LedgerContext::new(EntryReason::SwapDebit, request_id);
                WalletLedger::apply(tx, &request.user_id, d.from, -request.amount, &debit).await?;
                let credit = LedgerContext::new(EntryReason::SwapCredit, request_id);
                let credited = d.credited_amount(request.amount);
                WalletLedger::apply(tx, &request.user_id, d.to, credited, &credit).await?;
            }
            _ => {}
        }

        let now = tx.now();
        request.status = next;
        request.updated_at = now;
        match transition {
            Transition::Complete => request.completed_at = Some(now),
            _ => {
                request.reviewed_by = Some(actor.to_string());
                request.reviewed_at = Some(now);
            }
        }
        if next.is_terminal() {
            request.completed_at = Some(now);
        }
        if matches!(transition, Transition::Reject | Transition::Fail) {
            request.rejection_reason = reason.map(str::to_string);
        }
        tx.put(Collection::FinancialRequests, request_id, &request)?;

        record_audit(
            tx,
            actor,
            transition.audit_action(),
            "financial_request",
            request_id,
            json!({ "status": before }),
            json!({ "status": next, "reason": reason }),
        )?;

        Ok(TransitionOutcome {
            request,
            commissions,
        })
    }

    async fn settle_purchase_in(&self, tx: &mut Txn, purchase: Purchase) -> LedgerResult<PurchaseReceipt> {
        let existing: Option<PurchaseRecord> = tx.get(Collection::Purchases, &purchase.order_id).await?;
        if existing.is_some() {
            return Err(LedgerError::AlreadyProcessed {
                request_id: purchase.order_id,
                status: RequestStatus::Completed,
            });
        }

        let slot = BalanceSlot::new(purchase.currency, Subaccount::Purchase)?;
        let ctx = LedgerContext::new(EntryReason::Purchase, &purchase.order_id);
        let buyer_balance =
            WalletLedger::apply(tx, &purchase.buyer_id, slot, -purchase.amount, &ctx).await?;

        let commissions = self
            .pay_commissions(
                tx,
                &purchase.order_id,
                &purchase.buyer_id,
                purchase.amount,
                purchase.currency,
                "system",
            )
            .await?;

        let record = PurchaseRecord {
            order_id: purchase.order_id.clone(),
            buyer_id: purchase.buyer_id.clone(),
            amount: round_money(purchase.amount),
            currency: purchase.currency,
            settled_at: tx.now(),
        };
        tx.create(Collection::Purchases, &record.order_id, &record)?;
        record_audit(
            tx,
            &purchase.buyer_id,
            AuditAction::PurchaseSettled,
            "purchase",
            &purchase.order_id,
            Value::Null,
            serde_json::to_value(&record)?,
        )?;

        Ok(PurchaseReceipt {
            order_id: purchase.order_id,
            buyer_balance,
            commissions,
        })
    }

    /// Credits the payer's Level-1 and Level-2 affiliates for `order_id`.
    ///
    /// Runs inside the caller's transaction. Each (order, level) pair can be
    /// paid once; a second payout for the same pair aborts the transaction.
    async fn pay_commissions(
        &self,
        tx: &mut Txn,
        order_id: &str,
        payer_id: &str,
        base_amount: Decimal,
        currency: Currency,
        actor: &str,
    ) -> LedgerResult<Vec<CommissionEvent>> {
        let chain = ReferralChainResolver::resolve_chain_in(tx, payer_id).await?;
        if chain.is_empty() {
            debug!(order_id, payer_id, "no affiliates, no commission");
            return Ok(Vec::new());
        }
        let Some(level1_id) = chain.level1 else {
            return Ok(Vec::new());
        };
        let level1: User = tx.require(Collection::Users, &level1_id).await?;
        let breakdown = self.calculator.calculate(base_amount, &level1.rank, currency)?;

        let mut payouts = vec![(
            1u8,
            level1_id,
            breakdown.level1_rate,
            breakdown.level1_amount,
            EntryReason::CommissionL1,
        )];
        if let Some(level2_id) = chain.level2 {
            payouts.push((
                2,
                level2_id,
                breakdown.level2_rate,
                breakdown.level2_amount,
                EntryReason::CommissionL2,
            ));
        }

        let mut events = Vec::with_capacity(payouts.len());
        for (level, payee_id, rate, raw_amount, reason) in payouts {
            let amount = round_money(raw_amount);
            if amount <= Decimal::ZERO {
                continue;
            }
            let event_id = CommissionEvent::key(order_id, level);
            let paid: Option<CommissionEvent> = tx.get(Collection::CommissionEvents, &event_id).await?;
            if paid.is_some() {
                info!(order_id, level, payee_id = %payee_id, "commission already paid for order, skipping");
                continue;
            }
            let event = CommissionEvent {
                id: event_id,
                order_id: order_id.to_string(),
                payer_id: payer_id.to_string(),
                payee_id: payee_id.clone(),
                level,
                currency,
                base_amount: round_money(base_amount),
                rate,
                amount,
                created_at: tx.now(),
            };
            tx.create(Collection::CommissionEvents, &event.id, &event)?;

            let ctx = LedgerContext::new(reason, order_id);
            WalletLedger::apply(tx, &payee_id, BalanceSlot::main(currency), amount, &ctx).await?;

            let mut payee: User = tx.require(Collection::Users, &payee_id).await?;
            *payee
                .stats
                .lifetime_earnings
                .entry(currency)
                .or_insert(Decimal::ZERO) += amount;
            tx.put(Collection::Users, &payee_id, &payee)?;

            record_audit(
                tx,
                actor,
                AuditAction::CommissionPaid,
                "commission_event",
                &event.id,
                Value::Null,
                serde_json::to_value(&event)?,
            )?;
            events.push(event);
        }
        Ok(events)
    }

    fn announce_commissions(&self, events: &[CommissionEvent]) {
        for event in events {
            self.notify_detached(
                NotifyTarget::User(event.payee_id.clone()),
                format!(
                    "You earned a Level-{} commission of {} {} on order {}",
                    event.level, event.amount, event.currency, event.order_id
                ),
            );
        }
    }

    /// Delivers on a background task; the caller never waits on the sink.
    fn notify_detached(&self, target: NotifyTarget, message: String) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notify_best_effort(notifier.as_ref(), target, message).await;
        });
    }
}

/// Rounds the amount and checks slots before anything is persisted.
fn validate(mut new_request: NewRequest) -> LedgerResult<NewRequest> {
    new_request.amount = round_money(new_request.amount);
    if new_request.amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "request amount must be > 0, got {}",
            new_request.amount
        )));
    }
    match &new_request.details {
        RequestDetails::Deposit(d) => {
            BalanceSlot::new(d.slot.currency, d.slot.subaccount)?;
        }
        RequestDetails::Withdrawal(d) => {
            BalanceSlot::new(d.slot.currency, d.slot.subaccount)?;
        }
        RequestDetails::Swap(d) => {
            BalanceSlot::new(d.from.currency, d.from.subaccount)?;
            BalanceSlot::new(d.to.currency, d.to.subaccount)?;
            if d.rate <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(format!(
                    "swap rate must be > 0, got {}",
                    d.rate
                )));
            }
            if d.credited_amount(new_request.amount) <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(
                    "swap credits nothing at this rate".to_string(),
                ));
            }
        }
    }
    Ok(new_request)
}

async fn submit_in(tx: &mut Txn, new_request: NewRequest) -> LedgerResult<FinancialRequest> {
    // the requester must have a wallet to settle against
    let _: Wallet = tx.require(Collection::Wallets, &new_request.user_id).await?;

    let now = tx.now();
    let request = FinancialRequest {
        id: Uuid::new_v4().to_string(),
        user_id: new_request.user_id,
        amount: new_request.amount,
        status: RequestStatus::Pending,
        details: new_request.details,
        created_at: now,
        updated_at: now,
        reviewed_by: None,
        reviewed_at: None,
        completed_at: None,
        rejection_reason: None,
    };
    tx.create(Collection::FinancialRequests, &request.id, &request)?;
    record_audit(
        tx,
        &request.user_id,
        AuditAction::RequestSubmitted,
        "financial_request",
        &request.id,
        Value::Null,
        json!({ "status": request.status, "kind": request.kind(), "amount": request.amount }),
    )?;
    Ok(request)
}

fn record_audit(
    tx: &mut Txn,
    actor: &str,
    action: AuditAction,
    target_type: &str,
    target_id: &str,
    before: Value,
    after: Value,
) -> LedgerResult<()> {
    let entry = AuditLogEntry {
        id: Uuid::new_v4().to_string(),
        actor: actor.to_string(),
        action,
        target_type: target_type.to_string(),
        target_id: target_id.to_string(),
        before,
        after,
        created_at: tx.now(),
    };
    tx.create(Collection::AuditLogs, &entry.id, &entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositDetails, SwapDetails, WithdrawalDetails};

    fn request(details: RequestDetails, status: RequestStatus) -> FinancialRequest {
        let now = Utc::now();
        FinancialRequest {
            id: "r1".into(),
            user_id: "u1".into(),
            amount: Decimal::ONE,
            status,
            details,
            created_at: now,
            updated_at: now,
            reviewed_by: None,
            reviewed_at: None,
            completed_at: None,
            rejection_reason: None,
        }
    }

    fn withdrawal(status: RequestStatus) -> FinancialRequest {
        request(
            RequestDetails::Withdrawal(WithdrawalDetails {
                slot: BalanceSlot::main(Currency::Usdt),
                method: "bank".into(),
                payout_address: None,
            }),
            status,
        )
    }

    fn swap(status: RequestStatus) -> FinancialRequest {
        request(
            RequestDetails::Swap(SwapDetails {
                from: BalanceSlot::main(Currency::Usdt),
                to: BalanceSlot::main(Currency::Dlx),
                rate: Decimal::TEN,
                external_ref: None,
            }),
            status,
        )
    }

    #[test]
    fn deposit_and_withdrawal_lane() {
        let pending = withdrawal(RequestStatus::Pending);
        assert_eq!(next_status(&pending, Transition::Approve).unwrap(), RequestStatus::Approved);
        assert_eq!(next_status(&pending, Transition::Reject).unwrap(), RequestStatus::Rejected);
        assert!(matches!(
            next_status(&pending, Transition::Complete),
            Err(LedgerError::InvalidTransition { .. })
        ));

        let approved = withdrawal(RequestStatus::Approved);
        assert_eq!(next_status(&approved, Transition::Complete).unwrap(), RequestStatus::Completed);
        assert!(matches!(
            next_status(&approved, Transition::Approve),
            Err(LedgerError::AlreadyProcessed { .. })
        ));
    }

    #[test]
    fn terminal_states_refuse_everything() {
        for status in [RequestStatus::Rejected, RequestStatus::Completed] {
            let r = withdrawal(status);
            for t in [Transition::Approve, Transition::Reject, Transition::Complete] {
                assert!(matches!(
                    next_status(&r, t),
                    Err(LedgerError::AlreadyProcessed { .. })
                ));
            }
        }
        for status in [RequestStatus::Success, RequestStatus::Failed] {
            let r = swap(status);
            for t in [Transition::Succeed, Transition::Fail] {
                assert!(matches!(
                    next_status(&r, t),
                    Err(LedgerError::AlreadyProcessed { .. })
                ));
            }
        }
    }

    #[test]
    fn lanes_do_not_mix() {
        let s = swap(RequestStatus::Pending);
        assert_eq!(next_status(&s, Transition::Succeed).unwrap(), RequestStatus::Success);
        assert_eq!(next_status(&s, Transition::Fail).unwrap(), RequestStatus::Failed);
        assert!(matches!(
            next_status(&s, Transition::Approve),
            Err(LedgerError::InvalidTransition { .. })
        ));

        let d = request(
            RequestDetails::Deposit(DepositDetails {
                slot: BalanceSlot::main(Currency::Inr),
                method: "upi".into(),
                external_ref: None,
                order_id: None,
            }),
            RequestStatus::Pending,
        );
        assert!(matches!(
            next_status(&d, Transition::Succeed),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn validate_rounds_and_rejects() {
        let new = |amount: Decimal, rate: Decimal| NewRequest {
            user_id: "u1".into(),
            amount,
            details: RequestDetails::Swap(SwapDetails {
                from: BalanceSlot::main(Currency::Usdt),
                to: BalanceSlot::main(Currency::Dlx),
                rate,
                external_ref: None,
            }),
        };
        assert!(matches!(
            validate(new(Decimal::new(4, 3), Decimal::ONE)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate(new(Decimal::ONE, Decimal::ZERO)),
            Err(LedgerError::InvalidAmount(_))
        ));
        let ok = validate(new(Decimal::new(12345, 3), Decimal::ONE)).unwrap();
        assert_eq!(ok.amount, Decimal::new(1235, 2));

        let bad_slot = NewRequest {
            user_id: "u1".into(),
            amount: Decimal::ONE,
            details: RequestDetails::Withdrawal(WithdrawalDetails {
                slot: BalanceSlot {
                    currency: Currency::Dlx,
                    subaccount: Subaccount::Purchase,
                },
                method: "bank".into(),
                payout_address: None,
            }),
        };
        assert!(matches!(
            validate(bad_slot),
            Err(LedgerError::UnsupportedSubaccount { .. })
        ));
    }
}
