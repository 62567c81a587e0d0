use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration;
use dlx_ledger::store::{Collection, Txn};
use dlx_ledger::types::{
    AffiliateStats, AuditAction, BalanceSlot, Currency, DepositDetails, EntryReason,
    FinancialRequest, Purchase, RequestDetails, RequestStatus, Subaccount, SwapDetails, User,
    WithdrawalDetails,
};
use dlx_ledger::{
    CommissionCalculator, DocumentStore, LedgerContext, LedgerError, MemoryStore, NewRequest,
    NewUser, Notifier, NotifyTarget, RankTable, ReconciliationJob, ReferralDirectory,
    RequestVerifier, RequestWorkflow, RetryPolicy, WalletLedger,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(NotifyTarget, String)>>,
    broken: bool,
    delay: Option<std::time::Duration>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, target: &NotifyTarget, message: &str) -> anyhow::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.broken {
            anyhow::bail!("notification backend down");
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), message.to_string()));
        Ok(())
    }
}

impl RecordingNotifier {
    fn sent_to(&self, user_id: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == NotifyTarget::User(user_id.to_string()))
            .count()
    }
}

#[derive(Default)]
struct FixedVerifier {
    verified: HashSet<String>,
    broken: HashSet<String>,
}

#[async_trait]
impl RequestVerifier for FixedVerifier {
    async fn verify(&self, request: &FinancialRequest) -> anyhow::Result<bool> {
        if self.broken.contains(&request.id) {
            anyhow::bail!("gateway timeout");
        }
        Ok(self.verified.contains(&request.id))
    }
}

struct Harness {
    mem: Arc<MemoryStore>,
    workflow: RequestWorkflow,
    ledger: WalletLedger,
    directory: ReferralDirectory,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(notifier: RecordingNotifier) -> Harness {
    let mem = Arc::new(MemoryStore::new());
    let store: Arc<dyn DocumentStore> = mem.clone();
    let retry = RetryPolicy::default();
    let notifier = Arc::new(notifier);
    let workflow = RequestWorkflow::new(
        store.clone(),
        retry,
        CommissionCalculator::new(Arc::new(RankTable::default())),
        notifier.clone(),
    );
    Harness {
        mem,
        workflow,
        ledger: WalletLedger::new(store.clone(), retry),
        directory: ReferralDirectory::new(store, retry),
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(RecordingNotifier::default())
}

impl Harness {
    async fn user(&self, id: &str, rank: &str, referred_by: Option<&str>) {
        self.directory
            .register(NewUser {
                id: id.to_string(),
                rank: rank.to_string(),
                referral_code: format!("CODE-{id}"),
                referred_by_code: referred_by.map(|r| format!("CODE-{r}")),
            })
            .await
            .unwrap();
    }

    /// buyer -> l1 (director) -> l2
    async fn chain(&self) {
        self.user("l2", "dlx-starter", None).await;
        self.user("l1", "dlx-director", Some("l2")).await;
        self.user("buyer", "dlx-starter", Some("l1")).await;
    }

    async fn fund(&self, user_id: &str, slot: BalanceSlot, amount: Decimal) {
        self.ledger
            .apply_one(
                user_id,
                slot,
                amount,
                LedgerContext::new(EntryReason::Adjustment, "seed"),
            )
            .await
            .unwrap();
    }

    /// Notifications are delivered on background tasks.
    async fn notifications_for(&self, user_id: &str, expected: usize) -> usize {
        for _ in 0..200 {
            if self.notifier.sent_to(user_id) >= expected {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.notifier.sent_to(user_id)
    }

    async fn balance(&self, user_id: &str, slot: BalanceSlot) -> Decimal {
        self.ledger.wallet(user_id).await.unwrap().balance(slot)
    }

    async fn submit(&self, user_id: &str, amount: Decimal, details: RequestDetails) -> FinancialRequest {
        self.workflow
            .submit(NewRequest {
                user_id: user_id.to_string(),
                amount,
                details,
            })
            .await
            .unwrap()
    }
}

fn usdt() -> BalanceSlot {
    BalanceSlot::main(Currency::Usdt)
}

fn withdrawal() -> RequestDetails {
    RequestDetails::Withdrawal(WithdrawalDetails {
        slot: usdt(),
        method: "trc20".into(),
        payout_address: Some("TXyz".into()),
    })
}

fn deposit(order_id: Option<&str>) -> RequestDetails {
    RequestDetails::Deposit(DepositDetails {
        slot: usdt(),
        method: "upi".into(),
        external_ref: Some("utr-1".into()),
        order_id: order_id.map(str::to_string),
    })
}

fn usdt_to_dlx(rate: Decimal) -> RequestDetails {
    RequestDetails::Swap(SwapDetails {
        from: usdt(),
        to: BalanceSlot::main(Currency::Dlx),
        rate,
        external_ref: None,
    })
}

#[tokio::test]
async fn withdrawal_guard_keeps_request_pending() {
    let h = harness();
    h.user("u1", "starter", None).await;
    h.fund("u1", usdt(), dec!(100.00)).await;

    let too_big = h.submit("u1", dec!(150.00), withdrawal()).await;
    let err = h.workflow.approve(&too_big.id, "admin").await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(
        h.workflow.request(&too_big.id).await.unwrap().status,
        RequestStatus::Pending
    );
    assert_eq!(h.balance("u1", usdt()).await, dec!(100.00));

    let exact = h.submit("u1", dec!(100.00), withdrawal()).await;
    let outcome = h.workflow.approve(&exact.id, "admin").await.unwrap();
    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert_eq!(outcome.request.reviewed_by.as_deref(), Some("admin"));
    assert_eq!(h.balance("u1", usdt()).await, dec!(0.00));

    let done = h.workflow.complete(&exact.id, "admin").await.unwrap();
    assert_eq!(done.status, RequestStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn deposit_for_order_pays_both_levels_once() {
    let h = harness();
    h.chain().await;

    let request = h.submit("buyer", dec!(1000), deposit(Some("order-1"))).await;
    let outcome = h.workflow.approve(&request.id, "admin").await.unwrap();

    assert_eq!(outcome.commissions.len(), 2);
    assert_eq!(outcome.commissions[0].level, 1);
    assert_eq!(outcome.commissions[0].payee_id, "l1");
    assert_eq!(outcome.commissions[0].rate, dec!(35));
    assert_eq!(outcome.commissions[0].amount, dec!(350.00));
    assert_eq!(outcome.commissions[1].payee_id, "l2");
    assert_eq!(outcome.commissions[1].amount, dec!(52.50));

    assert_eq!(h.balance("buyer", usdt()).await, dec!(1000));
    assert_eq!(h.balance("l1", usdt()).await, dec!(350.00));
    assert_eq!(h.balance("l2", usdt()).await, dec!(52.50));

    // second click on the same request
    let err = h.workflow.approve(&request.id, "admin").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AlreadyProcessed {
            status: RequestStatus::Approved,
            ..
        }
    ));
    assert_eq!(h.balance("buyer", usdt()).await, dec!(1000));
    assert_eq!(h.balance("l1", usdt()).await, dec!(350.00));
    assert_eq!(h.workflow.commissions_for_order("order-1").await.unwrap().len(), 2);

    let l1 = h.directory.user("l1").await.unwrap();
    assert_eq!(l1.stats.lifetime_earnings.get(&Currency::Usdt), Some(&dec!(350.00)));

    let trail = h.workflow.audit_trail(&request.id).await.unwrap();
    let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        [AuditAction::RequestSubmitted, AuditAction::RequestApproved]
    );
    assert_eq!(h.mem.count(Collection::CommissionEvents).await, 2);
    assert_eq!(h.notifications_for("l1", 1).await, 1);
}

#[tokio::test]
async fn plain_deposit_pays_no_commission() {
    let h = harness();
    h.chain().await;

    let request = h.submit("buyer", dec!(40), deposit(None)).await;
    let outcome = h.workflow.approve(&request.id, "admin").await.unwrap();
    assert!(outcome.commissions.is_empty());
    assert_eq!(h.balance("l1", usdt()).await, Decimal::ZERO);
}

#[tokio::test]
async fn failed_level2_credit_rolls_back_every_leg() {
    let h = harness();
    h.chain().await;
    let request = h.submit("buyer", dec!(1000), deposit(Some("order-7"))).await;

    h.mem.fail_reads_of(Collection::Wallets, "l2").await;
    let err = h.workflow.approve(&request.id, "admin").await.unwrap_err();
    assert!(matches!(err, LedgerError::Store(_)));
    h.mem.clear_failures().await;

    assert_eq!(
        h.workflow.request(&request.id).await.unwrap().status,
        RequestStatus::Pending
    );
    assert_eq!(h.balance("buyer", usdt()).await, Decimal::ZERO);
    assert_eq!(h.balance("l1", usdt()).await, Decimal::ZERO);
    assert_eq!(h.mem.count(Collection::CommissionEvents).await, 0);

    // once the store recovers the same approval goes through
    assert_ok!(h.workflow.approve(&request.id, "admin").await);
    assert_eq!(h.balance("l2", usdt()).await, dec!(52.50));
}

#[tokio::test]
async fn purchase_debit_and_commissions_are_atomic() {
    let h = harness();
    h.chain().await;
    let purchase_usdt = BalanceSlot::new(Currency::Usdt, Subaccount::Purchase).unwrap();
    h.fund("buyer", purchase_usdt, dec!(500)).await;

    let purchase = Purchase {
        order_id: "svc-42".into(),
        buyer_id: "buyer".into(),
        amount: dec!(200),
        currency: Currency::Usdt,
    };

    h.mem.fail_reads_of(Collection::Wallets, "l2").await;
    assert!(h.workflow.settle_purchase(purchase.clone()).await.is_err());
    h.mem.clear_failures().await;
    assert_eq!(h.balance("buyer", purchase_usdt).await, dec!(500));
    assert_eq!(h.balance("l1", usdt()).await, Decimal::ZERO);

    let receipt = h.workflow.settle_purchase(purchase.clone()).await.unwrap();
    assert_eq!(receipt.buyer_balance, dec!(300));
    // 35% of 200 = 70; 15% of 70 = 10.50
    assert_eq!(h.balance("l1", usdt()).await, dec!(70.00));
    assert_eq!(h.balance("l2", usdt()).await, dec!(10.50));

    let err = h.workflow.settle_purchase(purchase).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
    assert_eq!(h.balance("buyer", purchase_usdt).await, dec!(300));
}

#[tokio::test]
async fn purchase_without_funds_is_refused() {
    let h = harness();
    h.chain().await;
    let err = h
        .workflow
        .settle_purchase(Purchase {
            order_id: "svc-1".into(),
            buyer_id: "buyer".into(),
            amount: dec!(10),
            currency: Currency::Inr,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    assert_eq!(h.mem.count(Collection::CommissionEvents).await, 0);
}

#[tokio::test]
async fn rejection_is_terminal() {
    let h = harness();
    h.user("u1", "starter", None).await;
    let request = h.submit("u1", dec!(25), deposit(None)).await;

    let rejected = h.workflow.reject(&request.id, "admin", "utr mismatch").await.unwrap();
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("utr mismatch"));

    let err = h.workflow.approve(&request.id, "admin").await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AlreadyProcessed {
            status: RequestStatus::Rejected,
            ..
        }
    ));
    assert_eq!(h.balance("u1", usdt()).await, Decimal::ZERO);
    assert_eq!(h.workflow.audit_trail(&request.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn submission_is_validated() {
    let h = harness();
    h.user("u1", "starter", None).await;

    let err = h
        .workflow
        .submit(NewRequest {
            user_id: "u1".into(),
            amount: dec!(-1),
            details: withdrawal(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));

    let err = h
        .workflow
        .submit(NewRequest {
            user_id: "ghost".into(),
            amount: dec!(1),
            details: withdrawal(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::RecordNotFound { .. }));
    assert_eq!(h.mem.count(Collection::FinancialRequests).await, 0);
}

#[tokio::test]
async fn swap_moves_both_slots() {
    let h = harness();
    h.user("u1", "starter", None).await;
    h.fund("u1", usdt(), dec!(100)).await;

    let swap = h.submit("u1", dec!(40), usdt_to_dlx(dec!(12.5))).await;
    let err = h.workflow.approve(&swap.id, "admin").await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));

    let settled = h.workflow.settle_swap(&swap.id, "admin").await.unwrap();
    assert_eq!(settled.status, RequestStatus::Success);
    assert_eq!(h.balance("u1", usdt()).await, dec!(60));
    assert_eq!(h.balance("u1", BalanceSlot::main(Currency::Dlx)).await, dec!(500));

    let err = h.workflow.fail_swap(&swap.id, "admin", "late").await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyProcessed { .. }));
}

#[tokio::test]
async fn notification_outage_does_not_undo_money_movement() {
    let h = harness_with(RecordingNotifier {
        broken: true,
        ..Default::default()
    });
    h.user("u1", "starter", None).await;
    let request = h.submit("u1", dec!(10), deposit(None)).await;
    let outcome = h.workflow.approve(&request.id, "admin").await.unwrap();
    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert_eq!(h.balance("u1", usdt()).await, dec!(10));
}

#[tokio::test]
async fn slow_notifier_does_not_delay_approval() {
    let h = harness_with(RecordingNotifier {
        delay: Some(std::time::Duration::from_secs(30)),
        ..Default::default()
    });
    h.user("u1", "starter", None).await;
    let request = h.submit("u1", dec!(10), deposit(None)).await;

    let approved = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        h.workflow.approve(&request.id, "admin"),
    )
    .await
    .expect("approval waited on the notifier");
    assert_ok!(approved);
    assert_eq!(h.balance("u1", usdt()).await, dec!(10));
}

#[tokio::test]
async fn second_deposit_for_paid_order_still_credits_principal() {
    let h = harness();
    h.chain().await;

    let first = h.submit("buyer", dec!(1000), deposit(Some("order-5"))).await;
    assert_ok!(h.workflow.approve(&first.id, "admin").await);

    let second = h.submit("buyer", dec!(200), deposit(Some("order-5"))).await;
    let outcome = h.workflow.approve(&second.id, "admin").await.unwrap();

    assert_eq!(outcome.request.status, RequestStatus::Approved);
    assert!(outcome.commissions.is_empty());
    assert_eq!(h.balance("buyer", usdt()).await, dec!(1200));
    assert_eq!(h.balance("l1", usdt()).await, dec!(350.00));
    assert_eq!(h.balance("l2", usdt()).await, dec!(52.50));
    assert_eq!(h.workflow.commissions_for_order("order-5").await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_apply_once() {
    let h = harness();
    h.user("u1", "starter", None).await;
    h.fund("u1", usdt(), dec!(100)).await;
    let request = h.submit("u1", dec!(60), withdrawal()).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let workflow = h.workflow.clone();
            let id = request.id.clone();
            tokio::spawn(async move { workflow.approve(&id, "admin").await })
        })
        .collect();

    let mut approved = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(LedgerError::AlreadyProcessed { .. }) => already += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((approved, already), (1, 1));
    assert_eq!(h.balance("u1", usdt()).await, dec!(40));
    assert_eq!(h.ledger.entries("u1").await.unwrap().len(), 2);
}

fn job(h: &Harness, verifier: FixedVerifier) -> ReconciliationJob {
    ReconciliationJob::new(h.workflow.clone(), Arc::new(verifier), Duration::hours(24))
}

#[tokio::test]
async fn stale_unverified_swap_fails_after_threshold() {
    let h = harness();
    h.user("u1", "starter", None).await;
    h.fund("u1", usdt(), dec!(100)).await;
    let swap = h.submit("u1", dec!(10), usdt_to_dlx(dec!(10))).await;
    let job = job(&h, FixedVerifier::default());

    let report = job.run_at(swap.created_at + Duration::hours(23)).await;
    assert_eq!(report.left_pending, 1);
    assert_eq!(
        h.workflow.request(&swap.id).await.unwrap().status,
        RequestStatus::Pending
    );

    let report = job.run_at(swap.created_at + Duration::hours(25)).await;
    assert_eq!(report.expired, 1);
    assert!(report.errors.is_empty());
    let failed = h.workflow.request(&swap.id).await.unwrap();
    assert_eq!(failed.status, RequestStatus::Failed);
    assert!(failed.rejection_reason.unwrap().starts_with("expired"));
    assert_eq!(h.balance("u1", usdt()).await, dec!(100));

    // terminal requests are no longer scanned
    let report = job.run_at(swap.created_at + Duration::hours(48)).await;
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn verified_requests_settle_and_errors_stay_isolated() {
    let h = harness();
    h.chain().await;
    h.fund("buyer", usdt(), dec!(50)).await;

    let paid = h.submit("buyer", dec!(100), deposit(Some("order-9"))).await;
    let swap = h.submit("buyer", dec!(20), usdt_to_dlx(dec!(2))).await;
    let flaky = h.submit("buyer", dec!(5), deposit(None)).await;
    let stale = h.submit("buyer", dec!(7), deposit(None)).await;
    let payout = h.submit("buyer", dec!(1), withdrawal()).await;

    let verifier = FixedVerifier {
        verified: [paid.id.clone(), swap.id.clone()].into_iter().collect(),
        broken: [flaky.id.clone()].into_iter().collect(),
    };
    let report = job(&h, verifier).run_at(paid.created_at + Duration::hours(1)).await;

    assert_eq!(report.scanned, 4);
    assert_eq!(report.settled, 2);
    // the unverifiable item is reported and also counted as left pending
    assert_eq!(report.left_pending, 2);
    assert_eq!(report.settled + report.left_pending, report.scanned);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].request_id, flaky.id);

    assert_eq!(
        h.workflow.request(&paid.id).await.unwrap().status,
        RequestStatus::Approved
    );
    assert_eq!(
        h.workflow.request(&swap.id).await.unwrap().status,
        RequestStatus::Success
    );
    assert_eq!(
        h.workflow.request(&stale.id).await.unwrap().status,
        RequestStatus::Pending
    );
    // withdrawals are left to admins
    assert_eq!(
        h.workflow.request(&payout.id).await.unwrap().status,
        RequestStatus::Pending
    );
    // 50 + 100 deposit - 20 swapped
    assert_eq!(h.balance("buyer", usdt()).await, dec!(130));
    assert_eq!(h.balance("l1", usdt()).await, dec!(35.00));
}

#[tokio::test]
async fn store_failure_on_one_request_does_not_stop_the_sweep() {
    let h = harness();
    h.user("a", "starter", None).await;
    h.user("b", "starter", None).await;
    let first = h.submit("a", dec!(5), deposit(None)).await;
    let second = h.submit("b", dec!(5), deposit(None)).await;

    h.mem.fail_reads_of(Collection::Wallets, "a").await;
    let verifier = FixedVerifier {
        verified: [first.id.clone(), second.id.clone()].into_iter().collect(),
        ..Default::default()
    };
    let report = job(&h, verifier).run().await;

    assert_eq!(report.settled, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].request_id, first.id);
    assert_eq!(h.balance("b", usdt()).await, dec!(5));
}

#[tokio::test]
async fn verified_deposit_that_cannot_settle_expires_once_stale() {
    let h = harness();
    let mut tx = Txn::begin(h.mem.clone());
    let affiliate = User {
        id: "walletless".into(),
        rank: "dlx-director".into(),
        referred_by: None,
        referral_code: "CODE-walletless".into(),
        stats: AffiliateStats::default(),
        created_at: tx.now(),
    };
    let buyer = User {
        id: "buyer".into(),
        rank: "dlx-starter".into(),
        referred_by: Some("walletless".into()),
        referral_code: "CODE-buyer".into(),
        stats: AffiliateStats::default(),
        created_at: tx.now(),
    };
    tx.put(Collection::Users, "walletless", &affiliate).unwrap();
    tx.put(Collection::Users, "buyer", &buyer).unwrap();
    WalletLedger::open(&mut tx, "buyer").unwrap();
    tx.commit().await.unwrap();

    let request = h.submit("buyer", dec!(100), deposit(Some("order-x"))).await;
    let job = job(
        &h,
        FixedVerifier {
            verified: [request.id.clone()].into_iter().collect(),
            ..Default::default()
        },
    );

    let report = job.run_at(request.created_at + Duration::hours(1)).await;
    assert_eq!(report.errors.len(), 1);
    assert_eq!(
        h.workflow.request(&request.id).await.unwrap().status,
        RequestStatus::Pending
    );

    let report = job.run_at(request.created_at + Duration::hours(25)).await;
    assert_eq!(report.expired, 1);
    assert!(report.errors.is_empty());
    let expired = h.workflow.request(&request.id).await.unwrap();
    assert_eq!(expired.status, RequestStatus::Rejected);
    assert_eq!(h.balance("buyer", usdt()).await, Decimal::ZERO);
}
