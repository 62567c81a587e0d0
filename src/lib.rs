//! Referral commission and multi-currency wallet ledger for the DLX marketplace.

mod api;
pub mod commission;
pub mod config;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod rank;
pub mod reconciliation;
pub mod referral;
mod responses;
pub mod store;
pub mod types;
pub mod workflow;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use api::{AppState, init_router};
pub use commission::{CommissionBreakdown, CommissionCalculator};
pub use config::Config;
pub use error::{LedgerError, LedgerResult, StoreError};
pub use ledger::{LedgerContext, WalletLedger};
pub use notify::{Notifier, NotifyTarget, StoreNotifier, TracingNotifier};
pub use rank::{Rank, RankTable};
pub use reconciliation::{NoopVerifier, ReconciliationJob, ReconciliationReport, RequestVerifier};
pub use referral::{NewUser, ReferralChain, ReferralChainResolver, ReferralDirectory};
pub use store::{DocumentStore, MemoryStore, PgStore, RetryPolicy};
pub use workflow::{NewRequest, RequestWorkflow, TransitionOutcome};

/// Opens the configured document store: Postgres when a database URL is set,
/// otherwise an in-process store.
pub async fn init_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            info!("using postgres document store");
            Ok(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Persisted notifications with a database, log-only notifications otherwise.
fn notifier_for(config: &Config, store: Arc<dyn DocumentStore>) -> Arc<dyn Notifier> {
    if config.database_url.is_some() {
        Arc::new(StoreNotifier::new(store))
    } else {
        Arc::new(TracingNotifier)
    }
}

/// Wires the ledger components over `store`.
pub fn build_state(
    config: &Config,
    store: Arc<dyn DocumentStore>,
    verifier: Arc<dyn RequestVerifier>,
) -> AppState {
    let retry = config.retry_policy();
    let ranks = Arc::new(RankTable::default());
    let notifier = notifier_for(config, Arc::clone(&store));

    let workflow = RequestWorkflow::new(
        Arc::clone(&store),
        retry,
        CommissionCalculator::new(ranks),
        notifier,
    );
    let reconciler = Arc::new(ReconciliationJob::new(
        workflow.clone(),
        verifier,
        config.stale_after(),
    ));

    AppState {
        workflow,
        ledger: WalletLedger::new(Arc::clone(&store), retry),
        directory: ReferralDirectory::new(Arc::clone(&store), retry),
        resolver: ReferralChainResolver::new(store),
        reconciler,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::types::{BalanceSlot, Currency, DepositDetails, RequestDetails, RequestStatus};

    fn memory_config() -> Config {
        ::config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn memory_setup_approves_deposits() {
        let config = memory_config();
        assert!(config.database_url.is_none());
        let store = init_store(&config).await.unwrap();
        let state = build_state(&config, store, Arc::new(NoopVerifier));

        state
            .directory
            .register(NewUser {
                id: "u1".into(),
                rank: "dlx-starter".into(),
                referral_code: "U1".into(),
                referred_by_code: None,
            })
            .await
            .unwrap();
        let request = state
            .workflow
            .submit(NewRequest {
                user_id: "u1".into(),
                amount: dec!(12.5),
                details: RequestDetails::Deposit(DepositDetails {
                    slot: BalanceSlot::main(Currency::Inr),
                    method: "upi".into(),
                    external_ref: None,
                    order_id: None,
                }),
            })
            .await
            .unwrap();
        let outcome = state.workflow.approve(&request.id, "admin").await.unwrap();

        assert_eq!(outcome.request.status, RequestStatus::Approved);
        let wallet = state.ledger.wallet("u1").await.unwrap();
        assert_eq!(wallet.main_inr, dec!(12.50));
    }
}
