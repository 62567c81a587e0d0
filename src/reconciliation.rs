//! Sweep that resolves stuck `pending` deposits and swaps.
//!
//! Verified requests are settled through the workflow. Requests that stay
//! unverifiable past the staleness threshold are failed so funds are never
//! left in limbo indefinitely. Each request is handled on its own; one
//! failure never stops the sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{FinancialRequest, RequestKind};
use crate::workflow::RequestWorkflow;

pub const RECONCILER_ACTOR: &str = "reconciler";

/// Confirms a request against the outside world (chain, payment gateway).
#[async_trait]
pub trait RequestVerifier: Send + Sync {
    async fn verify(&self, request: &FinancialRequest) -> anyhow::Result<bool>;
}

/// Verifier that never confirms anything; pending items only ever expire.
pub struct NoopVerifier;

#[async_trait]
impl RequestVerifier for NoopVerifier {
    async fn verify(&self, _request: &FinancialRequest) -> anyhow::Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileFailure {
    pub request_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub scanned: u64,
    pub settled: u64,
    pub expired: u64,
    pub left_pending: u64,
    /// Already terminal by the time the sweep reached them.
    pub skipped: u64,
    /// Items whose verification or settlement failed. A failed verification
    /// counts as unverified, so that item also appears in `left_pending` or
    /// `expired`.
    pub errors: Vec<ReconcileFailure>,
}

impl ReconciliationReport {
    fn fail(&mut self, request_id: &str, error: impl ToString) {
        self.errors.push(ReconcileFailure {
            request_id: request_id.to_string(),
            error: error.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Settled,
    Expired,
    LeftPending,
}

pub struct ReconciliationJob {
    workflow: RequestWorkflow,
    verifier: Arc<dyn RequestVerifier>,
    stale_after: chrono::Duration,
}

impl ReconciliationJob {
    pub fn new(
        workflow: RequestWorkflow,
        verifier: Arc<dyn RequestVerifier>,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            workflow,
            verifier,
            stale_after,
        }
    }

    pub async fn run(&self) -> ReconciliationReport {
        self.run_at(Utc::now()).await
    }

    /// Sweeps every pending deposit and swap as of `now`. Never fails; per-item
    /// errors are collected in the report.
    pub async fn run_at(&self, now: DateTime<Utc>) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        let pending = match self
            .workflow
            .pending(&[RequestKind::Deposit, RequestKind::Swap])
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "failed to list pending requests");
                report.fail("*", e);
                return report;
            }
        };

        for request in pending {
            report.scanned += 1;

            let verified = match self.verifier.verify(&request).await {
                Ok(verified) => verified,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "verification failed");
                    report.fail(&request.id, format!("verification failed: {e}"));
                    false
                }
            };

            match self.reconcile_one(&request, verified, now).await {
                Ok(Outcome::Settled) => report.settled += 1,
                Ok(Outcome::Expired) => report.expired += 1,
                Ok(Outcome::LeftPending) => report.left_pending += 1,
                Err(LedgerError::AlreadyProcessed { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(request_id = %request.id, code = e.code(), error = %e, "reconciliation failed");
                    report.fail(&request.id, e);
                }
            }
        }

        info!(
            scanned = report.scanned,
            settled = report.settled,
            expired = report.expired,
            left_pending = report.left_pending,
            skipped = report.skipped,
            errors = report.errors.len(),
            "reconciliation finished"
        );
        report
    }

    fn is_stale(&self, request: &FinancialRequest, now: DateTime<Utc>) -> bool {
        now - request.created_at > self.stale_after
    }

    async fn reconcile_one(
        &self,
        request: &FinancialRequest,
        verified: bool,
        now: DateTime<Utc>,
    ) -> LedgerResult<Outcome> {
        if verified {
            let settled = match request.kind() {
                RequestKind::Swap => self
                    .workflow
                    .settle_swap(&request.id, RECONCILER_ACTOR)
                    .await
                    .map(|_| ()),
                _ => self
                    .workflow
                    .approve(&request.id, RECONCILER_ACTOR)
                    .await
                    .map(|_| ()),
            };
            match settled {
                Ok(()) => return Ok(Outcome::Settled),
                // store outages and races are retried on the next sweep
                Err(e @ (LedgerError::AlreadyProcessed { .. } | LedgerError::Store(_))) => return Err(e),
                Err(e) if e.is_retryable() || !self.is_stale(request, now) => return Err(e),
                // a verified request that cannot settle still expires eventually
                Err(e) => {
                    warn!(request_id = %request.id, code = e.code(), error = %e, "verified request cannot settle, expiring");
                }
            }
        } else if !self.is_stale(request, now) {
            return Ok(Outcome::LeftPending);
        }

        let reason = format!(
            "expired: not settled within {} hours",
            self.stale_after.num_hours()
        );
        match request.kind() {
            RequestKind::Swap => {
                self.workflow
                    .fail_swap(&request.id, RECONCILER_ACTOR, &reason)
                    .await?;
            }
            _ => {
                self.workflow
                    .reject(&request.id, RECONCILER_ACTOR, &reason)
                    .await?;
            }
        }
        Ok(Outcome::Expired)
    }

    /// Runs the sweep every `period` until the task is dropped.
    pub async fn run_every(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.run().await;
            for failure in &report.errors {
                warn!(request_id = %failure.request_id, error = %failure.error, "unreconciled request");
            }
        }
    }
}
