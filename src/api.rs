use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::ApiErrorWithMeta;
use crate::ledger::WalletLedger;
use crate::reconciliation::{ReconciliationJob, ReconciliationReport};
use crate::referral::{NewUser, ReferralChain, ReferralChainResolver, ReferralDirectory};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::types::{FinancialRequest, Purchase, User, Wallet};
use crate::workflow::{NewRequest, PurchaseReceipt, RequestWorkflow, TransitionOutcome};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    pub workflow: RequestWorkflow,
    pub ledger: WalletLedger,
    pub directory: ReferralDirectory,
    pub resolver: ReferralChainResolver,
    pub reconciler: Arc<ReconciliationJob>,
}

/// Body of approve and complete calls.
#[derive(Deserialize)]
pub struct ReviewBody {
    /// Admin performing the action.
    pub reviewer: String,
}

#[derive(Deserialize)]
pub struct RejectBody {
    pub reviewer: String,
    pub reason: String,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/users", post(register_user_handler))
        .route("/users/{user_id}/chain", get(referral_chain_handler))
        .route("/wallets/{user_id}", get(get_wallet_handler))
        .route("/requests", post(submit_request_handler))
        .route("/requests/{id}", get(get_request_handler))
        .route("/requests/{id}/approve", post(approve_handler))
        .route("/requests/{id}/reject", post(reject_handler))
        .route("/requests/{id}/complete", post(complete_handler))
        .route("/purchases", post(settle_purchase_handler))
        .route("/reconcile", post(reconcile_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn register_user_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<NewUser>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    let user = st
        .directory
        .register(req)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("user registered", user, meta))
}

async fn referral_chain_handler(
    State(st): State<AppState>,
    Path(user_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<ReferralChain>, ApiErrorWithMeta> {
    let chain = st
        .resolver
        .resolve_chain(&user_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("referral chain fetched", chain, meta))
}

async fn get_wallet_handler(
    State(st): State<AppState>,
    Path(user_id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Wallet>, ApiErrorWithMeta> {
    let wallet = st
        .ledger
        .wallet(&user_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("wallet fetched", wallet, meta))
}

async fn submit_request_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<NewRequest>,
) -> Result<ApiOk<FinancialRequest>, ApiErrorWithMeta> {
    let request = st
        .workflow
        .submit(req)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("request submitted", request, meta))
}

async fn get_request_handler(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<FinancialRequest>, ApiErrorWithMeta> {
    let request = st
        .workflow
        .request(&id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("request fetched", request, meta))
}

async fn approve_handler(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<ReviewBody>,
) -> Result<ApiOk<TransitionOutcome>, ApiErrorWithMeta> {
    let outcome = st
        .workflow
        .approve(&id, &body.reviewer)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("request approved", outcome, meta))
}

async fn reject_handler(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<RejectBody>,
) -> Result<ApiOk<FinancialRequest>, ApiErrorWithMeta> {
    let request = st
        .workflow
        .reject(&id, &body.reviewer, &body.reason)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("request rejected", request, meta))
}

async fn complete_handler(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Extension(meta): Extension<RequestMeta>,
    Json(body): Json<ReviewBody>,
) -> Result<ApiOk<FinancialRequest>, ApiErrorWithMeta> {
    let request = st
        .workflow
        .complete(&id, &body.reviewer)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("request completed", request, meta))
}

async fn settle_purchase_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(purchase): Json<Purchase>,
) -> Result<ApiOk<PurchaseReceipt>, ApiErrorWithMeta> {
    let receipt = st
        .workflow
        .settle_purchase(purchase)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("purchase settled", receipt, meta))
}

async fn reconcile_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiOk<ReconciliationReport> {
    let report = st.reconciler.run().await;
    ApiOk::ok("reconciliation finished", report, meta)
}
