use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LedgerError, LedgerResult};

/// Decimal places kept for persisted money amounts.
pub const MONEY_DP: u32 = 2;

/// Rounds an amount at the point of persistence.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Currency families held in a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Usdt,
    Inr,
    Dlx,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usdt => "usdt",
            Self::Inr => "inr",
            Self::Dlx => "dlx",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subaccount {
    Main,
    Purchase,
}

impl Subaccount {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Purchase => "purchase",
        }
    }
}

impl fmt::Display for Subaccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (currency, subaccount) pair addressing one wallet balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceSlot {
    pub currency: Currency,
    pub subaccount: Subaccount,
}

impl BalanceSlot {
    /// Builds a slot, rejecting pairs the wallet does not hold.
    pub fn new(currency: Currency, subaccount: Subaccount) -> LedgerResult<Self> {
        if currency == Currency::Dlx && subaccount == Subaccount::Purchase {
            return Err(LedgerError::UnsupportedSubaccount {
                currency,
                subaccount,
            });
        }
        Ok(Self {
            currency,
            subaccount,
        })
    }

    pub fn main(currency: Currency) -> Self {
        Self {
            currency,
            subaccount: Subaccount::Main,
        }
    }
}

impl fmt::Display for BalanceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.currency, self.subaccount)
    }
}

/// Per-user multi-currency wallet. The document id is the user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub main_usdt: Decimal,
    pub purchase_usdt: Decimal,
    pub main_inr: Decimal,
    pub purchase_inr: Decimal,
    pub dlx: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            main_usdt: Decimal::ZERO,
            purchase_usdt: Decimal::ZERO,
            main_inr: Decimal::ZERO,
            purchase_inr: Decimal::ZERO,
            dlx: Decimal::ZERO,
            updated_at: now,
        }
    }

    pub fn balance(&self, slot: BalanceSlot) -> Decimal {
        match (slot.currency, slot.subaccount) {
            (Currency::Usdt, Subaccount::Main) => self.main_usdt,
            (Currency::Usdt, Subaccount::Purchase) => self.purchase_usdt,
            (Currency::Inr, Subaccount::Main) => self.main_inr,
            (Currency::Inr, Subaccount::Purchase) => self.purchase_inr,
            (Currency::Dlx, _) => self.dlx,
        }
    }

    pub(crate) fn balance_mut(&mut self, slot: BalanceSlot) -> &mut Decimal {
        match (slot.currency, slot.subaccount) {
            (Currency::Usdt, Subaccount::Main) => &mut self.main_usdt,
            (Currency::Usdt, Subaccount::Purchase) => &mut self.purchase_usdt,
            (Currency::Inr, Subaccount::Main) => &mut self.main_inr,
            (Currency::Inr, Subaccount::Purchase) => &mut self.purchase_inr,
            (Currency::Dlx, _) => &mut self.dlx,
        }
    }
}

/// Referral statistics kept on the affiliate's user record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AffiliateStats {
    pub direct_referrals: u64,
    pub indirect_referrals: u64,
    #[serde(default)]
    pub lifetime_earnings: BTreeMap<Currency, Decimal>,
}

/// A marketplace user and their position in the referral forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Free-form rank identifier, resolved leniently by the rank table.
    pub rank: String,
    /// The Level-1 affiliate. Set once at registration.
    pub referred_by: Option<String>,
    pub referral_code: String,
    #[serde(default)]
    pub stats: AffiliateStats,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
    Success,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Success | Self::Failed
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Deposit,
    Withdrawal,
    Swap,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositDetails {
    pub slot: BalanceSlot,
    /// Payment rail, e.g. `upi`, `bank`, `trc20`.
    pub method: String,
    pub external_ref: Option<String>,
    /// Set when the deposit pays for a catalog order; such deposits pay commissions.
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalDetails {
    pub slot: BalanceSlot,
    pub method: String,
    pub payout_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapDetails {
    pub from: BalanceSlot,
    pub to: BalanceSlot,
    /// Units of `to` credited per unit of `from`.
    pub rate: Decimal,
    pub external_ref: Option<String>,
}

impl SwapDetails {
    pub fn credited_amount(&self, amount: Decimal) -> Decimal {
        round_money(amount * self.rate)
    }
}

/// Kind-specific payload of a financial request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestDetails {
    Deposit(DepositDetails),
    Withdrawal(WithdrawalDetails),
    Swap(SwapDetails),
}

impl RequestDetails {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Deposit(_) => RequestKind::Deposit,
            Self::Withdrawal(_) => RequestKind::Withdrawal,
            Self::Swap(_) => RequestKind::Swap,
        }
    }
}

/// A user-initiated deposit, withdrawal or swap awaiting settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRequest {
    pub id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub status: RequestStatus,
    pub details: RequestDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Set when the request reaches a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl FinancialRequest {
    pub fn kind(&self) -> RequestKind {
        self.details.kind()
    }
}

/// One commission payout. The id `{order_id}:L{level}` is the idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionEvent {
    pub id: String,
    pub order_id: String,
    pub payer_id: String,
    pub payee_id: String,
    pub level: u8,
    pub currency: Currency,
    pub base_amount: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl CommissionEvent {
    pub fn key(order_id: &str, level: u8) -> String {
        format!("{order_id}:L{level}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryReason {
    Deposit,
    Withdrawal,
    SwapDebit,
    SwapCredit,
    Purchase,
    CommissionL1,
    CommissionL2,
    Adjustment,
}

/// Append-only ledger line written for every applied delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: String,
    pub user_id: String,
    pub slot: BalanceSlot,
    pub delta: Decimal,
    pub balance_after: Decimal,
    pub reason: EntryReason,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RequestSubmitted,
    RequestApproved,
    RequestRejected,
    RequestCompleted,
    SwapSucceeded,
    SwapFailed,
    PurchaseSettled,
    CommissionPaid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub actor: String,
    pub action: AuditAction,
    pub target_type: String,
    pub target_id: String,
    pub before: Value,
    pub after: Value,
    pub created_at: DateTime<Utc>,
}

/// A catalog order paid from the buyer's purchase balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub order_id: String,
    pub buyer_id: String,
    pub amount: Decimal,
    pub currency: Currency,
}
