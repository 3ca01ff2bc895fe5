//! USDT (TRC20) payments by unique amount.
//!
//! A TRC20 transfer carries no reference field, so the only way to tell
//! which order an incoming transfer pays is its amount. Each pending USDT
//! order is given a token amount no other live pending order holds, found by
//! stepping around the converted base amount in 0.01 steps:
//! `base, +0.01, -0.01, +0.02, -0.02, ...`.
//!
//! This is collision avoidance, not a guarantee: after [`MAX_ATTEMPTS`]
//! attempts the base amount is used as-is and a warning is logged. The search is
//! serialized across requests with a transaction-scoped advisory lock.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::Config;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::setting::StoreSettings;

/// Step between candidate amounts.
pub const AMOUNT_STEP: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Incoming amounts within this distance of a reserved amount match it.
pub const MATCH_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

pub const MAX_ATTEMPTS: u32 = 100;

/// Advisory lock key serializing amount allocation.
const ALLOCATION_LOCK_KEY: i64 = 0x7573_6474; // "usdt"

/// Result of a unique amount search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueAmount {
    pub amount: Decimal,
    /// `false` when every candidate was taken and the base amount was reused.
    pub unique: bool,
}

/// Convert a fiat total to a token amount at `rate` fiat per USDT.
///
/// # Errors
///
/// `Configuration` if the rate is not positive or the quotient does not fit
/// in a `Decimal`.
pub fn base_amount(total: Decimal, rate: Decimal) -> Result<Decimal, AppError> {
    if rate <= Decimal::ZERO {
        return Err(AppError::Configuration(format!(
            "USDT exchange rate {rate} is not positive"
        )));
    }
    let amount = total.checked_div(rate).ok_or_else(|| {
        AppError::Configuration(format!("USDT exchange rate {rate} is out of range"))
    })?;
    Ok(amount
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(AMOUNT_STEP))
}

/// Offset of the `i`-th attempt: 0, +1, -1, +2, -2, ... steps.
fn attempt_offset(i: u32) -> Decimal {
    let steps = Decimal::from((i + 1) / 2);
    if i % 2 == 1 {
        steps * AMOUNT_STEP
    } else {
        -steps * AMOUNT_STEP
    }
}

/// Find an amount near `base` that is not in `taken`.
pub fn allocate_unique_amount(base: Decimal, taken: &[Decimal]) -> UniqueAmount {
    for i in 0..MAX_ATTEMPTS {
        let candidate = base + attempt_offset(i);
        if candidate <= Decimal::ZERO {
            continue;
        }
        if !taken.contains(&candidate) {
            return UniqueAmount {
                amount: candidate,
                unique: true,
            };
        }
    }
    UniqueAmount {
        amount: base,
        unique: false,
    }
}

/// Reserve a unique token amount for a pending USDT order.
///
/// Re-requesting instructions for the same order returns the amount already
/// stored on it. Only orders created within `timeout` count as holding an
/// amount; anything older can no longer be matched.
pub async fn assign_amount(
    pool: &DbPool,
    settings: &StoreSettings,
    order: &Order,
    timeout: chrono::Duration,
) -> Result<Decimal, AppError> {
    if let Some(amount) = order.usdt_amount {
        return Ok(amount);
    }

    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(ALLOCATION_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let taken: Vec<Decimal> = sqlx::query_scalar(
        r#"
        SELECT usdt_amount FROM orders
        WHERE status = 'pending'
          AND payment_method = 'usdt'
          AND usdt_amount IS NOT NULL
          AND created_at > $1
          AND id <> $2
        "#,
    )
    .bind(Utc::now() - timeout)
    .bind(order.id)
    .fetch_all(&mut *tx)
    .await?;

    let base = base_amount(order.total_amount, settings.usdt_exchange_rate)?;
    let allocation = allocate_unique_amount(base, &taken);
    if !allocation.unique {
        tracing::warn!(
            "No free USDT amount near {} for order {}, reusing base amount",
            base,
            order.order_no
        );
    }

    let assigned: Option<Option<Decimal>> = sqlx::query_scalar(
        r#"
        UPDATE orders
        SET usdt_amount = COALESCE(usdt_amount, $1)
        WHERE id = $2 AND status = 'pending'
        RETURNING usdt_amount
        "#,
    )
    .bind(allocation.amount)
    .bind(order.id)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    match assigned.flatten() {
        Some(amount) => {
            tracing::info!("Order {} reserved {} USDT", order.order_no, amount);
            Ok(amount)
        }
        None => Err(AppError::InvalidState(format!(
            "Order {} is no longer pending",
            order.order_no
        ))),
    }
}

/// A pending USDT order that may be paid by an incoming transfer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingUsdtOrder {
    pub id: Uuid,
    pub order_no: String,
    pub usdt_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Pending USDT orders created after `cutoff` that hold an amount.
pub async fn pending_orders(
    pool: &DbPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<PendingUsdtOrder>, AppError> {
    let orders = sqlx::query_as::<_, PendingUsdtOrder>(
        r#"
        SELECT id, order_no, usdt_amount, created_at FROM orders
        WHERE status = 'pending'
          AND payment_method = 'usdt'
          AND usdt_amount IS NOT NULL
          AND created_at > $1
        ORDER BY created_at
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(orders)
}

/// Whether a transaction id has already paid some order.
pub async fn trade_no_used(pool: &DbPool, trade_no: &str) -> Result<bool, AppError> {
    let used: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE trade_no = $1)")
        .bind(trade_no)
        .fetch_one(pool)
        .await?;
    Ok(used)
}

/// Incoming token transfer, normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingTransfer {
    pub tx_id: String,
    pub to: String,
    pub contract: String,
    pub amount: Decimal,
    pub received_at: DateTime<Utc>,
}

/// Pick the order an incoming transfer pays.
///
/// A candidate must have been created before the transfer and hold an
/// amount within [`MATCH_TOLERANCE`]. The closest amount wins; ties go to
/// the oldest order.
pub fn match_transfer<'a>(
    transfer: &IncomingTransfer,
    candidates: &'a [PendingUsdtOrder],
) -> Option<&'a PendingUsdtOrder> {
    candidates
        .iter()
        .filter(|o| o.created_at <= transfer.received_at)
        .filter(|o| (o.usdt_amount - transfer.amount).abs() < MATCH_TOLERANCE)
        .min_by_key(|o| ((o.usdt_amount - transfer.amount).abs(), o.created_at))
}

#[derive(Debug, Deserialize)]
struct TronTransfersResponse {
    #[serde(default)]
    data: Vec<TronTransfer>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct TronTransfer {
    transaction_id: String,
    token_info: TronTokenInfo,
    block_timestamp: i64,
    to: String,
    #[serde(rename = "type")]
    kind: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct TronTokenInfo {
    address: String,
    decimals: u32,
}

impl TronTransfer {
    fn into_incoming(self) -> Option<IncomingTransfer> {
        if self.kind != "Transfer" {
            return None;
        }
        let raw: i128 = self.value.parse().ok()?;
        let amount = Decimal::try_from_i128_with_scale(raw, self.token_info.decimals).ok()?;
        let received_at = DateTime::from_timestamp_millis(self.block_timestamp)?;
        Some(IncomingTransfer {
            tx_id: self.transaction_id,
            to: self.to,
            contract: self.token_info.address,
            amount: amount.normalize(),
            received_at,
        })
    }
}

/// Parse a TronGrid TRC20 transaction listing into incoming transfers.
pub fn parse_transfers(body: &str) -> Result<Vec<IncomingTransfer>, AppError> {
    let response: TronTransfersResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Gateway(format!("Malformed transfer listing: {e}")))?;
    if !response.success {
        return Err(AppError::Gateway("Transfer listing reported failure".to_string()));
    }
    Ok(response
        .data
        .into_iter()
        .filter_map(TronTransfer::into_incoming)
        .collect())
}

/// List recent TRC20 transfers into `wallet` for the configured contract.
pub async fn fetch_transfers(
    http: &reqwest::Client,
    config: &Config,
    wallet: &str,
) -> Result<Vec<IncomingTransfer>, AppError> {
    let url = format!(
        "{}/v1/accounts/{}/transactions/trc20",
        config.tron_api_url.trim_end_matches('/'),
        wallet
    );
    let mut request = http.get(&url).query(&[
        ("only_to", "true"),
        ("limit", "50"),
        ("contract_address", config.usdt_contract.as_str()),
    ]);
    if let Some(key) = &config.tron_api_key {
        request = request.header("TRON-PRO-API-KEY", key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| AppError::Gateway(format!("Transfer listing request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(AppError::Gateway(format!(
            "Transfer listing returned {}",
            response.status()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|e| AppError::Gateway(format!("Transfer listing body unreadable: {e}")))?;

    let transfers = parse_transfers(&body)?;
    Ok(transfers
        .into_iter()
        .filter(|t| t.to == wallet && t.contract == config.usdt_contract)
        .collect())
}
