//! Background matcher for USDT transfers.
//!
//! On every tick the watcher lists recent TRC20 transfers into the store
//! wallet, pairs each new one with a live PENDING USDT order by amount and
//! runs the completion flow for it.

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::payment::PaymentMethod;
use crate::services::dispense_service::CompletionOutcome;
use crate::services::gateways::usdt::{self, IncomingTransfer, PendingUsdtOrder};
use crate::services::{payment_service, settings_service};
use crate::state::AppState;

/// Starts the watcher. Do not await the returned handle; it runs forever.
pub fn start_usdt_watcher(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(state.config.usdt_poll_interval_secs.max(1));
        let mut timer = tokio::time::interval(period);
        tracing::info!("USDT watcher started, polling every {:?}", period);
        loop {
            timer.tick().await;
            match poll_once(&state).await {
                Ok(0) => tracing::trace!("USDT poll found nothing new"),
                Ok(n) => tracing::info!("USDT poll confirmed {n} payments"),
                Err(e) => tracing::error!("USDT poll failed: {e}"),
            }
        }
    })
}

/// Run one matching pass. Returns how many orders were confirmed.
pub async fn poll_once(state: &AppState) -> Result<usize, AppError> {
    let settings = settings_service::load(&state.pool).await?;
    if !settings.usdt_ready() {
        return Ok(0);
    }

    let cutoff = Utc::now() - state.config.order_timeout();
    let candidates = usdt::pending_orders(&state.pool, cutoff).await?;
    if candidates.is_empty() {
        return Ok(0);
    }

    let transfers =
        usdt::fetch_transfers(&state.http, &state.config, &settings.usdt_wallet_address).await?;
    confirm_transfers(state, candidates, transfers).await
}

/// Pair each transfer with a pending order and confirm it.
///
/// A transaction id already recorded on a payment is skipped, and a matched
/// order leaves the candidate set, so one transfer pays at most one order
/// and one order is paid by at most one transfer per pass.
pub async fn confirm_transfers(
    state: &AppState,
    mut candidates: Vec<PendingUsdtOrder>,
    transfers: Vec<IncomingTransfer>,
) -> Result<usize, AppError> {
    let mut confirmed = 0;
    for transfer in transfers {
        if usdt::trade_no_used(&state.pool, &transfer.tx_id).await? {
            continue;
        }
        let Some(order) = usdt::match_transfer(&transfer, &candidates) else {
            tracing::debug!(
                "Transfer {} of {} USDT matches no pending order",
                transfer.tx_id,
                transfer.amount
            );
            continue;
        };
        let (order_id, order_no) = (order.id, order.order_no.clone());

        match payment_service::confirm_payment(state, &order_no, &transfer.tx_id, PaymentMethod::Usdt)
            .await
        {
            Ok(CompletionOutcome::Completed { .. } | CompletionOutcome::AwaitingStock(_)) => {
                confirmed += 1;
            }
            Ok(_) => {}
            Err(e) => tracing::error!(
                "Could not confirm order {} from transfer {}: {}",
                order_no,
                transfer.tx_id,
                e
            ),
        }
        candidates.retain(|o| o.id != order_id);
    }
    Ok(confirmed)
}
