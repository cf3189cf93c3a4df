//! Position-sync reconciler (§4.G): periodically reconciles every `OPEN`
//! `Trade` row against what the exchange actually reports, since a crash
//! between order placement and persistence, or an SL/TP firing out of band,
//! would otherwise leave the database silently stale.

use std::sync::Arc;
use std::time::Duration;

use core_types::{ExitReason, Position, PositionSide, Trade};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::interval;

use crate::context::Context;

const TAKER_FEE_PCT: Decimal = dec!(0.0005);

pub async fn run_reconciler(ctx: Arc<Context>) {
    let mut ticker = interval(Duration::from_secs(ctx.settings.engine.reconciler_interval_secs));

    loop {
        ticker.tick().await;
        if let Err(err) = sweep(&ctx).await {
            tracing::error!(error = %err, "reconciler sweep failed");
        }
    }
}

async fn sweep(ctx: &Arc<Context>) -> Result<(), crate::error::EngineError> {
    let open_trades = ctx.db.get_open_trades().await?;

    for trade in open_trades {
        if let Err(err) = reconcile_trade(ctx, &trade).await {
            tracing::warn!(trade_id = trade.id, error = %err, "failed to reconcile trade, skipping until next sweep");
        }
    }

    Ok(())
}

async fn reconcile_trade(ctx: &Arc<Context>, trade: &Trade) -> Result<(), crate::error::EngineError> {
    // Step 1: resolve the owning subscription/bot/credentials with the same
    // precedence as the orchestrator's preflight (§4.E step 2).
    let Some(subscription) = ctx.db.get_subscription(trade.subscription_id).await? else {
        tracing::warn!(trade_id = trade.id, "owning subscription no longer exists, skipping");
        return Ok(());
    };
    let Some(bot) = ctx.db.get_bot(subscription.bot_id).await? else {
        tracing::warn!(trade_id = trade.id, "owning bot no longer exists, skipping");
        return Ok(());
    };
    let Some(credentials) = ctx.db.resolve_credentials(&subscription, &bot).await? else {
        tracing::warn!(trade_id = trade.id, "no credentials resolvable, skipping");
        return Ok(());
    };

    let exchange = exchange_adapters::build_futures_exchange(&credentials)?;
    let positions = exchange.get_positions(Some(&trade.symbol)).await?;
    let live_position = positions
        .into_iter()
        .find(|p| p.side == trade.position_side && p.size.abs() > Decimal::ZERO);

    match live_position {
        Some(position) => update_open_trade(ctx, trade, &position).await,
        None => close_stale_trade(ctx, exchange.as_ref(), &subscription, trade).await,
    }
}

async fn update_open_trade(ctx: &Arc<Context>, trade: &Trade, position: &Position) -> Result<(), crate::error::EngineError> {
    ctx.db
        .update_trade_mark(
            trade.id,
            position.mark_price,
            position.pnl,
            position.percentage,
            position.leverage.map(|l| l as i32).unwrap_or(trade.leverage),
        )
        .await?;
    Ok(())
}

/// The exchange no longer reports a matching position: either a protective
/// order fired or the user closed it manually out-of-band. Approximates the
/// exit fill with the current ticker price, since the adapter surface has
/// no per-order fill-price lookup, then closes the `Trade` row and sweeps
/// any protective orders still resting on the book.
async fn close_stale_trade(
    ctx: &Arc<Context>,
    exchange: &dyn exchange_adapters::FuturesExchange,
    subscription: &core_types::Subscription,
    trade: &Trade,
) -> Result<(), crate::error::EngineError> {
    let exit_price = exchange.get_ticker(&trade.symbol).await.unwrap_or(trade.entry_price);
    let exit_reason = classify_exit_reason(trade, exit_price);
    let exit_time = chrono::Utc::now();

    let gross_pnl = match trade.position_side {
        PositionSide::Long => (exit_price - trade.entry_price) * trade.quantity,
        PositionSide::Short => (trade.entry_price - exit_price) * trade.quantity,
    };
    let fees_paid = exit_price * trade.quantity * TAKER_FEE_PCT;
    let realized_pnl = gross_pnl - fees_paid;
    let trade_duration_minutes = (exit_time - trade.entry_time).num_minutes();
    let is_winning = realized_pnl > Decimal::ZERO;

    ctx.db
        .close_trade(trade.id, exit_price, exit_time, exit_reason, realized_pnl, fees_paid, trade_duration_minutes, is_winning)
        .await?;

    let cleanup = executor::cleanup_protective_orders(exchange, trade).await;
    if !cleanup.success {
        tracing::warn!(trade_id = trade.id, "protective order cleanup did not fully succeed, left for manual review");
    }

    let mut closed_trade = trade.clone();
    closed_trade.status = core_types::TradeStatus::Closed;
    closed_trade.exit_price = Some(exit_price);
    closed_trade.exit_time = Some(exit_time);
    closed_trade.exit_reason = Some(exit_reason);
    closed_trade.realized_pnl = Some(realized_pnl);
    let _ = ctx.events.send(events::WsMessage::TradeExecuted(closed_trade.clone()));

    let account_equity = exchange.get_account_info().await.map(|a| a.total_wallet_balance).unwrap_or(Decimal::ZERO);
    ctx.risk.on_trade_closed(subscription.user_id, &closed_trade, account_equity).await;

    Ok(())
}

const EXIT_LEVEL_TOLERANCE_PCT: Decimal = dec!(0.01);

/// Heuristic exit-reason classification (§4.G): within 1% of `take_profit`
/// is assumed a TP fill, within 1% of `stop_loss` an SL fill, otherwise the
/// position was closed manually (or a level simply isn't set).
fn classify_exit_reason(trade: &Trade, exit_price: Decimal) -> ExitReason {
    let near = |level: Decimal| (exit_price - level).abs() <= level.abs() * EXIT_LEVEL_TOLERANCE_PCT;

    if trade.take_profit.is_some_and(near) {
        ExitReason::TpHit
    } else if trade.stop_loss.is_some_and(near) {
        ExitReason::SlHit
    } else {
        ExitReason::Manual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::{OrderSide, TradeStatus};

    fn sample_trade(stop_loss: Option<Decimal>, take_profit: Option<Decimal>) -> Trade {
        Trade {
            id: 1,
            subscription_id: 1,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            status: TradeStatus::Open,
            quantity: dec!(1),
            entry_price: dec!(100),
            entry_time: Utc::now(),
            leverage: 5,
            stop_loss,
            take_profit,
            order_id: None,
            stop_loss_order_id: None,
            take_profit_order_ids: Vec::new(),
            exit_price: None,
            exit_time: None,
            exit_reason: None,
            realized_pnl: None,
            unrealized_pnl: None,
            last_updated_price: None,
            pnl_percentage: None,
            fees_paid: None,
            trade_duration_minutes: None,
            is_winning: None,
        }
    }

    #[test]
    fn classifies_an_exit_near_take_profit_as_tp_hit() {
        let trade = sample_trade(Some(dec!(90)), Some(dec!(110)));
        assert_eq!(classify_exit_reason(&trade, dec!(109.5)), ExitReason::TpHit);
    }

    #[test]
    fn classifies_an_exit_near_stop_loss_as_sl_hit() {
        let trade = sample_trade(Some(dec!(90)), Some(dec!(110)));
        assert_eq!(classify_exit_reason(&trade, dec!(90.5)), ExitReason::SlHit);
    }

    #[test]
    fn falls_back_to_manual_when_neither_level_is_set() {
        let trade = sample_trade(None, None);
        assert_eq!(classify_exit_reason(&trade, dec!(105)), ExitReason::Manual);
    }

    #[test]
    fn falls_back_to_manual_when_exit_is_far_from_both_levels() {
        let trade = sample_trade(Some(dec!(90)), Some(dec!(110)));
        assert_eq!(classify_exit_reason(&trade, dec!(100)), ExitReason::Manual);
    }
}
