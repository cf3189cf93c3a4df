//! `RunCycle(subscription_id)` (§4.E): the single per-execution entry point.
//! Everything else in this crate exists to feed or be fed by this function.

use capital_management::MarketSnapshot;
use core_types::{Action, ActionKind, ExchangeCredentials, OrderSide, RiskMetrics, Trade, TradeStatus};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde_json::{Value, json};

use crate::context::Context;
use crate::error::EngineError;
use crate::timeframe;

const SL_MIN_DISTANCE_PCT: Decimal = dec!(0.001);
const TP_MIN_DISTANCE_PCT: Decimal = dec!(0.002);
const MAX_CONSECUTIVE_FAILURES: i64 = 3;
const DEFAULT_LEVERAGE: u32 = 10;

/// Runs a single execution cycle for `subscription_id`. Never panics on a
/// business-logic failure — every error path logs an `ActionLog::Error` row
/// and, past three consecutive failures, marks the subscription `ERROR`
/// itself (§4.E step 12) rather than propagating to the caller, which would
/// otherwise have to duplicate this bookkeeping at every call site.
pub async fn run_cycle(ctx: &Context, subscription_id: i64) {
    let span = tracing::info_span!("run_cycle", subscription_id);
    let _enter = span.enter();

    match run_cycle_inner(ctx, subscription_id).await {
        Ok(()) => {}
        Err(err) => {
            tracing::error!(subscription_id, error = %err, "run_cycle failed");
            let _ = ctx.db.insert_action_log(subscription_id, ActionKind::Error, &err.to_string()).await;
            let _ = ctx.events.send(events::WsMessage::ActionError(events::ActionError {
                subscription_id,
                timestamp: chrono::Utc::now(),
                message: err.to_string(),
            }));

            match ctx.db.consecutive_error_count(subscription_id).await {
                Ok(streak) if streak >= MAX_CONSECUTIVE_FAILURES => {
                    tracing::error!(subscription_id, streak, "marking subscription ERROR after repeated failures");
                    let _ = ctx.db.set_subscription_status(subscription_id, core_types::SubscriptionStatus::Error).await;
                }
                Ok(_) => {}
                Err(count_err) => tracing::warn!(subscription_id, error = %count_err, "failed to check consecutive error streak"),
            }
        }
    }
}

async fn run_cycle_inner(ctx: &Context, subscription_id: i64) -> Result<(), EngineError> {
    // Step 1: fetch subscription, bail out if it isn't ACTIVE.
    let subscription = ctx
        .db
        .get_subscription(subscription_id)
        .await?
        .ok_or(EngineError::SubscriptionNotActive(subscription_id))?;

    if subscription.status != core_types::SubscriptionStatus::Active {
        return Ok(());
    }

    let bot = ctx
        .db
        .get_bot(subscription.bot_id)
        .await?
        .filter(|b| b.status == core_types::BotStatus::Approved)
        .ok_or(EngineError::BotNotApproved(subscription_id, subscription.bot_id))?;

    // Step 2: resolve credentials.
    let credentials = ctx
        .db
        .resolve_credentials(&subscription, &bot)
        .await?
        .ok_or(EngineError::NoCredentials(subscription_id))?;

    // Step 3: the authenticated adapter places orders; a separate anonymous
    // mainnet adapter crawls market data so klines reflect real prices even
    // when trading testnet.
    let trading_exchange = exchange_adapters::build_futures_exchange(&credentials)?;
    let market_data_exchange = exchange_adapters::build_futures_exchange(&anonymous_mainnet_credentials(&credentials))?;

    // Step 4: load the strategy.
    let bot_file = ctx
        .db
        .get_bot_file(bot.id, "code", subscription.pinned_bot_version.as_deref())
        .await?
        .ok_or_else(|| EngineError::BotFileNotFound("code".to_string(), bot.id))?;

    let runtime_config = json!({
        "strategy_config": subscription.strategy_config,
        "execution_config": subscription.execution_config,
        "risk_config": subscription.risk_config,
    });
    let mut strategy = bot_loader::load_strategy(&ctx.store, &bot_file, &runtime_config, Some(&credentials)).await?;

    // Step 5: multi-timeframe market-data crawl. Candles ride along inside
    // the merged config below — the subprocess protocol has no separate
    // market-data frame, so this is how a short series (§4.E edge cases)
    // reaches the strategy.
    let symbol = subscription.trading_pair.clone();
    let now = chrono::Utc::now();
    let mut market_data = serde_json::Map::new();
    for tf in &subscription.timeframes {
        let klines = crawl_timeframe(market_data_exchange.as_ref(), &symbol, tf, now).await?;
        market_data.insert(tf.clone(), serde_json::to_value(klines)?);
    }

    let primary_tf = subscription
        .primary_timeframe()
        .ok_or_else(|| EngineError::Configuration(format!("subscription {subscription_id} has no timeframes configured")))?;

    // Step 6: evaluate the strategy.
    let merged_config = json!({
        "strategy_config": subscription.strategy_config,
        "execution_config": subscription.execution_config,
        "risk_config": subscription.risk_config,
        "market_data": Value::Object(market_data),
    });
    let action = strategy.execute_full_cycle(primary_tf, &merged_config).await?;

    // Step 7: persist the action log row.
    ctx.db
        .insert_action_log(subscription_id, action.kind, &describe_action(&action))
        .await?;

    // Step 8/9: branch on the action and place orders where warranted.
    match action.kind {
        ActionKind::Hold => {}
        ActionKind::Buy | ActionKind::Sell => {
            place_order(
                ctx,
                &subscription,
                trading_exchange.as_ref(),
                &symbol,
                &action,
            )
            .await?;
        }
        ActionKind::Error | ActionKind::Info => {
            tracing::warn!(subscription_id, ?action.kind, "strategy returned a non-trading action kind, treating as HOLD");
        }
    }

    // Step 11: reschedule.
    let next_run_at = timeframe::next_run_at(primary_tf, now);
    ctx.db.update_subscription_schedule(subscription_id, now, next_run_at).await?;

    Ok(())
}

/// Builds a credential-shaped value for the anonymous, mainnet-only adapter
/// used for market-data crawls (§4.E step 3). Every adapter's public
/// endpoints tolerate empty key/secret; the passphrase is filled with an
/// empty string rather than left `None` purely to satisfy
/// `build_futures_exchange`'s OKX/Bitget requirement — it is never sent on
/// an unsigned request.
fn anonymous_mainnet_credentials(reference: &ExchangeCredentials) -> ExchangeCredentials {
    ExchangeCredentials {
        id: 0,
        owner_id: 0,
        exchange: reference.exchange,
        network: core_types::NetworkType::Mainnet,
        api_key: String::new(),
        api_secret: String::new(),
        api_passphrase: Some(String::new()),
        is_active: true,
    }
}

async fn crawl_timeframe(
    exchange: &dyn exchange_adapters::FuturesExchange,
    symbol: &str,
    tf: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<core_types::Kline>, EngineError> {
    let Some(end) = timeframe::last_closed_candle_end(tf, now) else {
        tracing::warn!(tf, "unparseable timeframe, skipping crawl");
        return Ok(Vec::new());
    };

    let mut limit = timeframe::crawl_candle_count(tf);
    let mut klines = Vec::new();
    for attempt in 0..=3 {
        klines = exchange.get_klines(symbol, tf, limit, None, Some(end)).await?;
        if klines.len() >= 20 || attempt == 3 {
            break;
        }
        tracing::warn!(symbol, tf, got = klines.len(), attempt, "insufficient candles, retrying with a wider window");
        limit *= 2;
    }

    if klines.len() < 20 {
        tracing::warn!(symbol, tf, got = klines.len(), "timeframe still short of the 20-candle minimum after retries, retaining anyway");
    }

    Ok(klines)
}

fn describe_action(action: &Action) -> String {
    format!("{:?} (confidence {:.2}): {}", action.kind, action.value, action.reason)
}

async fn place_order(
    ctx: &Context,
    subscription: &core_types::Subscription,
    exchange: &dyn exchange_adapters::FuturesExchange,
    symbol: &str,
    action: &Action,
) -> Result<(), EngineError> {
    let owner_id = subscription.user_id;

    if ctx.risk.is_halted(owner_id, symbol).await {
        tracing::warn!(owner_id, symbol, "circuit breaker halted, downgrading to HOLD");
        ctx.db
            .insert_action_log(subscription.id, ActionKind::Hold, "circuit breaker halted this symbol or account")
            .await?;
        return Ok(());
    }

    let side = match action.kind {
        ActionKind::Buy => OrderSide::Buy,
        ActionKind::Sell => OrderSide::Sell,
        _ => unreachable!("place_order only called for BUY/SELL actions"),
    };

    let account = exchange.get_account_info().await?;
    let risk_metrics = build_risk_metrics(subscription, &account);
    let mark_price = exchange.get_ticker(symbol).await?;

    let market = MarketSnapshot { atr: mark_price * dec!(0.01), current_price: mark_price };
    let llm_pct = match &ctx.llm {
        Some(llm) => {
            llm.capital_advice(
                &format!("subscription {} symbol {}", subscription.id, symbol),
                dec!(0.02),
                dec!(0.10),
                None,
            )
            .await
        }
        None => None,
    };

    let sizing = ctx.capital.recommend_size(action.value, &risk_metrics, &market, llm_pct);
    if sizing.recommended_size_pct <= Decimal::ZERO {
        tracing::info!(symbol, "recommended size is zero, downgrading to HOLD");
        ctx.db
            .insert_action_log(subscription.id, ActionKind::Hold, "capital-management recommended a zero position size")
            .await?;
        return Ok(());
    }

    let recommendation = action.recommendation.as_ref();
    let entry_price = recommendation.and_then(|r| r.entry_price).unwrap_or(mark_price);

    let (sl_pct, tp_pct) = default_sl_tp_pct(&subscription.risk_config);
    let raw_sl = recommendation
        .and_then(|r| r.stop_loss)
        .unwrap_or_else(|| default_stop_loss(side, entry_price, sl_pct));
    let raw_tp = recommendation
        .and_then(|r| r.take_profit)
        .unwrap_or_else(|| default_take_profit(side, entry_price, tp_pct));
    let (stop_loss, take_profit) = enforce_min_distance(side, mark_price, raw_sl, raw_tp);

    let leverage = default_leverage(&subscription.execution_config);
    exchange.set_leverage(symbol, leverage).await?;

    let position_value = account.available_balance * sizing.recommended_size_pct * Decimal::from(leverage);
    let raw_qty = position_value / entry_price;
    let qty = match exchange.round_quantity(symbol, raw_qty, entry_price).await {
        Ok(qty) => qty,
        Err(exchange_adapters::AdapterError::InvalidQuantity { reason, .. }) => {
            tracing::info!(symbol, reason, "quantity failed precision/min-notional validation, downgrading to HOLD");
            ctx.db
                .insert_action_log(subscription.id, ActionKind::Hold, &format!("position size invalid, downgraded to HOLD: {reason}"))
                .await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    if qty <= Decimal::ZERO {
        tracing::info!(symbol, "rounded quantity is zero, downgrading to HOLD");
        ctx.db
            .insert_action_log(subscription.id, ActionKind::Hold, "position size rounded to zero after precision/min-notional rules")
            .await?;
        return Ok(());
    }

    let entry_order = exchange.create_market_order(symbol, side, qty).await?;

    let managed = exchange
        .create_managed_orders(symbol, side, qty, stop_loss, take_profit, true)
        .await;

    let (stop_loss_order_id, take_profit_order_ids) = match managed {
        Ok(managed) => (Some(managed.stop_loss.order_id), managed.take_profits.into_iter().map(|o| o.order_id).collect()),
        Err(err) => {
            tracing::error!(symbol, error = %err, "managed-order placement failed, flattening the just-opened position");
            let _ = exchange.create_market_order(symbol, side.opposite(), qty).await;
            ctx.db
                .insert_action_log(subscription.id, ActionKind::Error, &format!("managed order placement failed, position flattened: {err}"))
                .await?;
            (None, Vec::new())
        }
    };

    let trade = Trade {
        id: 0,
        subscription_id: subscription.id,
        symbol: symbol.to_string(),
        side,
        position_side: core_types::PositionSide::from_order_side(side),
        status: TradeStatus::Open,
        quantity: qty,
        entry_price: if entry_order.price > Decimal::ZERO { entry_order.price } else { entry_price },
        entry_time: chrono::Utc::now(),
        leverage: leverage as i32,
        stop_loss: Some(stop_loss),
        take_profit: Some(take_profit),
        order_id: Some(entry_order.order_id),
        stop_loss_order_id,
        take_profit_order_ids,
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
    };

    let trade_id = ctx.db.insert_trade(&trade).await?;
    let mut broadcast_trade = trade;
    broadcast_trade.id = trade_id;
    let _ = ctx.events.send(events::WsMessage::TradeExecuted(broadcast_trade));

    Ok(())
}

fn build_risk_metrics(subscription: &core_types::Subscription, account: &core_types::AccountInfo) -> RiskMetrics {
    let win_rate = if subscription.total_trades > 0 {
        Decimal::from(subscription.winning_trades) / Decimal::from(subscription.total_trades)
    } else {
        dec!(0.5)
    };

    let portfolio_exposure = if account.total_wallet_balance > Decimal::ZERO {
        (account.used_margin / account.total_wallet_balance).min(Decimal::ONE)
    } else {
        Decimal::ZERO
    };

    let current_drawdown = if account.unrealized_pnl.is_sign_negative() && account.total_wallet_balance > Decimal::ZERO {
        (-account.unrealized_pnl / account.total_wallet_balance).min(Decimal::ONE)
    } else {
        Decimal::ZERO
    };

    RiskMetrics {
        account_balance: account.total_wallet_balance,
        available_balance: account.available_balance,
        current_drawdown,
        max_drawdown: current_drawdown,
        portfolio_exposure,
        volatility: dec!(0.05),
        var_95: dec!(0.02),
        sharpe_ratio: Decimal::ZERO,
        win_rate,
        avg_win_loss_ratio: Decimal::ONE,
    }
}

fn default_sl_tp_pct(risk_config: &Value) -> (Decimal, Decimal) {
    let sl = risk_config
        .get("stop_loss_pct")
        .and_then(Value::as_f64)
        .and_then(|f| Decimal::try_from(f).ok())
        .unwrap_or(dec!(0.02));
    let tp = risk_config
        .get("take_profit_pct")
        .and_then(Value::as_f64)
        .and_then(|f| Decimal::try_from(f).ok())
        .unwrap_or(dec!(0.04));
    (sl, tp)
}

fn default_leverage(execution_config: &Value) -> u32 {
    execution_config
        .get("leverage")
        .and_then(Value::as_u64)
        .and_then(|v| v.to_u32())
        .unwrap_or(DEFAULT_LEVERAGE)
}

fn default_stop_loss(side: OrderSide, entry: Decimal, sl_pct: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => entry * (Decimal::ONE - sl_pct),
        OrderSide::Sell => entry * (Decimal::ONE + sl_pct),
    }
}

fn default_take_profit(side: OrderSide, entry: Decimal, tp_pct: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => entry * (Decimal::ONE + tp_pct),
        OrderSide::Sell => entry * (Decimal::ONE - tp_pct),
    }
}

/// Pushes `stop_loss`/`take_profit` outward from `mark` if they're closer
/// than the minimum distance guard (§4.E step 9: 0.1% for SL, 0.2% for TP).
fn enforce_min_distance(side: OrderSide, mark: Decimal, mut stop_loss: Decimal, mut take_profit: Decimal) -> (Decimal, Decimal) {
    match side {
        OrderSide::Buy => {
            let min_sl = mark * (Decimal::ONE - SL_MIN_DISTANCE_PCT);
            if stop_loss > min_sl {
                tracing::info!(from = %stop_loss, to = %min_sl, "adjusting stop-loss outward to respect the minimum distance guard");
                stop_loss = min_sl;
            }
            let min_tp = mark * (Decimal::ONE + TP_MIN_DISTANCE_PCT);
            if take_profit < min_tp {
                tracing::info!(from = %take_profit, to = %min_tp, "adjusting take-profit outward to respect the minimum distance guard");
                take_profit = min_tp;
            }
        }
        OrderSide::Sell => {
            let min_sl = mark * (Decimal::ONE + SL_MIN_DISTANCE_PCT);
            if stop_loss < min_sl {
                tracing::info!(from = %stop_loss, to = %min_sl, "adjusting stop-loss outward to respect the minimum distance guard");
                stop_loss = min_sl;
            }
            let min_tp = mark * (Decimal::ONE - TP_MIN_DISTANCE_PCT);
            if take_profit > min_tp {
                tracing::info!(from = %take_profit, to = %min_tp, "adjusting take-profit outward to respect the minimum distance guard");
                take_profit = min_tp;
            }
        }
    }
    (stop_loss, take_profit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforce_min_distance_pushes_a_too_close_long_stop_loss_outward() {
        let (sl, tp) = enforce_min_distance(OrderSide::Buy, dec!(100), dec!(99.99), dec!(105));
        assert_eq!(sl, dec!(100) * (Decimal::ONE - SL_MIN_DISTANCE_PCT));
        assert_eq!(tp, dec!(105));
    }

    #[test]
    fn enforce_min_distance_leaves_an_already_safe_short_take_profit_alone() {
        let (sl, tp) = enforce_min_distance(OrderSide::Sell, dec!(100), dec!(102), dec!(90));
        assert_eq!(sl, dec!(102));
        assert_eq!(tp, dec!(90));
    }

    #[test]
    fn default_sl_tp_pct_falls_back_when_config_is_empty() {
        let (sl, tp) = default_sl_tp_pct(&json!({}));
        assert_eq!(sl, dec!(0.02));
        assert_eq!(tp, dec!(0.04));
    }
}
