use chrono::{DateTime, Utc};
use core_types::{
    ActionKind, Bot, BotFile, ExchangeCredentials, ExchangeKind, ExitReason, NetworkType,
    Subscription, SubscriptionStatus, Trade,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;

use crate::error::DbError;

/// How far back (most recent rows) the consecutive-failure check in
/// `consecutive_error_count` looks before giving up. Matches the "after 3
/// consecutive execution failures" rule (§4.E step 12) with headroom.
const CONSECUTIVE_ERROR_LOOKBACK: i64 = 10;

/// High-level, application-specific interface to the database: one method
/// per query/mutation the orchestrator, scheduler, and reconciler need.
/// Every row type is queried via `query_as` against the entity's own
/// `sqlx::FromRow` derive in `core_types` rather than a parallel `Db*` shadow
/// struct, so there is exactly one shape to keep in sync with the schema.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Bots & bot files (§4.D)
    // ------------------------------------------------------------------

    pub async fn get_bot(&self, bot_id: i64) -> Result<Option<Bot>, DbError> {
        let bot = sqlx::query_as::<_, Bot>(
            r#"
            SELECT id, name, developer_id, status, object_store_key, version,
                   trading_type, exchange_type, created_at, updated_at
            FROM bots WHERE id = $1
            "#,
        )
        .bind(bot_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bot)
    }

    /// Resolves the bot file to load: the pinned version if the subscription
    /// names one, otherwise the most recently uploaded row for that bot.
    pub async fn get_bot_file(
        &self,
        bot_id: i64,
        file_type: &str,
        pinned_version: Option<&str>,
    ) -> Result<Option<BotFile>, DbError> {
        let row = match pinned_version {
            Some(version) => {
                sqlx::query_as::<_, BotFile>(
                    r#"
                    SELECT id, bot_id, version, file_type, object_key, sha256, size_bytes, uploaded_at
                    FROM bot_files
                    WHERE bot_id = $1 AND file_type = $2 AND version = $3
                    "#,
                )
                .bind(bot_id)
                .bind(file_type)
                .bind(version)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, BotFile>(
                    r#"
                    SELECT id, bot_id, version, file_type, object_key, sha256, size_bytes, uploaded_at
                    FROM bot_files
                    WHERE bot_id = $1 AND file_type = $2
                    ORDER BY uploaded_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(bot_id)
                .bind(file_type)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(row)
    }

    // ------------------------------------------------------------------
    // Credentials (§4.E step 2)
    // ------------------------------------------------------------------

    /// Resolves which credential row an execution should use, in precedence
    /// order: the developer's own credentials when testing their own bot,
    /// falling back to the subscribing user's credentials otherwise. Both
    /// tiers query the same `exchange_credentials` table, scoped by owner —
    /// this repository has no separate marketplace-principal identity to
    /// key a third tier on, so that tier collapses into the user-credential
    /// lookup (see DESIGN.md).
    pub async fn resolve_credentials(
        &self,
        subscription: &Subscription,
        bot: &Bot,
    ) -> Result<Option<ExchangeCredentials>, DbError> {
        let is_developer_testing = subscription.user_id == bot.developer_id;

        if is_developer_testing {
            if let Some(creds) = self
                .get_active_credentials(bot.developer_id, bot.exchange_type, subscription.network_type)
                .await?
            {
                return Ok(Some(creds));
            }
        }

        self.get_active_credentials(subscription.user_id, subscription.exchange_type, subscription.network_type)
            .await
    }

    async fn get_active_credentials(
        &self,
        owner_id: i64,
        exchange: ExchangeKind,
        network: NetworkType,
    ) -> Result<Option<ExchangeCredentials>, DbError> {
        let creds = sqlx::query_as::<_, ExchangeCredentials>(
            r#"
            SELECT id, owner_id, exchange, network, api_key, api_secret, api_passphrase, is_active
            FROM exchange_credentials
            WHERE owner_id = $1 AND exchange = $2 AND network = $3 AND is_active = TRUE
            "#,
        )
        .bind(owner_id)
        .bind(exchange)
        .bind(network)
        .fetch_optional(&self.pool)
        .await?;

        Ok(creds)
    }

    // ------------------------------------------------------------------
    // Subscriptions (§4.E, §4.F)
    // ------------------------------------------------------------------

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>, DbError> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, instance_name, user_id, bot_id, status, exchange_type, network_type,
                   trading_pair, timeframes, pinned_bot_version, strategy_config, execution_config,
                   risk_config, is_trial, trial_expires_at, started_at, expires_at, last_run_at,
                   next_run_at, total_trades, winning_trades, total_pnl
            FROM subscriptions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Every `ACTIVE` subscription, for the scheduler's 60s sweep (§4.F) to
    /// filter by expiry and `next_run_at` itself — the sweep needs the full
    /// rows to decide per-subscription, not a pre-filtered query.
    pub async fn get_active_subscriptions(&self) -> Result<Vec<Subscription>, DbError> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, instance_name, user_id, bot_id, status, exchange_type, network_type,
                   trading_pair, timeframes, pinned_bot_version, strategy_config, execution_config,
                   risk_config, is_trial, trial_expires_at, started_at, expires_at, last_run_at,
                   next_run_at, total_trades, winning_trades, total_pnl
            FROM subscriptions WHERE status = 'ACTIVE'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    pub async fn set_subscription_status(
        &self,
        id: i64,
        status: SubscriptionStatus,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE subscriptions SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Scheduler's trial-expiry sweep (§4.F): `trial_expires_at` in the past
    /// moves a subscription straight to `EXPIRED`, no error logged.
    pub async fn expire_subscription(&self, id: i64) -> Result<(), DbError> {
        self.set_subscription_status(id, SubscriptionStatus::Expired).await
    }

    /// Scheduler's paid-subscription sweep (§4.F): a non-trial `expires_at`
    /// in the past moves the subscription to `CANCELLED`, distinct from a
    /// trial lapsing into `EXPIRED`.
    pub async fn cancel_subscription(&self, id: i64) -> Result<(), DbError> {
        self.set_subscription_status(id, SubscriptionStatus::Cancelled).await
    }

    /// Marks a subscription `ERROR` and records why, in one round trip so
    /// the action log and the subscription status never disagree.
    pub async fn mark_subscription_error(&self, id: i64, reason: &str) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE subscriptions SET status = 'ERROR' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO action_logs (subscription_id, action, description) VALUES ($1, 'ERROR', $2)",
        )
        .bind(id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn update_subscription_schedule(
        &self,
        id: i64,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE subscriptions SET last_run_at = $1, next_run_at = $2 WHERE id = $3")
            .bind(last_run_at)
            .bind(next_run_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Action log (§4.E step 7, §4.F maintenance task)
    // ------------------------------------------------------------------

    pub async fn insert_action_log(
        &self,
        subscription_id: i64,
        action: ActionKind,
        description: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO action_logs (subscription_id, action, description) VALUES ($1, $2, $3)",
        )
        .bind(subscription_id)
        .bind(action)
        .bind(description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts how many of the most recent action-log rows for a
    /// subscription are `ERROR`, stopping at the first row that isn't — the
    /// "3 consecutive execution failures" rule (§4.E step 12) is about a
    /// streak, not a lifetime total.
    pub async fn consecutive_error_count(&self, subscription_id: i64) -> Result<i64, DbError> {
        let recent: Vec<(ActionKind,)> = sqlx::query_as(
            r#"
            SELECT action FROM action_logs
            WHERE subscription_id = $1
            ORDER BY "timestamp" DESC
            LIMIT $2
            "#,
        )
        .bind(subscription_id)
        .bind(CONSECUTIVE_ERROR_LOOKBACK)
        .fetch_all(&self.pool)
        .await?;

        let mut streak = 0i64;
        for (action,) in recent {
            if action == ActionKind::Error {
                streak += 1;
            } else {
                break;
            }
        }

        Ok(streak)
    }

    /// Prunes `ActionLog` rows older than `retention_days`, keeping `ERROR`
    /// rows regardless of age (§4.F maintenance task) — they're the ones an
    /// operator needs when investigating a subscription stuck in `ERROR`.
    pub async fn prune_action_log(&self, retention_days: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            DELETE FROM action_logs
            WHERE "timestamp" < NOW() - ($1 || ' days')::interval
              AND action <> 'ERROR'
            "#,
        )
        .bind(retention_days.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // Trades (§4.E step 10, §4.G)
    // ------------------------------------------------------------------

    pub async fn insert_trade(&self, trade: &Trade) -> Result<i64, DbError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO trades (
                subscription_id, symbol, side, position_side, status, quantity,
                entry_price, entry_time, leverage, stop_loss, take_profit, order_id,
                stop_loss_order_id, take_profit_order_ids
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id
            "#,
        )
        .bind(trade.subscription_id)
        .bind(&trade.symbol)
        .bind(trade.side)
        .bind(trade.position_side)
        .bind(trade.status)
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(trade.entry_time)
        .bind(trade.leverage)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(&trade.order_id)
        .bind(&trade.stop_loss_order_id)
        .bind(&trade.take_profit_order_ids)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    pub async fn get_open_trades(&self) -> Result<Vec<Trade>, DbError> {
        let trades = sqlx::query_as::<_, Trade>(
            r#"
            SELECT id, subscription_id, symbol, side, position_side, status, quantity,
                   entry_price, entry_time, leverage, stop_loss, take_profit, order_id,
                   stop_loss_order_id, take_profit_order_ids, exit_price, exit_time,
                   exit_reason, realized_pnl, unrealized_pnl, last_updated_price,
                   pnl_percentage, fees_paid, trade_duration_minutes, is_winning
            FROM trades WHERE status = 'OPEN'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(trades)
    }

    /// Reconciler step 3: refreshes mark-to-market fields on a still-open
    /// trade without touching anything closure-related.
    pub async fn update_trade_mark(
        &self,
        trade_id: i64,
        last_updated_price: Decimal,
        unrealized_pnl: Decimal,
        pnl_percentage: Decimal,
        leverage: i32,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE trades
            SET last_updated_price = $1, unrealized_pnl = $2, pnl_percentage = $3, leverage = $4
            WHERE id = $5
            "#,
        )
        .bind(last_updated_price)
        .bind(unrealized_pnl)
        .bind(pnl_percentage)
        .bind(leverage)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reconciler step 4: transitions a trade to `CLOSED` with the full
    /// closing quadruple the table's CHECK constraint requires. Also zeroes
    /// `unrealized_pnl`, matching §4.G's "Zero `unrealized_pnl`" step.
    pub async fn close_trade(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        exit_reason: ExitReason,
        realized_pnl: Decimal,
        fees_paid: Decimal,
        trade_duration_minutes: i64,
        is_winning: bool,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE trades
            SET status = 'CLOSED', exit_price = $1, exit_time = $2, exit_reason = $3,
                realized_pnl = $4, fees_paid = $5, trade_duration_minutes = $6,
                is_winning = $7, unrealized_pnl = 0
            WHERE id = $8
            "#,
        )
        .bind(exit_price)
        .bind(exit_time)
        .bind(exit_reason)
        .bind(realized_pnl)
        .bind(fees_paid)
        .bind(trade_duration_minutes)
        .bind(is_winning)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
