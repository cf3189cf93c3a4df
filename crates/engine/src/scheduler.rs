//! The scheduler sweep and maintenance task (§4.F): the process that decides
//! *when* `run_cycle` fires for each active subscription, as opposed to the
//! orchestrator, which decides *what happens* once it does.

use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;

use crate::context::Context;
use crate::orchestrator::run_cycle;

const EXEC_LOCK_TTL: Duration = Duration::from_secs(300);

/// Runs forever, sweeping active subscriptions every
/// `scheduler_interval_secs` and spawning a detached `run_cycle` for each one
/// that's due, guarded by a per-subscription Redis lock so two scheduler
/// processes never double-fire the same subscription.
pub async fn run_scheduler(ctx: Arc<Context>) {
    let token = cache::lock::worker_token(process::id(), Utc::now().timestamp());
    let mut ticker = interval(Duration::from_secs(ctx.settings.engine.scheduler_interval_secs));

    loop {
        ticker.tick().await;
        if let Err(err) = sweep(&ctx, &token).await {
            tracing::error!(error = %err, "scheduler sweep failed");
        }
    }
}

async fn sweep(ctx: &Arc<Context>, token: &str) -> Result<(), crate::error::EngineError> {
    let subscriptions = ctx.db.get_active_subscriptions().await?;
    let now = Utc::now();

    for subscription in subscriptions {
        if !subscription.is_trial {
            if let Some(expires_at) = subscription.expires_at {
                if expires_at <= now {
                    tracing::info!(subscription_id = subscription.id, "paid subscription expired, cancelling it");
                    ctx.db.cancel_subscription(subscription.id).await?;
                    continue;
                }
            }
        }
        if subscription.is_trial {
            if let Some(trial_expires_at) = subscription.trial_expires_at {
                if trial_expires_at <= now {
                    tracing::info!(subscription_id = subscription.id, "trial expired, retiring it");
                    ctx.db.expire_subscription(subscription.id).await?;
                    let _ = ctx.events.send(events::WsMessage::TrialExpired(events::TrialExpired {
                        subscription_id: subscription.id,
                        timestamp: now,
                    }));
                    continue;
                }
            }
        }

        let due = subscription.next_run_at.is_none_or(|next| next <= now);
        if !due {
            continue;
        }

        let lock_key = cache::lock::exec_lock_key(subscription.id);
        match ctx.cache.try_acquire_lock(&lock_key, token, EXEC_LOCK_TTL).await {
            Ok(true) => {
                let ctx = Arc::clone(ctx);
                let token = token.to_string();
                tokio::spawn(async move {
                    run_cycle(&ctx, subscription.id).await;
                    if let Err(err) = ctx.cache.release_lock(&cache::lock::exec_lock_key(subscription.id), &token).await {
                        tracing::warn!(subscription_id = subscription.id, error = %err, "failed to release exec lock");
                    }
                });
            }
            Ok(false) => {
                tracing::debug!(subscription_id = subscription.id, "exec lock already held, skipping this tick");
            }
            Err(err) => {
                tracing::warn!(subscription_id = subscription.id, error = %err, "failed to acquire exec lock");
            }
        }
    }

    Ok(())
}

/// Runs forever, pruning `action_logs` every `maintenance_interval_secs`
/// (§4.F): non-`ERROR` rows older than `action_log_retention_days` are
/// deleted so the audit trail doesn't grow unbounded.
pub async fn run_maintenance(ctx: Arc<Context>) {
    let mut ticker = interval(Duration::from_secs(ctx.settings.engine.maintenance_interval_secs));

    loop {
        ticker.tick().await;
        let retention_days = i64::from(ctx.settings.engine.action_log_retention_days);
        match ctx.db.prune_action_log(retention_days).await {
            Ok(pruned) => {
                if pruned > 0 {
                    tracing::info!(pruned, "pruned stale action_log rows");
                }
            }
            Err(err) => tracing::error!(error = %err, "action_log prune failed"),
        }
    }
}
