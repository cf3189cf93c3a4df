use std::time::Duration;

use redis::AsyncCommands;

use crate::error::CacheError;

/// Releases a lock only if the value still matches the holder's token —
/// otherwise a worker that held the lock past its TTL could delete a lock
/// a different worker has since acquired.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A single distributed lock attempt: `SET key token NX EX ttl_secs`.
/// `token` should be unique per holder (e.g. `pid + startup_ts`) so a stale
/// holder can't accidentally release a lock it no longer owns.
pub async fn try_acquire(
    conn: &mut redis::aio::ConnectionManager,
    key: &str,
    token: &str,
    ttl: Duration,
) -> Result<bool, CacheError> {
    let acquired: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(token)
        .arg("NX")
        .arg("EX")
        .arg(ttl.as_secs())
        .query_async(conn)
        .await?;
    Ok(acquired.is_some())
}

pub async fn release(conn: &mut redis::aio::ConnectionManager, key: &str, token: &str) -> Result<(), CacheError> {
    redis::Script::new(RELEASE_SCRIPT)
        .key(key)
        .arg(token)
        .invoke_async::<_, i64>(conn)
        .await?;
    Ok(())
}

/// The orchestrator's per-subscription exclusion key: at most one
/// `RunCycle` for a given subscription runs at a time.
pub fn exec_lock_key(subscription_id: i64) -> String {
    format!("exec:{subscription_id}")
}

/// The LLM advisory client's per-symbol exclusion key, deduplicating
/// concurrent analysis requests for the same symbol across workers.
pub fn llm_lock_key(symbol: &str) -> String {
    format!("llm_lock:{symbol}")
}

/// Unique per-process lock token: `pid + startup timestamp`, so a
/// restarted worker never collides with a lock its previous incarnation
/// held.
pub fn worker_token(pid: u32, startup_ts: i64) -> String {
    format!("{pid}-{startup_ts}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_lock_key_is_namespaced() {
        assert_eq!(exec_lock_key(42), "exec:42");
    }

    #[test]
    fn llm_lock_key_is_namespaced() {
        assert_eq!(llm_lock_key("BTCUSDT"), "llm_lock:BTCUSDT");
    }

    #[test]
    fn worker_token_combines_pid_and_startup() {
        assert_eq!(worker_token(123, 999), "123-999");
    }
}
