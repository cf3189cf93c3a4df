//! The wire protocol spoken between the engine and a loaded strategy
//! subprocess: one JSON value per frame, each frame prefixed by its length
//! as a 4-byte big-endian `u32` (see [`crate::ipc`]). Subprocess plugins in
//! any language only need to implement this envelope, matching the
//! donor bot's marketplace ambition of strategies it doesn't itself compile.

use core_types::{Action, ExchangeCredentials};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest<'a> {
    /// Sent once right after spawning, before any `ExecuteFullCycle` call.
    Init {
        runtime_config: &'a Value,
        credentials: Option<&'a ExchangeCredentials>,
    },
    ExecuteFullCycle {
        timeframe: &'a str,
        subscription_config: &'a Value,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Ready,
    Action(Action),
    Error { message: String },
}
