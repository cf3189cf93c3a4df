use async_trait::async_trait;
use core_types::Action;
use serde_json::Value;
use tokio::process::{Child, ChildStdin, ChildStdout};

use crate::error::BotLoaderError;
use crate::ipc;
use crate::protocol::IpcRequest;

/// A loaded trading bot. The backing process (or, for a future non-subprocess
/// implementation, whatever else satisfies this trait) is strategy-agnostic
/// from the orchestrator's point of view: it only ever calls
/// `execute_full_cycle` once per `RunCycle`.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn execute_full_cycle(&mut self, timeframe: &str, subscription_config: &Value) -> Result<Action, BotLoaderError>;
}

/// A strategy implemented as a subprocess speaking the length-prefixed JSON
/// protocol in [`crate::protocol`]. Dropping this struct does not kill the
/// child; callers that want a clean shutdown should call
/// [`SubprocessStrategy::shutdown`] first.
pub struct SubprocessStrategy {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl SubprocessStrategy {
    pub(crate) fn new(child: Child, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self { child, stdin, stdout }
    }

    /// Sends an explicit shutdown frame and waits for the process to exit.
    /// Best-effort: a plugin that doesn't understand `Shutdown` just gets
    /// killed once the timeout in the caller's cleanup path elapses.
    pub async fn shutdown(mut self) -> Result<(), BotLoaderError> {
        let _ = ipc::write_request(&mut self.stdin, &IpcRequest::Shutdown).await;
        self.child.wait().await.map_err(BotLoaderError::Ipc)?;
        Ok(())
    }
}

#[async_trait]
impl Strategy for SubprocessStrategy {
    async fn execute_full_cycle(&mut self, timeframe: &str, subscription_config: &Value) -> Result<Action, BotLoaderError> {
        let request = IpcRequest::ExecuteFullCycle { timeframe, subscription_config };
        ipc::write_request(&mut self.stdin, &request).await?;

        loop {
            match ipc::read_response(&mut self.stdout).await {
                Ok(crate::protocol::IpcResponse::Action(action)) => return Ok(action),
                Ok(crate::protocol::IpcResponse::Error { message }) => return Err(BotLoaderError::StrategyError(message)),
                // A `Ready` frame here would mean the plugin re-sent its
                // handshake; tolerate it and keep waiting for the real reply.
                Ok(crate::protocol::IpcResponse::Ready) => continue,
                Err(err) => {
                    if let Some(status) = self.child.try_wait().map_err(BotLoaderError::Ipc)? {
                        return Err(BotLoaderError::ProcessExited(status.code()));
                    }
                    return Err(err);
                }
            }
        }
    }
}
