use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use core_types::{BotFile, ExchangeCredentials};
use object_store::ObjectStore;
use serde_json::Value;
use tokio::process::Command;

use crate::error::BotLoaderError;
use crate::ipc;
use crate::protocol::{IpcRequest, IpcResponse};
use crate::strategy::{Strategy, SubprocessStrategy};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches, verifies and launches the subprocess plugin described by
/// `bot_file` (version resolution — latest vs. pinned — is the caller's
/// responsibility, since it's a database lookup this crate has no
/// business making). Mirrors `initialize_bot_from_s3`: object store first,
/// `ObjectStore`'s own local fallback covers the "or local file" leg.
///
/// `credentials`, when present, is handed to the plugin over the `Init`
/// frame rather than as a process argument or environment variable, so it
/// never lands in `ps`'s output or a crash dump's argv.
pub async fn load_strategy(
    store: &ObjectStore,
    bot_file: &BotFile,
    runtime_config: &Value,
    credentials: Option<&ExchangeCredentials>,
) -> Result<Box<dyn Strategy>, BotLoaderError> {
    let bytes = store.fetch_artifact(&bot_file.object_key, &bot_file.sha256).await?;

    let artifact_path = cache_path_for(bot_file);
    if let Some(parent) = artifact_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(BotLoaderError::Spawn)?;
    }
    tokio::fs::write(&artifact_path, &bytes).await.map_err(BotLoaderError::Spawn)?;
    let mut perms = tokio::fs::metadata(&artifact_path).await.map_err(BotLoaderError::Spawn)?.permissions();
    perms.set_mode(0o700);
    tokio::fs::set_permissions(&artifact_path, perms).await.map_err(BotLoaderError::Spawn)?;

    let mut child = Command::new(&artifact_path)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(BotLoaderError::Spawn)?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let mut stdout = child.stdout.take().expect("stdout was piped");

    let init = IpcRequest::Init { runtime_config, credentials };
    ipc::write_request(&mut stdin, &init).await?;

    match tokio::time::timeout(HANDSHAKE_TIMEOUT, ipc::read_response(&mut stdout)).await {
        Ok(Ok(IpcResponse::Ready)) => {}
        Ok(Ok(IpcResponse::Error { message })) => return Err(BotLoaderError::StrategyError(message)),
        Ok(Ok(IpcResponse::Action(_))) => {
            return Err(BotLoaderError::StrategyError("plugin sent an Action before completing its handshake".to_string()));
        }
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            return Err(BotLoaderError::Ipc(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "strategy subprocess did not respond to Init within the handshake timeout",
            )));
        }
    }

    Ok(Box::new(SubprocessStrategy::new(child, stdin, stdout)))
}

fn cache_path_for(bot_file: &BotFile) -> PathBuf {
    std::env::temp_dir().join("zenith-bots").join(format!("{}-{}", bot_file.bot_id, bot_file.version))
}
