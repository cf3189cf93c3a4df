//! Length-prefixed JSON framing over a child process's stdin/stdout.
//! Generic over `AsyncWrite`/`AsyncRead` so the protocol can be exercised
//! against an in-memory pipe in tests, not just a real child process.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::BotLoaderError;
use crate::protocol::{IpcRequest, IpcResponse};

/// Guards against a misbehaving or compromised plugin trying to OOM the
/// host with a bogus length prefix.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

pub async fn write_request<W: AsyncWrite + Unpin>(stdin: &mut W, request: &IpcRequest<'_>) -> Result<(), BotLoaderError> {
    let payload = serde_json::to_vec(request)?;
    let len = (payload.len() as u32).to_be_bytes();
    stdin.write_all(&len).await.map_err(BotLoaderError::Ipc)?;
    stdin.write_all(&payload).await.map_err(BotLoaderError::Ipc)?;
    stdin.flush().await.map_err(BotLoaderError::Ipc)?;
    Ok(())
}

pub async fn read_response<R: AsyncRead + Unpin>(stdout: &mut R) -> Result<IpcResponse, BotLoaderError> {
    let mut len_bytes = [0u8; 4];
    stdout.read_exact(&mut len_bytes).await.map_err(BotLoaderError::Ipc)?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(BotLoaderError::Ipc(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("IPC frame of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte cap"),
        )));
    }

    let mut payload = vec![0u8; len as usize];
    stdout.read_exact(&mut payload).await.map_err(BotLoaderError::Ipc)?;
    Ok(serde_json::from_slice(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Action, ActionKind};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn round_trips_a_request_and_a_response_over_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let request = IpcRequest::ExecuteFullCycle {
            timeframe: "1h",
            subscription_config: &serde_json::json!({"symbol": "BTCUSDT"}),
        };
        write_request(&mut client, &request).await.unwrap();

        let mut len_bytes = [0u8; 4];
        server.read_exact(&mut len_bytes).await.unwrap();
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        server.read_exact(&mut payload).await.unwrap();
        let received: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(received["type"], "execute_full_cycle");
        assert_eq!(received["timeframe"], "1h");

        let action = Action {
            kind: ActionKind::Buy,
            value: dec!(0.8),
            reason: "breakout".to_string(),
            recommendation: None,
        };
        let response_bytes = serde_json::to_vec(&serde_json::json!({"type": "action", "kind": action.kind, "value": action.value, "reason": action.reason, "recommendation": action.recommendation})).unwrap();
        server.write_all(&(response_bytes.len() as u32).to_be_bytes()).await.unwrap();
        server.write_all(&response_bytes).await.unwrap();
        server.flush().await.unwrap();

        let response = read_response(&mut client).await.unwrap();
        match response {
            IpcResponse::Action(decoded) => {
                assert_eq!(decoded.kind, ActionKind::Buy);
                assert_eq!(decoded.value, dec!(0.8));
            }
            other => panic!("expected an Action response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_allocating() {
        let (mut client, mut server) = tokio::io::duplex(16);
        server.write_all(&(MAX_FRAME_BYTES + 1).to_be_bytes()).await.unwrap();
        server.flush().await.unwrap();

        let err = read_response(&mut client).await.unwrap_err();
        assert!(matches!(err, BotLoaderError::Ipc(_)));
    }
}
